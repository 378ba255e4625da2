use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use msgrelay_frame::{encode_parts, FrameAssembler, FrameConfig, FrameError, MessageId};
use msgrelay_transport::{StreamTransport, TransportEvent};
use tracing::{debug, error, trace};

use crate::error::{ConnectionError, Result};
use crate::event_loop::EventLoop;
use crate::message::{Message, MessageRegistry, ResponseMessage};
use crate::signal::{Signal, SlotId};

/// Slot type for lifecycle events that only carry the connection.
pub type ConnectionSlot = dyn Fn(&Connection);

/// Slot type for decoded inbound messages.
pub type MessageSlot = dyn Fn(&dyn Message, &Connection);

/// A framed, message-oriented endpoint on top of a [`StreamTransport`].
///
/// A connection lives on one cooperative thread and is always handled
/// through an `Rc`. Transport notifications are fed in with
/// [`Connection::pump`]; deferred work is queued on the shared
/// [`EventLoop`].
///
/// After [`Connection::finish`] the connection holds a strong reference to
/// itself until every pending write has been acknowledged, so the owner may
/// drop its handle right away. The transport is then closed and the last
/// reference is released from the event loop.
pub struct Connection {
    this: Weak<Connection>,
    event_loop: Rc<EventLoop>,
    transport: RefCell<Box<dyn StreamTransport>>,
    registry: Rc<MessageRegistry>,
    assembler: RefCell<FrameAssembler>,
    config: FrameConfig,
    pending_write: Cell<usize>,
    done: Cell<bool>,
    silent: Cell<bool>,
    disconnect_reported: Cell<bool>,
    keep_alive: RefCell<Option<Rc<Connection>>>,

    connected: Signal<ConnectionSlot>,
    disconnected: Signal<ConnectionSlot>,
    new_message: Signal<MessageSlot>,
    send_complete: Signal<ConnectionSlot>,
    destroyed: Signal<ConnectionSlot>,
}

impl Connection {
    /// Wrap a transport that is not connected yet. Use
    /// [`Connection::connect_to_server`] to start connecting.
    pub fn new(
        event_loop: Rc<EventLoop>,
        registry: Rc<MessageRegistry>,
        transport: impl StreamTransport + 'static,
    ) -> Rc<Self> {
        Self::with_config(event_loop, registry, transport, FrameConfig::default())
    }

    /// Like [`Connection::new`] with an explicit frame configuration.
    pub fn with_config(
        event_loop: Rc<EventLoop>,
        registry: Rc<MessageRegistry>,
        transport: impl StreamTransport + 'static,
        config: FrameConfig,
    ) -> Rc<Self> {
        let transport: Box<dyn StreamTransport> = Box::new(transport);
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            event_loop,
            transport: RefCell::new(transport),
            registry,
            assembler: RefCell::new(FrameAssembler::new(config.max_payload_size)),
            config,
            pending_write: Cell::new(0),
            done: Cell::new(false),
            silent: Cell::new(false),
            disconnect_reported: Cell::new(false),
            keep_alive: RefCell::new(None),
            connected: Signal::new(),
            disconnected: Signal::new(),
            new_message: Signal::new(),
            send_complete: Signal::new(),
            destroyed: Signal::new(),
        })
    }

    /// Wrap an already established transport, for example one returned by
    /// a listener.
    ///
    /// Bytes may have arrived before the connection existed, so a check for
    /// buffered data is queued on the event loop.
    pub fn from_connected(
        event_loop: Rc<EventLoop>,
        registry: Rc<MessageRegistry>,
        transport: impl StreamTransport + 'static,
        config: FrameConfig,
    ) -> Result<Rc<Self>> {
        if !transport.is_connected() {
            return Err(ConnectionError::NotConnected);
        }

        let connection = Self::with_config(event_loop, registry, transport, config);
        let weak = Rc::downgrade(&connection);
        connection.event_loop.call_later(move || {
            if let Some(connection) = weak.upgrade() {
                connection.check_data();
            }
        });
        Ok(connection)
    }

    /// Start connecting to the endpoint called `name`.
    ///
    /// `timeout` is accepted but not enforced.
    /// Completion is reported through the `connected` signal.
    pub fn connect_to_server(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        if let Some(timeout) = timeout {
            debug!(?timeout, name, "connect timeout is not enforced");
        }
        self.transport.borrow_mut().connect(name)?;
        debug!(name, "connecting");
        Ok(())
    }

    /// Send `payload` as a frame with message id `id`.
    ///
    /// An empty payload is a successful no-op. In silent mode nothing is
    /// written but success is reported.
    pub fn send(&self, id: MessageId, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        if !self.transport.borrow().is_connected() {
            error!(id, "cannot send message: transport not connected");
            return Err(ConnectionError::NotConnected);
        }
        if self.silent.get() {
            trace!(id, len = payload.len(), "silent mode, message not sent");
            return Ok(());
        }
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            }
            .into());
        }

        let (header, data) = encode_parts(id, payload)?;
        self.submit(&header, &data)?;
        trace!(
            id,
            len = payload.len(),
            pending = self.pending_write.get(),
            "queued message"
        );
        Ok(())
    }

    /// Encode `message` and send it under its own id.
    pub fn send_message(&self, message: &dyn Message) -> Result<()> {
        let mut payload = BytesMut::new();
        message.encode(&mut payload);
        self.send(message.message_id(), &payload)
    }

    /// Send `payload` as a [`ResponseMessage`] on the next event-loop
    /// iteration.
    pub fn write_async(&self, payload: impl Into<Bytes>) {
        let weak = self.this.clone();
        self.event_loop.call_later_move(
            move |message: ResponseMessage| {
                let Some(connection) = weak.upgrade() else {
                    debug!("connection gone before deferred write");
                    return;
                };
                if let Err(err) = connection.send_message(&message) {
                    debug!(error = %err, "deferred write failed");
                }
            },
            ResponseMessage::new(payload),
        );
    }

    /// Request a graceful shutdown once every pending write is acknowledged.
    pub fn finish(&self) {
        self.done.set(true);
        *self.keep_alive.borrow_mut() = self.this.upgrade();
        self.data_written(0);

        let waiting = self.keep_alive.borrow().is_some();
        if waiting && !self.is_connected() {
            self.report_disconnect();
        }
    }

    /// Drain the transport's notifications and dispatch them.
    pub fn pump(&self) {
        // Slots may release the owner's handle while they run.
        let _guard = self.this.upgrade();

        let polled = self.transport.borrow_mut().poll_events();
        let events = match polled {
            Ok(events) => events,
            Err(err) => {
                error!(error = %err, "transport poll failed");
                self.transport.borrow_mut().close();
                vec![TransportEvent::Disconnected]
            }
        };

        for event in events {
            match event {
                TransportEvent::Connected => {
                    self.disconnect_reported.set(false);
                    debug!("connected");
                    self.connected.emit(|slot| slot(self));
                }
                TransportEvent::Disconnected => self.report_disconnect(),
                TransportEvent::ReadyRead => self.data_available(),
                TransportEvent::BytesWritten(bytes) => self.data_written(bytes),
            }
        }
    }

    /// Move newly received bytes out of the transport and dispatch every
    /// complete frame.
    pub fn data_available(&self) {
        let incoming = {
            let mut transport = self.transport.borrow_mut();
            if transport.has_buffered() {
                Some(transport.take_buffer())
            } else {
                None
            }
        };
        if let Some(chunk) = incoming {
            self.assembler.borrow_mut().push(chunk);
        }

        loop {
            let next = self.assembler.borrow_mut().next_segment();
            let segment = match next {
                Ok(Some(segment)) => segment,
                Ok(None) => return,
                Err(err) => {
                    error!(error = %err, "dropping connection on invalid frame");
                    self.assembler.borrow_mut().reset();
                    self.transport.borrow_mut().close();
                    self.report_disconnect();
                    return;
                }
            };

            match self.registry.create(&segment) {
                Some(message) => {
                    self.new_message.emit(|slot| slot(message.as_ref(), self));
                }
                None => trace!(len = segment.len(), "discarding unrecognized frame"),
            }
        }
    }

    /// Account for `bytes` acknowledged by the transport.
    ///
    /// # Panics
    ///
    /// Panics if more bytes are acknowledged than were written.
    pub fn data_written(&self, bytes: usize) {
        let pending = self.pending_write.get();
        let Some(left) = pending.checked_sub(bytes) else {
            panic!("write acknowledgement of {bytes} bytes exceeds {pending} pending");
        };
        self.pending_write.set(left);
        if left > 0 {
            return;
        }

        if bytes > 0 {
            self.send_complete.emit(|slot| slot(self));
        }
        if self.done.get() {
            debug!("writes drained, closing finished connection");
            self.transport.borrow_mut().close();
            let keep_alive = self.keep_alive.borrow_mut().take();
            if let Some(keep_alive) = keep_alive {
                self.event_loop.delete_later(keep_alive);
            }
        }
    }

    /// Bytes written to the transport but not yet acknowledged.
    pub fn pending_write(&self) -> usize {
        self.pending_write.get()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.borrow().is_connected()
    }

    /// Suppress transmission while still reporting successful sends.
    pub fn set_silent(&self, silent: bool) {
        self.silent.set(silent);
    }

    pub fn is_silent(&self) -> bool {
        self.silent.get()
    }

    /// Whether [`Connection::finish`] has been called.
    pub fn is_finishing(&self) -> bool {
        self.done.get()
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.event_loop
    }

    pub fn registry(&self) -> &Rc<MessageRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Bytes received but not yet assembled into a frame.
    pub fn buffered(&self) -> usize {
        self.assembler.borrow().buffered()
    }

    pub fn connected(&self) -> &Signal<ConnectionSlot> {
        &self.connected
    }

    pub fn disconnected(&self) -> &Signal<ConnectionSlot> {
        &self.disconnected
    }

    pub fn new_message(&self) -> &Signal<MessageSlot> {
        &self.new_message
    }

    pub fn send_complete(&self) -> &Signal<ConnectionSlot> {
        &self.send_complete
    }

    /// Fired from `Drop`, while the transport is still owned.
    pub fn destroyed(&self) -> &Signal<ConnectionSlot> {
        &self.destroyed
    }

    pub fn on_connected(&self, slot: impl Fn(&Connection) + 'static) -> SlotId {
        self.connected.connect(Rc::new(slot))
    }

    pub fn on_disconnected(&self, slot: impl Fn(&Connection) + 'static) -> SlotId {
        self.disconnected.connect(Rc::new(slot))
    }

    pub fn on_new_message(&self, slot: impl Fn(&dyn Message, &Connection) + 'static) -> SlotId {
        self.new_message.connect(Rc::new(slot))
    }

    pub fn on_send_complete(&self, slot: impl Fn(&Connection) + 'static) -> SlotId {
        self.send_complete.connect(Rc::new(slot))
    }

    pub fn on_destroyed(&self, slot: impl Fn(&Connection) + 'static) -> SlotId {
        self.destroyed.connect(Rc::new(slot))
    }

    fn check_data(&self) {
        if self.transport.borrow().has_buffered() {
            self.data_available();
        }
    }

    /// Count the whole frame as pending, then hand header and data to the
    /// transport. Acknowledgements may already be queued by the time a
    /// write returns, so the count must come first.
    fn submit(&self, header: &[u8], data: &[u8]) -> Result<()> {
        let pending = self.pending_write.get();
        self.pending_write.set(pending + header.len() + data.len());

        let mut transport = self.transport.borrow_mut();
        if let Err(err) = transport.write(header) {
            self.pending_write.set(pending);
            return Err(err.into());
        }
        if let Err(err) = transport.write(data) {
            self.pending_write.set(pending + header.len());
            return Err(err.into());
        }
        Ok(())
    }

    fn report_disconnect(&self) {
        if !self.disconnect_reported.replace(true) {
            debug!(pending = self.pending_write.get(), "disconnected");
            self.disconnected.emit(|slot| slot(self));
        }

        // Unacknowledged writes of a finished connection will never drain.
        if self.done.get() {
            let keep_alive = self.keep_alive.borrow_mut().take();
            if let Some(keep_alive) = keep_alive {
                debug!(
                    pending = self.pending_write.get(),
                    "finished connection lost its peer, releasing"
                );
                self.event_loop.delete_later(keep_alive);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let this: &Connection = self;
        this.destroyed.emit(|slot| slot(this));
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .field("pending_write", &self.pending_write.get())
            .field("buffered", &self.buffered())
            .field("done", &self.done.get())
            .field("silent", &self.silent.get())
            .finish()
    }
}
