use std::io::{Read, Write};

use bytes::BytesMut;

use crate::error::Result;

/// Notifications a [`StreamTransport`] queues for its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// A pending connect completed.
    Connected,
    /// The peer went away or the transport was closed.
    Disconnected,
    /// New bytes are waiting in the transport buffer.
    ReadyRead,
    /// This many previously submitted bytes were flushed to the peer.
    BytesWritten(usize),
}

/// A connected (or connectable) byte-stream endpoint driven by a
/// cooperative event loop.
///
/// Writes are submitted without blocking; completion is reported later as
/// [`TransportEvent::BytesWritten`]. Inbound bytes accumulate in an internal
/// buffer that the owner swaps out with [`StreamTransport::take_buffer`].
pub trait StreamTransport {
    /// Start connecting to the endpoint called `name`.
    fn connect(&mut self, name: &str) -> Result<()>;

    /// Whether the endpoint is currently connected.
    fn is_connected(&self) -> bool;

    /// Queue `bytes` for transmission.
    ///
    /// Either every byte is queued and `Ok` is returned, or nothing is
    /// queued. I/O failures that happen after queuing surface from the next
    /// [`StreamTransport::poll_events`].
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Close the endpoint, dropping anything not yet flushed.
    fn close(&mut self);

    /// Whether inbound bytes are waiting in the buffer.
    fn has_buffered(&self) -> bool;

    /// Move the inbound buffer out, leaving an empty one behind.
    fn take_buffer(&mut self) -> BytesMut;

    /// Perform pending I/O and drain the queued notifications.
    fn poll_events(&mut self) -> Result<Vec<TransportEvent>>;
}

impl<T: StreamTransport + ?Sized> StreamTransport for Box<T> {
    fn connect(&mut self, name: &str) -> Result<()> {
        (**self).connect(name)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn has_buffered(&self) -> bool {
        (**self).has_buffered()
    }

    fn take_buffer(&mut self) -> BytesMut {
        (**self).take_buffer()
    }

    fn poll_events(&mut self) -> Result<Vec<TransportEvent>> {
        (**self).poll_events()
    }
}

/// A connected blocking stream implementing `Read` and `Write`.
///
/// On Unix, this wraps a Unix domain socket stream.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl IpcStream {
    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Unwrap the underlying Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn into_unix(self) -> std::os::unix::net::UnixStream {
        match self.inner {
            IpcStreamInner::Unix(stream) => stream,
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => f.debug_struct("IpcStream").field("type", &"unix").finish(),
        }
    }
}
