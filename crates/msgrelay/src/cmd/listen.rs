use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use msgrelay_connection::{Message, MessageError, MessageRegistry};
use msgrelay_frame::MessageId;

use crate::cmd::ListenArgs;
use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

/// Payload of a user-defined id, kept as received.
#[derive(Debug)]
struct RawMessage {
    id: MessageId,
    payload: Bytes,
}

impl Message for RawMessage {
    fn message_id(&self) -> MessageId {
        self.id
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.extend_from_slice(&self.payload);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Built-in messages plus a raw decoder for every listed id the registry
/// does not already know.
fn build_registry(ids: Option<&[MessageId]>) -> CliResult<MessageRegistry> {
    let mut registry = MessageRegistry::with_builtin();
    for &id in ids.unwrap_or_default() {
        if registry.contains(id) {
            continue;
        }
        registry
            .register(id, move |payload| {
                Ok::<Box<dyn Message>, MessageError>(Box::new(RawMessage {
                    id,
                    payload: Bytes::copy_from_slice(payload),
                }))
            })
            .map_err(|err| CliError::new(USAGE, format!("invalid --ids: {err}")))?;
    }
    Ok(registry)
}

#[cfg(unix)]
pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    use std::cell::Cell;
    use std::rc::Rc;

    use msgrelay_connection::{Connection, EventLoop, QuitMessage};
    use msgrelay_frame::FrameConfig;
    use msgrelay_transport::UnixDomainSocket;
    use tracing::{debug, info};

    use crate::exit::{connection_error, transport_error, SUCCESS};
    use crate::output::print_message;

    let listener =
        UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let event_loop = EventLoop::new();
    let registry = Rc::new(build_registry(args.ids.as_deref())?);
    let printed = Rc::new(Cell::new(0usize));
    let exit_code: Rc<Cell<Option<i32>>> = Rc::new(Cell::new(None));

    while running.load(Ordering::SeqCst) && exit_code.get().is_none() {
        let transport = listener
            .accept_transport()
            .map_err(|err| transport_error("accept failed", err))?;
        let connection = Connection::from_connected(
            Rc::clone(&event_loop),
            Rc::clone(&registry),
            transport,
            FrameConfig::default(),
        )
        .map_err(|err| connection_error("accept failed", err))?;
        info!("client connected");

        let closed = Rc::new(Cell::new(false));
        {
            let closed = Rc::clone(&closed);
            connection.on_disconnected(move |_| closed.set(true));
        }
        {
            let ids = args.ids.clone();
            let count = args.count;
            let printed = Rc::clone(&printed);
            let exit_code = Rc::clone(&exit_code);
            connection.on_new_message(move |message, _| {
                if exit_code.get().is_some() {
                    return;
                }
                let id = message.message_id();
                let wanted = ids.as_ref().is_none_or(|ids| ids.contains(&id));
                if wanted {
                    print_message(message, format);
                    printed.set(printed.get().saturating_add(1));
                }
                if let Some(quit) = message.downcast_ref::<QuitMessage>() {
                    debug!(exit_code = quit.exit_code, "quit requested by client");
                    exit_code.set(Some(quit.exit_code));
                } else if count.is_some_and(|count| printed.get() >= count) {
                    exit_code.set(Some(SUCCESS));
                }
            });
        }

        while running.load(Ordering::SeqCst) && !closed.get() && exit_code.get().is_none() {
            event_loop.run_until_idle();
            connection.pump();
            event_loop.run_until_idle();
            std::thread::sleep(super::POLL_INTERVAL);
        }
        info!("client disconnected");
    }

    Ok(exit_code.get().unwrap_or(SUCCESS))
}

#[cfg(not(unix))]
pub fn run(_args: ListenArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(CliError::new(
        crate::exit::TRANSPORT_ERROR,
        "unix domain sockets are not available on this platform",
    ))
}

/// First Ctrl-C stops after the current client; a second one exits at once.
fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        if !running.swap(false, Ordering::SeqCst) {
            std::process::exit(130);
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use msgrelay_connection::{ResponseMessage, RESPONSE_MESSAGE_ID};

    use super::*;

    fn segment(id: MessageId, payload: &[u8]) -> Vec<u8> {
        let mut out = id.to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn registry_decodes_listed_user_ids() {
        let registry = build_registry(Some(&[RESPONSE_MESSAGE_ID, 42][..])).unwrap();

        let user = registry.create(&segment(42, b"raw")).unwrap();
        assert_eq!(user.message_id(), 42);
        assert_eq!(&user.to_bytes()[..], b"raw");
        assert!(user.downcast_ref::<RawMessage>().is_some());

        let builtin = registry.create(&segment(RESPONSE_MESSAGE_ID, b"r")).unwrap();
        assert!(builtin.downcast_ref::<ResponseMessage>().is_some());
    }

    #[test]
    fn unlisted_user_ids_are_not_decoded() {
        let registry = build_registry(None).unwrap();
        assert!(registry.create(&segment(42, b"raw")).is_none());
        assert_eq!(registry.len(), 3);
    }
}
