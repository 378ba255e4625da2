use std::fs;

use crate::cmd::SendArgs;
use crate::exit::{io_error, CliResult, SUCCESS};
use crate::output::{print_sent, OutputFormat, SendReport};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let path = args.path.to_string_lossy().into_owned();
    let timeout = std::time::Duration::from_millis(args.timeout_ms);

    deliver(&path, args.id, &payload, timeout)?;
    print_sent(
        &SendReport {
            path: &path,
            id: args.id,
            payload_size: payload.len(),
        },
        format,
    );
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

#[cfg(unix)]
fn deliver(
    path: &str,
    id: msgrelay_frame::MessageId,
    payload: &[u8],
    timeout: std::time::Duration,
) -> CliResult<()> {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Instant;

    use msgrelay_connection::{Connection, EventLoop, MessageRegistry};
    use msgrelay_transport::UnixTransport;
    use tracing::{debug, warn};

    use crate::exit::{connection_error, CliError, TIMEOUT, TRANSPORT_ERROR};

    if payload.is_empty() {
        warn!("empty payload, nothing will be sent");
    }

    let event_loop = EventLoop::new();
    let registry = Rc::new(MessageRegistry::with_builtin());
    let connection = Connection::new(Rc::clone(&event_loop), registry, UnixTransport::new());

    let lost = Rc::new(Cell::new(false));
    {
        let lost = Rc::clone(&lost);
        connection.on_disconnected(move |connection| {
            if connection.pending_write() > 0 {
                lost.set(true);
            }
        });
    }

    connection
        .connect_to_server(path, None)
        .map_err(|err| connection_error("connect failed", err))?;
    connection
        .send(id, payload)
        .map_err(|err| connection_error("send failed", err))?;
    connection.finish();

    // The connection keeps itself alive until its writes are acknowledged.
    let weak = Rc::downgrade(&connection);
    drop(connection);

    let deadline = Instant::now() + timeout;
    while let Some(connection) = weak.upgrade() {
        if lost.get() {
            return Err(CliError::new(
                TRANSPORT_ERROR,
                format!("peer at {path} closed before the message was delivered"),
            ));
        }
        if Instant::now() >= deadline {
            return Err(CliError::new(
                TIMEOUT,
                format!("timed out delivering message to {path}"),
            ));
        }
        connection.pump();
        drop(connection);
        event_loop.run_until_idle();
        std::thread::sleep(super::POLL_INTERVAL);
    }

    debug!(path, id, len = payload.len(), "message delivered");
    Ok(())
}

#[cfg(not(unix))]
fn deliver(
    _path: &str,
    _id: msgrelay_frame::MessageId,
    _payload: &[u8],
    _timeout: std::time::Duration,
) -> CliResult<()> {
    Err(crate::exit::CliError::new(
        crate::exit::TRANSPORT_ERROR,
        "unix domain sockets are not available on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args(data: Option<&str>, file: Option<PathBuf>) -> SendArgs {
        SendArgs {
            path: PathBuf::from("/tmp/unused.sock"),
            id: 7,
            data: data.map(str::to_string),
            file,
            timeout_ms: 100,
        }
    }

    #[test]
    fn payload_comes_from_data_or_file() {
        assert_eq!(resolve_payload(&args(Some("hi"), None)).unwrap(), b"hi");
        assert!(resolve_payload(&args(None, None)).unwrap().is_empty());

        let path = std::env::temp_dir().join(format!("msgrelay-payload-{}", std::process::id()));
        fs::write(&path, b"from file").unwrap();
        assert_eq!(
            resolve_payload(&args(None, Some(path.clone()))).unwrap(),
            b"from file"
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_payload_file_is_an_error() {
        let err = resolve_payload(&args(None, Some(PathBuf::from("/nonexistent/msgrelay"))))
            .unwrap_err();
        assert_eq!(err.code, crate::exit::FAILURE);
    }

    #[cfg(unix)]
    #[test]
    fn deliver_to_missing_socket_fails() {
        let err = deliver(
            "/nonexistent/msgrelay.sock",
            1,
            b"x",
            std::time::Duration::from_millis(100),
        )
        .unwrap_err();
        assert_ne!(err.code, SUCCESS);
    }
}
