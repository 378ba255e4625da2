use msgrelay_transport::{IpcStream, TransportError};
use tracing::debug;

use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// Apply the timeouts from `config` to a connected stream, then split it into
/// a reader and a writer that share the connection.
pub fn split_stream(
    stream: IpcStream,
    config: FrameConfig,
) -> Result<(FrameReader<IpcStream>, FrameWriter<IpcStream>)> {
    stream
        .set_read_timeout(config.read_timeout)
        .map_err(transport_to_frame_error)?;
    stream
        .set_write_timeout(config.write_timeout)
        .map_err(transport_to_frame_error)?;

    let read_half = stream.try_clone().map_err(transport_to_frame_error)?;
    debug!(
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        max_payload_size = config.max_payload_size,
        "framed stream ready"
    );
    Ok((
        FrameReader::with_config(read_half, config.clone()),
        FrameWriter::with_config(stream, config),
    ))
}

fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::ErrorKind;
    use std::time::Duration;

    use msgrelay_transport::UnixDomainSocket;

    use super::*;

    fn socket_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("msgrelay-frame-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn split_halves_talk_over_a_socket() {
        let dir = socket_dir("split");
        let path = dir.join("echo.sock");
        let listener = UnixDomainSocket::bind(&path).unwrap();

        let server = std::thread::spawn(move || {
            let stream = listener.accept().unwrap();
            let (mut reader, mut writer) = split_stream(stream, FrameConfig::default()).unwrap();
            let frame = reader.read_frame().unwrap();
            writer.send(frame.id + 1, &frame.payload).unwrap();
        });

        let stream = UnixDomainSocket::connect(&path).unwrap();
        let (mut reader, mut writer) = split_stream(stream, FrameConfig::default()).unwrap();
        writer.send(11, b"uds").unwrap();
        let reply = reader.read_frame().unwrap();

        assert_eq!(reply.id, 12);
        assert_eq!(reply.payload.as_ref(), b"uds");
        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_timeout_is_applied() {
        let dir = socket_dir("timeout");
        let path = dir.join("quiet.sock");
        let listener = UnixDomainSocket::bind(&path).unwrap();
        let server = std::thread::spawn(move || listener.accept().unwrap());

        let stream = UnixDomainSocket::connect(&path).unwrap();
        let config = FrameConfig {
            read_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let (mut reader, _writer) = split_stream(stream, config).unwrap();
        let _peer = server.join().unwrap();

        match reader.read_frame() {
            Err(FrameError::Io(err)) => {
                assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut));
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
