use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use bytes::{Buf, BytesMut};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{IpcStream, StreamTransport, TransportEvent};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Unix domain socket listener.
///
/// Provides bind/accept/connect over filesystem-path UDS on Linux and macOS.
/// The socket path is removed on `Drop` if it still refers to the socket
/// this listener created.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If the file already exists and is a socket, it is removed first
    /// (stale socket cleanup).
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen on a filesystem-path Unix domain socket with explicit mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_error = |path: &Path, source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        // Never remove anything that is not a socket.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;
            if !metadata.file_type().is_socket() {
                return Err(bind_error(
                    &path,
                    std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_error(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_error(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_error(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
        })
    }

    /// Accept an incoming connection as a blocking stream.
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Accept an incoming connection as an already-connected [`UnixTransport`].
    pub fn accept_transport(&self) -> Result<UnixTransport> {
        UnixTransport::from_stream(self.accept()?)
    }

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(IpcStream::from_unix(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

/// Non-blocking [`StreamTransport`] over a Unix domain socket.
///
/// Outgoing bytes are queued and flushed as far as the socket accepts them;
/// every flush is reported as [`TransportEvent::BytesWritten`]. Inbound bytes
/// are collected by [`StreamTransport::poll_events`].
#[derive(Debug, Default)]
pub struct UnixTransport {
    stream: Option<UnixStream>,
    inbound: BytesMut,
    outbound: BytesMut,
    events: Vec<TransportEvent>,
    failure: Option<TransportError>,
}

impl UnixTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an established stream. The stream is switched to non-blocking mode.
    pub fn from_stream(stream: IpcStream) -> Result<Self> {
        let stream = stream.into_unix();
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream: Some(stream),
            ..Self::default()
        })
    }

    /// Bytes queued but not yet accepted by the socket.
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    fn flush_outbound(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        let mut flushed = 0usize;
        let mut failure = None;
        while flushed < self.outbound.len() {
            match stream.write(&self.outbound[flushed..]) {
                Ok(0) => {
                    failure = Some(std::io::Error::from(ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => flushed += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if flushed > 0 {
            self.outbound.advance(flushed);
            self.events.push(TransportEvent::BytesWritten(flushed));
        }
        match failure {
            Some(err) => Err(TransportError::Io(err)),
            None => Ok(()),
        }
    }

    fn fill_inbound(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        let mut received = false;
        let mut eof = false;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    received = true;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        if received {
            self.events.push(TransportEvent::ReadyRead);
        }
        if eof {
            debug!("peer closed unix transport");
            self.stream = None;
            self.outbound.clear();
            self.events.push(TransportEvent::Disconnected);
        }
        Ok(())
    }
}

impl StreamTransport for UnixTransport {
    fn connect(&mut self, name: &str) -> Result<()> {
        if self.stream.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        let stream = UnixDomainSocket::connect(name)?.into_unix();
        stream.set_nonblocking(true)?;
        self.stream = Some(stream);
        self.events.push(TransportEvent::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.outbound.extend_from_slice(bytes);
        if let Err(err) = self.flush_outbound() {
            debug!(error = %err, "write failed, reporting on next poll");
            self.failure.get_or_insert(err);
        }
        Ok(())
    }

    fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let _ = stream.shutdown(Shutdown::Both);
        if !self.outbound.is_empty() {
            debug!(dropped = self.outbound.len(), "closing with unflushed output");
        }
        self.outbound.clear();
        self.events.push(TransportEvent::Disconnected);
    }

    fn has_buffered(&self) -> bool {
        !self.inbound.is_empty()
    }

    fn take_buffer(&mut self) -> BytesMut {
        std::mem::take(&mut self.inbound)
    }

    fn poll_events(&mut self) -> Result<Vec<TransportEvent>> {
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        self.flush_outbound()?;
        self.fill_inbound()?;
        Ok(std::mem::take(&mut self.events))
    }
}
