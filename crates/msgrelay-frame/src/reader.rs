use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::trace;

use crate::assembler::FrameAssembler;
use crate::codec::{split_segment, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    assembler: FrameAssembler,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a frame reader that rejects payloads over
    /// `config.max_payload_size`.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            assembler: FrameAssembler::new(config.max_payload_size),
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(segment) = self.assembler.next_segment()? {
                let Some((id, payload)) = split_segment(&segment) else {
                    return Err(FrameError::SegmentTooShort(segment.len()));
                };
                trace!(id, payload_size = payload.len(), "frame received");
                return Ok(Frame::new(id, payload.to_vec()));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.assembler.push(BytesMut::from(&chunk[..read]));
        }
    }
}
