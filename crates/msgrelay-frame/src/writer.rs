use std::io::{ErrorKind, Write};

use tracing::trace;

use crate::codec::{encode_parts, FrameConfig, MessageId};
use crate::error::{FrameError, Result};

/// Blocking sender of framed messages over any `Write` stream.
///
/// Each message goes out as its length header followed by its data
/// segment, then the stream is flushed.
pub struct FrameWriter<T> {
    inner: T,
    max_payload_size: usize,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Only `max_payload_size` is taken from `config`. Stream timeouts are
    /// applied by [`crate::split_stream`].
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            max_payload_size: config.max_payload_size,
        }
    }

    /// Send `payload` under `id`. Nothing reaches the stream when the
    /// payload is over the limit.
    pub fn send(&mut self, id: MessageId, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        let (header, data) = encode_parts(id, payload)?;
        self.write_fully(&header)?;
        self.write_fully(&data)?;
        trace!(id, payload_size = payload.len(), "frame sent");
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if retryable(&err) => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn write_fully(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            match self.inner.write(bytes) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => bytes = &bytes[n..],
                Err(err) if retryable(&err) => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }
}

fn retryable(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{decode_frame, Frame};

    fn decode_all(bytes: Vec<u8>) -> Vec<Frame> {
        let mut wire = BytesMut::from(bytes.as_slice());
        let mut frames = Vec::new();
        while let Some(frame) = decode_frame(&mut wire, usize::MAX).unwrap() {
            frames.push(frame);
        }
        assert!(wire.is_empty());
        frames
    }

    #[test]
    fn frames_follow_each_other_on_the_wire() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(1, b"one").unwrap();
        writer.send(2, b"").unwrap();
        writer.send(3, b"three").unwrap();

        let frames = decode_all(writer.into_inner().into_inner());
        assert_eq!(
            frames,
            vec![Frame::new(1, "one"), Frame::new(2, ""), Frame::new(3, "three")]
        );
    }

    #[test]
    fn header_and_data_are_written_separately() {
        let mut writer = FrameWriter::new(RecordingWriter::default());
        writer.send(7, b"ab").unwrap();

        let sink = writer.into_inner();
        assert_eq!(sink.writes, vec![vec![6, 0, 0, 0], vec![7, 0, 0, 0, b'a', b'b']]);
        assert_eq!(sink.flushes, 1);
    }

    #[test]
    fn oversized_payload_writes_nothing() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(RecordingWriter::default(), cfg);

        let err = writer.send(1, b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        writer.send(1, b"fits").unwrap();
        assert_eq!(writer.into_inner().writes.len(), 2);
    }

    #[test]
    fn retries_interrupted_and_short_writes() {
        let mut writer = FrameWriter::new(FlakyWriter {
            failures: vec![ErrorKind::Interrupted, ErrorKind::WouldBlock],
            data: Vec::new(),
        });
        writer.send(5, b"retry").unwrap();

        let frames = decode_all(writer.into_inner().data);
        assert_eq!(frames, vec![Frame::new(5, "retry")]);
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<Vec<u8>>,
        flushes: usize,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    struct FlakyWriter {
        failures: Vec<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.failures.pop() {
                return Err(std::io::Error::from(kind));
            }
            let n = buf.len().min(3);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
