use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Message identifier carried at the start of every segment.
pub type MessageId = u32;

/// Size of the segment length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the message identifier at the start of a segment.
pub const MESSAGE_ID_SIZE: usize = 4;

/// Full frame header: length prefix (4) + message id (4) = 8 bytes.
pub const HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + MESSAGE_ID_SIZE;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A decoded message frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message identifier.
    pub id: MessageId,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────────┐
/// │ Length (4B)  │ Id (4B LE)   │ Payload                 │
/// │ LE, = 4 + N  │              │ (N bytes)               │
/// └──────────────┴──────────────┴─────────────────────────┘
/// ```
pub fn encode_frame(id: MessageId, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let segment_len = segment_len(payload)?;
    dst.reserve(LENGTH_PREFIX_SIZE + segment_len as usize);
    dst.put_u32_le(segment_len);
    dst.put_u32_le(id);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a frame as a separate length header and data segment.
///
/// Writing `header` followed by `data` produces the same bytes as
/// [`encode_frame`].
pub fn encode_parts(id: MessageId, payload: &[u8]) -> Result<(BytesMut, BytesMut)> {
    let segment_len = segment_len(payload)?;

    let mut data = BytesMut::with_capacity(segment_len as usize);
    data.put_u32_le(id);
    data.put_slice(payload);

    let mut header = BytesMut::with_capacity(LENGTH_PREFIX_SIZE);
    header.put_u32_le(segment_len);

    Ok((header, data))
}

fn segment_len(payload: &[u8]) -> Result<u32> {
    let max = u32::MAX as usize - MESSAGE_ID_SIZE;
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }
    Ok((MESSAGE_ID_SIZE + payload.len()) as u32)
}

/// Split a data segment into its message id and payload.
///
/// Returns `None` when the segment is too short to carry an id.
pub fn split_segment(segment: &[u8]) -> Option<(MessageId, &[u8])> {
    if segment.len() < MESSAGE_ID_SIZE {
        return None;
    }
    let (id, payload) = segment.split_at(MESSAGE_ID_SIZE);
    let id = u32::from_le_bytes([id[0], id[1], id[2], id[3]]);
    Some((id, payload))
}

/// Check a decoded segment length against the configured payload ceiling.
pub(crate) fn check_segment_len(segment_len: usize, max_payload: usize) -> Result<()> {
    let payload_len = segment_len.saturating_sub(MESSAGE_ID_SIZE);
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }
    Ok(())
}

/// Decode a frame from a contiguous buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let segment_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
    check_segment_len(segment_len, max_payload)?;

    if src.len() < LENGTH_PREFIX_SIZE + segment_len {
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let mut segment = src.split_to(segment_len);
    if segment.len() < MESSAGE_ID_SIZE {
        return Err(FrameError::SegmentTooShort(segment.len()));
    }
    let id = segment.get_u32_le();

    Ok(Some(Frame {
        id,
        payload: segment.freeze(),
    }))
}

/// Configuration for frame encoding and decoding.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes, excluding the message id. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let mut buf = BytesMut::new();
        encode_frame(0x0102_0304, b"hi", &mut buf).unwrap();

        assert_eq!(
            buf.as_ref(),
            &[6, 0, 0, 0, 0x04, 0x03, 0x02, 0x01, b'h', b'i'][..]
        );
    }

    #[test]
    fn test_encode_parts_matches_encode_frame() {
        let mut whole = BytesMut::new();
        encode_frame(7, b"payload", &mut whole).unwrap();

        let (header, data) = encode_parts(7, b"payload").unwrap();
        assert_eq!(header.len(), LENGTH_PREFIX_SIZE);
        assert_eq!(data.len(), MESSAGE_ID_SIZE + 7);

        let mut joined = header;
        joined.extend_from_slice(&data);
        assert_eq!(joined, whole);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_frame(42, b"hello, msgrelay!", &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 16);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();

        assert_eq!(frame.id, 42);
        assert_eq!(frame.payload.as_ref(), b"hello, msgrelay!");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x08, 0x00, 0x00][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(1, b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2, "nothing consumed");
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(32 * 1024 * 1024);
        buf.put_u32_le(1);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_decode_segment_too_short() {
        let mut buf = BytesMut::from(&[2, 0, 0, 0, 0xAA, 0xBB][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::SegmentTooShort(2))));
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame(1, b"first", &mut buf).unwrap();
        encode_frame(2, b"second", &mut buf).unwrap();

        let f1 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        let f2 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();

        assert_eq!((f1.id, f1.payload.as_ref()), (1, b"first".as_ref()));
        assert_eq!((f2.id, f2.payload.as_ref()), (2, b"second".as_ref()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(9, b"", &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.id, 9);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_split_segment() {
        assert_eq!(
            split_segment(&[5, 0, 0, 0, b'x']),
            Some((5, b"x".as_ref()))
        );
        assert_eq!(split_segment(&[5, 0, 0, 0]), Some((5, b"".as_ref())));
        assert_eq!(split_segment(&[5, 0, 0]), None);
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(1, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4);
    }
}
