use bytes::BytesMut;

use crate::chunks::ChunkBuffer;
use crate::codec::{check_segment_len, DEFAULT_MAX_PAYLOAD};
use crate::error::Result;

/// Reassembles length-prefixed segments from arbitrarily split input.
///
/// Holds the inbound chunks plus the length of the segment currently being
/// collected. A frame may span any number of pushes; several frames may
/// arrive in one push.
#[derive(Debug)]
pub struct FrameAssembler {
    chunks: ChunkBuffer,
    pending: Option<usize>,
    max_payload: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameAssembler {
    pub fn new(max_payload: usize) -> Self {
        Self {
            chunks: ChunkBuffer::new(),
            pending: None,
            max_payload,
        }
    }

    /// Hand a received chunk over to the assembler.
    pub fn push(&mut self, chunk: BytesMut) {
        self.chunks.push(chunk);
    }

    /// Bytes still needed to complete the current segment; `0` while waiting
    /// for a length prefix.
    pub fn pending_read(&self) -> usize {
        self.pending.unwrap_or(0)
    }

    /// Bytes buffered and not yet handed out.
    pub fn buffered(&self) -> usize {
        self.chunks.len()
    }

    /// The underlying chunk sequence.
    pub fn chunks(&self) -> &ChunkBuffer {
        &self.chunks
    }

    /// Extract the next complete segment (message id + payload).
    ///
    /// Returns `Ok(None)` when more bytes are needed. A length prefix over
    /// the payload ceiling is an error; the assembler should be reset before
    /// further use.
    pub fn next_segment(&mut self) -> Result<Option<BytesMut>> {
        let segment_len = match self.pending {
            Some(len) => len,
            None => {
                let Some(len) = self.chunks.read_u32_le() else {
                    return Ok(None);
                };
                let len = len as usize;
                check_segment_len(len, self.max_payload)?;
                self.pending = Some(len);
                len
            }
        };

        let Some(segment) = self.chunks.take_exact(segment_len) else {
            return Ok(None);
        };
        self.pending = None;
        Ok(Some(segment))
    }

    /// Forget all buffered bytes and any partially read segment.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_frame, split_segment};
    use crate::error::FrameError;

    fn wire(frames: &[(u32, &[u8])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (id, payload) in frames {
            encode_frame(*id, payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn drain(assembler: &mut FrameAssembler) -> Vec<(u32, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some(segment) = assembler.next_segment().unwrap() {
            let (id, payload) = split_segment(&segment).unwrap();
            out.push((id, payload.to_vec()));
        }
        out
    }

    #[test]
    fn reassembles_across_every_split_offset() {
        let frames: Vec<(u32, &[u8])> = vec![
            (1, b"alpha".as_slice()),
            (2, b"".as_slice()),
            (3, b"a somewhat longer payload that spans chunks".as_slice()),
            (4, [0u8, 1, 2, 3, 4, 5, 6, 7].as_slice()),
        ];
        let bytes = wire(&frames);
        let expected: Vec<(u32, Vec<u8>)> = frames
            .iter()
            .map(|(id, payload)| (*id, payload.to_vec()))
            .collect();

        for first in 0..=bytes.len() {
            for second in first..=bytes.len() {
                let mut assembler = FrameAssembler::default();
                let mut got = Vec::new();
                for piece in [&bytes[..first], &bytes[first..second], &bytes[second..]] {
                    assembler.push(BytesMut::from(piece));
                    got.extend(drain(&mut assembler));
                }
                assert_eq!(got, expected, "split at {first}/{second}");
                assert_eq!(assembler.buffered(), 0);
                assert_eq!(assembler.pending_read(), 0);
            }
        }
    }

    #[test]
    fn partial_frame_waits_for_remainder() {
        let bytes = wire(&[(9, b"0123456789".as_slice())]);
        let mut assembler = FrameAssembler::default();

        for byte in &bytes[..bytes.len() - 1] {
            assembler.push(BytesMut::from(&[*byte][..]));
            assert!(assembler.next_segment().unwrap().is_none());
        }
        assert_eq!(assembler.pending_read(), 14);

        assembler.push(BytesMut::from(&bytes[bytes.len() - 1..]));
        let segment = assembler.next_segment().unwrap().unwrap();
        assert_eq!(split_segment(&segment), Some((9, b"0123456789".as_ref())));
    }

    #[test]
    fn zero_length_segment_is_yielded_empty() {
        let mut assembler = FrameAssembler::default();
        assembler.push(BytesMut::from(&[0, 0, 0, 0][..]));
        let segment = assembler.next_segment().unwrap().unwrap();
        assert!(segment.is_empty());
        assert!(assembler.next_segment().unwrap().is_none());
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        let mut assembler = FrameAssembler::new(8);
        assembler.push(BytesMut::from(&[0xFF, 0xFF, 0, 0][..]));
        assert!(matches!(
            assembler.next_segment(),
            Err(FrameError::PayloadTooLarge { .. })
        ));

        assembler.reset();
        assert_eq!(assembler.buffered(), 0);
        assert_eq!(assembler.pending_read(), 0);
    }
}
