use std::collections::VecDeque;

use bytes::{Buf, BytesMut};

/// Ordered sequence of owned byte chunks, appended at the tail and consumed
/// from the head.
///
/// Reads copy out of the head chunks: a chunk read to its end is removed, a
/// chunk read partially is shrunk in place so its unread bytes start at
/// offset 0. No chunk is ever copied into a new chunk, so the cost of
/// draining the buffer is linear in the bytes read.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: VecDeque<BytesMut>,
    len: usize,
}

impl ChunkBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, taking ownership of its storage. Empty chunks are dropped.
    pub fn push(&mut self, chunk: BytesMut) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Total buffered bytes across all chunks.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Iterate over the buffered chunks, head first.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(|chunk| chunk.as_ref())
    }

    /// Copy up to `out.len()` bytes from the head of the buffer into `out`,
    /// consuming them.
    ///
    /// Returns the number of bytes copied. A short count means the buffer
    /// ran dry; the bytes that were copied stay consumed.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let mut copied = 0usize;
        while copied < out.len() {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&front[..n]);
            copied += n;

            if n == front.len() {
                self.chunks.pop_front();
            } else {
                front.advance(n);
            }
        }
        self.len -= copied;
        copied
    }

    /// Consume a little-endian `u32`, or return `None` (consuming nothing)
    /// if fewer than four bytes are buffered.
    pub fn read_u32_le(&mut self) -> Option<u32> {
        if self.len < 4 {
            return None;
        }
        let mut raw = [0u8; 4];
        let read = self.read_into(&mut raw);
        debug_assert_eq!(read, 4);
        Some(u32::from_le_bytes(raw))
    }

    /// Consume exactly `n` bytes into one contiguous buffer, or return `None`
    /// (consuming nothing) if fewer than `n` bytes are buffered.
    pub fn take_exact(&mut self, n: usize) -> Option<BytesMut> {
        if self.len < n {
            return None;
        }
        let mut out = BytesMut::zeroed(n);
        let read = self.read_into(&mut out);
        debug_assert_eq!(read, n);
        Some(out)
    }

    /// Drop every buffered chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(bytes: &[u8]) -> BytesMut {
        BytesMut::from(bytes)
    }

    fn sum_of_chunks(buffer: &ChunkBuffer) -> usize {
        buffer.chunks().map(<[u8]>::len).sum()
    }

    #[test]
    fn empty_chunks_are_not_stored() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(BytesMut::new());
        assert!(buffer.is_empty());
        assert_eq!(buffer.chunk_count(), 0);
    }

    #[test]
    fn read_spanning_chunks_removes_consumed_and_shrinks_head() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(chunk(b"abc"));
        buffer.push(chunk(b"defg"));
        buffer.push(chunk(b"hi"));

        let mut out = [0u8; 5];
        assert_eq!(buffer.read_into(&mut out), 5);
        assert_eq!(&out, b"abcde");

        // "abc" removed, "defg" shrunk to "fg" starting at offset 0.
        assert_eq!(buffer.chunk_count(), 2);
        let remaining: Vec<&[u8]> = buffer.chunks().collect();
        assert_eq!(remaining, vec![b"fg".as_ref(), b"hi".as_ref()]);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn exact_chunk_boundary_removes_chunk() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(chunk(b"abcd"));
        buffer.push(chunk(b"ef"));

        let mut out = [0u8; 4];
        assert_eq!(buffer.read_into(&mut out), 4);
        assert_eq!(buffer.chunk_count(), 1);
        assert_eq!(buffer.chunks().next(), Some(b"ef".as_ref()));
    }

    #[test]
    fn short_read_reports_count_and_drains() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(chunk(b"ab"));
        buffer.push(chunk(b"c"));

        let mut out = [0u8; 8];
        assert_eq!(buffer.read_into(&mut out), 3);
        assert_eq!(&out[..3], b"abc");
        assert!(buffer.is_empty());
        assert_eq!(buffer.chunk_count(), 0);
    }

    #[test]
    fn zero_length_read_is_noop() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(chunk(b"xyz"));
        assert_eq!(buffer.read_into(&mut []), 0);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn read_u32_le_needs_four_bytes() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(chunk(&[1, 0]));
        assert_eq!(buffer.read_u32_le(), None);
        assert_eq!(buffer.len(), 2);

        buffer.push(chunk(&[0, 0, 9]));
        assert_eq!(buffer.read_u32_le(), Some(1));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn take_exact_leaves_buffer_untouched_when_short() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(chunk(b"abc"));
        assert!(buffer.take_exact(4).is_none());
        assert_eq!(buffer.len(), 3);

        buffer.push(chunk(b"d"));
        assert_eq!(buffer.take_exact(4).unwrap().as_ref(), b"abcd");
        assert!(buffer.is_empty());
    }

    #[test]
    fn consumption_invariant_holds_for_every_read_size() {
        let data: Vec<u8> = (0..=255u8).collect();

        for step in 1..=17usize {
            let mut buffer = ChunkBuffer::new();
            let mut appended = 0usize;
            let mut extracted = 0usize;
            let mut seen = Vec::new();

            for piece in data.chunks(7) {
                buffer.push(chunk(piece));
                appended += piece.len();

                let mut out = vec![0u8; step];
                let n = buffer.read_into(&mut out);
                extracted += n;
                seen.extend_from_slice(&out[..n]);

                assert_eq!(buffer.len(), appended - extracted);
                assert_eq!(sum_of_chunks(&buffer), buffer.len());
            }

            let mut rest = vec![0u8; buffer.len()];
            let n = buffer.read_into(&mut rest);
            seen.extend_from_slice(&rest[..n]);

            assert_eq!(seen, data, "read step {step}");
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn clear_drops_everything() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(chunk(b"abc"));
        buffer.push(chunk(b"def"));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.chunk_count(), 0);
    }
}
