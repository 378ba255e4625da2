//! Length-prefixed message framing.
//!
//! Every message travels as:
//! - a 4-byte little-endian segment length
//! - a 4-byte little-endian message identifier
//! - the raw payload
//!
//! The length covers identifier and payload, never itself. Inbound bytes may
//! arrive split at any offset; [`FrameAssembler`] reassembles them from a
//! [`ChunkBuffer`] without re-chunking.

pub mod assembler;
pub mod chunks;
pub mod codec;
pub mod error;
pub mod reader;
pub mod stream;
pub mod writer;

pub use assembler::FrameAssembler;
pub use chunks::ChunkBuffer;
pub use codec::{
    decode_frame, encode_frame, encode_parts, split_segment, Frame, FrameConfig, MessageId,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, LENGTH_PREFIX_SIZE, MESSAGE_ID_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use stream::split_stream;
pub use writer::FrameWriter;
