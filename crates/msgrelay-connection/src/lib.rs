//! Message-oriented connections over a byte-stream transport.
//!
//! A [`Connection`] frames outgoing messages, reassembles inbound frames
//! from arbitrarily split reads, decodes them through a
//! [`MessageRegistry`] and tracks write completion. It runs on a single
//! cooperative thread driven by an [`EventLoop`]; lifecycle events are
//! delivered through [`Signal`]s.

pub mod connection;
pub mod error;
pub mod event_loop;
pub mod message;
pub mod signal;

pub use connection::{Connection, ConnectionSlot, MessageSlot};
pub use error::{ConnectionError, MessageError, Result};
pub use event_loop::EventLoop;
pub use message::{
    DecodeMessage, FinishMessage, Message, MessageRegistry, QuitMessage, ResponseMessage,
    FINISH_MESSAGE_ID, QUIT_MESSAGE_ID, RESPONSE_MESSAGE_ID,
};
pub use signal::{Signal, SlotId};
