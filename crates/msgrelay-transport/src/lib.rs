//! Byte-stream transport abstraction.
//!
//! Two flavours of transport live here:
//! - [`IpcStream`], a blocking `Read + Write` stream used by the blocking
//!   frame reader and writer.
//! - [`StreamTransport`], the non-blocking, notification-driven interface a
//!   message connection is built on. [`UnixTransport`] implements it over a
//!   Unix domain socket.
//!
//! This is the lowest layer of msgrelay. Everything else builds on top of it.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{IpcStream, StreamTransport, TransportEvent};

#[cfg(unix)]
pub use uds::{UnixDomainSocket, UnixTransport};
