//! Message framing over byte streams and child processes with relayed output.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte-stream transports (Unix domain sockets)
//! - [`frame`]: length-prefixed message framing and chunked reassembly
//! - [`connection`]: message-oriented connections on a cooperative event
//!   loop (behind the `connection` feature)
//! - [`process`]: child processes with piped, relayed standard streams
//!   (behind the `process` feature)

/// Re-export transport types.
pub mod transport {
    pub use msgrelay_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use msgrelay_frame::*;
}

/// Re-export connection types (requires `connection` feature).
#[cfg(feature = "connection")]
pub mod connection {
    pub use msgrelay_connection::*;
}

/// Re-export process types (requires `process` feature).
#[cfg(feature = "process")]
pub mod process {
    pub use msgrelay_process::*;
}
