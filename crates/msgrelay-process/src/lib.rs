//! Child processes with piped standard streams.
//!
//! A [`Process`] spawns a child with stdin, stdout and stderr connected to
//! anonymous pipes. Two relay threads drain stdout and stderr into
//! in-memory buffers and report progress through [`SharedSignal`]s; the
//! stdout relay also reaps the child once its output ends.

mod pipe;

pub mod error;
pub mod process;
pub mod signal;

pub use error::{ProcessError, Result};
pub use process::{ExecFlags, ExecMode, ExecState, Process, ProcessHandle};
pub use signal::{SharedSignal, SignalId};
