/// Errors that can occur while running a child process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Creating an anonymous pipe failed.
    #[error("failed to create pipe: {0}")]
    Pipe(#[source] std::io::Error),

    /// Restricting handle inheritance on a pipe end failed.
    #[error("failed to restrict pipe inheritance: {0}")]
    Inheritance(#[source] std::io::Error),

    /// The child process could not be created.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An output relay thread could not be started.
    #[error("failed to start relay thread: {0}")]
    Thread(#[source] std::io::Error),

    /// The process was already started once.
    #[error("process already started")]
    AlreadyStarted,

    /// The stdin pipe is not open.
    #[error("stdin is closed")]
    StdinClosed,

    /// Writing to the child's stdin failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
