use msgrelay_frame::MessageId;

/// Errors that can occur in connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The transport is not connected.
    #[error("transport not connected")]
    NotConnected,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] msgrelay_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] msgrelay_frame::FrameError),
}

/// Errors raised while registering or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Another message type already claimed this id.
    #[error("message id {0} is already registered")]
    DuplicateId(MessageId),

    /// The payload does not match the expected layout.
    #[error("malformed payload for message {id}: {reason}")]
    Malformed { id: MessageId, reason: String },
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
