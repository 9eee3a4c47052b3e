use thiserror::Error;

/// Failure of a protocol exchange or of establishing the connection.
///
/// Every variant is terminal for the connection it came from: the client
/// moves to [`crate::ConnectionState::Failed`] and never touches the socket
/// again.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream before a length header or payload was
    /// complete.
    #[error("stream ended after {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },

    /// Incoming length header exceeds the accepted maximum.
    #[error("frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: u32, max: u32 },

    /// Outgoing payload does not fit a 4-byte length header.
    #[error("payload of {0} bytes cannot be framed")]
    PayloadTooLarge(usize),

    #[error("response is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("connection already failed")]
    Failed,

    #[error("exchange timed out")]
    Timeout,

    #[error("exchange cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
