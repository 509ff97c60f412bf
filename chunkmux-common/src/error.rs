//! Error types for `chunkmux`

use chunkmux_protocol::{FrameError, FramingError, StreamId, TunnelId};
use thiserror::Error;

/// Main error type for `chunkmux` operations
#[derive(Error, Debug)]
pub enum MuxError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed chunked body on one tunnel
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// The peer broke the frame protocol; fatal for the session
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer reported a session-level error
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Stream {0} not found")]
    UnknownStream(StreamId),

    #[error("Stream {0} can no longer send")]
    StreamNotSendable(StreamId),

    #[error("Send tunnel {tunnel} of stream {stream} is gone")]
    TunnelCorrupted { stream: StreamId, tunnel: TunnelId },

    #[error("Stream {0} already exists")]
    DuplicateStream(StreamId),

    #[error("Tunnel {0} already registered")]
    DuplicateTunnel(TunnelId),

    #[error("No send tunnel available")]
    PoolExhausted,

    #[error("Stream limit of {0} reached")]
    StreamLimit(usize),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),
}

impl MuxError {
    pub fn violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Errors after which the session cannot continue.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_) | Self::Remote(_))
    }
}

impl From<FrameError> for MuxError {
    fn from(err: FrameError) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_error_display() {
        let id = StreamId::from_str("abc").unwrap();
        let err = MuxError::UnknownStream(id);
        assert_eq!(err.to_string(), "Stream abc not found");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::other("test");
        let err: MuxError = io_err.into();
        assert!(matches!(err, MuxError::Io(_)));

        let err: MuxError = FrameError::UnknownEvent(b'X').into();
        assert!(err.is_session_fatal());

        let err: MuxError = FramingError::UnexpectedEof.into();
        assert!(!err.is_session_fatal());
    }
}
