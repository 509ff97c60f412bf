use chunkmux_common::MuxError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed HTTP head: {0}")]
    Parse(#[from] httparse::Error),

    #[error("HTTP head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("Connection closed before the HTTP head was complete")]
    Incomplete,

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Missing or invalid header {0}")]
    Header(&'static str),

    #[error("Invalid URL {0}")]
    InvalidUrl(String),

    #[error("Invalid target {0}")]
    InvalidTarget(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Peer sent data before the tunnel was established")]
    UnexpectedBody,

    #[error(transparent)]
    Mux(#[from] MuxError),
}

pub type Result<T> = std::result::Result<T, HttpError>;
