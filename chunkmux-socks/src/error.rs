use chunkmux_common::MuxError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocksError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid SOCKS version: {0}")]
    InvalidVersion(u8),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("Address type not supported: {0}")]
    UnsupportedAddressType(u8),

    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    #[error("Malformed request: {0}")]
    Malformed(&'static str),

    #[error("Could not resolve {0}")]
    Resolve(String),

    #[error("Target refused: {0}")]
    Refused(String),

    #[error(transparent)]
    Mux(#[from] MuxError),
}

pub type Result<T> = std::result::Result<T, SocksError>;
