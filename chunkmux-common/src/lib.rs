//! Common utilities and types for `chunkmux`

pub mod config;
pub mod constants;
pub mod error;

pub use config::{BackoffConfig, SessionConfig, TlsConfig};
pub use constants::{DEFAULT_HTTP_PROXY_BIND, DEFAULT_RELAY_BIND, DEFAULT_RELAY_PORT, DEFAULT_SOCKS_BIND};
pub use error::{MuxError, Result};
