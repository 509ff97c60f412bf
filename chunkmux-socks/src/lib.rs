//! SOCKS4, SOCKS4a and SOCKS5 (CONNECT, no authentication) front end for
//! chunkmux sessions.

pub mod error;
pub mod local;
pub mod request;
pub mod server;

pub use error::{Result, SocksError};
pub use local::is_local;
pub use request::{read_request, Request, Target, Version};
pub use server::{SocksConfig, SocksServer};
