//! Default ports and addresses for chunkmux services.

/// Default port the relay accepts tunnel connections on.
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// Default bind address for the relay (`0.0.0.0:8080`).
pub const DEFAULT_RELAY_BIND: &str = "0.0.0.0:8080";

/// Default bind address for the local SOCKS front end.
pub const DEFAULT_SOCKS_BIND: &str = "127.0.0.1:5775";

/// Default bind address for the local HTTP CONNECT front end.
pub const DEFAULT_HTTP_PROXY_BIND: &str = "127.0.0.1:5775";

/// Default relay URL used by the front ends.
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8080";
