//! HTTP/1.1 side of chunkmux: the relay node, the client that bootstraps
//! tunnels to it, and a local HTTP CONNECT proxy.

pub mod config;
pub mod connect;
pub mod dialer;
pub mod error;
pub mod head;
pub mod relay;
pub mod upstream;

pub use config::{ClientConfig, RelayConfig, RelayEndpoint};
pub use connect::{ConnectProxy, ConnectProxyConfig};
pub use dialer::Client;
pub use error::{HttpError, Result};
pub use relay::{parse_target, RelayServer, RelaySession, SessionRegistry};
pub use upstream::{UpstreamProxy, Upstreams};
