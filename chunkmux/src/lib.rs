//! # chunkmux
//!
//! Stream multiplexing over chunked HTTP/1.1 tunnels.
//!
//! A client and a relay share a session made of several long-lived HTTP
//! requests. Each request body, sent with `Transfer-Encoding: chunked`,
//! carries frames in one direction. Many TCP streams are interleaved over
//! those tunnels, and tunnels can come and go without disturbing the
//! streams.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chunkmux::prelude::*;
//!
//! # async fn example() -> chunkmux::Result<()> {
//! let mut relay = Relay::builder().bind("127.0.0.1:0").build()?;
//! let addr = relay.start().await?;
//!
//! let client = Client::builder()
//!     .relay_url(format!("http://{addr}"))
//!     .connect()
//!     .await?;
//! let socks = SocksServer::new(client.dispatcher().clone());
//! # drop(socks);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`common`] - errors, configuration and defaults
//! - [`protocol`] - frame and chunked codecs
//! - [`core`] - session, tunnel pool, stream table and transports
//! - [`http`] - relay node and client bootstrap over HTTP/1.1
//! - [`socks`] - SOCKS4/4a/5 front end

pub use chunkmux_common as common;
pub use chunkmux_core as core;
pub use chunkmux_http as http;
pub use chunkmux_protocol as protocol;
pub use chunkmux_socks as socks;

pub mod client;
pub mod relay;

pub use client::{ClientBuilder, ClientExt};
pub use relay::{Relay, RelayBuilder};

pub mod prelude {
    pub use crate::client::{ClientBuilder, ClientExt};
    pub use crate::relay::{Relay, RelayBuilder};

    pub use crate::common::{MuxError, SessionConfig};
    pub use crate::core::{pipe, Session, StreamDispatcher, StreamHandle};
    pub use crate::http::{Client, ConnectProxy, HttpError, Result};
    pub use crate::protocol::{Frame, StreamId, TunnelId};
    pub use crate::socks::{SocksConfig, SocksServer};
}

pub use http::{Client, ConnectProxy, HttpError, Result};
pub use socks::SocksServer;
