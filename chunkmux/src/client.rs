//! Embeddable relay client with builder pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use chunkmux::{Client, ClientExt};
//!
//! # async fn example() -> chunkmux::Result<()> {
//! let client = Client::builder()
//!     .relay_url("http://relay.example.com:8080")
//!     .extra_send_tunnels(2)
//!     .connect()
//!     .await?;
//!
//! let stream = client.open("example.com:80").await?;
//! # drop(stream);
//! # Ok(())
//! # }
//! ```

use chunkmux_common::{BackoffConfig, SessionConfig, TlsConfig};
use chunkmux_http::{Client, ClientConfig, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Builder for a [`Client`] session.
///
/// Use [`Client::builder()`](crate::ClientExt::builder) or
/// [`ClientBuilder::new`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

/// Adds `Client::builder()` to the session client.
pub trait ClientExt {
    fn builder() -> ClientBuilder;
}

impl ClientExt for Client {
    fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `http://host[:port]` or `https://host[:port]`
    #[must_use]
    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.config.relay_url = url.into();
        self
    }

    /// Reach the relay through this forward proxy. Can be called more
    /// than once; tunnels then alternate between proxies.
    #[must_use]
    pub fn upstream_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.upstream_proxies.push(proxy.into());
        self
    }

    /// Default: 1
    #[must_use]
    pub fn extra_send_tunnels(mut self, count: usize) -> Self {
        self.config.extra_send_tunnels = count;
        self
    }

    /// Default: 1
    #[must_use]
    pub fn extra_recv_tunnels(mut self, count: usize) -> Self {
        self.config.extra_recv_tunnels = count;
        self
    }

    /// Trust this CA when the relay URL is `https`.
    #[must_use]
    pub fn tls_ca(mut self, ca_cert_path: impl Into<PathBuf>) -> Self {
        self.config.tls = TlsConfig {
            enabled: true,
            ca_cert_path: Some(ca_cert_path.into()),
            ..self.config.tls
        };
        self
    }

    #[must_use]
    pub fn tls_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.tls.server_name = Some(name.into());
        self
    }

    /// Default: 10 seconds
    #[must_use]
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    #[must_use]
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// The configuration [`connect`](Self::connect) will use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a session with the relay. Fails if the configuration is
    /// invalid or the first pair of tunnels cannot be established.
    pub async fn connect(self) -> Result<Client> {
        Client::connect(self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = Client::builder();
        assert_eq!(builder.config().extra_send_tunnels, 1);
        assert_eq!(builder.config().extra_recv_tunnels, 1);
        assert!(builder.config().upstream_proxies.is_empty());
    }

    #[test]
    fn test_builder_collects_proxies() {
        let builder = ClientBuilder::new()
            .relay_url("http://relay:9000")
            .upstream_proxy("http://a:3128")
            .upstream_proxy("http://b:3128")
            .extra_send_tunnels(0);
        let config = builder.config();
        assert_eq!(config.relay_url, "http://relay:9000");
        assert_eq!(config.upstream_proxies.len(), 2);
        assert_eq!(config.extra_send_tunnels, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_ca_enables_tls() {
        let builder = ClientBuilder::new()
            .relay_url("https://relay:443")
            .tls_server_name("relay.internal")
            .tls_ca("/etc/ca.pem");
        let tls = &builder.config().tls;
        assert!(tls.enabled);
        assert_eq!(tls.server_name.as_deref(), Some("relay.internal"));
        assert!(builder.config().validate().is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = ClientBuilder::new().relay_url("ftp://relay").connect().await;
        assert!(result.is_err());
    }
}
