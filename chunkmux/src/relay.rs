//! Embeddable relay with builder pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use chunkmux::Relay;
//!
//! # async fn example() -> chunkmux::Result<()> {
//! let mut relay = Relay::builder().bind("0.0.0.0:8080").build()?;
//! let addr = relay.start().await?;
//! println!("relay listening on {addr}");
//! # Ok(())
//! # }
//! ```

use chunkmux_common::{MuxError, SessionConfig, TlsConfig};
use chunkmux_http::{HttpError, RelayConfig, RelayServer, Result, SessionRegistry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A relay node running inside your application.
pub struct Relay {
    server: RelayServer,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<Result<()>>>,
}

#[derive(Debug, Default)]
pub struct RelayBuilder {
    config: RelayConfig,
}

impl Relay {
    pub fn builder() -> RelayBuilder {
        RelayBuilder::default()
    }

    /// Bind the listener and serve in the background. Returns the bound
    /// address, which is useful with port 0.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.task.is_some() {
            return Err(HttpError::Mux(MuxError::Config(
                "relay already started".to_string(),
            )));
        }
        let listener = self.server.bind().await?;
        let addr = listener.local_addr()?;
        info!("Starting chunkmux relay on {}", addr);

        let server = self.server.clone();
        self.task = Some(tokio::spawn(async move { server.serve(listener).await }));
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Stop accepting tunnels. Sessions already running keep their tunnels.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `http://` URL clients can use to reach this relay.
    pub fn url(&self) -> Option<String> {
        self.local_addr.map(|addr| format!("http://{addr}"))
    }

    pub fn sessions(&self) -> &SessionRegistry {
        self.server.sessions()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("Relay dropped while running, stopping it");
        }
        self.stop();
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl RelayBuilder {
    /// Default: `0.0.0.0:8080`
    #[must_use]
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind = addr.into();
        self
    }

    /// Serve tunnels over TLS with this certificate chain and key.
    #[must_use]
    pub fn tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.config.tls = TlsConfig {
            enabled: true,
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
            ..TlsConfig::default()
        };
        self
    }

    #[must_use]
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Default: 10 seconds
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Default: 1000
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn build(self) -> Result<Relay> {
        Ok(Relay {
            server: RelayServer::new(self.config)?,
            local_addr: None,
            task: None,
        })
    }
}
