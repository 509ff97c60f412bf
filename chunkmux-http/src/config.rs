//! Relay and client configuration

use crate::error::{HttpError, Result};
use chunkmux_common::{
    BackoffConfig, MuxError, SessionConfig, TlsConfig, DEFAULT_RELAY_BIND, DEFAULT_RELAY_PORT,
};
use chunkmux_core::transport::tls::TlsTransportConfig;
use chunkmux_core::transport::TransportConfig;
use http::Uri;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub bind: String,
    pub tls: TlsConfig,
    pub session: SessionConfig,
    /// How long the relay waits when connecting a stream's target
    pub connect_timeout: Duration,
    /// Maximum concurrent tunnel connections
    pub max_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_RELAY_BIND.to_string(),
            tls: TlsConfig::default(),
            session: SessionConfig::default(),
            connect_timeout: Duration::from_secs(10),
            max_connections: 1000,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        self.tls.validate_server()?;
        self.session.validate()?;
        if self.max_connections == 0 {
            return Err(MuxError::Config("max_connections must be positive".to_string()).into());
        }
        Ok(())
    }

    pub fn transport(&self) -> TransportConfig {
        if self.tls.enabled {
            TransportConfig::Tls(TlsTransportConfig::from(&self.tls))
        } else {
            TransportConfig::Tcp
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// `http://host[:port]` or `https://host[:port]`
    pub relay_url: String,
    /// CA and SNI name for `https` relays
    pub tls: TlsConfig,
    /// Forward proxies (`http://[user:pass@]host:port`), used round-robin per tunnel
    pub upstream_proxies: Vec<String>,
    /// Send tunnels beyond the first
    pub extra_send_tunnels: usize,
    /// Receive tunnels beyond the first
    pub extra_recv_tunnels: usize,
    /// How long a new send tunnel waits for the relay's ACK
    pub ack_timeout: Duration,
    pub backoff: BackoffConfig,
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: chunkmux_common::constants::DEFAULT_RELAY_URL.to_string(),
            tls: TlsConfig::default(),
            upstream_proxies: Vec::new(),
            extra_send_tunnels: 1,
            extra_recv_tunnels: 1,
            ack_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        let relay = RelayEndpoint::parse(&self.relay_url)?;
        if relay.tls && self.tls.ca_cert_path.is_none() {
            return Err(MuxError::Config("https relay requires a CA certificate".to_string()).into());
        }
        for proxy in &self.upstream_proxies {
            crate::upstream::UpstreamProxy::parse(proxy)?;
        }
        if self.ack_timeout.is_zero() {
            return Err(MuxError::Config("ack_timeout must be positive".to_string()).into());
        }
        self.session.validate()?;
        Ok(())
    }
}

/// Where the client dials its tunnels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl RelayEndpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|_| HttpError::InvalidUrl(url.to_string()))?;
        let tls = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            _ => return Err(HttpError::InvalidUrl(url.to_string())),
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| HttpError::InvalidUrl(url.to_string()))?;
        let port = uri
            .port_u16()
            .unwrap_or(if tls { 443 } else { DEFAULT_RELAY_PORT });
        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    /// `host:port`, as used for `Host` headers and dialing.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
