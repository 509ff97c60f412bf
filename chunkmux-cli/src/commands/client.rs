//! Relay connection options shared by the front ends

use anyhow::{Context, Result};
use chunkmux_common::constants::DEFAULT_RELAY_URL;
use chunkmux_common::{SessionConfig, TlsConfig};
use chunkmux_http::{Client, ClientConfig};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug)]
pub struct RelayClientArgs {
    /// Relay URL (http://host:port or https://host:port)
    #[arg(long = "relay", default_value = DEFAULT_RELAY_URL, env = "CHUNKMUX_RELAY")]
    relay_url: String,

    /// CA certificate used to verify an https relay (PEM format)
    #[arg(long, env = "CHUNKMUX_TLS_CA")]
    tls_ca: Option<PathBuf>,

    /// Server name to verify instead of the relay host
    #[arg(long, env = "CHUNKMUX_TLS_SERVER_NAME")]
    tls_server_name: Option<String>,

    /// Forward proxy to reach the relay through (repeatable, used round-robin)
    #[arg(long = "upstream-proxy", env = "CHUNKMUX_UPSTREAM_PROXY", value_delimiter = ',')]
    upstream_proxies: Vec<String>,

    /// Send tunnels beyond the first
    #[arg(long, default_value_t = 1, env = "CHUNKMUX_EXTRA_SEND_TUNNELS")]
    extra_send_tunnels: usize,

    /// Receive tunnels beyond the first
    #[arg(long, default_value_t = 1, env = "CHUNKMUX_EXTRA_RECV_TUNNELS")]
    extra_recv_tunnels: usize,

    /// Seconds to wait for the relay to acknowledge a send tunnel
    #[arg(long, default_value_t = 10, env = "CHUNKMUX_ACK_TIMEOUT")]
    ack_timeout: u64,

    /// Maximum concurrent streams in the session
    #[arg(long, default_value_t = 1024, env = "CHUNKMUX_MAX_STREAMS")]
    max_streams: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "CHUNKMUX_JSON_LOGS")]
    pub json_logs: bool,
}

impl RelayClientArgs {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            relay_url: self.relay_url.clone(),
            tls: TlsConfig {
                enabled: self.relay_url.starts_with("https://"),
                ca_cert_path: self.tls_ca.clone(),
                server_name: self.tls_server_name.clone(),
                ..TlsConfig::default()
            },
            upstream_proxies: self.upstream_proxies.clone(),
            extra_send_tunnels: self.extra_send_tunnels,
            extra_recv_tunnels: self.extra_recv_tunnels,
            ack_timeout: Duration::from_secs(self.ack_timeout),
            session: SessionConfig {
                max_streams: self.max_streams,
                ..SessionConfig::default()
            },
            ..ClientConfig::default()
        }
    }

    pub async fn connect(&self) -> Result<Client> {
        let client = Client::connect(self.config())
            .await
            .with_context(|| format!("failed to open a session with {}", self.relay_url))?;
        info!("Connected to relay, session {}", client.session_id());
        Ok(client)
    }
}
