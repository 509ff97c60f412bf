//! Relay subcommand implementation

use anyhow::Result;
use chunkmux_common::{SessionConfig, TlsConfig, DEFAULT_RELAY_BIND};
use chunkmux_http::{RelayConfig, RelayServer};
use chunkmux_observability::{init_observability, shutdown_tracing};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Address to accept tunnel connections on
    #[arg(long, default_value = DEFAULT_RELAY_BIND, env = "CHUNKMUX_BIND")]
    bind: String,

    /// Path to TLS certificate file (PEM format)
    #[arg(long, env = "CHUNKMUX_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long, env = "CHUNKMUX_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Maximum concurrent streams per session
    #[arg(long, default_value_t = 1024, env = "CHUNKMUX_MAX_STREAMS")]
    max_streams: usize,

    /// Maximum concurrent tunnel connections
    #[arg(long, default_value_t = 1000, env = "CHUNKMUX_MAX_CONNECTIONS")]
    max_connections: usize,

    /// Seconds to wait when connecting a stream's target
    #[arg(long, default_value_t = 10, env = "CHUNKMUX_CONNECT_TIMEOUT")]
    connect_timeout: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "CHUNKMUX_JSON_LOGS")]
    json_logs: bool,
}

pub async fn run(args: RelayArgs) -> Result<()> {
    init_observability("chunkmux-relay", args.json_logs);
    info!("Starting chunkmux relay v{}", env!("CARGO_PKG_VERSION"));

    let tls = TlsConfig {
        enabled: args.tls_cert.is_some(),
        cert_path: args.tls_cert,
        key_path: args.tls_key,
        ..TlsConfig::default()
    };
    if tls.enabled {
        info!("TLS enabled with cert: {:?}, key: {:?}", tls.cert_path, tls.key_path);
    }

    let server = RelayServer::new(RelayConfig {
        bind: args.bind,
        tls,
        session: SessionConfig {
            max_streams: args.max_streams,
            ..SessionConfig::default()
        },
        connect_timeout: Duration::from_secs(args.connect_timeout),
        max_connections: args.max_connections,
    })?;

    let outcome = tokio::select! {
        served = server.start() => served.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };
    shutdown_tracing();
    outcome
}
