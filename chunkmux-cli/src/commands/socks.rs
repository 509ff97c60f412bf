//! SOCKS subcommand implementation

use super::client::RelayClientArgs;
use anyhow::{anyhow, Result};
use chunkmux_common::DEFAULT_SOCKS_BIND;
use chunkmux_observability::{init_observability, shutdown_tracing};
use chunkmux_socks::{SocksConfig, SocksServer};
use clap::Args;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Args, Debug)]
pub struct SocksArgs {
    /// Address to accept SOCKS clients on
    #[arg(long, default_value = DEFAULT_SOCKS_BIND, env = "CHUNKMUX_SOCKS_BIND")]
    bind: String,

    /// Send loopback and private targets through the relay too
    #[arg(long, env = "CHUNKMUX_NO_DIRECT_LOCAL")]
    no_direct_local: bool,

    #[command(flatten)]
    relay: RelayClientArgs,
}

pub async fn run(args: SocksArgs) -> Result<()> {
    init_observability("chunkmux-socks", args.relay.json_logs);
    info!("Starting chunkmux SOCKS proxy v{}", env!("CARGO_PKG_VERSION"));

    let client = args.relay.connect().await?;
    let listener = TcpListener::bind(&args.bind).await?;
    let server = SocksServer::with_config(
        client.dispatcher().clone(),
        SocksConfig {
            direct_local: !args.no_direct_local,
            ..SocksConfig::default()
        },
    );

    let session_id = client.session_id().to_string();
    let outcome = tokio::select! {
        served = server.serve(listener) => match served {
            Ok(()) => Err(anyhow!("session {} was closed by the relay", session_id)),
            Err(e) => Err(e.into()),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, closing session");
            client.shutdown();
            Ok(())
        }
    };
    shutdown_tracing();
    outcome
}
