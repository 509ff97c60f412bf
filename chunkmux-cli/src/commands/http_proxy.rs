//! HTTP CONNECT proxy subcommand implementation

use super::client::RelayClientArgs;
use anyhow::{anyhow, Result};
use chunkmux_common::DEFAULT_HTTP_PROXY_BIND;
use chunkmux_http::ConnectProxy;
use chunkmux_observability::{init_observability, shutdown_tracing};
use clap::Args;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Args, Debug)]
pub struct HttpProxyArgs {
    /// Address to accept CONNECT requests on
    #[arg(long, default_value = DEFAULT_HTTP_PROXY_BIND, env = "CHUNKMUX_HTTP_PROXY_BIND")]
    bind: String,

    #[command(flatten)]
    relay: RelayClientArgs,
}

pub async fn run(args: HttpProxyArgs) -> Result<()> {
    init_observability("chunkmux-http-proxy", args.relay.json_logs);
    info!("Starting chunkmux HTTP CONNECT proxy v{}", env!("CARGO_PKG_VERSION"));

    let client = args.relay.connect().await?;
    let listener = TcpListener::bind(&args.bind).await?;
    let proxy = ConnectProxy::new(client.dispatcher().clone());

    let session_id = client.session_id().to_string();
    let outcome = tokio::select! {
        served = proxy.serve(listener) => match served {
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
