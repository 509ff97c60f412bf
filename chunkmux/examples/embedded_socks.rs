//! Run a relay and a SOCKS front end in one process.
//!
//! ```bash
//! cargo run --example embedded_socks
//! curl --socks5 127.0.0.1:5775 http://example.com/
//! ```

use chunkmux::prelude::*;
use chunkmux::socks::SocksConfig;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut relay = Relay::builder().bind("127.0.0.1:0").build()?;
    let addr = relay.start().await?;

    let client = Client::builder()
        .relay_url(format!("http://{addr}"))
        .extra_send_tunnels(2)
        .extra_recv_tunnels(2)
        .connect()
        .await?;
    println!("session {} open through {}", client.session_id(), addr);

    let listener = TcpListener::bind(chunkmux::common::DEFAULT_SOCKS_BIND).await?;
    let socks = SocksServer::with_config(
        client.dispatcher().clone(),
        SocksConfig {
            direct_local: false,
            ..SocksConfig::default()
        },
    );

    tokio::select! {
        result = socks.serve(listener) => {
            if let Err(e) = result {
                eprintln!("socks front end stopped: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => client.shutdown(),
    }
    Ok(())
}
