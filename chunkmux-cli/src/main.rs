//! chunkmux command line
//!
//! Runs the relay node or one of the local front ends (SOCKS, HTTP CONNECT)
//! that carry their connections to the relay as multiplexed streams.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "chunkmux",
    author,
    version,
    about = "Stream multiplexing over chunked HTTP/1.1 tunnels",
    long_about = "chunkmux carries many TCP connections over a handful of long-lived HTTP/1.1 \
                  requests whose bodies use chunked transfer encoding.\n\n\
                  Run `chunkmux relay` on the far side and `chunkmux socks` or \
                  `chunkmux http-proxy` locally.",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay node
    Relay(commands::relay::RelayArgs),

    /// Run a SOCKS4/4a/5 proxy backed by a relay session
    Socks(commands::socks::SocksArgs),

    /// Run an HTTP CONNECT proxy backed by a relay session
    HttpProxy(commands::http_proxy::HttpProxyArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Relay(args) => commands::relay::run(args).await,
        Commands::Socks(args) => commands::socks::run(args).await,
        Commands::HttpProxy(args) => commands::http_proxy::run(args).await,
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    }
}
