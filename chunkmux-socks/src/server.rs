//! SOCKS front end: local targets are connected directly, everything else
//! becomes a stream to the relay.

use crate::error::{Result, SocksError};
use crate::local::is_local;
use crate::request::{read_request, Request, Target};
use bytes::Bytes;
use chunkmux_core::transport::socket_tuning::configure_socket_silent;
use chunkmux_core::{pipe, StreamDispatcher};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocksConfig {
    /// Maximum concurrent client connections (default: 1000)
    pub max_connections: usize,
    /// Connect loopback, private and link-local targets without the relay
    pub direct_local: bool,
    /// Timeout for direct connections (default: 10s)
    pub connect_timeout: Duration,
    /// How long a client waits for the relay to reach its target (default: 30s)
    pub open_timeout: Duration,
}

impl Default for SocksConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            direct_local: true,
            connect_timeout: Duration::from_secs(10),
            open_timeout: Duration::from_secs(30),
        }
    }
}

pub struct SocksServer {
    dispatcher: StreamDispatcher,
    config: Arc<SocksConfig>,
    connection_semaphore: Arc<Semaphore>,
}

impl SocksServer {
    pub fn new(dispatcher: StreamDispatcher) -> Self {
        Self::with_config(dispatcher, SocksConfig::default())
    }

    pub fn with_config(dispatcher: StreamDispatcher, config: SocksConfig) -> Self {
        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));
        Self {
            dispatcher,
            config: Arc::new(config),
            connection_semaphore,
        }
    }

    /// Accept clients until the listener fails or the session closes.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("SOCKS server listening on {}", listener.local_addr()?);
        let closed = self.dispatcher.closed();

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = closed.cancelled() => {
                    info!("Session closed, SOCKS server stopping");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };

            let Ok(permit) = self.connection_semaphore.clone().try_acquire_owned() else {
                warn!(
                    "Max SOCKS connections reached, rejecting connection from {}",
                    peer_addr
                );
                drop(stream);
                continue;
            };

            let dispatcher = self.dispatcher.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_client(stream, peer_addr, dispatcher, &config).await {
                    debug!(peer_addr = %peer_addr, error = %e, "SOCKS client failed");
                }
            });
        }
    }
}

async fn handle_client(
    mut socket: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: StreamDispatcher,
    config: &SocksConfig,
) -> Result<()> {
    let request = read_request(&mut socket).await?;

    let addr = match resolve(&request.target).await {
        Ok(addr) => addr,
        Err(e) => {
            socket.write_all(&request.reply(false)).await?;
            return Err(e);
        }
    };

    if config.direct_local && is_local(addr.ip()) {
        debug!(peer_addr = %peer_addr, target = %addr, "Connecting local target directly");
        connect_direct(socket, &request, addr, config.connect_timeout).await
    } else {
        debug!(peer_addr = %peer_addr, target = %addr, "Connecting through the relay");
        connect_via_stream(socket, &request, addr, &dispatcher, config.open_timeout).await
    }
}

/// Domains are resolved here, preferring IPv4, so the relay only ever sees
/// addresses.
async fn resolve(target: &Target) -> Result<SocketAddr> {
    match target {
        Target::Ip(addr) => Ok(*addr),
        Target::Domain(host, port) => {
            let addrs: Vec<SocketAddr> = lookup_host((host.as_str(), *port))
                .await
                .map_err(|e| SocksError::Resolve(format!("{host}: {e}")))?
                .collect();
            addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
                .ok_or_else(|| SocksError::Resolve(host.clone()))
        }
    }
}

async fn connect_direct(
    mut socket: TcpStream,
    request: &Request,
    addr: SocketAddr,
    connect_timeout: Duration,
) -> Result<()> {
    let mut target = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => {
            socket.write_all(&request.reply(false)).await?;
            return Err(e.into());
        }
        Err(_) => {
            socket.write_all(&request.reply(false)).await?;
            return Err(SocksError::Refused(format!("connect to {addr} timed out")));
        }
    };
    configure_socket_silent(&target);

    socket.write_all(&request.reply(true)).await?;
    let (to_target, to_client) = copy_bidirectional(&mut socket, &mut target).await?;
    debug!(target = %addr, bytes_tx = to_target, bytes_rx = to_client, "Direct connection closed");
    Ok(())
}

async fn connect_via_stream(
    mut socket: TcpStream,
    request: &Request,
    addr: SocketAddr,
    dispatcher: &StreamDispatcher,
    open_timeout: Duration,
) -> Result<()> {
    // `SocketAddr` formats IPv6 hosts in brackets.
    let mut handle = match dispatcher.open(Bytes::from(addr.to_string())).await {
        Ok(handle) => handle,
        Err(e) => {
            socket.write_all(&request.reply(false)).await?;
            return Err(e.into());
        }
    };

    let opened = tokio::time::timeout(open_timeout, handle.wait_open()).await;
    match opened {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            socket.write_all(&request.reply(false)).await?;
            return Err(SocksError::Refused(e.to_string()));
        }
        Err(_) => {
            socket.write_all(&request.reply(false)).await?;
            // Closing a pending stream waits for the peer's OPEN; the drop
            // closes it in the background.
            drop(handle);
            return Err(SocksError::Refused(format!("opening {addr} timed out")));
        }
    }

    socket.write_all(&request.reply(true)).await?;
    pipe(handle, socket).await?;
    Ok(())
}
