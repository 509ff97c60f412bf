//! Local HTTP CONNECT proxy whose connections become streams to the relay.

use crate::error::Result;
use crate::head::{read_request, write_status};
use bytes::Bytes;
use chunkmux_common::MuxError;
use chunkmux_core::{pipe, StreamDispatcher};
use http::{Method, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const NOT_CONNECT: &str = "Please use the CONNECT method instead.";

#[derive(Debug, Clone)]
pub struct ConnectProxyConfig {
    /// Maximum concurrent client connections (default: 1000)
    pub max_connections: usize,
    /// How long a client waits for the relay to reach its target (default: 30s)
    pub open_timeout: Duration,
}

impl Default for ConnectProxyConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            open_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ConnectProxy {
    dispatcher: StreamDispatcher,
    config: ConnectProxyConfig,
    connection_semaphore: Arc<Semaphore>,
}

impl ConnectProxy {
    pub fn new(dispatcher: StreamDispatcher) -> Self {
        Self::with_config(dispatcher, ConnectProxyConfig::default())
    }

    pub fn with_config(dispatcher: StreamDispatcher, config: ConnectProxyConfig) -> Self {
        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));
        Self {
            dispatcher,
            config,
            connection_semaphore,
        }
    }

    /// Accept clients until the listener fails or the session closes.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("HTTP CONNECT proxy listening on {}", listener.local_addr()?);
        let closed = self.dispatcher.closed();

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = closed.cancelled() => {
                    info!("Session closed, HTTP CONNECT proxy stopping");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };

            let Ok(permit) = self.connection_semaphore.clone().try_acquire_owned() else {
                warn!(
                    "Max proxy connections reached, rejecting connection from {}",
                    peer_addr
                );
                drop(stream);
                continue;
            };

            let dispatcher = self.dispatcher.clone();
            let open_timeout = self.config.open_timeout;
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_client(stream, peer_addr, dispatcher, open_timeout).await {
                    debug!(peer_addr = %peer_addr, error = %e, "CONNECT client failed");
                }
            });
        }
    }
}

async fn handle_client(
    mut socket: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: StreamDispatcher,
    open_timeout: Duration,
) -> Result<()> {
    let (head, leftover) = read_request(&mut socket).await?;
    if head.method != Method::CONNECT {
        write_status(&mut socket, StatusCode::METHOD_NOT_ALLOWED, NOT_CONNECT).await?;
        return Ok(());
    }

    let mut handle = match dispatcher.open(Bytes::from(head.target.clone())).await {
        Ok(handle) => handle,
        Err(e) => {
            write_status(&mut socket, StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).await?;
            return Ok(());
        }
    };

    let opened = match tokio::time::timeout(open_timeout, handle.wait_open()).await {
        Ok(opened) => opened,
        Err(_) => Err(MuxError::Timeout(format!("opening {}", head.target))),
    };
    if let Err(e) = opened {
        let reason = match e {
            MuxError::Connection(reason) => reason,
            other => other.to_string(),
        };
        debug!(peer_addr = %peer_addr, target = %head.target, "CONNECT refused: {}", reason);
        write_status(&mut socket, StatusCode::INTERNAL_SERVER_ERROR, &reason).await?;
        // Closing a pending stream waits for the peer's OPEN; the drop
        // closes it in the background.
        drop(handle);
        return Ok(());
    }

    socket
        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
        .await?;
    if !leftover.is_empty() {
        handle.send(leftover).await?;
    }
    debug!(peer_addr = %peer_addr, target = %head.target, stream = %handle.id(), "CONNECT established");
    pipe(handle, socket).await?;
    Ok(())
}
