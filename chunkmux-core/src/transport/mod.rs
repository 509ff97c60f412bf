//! Transports carrying tunnels: TCP or TLS connections, plus the chunk
//! reader and writer tasks that turn them into send and receive tunnels.

use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

pub mod reader;
pub mod socket_tuning;
pub mod tcp;
pub mod tls;
pub mod writer;

pub use reader::ChunkReceiver;
pub use writer::{run_chunk_writer, Outbound, WriteDone, WriterCommand};

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Pin<Box<dyn AsyncStream>>;

/// Transport selection for tunnel connections.
#[derive(Debug, Clone, Default)]
pub enum TransportConfig {
    #[default]
    Tcp,
    Tls(tls::TlsTransportConfig),
}

/// Connect to `addr` (`host:port`).
pub async fn connect(config: &TransportConfig, addr: &str) -> io::Result<BoxedStream> {
    match config {
        TransportConfig::Tcp => tcp::connect(addr).await,
        TransportConfig::Tls(tls_config) => tls::connect(addr, tls_config).await,
    }
}

/// Upgrade an already connected stream, e.g. one tunneled through a proxy.
pub async fn wrap(config: &TransportConfig, stream: BoxedStream, host: &str) -> io::Result<BoxedStream> {
    match config {
        TransportConfig::Tcp => Ok(stream),
        TransportConfig::Tls(tls_config) => tls::connect_over(stream, host, tls_config).await,
    }
}

/// Server side of a transport, prepared once per listener.
#[derive(Clone)]
pub enum Acceptor {
    Tcp,
    Tls(TlsAcceptor),
}

impl Acceptor {
    pub fn new(config: &TransportConfig) -> io::Result<Self> {
        match config {
            TransportConfig::Tcp => Ok(Self::Tcp),
            TransportConfig::Tls(tls_config) => Ok(Self::Tls(TlsAcceptor::from(
                tls::create_server_config(tls_config)?,
            ))),
        }
    }

    /// Tune an accepted connection and run the TLS handshake if enabled.
    pub async fn accept(&self, tcp_stream: TcpStream) -> io::Result<BoxedStream> {
        socket_tuning::configure_socket_silent(&tcp_stream);
        match self {
            Self::Tcp => Ok(Box::pin(tcp_stream)),
            Self::Tls(acceptor) => Ok(Box::pin(acceptor.accept(tcp_stream).await?)),
        }
    }
}
