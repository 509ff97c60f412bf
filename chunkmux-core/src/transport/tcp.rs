//! Plain TCP transport

use super::socket_tuning::configure_socket_silent;
use super::BoxedStream;
use std::io;
use tokio::net::TcpStream;

pub async fn connect(addr: &str) -> io::Result<BoxedStream> {
    let stream = connect_tuned(addr).await?;
    Ok(Box::pin(stream))
}

/// Connect and apply socket tuning, keeping the concrete stream type.
pub async fn connect_tuned(addr: &str) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    configure_socket_silent(&stream);
    Ok(stream)
}
