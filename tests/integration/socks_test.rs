//! SOCKS front end through a relay session

use bytes::Bytes;
use chunkmux::SocksServer;
use chunkmux_socks::SocksConfig;
use chunkmux_tests::{closed_port, read_to_end, relay_and_client, start_banner_server, start_echo_server};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_socks(client: &chunkmux::Client) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = SocksServer::with_config(
        client.dispatcher().clone(),
        SocksConfig {
            direct_local: false,
            ..SocksConfig::default()
        },
    );
    tokio::spawn(server.serve(listener));
    addr
}

/// SOCKS5 CONNECT to an IPv4 target, returning the reply code.
async fn socks5_connect(proxy: SocketAddr, target: SocketAddr) -> (TcpStream, u8) {
    let SocketAddr::V4(target) = target else {
        panic!("IPv4 target expected");
    };
    let mut socket = TcpStream::connect(proxy).await.unwrap();
    socket.write_all(&[5, 1, 0]).await.unwrap();
    let mut method = [0u8; 2];
    socket.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [5, 0]);

    let mut request = vec![5, 1, 0, 1];
    request.extend_from_slice(&target.ip().octets());
    request.extend_from_slice(&target.port().to_be_bytes());
    socket.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    socket.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 5);
    (socket, reply[1])
}

#[tokio::test]
async fn test_socks5_echo_through_relay() {
    chunkmux_tests::init_logging();
    let (echo_addr, _echo) = start_echo_server().await;
    let (_relay, client) = relay_and_client(1).await;
    let proxy = start_socks(&client).await;

    let (mut socket, code) = socks5_connect(proxy, echo_addr).await;
    assert_eq!(code, 0);

    socket.write_all(b"hello through the relay").await.unwrap();
    socket.shutdown().await.unwrap();
    let echoed = read_to_end(&mut socket, Duration::from_secs(5)).await;
    assert_eq!(echoed, b"hello through the relay");
}

#[tokio::test]
async fn test_socks4a_domain_target() {
    let (addr, _banner) = start_banner_server(b"banner").await;
    let (_relay, client) = relay_and_client(0).await;
    let proxy = start_socks(&client).await;

    let mut socket = TcpStream::connect(proxy).await.unwrap();
    let mut request = vec![4, 1];
    request.extend_from_slice(&addr.port().to_be_bytes());
    request.extend_from_slice(&[0, 0, 0, 1]);
    request.extend_from_slice(b"tester\0localhost\0");
    socket.write_all(&request).await.unwrap();

    let mut reply = [0u8; 8];
    socket.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[..2], [0, 0x5A]);

    let body = read_to_end(&mut socket, Duration::from_secs(5)).await;
    assert_eq!(body, b"banner");
}

#[tokio::test]
async fn test_socks5_refused_target() {
    let target = closed_port().await;
    let (_relay, client) = relay_and_client(0).await;
    let proxy = start_socks(&client).await;

    let (_socket, code) = socks5_connect(proxy, target).await;
    assert_eq!(code, 0x01);
    assert!(client.session().is_alive());
}

#[tokio::test]
async fn test_large_transfer() {
    let (echo_addr, _echo) = start_echo_server().await;
    let (_relay, client) = relay_and_client(2).await;
    let proxy = start_socks(&client).await;

    let (socket, code) = socks5_connect(proxy, echo_addr).await;
    assert_eq!(code, 0);

    let payload: Bytes = (0..4 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let (mut reader, mut writer) = socket.into_split();
    let sent = payload.clone();
    let writer_task = tokio::spawn(async move {
        writer.write_all(&sent).await.unwrap();
        writer.shutdown().await.unwrap();
    });

    let echoed = read_to_end(&mut reader, Duration::from_secs(30)).await;
    writer_task.await.unwrap();
    assert_eq!(echoed.len(), payload.len());
    assert!(echoed == payload);
}
