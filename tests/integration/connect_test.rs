//! HTTP CONNECT front end through a relay session

use chunkmux::ConnectProxy;
use chunkmux_tests::{closed_port, read_to_end, relay_and_client, start_echo_server};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_proxy(client: &chunkmux::Client) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ConnectProxy::new(client.dispatcher().clone()).serve(listener));
    addr
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        socket.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[tokio::test]
async fn test_connect_echo_through_relay() {
    let (echo_addr, _echo) = start_echo_server().await;
    let (_relay, client) = relay_and_client(1).await;
    let proxy = start_proxy(&client).await;

    let mut socket = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {echo_addr} HTTP/1.1\r\nHost: {echo_addr}\r\n\r\nearly bytes ");
    socket.write_all(request.as_bytes()).await.unwrap();

    let head = read_head(&mut socket).await;
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected head: {head}");

    socket.write_all(b"and late bytes").await.unwrap();
    socket.shutdown().await.unwrap();
    let echoed = read_to_end(&mut socket, Duration::from_secs(5)).await;
    assert_eq!(echoed, b"early bytes and late bytes");
}

#[tokio::test]
async fn test_connect_refused_reports_reason() {
    let target = closed_port().await;
    let (_relay, client) = relay_and_client(0).await;
    let proxy = start_proxy(&client).await;

    let mut socket = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {target} HTTP/1.1\r\n\r\n");
    socket.write_all(request.as_bytes()).await.unwrap();

    let response = String::from_utf8(read_to_end(&mut socket, Duration::from_secs(5)).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 500"), "unexpected response: {response}");
}

#[tokio::test]
async fn test_plain_get_rejected() {
    let (_relay, client) = relay_and_client(0).await;
    let proxy = start_proxy(&client).await;

    let mut socket = TcpStream::connect(proxy).await.unwrap();
    socket
        .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();
    let head = read_head(&mut socket).await;
    assert!(head.starts_with("HTTP/1.1 405"));
}
