//! Tunnels over TLS

use chunkmux::{Client, ClientExt, Relay};
use chunkmux_tests::{generate_self_signed_cert, read_to_end, start_echo_server};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_tls_session() {
    let temp_dir =
        std::env::temp_dir().join(format!("chunkmux_test_tls_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&temp_dir).unwrap();

    let (cert_pem, key_pem) =
        generate_self_signed_cert(vec!["localhost".to_string(), "127.0.0.1".to_string()]);
    let cert_path = temp_dir.join("relay.crt");
    let key_path = temp_dir.join("relay.key");
    std::fs::write(&cert_path, cert_pem).unwrap();
    std::fs::write(&key_path, key_pem).unwrap();

    let mut relay = Relay::builder()
        .bind("127.0.0.1:0")
        .tls(&cert_path, &key_path)
        .build()
        .expect("Failed to build relay");
    let addr = relay.start().await.unwrap();

    let client = Client::builder()
        .relay_url(format!("https://{addr}"))
        .tls_ca(&cert_path)
        .tls_server_name("localhost")
        .connect()
        .await;
    let client = match client {
        Ok(client) => client,
        Err(e) => panic!("Client failed to connect via TLS: {e}"),
    };

    let (echo_addr, _echo) = start_echo_server().await;
    let handle = client.open(&echo_addr.to_string()).await.unwrap();
    let (local, mut remote) = tokio::io::duplex(1024);
    tokio::spawn(chunkmux_core::pipe(handle, local));

    remote.write_all(b"over tls").await.unwrap();
    remote.shutdown().await.unwrap();
    let echoed = read_to_end(&mut remote, Duration::from_secs(5)).await;
    assert_eq!(echoed, b"over tls");

    client.shutdown();
    let _ = std::fs::remove_dir_all(temp_dir);
}

#[tokio::test]
async fn test_plain_client_against_tls_relay_fails() {
    let temp_dir =
        std::env::temp_dir().join(format!("chunkmux_test_tls_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&temp_dir).unwrap();
    let (cert_pem, key_pem) = generate_self_signed_cert(vec!["localhost".to_string()]);
    let cert_path = temp_dir.join("relay.crt");
    let key_path = temp_dir.join("relay.key");
    std::fs::write(&cert_path, cert_pem).unwrap();
    std::fs::write(&key_path, key_pem).unwrap();

    let mut relay = Relay::builder()
        .bind("127.0.0.1:0")
        .tls(&cert_path, &key_path)
        .build()
        .unwrap();
    let addr = relay.start().await.unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        Client::builder()
            .relay_url(format!("http://{addr}"))
            .ack_timeout(Duration::from_secs(2))
            .connect(),
    )
    .await
    .unwrap();
    assert!(result.is_err());
    let _ = std::fs::remove_dir_all(temp_dir);
}
