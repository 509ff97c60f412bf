//! Session lifecycle between a client and a relay

use chunkmux_core::StreamEvent;
use chunkmux_tests::{relay_and_client, start_echo_server, wait_until};
use std::time::Duration;

#[tokio::test]
async fn test_relay_forgets_closed_session() {
    let (relay, client) = relay_and_client(1).await;
    assert!(wait_until(Duration::from_secs(5), || relay.sessions().count() == 1).await);

    let session_id: uuid::Uuid = client.session_id().parse().unwrap();
    assert!(relay.sessions().get(&session_id).is_some());

    client.shutdown();
    tokio::time::timeout(Duration::from_secs(5), client.closed().cancelled())
        .await
        .expect("client session did not close");
    assert!(wait_until(Duration::from_secs(5), || relay.sessions().count() == 0).await);
}

#[tokio::test]
async fn test_two_clients_get_separate_sessions() {
    let (relay, first) = relay_and_client(0).await;
    let second = chunkmux::Client::connect(chunkmux_http::ClientConfig {
        relay_url: relay.url().unwrap(),
        extra_send_tunnels: 0,
        extra_recv_tunnels: 0,
        ..chunkmux_http::ClientConfig::default()
    })
    .await
    .unwrap();

    assert_ne!(first.session_id(), second.session_id());
    assert!(wait_until(Duration::from_secs(5), || relay.sessions().count() == 2).await);

    first.shutdown();
    assert!(wait_until(Duration::from_secs(5), || relay.sessions().count() == 1).await);
    assert!(second.session().is_alive());
}

#[tokio::test]
async fn test_sessions_outlive_relay_listener() {
    let (echo_addr, _echo) = start_echo_server().await;
    let (mut relay, client) = relay_and_client(0).await;
    relay.stop();

    let mut handle = client.open(&echo_addr.to_string()).await.unwrap();
    handle.wait_open().await.unwrap();
    handle.send(bytes::Bytes::from_static(b"still here")).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), handle.recv())
        .await
        .unwrap();
    match event {
        Some(StreamEvent::Data(data)) => assert_eq!(&data[..], b"still here"),
        other => panic!("unexpected event {other:?}"),
    }
}
