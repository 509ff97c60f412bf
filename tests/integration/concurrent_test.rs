//! Many streams sharing one session

use bytes::Bytes;
use chunkmux_core::StreamEvent;
use chunkmux_tests::{relay_and_client, start_echo_server, wait_until};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_streams_stay_separate() {
    let (echo_addr, _echo) = start_echo_server().await;
    let (_relay, client) = relay_and_client(2).await;
    let client = Arc::new(client);
    let target = echo_addr.to_string();

    let mut tasks = Vec::new();
    for i in 0..32u32 {
        let client = client.clone();
        let target = target.clone();
        tasks.push(tokio::spawn(async move {
            let mut handle = client.open(&target).await.unwrap();
            handle.wait_open().await.unwrap();

            let message = format!("stream {i} says hello").repeat(50);
            for piece in message.as_bytes().chunks(100) {
                handle.send(Bytes::copy_from_slice(piece)).await.unwrap();
            }
            handle.end().await.unwrap();

            let mut echoed = Vec::new();
            loop {
                match handle.recv().await {
                    Some(StreamEvent::Data(data)) => echoed.extend_from_slice(&data),
                    Some(StreamEvent::End) => {}
                    Some(StreamEvent::Opened(_)) => {}
                    Some(StreamEvent::Closed(_)) | None => break,
                }
                if echoed.len() == message.len() {
                    break;
                }
            }
            assert_eq!(echoed, message.as_bytes());
        }));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(20), task)
            .await
            .expect("stream timed out")
            .unwrap();
    }

    let session = client.session().clone();
    assert!(wait_until(Duration::from_secs(5), || session.stream_count() == 0).await);
}

#[tokio::test]
async fn test_extra_tunnels_come_up() {
    let (_relay, client) = relay_and_client(3).await;
    let session = client.session().clone();

    assert!(
        wait_until(Duration::from_secs(5), || {
            session.send_tunnel_count() == 4 && session.recv_tunnel_count() == 4
        })
        .await
    );
}
