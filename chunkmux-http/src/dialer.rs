//! Client side of the tunnel bootstrap
//!
//! A `GET /` opens the session and its response body becomes the first
//! receive tunnel. Each `POST /` carrying the session id becomes a send
//! tunnel once the relay ACKs it on a receive tunnel. Tunnels that die are
//! redialed with backoff for as long as the session lives.

use crate::config::{ClientConfig, RelayEndpoint};
use crate::error::{HttpError, Result};
use crate::head::{header_str, read_response, render, replay, SESSION_HEADER, STREAM_HEADER};
use crate::upstream::Upstreams;
use bytes::Bytes;
use chunkmux_common::{BackoffConfig, MuxError};
use chunkmux_core::transport::tls::TlsTransportConfig;
use chunkmux_core::transport::{self, BoxedStream, TransportConfig};
use chunkmux_core::{Backoff, Direction, Session, StreamDispatcher, StreamHandle};
use chunkmux_protocol::TunnelId;
use http::StatusCode;
use kanal::AsyncReceiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How the client reaches the relay: directly or through upstream proxies,
/// then optionally TLS.
#[derive(Debug)]
struct RelayLink {
    endpoint: RelayEndpoint,
    transport: TransportConfig,
    upstreams: Upstreams,
}

impl RelayLink {
    fn new(config: &ClientConfig) -> Result<Self> {
        let endpoint = RelayEndpoint::parse(&config.relay_url)?;
        let transport = if endpoint.tls {
            TransportConfig::Tls(TlsTransportConfig::from(&config.tls))
        } else {
            TransportConfig::Tcp
        };
        Ok(Self {
            endpoint,
            transport,
            upstreams: Upstreams::parse(&config.upstream_proxies)?,
        })
    }

    async fn dial(&self) -> Result<BoxedStream> {
        let stream = self.upstreams.connect(&self.endpoint.authority()).await?;
        Ok(transport::wrap(&self.transport, stream, &self.endpoint.host).await?)
    }

    /// Send a `GET /` and return the session id, the tunnel id and the
    /// response body.
    async fn get(&self, session_id: Option<&str>) -> Result<(String, TunnelId, impl AsyncRead + Send + Unpin + 'static)> {
        let mut stream = self.dial().await?;
        let host = self.endpoint.authority();
        let mut headers = vec![("Host", host.as_str())];
        if let Some(id) = session_id {
            headers.push(("X-Session-ID", id));
        }
        stream.write_all(&render("GET / HTTP/1.1", &headers)).await?;
        stream.flush().await?;

        let (response, leftover) = read_response(&mut stream).await?;
        if response.status != StatusCode::OK {
            return Err(HttpError::Status(response.status.as_u16()));
        }
        let session = header_str(&response.headers, SESSION_HEADER)
            .ok_or(HttpError::Header("X-Session-ID"))?
            .to_string();
        let tunnel = header_str(&response.headers, STREAM_HEADER)
            .and_then(|raw| raw.parse::<TunnelId>().ok())
            .ok_or(HttpError::Header("X-Stream-ID"))?;
        Ok((session, tunnel, replay(leftover, stream)))
    }
}

struct Dialer {
    link: RelayLink,
    session_id: String,
    session: Session,
    acks: Mutex<mpsc::UnboundedReceiver<TunnelId>>,
    ack_timeout: Duration,
    backoff: BackoffConfig,
    closed: CancellationToken,
}

impl Dialer {
    async fn add_tunnel(&self, direction: Direction) -> Result<TunnelId> {
        match direction {
            Direction::Send => self.add_send_tunnel().await,
            Direction::Receive => self.add_recv_tunnel().await,
        }
    }

    async fn add_recv_tunnel(&self) -> Result<TunnelId> {
        let (_, tunnel, body) = self.link.get(Some(&self.session_id)).await?;
        Ok(self.session.add_recv_tunnel(body, Some(tunnel))?)
    }

    /// POSTs go out one at a time so each ACK pairs with its request.
    async fn add_send_tunnel(&self) -> Result<TunnelId> {
        let mut acks = self.acks.lock().await;
        while let Ok(stale) = acks.try_recv() {
            debug!("Dropping stale ACK for tunnel {}", stale);
        }

        let mut stream = self.link.dial().await?;
        let host = self.link.endpoint.authority();
        let head = render(
            "POST / HTTP/1.1",
            &[
                ("Host", &host),
                ("X-Session-ID", &self.session_id),
                ("Transfer-Encoding", "chunked"),
            ],
        );
        stream.write_all(&head).await?;
        stream.flush().await?;

        let tunnel = tokio::time::timeout(self.ack_timeout, acks.recv())
            .await
            .map_err(|_| HttpError::Timeout("tunnel ACK"))?
            .ok_or_else(|| MuxError::Connection("session closed".to_string()))?;
        drop(acks);

        let (reader, writer) = tokio::io::split(stream);
        self.session.add_send_tunnel(writer, Some(tunnel.clone()))?;
        tokio::spawn(watch_response_side(
            self.session.clone(),
            tunnel.clone(),
            reader,
            self.closed.clone(),
        ));
        Ok(tunnel)
    }

    /// Keep dialing `direction` until it succeeds, the session dies or the
    /// backoff gives up.
    async fn redial(self: Arc<Self>, direction: Direction) {
        let mut backoff = Backoff::new(self.backoff.clone());
        while self.session.is_alive() {
            match self.add_tunnel(direction).await {
                Ok(tunnel) => {
                    info!("Redialed {} tunnel {}", direction, tunnel);
                    return;
                }
                Err(e) => {
                    let Some(delay) = backoff.on_failure() else {
                        error!(
                            "Giving up on {} tunnel after {} attempts: {}",
                            direction,
                            backoff.failures(),
                            e
                        );
                        return;
                    };
                    warn!("Redial of {} tunnel failed, retrying in {:?}: {}", direction, delay, e);
                    tokio::select! {
                        () = self.closed.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn supervise(self: Arc<Self>, tunnel_closed: AsyncReceiver<(TunnelId, Direction)>) {
        loop {
            tokio::select! {
                () = self.closed.cancelled() => break,
                closed = tunnel_closed.recv() => match closed {
                    Ok((tunnel, direction)) => {
                        if !self.session.is_alive() {
                            break;
                        }
                        warn!("{} tunnel {} closed, redialing", direction, tunnel);
                        tokio::spawn(self.clone().redial(direction));
                    }
                    Err(_) => break,
                },
            }
        }
        info!("Session {} closed", self.session_id);
    }
}

/// The relay never answers a POST, so any bytes here are an error reply
/// and EOF means the tunnel is gone.
async fn watch_response_side<R>(
    session: Session,
    tunnel: TunnelId,
    mut reader: R,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 1024];
    loop {
        tokio::select! {
            () = closed.cancelled() => return,
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => warn!(
                    "Premature response on send tunnel {}: {:?}",
                    tunnel,
                    String::from_utf8_lossy(&buf[..n])
                ),
            },
        }
    }
    session.remove_tunnel(&tunnel, Direction::Send);
}

/// A session with a relay.
pub struct Client {
    dispatcher: StreamDispatcher,
    dialer: Arc<Dialer>,
}

impl Client {
    /// Bootstrap a session: the first receive and send tunnels must come
    /// up, extra tunnels are dialed in the background.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let link = RelayLink::new(&config)?;

        let (session_id, first_tunnel, body) = link.get(None).await?;
        info!("Session {} opened with relay {}", session_id, link.endpoint.authority());

        let (session, events) = Session::new(config.session.clone());
        let (dispatcher, channels) = StreamDispatcher::start(session.clone(), events);
        session.add_recv_tunnel(body, Some(first_tunnel))?;

        let dialer = Arc::new(Dialer {
            link,
            session_id,
            session,
            acks: Mutex::new(channels.acks),
            ack_timeout: config.ack_timeout,
            backoff: config.backoff.clone(),
            closed: dispatcher.closed(),
        });

        if let Err(e) = dialer.add_send_tunnel().await {
            dispatcher.session().shutdown();
            return Err(e);
        }

        tokio::spawn(dialer.clone().supervise(channels.tunnel_closed));
        tokio::spawn(reject_incoming(channels.incoming));

        let extras = std::iter::repeat_n(Direction::Send, config.extra_send_tunnels)
            .chain(std::iter::repeat_n(Direction::Receive, config.extra_recv_tunnels))
            .collect::<Vec<_>>();
        let background = dialer.clone();
        tokio::spawn(async move {
            for direction in extras {
                if let Err(e) = background.add_tunnel(direction).await {
                    warn!("Extra {} tunnel failed: {}", direction, e);
                    tokio::spawn(background.clone().redial(direction));
                }
            }
        });

        Ok(Self { dispatcher, dialer })
    }

    /// Open a stream to `target` (`host:port`) on the relay's side.
    pub async fn open(&self, target: &str) -> Result<StreamHandle> {
        Ok(self
            .dispatcher
            .open(Bytes::copy_from_slice(target.as_bytes()))
            .await?)
    }

    pub fn session(&self) -> &Session {
        self.dispatcher.session()
    }

    pub fn session_id(&self) -> &str {
        &self.dialer.session_id
    }

    pub fn dispatcher(&self) -> &StreamDispatcher {
        &self.dispatcher
    }

    /// Cancelled once the session has cleaned up.
    pub fn closed(&self) -> CancellationToken {
        self.dispatcher.closed()
    }

    pub fn shutdown(&self) {
        self.session().shutdown();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session_id", &self.dialer.session_id)
            .field("relay", &self.dialer.link.endpoint)
            .finish_non_exhaustive()
    }
}

/// The relay has nothing to open towards a client.
async fn reject_incoming(incoming: AsyncReceiver<chunkmux_core::IncomingStream>) {
    while let Ok(stream) = incoming.recv().await {
        debug!("Rejecting stream {} opened by the relay", stream.handle.id());
        let _ = stream.reject("client does not accept streams").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::head::read_request;
    use crate::relay::RelayServer;
    use chunkmux_core::StreamEvent;
    use tokio::net::TcpListener;

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..250 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    async fn start_relay() -> String {
        let server = RelayServer::new(RelayConfig {
            bind: "127.0.0.1:0".to_string(),
            ..RelayConfig::default()
        })
        .unwrap();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));
        format!("http://{addr}")
    }

    async fn start_echo() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut r, mut w) = socket.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                    let _ = w.shutdown().await;
                });
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_connect_and_echo() {
        let relay_url = start_relay().await;
        let echo = start_echo().await;

        let client = Client::connect(ClientConfig {
            relay_url,
            ..ClientConfig::default()
        })
        .await
        .unwrap();
        eventually(|| {
            client.session().send_tunnel_count() == 2 && client.session().recv_tunnel_count() == 2
        })
        .await;

        let mut stream = client.open(&echo).await.unwrap();
        stream.wait_open().await.unwrap();
        stream.send(Bytes::from_static(b"ping")).await.unwrap();

        let mut echoed = Vec::new();
        while echoed.len() < 4 {
            match stream.recv().await {
                Some(StreamEvent::Data(data)) => echoed.extend_from_slice(&data),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(echoed, b"ping");
        stream.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_target_is_refused() {
        let relay_url = start_relay().await;
        let client = Client::connect(ClientConfig {
            relay_url,
            extra_send_tunnels: 0,
            extra_recv_tunnels: 0,
            ..ClientConfig::default()
        })
        .await
        .unwrap();

        let mut stream = client.open("bad target").await.unwrap();
        assert!(stream.wait_open().await.is_err());
        assert!(client.session().is_alive());
    }

    #[tokio::test]
    async fn test_missing_ack_times_out() {
        // Answers the GET but never ACKs the POST.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let (head, _) = read_request(&mut socket).await.unwrap();
                if head.method == http::Method::GET {
                    socket
                        .write_all(
                            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\
                              X-Session-ID: s1\r\nX-Stream-ID: t1\r\n\r\n",
                        )
                        .await
                        .unwrap();
                }
                held.push(socket);
            }
        });

        let result = Client::connect(ClientConfig {
            relay_url: format!("http://{addr}"),
            ack_timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        })
        .await;
        assert!(matches!(result, Err(HttpError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_refused_bootstrap() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut socket).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                .await
                .unwrap();
        });

        let result = Client::connect(ClientConfig {
            relay_url: format!("http://{addr}"),
            ..ClientConfig::default()
        })
        .await;
        assert!(matches!(result, Err(HttpError::Status(204))));
    }
}
