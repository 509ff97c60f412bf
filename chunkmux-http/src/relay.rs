//! Relay node
//!
//! Accepts tunnel connections from clients, groups them into sessions by
//! `X-Session-ID`, and connects every stream a client opens to its
//! `host:port` target.

use crate::config::RelayConfig;
use crate::error::{HttpError, Result};
use crate::head::{
    header_str, read_request, render, replay, write_status, SESSION_HEADER,
};
use bytes::Bytes;
use chunkmux_core::transport::socket_tuning::configure_socket_silent;
use chunkmux_core::transport::{Acceptor, BoxedStream};
use chunkmux_core::{pipe, DispatchChannels, Direction, IncomingStream, Session, StreamDispatcher};
use chunkmux_protocol::TunnelId;
use dashmap::DashMap;
use http::{Method, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A live session as seen by the relay.
#[derive(Debug, Clone)]
pub struct RelaySession {
    pub id: Uuid,
    pub dispatcher: StreamDispatcher,
    pub client_addr: SocketAddr,
    pub created_at: Instant,
}

impl RelaySession {
    pub fn session(&self) -> &Session {
        self.dispatcher.session()
    }
}

/// Sessions by id, shared by all connection tasks.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<Uuid, RelaySession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: RelaySession) {
        self.sessions.insert(session.id, session);
    }

    pub fn get(&self, id: &Uuid) -> Option<RelaySession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn remove(&self, id: &Uuid) -> Option<RelaySession> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[derive(Clone)]
pub struct RelayServer {
    config: Arc<RelayConfig>,
    sessions: SessionRegistry,
    acceptor: Acceptor,
    connection_semaphore: Arc<Semaphore>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let acceptor = Acceptor::new(&config.transport())?;
        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            config: Arc::new(config),
            sessions: SessionRegistry::new(),
            acceptor,
            connection_semaphore,
        })
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(&self.config.bind).await?)
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn start(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer_addr) = listener.accept().await?;

            let Ok(permit) = self.connection_semaphore.clone().try_acquire_owned() else {
                warn!(
                    "Max tunnel connections reached, rejecting connection from {}",
                    peer_addr
                );
                drop(stream);
                continue;
            };

            let server = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                    debug!(
                        peer_addr = %peer_addr,
                        error = %e,
                        "Tunnel connection rejected"
                    );
                }
            });
        }
    }

    async fn handle_connection(&self, tcp: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let mut stream = self.acceptor.accept(tcp).await?;
        let (head, leftover) = read_request(&mut stream).await?;

        if head.version != 1 {
            write_status(&mut stream, StatusCode::BAD_REQUEST, "").await?;
            return Ok(());
        }

        let Some(raw_id) = header_str(&head.headers, SESSION_HEADER) else {
            if head.method == Method::GET && head.target == "/" {
                return self.create_session(stream, peer_addr).await;
            }
            write_status(&mut stream, StatusCode::NO_CONTENT, "").await?;
            return Ok(());
        };

        let Some(session) = raw_id
            .parse::<Uuid>()
            .ok()
            .and_then(|id| self.sessions.get(&id))
        else {
            write_status(&mut stream, StatusCode::UNAUTHORIZED, "").await?;
            return Ok(());
        };

        match head.method {
            Method::GET => {
                attach_send_tunnel(&session.dispatcher, stream, &session.id).await?;
            }
            Method::POST => {
                let tunnel = session
                    .session()
                    .add_recv_tunnel(replay(leftover, stream), None)?;
                debug!(session = %session.id, tunnel = %tunnel, "Receive tunnel attached");
            }
            _ => write_status(&mut stream, StatusCode::NO_CONTENT, "").await?,
        }
        Ok(())
    }

    async fn create_session(&self, stream: BoxedStream, client_addr: SocketAddr) -> Result<()> {
        let (session, events) = Session::new(self.config.session.clone());
        let (dispatcher, channels) = StreamDispatcher::start(session, events);
        let id = Uuid::new_v4();

        // Registered before the client learns the id, so its first POST finds it.
        self.sessions.add(RelaySession {
            id,
            dispatcher: dispatcher.clone(),
            client_addr,
            created_at: Instant::now(),
        });
        tokio::spawn(drive_session(
            self.sessions.clone(),
            id,
            dispatcher.clone(),
            channels,
            self.config.connect_timeout,
        ));

        if let Err(e) = attach_send_tunnel(&dispatcher, stream, &id).await {
            dispatcher.session().shutdown();
            self.sessions.remove(&id);
            return Err(e);
        }
        info!(session = %id, client_addr = %client_addr, "Session created");
        Ok(())
    }
}

/// Answer a `GET` with a chunked response whose body is a new send tunnel.
async fn attach_send_tunnel(
    dispatcher: &StreamDispatcher,
    mut stream: BoxedStream,
    session_id: &Uuid,
) -> Result<()> {
    let tunnel = TunnelId::generate();
    let session_header = session_id.to_string();
    let head = render(
        "HTTP/1.1 200 OK",
        &[
            ("Transfer-Encoding", "chunked"),
            ("X-Session-ID", &session_header),
            ("X-Stream-ID", tunnel.as_str()),
        ],
    );
    stream.write_all(&head).await?;
    stream.flush().await?;

    let session = dispatcher.session().clone();
    let (reader, writer) = tokio::io::split(stream);
    session.add_send_tunnel(writer, Some(tunnel.clone()))?;
    debug!(session = %session_id, tunnel = %tunnel, "Send tunnel attached");

    tokio::spawn(watch_request_side(session, tunnel, reader, dispatcher.closed()));
    Ok(())
}

/// The client never sends a body on its GET, so EOF on the request side
/// means the tunnel is gone.
async fn watch_request_side<R>(
    session: Session,
    tunnel: TunnelId,
    mut reader: R,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            () = closed.cancelled() => return,
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => debug!("Ignoring {} bytes sent on GET tunnel {}", n, tunnel),
            },
        }
    }
    session.remove_tunnel(&tunnel, Direction::Send);
}

async fn drive_session(
    sessions: SessionRegistry,
    id: Uuid,
    dispatcher: StreamDispatcher,
    mut channels: DispatchChannels,
    connect_timeout: Duration,
) {
    let closed = dispatcher.closed();
    tokio::select! {
        () = closed.cancelled() => {}
        () = serve_streams(&id, &mut channels, connect_timeout) => {}
    }
    sessions.remove(&id);
    info!(session = %id, "Session closed");
}

/// Connect every stream the client opens. ACKs and tunnel closures are only
/// logged here; the client is the side that redials.
async fn serve_streams(id: &Uuid, channels: &mut DispatchChannels, connect_timeout: Duration) {
    loop {
        tokio::select! {
            incoming = channels.incoming.recv() => match incoming {
                Ok(incoming) => {
                    tokio::spawn(connect_target(incoming, connect_timeout));
                }
                Err(_) => return,
            },
            Some(tunnel) = channels.acks.recv() => {
                debug!(session = %id, tunnel = %tunnel, "Client acknowledged receive tunnel");
            }
            Ok((tunnel, direction)) = channels.tunnel_closed.recv() => {
                debug!(session = %id, tunnel = %tunnel, "{} tunnel closed", direction);
            }
        }
    }
}

/// Connect an incoming stream to the `host:port` named by its OPEN payload.
async fn connect_target(incoming: IncomingStream, connect_timeout: Duration) {
    let (host, port) = match parse_target(&incoming.target) {
        Ok(target) => target,
        Err(e) => {
            warn!("Rejecting stream {}: {}", incoming.handle.id(), e);
            let _ = incoming.reject(e.to_string()).await;
            return;
        }
    };

    let connect = TcpStream::connect((host.as_str(), port));
    let socket = match tokio::time::timeout(connect_timeout, connect).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(e)) => {
            debug!("Connect to {}:{} failed: {}", host, port, e);
            let _ = incoming.reject(e.to_string()).await;
            return;
        }
        Err(_) => {
            debug!("Connect to {}:{} timed out", host, port);
            let _ = incoming.reject("connect timed out").await;
            return;
        }
    };
    configure_socket_silent(&socket);

    let handle = match incoming.accept(Bytes::new()).await {
        Ok(handle) => handle,
        Err(e) => {
            debug!("Stream to {}:{} could not be confirmed: {}", host, port, e);
            return;
        }
    };
    let stream_id = handle.id().clone();
    if let Err(e) = pipe(handle, socket).await {
        error!(stream = %stream_id, error = %e, "Stream to {}:{} failed", host, port);
    }
}

/// Parse `host[:port]` or `[v6]:port`. The port defaults to 80.
pub fn parse_target(raw: &[u8]) -> Result<(String, u16)> {
    let invalid = || HttpError::InvalidTarget(String::from_utf8_lossy(raw).into_owned());
    let text = std::str::from_utf8(raw).map_err(|_| invalid())?;
    if text.is_empty()
        || text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '@' | '?' | '#'))
    {
        return Err(invalid());
    }

    let (host, port) = if let Some(rest) = text.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        match after {
            "" => (host, None),
            _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match text.split_once(':') {
            Some((_, port)) if port.contains(':') => return Err(invalid()),
            Some((host, port)) => (host, Some(port)),
            None => (text, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
        None => 80,
    };
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::head::{read_response, STREAM_HEADER};

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..250 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    async fn relay() -> (RelayServer, SocketAddr) {
        let server = RelayServer::new(RelayConfig {
            bind: "127.0.0.1:0".to_string(),
            ..RelayConfig::default()
        })
        .unwrap();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.clone().serve(listener));
        (server, addr)
    }

    async fn request(addr: SocketAddr, raw: &str) -> (StatusCode, http::HeaderMap, TcpStream) {
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(raw.as_bytes()).await.unwrap();
        let (head, _) = read_response(&mut socket).await.unwrap();
        (head.status, head.headers, socket)
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target(b"example.com:443").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(parse_target(b"example.com").unwrap().1, 80);
        assert_eq!(
            parse_target(b"[::1]:8080").unwrap(),
            ("::1".to_string(), 8080)
        );
        assert!(parse_target(b"").is_err());
        assert!(parse_target(b"::1:80").is_err());
        assert!(parse_target(b"host:99999").is_err());
        assert!(parse_target(b"user@host:80").is_err());
        assert!(parse_target(b"host/path").is_err());
    }

    #[tokio::test]
    async fn test_session_bootstrap() {
        let (server, addr) = relay().await;

        let (status, headers, _rx) = request(addr, "GET / HTTP/1.1\r\nHost: relay\r\n\r\n").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(header_str(&headers, "transfer-encoding"), Some("chunked"));
        assert!(header_str(&headers, STREAM_HEADER).is_some());
        let session_id = header_str(&headers, SESSION_HEADER).unwrap().to_string();

        let id: Uuid = session_id.parse().unwrap();
        let session = server.sessions().get(&id).unwrap();
        eventually(|| session.session().send_tunnel_count() == 1).await;

        let (status, _, _rx2) = request(
            addr,
            &format!("GET / HTTP/1.1\r\nX-Session-ID: {session_id}\r\n\r\n"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        eventually(|| session.session().send_tunnel_count() == 2).await;
    }

    #[tokio::test]
    async fn test_rejections() {
        let (_server, addr) = relay().await;

        let (status, _, _) = request(addr, "GET / HTTP/1.0\r\n\r\n").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = request(addr, "GET /favicon.ico HTTP/1.1\r\n\r\n").await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = request(
            addr,
            &format!("POST / HTTP/1.1\r\nX-Session-ID: {}\r\n\r\n", Uuid::new_v4()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = request(addr, "PUT / HTTP/1.1\r\n\r\n").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_session_unregistered_when_tunnels_close() {
        let (server, addr) = relay().await;

        let (_, headers, rx) = request(addr, "GET / HTTP/1.1\r\n\r\n").await;
        let id: Uuid = header_str(&headers, SESSION_HEADER).unwrap().parse().unwrap();
        assert_eq!(server.sessions().count(), 1);

        drop(rx);
        eventually(|| server.sessions().get(&id).is_none()).await;
    }

    #[tokio::test]
    async fn test_acks_and_tunnel_closures_are_drained() {
        let (session, events) = Session::new(chunkmux_common::SessionConfig::default());
        let (send_w, _send_r) = tokio::io::duplex(64 * 1024);
        let (mut peer, recv_r) = tokio::io::duplex(64 * 1024);
        session.add_send_tunnel(send_w, None).unwrap();
        session.add_recv_tunnel(recv_r, None).unwrap();
        let extra = session.add_send_tunnel(tokio::io::sink(), None).unwrap();
        let (_dispatcher, mut channels) = StreamDispatcher::start(session.clone(), events);

        for _ in 0..3 {
            let frame = chunkmux_protocol::Frame::ack(&TunnelId::generate()).encode();
            let mut chunk = format!("{:x}\r\n", frame.len()).into_bytes();
            chunk.extend_from_slice(&frame);
            chunk.extend_from_slice(b"\r\n");
            peer.write_all(&chunk).await.unwrap();
        }
        session.remove_tunnel(&extra, Direction::Send);

        let id = Uuid::new_v4();
        let served = tokio::time::timeout(
            Duration::from_millis(300),
            serve_streams(&id, &mut channels, Duration::from_secs(1)),
        )
        .await;
        assert!(served.is_err(), "stream loop ended while the session was alive");
        assert!(channels.acks.try_recv().is_err());
        assert!(channels.tunnel_closed.try_recv().unwrap().is_none());
        assert!(session.is_alive());
    }
}
