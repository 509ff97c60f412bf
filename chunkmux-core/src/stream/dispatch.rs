//! Routes one session's event channel to per-stream handles.

use super::handle::{StreamEvent, StreamHandle};
use super::Routes;
use crate::session::{Session, SessionEvent, SessionEvents};
use crate::stream::Origin;
use crate::tunnel::Direction;
use bytes::Bytes;
use chunkmux_common::{MuxError, Result};
use chunkmux_protocol::{StreamId, TunnelId};
use dashmap::DashMap;
use kanal::{AsyncReceiver, AsyncSender};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A stream the peer opened. The OPEN payload is the connect target.
#[derive(Debug)]
pub struct IncomingStream {
    pub handle: StreamHandle,
    pub target: Bytes,
}

impl IncomingStream {
    /// Confirm the stream to the peer.
    pub async fn accept(self, data: Bytes) -> Result<StreamHandle> {
        let handle = self.handle;
        handle
            .session()
            .open(Some(handle.id().clone()), data)
            .await?;
        Ok(handle)
    }

    pub async fn reject(mut self, reason: impl Into<Bytes>) -> Result<()> {
        self.handle.close(Some(reason.into())).await
    }
}

/// Receivers for everything the dispatcher does not route to a stream.
#[derive(Debug)]
pub struct DispatchChannels {
    pub incoming: AsyncReceiver<IncomingStream>,
    pub acks: mpsc::UnboundedReceiver<TunnelId>,
    pub tunnel_closed: AsyncReceiver<(TunnelId, Direction)>,
}

#[derive(Debug, Clone)]
pub struct StreamDispatcher {
    session: Session,
    routes: Routes,
    cancel: CancellationToken,
}

struct Outlets {
    incoming: AsyncSender<IncomingStream>,
    acks: mpsc::UnboundedSender<TunnelId>,
    tunnel_closed: AsyncSender<(TunnelId, Direction)>,
}

impl StreamDispatcher {
    /// Take over a session's event channel.
    pub fn start(session: Session, events: SessionEvents) -> (Self, DispatchChannels) {
        let (incoming_tx, incoming) = kanal::unbounded_async();
        let (acks_tx, acks) = mpsc::unbounded_channel();
        let (closed_tx, tunnel_closed) = kanal::unbounded_async();

        let dispatcher = Self {
            session,
            routes: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
        };
        let outlets = Outlets {
            incoming: incoming_tx,
            acks: acks_tx,
            tunnel_closed: closed_tx,
        };
        tokio::spawn(dispatcher.clone().drive(events, outlets));

        (
            dispatcher,
            DispatchChannels {
                incoming,
                acks,
                tunnel_closed,
            },
        )
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Cancelled once the session has cleaned up.
    pub fn closed(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn register(&self, id: StreamId) -> StreamHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(id.clone(), tx);
        StreamHandle::new(id, self.session.clone(), rx, self.routes.clone())
    }

    /// Open a stream whose OPEN payload is `target`. The handle's first
    /// event tells whether the peer accepted it.
    pub async fn open(&self, target: Bytes) -> Result<StreamHandle> {
        let mut handle = self.register(StreamId::generate());
        match self.session.open(Some(handle.id().clone()), target).await {
            Ok(Some(_)) => Ok(handle),
            Ok(None) => {
                handle.close(None).await?;
                Err(MuxError::Connection("session closed".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn route(&self, id: &StreamId, event: StreamEvent) {
        let delivered = self
            .routes
            .get(id)
            .is_some_and(|tx| tx.send(event).is_ok());
        if !delivered {
            debug!("No handle for stream {}, event dropped", id);
        }
    }

    async fn drive(self, events: SessionEvents, outlets: Outlets) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Open {
                    id,
                    data,
                    origin: Origin::Remote,
                } => {
                    let handle = self.register(id);
                    let incoming = IncomingStream {
                        handle,
                        target: data,
                    };
                    if let Err(e) = outlets.incoming.try_send(incoming) {
                        // The stream is closed when the handle drops.
                        warn!("Nobody accepts incoming streams: {}", e);
                    }
                }
                SessionEvent::Open { id, data, .. } => self.route(&id, StreamEvent::Opened(data)),
                SessionEvent::Data { id, data } => self.route(&id, StreamEvent::Data(data)),
                SessionEvent::End { id } => self.route(&id, StreamEvent::End),
                SessionEvent::Close { id, reason } => {
                    if let Some((_, tx)) = self.routes.remove(&id) {
                        let _ = tx.send(StreamEvent::Closed(reason));
                    }
                }
                SessionEvent::Ack { tunnel } => {
                    let _ = outlets.acks.send(tunnel);
                }
                SessionEvent::TunnelClosed { tunnel, direction } => {
                    let _ = outlets.tunnel_closed.try_send((tunnel, direction));
                }
                SessionEvent::Error(e) => debug!("Dispatcher saw session error: {}", e),
                SessionEvent::Cleanup => break,
            }
        }

        let ids: Vec<StreamId> = self.routes.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.routes.remove(&id) {
                let _ = tx.send(StreamEvent::Closed(Some(Bytes::from_static(b"session closed"))));
            }
        }
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::pipe;
    use chunkmux_common::SessionConfig;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn wired_pair() -> ((Session, SessionEvents), (Session, SessionEvents)) {
        let a = Session::new(SessionConfig::default());
        let b = Session::new(SessionConfig::default());
        let (ab_w, ab_r) = duplex(64 * 1024);
        let (ba_w, ba_r) = duplex(64 * 1024);
        a.0.add_send_tunnel(ab_w, None).unwrap();
        b.0.add_send_tunnel(ba_w, None).unwrap();
        b.0.add_recv_tunnel(ab_r, None).unwrap();
        a.0.add_recv_tunnel(ba_r, None).unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_open_accept_and_route() {
        let ((a, a_events), (b, b_events)) = wired_pair();
        let (a_disp, mut a_chans) = StreamDispatcher::start(a, a_events);
        let (_b_disp, b_chans) = StreamDispatcher::start(b, b_events);

        timeout(WAIT, a_chans.acks.recv()).await.unwrap().unwrap();

        let mut ours = a_disp.open(Bytes::from_static(b"example.com:80")).await.unwrap();
        let incoming = timeout(WAIT, b_chans.incoming.recv()).await.unwrap().unwrap();
        assert_eq!(&incoming.target[..], b"example.com:80");
        assert_eq!(incoming.handle.id(), ours.id());

        let mut theirs = incoming.accept(Bytes::from_static(b"ok")).await.unwrap();
        assert_eq!(&timeout(WAIT, ours.wait_open()).await.unwrap().unwrap()[..], b"ok");

        ours.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(
            timeout(WAIT, theirs.recv()).await.unwrap(),
            Some(StreamEvent::Data(Bytes::from_static(b"ping")))
        );

        theirs.close(Some(Bytes::from_static(b"done"))).await.unwrap();
        assert_eq!(
            timeout(WAIT, ours.recv()).await.unwrap(),
            Some(StreamEvent::Closed(Some(Bytes::from_static(b"done"))))
        );
        assert_eq!(ours.recv().await, None);
    }

    #[tokio::test]
    async fn test_rejected_stream_fails_wait_open() {
        let ((a, a_events), (b, b_events)) = wired_pair();
        let (a_disp, _a_chans) = StreamDispatcher::start(a, a_events);
        let (_b_disp, b_chans) = StreamDispatcher::start(b, b_events);

        let mut ours = a_disp.open(Bytes::from_static(b"nowhere:1")).await.unwrap();
        let incoming = timeout(WAIT, b_chans.incoming.recv()).await.unwrap().unwrap();
        incoming.reject("connection refused").await.unwrap();

        let err = timeout(WAIT, ours.wait_open()).await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_cleanup_closes_handles_and_cancels() {
        let ((a, a_events), (b, b_events)) = wired_pair();
        let (a_disp, _a_chans) = StreamDispatcher::start(a.clone(), a_events);
        let (_b_disp, b_chans) = StreamDispatcher::start(b, b_events);

        let mut ours = a_disp.open(Bytes::new()).await.unwrap();
        let _incoming = timeout(WAIT, b_chans.incoming.recv()).await.unwrap().unwrap();

        a.shutdown();
        timeout(WAIT, a_disp.closed().cancelled()).await.unwrap();
        assert_eq!(
            ours.recv().await,
            Some(StreamEvent::Closed(Some(Bytes::from_static(b"session closed"))))
        );
    }

    #[tokio::test]
    async fn test_pipe_bridges_socket() {
        let ((a, a_events), (b, b_events)) = wired_pair();
        let (a_disp, _a_chans) = StreamDispatcher::start(a, a_events);
        let (_b_disp, b_chans) = StreamDispatcher::start(b, b_events);

        let mut ours = a_disp.open(Bytes::new()).await.unwrap();
        let incoming = timeout(WAIT, b_chans.incoming.recv()).await.unwrap().unwrap();
        let theirs = incoming.accept(Bytes::new()).await.unwrap();
        ours.wait_open().await.unwrap();

        let (socket, mut app) = duplex(4096);
        let bridge = tokio::spawn(pipe(theirs, socket));

        ours.send(Bytes::from_static(b"hello")).await.unwrap();
        let mut buf = [0u8; 5];
        timeout(WAIT, app.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"hello");

        app.write_all(b"world").await.unwrap();
        assert_eq!(
            timeout(WAIT, ours.recv()).await.unwrap(),
            Some(StreamEvent::Data(Bytes::from_static(b"world")))
        );

        ours.end().await.unwrap();
        let mut rest = Vec::new();
        timeout(WAIT, app.read_to_end(&mut rest)).await.unwrap().unwrap();
        assert!(rest.is_empty());

        drop(app);
        assert_eq!(timeout(WAIT, ours.recv()).await.unwrap(), Some(StreamEvent::End));
        assert!(matches!(
            timeout(WAIT, ours.recv()).await.unwrap(),
            Some(StreamEvent::Closed(None))
        ));
        timeout(WAIT, bridge).await.unwrap().unwrap().unwrap();
    }
}
