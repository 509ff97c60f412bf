//! Session multiplexer
//!
//! A session carries many bidirectional streams over a pool of half-duplex
//! tunnels. All bookkeeping sits behind one mutex; frames are queued to the
//! send tunnels' writer tasks while it is held, so the wire order of a
//! stream's frames matches the order of the calls that produced them.
//! Outbound operations resolve once their frame has been flushed.

mod events;
mod inbound;
mod state;


pub use events::{SessionEvent, SessionEvents};

use crate::stream::table::PendingClose;
use crate::stream::RecvState;
use crate::transport::{run_chunk_writer, ChunkReceiver, WriterCommand};
use crate::tunnel::Direction;
use bytes::Bytes;
use chunkmux_common::{MuxError, Result, SessionConfig};
use chunkmux_protocol::{ChunkedCodec, Frame, FramingError, StreamId, TunnelId};
use state::State;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Header bytes a frame adds on top of its id and payload.
const FRAME_OVERHEAD: usize = 3;

struct Inner {
    state: Mutex<State>,
    config: SessionConfig,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of one stream's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    pub send_open: bool,
    pub recv_open: bool,
    pub send_tunnel: Option<TunnelId>,
    pub recv_tunnel: Option<TunnelId>,
}

/// Cheaply cloneable handle to a session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Session")
            .field("alive", &state.alive)
            .field("streams", &state.table.len())
            .field("send_tunnels", &state.pool.send_len())
            .field("recv_tunnels", &state.pool.recv_len())
            .finish()
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> (Self, SessionEvents) {
        let (tx, events) = SessionEvents::channel();
        let inner = Inner {
            state: Mutex::new(State::new(config.max_streams, tx)),
            config,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events,
        )
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn weak(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_alive(&self) -> bool {
        self.inner.lock().alive
    }

    pub fn stream_count(&self) -> usize {
        self.inner.lock().table.len()
    }

    pub fn send_tunnel_count(&self) -> usize {
        self.inner.lock().pool.send_len()
    }

    pub fn recv_tunnel_count(&self) -> usize {
        self.inner.lock().pool.recv_len()
    }

    pub fn stream_state(&self, id: &StreamId) -> Option<StreamState> {
        let state = self.inner.lock();
        state.table.get(id).map(|record| StreamState {
            send_open: record.send_open(),
            recv_open: record.recv_open(),
            send_tunnel: record.send_tunnel().cloned(),
            recv_tunnel: record.recv_tunnel().cloned(),
        })
    }

    // ------------------------------------------------------------------
    // Tunnels
    // ------------------------------------------------------------------

    /// Register the write half of a transport as a send tunnel.
    pub fn add_send_tunnel<W>(&self, writer: W, id: Option<TunnelId>) -> Result<TunnelId>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = id.unwrap_or_else(TunnelId::generate);
        let mut state = self.inner.lock();
        if !state.alive {
            return Ok(id);
        }

        let (tx, rx) = kanal::unbounded_async::<WriterCommand>();
        state.pool.insert_send(id.clone(), tx)?;

        let codec = ChunkedCodec::with_max_chunk_size(self.inner.config.max_chunk_size);
        let weak = self.weak();
        let tunnel = id.clone();
        tokio::spawn(async move {
            if let Err(e) = run_chunk_writer(rx, writer, codec).await {
                warn!("Send tunnel {} failed: {}", tunnel, e);
            }
            if let Some(session) = Session::from_weak(&weak) {
                session.inner.lock().tunnel_closed(&tunnel, Direction::Send);
            }
        });

        info!("Send tunnel {} added", id);
        Ok(id)
    }

    /// Register the read half of a transport as a receive tunnel and tell
    /// the peer about it with an ACK.
    pub fn add_recv_tunnel<R>(&self, reader: R, id: Option<TunnelId>) -> Result<TunnelId>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let id = id.unwrap_or_else(TunnelId::generate);
        let mut state = self.inner.lock();
        if !state.alive {
            return Ok(id);
        }
        if state.pool.contains(&id, Direction::Receive) {
            return Err(MuxError::DuplicateTunnel(id));
        }

        let receiver = ChunkReceiver::new(
            reader,
            ChunkedCodec::with_max_chunk_size(self.inner.config.max_chunk_size),
        );
        let task = tokio::spawn(self.clone().read_tunnel(id.clone(), receiver));
        state.pool.insert_recv(id.clone(), Some(task.abort_handle()))?;

        if !state.send_any(&Frame::ack(&id)) {
            debug!("No send tunnel to acknowledge {} on", id);
        }
        info!("Receive tunnel {} added", id);
        Ok(id)
    }

    pub fn remove_tunnel(&self, id: &TunnelId, direction: Direction) {
        self.inner.lock().tunnel_closed(id, direction);
    }

    async fn read_tunnel<R>(self, tunnel: TunnelId, mut receiver: ChunkReceiver<R>)
    where
        R: AsyncRead + Unpin + Send,
    {
        loop {
            match receiver.recv_chunk().await {
                Ok(Some(chunk)) => {
                    if !self.receive(&tunnel, chunk) {
                        return;
                    }
                }
                Ok(None) => {
                    debug!("Receive tunnel {} ended", tunnel);
                    break;
                }
                Err(FramingError::Io(e)) => {
                    warn!("Receive tunnel {} failed: {}", tunnel, e);
                    break;
                }
                Err(e) => {
                    warn!("Malformed chunk on tunnel {}: {}", tunnel, e);
                    break;
                }
            }
        }
        self.inner.lock().tunnel_closed(&tunnel, Direction::Receive);
    }

    // ------------------------------------------------------------------
    // Outbound operations
    // ------------------------------------------------------------------

    /// Open a stream, or accept one the peer opened.
    ///
    /// `None` allocates a fresh id. `Some(id)` naming a remote stream whose
    /// send side is still unbound confirms it to the peer. Returns `None`
    /// once the session has cleaned up.
    pub async fn open(&self, id: Option<StreamId>, data: Bytes) -> Result<Option<StreamId>> {
        let (id, tunnel, written) = {
            let mut state = self.inner.lock();
            if !state.alive {
                return Ok(None);
            }
            let id = id.unwrap_or_else(StreamId::generate);
            self.check_frame_size(&id, &data)?;

            let send_bound = state.table.get(&id).map(|r| r.send_tunnel().is_some());
            let tunnel = match send_bound {
                Some(true) => return Err(MuxError::DuplicateStream(id)),
                Some(false) => {
                    let tunnel = state.pool.pick_send()?;
                    state.table.bind(&id, Direction::Send, tunnel.clone());
                    tunnel
                }
                None => {
                    if state.tombstones.contains(&id) {
                        return Err(MuxError::DuplicateStream(id));
                    }
                    if state.table.is_full() {
                        return Err(MuxError::StreamLimit(self.inner.config.max_streams));
                    }
                    let tunnel = state.pool.pick_send()?;
                    state.table.insert_local(id.clone(), tunnel.clone())?;
                    tunnel
                }
            };

            let (tx, rx) = oneshot::channel();
            state.send(&tunnel, &Frame::open(id.clone(), data), Some(ack(tx)));
            (id, tunnel, rx)
        };

        self.written(written, &id, &tunnel).await?;
        Ok(Some(id))
    }

    /// Send bytes on a stream. Empty payloads are not sent.
    pub async fn data(&self, id: &StreamId, data: Bytes) -> Result<()> {
        let (tunnel, written) = {
            let mut state = self.inner.lock();
            if !state.alive {
                return Ok(());
            }
            let record = state
                .table
                .get(id)
                .ok_or_else(|| MuxError::UnknownStream(id.clone()))?;
            if !record.is_sendable() {
                return Err(MuxError::StreamNotSendable(id.clone()));
            }
            if data.is_empty() {
                return Ok(());
            }
            self.check_frame_size(id, &data)?;

            let tunnel = ensure_send_tunnel(&mut state, id)?;
            let (tx, rx) = oneshot::channel();
            state.send(&tunnel, &Frame::data(id.clone(), data), Some(ack(tx)));
            (tunnel, rx)
        };

        self.written(written, id, &tunnel).await
    }

    /// Half-close the stream's send side.
    pub async fn end(&self, id: &StreamId) -> Result<()> {
        let (tunnel, written) = {
            let mut state = self.inner.lock();
            if !state.alive {
                return Ok(());
            }
            let record = state
                .table
                .get(id)
                .ok_or_else(|| MuxError::UnknownStream(id.clone()))?;
            if !record.is_sendable() {
                return Ok(());
            }

            let tunnel = ensure_send_tunnel(&mut state, id)?;
            if let Some(record) = state.table.get_mut(id) {
                record.send_closing = true;
            }

            let (tx, rx) = oneshot::channel();
            let weak = self.weak();
            let stream = id.clone();
            let done = move |ok: bool| {
                if ok {
                    if let Some(session) = Session::from_weak(&weak) {
                        session.end_written(&stream);
                    }
                }
                let _ = tx.send(ok);
            };
            state.send(&tunnel, &Frame::half_close(id.clone()), Some(Box::new(done)));
            (tunnel, rx)
        };

        self.written(written, id, &tunnel).await
    }

    fn end_written(&self, id: &StreamId) {
        let mut state = self.inner.lock();
        if !state.alive {
            return;
        }
        let Some(record) = state.table.get_mut(id) else {
            return;
        };
        record.send_open = false;
        if record.recv == RecvState::Closed {
            state.finish_stream(id, None);
        }
    }

    /// Abort a stream in both directions.
    ///
    /// While our OPEN is still unanswered the CLOSE is held back until the
    /// peer's OPEN arrives (or the deferral timeout expires), so the peer
    /// never sees a CLOSE for a stream it does not know yet.
    pub async fn close(&self, id: &StreamId, reason: Option<Bytes>) -> Result<()> {
        let written = {
            let mut state = self.inner.lock();
            if !state.alive {
                return Ok(());
            }
            let record = state
                .table
                .get_mut(id)
                .ok_or_else(|| MuxError::UnknownStream(id.clone()))?;
            if record.close_queued {
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            if record.recv == RecvState::Pending {
                match &mut record.pending_close {
                    Some(pending) => pending.waiters.push(tx),
                    None => {
                        debug!("Deferring close of {} until it is confirmed", id);
                        record.pending_close = Some(PendingClose {
                            reason,
                            waiters: vec![tx],
                        });
                        self.spawn_deferral_timer(id.clone());
                    }
                }
            } else {
                self.send_close(&mut state, id, reason, vec![tx]);
            }
            rx
        };

        // The stream is gone whichever way the waiter resolves.
        let _ = written.await;
        Ok(())
    }

    /// Queue CLOSE for a stream whose receive side is bound. The stream is
    /// removed once the frame is written, or right away if no tunnel can
    /// carry it.
    fn send_close(
        &self,
        state: &mut State,
        id: &StreamId,
        reason: Option<Bytes>,
        waiters: Vec<oneshot::Sender<bool>>,
    ) {
        let mut tunnel = state.table.get(id).and_then(|r| r.send_tunnel().cloned());
        if tunnel.is_none() {
            if let Ok(picked) = state.pool.pick_send() {
                state.table.bind(id, Direction::Send, picked.clone());
                tunnel = Some(picked);
            }
        }
        let queued = match tunnel {
            Some(tunnel) if state.pool.contains(&tunnel, Direction::Send) => {
                if let Some(record) = state.table.get_mut(id) {
                    record.send_closing = true;
                    record.close_queued = true;
                }
                let weak = self.weak();
                let stream = id.clone();
                let done = move |ok: bool| {
                    if let Some(session) = Session::from_weak(&weak) {
                        session.inner.lock().finish_stream(&stream, None);
                    }
                    for waiter in waiters {
                        let _ = waiter.send(ok);
                    }
                };
                state.send(&tunnel, &Frame::close(id.clone(), reason), Some(Box::new(done)))
            }
            _ => false,
        };
        if !queued {
            debug!("No tunnel for CLOSE of {}, dropping it locally", id);
            state.finish_stream(id, None);
        }
    }

    fn spawn_deferral_timer(&self, id: StreamId) {
        let weak = self.weak();
        let timeout = self.inner.config.close_deferral_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(session) = Session::from_weak(&weak) {
                session.expire_deferred_close(&id);
            }
        });
    }

    /// The peer never confirmed the stream: send the CLOSE anyway and make
    /// sure a late OPEN cannot bring the stream back.
    fn expire_deferred_close(&self, id: &StreamId) {
        let mut state = self.inner.lock();
        if !state.alive {
            return;
        }
        let reason = match state.table.get_mut(id) {
            Some(record) if record.recv == RecvState::Pending => match record.pending_close.as_mut() {
                Some(pending) => pending.reason.clone(),
                None => return,
            },
            _ => return,
        };
        warn!("Stream {} was never confirmed, closing it anyway", id);
        if let Some(tunnel) = state.table.get(id).and_then(|r| r.send_tunnel().cloned()) {
            state.send(&tunnel, &Frame::close(id.clone(), reason), None);
        }
        state.tombstones.insert(id.clone());
        state.finish_stream(id, None);
    }

    /// Tear the session down. Every tunnel is finished and no further
    /// events are raised after `Cleanup`.
    pub fn shutdown(&self) {
        self.inner.lock().cleanup();
    }

    fn check_frame_size(&self, id: &StreamId, data: &Bytes) -> Result<()> {
        let size = FRAME_OVERHEAD + id.as_bytes().len() + data.len();
        let limit = self.inner.config.max_chunk_size;
        if size > limit {
            return Err(FramingError::ChunkTooLarge {
                size: size as u64,
                limit,
            }
            .into());
        }
        Ok(())
    }

    /// Wait for a queued frame to reach the transport.
    async fn written(
        &self,
        written: oneshot::Receiver<bool>,
        stream: &StreamId,
        tunnel: &TunnelId,
    ) -> Result<()> {
        match written.await {
            Ok(true) => Ok(()),
            _ if self.is_alive() => Err(MuxError::TunnelCorrupted {
                stream: stream.clone(),
                tunnel: tunnel.clone(),
            }),
            _ => Ok(()),
        }
    }
}

fn ack(tx: oneshot::Sender<bool>) -> crate::transport::WriteDone {
    Box::new(move |ok| {
        let _ = tx.send(ok);
    })
}

/// The stream's send tunnel, binding one if the stream has none yet.
///
/// A stream the peer opened and we never confirmed gets an implicit empty
/// OPEN first, so the peer does not see DATA before OPEN.
fn ensure_send_tunnel(state: &mut State, id: &StreamId) -> Result<TunnelId> {
    let bound = state.table.get(id).and_then(|r| r.send_tunnel().cloned());
    match bound {
        Some(tunnel) if state.pool.contains(&tunnel, Direction::Send) => Ok(tunnel),
        Some(tunnel) => Err(MuxError::TunnelCorrupted {
            stream: id.clone(),
            tunnel,
        }),
        None => {
            let tunnel = state.pool.pick_send()?;
            state.table.bind(id, Direction::Send, tunnel.clone());
            state.send(&tunnel, &Frame::open(id.clone(), Bytes::new()), None);
            Ok(tunnel)
        }
    }
}
