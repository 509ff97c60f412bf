//! Lock-protected session state shared by the reader and writer tasks.

use super::events::SessionEvent;
use crate::stream::StreamTable;
use crate::transport::{Outbound, WriteDone, WriterCommand};
use crate::tunnel::{Direction, TunnelPool};
use chunkmux_common::MuxError;
use chunkmux_protocol::{Frame, StreamId, TunnelId};
use kanal::AsyncSender;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

const TOMBSTONE_CAPACITY: usize = 1024;

/// Ids of streams dropped while their open handshake was still pending.
/// A late OPEN for one of them is discarded instead of resurrecting it.
#[derive(Debug, Default)]
pub(crate) struct Tombstones {
    order: VecDeque<StreamId>,
    ids: HashSet<StreamId>,
}

impl Tombstones {
    pub(crate) fn insert(&mut self, id: StreamId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > TOMBSTONE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub(crate) fn contains(&self, id: &StreamId) -> bool {
        self.ids.contains(id)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

#[derive(Debug)]
pub(crate) struct State {
    pub(crate) alive: bool,
    pub(crate) pool: TunnelPool,
    pub(crate) table: StreamTable,
    pub(crate) tombstones: Tombstones,
    events: AsyncSender<SessionEvent>,
}

impl State {
    pub(crate) fn new(max_streams: usize, events: AsyncSender<SessionEvent>) -> Self {
        Self {
            alive: true,
            pool: TunnelPool::new(),
            table: StreamTable::new(max_streams),
            tombstones: Tombstones::default(),
            events,
        }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.events.try_send(event).is_err() {
            debug!("Session event dropped; no listener");
        }
    }

    /// Queue a frame on a send tunnel. On failure the completion callback
    /// is dropped without being called.
    pub(crate) fn send(&self, tunnel: &TunnelId, frame: &Frame, done: Option<WriteDone>) -> bool {
        let Some(queue) = self.pool.send_queue(tunnel) else {
            return false;
        };
        debug!("-> {} {:?} via {}", frame.kind, frame.stream_id, tunnel);
        let out = Outbound {
            chunk: frame.encode(),
            done,
        };
        matches!(queue.try_send(WriterCommand::Chunk(out)), Ok(true))
    }

    /// Best-effort frame on any send tunnel.
    pub(crate) fn send_any(&self, frame: &Frame) -> bool {
        match self.pool.pick_send() {
            Ok(tunnel) => self.send(&tunnel, frame, None),
            Err(_) => false,
        }
    }

    /// Remove a stream and raise its close event.
    pub(crate) fn finish_stream(&mut self, id: &StreamId, reason: Option<bytes::Bytes>) -> bool {
        let Some(record) = self.table.remove(id) else {
            return false;
        };
        if let Some(pending) = record.pending_close {
            for waiter in pending.waiters {
                let _ = waiter.send(true);
            }
        }
        self.emit(SessionEvent::Close {
            id: id.clone(),
            reason,
        });
        true
    }

    /// Drop a tunnel and everything pinned to it.
    pub(crate) fn tunnel_closed(&mut self, tunnel: &TunnelId, direction: Direction) {
        if !self.alive || !self.pool.remove(tunnel, direction) {
            return;
        }
        let purged = self.table.purge_tunnel(tunnel, direction);
        info!(
            "{} tunnel {} closed, dropping {} stream(s)",
            direction,
            tunnel,
            purged.len()
        );
        for id in purged {
            self.emit(SessionEvent::Close {
                id,
                reason: Some(bytes::Bytes::from_static(b"tunnel closed")),
            });
        }
        self.emit(SessionEvent::TunnelClosed {
            tunnel: tunnel.clone(),
            direction,
        });
        if self.pool.is_empty() {
            self.cleanup();
        }
    }

    /// Report a broken peer, tell it about it and tear the session down.
    pub(crate) fn violation(&mut self, err: MuxError) {
        if !self.alive {
            return;
        }
        tracing::error!("Session error: {}", err);
        self.send_any(&Frame::error(err.to_string()));
        self.emit(SessionEvent::Error(err));
        self.cleanup();
    }

    /// Enter the terminal state. Runs at most once.
    pub(crate) fn cleanup(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;
        // Pending close waiters resolve as dropped.
        self.table.clear();
        self.tombstones.clear();
        self.pool.shutdown();
        info!("Session cleaned up");
        self.emit(SessionEvent::Cleanup);
    }
}
