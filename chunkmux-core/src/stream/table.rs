//! Stream table
//!
//! One record per live stream. Each direction is pinned to a single tunnel
//! once bound, and an index from tunnel to dependent streams lets a dying
//! tunnel take its streams down without scanning the whole table.

use crate::tunnel::Direction;
use bytes::Bytes;
use chunkmux_common::{MuxError, Result};
use chunkmux_protocol::{StreamId, TunnelId};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tokio::sync::oneshot;
use tracing::error;

/// Which side opened the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Receive direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    /// Opened locally; waiting for the peer's OPEN to bind a receive tunnel
    Pending,
    Open,
    /// The peer half-closed
    Closed,
}

/// A close requested before the open handshake completed.
#[derive(Debug)]
pub struct PendingClose {
    pub reason: Option<Bytes>,
    pub waiters: Vec<oneshot::Sender<bool>>,
}

#[derive(Debug)]
pub struct StreamRecord {
    send_tunnel: Option<TunnelId>,
    /// Cleared once our HALF_CLOSE has been written
    pub(crate) send_open: bool,
    /// Set as soon as HALF_CLOSE or CLOSE is queued
    pub(crate) send_closing: bool,
    /// A CLOSE has been queued; later closes are no-ops
    pub(crate) close_queued: bool,
    recv_tunnel: Option<TunnelId>,
    pub(crate) recv: RecvState,
    origin: Origin,
    pub(crate) pending_close: Option<PendingClose>,
}

impl StreamRecord {
    fn new(origin: Origin) -> Self {
        Self {
            send_tunnel: None,
            send_open: true,
            send_closing: false,
            close_queued: false,
            recv_tunnel: None,
            recv: match origin {
                Origin::Local => RecvState::Pending,
                Origin::Remote => RecvState::Open,
            },
            origin,
            pending_close: None,
        }
    }

    pub fn send_tunnel(&self) -> Option<&TunnelId> {
        self.send_tunnel.as_ref()
    }

    pub fn recv_tunnel(&self) -> Option<&TunnelId> {
        self.recv_tunnel.as_ref()
    }

    pub fn send_open(&self) -> bool {
        self.send_open
    }

    /// A pending receive side still counts as open.
    pub fn recv_open(&self) -> bool {
        self.recv != RecvState::Closed
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Whether DATA, HALF_CLOSE or CLOSE may still be queued.
    pub fn is_sendable(&self) -> bool {
        self.send_open && !self.send_closing
    }
}

#[derive(Debug)]
pub struct StreamTable {
    streams: HashMap<StreamId, StreamRecord>,
    by_tunnel: HashMap<(Direction, TunnelId), HashSet<StreamId>>,
    max_streams: usize,
}

impl StreamTable {
    pub fn new(max_streams: usize) -> Self {
        Self {
            streams: HashMap::new(),
            by_tunnel: HashMap::new(),
            max_streams,
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.streams.len() >= self.max_streams
    }

    pub fn contains(&self, id: &StreamId) -> bool {
        self.streams.contains_key(id)
    }

    pub fn get(&self, id: &StreamId) -> Option<&StreamRecord> {
        self.streams.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &StreamId) -> Option<&mut StreamRecord> {
        self.streams.get_mut(id)
    }

    fn insert(&mut self, id: StreamId, origin: Origin) -> Result<&mut StreamRecord> {
        if self.is_full() {
            return Err(MuxError::StreamLimit(self.max_streams));
        }
        match self.streams.entry(id) {
            Entry::Occupied(e) => Err(MuxError::DuplicateStream(e.key().clone())),
            Entry::Vacant(e) => Ok(e.insert(StreamRecord::new(origin))),
        }
    }

    /// Record a locally opened stream pinned to `send_tunnel`.
    pub fn insert_local(&mut self, id: StreamId, send_tunnel: TunnelId) -> Result<()> {
        self.insert(id.clone(), Origin::Local)?;
        self.bind(&id, Direction::Send, send_tunnel);
        Ok(())
    }

    /// Record a stream the peer opened over `recv_tunnel`.
    pub fn insert_remote(&mut self, id: StreamId, recv_tunnel: TunnelId) -> Result<()> {
        self.insert(id.clone(), Origin::Remote)?;
        self.bind(&id, Direction::Receive, recv_tunnel);
        Ok(())
    }

    /// Pin one direction of a stream to a tunnel. A binding is set once;
    /// a second attempt is a logic error and leaves the first in place.
    pub fn bind(&mut self, id: &StreamId, direction: Direction, tunnel: TunnelId) -> bool {
        let Some(record) = self.streams.get_mut(id) else {
            return false;
        };
        let slot = match direction {
            Direction::Send => &mut record.send_tunnel,
            Direction::Receive => &mut record.recv_tunnel,
        };
        debug_assert!(slot.is_none(), "stream {id} already bound for {direction}");
        if let Some(existing) = slot {
            error!(
                "Refusing to rebind {} side of stream {} from {} to {}",
                direction, id, existing, tunnel
            );
            return false;
        }
        *slot = Some(tunnel.clone());
        if direction == Direction::Receive && record.recv == RecvState::Pending {
            record.recv = RecvState::Open;
        }
        self.by_tunnel
            .entry((direction, tunnel))
            .or_default()
            .insert(id.clone());
        true
    }

    fn unindex(&mut self, id: &StreamId, record: &StreamRecord) {
        let bindings = [
            (Direction::Send, record.send_tunnel.as_ref()),
            (Direction::Receive, record.recv_tunnel.as_ref()),
        ];
        for (direction, tunnel) in bindings {
            let Some(tunnel) = tunnel else { continue };
            let key = (direction, tunnel.clone());
            if let Some(ids) = self.by_tunnel.get_mut(&key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_tunnel.remove(&key);
                }
            }
        }
    }

    pub fn remove(&mut self, id: &StreamId) -> Option<StreamRecord> {
        let record = self.streams.remove(id)?;
        self.unindex(id, &record);
        Some(record)
    }

    /// Drop every stream pinned to `tunnel` in `direction`.
    pub fn purge_tunnel(&mut self, tunnel: &TunnelId, direction: Direction) -> Vec<StreamId> {
        let Some(ids) = self.by_tunnel.remove(&(direction, tunnel.clone())) else {
            return Vec::new();
        };
        let mut purged: Vec<StreamId> = ids.into_iter().collect();
        purged.sort_unstable();
        for id in &purged {
            self.remove(id);
        }
        purged
    }

    /// Number of streams pinned to `tunnel` in `direction`.
    pub fn bound_to(&self, tunnel: &TunnelId, direction: Direction) -> usize {
        self.by_tunnel
            .get(&(direction, tunnel.clone()))
            .map_or(0, HashSet::len)
    }

    pub fn clear(&mut self) {
        self.streams.clear();
        self.by_tunnel.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> StreamId {
        s.parse().unwrap()
    }

    fn tid(s: &str) -> TunnelId {
        s.parse().unwrap()
    }

    #[test]
    fn test_local_stream_starts_pending() {
        let mut table = StreamTable::new(8);
        table.insert_local(sid("s1"), tid("tx")).unwrap();

        let record = table.get(&sid("s1")).unwrap();
        assert_eq!(record.origin(), Origin::Local);
        assert_eq!(record.send_tunnel(), Some(&tid("tx")));
        assert_eq!(record.recv, RecvState::Pending);
        assert!(record.recv_open());
        assert!(record.is_sendable());
    }

    #[test]
    fn test_bind_recv_opens_pending_stream() {
        let mut table = StreamTable::new(8);
        table.insert_local(sid("s1"), tid("tx")).unwrap();

        assert!(table.bind(&sid("s1"), Direction::Receive, tid("rx")));
        let record = table.get(&sid("s1")).unwrap();
        assert_eq!(record.recv, RecvState::Open);
        assert_eq!(record.recv_tunnel(), Some(&tid("rx")));
        assert_eq!(table.bound_to(&tid("rx"), Direction::Receive), 1);
    }

    #[test]
    fn test_duplicate_and_limit() {
        let mut table = StreamTable::new(2);
        table.insert_remote(sid("a"), tid("rx")).unwrap();
        assert!(matches!(
            table.insert_local(sid("a"), tid("tx")),
            Err(MuxError::DuplicateStream(_))
        ));

        table.insert_remote(sid("b"), tid("rx")).unwrap();
        assert!(matches!(
            table.insert_remote(sid("c"), tid("rx")),
            Err(MuxError::StreamLimit(2))
        ));
    }

    #[test]
    fn test_purge_uses_index() {
        let mut table = StreamTable::new(8);
        table.insert_local(sid("a"), tid("t1")).unwrap();
        table.insert_local(sid("b"), tid("t2")).unwrap();
        table.insert_remote(sid("c"), tid("r1")).unwrap();
        table.bind(&sid("c"), Direction::Send, tid("t1"));

        let purged = table.purge_tunnel(&tid("t1"), Direction::Send);
        assert_eq!(purged, vec![sid("a"), sid("c")]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.bound_to(&tid("r1"), Direction::Receive), 0);

        // A receive tunnel with the same name is a different tunnel.
        assert!(table.purge_tunnel(&tid("t2"), Direction::Receive).is_empty());
        assert!(table.contains(&sid("b")));
    }

    #[test]
    fn test_remove_unindexes() {
        let mut table = StreamTable::new(8);
        table.insert_local(sid("a"), tid("t1")).unwrap();
        table.remove(&sid("a")).unwrap();

        assert_eq!(table.bound_to(&tid("t1"), Direction::Send), 0);
        assert!(table.remove(&sid("a")).is_none());
        assert!(table.is_empty());
    }
}
