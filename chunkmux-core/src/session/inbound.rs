//! Frames arriving on receive tunnels.

use super::events::SessionEvent;
use super::state::State;
use super::Session;
use crate::stream::{Origin, RecvState};
use crate::tunnel::Direction;
use bytes::Bytes;
use chunkmux_common::MuxError;
use chunkmux_protocol::{Frame, FrameKind, StreamId, TunnelId};
use tracing::{debug, error, warn};

impl Session {
    /// Process one chunk from `tunnel`. Returns whether the tunnel's reader
    /// should keep going.
    pub(super) fn receive(&self, tunnel: &TunnelId, chunk: Bytes) -> bool {
        let mut state = self.inner.lock();
        if !state.alive || !state.pool.contains(tunnel, Direction::Receive) {
            return false;
        }

        let frame = match Frame::decode(&chunk) {
            Ok(frame) => frame,
            Err(e) => {
                state.violation(e.into());
                return false;
            }
        };
        debug!("<- {} {:?} via {}", frame.kind, frame.stream_id, tunnel);

        match (frame.kind, frame.stream_id) {
            (FrameKind::Ack, _) => match TunnelId::from_wire(&frame.payload) {
                Ok(acked) => state.emit(SessionEvent::Ack { tunnel: acked }),
                Err(e) => state.violation(MuxError::violation(format!("bad ACK: {e}"))),
            },
            (FrameKind::Error, _) => {
                let message = String::from_utf8_lossy(&frame.payload).into_owned();
                error!("Peer reported an error: {}", message);
                state.emit(SessionEvent::Error(MuxError::Remote(message)));
                state.cleanup();
            }
            (FrameKind::Open, Some(id)) => self.on_open(&mut state, tunnel, id, frame.payload),
            (kind, Some(id)) => on_stream_frame(&mut state, tunnel, kind, id, frame.payload),
            (kind, None) => {
                state.violation(MuxError::violation(format!("{kind} frame without stream id")));
            }
        }

        state.alive
    }

    fn on_open(&self, state: &mut State, tunnel: &TunnelId, id: StreamId, data: Bytes) {
        if state.tombstones.contains(&id) {
            debug!("Discarding late OPEN for expired stream {}", id);
            return;
        }

        let recv_bound = state.table.get(&id).map(|r| r.recv_tunnel().is_some());
        match recv_bound {
            None => {
                if state.table.is_full() {
                    warn!("Refusing stream {}: stream limit reached", id);
                    state.send_any(&Frame::close(id, Some(Bytes::from_static(b"stream limit"))));
                    return;
                }
                if let Err(e) = state.table.insert_remote(id.clone(), tunnel.clone()) {
                    warn!("Refusing stream {}: {}", id, e);
                    return;
                }
                state.emit(SessionEvent::Open {
                    id,
                    data,
                    origin: Origin::Remote,
                });
            }
            Some(true) => {
                state.violation(MuxError::violation(format!("duplicate OPEN for stream {id}")));
            }
            Some(false) => {
                state.table.bind(&id, Direction::Receive, tunnel.clone());
                state.emit(SessionEvent::Open {
                    id: id.clone(),
                    data,
                    origin: Origin::Local,
                });

                let pending = state.table.get_mut(&id).and_then(|r| r.pending_close.take());
                if let Some(pending) = pending {
                    debug!("Flushing deferred close of {}", id);
                    self.send_close(state, &id, pending.reason, pending.waiters);
                }
            }
        }
    }
}

fn on_stream_frame(state: &mut State, tunnel: &TunnelId, kind: FrameKind, id: StreamId, payload: Bytes) {
    let Some(record) = state.table.get_mut(&id) else {
        debug!("{} for unknown stream {}, discarding", kind, id);
        return;
    };
    if let Some(bound) = record.recv_tunnel() {
        if bound != tunnel {
            let err = MuxError::violation(format!(
                "{kind} for stream {id} arrived on {tunnel}, stream is bound to {bound}"
            ));
            state.violation(err);
            return;
        }
    }

    match (kind, record.recv) {
        (FrameKind::Close, _) => {
            let reason = (!payload.is_empty()).then_some(payload);
            state.finish_stream(&id, reason);
        }
        (FrameKind::Data, RecvState::Open) => {
            state.emit(SessionEvent::Data { id, data: payload });
        }
        (FrameKind::HalfClose, RecvState::Open) => {
            record.recv = RecvState::Closed;
            let send_open = record.send_open;
            state.emit(SessionEvent::End { id: id.clone() });
            if !send_open {
                state.finish_stream(&id, None);
            }
        }
        (FrameKind::HalfClose, RecvState::Closed) => {
            debug!("Duplicate HALF_CLOSE for stream {}", id);
        }
        (kind, recv) => {
            state.violation(MuxError::violation(format!(
                "{kind} for stream {id} with receive side {recv:?}"
            )));
        }
    }
}
