//! Tunnel pool
//!
//! Owns the writer queues of send tunnels and the reader tasks of receive
//! tunnels. Send and receive tunnels live in separate maps and need not pair
//! up.

use super::Direction;
use crate::transport::WriterCommand;
use chunkmux_common::{MuxError, Result};
use chunkmux_protocol::TunnelId;
use kanal::AsyncSender;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TunnelPool {
    send: HashMap<TunnelId, AsyncSender<WriterCommand>>,
    recv: HashMap<TunnelId, Option<AbortHandle>>,
}

impl TunnelPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_send(&mut self, id: TunnelId, queue: AsyncSender<WriterCommand>) -> Result<()> {
        match self.send.entry(id) {
            Entry::Occupied(e) => Err(MuxError::DuplicateTunnel(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(queue);
                Ok(())
            }
        }
    }

    pub fn insert_recv(&mut self, id: TunnelId, reader: Option<AbortHandle>) -> Result<()> {
        match self.recv.entry(id) {
            Entry::Occupied(e) => Err(MuxError::DuplicateTunnel(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(reader);
                Ok(())
            }
        }
    }

    pub fn contains(&self, id: &TunnelId, direction: Direction) -> bool {
        match direction {
            Direction::Send => self.send.contains_key(id),
            Direction::Receive => self.recv.contains_key(id),
        }
    }

    /// Pick a live send tunnel uniformly at random.
    pub fn pick_send(&self) -> Result<TunnelId> {
        if self.send.is_empty() {
            return Err(MuxError::PoolExhausted);
        }
        let index = rand::random_range(0..self.send.len());
        self.send
            .keys()
            .nth(index)
            .cloned()
            .ok_or(MuxError::PoolExhausted)
    }

    pub fn send_queue(&self, id: &TunnelId) -> Option<&AsyncSender<WriterCommand>> {
        self.send.get(id)
    }

    /// Remove a tunnel. Send tunnels are asked to finish their body after
    /// flushing what is queued; receive tunnels have their reader aborted.
    pub fn remove(&mut self, id: &TunnelId, direction: Direction) -> bool {
        match direction {
            Direction::Send => match self.send.remove(id) {
                Some(queue) => {
                    finish(id, &queue);
                    true
                }
                None => false,
            },
            Direction::Receive => match self.recv.remove(id) {
                Some(reader) => {
                    if let Some(reader) = reader {
                        reader.abort();
                    }
                    true
                }
                None => false,
            },
        }
    }

    /// Both pools empty: no transport is left for the session.
    pub fn is_empty(&self) -> bool {
        self.send.is_empty() && self.recv.is_empty()
    }

    pub fn send_len(&self) -> usize {
        self.send.len()
    }

    pub fn recv_len(&self) -> usize {
        self.recv.len()
    }

    /// Tear down every tunnel.
    pub fn shutdown(&mut self) {
        for (id, queue) in self.send.drain() {
            finish(&id, &queue);
        }
        for reader in self.recv.drain().filter_map(|(_, reader)| reader) {
            reader.abort();
        }
    }
}

fn finish(id: &TunnelId, queue: &AsyncSender<WriterCommand>) {
    if !matches!(queue.try_send(WriterCommand::Finish), Ok(true)) {
        debug!("Send tunnel {} already stopped", id);
    }
}
