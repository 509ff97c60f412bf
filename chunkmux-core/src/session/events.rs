//! Events raised by a session to the application layer.

use crate::stream::Origin;
use crate::tunnel::Direction;
use bytes::Bytes;
use chunkmux_common::MuxError;
use chunkmux_protocol::{StreamId, TunnelId};
use kanal::{AsyncReceiver, AsyncSender};

#[derive(Debug)]
pub enum SessionEvent {
    /// The peer opened a stream (`Remote`), or confirmed one we opened (`Local`)
    Open {
        id: StreamId,
        data: Bytes,
        origin: Origin,
    },
    Data {
        id: StreamId,
        data: Bytes,
    },
    /// The peer half-closed its side
    End {
        id: StreamId,
    },
    /// The stream is gone. Raised exactly once per stream.
    Close {
        id: StreamId,
        reason: Option<Bytes>,
    },
    /// The peer registered one of our send tunnels as its receive tunnel
    Ack {
        tunnel: TunnelId,
    },
    TunnelClosed {
        tunnel: TunnelId,
        direction: Direction,
    },
    Error(MuxError),
    /// Final event; nothing follows it
    Cleanup,
}

/// Receiving end of a session's event channel.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    rx: AsyncReceiver<SessionEvent>,
}

impl SessionEvents {
    pub(crate) fn channel() -> (AsyncSender<SessionEvent>, Self) {
        let (tx, rx) = kanal::unbounded_async();
        (tx, Self { rx })
    }

    /// Next event, or `None` once every handle to the session is gone.
    /// Consumers stop at [`SessionEvent::Cleanup`].
    pub async fn recv(&self) -> Option<SessionEvent> {
        self.rx.recv().await.ok()
    }

    pub fn try_recv(&self) -> Option<SessionEvent> {
        self.rx.try_recv().ok().flatten()
    }
}
