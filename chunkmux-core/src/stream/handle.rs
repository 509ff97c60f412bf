use super::Routes;
use crate::session::Session;
use bytes::Bytes;
use chunkmux_common::{MuxError, Result};
use chunkmux_protocol::StreamId;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

/// What happened on one stream, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The peer confirmed a stream we opened
    Opened(Bytes),
    Data(Bytes),
    /// The peer will send nothing more
    End,
    /// Final event for the stream
    Closed(Option<Bytes>),
}

/// One stream of a dispatched session.
///
/// Dropping a handle whose stream is still open closes the stream.
pub struct StreamHandle {
    id: StreamId,
    session: Session,
    rx: UnboundedReceiver<StreamEvent>,
    routes: Routes,
    closed: bool,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    pub(super) fn new(
        id: StreamId,
        session: Session,
        rx: UnboundedReceiver<StreamEvent>,
        routes: Routes,
    ) -> Self {
        Self {
            id,
            session,
            rx,
            routes,
            closed: false,
        }
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Next event, or `None` after `Closed` was delivered.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        let event = self.rx.recv().await?;
        if matches!(event, StreamEvent::Closed(_)) {
            self.closed = true;
        }
        Some(event)
    }

    /// Wait for the peer to confirm a stream we opened. Returns the data
    /// carried by the peer's OPEN.
    pub async fn wait_open(&mut self) -> Result<Bytes> {
        match self.recv().await {
            Some(StreamEvent::Opened(data)) => Ok(data),
            Some(StreamEvent::Closed(Some(reason))) => Err(MuxError::Connection(
                String::from_utf8_lossy(&reason).into_owned(),
            )),
            Some(StreamEvent::Closed(None)) | None => {
                Err(MuxError::Connection("stream closed".to_string()))
            }
            Some(other) => Err(MuxError::violation(format!(
                "stream {} got {:?} before it was opened",
                self.id, other
            ))),
        }
    }

    pub async fn send(&self, data: Bytes) -> Result<()> {
        self.session.data(&self.id, data).await
    }

    pub async fn end(&self) -> Result<()> {
        self.session.end(&self.id).await
    }

    pub async fn close(&mut self, reason: Option<Bytes>) -> Result<()> {
        self.closed = true;
        match self.session.close(&self.id, reason).await {
            Err(MuxError::UnknownStream(_)) => Ok(()),
            other => other,
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.routes.remove(&self.id);
        if self.closed || !self.session.is_alive() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        debug!("Stream {} dropped while open, closing it", self.id);
        let session = self.session.clone();
        let id = self.id.clone();
        runtime.spawn(async move {
            let _ = session.close(&id, None).await;
        });
    }
}
