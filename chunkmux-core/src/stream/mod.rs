pub mod bridge;
pub mod dispatch;
pub mod handle;
pub mod table;

pub use bridge::pipe;
pub use dispatch::{DispatchChannels, IncomingStream, StreamDispatcher};
pub use handle::{StreamEvent, StreamHandle};
pub use table::{Origin, RecvState, StreamRecord, StreamTable};

use chunkmux_protocol::StreamId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Per-stream event senders, keyed by stream id.
type Routes = Arc<DashMap<StreamId, UnboundedSender<StreamEvent>>>;
