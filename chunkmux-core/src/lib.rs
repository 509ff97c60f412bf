pub mod reconnect;
pub mod session;
pub mod stream;
pub mod transport;
pub mod tunnel;

// Re-export specific items for convenience
pub use reconnect::Backoff;
pub use session::{Session, SessionEvent, SessionEvents, StreamState};
pub use stream::{pipe, DispatchChannels, IncomingStream, Origin, StreamDispatcher, StreamEvent, StreamHandle};
pub use tunnel::{Direction, TunnelPool};
