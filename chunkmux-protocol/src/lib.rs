//! `chunkmux` wire protocol
//!
//! Two layers live here: [`ChunkedCodec`] turns a byte stream into discrete
//! chunks using HTTP/1.1 chunked-transfer syntax, and [`Frame`] gives each
//! chunk its multiplexing meaning (`<EVENT>['_'<id>]'\n'<payload>`).

pub mod codec;
pub mod constants;
pub mod frame;
pub mod ids;

pub use codec::{Chunk, ChunkedCodec, FramingError};
pub use frame::{Frame, FrameError, FrameKind};
pub use ids::{IdError, StreamId, TunnelId};
