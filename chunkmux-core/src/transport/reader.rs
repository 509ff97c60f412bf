//! Receive side of a tunnel: decoded chunks from a framed read stream.

use bytes::Bytes;
use chunkmux_protocol::{Chunk, ChunkedCodec, FramingError};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

/// Receives chunk payloads from a transport.
pub struct ChunkReceiver<R> {
    stream: FramedRead<R, ChunkedCodec>,
}

impl<R> ChunkReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, codec: ChunkedCodec) -> Self {
        Self {
            stream: FramedRead::new(reader, codec),
        }
    }

    /// Next chunk payload, or `None` once the body terminator or a clean
    /// end of the transport is reached.
    pub async fn recv_chunk(&mut self) -> Result<Option<Bytes>, FramingError> {
        match self.stream.next().await {
            Some(Ok(Chunk::Data(payload))) => Ok(Some(payload)),
            Some(Ok(Chunk::End)) | None => Ok(None),
            Some(Err(e)) => Err(e),
        }
    }
}
