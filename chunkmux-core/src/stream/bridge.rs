//! Copy bytes between a local socket and a stream until either side is done.

use super::handle::{StreamEvent, StreamHandle};
use bytes::Bytes;
use chunkmux_common::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Pipe `socket` through `handle`.
///
/// Socket EOF half-closes the stream and the peer's END shuts down the
/// socket's write side. The pipe finishes when the stream closes; socket
/// errors close the stream.
pub async fn pipe<S>(mut handle: StreamHandle, socket: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(socket);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut reading = true;

    loop {
        tokio::select! {
            read = reader.read(&mut buf), if reading => match read {
                Ok(0) => {
                    reading = false;
                    handle.end().await?;
                }
                Ok(n) => handle.send(Bytes::copy_from_slice(&buf[..n])).await?,
                Err(e) => {
                    debug!("Socket read for stream {} failed: {}", handle.id(), e);
                    return handle.close(None).await;
                }
            },
            event = handle.recv() => match event {
                Some(StreamEvent::Data(data)) => {
                    if let Err(e) = writer.write_all(&data).await {
                        debug!("Socket write for stream {} failed: {}", handle.id(), e);
                        return handle.close(None).await;
                    }
                }
                Some(StreamEvent::End) => {
                    let _ = writer.shutdown().await;
                }
                Some(StreamEvent::Opened(_)) => {}
                Some(StreamEvent::Closed(_)) | None => return Ok(()),
            },
        }
    }
}
