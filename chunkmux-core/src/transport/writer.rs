//! Batched chunk writer for send tunnels
//!
//! Collects whatever frames are already queued, encodes each one as its own
//! chunk into a single buffer and flushes the buffer with one write. Every
//! frame carries an optional completion callback that runs after the flush,
//! which is how session operations learn their frame reached the transport.

use bytes::{Bytes, BytesMut};
use chunkmux_protocol::ChunkedCodec;
use kanal::AsyncReceiver;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;
use tracing::{debug, warn};

const MAX_BATCH_SIZE: usize = 32;
const INITIAL_BUFFER_CAPACITY: usize = 16 * 1024;

/// Completion callback; receives `true` once the frame was flushed.
pub type WriteDone = Box<dyn FnOnce(bool) + Send>;

/// One encoded frame waiting for its send tunnel.
pub struct Outbound {
    pub chunk: Bytes,
    pub done: Option<WriteDone>,
}

impl Outbound {
    pub fn new(chunk: Bytes) -> Self {
        Self { chunk, done: None }
    }

    #[must_use]
    pub fn on_written(mut self, done: impl FnOnce(bool) + Send + 'static) -> Self {
        self.done = Some(Box::new(done));
        self
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("len", &self.chunk.len())
            .field("has_callback", &self.done.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub enum WriterCommand {
    Chunk(Outbound),
    /// Write the chunked terminator and shut the transport down.
    Finish,
}

fn complete(done: Vec<WriteDone>, ok: bool) {
    for callback in done {
        callback(ok);
    }
}

/// Drive a send tunnel until it is finished or the transport fails.
///
/// Commands queued before `Finish` are written first. A closed queue is
/// treated like `Finish`.
pub async fn run_chunk_writer<W>(
    queue: AsyncReceiver<WriterCommand>,
    mut writer: W,
    mut codec: ChunkedCodec,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    let mut done = Vec::with_capacity(MAX_BATCH_SIZE);
    let mut buf = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY);

    loop {
        buf.clear();
        let mut finish = false;

        // 1. Wait for the first command
        match queue.recv().await {
            Ok(WriterCommand::Chunk(out)) => batch.push(out),
            Ok(WriterCommand::Finish) | Err(_) => finish = true,
        }

        // 2. Take whatever else is already queued
        while !finish && batch.len() < MAX_BATCH_SIZE {
            match queue.try_recv() {
                Ok(Some(WriterCommand::Chunk(out))) => batch.push(out),
                Ok(Some(WriterCommand::Finish)) | Err(_) => finish = true,
                Ok(None) => break,
            }
        }

        // 3. One chunk per frame
        for out in batch.drain(..) {
            match codec.encode(out.chunk, &mut buf) {
                Ok(()) => done.extend(out.done),
                Err(e) => {
                    warn!("Dropping unencodable frame: {}", e);
                    if let Some(callback) = out.done {
                        callback(false);
                    }
                }
            }
        }
        if finish {
            ChunkedCodec::encode_terminator(&mut buf);
        }

        // 4. Flush
        if !buf.is_empty() {
            let result = async {
                writer.write_all(&buf).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = result {
                complete(std::mem::take(&mut done), false);
                return Err(e);
            }
        }
        complete(std::mem::take(&mut done), true);

        if finish {
            if let Err(e) = writer.shutdown().await {
                debug!("Send tunnel shutdown failed: {}", e);
            }
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanal::unbounded_async;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_writer_single_frame() {
        let (tx, rx) = unbounded_async::<WriterCommand>();
        let (writer, mut reader) = duplex(8192);

        let task = tokio::spawn(run_chunk_writer(rx, writer, ChunkedCodec::new()));

        tx.send(WriterCommand::Chunk(Outbound::new(Bytes::from_static(b"D_a\nhi"))))
            .await
            .unwrap();
        tx.send(WriterCommand::Finish).await.unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"6\r\nD_a\nhi\r\n0\r\n\r\n");
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_writer_callbacks_run_after_flush() {
        let (tx, rx) = unbounded_async::<WriterCommand>();
        let (writer, mut reader) = duplex(65536);
        let written = Arc::new(AtomicUsize::new(0));

        for i in 0..5u8 {
            let written = written.clone();
            let out = Outbound::new(Bytes::from(vec![b'a' + i; 3])).on_written(move |ok| {
                assert!(ok);
                written.fetch_add(1, Ordering::SeqCst);
            });
            tx.send(WriterCommand::Chunk(out)).await.unwrap();
        }
        tx.send(WriterCommand::Finish).await.unwrap();

        run_chunk_writer(rx, writer, ChunkedCodec::new()).await.unwrap();
        assert_eq!(written.load(Ordering::SeqCst), 5);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(out.starts_with(b"3\r\naaa\r\n3\r\nbbb\r\n"));
        assert!(out.ends_with(b"0\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_writer_reports_failure() {
        let (tx, rx) = unbounded_async::<WriterCommand>();
        let (writer, reader) = duplex(64);
        drop(reader);

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let out = Outbound::new(Bytes::from_static(b"payload")).on_written(move |ok| {
            let _ = done_tx.send(ok);
        });
        tx.send(WriterCommand::Chunk(out)).await.unwrap();

        let result = run_chunk_writer(rx, writer, ChunkedCodec::new()).await;
        assert!(result.is_err());
        assert!(!done_rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_writer_rejects_empty_chunk() {
        let (tx, rx) = unbounded_async::<WriterCommand>();
        let (writer, _reader) = duplex(64);

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let out = Outbound::new(Bytes::new()).on_written(move |ok| {
            let _ = done_tx.send(ok);
        });
        tx.send(WriterCommand::Chunk(out)).await.unwrap();
        tx.send(WriterCommand::Finish).await.unwrap();

        run_chunk_writer(rx, writer, ChunkedCodec::new()).await.unwrap();
        assert!(!done_rx.await.unwrap());
    }
}
