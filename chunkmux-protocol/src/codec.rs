//! Chunked-transfer codec
//!
//! HTTP/1.1 chunked encoding is used here purely as a length-prefixed
//! framing layer: every encoded payload becomes exactly one chunk and every
//! decoded chunk is handed out whole, so one write on one side is one item
//! on the other.
//!
//! Chunk format:
//! ```text
//! ┌──────────────┬──────┬──────────────┬──────┐
//! │ hex length   │ CRLF │ payload      │ CRLF │
//! │ [;extension] │      │ length bytes │      │
//! └──────────────┴──────┴──────────────┴──────┘
//! ```
//! A zero-length chunk (`0\r\n\r\n`) ends the body.

use crate::constants::{CRLF, MAX_CHUNK_SIZE, MAX_SIZE_LINE, TERMINATOR};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// Errors raised while decoding or encoding chunked bodies.
///
/// Every variant is fatal for the tunnel that produced it; the decoder never
/// tries to find the next chunk boundary again.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Malformed chunk size line: {0:?}")]
    InvalidSize(String),

    #[error("Chunk size line exceeds {limit} bytes")]
    SizeLineTooLong { limit: usize },

    #[error("Chunk too large: {size} bytes (max: {limit})")]
    ChunkTooLarge { size: u64, limit: usize },

    #[error("Chunk of {size} bytes not followed by CRLF")]
    MissingTerminator { size: usize },

    #[error("Stream ended inside a chunk")]
    UnexpectedEof,

    #[error("Cannot encode an empty chunk")]
    EmptyChunk,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One decoded unit of a chunked body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A complete non-empty chunk payload
    Data(Bytes),
    /// The zero-length terminator chunk
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Body(usize),
    Done,
}

/// Chunked-transfer codec
#[derive(Debug, Clone)]
pub struct ChunkedCodec {
    max_chunk_size: usize,
    state: DecodeState,
}

impl Default for ChunkedCodec {
    fn default() -> Self {
        Self::with_max_chunk_size(MAX_CHUNK_SIZE)
    }
}

impl ChunkedCodec {
    /// Create a new codec instance with the default max chunk size
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new codec instance with a custom max chunk size
    pub fn with_max_chunk_size(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size,
            state: DecodeState::Head,
        }
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Whether the terminator chunk has been decoded.
    pub fn is_finished(&self) -> bool {
        self.state == DecodeState::Done
    }

    /// Append the body terminator to `dst`.
    pub fn encode_terminator(dst: &mut BytesMut) {
        dst.extend_from_slice(TERMINATOR);
    }

    fn parse_size_line(&self, line: &[u8]) -> Result<usize, FramingError> {
        let invalid = || FramingError::InvalidSize(String::from_utf8_lossy(line).into_owned());

        // Chunk extensions carry nothing for us.
        let digits = match line.iter().position(|&b| b == b';') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let digits = digits.trim_ascii();
        if digits.is_empty() || digits.len() > 16 || !digits.iter().all(u8::is_ascii_hexdigit) {
            return Err(invalid());
        }

        let text = std::str::from_utf8(digits).map_err(|_| invalid())?;
        let size = u64::from_str_radix(text, 16).map_err(|_| invalid())?;
        if size > self.max_chunk_size as u64 {
            return Err(FramingError::ChunkTooLarge {
                size,
                limit: self.max_chunk_size,
            });
        }
        usize::try_from(size).map_err(|_| invalid())
    }
}

impl Decoder for ChunkedCodec {
    type Item = Chunk;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Head => {
                    let Some(pos) = src.windows(2).position(|w| w == CRLF) else {
                        if src.len() > MAX_SIZE_LINE {
                            return Err(FramingError::SizeLineTooLong {
                                limit: MAX_SIZE_LINE,
                            });
                        }
                        return Ok(None);
                    };
                    if pos > MAX_SIZE_LINE {
                        return Err(FramingError::SizeLineTooLong {
                            limit: MAX_SIZE_LINE,
                        });
                    }

                    let size = self.parse_size_line(&src[..pos])?;
                    src.advance(pos + CRLF.len());

                    if size == 0 {
                        self.state = DecodeState::Done;
                        return Ok(Some(Chunk::End));
                    }
                    self.state = DecodeState::Body(size);
                }
                DecodeState::Body(size) => {
                    let needed = size + CRLF.len();
                    if src.len() < needed {
                        src.reserve(needed - src.len());
                        return Ok(None);
                    }
                    if &src[size..needed] != CRLF {
                        return Err(FramingError::MissingTerminator { size });
                    }

                    let payload = src.split_to(size).freeze();
                    src.advance(CRLF.len());
                    self.state = DecodeState::Head;
                    return Ok(Some(Chunk::Data(payload)));
                }
                DecodeState::Done => {
                    if !src.is_empty() {
                        debug!("Ignoring {} bytes after chunked terminator", src.len());
                        src.clear();
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(chunk) = self.decode(src)? {
            return Ok(Some(chunk));
        }
        match self.state {
            DecodeState::Head if src.is_empty() => Ok(None),
            DecodeState::Done => Ok(None),
            _ => Err(FramingError::UnexpectedEof),
        }
    }
}

impl Encoder<Bytes> for ChunkedCodec {
    type Error = FramingError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<&[u8]>::encode(self, &payload[..], dst)
    }
}

impl Encoder<&[u8]> for ChunkedCodec {
    type Error = FramingError;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.is_empty() {
            return Err(FramingError::EmptyChunk);
        }
        if payload.len() > self.max_chunk_size {
            return Err(FramingError::ChunkTooLarge {
                size: payload.len() as u64,
                limit: self.max_chunk_size,
            });
        }

        let head = format!("{:x}\r\n", payload.len());
        dst.reserve(head.len() + payload.len() + CRLF.len());
        dst.put_slice(head.as_bytes());
        dst.put_slice(payload);
        dst.put_slice(CRLF);
        Ok(())
    }
}
