//! Multiplexing frame definitions
//!
//! Each chunk carries exactly one frame:
//! ```text
//! <EVENT>['_'<stream-id>]'\n'<payload>
//! ```

use crate::constants::{HEADER_DELIMITER, ID_SEPARATOR};
use crate::ids::{IdError, StreamId, TunnelId};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Event code carried in the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Open,
    Data,
    HalfClose,
    Close,
    /// Session-level: payload is the id of a newly ready receive tunnel
    Ack,
    /// Session-level: payload is an error message, fatal for the session
    Error,
}

impl FrameKind {
    pub const fn code(self) -> u8 {
        match self {
            Self::Open => b'O',
            Self::Data => b'D',
            Self::HalfClose => b'H',
            Self::Close => b'C',
            Self::Ack => b'A',
            Self::Error => b'E',
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            b'O' => Some(Self::Open),
            b'D' => Some(Self::Data),
            b'H' => Some(Self::HalfClose),
            b'C' => Some(Self::Close),
            b'A' => Some(Self::Ack),
            b'E' => Some(Self::Error),
            _ => None,
        }
    }

    /// Session-level frames carry no stream id.
    pub const fn is_session_level(self) -> bool {
        matches!(self, Self::Ack | Self::Error)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "OPEN",
            Self::Data => "DATA",
            Self::HalfClose => "HALF_CLOSE",
            Self::Close => "CLOSE",
            Self::Ack => "ACK",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame has no header delimiter")]
    MissingDelimiter,

    #[error("Frame header is empty")]
    EmptyHeader,

    #[error("Unknown event code 0x{0:02x}")]
    UnknownEvent(u8),

    #[error("{0} frame without stream id")]
    MissingStreamId(FrameKind),

    #[error("{0} frame must not carry a stream id")]
    UnexpectedStreamId(FrameKind),

    #[error("Malformed frame header")]
    MalformedHeader,

    #[error("Invalid stream id: {0}")]
    InvalidStreamId(#[from] IdError),
}

/// One multiplexing protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub stream_id: Option<StreamId>,
    pub payload: Bytes,
}

impl Frame {
    fn stream(kind: FrameKind, id: StreamId, payload: Bytes) -> Self {
        Self {
            kind,
            stream_id: Some(id),
            payload,
        }
    }

    pub fn open(id: StreamId, payload: Bytes) -> Self {
        Self::stream(FrameKind::Open, id, payload)
    }

    pub fn data(id: StreamId, payload: Bytes) -> Self {
        Self::stream(FrameKind::Data, id, payload)
    }

    pub fn half_close(id: StreamId) -> Self {
        Self::stream(FrameKind::HalfClose, id, Bytes::new())
    }

    pub fn close(id: StreamId, reason: Option<Bytes>) -> Self {
        Self::stream(FrameKind::Close, id, reason.unwrap_or_default())
    }

    pub fn ack(tunnel: &TunnelId) -> Self {
        Self {
            kind: FrameKind::Ack,
            stream_id: None,
            payload: Bytes::copy_from_slice(tunnel.as_bytes()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Error,
            stream_id: None,
            payload: Bytes::from(message.into()),
        }
    }

    /// Serialize into a single chunk payload. Never empty.
    pub fn encode(&self) -> Bytes {
        let id_len = self.stream_id.as_ref().map_or(0, |id| id.as_bytes().len() + 1);
        let mut buf = BytesMut::with_capacity(2 + id_len + self.payload.len());
        buf.put_u8(self.kind.code());
        if let Some(id) = &self.stream_id {
            buf.put_u8(ID_SEPARATOR);
            buf.put_slice(id.as_bytes());
        }
        buf.put_u8(HEADER_DELIMITER);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a chunk payload. The returned payload shares `raw`'s buffer.
    pub fn decode(raw: &Bytes) -> Result<Self, FrameError> {
        let delimiter = raw
            .iter()
            .position(|&b| b == HEADER_DELIMITER)
            .ok_or(FrameError::MissingDelimiter)?;
        let header = &raw[..delimiter];
        let (&code, rest) = header.split_first().ok_or(FrameError::EmptyHeader)?;
        let kind = FrameKind::from_code(code).ok_or(FrameError::UnknownEvent(code))?;

        let stream_id = match rest.split_first() {
            None => None,
            Some((&ID_SEPARATOR, id)) => Some(StreamId::from_wire(id)?),
            Some(_) => return Err(FrameError::MalformedHeader),
        };

        match (kind.is_session_level(), &stream_id) {
            (true, Some(_)) => return Err(FrameError::UnexpectedStreamId(kind)),
            (false, None) => return Err(FrameError::MissingStreamId(kind)),
            _ => {}
        }

        Ok(Self {
            kind,
            stream_id,
            payload: raw.slice(delimiter + 1..),
        })
    }
}
