//! Stream and tunnel identifiers
//!
//! Ids are opaque to the multiplexer. They travel inside frame headers, so
//! they must be non-empty ASCII and may not contain the `_` separator or the
//! `\n` delimiter. Length is bounded only by the chunk size limit.

use crate::constants::{HEADER_DELIMITER, ID_SEPARATOR};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("Id is empty")]
    Empty,

    #[error("Id contains reserved or non-ASCII byte 0x{0:02x}")]
    InvalidByte(u8),
}

/// Check that `raw` can be used as an id on the wire.
pub fn validate_id(raw: &[u8]) -> Result<(), IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty);
    }
    match raw
        .iter()
        .find(|&&b| !b.is_ascii() || b == ID_SEPARATOR || b == HEADER_DELIMITER)
    {
        Some(&b) => Err(IdError::InvalidByte(b)),
        None => Ok(()),
    }
}

fn push_base36(out: &mut String, mut value: u64, min_width: usize) {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut buf = [b'0'; 13];
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = DIGITS[(value % 36) as usize];
        value /= 36;
        if value == 0 {
            break;
        }
    }
    let start = pos.min(buf.len().saturating_sub(min_width));
    out.extend(buf[start..].iter().map(|&b| char::from(b)));
}

/// Milliseconds since the epoch followed by a fixed-width random suffix.
fn generate_raw() -> Arc<str> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64);
    let mut out = String::with_capacity(24);
    push_base36(&mut out, millis, 1);
    push_base36(&mut out, rand::random::<u64>(), 13);
    Arc::from(out)
}

macro_rules! wire_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Generate a fresh id.
            pub fn generate() -> Self {
                Self(generate_raw())
            }

            /// Parse an id received from the wire.
            pub fn from_wire(raw: &[u8]) -> Result<Self, IdError> {
                validate_id(raw)?;
                // validate_id only admits ASCII, so this cannot be lossy
                Ok(Self(Arc::from(String::from_utf8_lossy(raw).as_ref())))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_wire(s.as_bytes())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

wire_id! {
    /// Identifies one multiplexed stream within a session.
    StreamId
}

wire_id! {
    /// Identifies one physical tunnel within a session.
    TunnelId
}
