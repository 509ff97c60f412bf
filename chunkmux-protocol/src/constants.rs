//! Protocol constants

/// Default upper bound for a single chunk payload (16MB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Longest accepted chunk-size line, extensions included
pub const MAX_SIZE_LINE: usize = 1024;

/// Chunked-body terminator
pub const TERMINATOR: &[u8] = b"0\r\n\r\n";

pub const CRLF: &[u8] = b"\r\n";

/// Separates the event header from the payload
pub const HEADER_DELIMITER: u8 = b'\n';

/// Separates the event code from the stream id
pub const ID_SEPARATOR: u8 = b'_';
