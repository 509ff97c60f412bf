//! HTTP/1.1 request and response heads
//!
//! Tunnels only ever exchange a head and then a raw chunked body, so the
//! head is parsed by hand with `httparse` and whatever was read past it is
//! handed back to the caller as the start of the body.

use crate::error::{HttpError, Result};
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Chain};

pub const MAX_HEAD_SIZE: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;

pub const SESSION_HEADER: &str = "x-session-id";
pub const STREAM_HEADER: &str = "x-stream-id";

#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    /// Minor version: 1 for HTTP/1.1
    pub version: u8,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// A reader that replays bytes buffered while parsing a head.
pub type Replay<R> = Chain<Cursor<Bytes>, R>;

pub fn replay<R: AsyncRead>(leftover: Bytes, reader: R) -> Replay<R> {
    Cursor::new(leftover).chain(reader)
}

fn header_map(headers: &[httparse::Header<'_>]) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for header in headers {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HttpError::Parse(httparse::Error::HeaderName))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HttpError::Parse(httparse::Error::HeaderValue))?;
        map.append(name, value);
    }
    Ok(map)
}

async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut BytesMut) -> Result<()> {
    if buf.len() >= MAX_HEAD_SIZE {
        return Err(HttpError::HeadTooLarge(MAX_HEAD_SIZE));
    }
    if reader.read_buf(buf).await? == 0 {
        return Err(HttpError::Incomplete);
    }
    Ok(())
}

/// Read a request head. Returns the head and any body bytes read with it.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(RequestHead, Bytes)> {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        fill(reader, &mut buf).await?;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        if let httparse::Status::Complete(len) = req.parse(&buf)? {
            let method = Method::from_bytes(req.method.unwrap_or_default().as_bytes())
                .map_err(|_| HttpError::Parse(httparse::Error::Token))?;
            let head = RequestHead {
                method,
                target: req.path.unwrap_or_default().to_string(),
                version: req.version.unwrap_or_default(),
                headers: header_map(req.headers)?,
            };
            let rest = buf.split_off(len).freeze();
            return Ok((head, rest));
        }
    }
}

/// Read a response head. Returns the head and any body bytes read with it.
pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(ResponseHead, Bytes)> {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        fill(reader, &mut buf).await?;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut headers);
        if let httparse::Status::Complete(len) = res.parse(&buf)? {
            let status = StatusCode::from_u16(res.code.unwrap_or_default())
                .map_err(|_| HttpError::Parse(httparse::Error::Status))?;
            let head = ResponseHead {
                status,
                headers: header_map(res.headers)?,
            };
            let rest = buf.split_off(len).freeze();
            return Ok((head, rest));
        }
    }
}

/// Value of a header as text.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Serialize a head from a start line and headers.
pub fn render(start_line: &str, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut out = String::with_capacity(128);
    out.push_str(start_line);
    out.push_str("\r\n");
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.into_bytes()
}

/// Write a bodiless response and flush it.
pub async fn write_status<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: StatusCode,
    body: &str,
) -> std::io::Result<()> {
    let line = format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    let length = body.len().to_string();
    let mut head = render(
        &line,
        &[("Content-Length", &length), ("Connection", "close")],
    );
    head.extend_from_slice(body.as_bytes());
    writer.write_all(&head).await?;
    writer.flush().await
}
