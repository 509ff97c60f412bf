//! SOCKS4, SOCKS4a and SOCKS5 handshakes (CONNECT only, no authentication)

use crate::error::{Result, SocksError};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SOCKS4_VERSION: u8 = 0x04;
const SOCKS5_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const NO_AUTH: u8 = 0x00;
const NO_ACCEPTABLE_METHOD: u8 = 0xFF;

const SOCKS4_GRANTED: u8 = 0x5A;
const SOCKS4_REJECTED: u8 = 0x5B;

/// Longest user id or domain accepted in a SOCKS4 request.
const MAX_CSTR: usize = 255;

/// SOCKS5 reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V4,
    V5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// A CONNECT request that passed the handshake.
#[derive(Debug, Clone)]
pub struct Request {
    pub version: Version,
    pub target: Target,
    /// Address part of the request, echoed back in the reply
    echo: Vec<u8>,
}

impl Request {
    /// The reply telling the client whether the connection is up.
    pub fn reply(&self, success: bool) -> Vec<u8> {
        match self.version {
            Version::V4 => {
                let code = if success { SOCKS4_GRANTED } else { SOCKS4_REJECTED };
                socks4_reply(code, &self.echo)
            }
            Version::V5 => {
                let code = if success {
                    Reply::Succeeded
                } else {
                    Reply::GeneralFailure
                };
                socks5_reply(code, &self.echo)
            }
        }
    }
}

fn socks4_reply(code: u8, echo: &[u8]) -> Vec<u8> {
    let mut reply = vec![0x00, code];
    reply.extend_from_slice(echo);
    reply
}

fn socks5_reply(code: Reply, echo: &[u8]) -> Vec<u8> {
    let mut reply = vec![SOCKS5_VERSION, code as u8, 0x00];
    if echo.is_empty() {
        reply.extend_from_slice(&[0x01, 0, 0, 0, 0, 0, 0]);
    } else {
        reply.extend_from_slice(echo);
    }
    reply
}

/// Run the handshake up to the point where the client waits for the
/// connect reply. Requests that cannot be served are answered with a
/// failure reply before the error is returned.
pub async fn read_request<S>(socket: &mut S) -> Result<Request>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match socket.read_u8().await? {
        SOCKS4_VERSION => read_socks4(socket).await,
        SOCKS5_VERSION => read_socks5(socket).await,
        other => Err(SocksError::InvalidVersion(other)),
    }
}

async fn read_cstr<S: AsyncRead + Unpin>(socket: &mut S) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        match socket.read_u8().await? {
            0 => return Ok(out),
            _ if out.len() == MAX_CSTR => return Err(SocksError::Malformed("string too long")),
            b => out.push(b),
        }
    }
}

// VER(1) CMD(1) PORT(2) IP(4) USERID(..0) [DOMAIN(..0)]
async fn read_socks4<S>(socket: &mut S) -> Result<Request>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = [0u8; 7];
    socket.read_exact(&mut head).await?;
    let command = head[0];
    let echo = head[1..].to_vec();
    let port = u16::from_be_bytes([head[1], head[2]]);
    let ip = [head[3], head[4], head[5], head[6]];
    let _user = read_cstr(socket).await?;

    if command != CMD_CONNECT {
        socket.write_all(&socks4_reply(SOCKS4_REJECTED, &echo)).await?;
        return Err(SocksError::UnsupportedCommand(command));
    }

    // 0.0.0.x with x != 0 announces a SOCKS4a domain after the user id.
    let target = if ip[..3] == [0, 0, 0] && ip[3] != 0 {
        let domain = read_cstr(socket).await?;
        match String::from_utf8(domain) {
            Ok(domain) if !domain.is_empty() => Target::Domain(domain, port),
            _ => {
                socket.write_all(&socks4_reply(SOCKS4_REJECTED, &echo)).await?;
                return Err(SocksError::Malformed("invalid SOCKS4a domain"));
            }
        }
    } else {
        Target::Ip(SocketAddr::from((Ipv4Addr::from(ip), port)))
    };

    Ok(Request {
        version: Version::V4,
        target,
        echo,
    })
}

async fn read_socks5<S>(socket: &mut S) -> Result<Request>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // VER(1) NMETHODS(1) METHODS(NMETHODS)
    let count = socket.read_u8().await? as usize;
    let mut methods = vec![0u8; count];
    socket.read_exact(&mut methods).await?;
    if !methods.contains(&NO_AUTH) {
        socket
            .write_all(&[SOCKS5_VERSION, NO_ACCEPTABLE_METHOD])
            .await?;
        return Err(SocksError::NoAcceptableMethod);
    }
    socket.write_all(&[SOCKS5_VERSION, NO_AUTH]).await?;

    // VER(1) CMD(1) RSV(1) ATYP(1) ADDR(..) PORT(2)
    let mut head = [0u8; 4];
    socket.read_exact(&mut head).await?;
    let [version, command, reserved, address_type] = head;
    if version != SOCKS5_VERSION || reserved != 0 {
        socket
            .write_all(&socks5_reply(Reply::GeneralFailure, &[]))
            .await?;
        return Err(SocksError::InvalidVersion(version));
    }

    let mut echo = vec![address_type];
    let target = match address_type {
        0x01 => {
            let mut addr = [0u8; 6];
            socket.read_exact(&mut addr).await?;
            echo.extend_from_slice(&addr);
            let ip = Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]);
            Target::Ip(SocketAddr::from((ip, u16::from_be_bytes([addr[4], addr[5]]))))
        }
        0x03 => {
            let len = socket.read_u8().await? as usize;
            let mut addr = vec![0u8; len + 2];
            socket.read_exact(&mut addr).await?;
            echo.push(len as u8);
            echo.extend_from_slice(&addr);
            let port = u16::from_be_bytes([addr[len], addr[len + 1]]);
            addr.truncate(len);
            match String::from_utf8(addr) {
                Ok(domain) if !domain.is_empty() => Target::Domain(domain, port),
                _ => {
                    socket
                        .write_all(&socks5_reply(Reply::GeneralFailure, &echo))
                        .await?;
                    return Err(SocksError::Malformed("invalid domain"));
                }
            }
        }
        0x04 => {
            let mut addr = [0u8; 18];
            socket.read_exact(&mut addr).await?;
            echo.extend_from_slice(&addr);
            let mut ip = [0u8; 16];
            ip.copy_from_slice(&addr[..16]);
            let port = u16::from_be_bytes([addr[16], addr[17]]);
            Target::Ip(SocketAddr::from((Ipv6Addr::from(ip), port)))
        }
        other => {
            socket
                .write_all(&socks5_reply(Reply::AddressTypeNotSupported, &[]))
                .await?;
            return Err(SocksError::UnsupportedAddressType(other));
        }
    };

    if command != CMD_CONNECT {
        socket
            .write_all(&socks5_reply(Reply::CommandNotSupported, &echo))
            .await?;
        return Err(SocksError::UnsupportedCommand(command));
    }

    Ok(Request {
        version: Version::V5,
        target,
        echo,
    })
}
