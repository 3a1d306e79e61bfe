//! SOCKS5 CONNECT proxy (RFC 1928, no-auth only)

use super::filter::ConnectionFilter;
use super::{accept_loop, connect_target};
use crate::error::{Error, Result};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Reply codes
pub const REP_SUCCESS: u8 = 0x00;
/// General SOCKS server failure
pub const REP_GENERAL_FAILURE: u8 = 0x01;
/// Connection not allowed by ruleset
pub const REP_NOT_ALLOWED: u8 = 0x02;
/// Host unreachable
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
/// Connection refused
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
/// Command not supported
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported
pub const REP_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// A parsed CONNECT destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Lowercased domain or textual IP
    pub host: String,
    /// Destination port
    pub port: u16,
}

/// Filtering SOCKS5 server
pub struct Socks5Proxy {
    filter: Arc<dyn ConnectionFilter>,
    connect_timeout: Duration,
}

impl Socks5Proxy {
    /// Create a proxy that asks `filter` about every destination
    #[must_use]
    pub fn new(filter: Arc<dyn ConnectionFilter>) -> Self {
        Self {
            filter,
            connect_timeout: super::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Accept clients until `cancel` fires, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), "SOCKS5 proxy listening");
        accept_loop("socks5", listener, cancel, move |stream, peer| {
            let proxy = Arc::clone(&self);
            async move { proxy.handle(stream, peer).await }
        })
        .await
    }

    /// Serve one client: greeting, CONNECT, filter, then pipe.
    #[instrument(skip(self, client))]
    pub async fn handle(&self, mut client: TcpStream, peer: SocketAddr) -> Result<()> {
        negotiate(&mut client).await?;
        let dest = match read_request(&mut client).await {
            Ok(dest) => dest,
            Err(RequestError::Reply(code, message)) => {
                send_reply(&mut client, code, None).await?;
                return Err(Error::Protocol(message));
            }
            Err(RequestError::Io(e)) => return Err(e.into()),
        };

        if !self.filter.allow(dest.port, &dest.host).await {
            warn!(host = %dest.host, port = dest.port, "SOCKS5 connection blocked by policy");
            send_reply(&mut client, REP_NOT_ALLOWED, None).await?;
            return Ok(());
        }

        let mut target = match connect_target(&dest.host, dest.port, self.connect_timeout).await {
            Ok(target) => target,
            Err(e) => {
                let code = match &e {
                    Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                        REP_CONNECTION_REFUSED
                    }
                    _ => REP_HOST_UNREACHABLE,
                };
                debug!(host = %dest.host, port = dest.port, error = %e, "Upstream connect failed");
                send_reply(&mut client, code, None).await?;
                return Ok(());
            }
        };

        send_reply(&mut client, REP_SUCCESS, target.local_addr().ok()).await?;
        debug!(host = %dest.host, port = dest.port, "SOCKS5 tunnel established");
        let (up, down) = tokio::io::copy_bidirectional(&mut client, &mut target).await?;
        debug!(host = %dest.host, sent = up, received = down, "SOCKS5 tunnel closed");
        Ok(())
    }
}

enum RequestError {
    Reply(u8, String),
    Io(std::io::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

async fn negotiate<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        stream.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        return Err(Error::Protocol(format!("unsupported SOCKS version {}", header[0])));
    }

    let mut methods = vec![0u8; usize::from(header[1])];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        return Err(Error::Protocol("client offers no acceptable auth method".to_string()));
    }
    stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
    Ok(())
}

async fn read_request<S>(stream: &mut S) -> std::result::Result<Destination, RequestError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [version, command, _reserved, atyp] = header;
    if version != VERSION {
        return Err(RequestError::Reply(
            REP_GENERAL_FAILURE,
            format!("unsupported SOCKS version {} in request", version),
        ));
    }
    if command != CMD_CONNECT {
        return Err(RequestError::Reply(
            REP_COMMAND_NOT_SUPPORTED,
            format!("unsupported SOCKS command {}", command),
        ));
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Ipv6Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            let mut name = vec![0u8; usize::from(len)];
            stream.read_exact(&mut name).await?;
            match String::from_utf8(name) {
                Ok(name) if !name.is_empty() => name.trim_end_matches('.').to_ascii_lowercase(),
                _ => {
                    return Err(RequestError::Reply(
                        REP_GENERAL_FAILURE,
                        "invalid domain name".to_string(),
                    ))
                }
            }
        }
        other => {
            return Err(RequestError::Reply(
                REP_ADDRESS_NOT_SUPPORTED,
                format!("unsupported address type {}", other),
            ))
        }
    };
    let port = stream.read_u16().await?;
    Ok(Destination { host, port })
}

async fn send_reply<S>(stream: &mut S, code: u8, bound: Option<SocketAddr>) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut reply = vec![VERSION, code, 0x00];
    match bound {
        Some(SocketAddr::V6(addr)) => {
            reply.push(ATYP_IPV6);
            reply.extend_from_slice(&addr.ip().octets());
            reply.extend_from_slice(&addr.port().to_be_bytes());
        }
        Some(SocketAddr::V4(addr)) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&addr.ip().octets());
            reply.extend_from_slice(&addr.port().to_be_bytes());
        }
        None => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets());
            reply.extend_from_slice(&0u16.to_be_bytes());
        }
    }
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}
