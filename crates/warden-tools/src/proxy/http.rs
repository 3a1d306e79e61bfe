//! HTTP proxy: `CONNECT` tunnels plus absolute-form plain HTTP requests
//!
//! Sandboxed tools that honour `HTTP_PROXY`/`HTTPS_PROXY` land here. The
//! same filter as the SOCKS5 server decides every destination.

use super::filter::ConnectionFilter;
use super::{accept_loop, connect_target, split_host_port};
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Largest request head accepted
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    /// Request method, uppercase as sent
    pub method: String,
    /// Lowercased destination host
    pub host: String,
    /// Destination port
    pub port: u16,
}

impl ProxyRequest {
    /// Whether this is a `CONNECT` tunnel request
    #[must_use]
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }
}

/// Filtering HTTP proxy server
pub struct HttpProxy {
    filter: Arc<dyn ConnectionFilter>,
    connect_timeout: Duration,
}

impl HttpProxy {
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
        info!(addr = ?listener.local_addr().ok(), "HTTP proxy listening");
        accept_loop("http", listener, cancel, move |stream, peer| {
            let proxy = Arc::clone(&self);
            async move { proxy.handle(stream, peer).await }
        })
        .await
    }

    /// Serve one client request.
    #[instrument(skip(self, client))]
    pub async fn handle(&self, mut client: TcpStream, peer: SocketAddr) -> Result<()> {
        let (head, rest) = read_head(&mut client).await?;
        let request = match parse_request_line(&head) {
            Some(request) => request,
            None => {
                respond(&mut client, "400 Bad Request").await?;
                return Err(Error::Protocol("malformed proxy request".to_string()));
            }
        };

        if !self.filter.allow(request.port, &request.host).await {
            warn!(host = %request.host, port = request.port, "HTTP proxy request blocked by policy");
            respond(&mut client, "403 Forbidden").await?;
            return Ok(());
        }

        let mut target = match connect_target(&request.host, request.port, self.connect_timeout).await {
            Ok(target) => target,
            Err(e) => {
                debug!(host = %request.host, error = %e, "Upstream connect failed");
                respond(&mut client, "502 Bad Gateway").await?;
                return Ok(());
            }
        };

        if request.is_connect() {
            client
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await?;
            if !rest.is_empty() {
                target.write_all(&rest).await?;
            }
        } else {
            target.write_all(&head).await?;
            target.write_all(&rest).await?;
        }

        let (up, down) = tokio::io::copy_bidirectional(&mut client, &mut target).await?;
        debug!(host = %request.host, sent = up, received = down, "HTTP proxy tunnel closed");
        Ok(())
    }
}

/// Read until the blank line ending the head; returns (head, bytes after it).
async fn read_head<S>(stream: &mut S) -> Result<(Vec<u8>, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Protocol("connection closed before request head".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&buf) {
            let rest = buf.split_off(end);
            return Ok((buf, rest));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(Error::Protocol("request head too large".to_string()));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Parse `CONNECT host:port HTTP/1.1` or `GET http://host[:port]/path HTTP/1.1`.
#[must_use]
pub fn parse_request_line(head: &[u8]) -> Option<ProxyRequest> {
    let text = std::str::from_utf8(head).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;
    parts.next().filter(|v| v.starts_with("HTTP/"))?;

    let (host, port) = if method.eq_ignore_ascii_case("CONNECT") {
        split_host_port(target, 443)?
    } else {
        let authority = target.strip_prefix("http://")?;
        let authority = authority.split(['/', '?', '#']).next()?;
        let authority = authority.rsplit('@').next()?;
        split_host_port(authority, 80)?
    };
    Some(ProxyRequest { method, host, port })
}

async fn respond(stream: &mut TcpStream, status: &str) -> Result<()> {
    let body = format!("{}\n", status);
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
