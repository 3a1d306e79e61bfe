//! Egress Proxy - filtering SOCKS5 and HTTP proxies
//!
//! The enforcement backstop for network access from inside the sandbox.
//! Every destination goes through a [`ConnectionFilter`] before dialing,
//! independent of any check made before the command started.

mod filter;
mod http;
mod socks5;


pub use filter::ConnectionFilter;
pub use http::{parse_request_line, HttpProxy, ProxyRequest};
pub use socks5::{
    Destination, Socks5Proxy, REP_ADDRESS_NOT_SUPPORTED, REP_COMMAND_NOT_SUPPORTED,
    REP_CONNECTION_REFUSED, REP_GENERAL_FAILURE, REP_HOST_UNREACHABLE, REP_NOT_ALLOWED,
    REP_SUCCESS,
};

use crate::error::{Error, Result};
use crate::sandbox::ProxyPorts;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upstream dial timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind both proxies on `ip` and serve them until `cancel` fires.
///
/// Port 0 picks an ephemeral port; the ports actually bound are returned so
/// they can be handed to the sandbox.
pub async fn start_proxies(
    filter: Arc<dyn ConnectionFilter>,
    ip: IpAddr,
    ports: ProxyPorts,
    cancel: CancellationToken,
) -> Result<ProxyPorts> {
    let http_listener = TcpListener::bind(SocketAddr::new(ip, ports.http)).await?;
    let socks_listener = TcpListener::bind(SocketAddr::new(ip, ports.socks)).await?;
    let bound = ProxyPorts {
        http: http_listener.local_addr()?.port(),
        socks: socks_listener.local_addr()?.port(),
    };

    let http = Arc::new(HttpProxy::new(Arc::clone(&filter)));
    let socks = Arc::new(Socks5Proxy::new(filter));
    let http_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = http.serve(http_listener, http_cancel).await {
            warn!(error = %e, "HTTP proxy stopped");
        }
    });
    tokio::spawn(async move {
        if let Err(e) = socks.serve(socks_listener, cancel).await {
            warn!(error = %e, "SOCKS5 proxy stopped");
        }
    });

    info!(http = bound.http, socks = bound.socks, "Egress proxies started");
    Ok(bound)
}

/// Accept connections until cancelled, handing each to its own task.
pub(crate) async fn accept_loop<H, Fut>(
    kind: &'static str,
    listener: TcpListener,
    cancel: CancellationToken,
    handle: H,
) -> Result<()>
where
    H: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(proxy = kind, "Proxy shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let connection = handle(stream, peer);
                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            debug!(proxy = kind, peer = %peer, error = %e, "Proxy connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(proxy = kind, error = %e, "Failed to accept proxy connection"),
            }
        }
    }
}

/// Dial `host:port` with a timeout
pub(crate) async fn connect_target(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(_) => Err(Error::Timeout(timeout.as_millis() as u64)),
    }
}

/// Split `host:port` / `[v6]:port` / `host`, lowercasing the host.
pub(crate) fn split_host_port(authority: &str, default_port: u16) -> Option<(String, u16)> {
    if authority.is_empty() {
        return None;
    }
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if after.is_empty() => default_port,
            None => return None,
        };
        if host.is_empty() {
            return None;
        }
        return Some((host.to_ascii_lowercase(), port));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            Some((host.to_ascii_lowercase(), port.parse().ok()?))
        }
        Some(_) => None,
        None => Some((authority.to_ascii_lowercase(), default_port)),
    }
}
