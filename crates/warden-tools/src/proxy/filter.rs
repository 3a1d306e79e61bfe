//! Destination filter consulted before every proxied connection

use async_trait::async_trait;

/// Decides whether a proxied connection to `host:port` may be dialed.
///
/// `host` is a lowercased domain name or the textual form of an IP address.
/// Implementations may suspend (for example to ask the user).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionFilter: Send + Sync {
    /// Return `true` to allow the connection
    async fn allow(&self, port: u16, host: &str) -> bool;
}
