//! Permission manager as the egress proxy filter

use crate::permissions::PermissionManager;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use warden_tools::ConnectionFilter;

const PROXY_TOOL_NAME: &str = "egress-proxy";

/// Allows proxied connections to hosts with an active `net_connect` grant.
///
/// With escalation on, unknown hosts go to the prompt instead of being
/// refused outright. Store failures refuse the connection.
pub struct PermissionFilter {
    manager: Arc<PermissionManager>,
    escalate: bool,
    cancel: CancellationToken,
}

impl PermissionFilter {
    /// Filter that only consults existing grants
    #[must_use]
    pub fn new(manager: Arc<PermissionManager>) -> Self {
        Self {
            manager,
            escalate: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Prompt for hosts without a grant; pending prompts end when `cancel` fires
    #[must_use]
    pub fn with_escalation(mut self, cancel: CancellationToken) -> Self {
        self.escalate = true;
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl ConnectionFilter for PermissionFilter {
    async fn allow(&self, port: u16, host: &str) -> bool {
        let decision = if self.escalate {
            self.manager
                .request_network(host, Some(PROXY_TOOL_NAME), &self.cancel)
                .await
                .map(|outcome| outcome.is_granted())
        } else {
            self.manager
                .check_network(host)
                .await
                .map(|result| result.is_granted())
        };

        match decision {
            Ok(allowed) => {
                debug!(host = %host, port, allowed, "Proxy filter decision");
                allowed
            }
            Err(e) => {
                warn!(host = %host, port, error = %e, "Proxy filter failed, refusing connection");
                false
            }
        }
    }
}
