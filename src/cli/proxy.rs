//! `warden proxy` - filtering egress proxies backed by the grant store

use super::{open_manager, prompt::spawn_terminal_prompt};
use crate::settings::AppConfig;
use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_core::{GrantChangeKind, PermissionFilter};
use warden_tools::start_proxies;

/// Serve until Ctrl-C. Unknown hosts are prompted for on a terminal and
/// refused otherwise.
pub async fn run(config: &AppConfig, cwd: &Path) -> Result<()> {
    let interactive = std::io::stdin().is_terminal();
    let prompt = interactive.then(spawn_terminal_prompt);
    let manager = Arc::new(open_manager(config, cwd, prompt).await?);

    let cancel = CancellationToken::new();
    let mut filter = PermissionFilter::new(Arc::clone(&manager));
    if interactive {
        filter = filter.with_escalation(cancel.clone());
    }

    let ports = start_proxies(
        Arc::new(filter),
        config.proxy.bind,
        config.proxy.ports(),
        cancel.clone(),
    )
    .await
    .context("Failed to start egress proxies")?;

    println!("HTTP proxy:   http://{}:{}", config.proxy.bind, ports.http);
    println!("SOCKS5 proxy: socks5h://{}:{}", config.proxy.bind, ports.socks);

    let mut changes = manager.subscribe();
    let watcher_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = watcher_cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(change) if change.kind != GrantChangeKind::Cleared => {
                        info!(
                            action = %change.action,
                            resource = %change.resource,
                            kind = ?change.kind,
                            "Grant set changed"
                        );
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "Grant change notifications lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down egress proxies");
    cancel.cancel();
    manager.store().close().await;
    Ok(())
}
