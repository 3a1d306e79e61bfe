//! `warden wrap` - sandbox a shell command with the current grants

use super::open_manager;
use crate::settings::AppConfig;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_core::PermissionFilter;
use warden_tools::{select_provider, start_proxies};

/// Print the wrapped command, or with `execute` run it behind the proxies.
///
/// The printed form carries no proxy bridges, so a restricted command gets
/// no network at all.
pub async fn run(config: &AppConfig, cwd: &Path, command: &str, execute: bool) -> Result<()> {
    let manager = Arc::new(open_manager(config, cwd, None).await?);
    let mut sandbox = manager.sandbox_config(config.sandbox_config()).await?;

    let cancel = CancellationToken::new();
    if execute && sandbox.restrict_network {
        let filter = Arc::new(PermissionFilter::new(Arc::clone(&manager)));
        let ports = start_proxies(filter, config.proxy.bind, config.proxy.ports(), cancel.clone())
            .await
            .context("Failed to start egress proxies")?;
        sandbox = sandbox.with_proxy(ports);
    }

    let provider = select_provider(sandbox).context("Sandbox unavailable; refusing to run")?;
    let wrapped = provider.wrap_command(command, manager.cwd()).await?;

    if !execute {
        println!("{}", wrapped);
        provider.dispose().await?;
        return Ok(());
    }

    info!(backend = provider.name(), "Running sandboxed command");
    let status = tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(&wrapped)
        .current_dir(manager.cwd())
        .status()
        .await
        .context("Failed to spawn sandboxed command")?;

    if let Err(e) = provider.dispose().await {
        warn!(error = %e, "Failed to dispose sandbox");
    }
    cancel.cancel();
    manager.store().close().await;

    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
