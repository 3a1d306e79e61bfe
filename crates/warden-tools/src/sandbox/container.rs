//! Container mode: the container boundary replaces the sandbox
//!
//! Commands run unchanged, but only from a working directory inside one of
//! the paths mounted into the container.

use super::config::SandboxConfig;
use super::provider::SandboxProvider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::warn;

/// Pass-through provider for runs inside a container
pub struct ContainerSandbox {
    mounts: RwLock<Vec<PathBuf>>,
}

impl ContainerSandbox {
    /// Create the provider from the configured container mounts
    #[must_use]
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            mounts: RwLock::new(config.container_mounts.clone()),
        }
    }

    /// Best-effort detection of running inside Docker or Podman
    #[must_use]
    pub fn detect() -> bool {
        Path::new("/.dockerenv").exists()
            || Path::new("/run/.containerenv").exists()
            || std::env::var_os("container").is_some()
    }
}

#[async_trait]
impl SandboxProvider for ContainerSandbox {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn wrap_command(&self, command: &str, cwd: &Path) -> Result<String> {
        let cwd_real = tokio::fs::canonicalize(cwd)
            .await
            .unwrap_or_else(|_| cwd.to_path_buf());
        let mounts = self.mounts.read().await;
        let inside = mounts.iter().any(|mount| {
            let mount_real = std::fs::canonicalize(mount).unwrap_or_else(|_| mount.clone());
            cwd_real.starts_with(&mount_real)
        });
        if !inside {
            warn!(cwd = %cwd.display(), "Working directory is outside every container mount");
            return Err(Error::PermissionDenied(format!(
                "{} is not inside a mounted path",
                cwd.display()
            )));
        }
        Ok(command.to_string())
    }

    async fn update_config(&self, config: SandboxConfig) -> Result<()> {
        *self.mounts.write().await = config.container_mounts;
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
