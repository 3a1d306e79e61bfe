//! Sandbox provider trait

use super::config::SandboxConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// An OS-level enforcement backend.
///
/// Providers turn a shell command into the command line that runs it under
/// the current restrictions. They never fall back to running unsandboxed: a
/// provider that cannot enforce its config returns an error instead.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Produce a shell command line that runs `command` in `cwd` under the sandbox.
    async fn wrap_command(&self, command: &str, cwd: &Path) -> Result<String>;

    /// Replace the restrictions applied to subsequently wrapped commands.
    async fn update_config(&self, config: SandboxConfig) -> Result<()>;

    /// Stop helper processes and remove temporary state.
    async fn dispose(&self) -> Result<()>;
}
