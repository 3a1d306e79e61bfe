//! Tool Interposer
//!
//! Wraps every registered tool so permission checks run before the tool
//! body. Tools themselves carry no permission logic; the wrapper derives
//! what to ask for from the tool's [`ToolAccess`] and its JSON input:
//!
//! 1. network: hosts from the shell command (shell tools) or from URLs in any
//!    string argument (everything else)
//! 2. files: the `path` argument of read and write tools
//! 3. directories: the `path` of listing tools, plus every out-of-cwd
//!    directory a shell command mentions
//!
//! The first denial short-circuits and comes back as a denied
//! [`ToolResult`], never as an error.


use crate::error::Result;
use crate::permissions::{PermissionAction, PermissionManager, PermissionOutcome};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use warden_tools::{
    extract_hosts_from_command, extract_hosts_from_text, extract_paths_from_command, Tool,
    ToolAccess, ToolDefinition, ToolRegistry, ToolResult,
};

/// A tool behind the permission manager
pub struct GuardedTool {
    inner: Arc<dyn Tool>,
    manager: Arc<PermissionManager>,
    cwd: PathBuf,
}

impl GuardedTool {
    /// Wrap `inner`; relative paths in its input resolve against `cwd`
    #[must_use]
    pub fn new(inner: Arc<dyn Tool>, manager: Arc<PermissionManager>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            manager,
            cwd: cwd.into(),
        }
    }

    /// Run every check the input calls for.
    ///
    /// `Ok(Some(result))` is a denial to hand back instead of running the tool.
    #[instrument(skip(self, input, cancel), fields(tool = %self.inner.definition().name))]
    async fn authorize(
        &self,
        input: &Value,
        cancel: &CancellationToken,
    ) -> Result<Option<ToolResult>> {
        let definition = self.inner.definition();
        let tool_name = Some(definition.name.as_str());

        for host in hosts_in_input(definition.access, input) {
            let outcome = self.manager.request_network(&host, tool_name, cancel).await?;
            if let Some(denied) = denial(outcome, &host, PermissionAction::NetConnect) {
                return Ok(Some(denied));
            }
        }

        match definition.access {
            ToolAccess::ReadFile | ToolAccess::WriteFile => {
                let Some(path) = string_arg(input, "path") else {
                    return Ok(None);
                };
                let action = if definition.access == ToolAccess::WriteFile {
                    PermissionAction::FsWrite
                } else {
                    PermissionAction::FsRead
                };
                let file = self.resolve(path);
                let outcome = self
                    .manager
                    .request_file(&file, action, tool_name, cancel)
                    .await?;
                Ok(denial(outcome, &file.to_string_lossy(), action))
            }
            ToolAccess::ListDirectory => {
                let dir = self.resolve(string_arg(input, "path").unwrap_or("."));
                let action = PermissionAction::FsRead;
                let outcome = self
                    .manager
                    .request_directory(&dir, action, tool_name, cancel)
                    .await?;
                Ok(denial(outcome, &dir.to_string_lossy(), action))
            }
            ToolAccess::Shell => {
                let Some(command) = string_arg(input, "command") else {
                    return Ok(None);
                };
                let action = PermissionAction::FsRead;
                for dir in extract_paths_from_command(command, &self.cwd) {
                    let outcome = self
                        .manager
                        .request_directory(&dir, action, tool_name, cancel)
                        .await?;
                    if let Some(denied) = denial(outcome, &dir.to_string_lossy(), action) {
                        return Ok(Some(denied));
                    }
                }
                Ok(None)
            }
            ToolAccess::Other => Ok(None),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

#[async_trait]
impl Tool for GuardedTool {
    fn definition(&self) -> &ToolDefinition {
        self.inner.definition()
    }

    async fn execute(
        &self,
        input: Value,
        cancel: &CancellationToken,
    ) -> warden_tools::Result<ToolResult> {
        match self.authorize(&input, cancel).await {
            Ok(None) => self.inner.execute(input, cancel).await,
            Ok(Some(denied)) => {
                debug!(tool = %self.inner.definition().name, "Tool call refused");
                Ok(denied)
            }
            Err(e) => {
                warn!(tool = %self.inner.definition().name, error = %e, "Permission check failed");
                Err(warden_tools::Error::Execution(format!(
                    "permission check failed: {}",
                    e
                )))
            }
        }
    }

    fn validate_input(&self, input: &Value) -> warden_tools::Result<()> {
        self.inner.validate_input(input)
    }
}

/// Wrap every tool in `registry` with the permission manager
pub fn install(registry: &mut ToolRegistry, manager: Arc<PermissionManager>, cwd: &Path) {
    registry.wrap_all(|tool| {
        Arc::new(GuardedTool::new(tool, Arc::clone(&manager), cwd)) as Arc<dyn Tool>
    });
}

fn denial(outcome: PermissionOutcome, resource: &str, action: PermissionAction) -> Option<ToolResult> {
    match outcome {
        PermissionOutcome::Granted { .. } => None,
        PermissionOutcome::Denied { user_message, .. } => Some(ToolResult::denied(
            resource,
            action.as_str(),
            user_message.as_deref(),
        )),
    }
}

fn string_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

fn hosts_in_input(access: ToolAccess, input: &Value) -> Vec<String> {
    if access == ToolAccess::Shell {
        return string_arg(input, "command")
            .map(extract_hosts_from_command)
            .unwrap_or_default();
    }

    let mut strings = Vec::new();
    collect_strings(input, &mut strings);

    let mut hosts: Vec<String> = Vec::new();
    for text in strings {
        for host in extract_hosts_from_text(text) {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
    }
    hosts
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
