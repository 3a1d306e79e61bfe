//! Registry - Tool registration and discovery
//!
//! Tools are registered with a definition describing what kind of resource
//! access they perform. The permission layer never inspects tool bodies; it
//! only looks at [`ToolAccess`] and the JSON input, so every tool has to be
//! registered here before it can be wrapped.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Kind of resource access a tool performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccess {
    /// Reads a single file named by the `path` argument
    ReadFile,
    /// Creates or modifies a single file named by the `path` argument
    WriteFile,
    /// Lists a directory named by the `path` argument
    ListDirectory,
    /// Runs an opaque shell command from the `command` argument
    Shell,
    /// Anything else; only URL arguments are checked
    #[default]
    Other,
}

impl ToolAccess {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ListDirectory => "list_directory",
            Self::Shell => "shell",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ToolAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tool metadata and schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON schema for parameters
    pub parameters: serde_json::Value,
    /// Resource access performed by the tool
    #[serde(default)]
    pub access: ToolAccess,
}

impl ToolDefinition {
    /// Create a new tool definition
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            access: ToolAccess::Other,
        }
    }

    /// Set the parameters schema
    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the access kind
    #[must_use]
    pub fn with_access(mut self, access: ToolAccess) -> Self {
        self.access = access;
        self
    }
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether execution succeeded
    pub success: bool,
    /// Output data
    pub output: serde_json::Value,
    /// Error message if failed
    pub error: Option<String>,
    /// Execution duration in milliseconds
    pub duration_ms: u64,
}

impl ToolResult {
    /// Create a successful result
    #[must_use]
    pub fn success(output: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            output,
            error: None,
            duration_ms,
        }
    }

    /// Create a result for a call that was refused before it ran.
    ///
    /// `user_message` is whatever the user typed when denying, if anything.
    #[must_use]
    pub fn denied(
        resource: impl Into<String>,
        action: &str,
        user_message: Option<&str>,
    ) -> Self {
        let resource = resource.into();
        let mut message = format!("Permission denied: {} access to {}", action, resource);
        if let Some(reason) = user_message.filter(|m| !m.trim().is_empty()) {
            message.push_str(&format!(". User said: {}", reason.trim()));
        }
        Self {
            success: false,
            output: serde_json::json!({
                "status": "denied",
                "resource": resource,
                "action": action,
                "user_message": user_message,
            }),
            error: Some(message),
            duration_ms: 0,
        }
    }

    /// Whether this result is a permission denial
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.output.get("status").and_then(|s| s.as_str()) == Some("denied")
    }
}

/// Trait for tool implementations
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition
    fn definition(&self) -> &ToolDefinition;

    /// Execute the tool with given input.
    ///
    /// Implementations should stop early once `cancel` fires.
    async fn execute(
        &self,
        input: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult>;

    /// Validate input before execution
    fn validate_input(&self, input: &serde_json::Value) -> Result<()> {
        if !input.is_object() {
            return Err(Error::InvalidInput("Input must be an object".to_string()));
        }
        Ok(())
    }
}

/// Registry for managing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let def = tool.definition();
        let name = def.name.clone();
        debug!(tool = %name, access = %def.access, "Registering tool");
        self.tools.insert(name, tool);
    }

    /// Replace every registered tool with `wrap(tool)`
    pub fn wrap_all<F>(&mut self, wrap: F)
    where
        F: Fn(Arc<dyn Tool>) -> Arc<dyn Tool>,
    {
        for tool in self.tools.values_mut() {
            *tool = wrap(Arc::clone(tool));
        }
    }

    /// Get a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Execute a tool by name
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        tool.validate_input(&input)?;
        tool.execute(input, cancel).await
    }

    /// Get tool count
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        definition: ToolDefinition,
    }

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        async fn execute(
            &self,
            input: serde_json::Value,
            _cancel: &CancellationToken,
        ) -> Result<ToolResult> {
            Ok(ToolResult::success(input, 0))
        }
    }

    fn echo(name: &str) -> Arc<dyn Tool> {
        Arc::new(EchoTool {
            definition: ToolDefinition::new(name, "echo input back").with_access(ToolAccess::Other),
        })
    }

    #[test]
    fn test_tool_definition_builder() {
        let def = ToolDefinition::new("read", "Read a file").with_access(ToolAccess::ReadFile);

        assert_eq!(def.name, "read");
        assert_eq!(def.access, ToolAccess::ReadFile);
        assert_eq!(def.access.to_string(), "read_file");
    }

    #[test]
    fn test_tool_result() {
        let success = ToolResult::success(serde_json::json!({"data": "test"}), 100);
        assert!(success.success);
        assert!(success.error.is_none());
        assert!(!success.is_denied());
    }

    #[test]
    fn test_denied_result_carries_user_message() {
        let denied = ToolResult::denied("/etc", "fs_read", Some("not today"));
        assert!(denied.is_denied());
        assert!(!denied.success);
        let message = denied.error.unwrap();
        assert!(message.contains("/etc"));
        assert!(message.contains("not today"));

        let silent = ToolResult::denied("example.com", "net_connect", None);
        assert!(!silent.error.unwrap().contains("User said"));
    }

    #[tokio::test]
    async fn test_registry_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("echo"));
        assert_eq!(registry.len(), 1);

        let cancel = CancellationToken::new();
        let result = registry
            .execute("echo", serde_json::json!({"x": 1}), &cancel)
            .await
            .unwrap();
        assert_eq!(result.output["x"], 1);

        let invalid = registry
            .execute("echo", serde_json::json!("not an object"), &cancel)
            .await;
        assert!(matches!(invalid, Err(Error::InvalidInput(_))));

        let missing = registry.execute("nope", serde_json::json!({}), &cancel).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_wrap_all_replaces_tools() {
        struct Blocked(ToolDefinition);

        #[async_trait::async_trait]
        impl Tool for Blocked {
            fn definition(&self) -> &ToolDefinition {
                &self.0
            }

            async fn execute(
                &self,
                _input: serde_json::Value,
                _cancel: &CancellationToken,
            ) -> Result<ToolResult> {
                Ok(ToolResult::denied("anything", "fs_read", None))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(echo("echo"));
        registry.wrap_all(|inner| Arc::new(Blocked(inner.definition().clone())));

        let result = registry
            .execute("echo", serde_json::json!({}), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_denied());
    }
}
