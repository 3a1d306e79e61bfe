//! Permissions - layered grant resolution
//!
//! Layers, highest priority first (all allow-only):
//! 1. cwd
//! 2. workspace roots
//! 3. safe files
//! 4. pre-allowed directories
//! 5. once grants (cleared per agent turn)
//! 6. session grants (cleared on exit)
//! 7. persistent grants (SQLite)
//!
//! There is no deny grant; absence of an allow is a denial.

mod manager;
mod paths;
mod prompt;
mod types;

#[cfg(test)]
mod tests;

pub use manager::{PermissionManager, PermissionManagerConfig};
pub use paths::{normalize_host, resolve_path};
pub(crate) use paths::path_key;
pub use prompt::{prompt_channel, PromptChannel, PromptEnvelope};
pub use types::{
    AuditEntry, AuditEvent, CheckResult, DenialReason, GrantChange, GrantChangeKind, GrantScope,
    GrantSource, GrantType, PermissionAction, PermissionGrant, PermissionOutcome,
    PermissionRequest, PromptDecision,
};
