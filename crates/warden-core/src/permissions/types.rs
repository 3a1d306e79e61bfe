//! Permission types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Kind of resource a grant covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// A directory and everything below it
    Directory,
    /// A single host name
    Network,
}

impl GrantType {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Network => "network",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "directory" => Some(Self::Directory),
            "network" => Some(Self::Network),
            _ => None,
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Action a grant authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    /// Read files or list directories
    FsRead,
    /// Create or modify files
    FsWrite,
    /// Open outbound network connections
    NetConnect,
}

impl PermissionAction {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FsRead => "fs_read",
            Self::FsWrite => "fs_write",
            Self::NetConnect => "net_connect",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fs_read" => Some(Self::FsRead),
            "fs_write" => Some(Self::FsWrite),
            "net_connect" => Some(Self::NetConnect),
            _ => None,
        }
    }

    /// Grant type this action applies to
    #[must_use]
    pub fn grant_type(&self) -> GrantType {
        match self {
            Self::FsRead | Self::FsWrite => GrantType::Directory,
            Self::NetConnect => GrantType::Network,
        }
    }

    /// Whether changes to grants with this action affect the sandbox or proxy
    #[must_use]
    pub fn affects_enforcement(&self) -> bool {
        matches!(self, Self::FsWrite | Self::NetConnect)
    }
}

impl std::fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Grant lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    /// Until the current agent turn ends
    Once,
    /// Until the process exits
    Session,
    /// Stored in SQLite across restarts
    Persistent,
}

impl GrantScope {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Session => "session",
            Self::Persistent => "persistent",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "once" => Some(Self::Once),
            "session" => Some(Self::Session),
            "persistent" => Some(Self::Persistent),
            _ => None,
        }
    }
}

impl std::fmt::Display for GrantScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// An authorization tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Row id (persistent grants only)
    pub id: Option<i64>,
    /// Resource kind
    pub grant_type: GrantType,
    /// Authorized action
    pub action: PermissionAction,
    /// Absolute directory path or lowercased host
    pub resource: String,
    /// Lifetime
    pub scope: GrantScope,
    /// Tool that triggered the grant
    pub tool_name: Option<String>,
    /// When the grant was made
    pub granted_at: DateTime<Utc>,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Soft-delete marker
    pub revoked_at: Option<DateTime<Utc>>,
}

impl PermissionGrant {
    /// Create a grant; the type follows from the action
    #[must_use]
    pub fn new(action: PermissionAction, resource: impl Into<String>, scope: GrantScope) -> Self {
        Self {
            id: None,
            grant_type: action.grant_type(),
            action,
            resource: resource.into(),
            scope,
            tool_name: None,
            granted_at: Utc::now(),
            expires_at: None,
            revoked_at: None,
        }
    }

    /// Set the tool name
    #[must_use]
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Set an expiry time
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Neither revoked nor expired at `now`
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|at| at > now)
    }

    /// Whether this grant authorizes `resource`.
    ///
    /// Directory grants cover the directory and its descendants on component
    /// boundaries; network grants match the host exactly.
    #[must_use]
    pub fn covers(&self, resource: &str) -> bool {
        match self.grant_type {
            GrantType::Directory => Path::new(resource).starts_with(&self.resource),
            GrantType::Network => self.resource.eq_ignore_ascii_case(resource),
        }
    }

    /// Same `(type, action, resource, scope)` identity
    #[must_use]
    pub fn same_key(&self, other: &Self) -> bool {
        self.grant_type == other.grant_type
            && self.action == other.action
            && self.resource == other.resource
            && self.scope == other.scope
    }
}

/// A pending decision shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Resource kind
    pub grant_type: GrantType,
    /// Requested action
    pub action: PermissionAction,
    /// Directory path or host being requested
    pub detail: String,
    /// Tool asking
    pub tool_name: Option<String>,
    /// Human-readable description of what is happening
    pub description: String,
}

/// The user's answer to a [`PermissionRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PromptDecision {
    /// Allow at the chosen scope
    Allow {
        /// Grant lifetime
        scope: GrantScope,
    },
    /// Deny, optionally explaining why
    Deny {
        /// Free text from the user, passed back to the agent
        user_message: Option<String>,
    },
}

/// Which layer granted access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    /// Inside the working directory
    Cwd,
    /// Inside a workspace root
    Workspace,
    /// A whitelisted file
    SafeFile,
    /// Inside an operator-configured directory
    PreAllowed,
    /// A once-scope grant
    Once,
    /// A session-scope grant
    Session,
    /// A persistent grant
    Persistent,
}

impl GrantSource {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cwd => "cwd",
            Self::Workspace => "workspace",
            Self::SafeFile => "safe_file",
            Self::PreAllowed => "pre_allowed",
            Self::Once => "once",
            Self::Session => "session",
            Self::Persistent => "persistent",
        }
    }
}

impl From<GrantScope> for GrantSource {
    fn from(scope: GrantScope) -> Self {
        match scope {
            GrantScope::Once => Self::Once,
            GrantScope::Session => Self::Session,
            GrantScope::Persistent => Self::Persistent,
        }
    }
}

/// Result of a non-prompting check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// Some layer allows the access
    Granted {
        /// The layer that allowed it
        source: GrantSource,
    },
    /// No layer allows the access
    Denied,
}

impl CheckResult {
    /// Whether access is granted
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// Why a request ended denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// No prompt channel is configured
    NoPrompt,
    /// The target directory does not exist
    PathNotFound,
    /// The user said no
    UserDenied,
    /// The caller's cancellation token fired while waiting
    Cancelled,
    /// The prompt timed out
    TimedOut,
    /// The prompt side went away without answering
    PromptClosed,
}

impl DenialReason {
    /// Returns the string representation (stored as the audit reason)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPrompt => "no_prompt",
            Self::PathNotFound => "path_not_found",
            Self::UserDenied => "user_denied",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::PromptClosed => "prompt_closed",
        }
    }
}

/// Result of a prompting request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    /// Access allowed
    Granted {
        /// The layer (or new grant scope) that allowed it
        source: GrantSource,
    },
    /// Access refused
    Denied {
        /// Why
        reason: DenialReason,
        /// What the user typed when denying, if anything
        user_message: Option<String>,
    },
}

impl PermissionOutcome {
    /// Whether access is granted
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// Kind of audited event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// A non-prompting check
    Check,
    /// A prompt was shown
    Prompt,
    /// A grant was created
    Grant,
    /// A request was denied
    Deny,
    /// A persistent grant was revoked
    Revoke,
    /// Legacy grants were imported
    Migration,
}

impl AuditEvent {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Prompt => "prompt",
            Self::Grant => "grant",
            Self::Deny => "deny",
            Self::Revoke => "revoke",
            Self::Migration => "migration",
        }
    }

    /// Parse the stored representation
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "check" => Some(Self::Check),
            "prompt" => Some(Self::Prompt),
            "grant" => Some(Self::Grant),
            "deny" => Some(Self::Deny),
            "revoke" => Some(Self::Revoke),
            "migration" => Some(Self::Migration),
            _ => None,
        }
    }
}

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Row id, set once stored
    pub id: Option<i64>,
    /// What happened
    pub event: AuditEvent,
    /// Resource kind
    pub grant_type: GrantType,
    /// Action involved
    pub action: PermissionAction,
    /// Path or host
    pub resource: String,
    /// Tool involved
    pub tool_name: Option<String>,
    /// `granted`, `denied`, `pending`, `revoked`, `not_found`, `migrated`
    pub result: String,
    /// Grant scope, where one applies
    pub scope: Option<GrantScope>,
    /// Machine-readable reason (grant source or denial reason)
    pub reason: Option<String>,
    /// Free text from the user
    pub user_message: Option<String>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create an entry stamped now
    #[must_use]
    pub fn new(
        event: AuditEvent,
        action: PermissionAction,
        resource: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            event,
            grant_type: action.grant_type(),
            action,
            resource: resource.into(),
            tool_name: None,
            result: result.into(),
            scope: None,
            reason: None,
            user_message: None,
            timestamp: Utc::now(),
        }
    }

    /// Set the tool name
    #[must_use]
    pub fn with_tool_name(mut self, tool_name: Option<&str>) -> Self {
        self.tool_name = tool_name.map(str::to_string);
        self
    }

    /// Set the scope
    #[must_use]
    pub fn with_scope(mut self, scope: GrantScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Set the reason
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the user message
    #[must_use]
    pub fn with_user_message(mut self, message: Option<String>) -> Self {
        self.user_message = message;
        self
    }
}

/// What happened to an enforcement-relevant grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantChangeKind {
    /// Added
    Granted,
    /// Persistent grant revoked
    Revoked,
    /// In-memory grants dropped at a turn or session boundary
    Cleared,
}

/// Broadcast whenever an `fs_write` or `net_connect` grant changes
#[derive(Debug, Clone, PartialEq)]
pub struct GrantChange {
    /// What happened
    pub kind: GrantChangeKind,
    /// Action of the grant
    pub action: PermissionAction,
    /// Resource of the grant
    pub resource: String,
    /// Scope of the grant
    pub scope: GrantScope,
}
