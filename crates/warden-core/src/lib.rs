//! Warden Core - permission decisions for agent tool calls
//!
//! This crate provides the policy side of Warden:
//! - Store: SQLite grants, append-only audit log, legacy JSON migration
//! - Permissions: layered grant resolution and interactive prompting
//! - Interposer: permission checks wrapped around every registered tool
//! - Filter: the permission manager as an egress proxy filter
//! - Sandbox sync: write grant changes pushed into a sandbox provider

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod filter;
pub mod interposer;
pub mod permissions;
pub mod sandbox_sync;
pub mod store;

pub use error::{Error, Result};
pub use filter::PermissionFilter;
pub use interposer::{install, GuardedTool};
pub use permissions::{
    prompt_channel, AuditEntry, AuditEvent, CheckResult, DenialReason, GrantChange,
    GrantChangeKind, GrantScope, GrantSource, GrantType, PermissionAction, PermissionGrant,
    PermissionManager, PermissionManagerConfig, PermissionOutcome, PermissionRequest,
    PromptChannel, PromptDecision, PromptEnvelope,
};
pub use sandbox_sync::sync_sandbox;
pub use store::{PolicyStore, StoreError};
