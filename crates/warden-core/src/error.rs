//! Error types for warden-core

use crate::store::StoreError;
use thiserror::Error;

/// Core error type
///
/// Permission denials are not errors; they come back as
/// [`PermissionOutcome::Denied`](crate::permissions::PermissionOutcome).
#[derive(Debug, Error)]
pub enum Error {
    /// Policy store failure (including audit writes)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Tool, sandbox or proxy error
    #[error("tool error: {0}")]
    Tool(#[from] warden_tools::Error),

    /// Path that cannot be resolved
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
