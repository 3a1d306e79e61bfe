//! Store errors and row mapping

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::permissions::{
    AuditEntry, AuditEvent, GrantScope, GrantType, PermissionAction, PermissionGrant,
};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Policy store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Row holds a value the domain types do not accept
    #[error("invalid row: {0}")]
    InvalidRow(String),
    /// Schema migration failed
    #[error("migration failed: {0}")]
    Migration(String),
    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_column<T>(column: &str, value: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| StoreError::InvalidRow(format!("unknown {column}: {value}")))
}

/// Internal row type for grant queries
#[derive(FromRow)]
pub(super) struct GrantRow {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub grant_type: String,
    pub action: String,
    pub resource: String,
    pub scope: String,
    pub tool_name: Option<String>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<GrantRow> for PermissionGrant {
    type Error = StoreError;

    fn try_from(row: GrantRow) -> Result<Self> {
        Ok(PermissionGrant {
            id: Some(row.id),
            grant_type: parse_column("type", &row.grant_type, GrantType::parse)?,
            action: parse_column("action", &row.action, PermissionAction::parse)?,
            resource: row.resource,
            scope: parse_column("scope", &row.scope, GrantScope::parse)?,
            tool_name: row.tool_name,
            granted_at: row.granted_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
        })
    }
}

/// Internal row type for audit queries
#[derive(FromRow)]
pub(super) struct AuditRow {
    pub id: i64,
    pub event: String,
    #[sqlx(rename = "type")]
    pub grant_type: String,
    pub action: String,
    pub resource: String,
    pub tool_name: Option<String>,
    pub result: String,
    pub scope: Option<String>,
    pub reason: Option<String>,
    pub user_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self> {
        let scope = row
            .scope
            .as_deref()
            .map(|s| parse_column("scope", s, GrantScope::parse))
            .transpose()?;

        Ok(AuditEntry {
            id: Some(row.id),
            event: parse_column("event", &row.event, AuditEvent::parse)?,
            grant_type: parse_column("type", &row.grant_type, GrantType::parse)?,
            action: parse_column("action", &row.action, PermissionAction::parse)?,
            resource: row.resource,
            tool_name: row.tool_name,
            result: row.result,
            scope,
            reason: row.reason,
            user_message: row.user_message,
            timestamp: row.timestamp,
        })
    }
}

/// Internal row type for pre-allowed directories
#[derive(FromRow)]
pub(super) struct PreAllowedRow {
    pub path: String,
}
