use super::types::{AuditRow, GrantRow, PreAllowedRow, Result};
use super::PolicyStore;
use crate::permissions::{AuditEntry, GrantScope, PermissionAction, PermissionGrant};
use chrono::Utc;
use sqlx::{Executor, Sqlite};
use std::path::{Path, PathBuf};

/// Insert or replace on the `(type, action, resource, scope)` key.
pub(super) async fn insert_grant_with<'e, E>(executor: E, grant: &PermissionGrant) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT OR REPLACE INTO permission_grants (
            type, action, resource, scope, tool_name, granted_at, expires_at, revoked_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(grant.grant_type.as_str())
    .bind(grant.action.as_str())
    .bind(&grant.resource)
    .bind(grant.scope.as_str())
    .bind(&grant.tool_name)
    .bind(grant.granted_at)
    .bind(grant.expires_at)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

pub(super) async fn log_audit_with<'e, E>(executor: E, entry: &AuditEntry) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO permission_audit (
            event, type, action, resource, tool_name, result, scope, reason, user_message, timestamp
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.event.as_str())
    .bind(entry.grant_type.as_str())
    .bind(entry.action.as_str())
    .bind(&entry.resource)
    .bind(&entry.tool_name)
    .bind(&entry.result)
    .bind(entry.scope.map(|s| s.as_str()))
    .bind(&entry.reason)
    .bind(&entry.user_message)
    .bind(entry.timestamp)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

fn active(rows: Vec<GrantRow>) -> Result<Vec<PermissionGrant>> {
    let now = Utc::now();
    let mut grants = Vec::with_capacity(rows.len());
    for row in rows {
        let grant = PermissionGrant::try_from(row)?;
        if grant.is_active(now) {
            grants.push(grant);
        }
    }
    Ok(grants)
}

impl PolicyStore {
    /// Insert a grant, replacing (and un-revoking) any row with the same key.
    ///
    /// Returns the row id.
    pub async fn insert_grant(&self, grant: &PermissionGrant) -> Result<i64> {
        insert_grant_with(&self.pool, grant).await
    }

    /// Soft-delete the persistent grant for `(action, resource)`.
    ///
    /// Returns `false` when no unrevoked row matched.
    pub async fn revoke_grant(&self, action: PermissionAction, resource: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE permission_grants SET revoked_at = ?
            WHERE type = ? AND action = ? AND resource = ? AND scope = ? AND revoked_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(action.grant_type().as_str())
        .bind(action.as_str())
        .bind(resource)
        .bind(GrantScope::Persistent.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active grant whose resource equals `resource` exactly
    pub async fn find_active_grant(
        &self,
        action: PermissionAction,
        resource: &str,
    ) -> Result<Option<PermissionGrant>> {
        let rows: Vec<GrantRow> = sqlx::query_as(
            r#"
            SELECT * FROM permission_grants
            WHERE type = ? AND action = ? AND resource = ? AND revoked_at IS NULL
            "#,
        )
        .bind(action.grant_type().as_str())
        .bind(action.as_str())
        .bind(resource)
        .fetch_all(&self.pool)
        .await?;

        Ok(active(rows)?.into_iter().next())
    }

    /// Active grant on `resource` or on one of its ancestor directories.
    ///
    /// The closest ancestor wins.
    pub async fn find_covering_grant(
        &self,
        action: PermissionAction,
        resource: &str,
    ) -> Result<Option<PermissionGrant>> {
        let rows: Vec<GrantRow> = sqlx::query_as(
            r#"
            SELECT * FROM permission_grants
            WHERE type = ? AND action = ? AND revoked_at IS NULL
              AND (
                resource = ?
                OR resource = '/'
                OR substr(?, 1, length(resource) + 1) = resource || '/'
              )
            ORDER BY length(resource) DESC
            "#,
        )
        .bind(action.grant_type().as_str())
        .bind(action.as_str())
        .bind(resource)
        .bind(resource)
        .fetch_all(&self.pool)
        .await?;

        Ok(active(rows)?.into_iter().next())
    }

    /// All active grants, optionally restricted to one action
    pub async fn find_all_active_grants(
        &self,
        action: Option<PermissionAction>,
    ) -> Result<Vec<PermissionGrant>> {
        let rows: Vec<GrantRow> = match action {
            Some(action) => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM permission_grants
                    WHERE action = ? AND revoked_at IS NULL
                    ORDER BY resource
                    "#,
                )
                .bind(action.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM permission_grants WHERE revoked_at IS NULL ORDER BY action, resource",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        active(rows)
    }

    /// Append an audit record
    pub async fn log_audit(&self, entry: &AuditEntry) -> Result<i64> {
        log_audit_with(&self.pool, entry).await
    }

    /// Most recent audit records, newest first
    pub async fn recent_audit(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> =
            sqlx::query_as("SELECT * FROM permission_audit ORDER BY id DESC LIMIT ?")
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }

    /// Record a pre-allowed directory; already-known paths are left alone
    pub async fn add_pre_allowed_dir(&self, path: &Path) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO pre_allowed_dirs (path, added_at) VALUES (?, ?)")
            .bind(path.to_string_lossy().into_owned())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Every recorded pre-allowed directory, in insertion order
    pub async fn list_pre_allowed_dirs(&self) -> Result<Vec<PathBuf>> {
        let rows: Vec<PreAllowedRow> =
            sqlx::query_as("SELECT path FROM pre_allowed_dirs ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|row| PathBuf::from(row.path)).collect())
    }
}
