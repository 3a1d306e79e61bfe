use super::PolicyStore;
use super::types::{Result, StoreError};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &[(&str, &str)] = &[
    (
        "schema_version",
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        )
        "#,
    ),
    (
        "permission_grants",
        r#"
        CREATE TABLE IF NOT EXISTS permission_grants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            scope TEXT NOT NULL,
            tool_name TEXT,
            granted_at TIMESTAMP NOT NULL,
            expires_at TIMESTAMP,
            revoked_at TIMESTAMP,
            UNIQUE (type, action, resource, scope)
        )
        "#,
    ),
    (
        "permission_audit",
        r#"
        CREATE TABLE IF NOT EXISTS permission_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event TEXT NOT NULL,
            type TEXT NOT NULL,
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            tool_name TEXT,
            result TEXT NOT NULL,
            scope TEXT,
            reason TEXT,
            user_message TEXT,
            timestamp TIMESTAMP NOT NULL
        )
        "#,
    ),
    (
        "pre_allowed_dirs",
        r#"
        CREATE TABLE IF NOT EXISTS pre_allowed_dirs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            added_at TIMESTAMP NOT NULL
        )
        "#,
    ),
    (
        "idx_grants_lookup",
        "CREATE INDEX IF NOT EXISTS idx_grants_lookup ON permission_grants(type, action, revoked_at)",
    ),
    (
        "idx_audit_timestamp",
        "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON permission_audit(timestamp)",
    ),
];

impl PolicyStore {
    /// Run database migrations
    pub(super) async fn migrate(&self) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        for &(name, sql) in SCHEMA {
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        }

        sqlx::query("INSERT OR IGNORE INTO schema_version (id, version) VALUES (1, ?)")
            .bind(SCHEMA_VERSION)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Migration(format!("schema_version row: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(())
    }

    /// Current schema version
    pub async fn schema_version(&self) -> Result<i64> {
        let version: i64 = sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }
}
