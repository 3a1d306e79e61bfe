//! Import of the legacy JSON grant file

use super::queries::{insert_grant_with, log_audit_with};
use super::types::{Result, StoreError};
use super::PolicyStore;
use crate::permissions::{
    path_key, resolve_path, AuditEntry, AuditEvent, GrantScope, PermissionAction, PermissionGrant,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Deserialize)]
struct LegacyFile {
    #[serde(default)]
    grants: Vec<LegacyGrant>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyGrant {
    resource: String,
    scope: String,
    granted_at: Option<LegacyTimestamp>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyTimestamp {
    Millis(i64),
    Text(String),
}

impl LegacyTimestamp {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Directory key for a legacy resource, matching what `grant()` stores.
///
/// A leading `~` expands to the home directory. Relative entries have no
/// anchor and are kept as written.
fn normalize_resource(raw: &str) -> String {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(raw),
        },
        _ => PathBuf::from(raw),
    };
    if !expanded.is_absolute() {
        return raw.to_string();
    }
    path_key(&resolve_path(&expanded, Path::new("/")))
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

impl PolicyStore {
    /// One-time import of a legacy JSON grant file.
    ///
    /// Every `persistent` entry becomes an `fs_read` persistent grant and gets
    /// a `migration` audit row in the same transaction. The file is renamed to
    /// `<path>.bak` once the transaction commits. Missing or unparseable files
    /// import nothing and are left untouched.
    pub async fn migrate_from_json(&self, path: &Path) -> Result<usize> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let legacy: LegacyFile = match serde_json::from_str(&content) {
            Ok(legacy) => legacy,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed legacy grant file");
                return Ok(0);
            }
        };

        let mut tx = self.pool.begin().await?;
        let mut migrated = 0;

        for entry in legacy.grants {
            if entry.scope != GrantScope::Persistent.as_str() {
                continue;
            }

            let mut grant = PermissionGrant::new(
                PermissionAction::FsRead,
                normalize_resource(&entry.resource),
                GrantScope::Persistent,
            );
            if let Some(at) = entry.granted_at.as_ref().and_then(LegacyTimestamp::to_datetime) {
                grant.granted_at = at;
            }

            insert_grant_with(&mut *tx, &grant).await?;

            let audit = AuditEntry::new(
                AuditEvent::Migration,
                grant.action,
                grant.resource.clone(),
                "migrated",
            )
            .with_scope(GrantScope::Persistent)
            .with_reason(format!("legacy:{}", path.display()));
            log_audit_with(&mut *tx, &audit).await?;

            migrated += 1;
        }

        tx.commit().await?;

        let backup = backup_path(path);
        tokio::fs::rename(path, &backup).await?;

        info!(
            path = %path.display(),
            backup = %backup.display(),
            migrated,
            "Migrated legacy grants"
        );
        Ok(migrated)
    }
}
