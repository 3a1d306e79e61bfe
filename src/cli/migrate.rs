//! `warden migrate` - legacy JSON import

use super::open_store;
use crate::settings::AppConfig;
use anyhow::{bail, Result};
use std::path::PathBuf;

/// Import the legacy grant file at `path` (or the configured one).
pub async fn run(config: &AppConfig, path: Option<PathBuf>) -> Result<()> {
    let Some(path) = path.or_else(|| config.permissions.legacy_json()) else {
        bail!("No legacy file given and permissions.legacy_json is not set");
    };

    let store = open_store(config).await?;
    let migrated = store.migrate_from_json(&path).await?;
    store.close().await;

    println!("Migrated {} grant(s) from {}", migrated, path.display());
    Ok(())
}
