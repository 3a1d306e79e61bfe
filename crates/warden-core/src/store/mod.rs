//! Policy storage using SQLite
//!
//! Persistent grants, the append-only audit log and the cached list of
//! pre-allowed directories live in one database. Once and session grants
//! never reach it.

mod legacy;
mod migrations;
mod queries;
mod types;


use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use types::{Result, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based policy store
#[derive(Clone)]
pub struct PolicyStore {
    pub(super) pool: Pool<Sqlite>,
}

impl PolicyStore {
    /// Open (creating if needed) the database at `path`
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> Result<Self> {
        // A single connection keeps every query on the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
