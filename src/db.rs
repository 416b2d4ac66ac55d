//! SQLite connection pools.
//!
//! The primary store uses two pools over the same WAL-mode file: a
//! single-connection writer that serializes every mutation, and a small
//! reader pool that serves queries concurrently.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

const READER_CONNECTIONS: u32 = 4;

#[derive(Clone)]
pub struct Pools {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl Pools {
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }
}

fn options(db_path: &Path) -> Result<SqliteConnectOptions> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    Ok(options)
}

pub async fn connect(db_path: &Path) -> Result<Pools> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let writer = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options(db_path)?)
        .await?;

    // The writer creates the file and switches it to WAL before readers attach.
    crate::migrate::run_migrations(&writer).await?;

    let reader = SqlitePoolOptions::new()
        .max_connections(READER_CONNECTIONS)
        .connect_with(options(db_path)?.read_only(true))
        .await?;

    Ok(Pools { reader, writer })
}

/// Open an external SQLite file strictly read-only, without creating it.
pub async fn connect_read_only(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .read_only(true)
        .create_if_missing(false)
        .busy_timeout(Duration::from_secs(1));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}
