//! SQLite pool for subscriptions, the delivery ledger and alert state.
//!
//! The news cycle commits delivery records from several subscriber workers
//! while the alert cycle may be writing its own state, so the database runs
//! in WAL mode with a busy timeout instead of failing on lock contention.
//! The pool holds one connection per subscriber worker plus one for the
//! alert cycle and the CLI.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::Config;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the configured database, creating the file and its directory.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let connections = config.news.subscriber_workers.max(1) as u32 + 1;
    open(&config.db.path, connections).await
}

async fn open(path: &Path, connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(connections)
        .connect_with(options)
        .await
        .with_context(|| format!("cannot open newsbell database {}", path.display()))
}
