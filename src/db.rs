//! SQLite connection management.
//!
//! Both the state store and the SQLite knowledge base open their files
//! through here: WAL journal mode, foreign keys on, up to 5 pooled
//! connections. Writers are serialized by SQLite; readers proceed
//! concurrently under WAL.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open (creating if missing) a read-write pool on `path`.
///
/// Parent directories are created as needed.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open an existing database without creating it. Used for files that
/// arrive inside export packages.
pub async fn connect_existing(path: &Path) -> Result<SqlitePool> {
    if !path.is_file() {
        anyhow::bail!("database file not found: {}", path.display());
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(false)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Fold the write-ahead log back into the main database file so a plain
/// file copy captures every committed write.
pub async fn checkpoint(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .execute(pool)
        .await?;
    Ok(())
}
