//! Schema migrations. Idempotent: every statement is `IF NOT EXISTS`.

use anyhow::Result;
use sqlx::SqlitePool;

/// Owners, watched folders, and processed-file records.
pub async fn migrate_state(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS owners (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watched_folders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            owner_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(path, owner_id),
            FOREIGN KEY (owner_id) REFERENCES owners(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (file_path, owner); folder deletion cascades.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            owner_id INTEGER NOT NULL,
            folder_id INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            modified_at INTEGER NOT NULL,
            processed_at INTEGER NOT NULL,
            file_kind TEXT NOT NULL CHECK (file_kind IN ('text', 'image')),
            UNIQUE(file_path, owner_id),
            FOREIGN KEY (owner_id) REFERENCES owners(id) ON DELETE CASCADE,
            FOREIGN KEY (folder_id) REFERENCES watched_folders(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_processed_files_processed_at ON processed_files(processed_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_processed_files_folder_id ON processed_files(folder_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Chunk table for the SQLite knowledge base.
pub async fn migrate_knowledge_base(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            file_path TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            dims INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path)")
        .execute(pool)
        .await?;

    Ok(())
}
