//! Relational state store: owners, watched folders, processed files.
//!
//! Every mutation runs in one short transaction. The store is opened by a
//! single writer process (primary or replica, never both against one file).

use std::path::{Path, PathBuf};

use docbridge_core::models::{normalize_path, FileKind};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{
    now_millis, FileUpsert, Owner, PortableFileRecord, ProcessedFileRecord, WatchedFolder,
};

#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl StateStore {
    /// Open or create the store at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::migrate_state(&pool).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Open a store that must already exist (e.g. inside an export package).
    pub async fn open_existing(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(format!("state store {}", path.display())));
        }
        let pool = db::connect_existing(path).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Flush the WAL into the main file before it is copied.
    pub async fn checkpoint(&self) -> Result<()> {
        db::checkpoint(&self.pool).await?;
        Ok(())
    }

    // ---- owners ----

    pub async fn ensure_owner(&self, name: &str) -> Result<Owner> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("owner name must not be empty".into()));
        }
        sqlx::query("INSERT INTO owners (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        self.require_owner(name).await
    }

    pub async fn find_owner(&self, name: &str) -> Result<Option<Owner>> {
        let row = sqlx::query("SELECT id, name, created_at FROM owners WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Owner {
            id: r.get("id"),
            name: r.get("name"),
            created_at: r.get("created_at"),
        }))
    }

    /// Like [`find_owner`](Self::find_owner), but an unknown owner is a
    /// validation error.
    pub async fn require_owner(&self, name: &str) -> Result<Owner> {
        self.find_owner(name)
            .await?
            .ok_or_else(|| Error::Validation(format!("unknown owner '{}'", name)))
    }

    pub async fn list_owners(&self) -> Result<Vec<Owner>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM owners ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| Owner {
                id: r.get("id"),
                name: r.get("name"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    // ---- watched folders ----

    /// Start watching `path` for `owner`. The path must be an existing
    /// directory; it is stored canonicalized.
    pub async fn add_folder(&self, path: &Path, owner: &str) -> Result<WatchedFolder> {
        let owner = self.require_owner(owner).await?;
        if !path.is_dir() {
            return Err(Error::Validation(format!(
                "folder does not exist or is not a directory: {}",
                path.display()
            )));
        }
        let canonical = normalize_path(&std::fs::canonicalize(path)?.to_string_lossy());

        let inserted = sqlx::query(
            "INSERT INTO watched_folders (path, owner_id, created_at) VALUES (?, ?, ?) ON CONFLICT(path, owner_id) DO NOTHING",
        )
        .bind(&canonical)
        .bind(owner.id)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(Error::Validation(format!(
                "folder already watched for '{}': {}",
                owner.name, canonical
            )));
        }

        info!(folder = %canonical, owner = %owner.name, "watching folder");
        self.find_folder(&canonical, owner.id)
            .await?
            .ok_or_else(|| Error::NotFound(canonical))
    }

    /// Stop watching a folder. Its processed-file rows are deleted with it;
    /// returns how many.
    pub async fn remove_folder(&self, path: &Path, owner: &str) -> Result<u64> {
        let owner = self.require_owner(owner).await?;
        let key = match std::fs::canonicalize(path) {
            Ok(p) => normalize_path(&p.to_string_lossy()),
            Err(_) => normalize_path(&path.to_string_lossy()),
        };
        let folder = self
            .find_folder(&key, owner.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("watched folder {}", key)))?;

        let mut tx = self.pool.begin().await?;
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_files WHERE folder_id = ?")
            .bind(folder.id)
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM watched_folders WHERE id = ?")
            .bind(folder.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(folder = %key, files, "stopped watching folder");
        Ok(files as u64)
    }

    pub async fn find_folder(&self, path: &str, owner_id: i64) -> Result<Option<WatchedFolder>> {
        let row = sqlx::query(
            r#"
            SELECT f.id, f.path, f.owner_id, o.name AS owner, f.created_at
            FROM watched_folders f JOIN owners o ON o.id = f.owner_id
            WHERE f.path = ? AND f.owner_id = ?
            "#,
        )
        .bind(path)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_folder))
    }

    pub async fn get_folder(&self, id: i64) -> Result<Option<WatchedFolder>> {
        let row = sqlx::query(
            r#"
            SELECT f.id, f.path, f.owner_id, o.name AS owner, f.created_at
            FROM watched_folders f JOIN owners o ON o.id = f.owner_id
            WHERE f.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_folder))
    }

    pub async fn list_folders(&self, owner: Option<&str>) -> Result<Vec<WatchedFolder>> {
        let rows = sqlx::query(
            r#"
            SELECT f.id, f.path, f.owner_id, o.name AS owner, f.created_at
            FROM watched_folders f JOIN owners o ON o.id = f.owner_id
            WHERE (?1 IS NULL OR o.name = ?1)
            ORDER BY o.name, f.path
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_folder).collect())
    }

    // ---- processed files ----

    pub async fn get_file(
        &self,
        file_path: &str,
        owner_id: i64,
    ) -> Result<Option<ProcessedFileRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, file_path, owner_id, folder_id, content_hash, modified_at, processed_at, file_kind
            FROM processed_files WHERE file_path = ? AND owner_id = ?
            "#,
        )
        .bind(file_path)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    /// Insert or update the row for `(file_path, owner)`, stamping
    /// `processed_at` with the current time.
    pub async fn upsert_file(&self, rec: &FileUpsert) -> Result<ProcessedFileRecord> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO processed_files
                (file_path, owner_id, folder_id, content_hash, modified_at, processed_at, file_kind)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path, owner_id) DO UPDATE SET
                folder_id = excluded.folder_id,
                content_hash = excluded.content_hash,
                modified_at = excluded.modified_at,
                processed_at = excluded.processed_at,
                file_kind = excluded.file_kind
            "#,
        )
        .bind(&rec.file_path)
        .bind(rec.owner_id)
        .bind(rec.folder_id)
        .bind(&rec.content_hash)
        .bind(rec.modified_at)
        .bind(now_millis())
        .bind(rec.file_kind.as_str())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT id, file_path, owner_id, folder_id, content_hash, modified_at, processed_at, file_kind
            FROM processed_files WHERE file_path = ? AND owner_id = ?
            "#,
        )
        .bind(&rec.file_path)
        .bind(rec.owner_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row_to_record(&row)
    }

    /// Distinct file paths processed strictly after `since_ms`.
    pub async fn processed_since(&self, since_ms: i64) -> Result<Vec<String>> {
        let paths = sqlx::query_scalar(
            "SELECT DISTINCT file_path FROM processed_files WHERE processed_at > ? ORDER BY file_path",
        )
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(paths)
    }

    pub async fn count_files(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    /// Most recent `processed_at`, if any file has been processed.
    pub async fn last_processed_at(&self) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(processed_at) FROM processed_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(ts)
    }

    /// Every processed-file row with owner and folder resolved to names.
    pub async fn export_records(&self) -> Result<Vec<PortableFileRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT p.file_path, o.name AS owner, f.path AS folder_path, p.content_hash,
                   p.modified_at, p.processed_at, p.file_kind
            FROM processed_files p
            JOIN owners o ON o.id = p.owner_id
            JOIN watched_folders f ON f.id = p.folder_id
            ORDER BY p.file_path
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(PortableFileRecord {
                    file_path: r.get("file_path"),
                    owner: r.get("owner"),
                    folder_path: r.get("folder_path"),
                    content_hash: r.get("content_hash"),
                    modified_at: r.get("modified_at"),
                    processed_at: r.get("processed_at"),
                    file_kind: parse_kind(r.get("file_kind"))?,
                })
            })
            .collect()
    }

    /// Update-or-insert incoming rows by `(file_path, owner)` in one
    /// transaction. Owners and folders missing locally are created; local
    /// rows absent from `records` are left alone. Returns rows written.
    pub async fn merge_records(&self, records: &[PortableFileRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();
        let mut written = 0u64;

        for rec in records {
            sqlx::query("INSERT INTO owners (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
                .bind(&rec.owner)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            let owner_id: i64 = sqlx::query_scalar("SELECT id FROM owners WHERE name = ?")
                .bind(&rec.owner)
                .fetch_one(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT INTO watched_folders (path, owner_id, created_at) VALUES (?, ?, ?) ON CONFLICT(path, owner_id) DO NOTHING",
            )
            .bind(&rec.folder_path)
            .bind(owner_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            let folder_id: i64 =
                sqlx::query_scalar("SELECT id FROM watched_folders WHERE path = ? AND owner_id = ?")
                    .bind(&rec.folder_path)
                    .bind(owner_id)
                    .fetch_one(&mut *tx)
                    .await?;

            sqlx::query(
                r#"
                INSERT INTO processed_files
                    (file_path, owner_id, folder_id, content_hash, modified_at, processed_at, file_kind)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(file_path, owner_id) DO UPDATE SET
                    folder_id = excluded.folder_id,
                    content_hash = excluded.content_hash,
                    modified_at = excluded.modified_at,
                    processed_at = excluded.processed_at,
                    file_kind = excluded.file_kind
                "#,
            )
            .bind(&rec.file_path)
            .bind(owner_id)
            .bind(folder_id)
            .bind(&rec.content_hash)
            .bind(rec.modified_at)
            .bind(rec.processed_at)
            .bind(rec.file_kind.as_str())
            .execute(&mut *tx)
            .await?;
            written += 1;
        }

        tx.commit().await?;
        debug!(written, "merged processed-file records");
        Ok(written)
    }
}

fn row_to_folder(r: &SqliteRow) -> WatchedFolder {
    WatchedFolder {
        id: r.get("id"),
        path: r.get("path"),
        owner_id: r.get("owner_id"),
        owner: r.get("owner"),
        created_at: r.get("created_at"),
    }
}

fn row_to_record(r: &SqliteRow) -> Result<ProcessedFileRecord> {
    Ok(ProcessedFileRecord {
        id: r.get("id"),
        file_path: r.get("file_path"),
        owner_id: r.get("owner_id"),
        folder_id: r.get("folder_id"),
        content_hash: r.get("content_hash"),
        modified_at: r.get("modified_at"),
        processed_at: r.get("processed_at"),
        file_kind: parse_kind(r.get("file_kind"))?,
    })
}

fn parse_kind(kind: String) -> Result<FileKind> {
    kind.parse()
        .map_err(|e: docbridge_core::models::UnknownFileKind| Error::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> StateStore {
        StateStore::open(&tmp.path().join("state.sqlite"))
            .await
            .unwrap()
    }

    fn upsert(path: &str, owner_id: i64, folder_id: i64, hash: &str) -> FileUpsert {
        FileUpsert {
            file_path: path.to_string(),
            owner_id,
            folder_id,
            content_hash: hash.to_string(),
            modified_at: 1,
            file_kind: FileKind::Text,
        }
    }

    #[tokio::test]
    async fn test_add_folder_validates_path_and_duplicates() {
        let tmp = TempDir::new().unwrap();
        let state = store(&tmp).await;
        state.ensure_owner("alice").await.unwrap();

        let missing = state.add_folder(&tmp.path().join("nope"), "alice").await;
        assert!(matches!(missing, Err(Error::Validation(_))));

        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        state.add_folder(&docs, "alice").await.unwrap();
        let dup = state.add_folder(&docs, "alice").await;
        assert!(matches!(dup, Err(Error::Validation(_))));

        let unknown_owner = state.add_folder(&docs, "bob").await;
        assert!(matches!(unknown_owner, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_path_and_owner() {
        let tmp = TempDir::new().unwrap();
        let state = store(&tmp).await;
        let owner = state.ensure_owner("alice").await.unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        let folder = state.add_folder(&docs, "alice").await.unwrap();

        state
            .upsert_file(&upsert("/d/a.txt", owner.id, folder.id, "h1"))
            .await
            .unwrap();
        let rec = state
            .upsert_file(&upsert("/d/a.txt", owner.id, folder.id, "h2"))
            .await
            .unwrap();

        assert_eq!(state.count_files().await.unwrap(), 1);
        assert_eq!(rec.content_hash, "h2");
    }

    #[tokio::test]
    async fn test_remove_folder_cascades_records() {
        let tmp = TempDir::new().unwrap();
        let state = store(&tmp).await;
        let owner = state.ensure_owner("alice").await.unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        let folder = state.add_folder(&docs, "alice").await.unwrap();
        state
            .upsert_file(&upsert("/d/a.txt", owner.id, folder.id, "h"))
            .await
            .unwrap();

        assert_eq!(state.remove_folder(&docs, "alice").await.unwrap(), 1);
        assert_eq!(state.count_files().await.unwrap(), 0);
        assert!(matches!(
            state.remove_folder(&docs, "alice").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_processed_since_is_strict() {
        let tmp = TempDir::new().unwrap();
        let state = store(&tmp).await;
        let owner = state.ensure_owner("alice").await.unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        let folder = state.add_folder(&docs, "alice").await.unwrap();

        let first = state
            .upsert_file(&upsert("/d/a.txt", owner.id, folder.id, "h"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        state
            .upsert_file(&upsert("/d/b.txt", owner.id, folder.id, "h"))
            .await
            .unwrap();

        let since = state.processed_since(first.processed_at).await.unwrap();
        assert_eq!(since, vec!["/d/b.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_merge_records_creates_owner_and_folder() {
        let tmp = TempDir::new().unwrap();
        let state = store(&tmp).await;
        let incoming = vec![PortableFileRecord {
            file_path: "/primary/docs/a.txt".into(),
            owner: "alice".into(),
            folder_path: "/primary/docs".into(),
            content_hash: "h".into(),
            modified_at: 5,
            processed_at: 10,
            file_kind: FileKind::Text,
        }];

        assert_eq!(state.merge_records(&incoming).await.unwrap(), 1);
        assert_eq!(state.merge_records(&incoming).await.unwrap(), 1);
        assert_eq!(state.count_files().await.unwrap(), 1);
        assert_eq!(state.export_records().await.unwrap(), incoming);
        assert_eq!(state.list_folders(Some("alice")).await.unwrap().len(), 1);
    }
}
