//! SQLite-backed [`KnowledgeBase`].
//!
//! The knowledge base is a directory holding a single `kb.sqlite` file, so
//! it can be copied into an export package as-is. Vectors are stored as
//! little-endian `f32` blobs next to the chunk text; similarity queries
//! are brute-force cosine over the filtered set.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use docbridge_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docbridge_core::models::{normalize_path, ChunkMetadata, DocumentChunk};
use docbridge_core::store::{
    check_batch_dimension, ChunkFilter, Include, KnowledgeBase, KnowledgeBaseStats, QueryMatch,
};

use crate::db;
use crate::migrate;
use crate::models::now_millis;

/// File name of the database inside a knowledge-base directory.
pub const KB_FILE: &str = "kb.sqlite";

pub struct SqliteKnowledgeBase {
    pool: SqlitePool,
    dir: PathBuf,
}

impl SqliteKnowledgeBase {
    /// Open or create the knowledge base in `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create knowledge base dir: {}", dir.display()))?;
        let pool = db::connect(&dir.join(KB_FILE)).await?;
        migrate::migrate_knowledge_base(&pool).await?;
        Ok(Self {
            pool,
            dir: dir.to_path_buf(),
        })
    }

    /// Open a knowledge base that must already exist.
    pub async fn open_existing(dir: &Path) -> Result<Self> {
        let pool = db::connect_existing(&dir.join(KB_FILE)).await?;
        Ok(Self {
            pool,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn stored_dimension(&self) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar(
            "SELECT dims FROM chunks WHERE embedding IS NOT NULL AND dims > 0 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(dims.map(|d| d as usize))
    }

    async fn load(&self, filter: &ChunkFilter, with_vectors: bool) -> Result<Vec<DocumentChunk>> {
        let rows = match filter {
            ChunkFilter::FilePath(path) => {
                sqlx::query(
                    "SELECT id, content, metadata_json, embedding FROM chunks WHERE file_path = ? ORDER BY rowid",
                )
                .bind(normalize_path(path))
                .fetch_all(&self.pool)
                .await?
            }
            _ => {
                sqlx::query("SELECT id, content, metadata_json, embedding FROM chunks ORDER BY rowid")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row, with_vectors)?;
            if filter.matches(&chunk) {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }
}

fn row_to_chunk(row: &SqliteRow, with_vectors: bool) -> Result<DocumentChunk> {
    let id: String = row.get("id");
    let metadata_json: String = row.get("metadata_json");
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("Corrupt metadata on chunk {}", id))?;
    let embedding = if with_vectors {
        let blob: Option<Vec<u8>> = row.get("embedding");
        blob.map(|b| blob_to_vec(&b))
    } else {
        None
    };
    Ok(DocumentChunk {
        id: Some(id),
        content: row.get("content"),
        metadata,
        embedding,
    })
}

#[async_trait]
impl KnowledgeBase for SqliteKnowledgeBase {
    async fn add(&self, chunks: &[DocumentChunk]) -> Result<Vec<String>> {
        let expected = self.stored_dimension().await?;
        check_batch_dimension(chunks, expected)?;

        let now = now_millis();
        let mut ids = Vec::with_capacity(chunks.len());
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let id = Uuid::new_v4().to_string();
            let vector = chunk.embedding.as_ref().filter(|v| !v.is_empty());
            sqlx::query(
                r#"
                INSERT INTO chunks (id, file_path, content, metadata_json, embedding, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(chunk.file_path())
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(vector.map(|v| vec_to_blob(v)))
            .bind(vector.map(|v| v.len() as i64))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<QueryMatch>> {
        let mut matches: Vec<QueryMatch> = self
            .load(filter, true)
            .await?
            .into_iter()
            .filter(|c| c.embedding.as_ref().is_some_and(|e| e.len() == vector.len()))
            .map(|c| {
                let score = c
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(vector, e))
                    .unwrap_or(0.0);
                QueryMatch { chunk: c, score }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete_by_path(&self, file_path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(normalize_path(file_path))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<KnowledgeBaseStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN embedding IS NOT NULL AND dims > 0 THEN 1 ELSE 0 END), 0) AS embedded,
                   COUNT(DISTINCT file_path) AS files
            FROM chunks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(KnowledgeBaseStats {
            total_chunks: row.get::<i64, _>("total") as u64,
            embedded_chunks: row.get::<i64, _>("embedded") as u64,
            distinct_files: row.get::<i64, _>("files") as u64,
        })
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        self.stored_dimension().await
    }

    async fn get(&self, filter: &ChunkFilter, include: Include) -> Result<Vec<DocumentChunk>> {
        Ok(self
            .load(filter, include.embeddings)
            .await?
            .into_iter()
            .map(|c| include.apply(c))
            .collect())
    }

    async fn flush(&self) -> Result<()> {
        db::checkpoint(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbridge_core::models::FileKind;
    use tempfile::TempDir;

    fn chunk(name: &str, v: Vec<f32>) -> DocumentChunk {
        DocumentChunk::new(
            format!("content of {}", name),
            ChunkMetadata::new(name, "/docs", FileKind::Text).with("chunk_index", 0i64),
        )
        .with_embedding(v)
    }

    #[tokio::test]
    async fn test_add_assigns_fresh_ids_and_persists() {
        let tmp = TempDir::new().unwrap();
        let kb = SqliteKnowledgeBase::open(tmp.path()).await.unwrap();

        let mut c = chunk("a.txt", vec![1.0, 0.0]);
        c.id = Some("caller-id".into());
        let ids = kb.add(&[c]).await.unwrap();
        assert_ne!(ids[0], "caller-id");
        kb.close().await;

        let kb = SqliteKnowledgeBase::open_existing(tmp.path()).await.unwrap();
        let all = kb.get(&ChunkFilter::All, Include::ALL).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id.as_deref(), Some(ids[0].as_str()));
        assert_eq!(all[0].embedding, Some(vec![1.0, 0.0]));
        assert_eq!(all[0].metadata.get("chunk_index").and_then(|v| v.as_i64()), Some(0));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_whole_batch() {
        let tmp = TempDir::new().unwrap();
        let kb = SqliteKnowledgeBase::open(tmp.path()).await.unwrap();
        kb.add(&[chunk("a.txt", vec![1.0, 0.0])]).await.unwrap();

        let err = kb
            .add(&[chunk("b.txt", vec![1.0, 0.0]), chunk("c.txt", vec![1.0, 0.0, 0.0])])
            .await;
        assert!(err.is_err());
        assert_eq!(kb.stats().await.unwrap().total_chunks, 1);
        assert_eq!(kb.dimension().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_delete_by_path_and_stats() {
        let tmp = TempDir::new().unwrap();
        let kb = SqliteKnowledgeBase::open(tmp.path()).await.unwrap();
        kb.add(&[
            chunk("a.txt", vec![1.0, 0.0]),
            chunk("a.txt", vec![0.0, 1.0]),
            chunk("b.txt", vec![1.0, 1.0]),
        ])
        .await
        .unwrap();

        let stats = kb.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.distinct_files, 2);

        assert_eq!(kb.delete_by_path("/docs/a.txt").await.unwrap(), 2);
        assert_eq!(kb.delete_by_path("/docs/a.txt").await.unwrap(), 0);
        assert_eq!(kb.stats().await.unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn test_query_ranks_by_cosine() {
        let tmp = TempDir::new().unwrap();
        let kb = SqliteKnowledgeBase::open(tmp.path()).await.unwrap();
        kb.add(&[chunk("x.txt", vec![1.0, 0.0]), chunk("y.txt", vec![0.0, 1.0])])
            .await
            .unwrap();

        let hits = kb.query(&[0.9, 0.1], 1, &ChunkFilter::All).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.metadata.filename, "x.txt");
    }

    #[tokio::test]
    async fn test_metadata_only_include_drops_vectors() {
        let tmp = TempDir::new().unwrap();
        let kb = SqliteKnowledgeBase::open(tmp.path()).await.unwrap();
        kb.add(&[chunk("a.txt", vec![1.0, 0.0])]).await.unwrap();

        let got = kb.get(&ChunkFilter::All, Include::METADATA).await.unwrap();
        assert!(got[0].embedding.is_none());
    }
}
