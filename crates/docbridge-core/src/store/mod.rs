//! Knowledge-base abstraction.
//!
//! The [`KnowledgeBase`] trait is the collection of [`DocumentChunk`]s the
//! pipeline writes to, the export packager reads from, and the sync
//! reconciler merges into. Backends: [`memory::InMemoryKnowledgeBase`]
//! here, and the SQLite-backed store in the app crate.
//!
//! Every backend enforces one invariant on insert: all stored vectors share
//! a single dimension. The first embedded chunk fixes it.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{normalize_path, DocumentChunk, MetadataValue};

/// Selects chunks for [`KnowledgeBase::get`] and [`KnowledgeBase::query`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkFilter {
    All,
    /// Chunks whose reconstructed path equals this path.
    FilePath(String),
    /// Chunks whose metadata contains every listed key with an equal value.
    Metadata(BTreeMap<String, MetadataValue>),
}

impl ChunkFilter {
    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        match self {
            ChunkFilter::All => true,
            ChunkFilter::FilePath(path) => chunk.file_path() == normalize_path(path),
            ChunkFilter::Metadata(wanted) => wanted
                .iter()
                .all(|(k, v)| chunk.metadata.get(k).as_ref() == Some(v)),
        }
    }
}

/// Which payloads [`KnowledgeBase::get`] returns. Metadata and ids are
/// always included; excluded content comes back empty and excluded vectors
/// as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Include {
    pub content: bool,
    pub embeddings: bool,
}

impl Include {
    pub const ALL: Include = Include {
        content: true,
        embeddings: true,
    };
    pub const METADATA: Include = Include {
        content: false,
        embeddings: false,
    };
    pub const EMBEDDINGS: Include = Include {
        content: false,
        embeddings: true,
    };

    /// Strip the payloads this selection excludes.
    pub fn apply(&self, mut chunk: DocumentChunk) -> DocumentChunk {
        if !self.content {
            chunk.content.clear();
        }
        if !self.embeddings {
            chunk.embedding = None;
        }
        chunk
    }
}

/// A chunk returned by similarity query.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Aggregate counts for a knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeBaseStats {
    pub total_chunks: u64,
    pub embedded_chunks: u64,
    pub distinct_files: u64,
}

/// Abstract chunk collection.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](KnowledgeBase::add) | Insert chunks, assigning fresh ids |
/// | [`query`](KnowledgeBase::query) | Top-k cosine similarity, filtered |
/// | [`delete_by_path`](KnowledgeBase::delete_by_path) | Drop every chunk of one source file |
/// | [`stats`](KnowledgeBase::stats) | Counts |
/// | [`dimension`](KnowledgeBase::dimension) | Current vector dimension, if any vector is stored |
/// | [`get`](KnowledgeBase::get) | Bulk read |
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Insert chunks and return their assigned ids, in input order.
    ///
    /// Any id already set on an input chunk is ignored. Fails without
    /// inserting anything if a vector's length disagrees with the stored
    /// dimension or with another vector in the batch.
    async fn add(&self, chunks: &[DocumentChunk]) -> Result<Vec<String>>;

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<QueryMatch>>;

    /// Delete all chunks whose reconstructed path equals `file_path`.
    /// Returns the number deleted.
    async fn delete_by_path(&self, file_path: &str) -> Result<u64>;

    async fn stats(&self) -> Result<KnowledgeBaseStats>;

    async fn dimension(&self) -> Result<Option<usize>>;

    async fn get(&self, filter: &ChunkFilter, include: Include) -> Result<Vec<DocumentChunk>>;

    /// Make all writes durable in the backing storage.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Check that every vector in `chunks` has `expected` length, or one shared
/// length when `expected` is `None`. Returns the batch dimension.
pub fn check_batch_dimension(
    chunks: &[DocumentChunk],
    expected: Option<usize>,
) -> Result<Option<usize>> {
    let mut dim = expected;
    for chunk in chunks {
        let Some(vec) = chunk.embedding.as_ref().filter(|v| !v.is_empty()) else {
            continue;
        };
        match dim {
            None => dim = Some(vec.len()),
            Some(d) if d != vec.len() => anyhow::bail!(
                "embedding dimension mismatch for {}: expected {}, got {}",
                chunk.file_path(),
                d,
                vec.len()
            ),
            Some(_) => {}
        }
    }
    Ok(dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, FileKind};

    fn chunk(folder: &str, name: &str) -> DocumentChunk {
        DocumentChunk::new("text", ChunkMetadata::new(name, folder, FileKind::Text))
    }

    #[test]
    fn test_path_filter_normalizes_separators() {
        let c = chunk("C:\\docs", "a.txt");
        assert!(ChunkFilter::FilePath("C:\\docs\\a.txt".into()).matches(&c));
        assert!(!ChunkFilter::FilePath("C:/docs/b.txt".into()).matches(&c));
    }

    #[test]
    fn test_metadata_filter() {
        let c = chunk("/d", "a.txt").metadata.with("page_number", 2i64);
        let c = DocumentChunk::new("t", c);
        let mut wanted = BTreeMap::new();
        wanted.insert("file_kind".to_string(), MetadataValue::from("text"));
        wanted.insert("page_number".to_string(), MetadataValue::Int(2));
        assert!(ChunkFilter::Metadata(wanted.clone()).matches(&c));
        wanted.insert("page_number".to_string(), MetadataValue::Int(3));
        assert!(!ChunkFilter::Metadata(wanted).matches(&c));
    }

    #[test]
    fn test_batch_dimension_check() {
        let a = chunk("/d", "a").with_embedding(vec![0.0; 3]);
        let b = chunk("/d", "b").with_embedding(vec![0.0; 4]);
        let plain = chunk("/d", "c");
        assert_eq!(
            check_batch_dimension(&[a.clone(), plain], None).unwrap(),
            Some(3)
        );
        assert!(check_batch_dimension(&[a.clone(), b], None).is_err());
        assert!(check_batch_dimension(&[a], Some(4)).is_err());
    }
}
