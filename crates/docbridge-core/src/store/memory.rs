//! In-memory [`KnowledgeBase`] for tests and embedding in other hosts.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`; queries are
//! brute-force cosine similarity.

use std::collections::HashSet;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{normalize_path, DocumentChunk};

use super::{
    check_batch_dimension, ChunkFilter, Include, KnowledgeBase, KnowledgeBaseStats, QueryMatch,
};

#[derive(Default)]
pub struct InMemoryKnowledgeBase {
    chunks: RwLock<Vec<DocumentChunk>>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<DocumentChunk>>> {
        self.chunks
            .read()
            .map_err(|_| anyhow!("knowledge base lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<DocumentChunk>>> {
        self.chunks
            .write()
            .map_err(|_| anyhow!("knowledge base lock poisoned"))
    }
}

fn stored_dimension(chunks: &[DocumentChunk]) -> Option<usize> {
    chunks
        .iter()
        .filter_map(|c| c.embedding.as_ref())
        .find(|v| !v.is_empty())
        .map(|v| v.len())
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn add(&self, chunks: &[DocumentChunk]) -> Result<Vec<String>> {
        let mut stored = self.write()?;
        check_batch_dimension(chunks, stored_dimension(&stored))?;

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id = Uuid::new_v4().to_string();
            let mut c = chunk.clone();
            c.id = Some(id.clone());
            stored.push(c);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<QueryMatch>> {
        let stored = self.read()?;
        let mut matches: Vec<QueryMatch> = stored
            .iter()
            .filter(|c| filter.matches(c))
            .filter_map(|c| {
                let emb = c.embedding.as_ref()?;
                Some(QueryMatch {
                    score: cosine_similarity(vector, emb),
                    chunk: c.clone(),
                })
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
        let target = normalize_path(file_path);
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|c| c.file_path() != target);
        Ok((before - stored.len()) as u64)
    }

    async fn stats(&self) -> Result<KnowledgeBaseStats> {
        let stored = self.read()?;
        let files: HashSet<String> = stored.iter().map(|c| c.file_path()).collect();
        Ok(KnowledgeBaseStats {
            total_chunks: stored.len() as u64,
            embedded_chunks: stored.iter().filter(|c| c.has_embedding()).count() as u64,
            distinct_files: files.len() as u64,
        })
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        Ok(stored_dimension(&self.read()?))
    }

    async fn get(&self, filter: &ChunkFilter, include: Include) -> Result<Vec<DocumentChunk>> {
        let stored = self.read()?;
        Ok(stored
            .iter()
            .filter(|c| filter.matches(c))
            .map(|c| include.apply(c.clone()))
            .collect())
    }
}
