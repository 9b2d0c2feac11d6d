//! Knowledge-base readiness checks.
//!
//! [`DataValidator`] runs two independent scans over a knowledge base:
//! embedding coverage (every chunk has a non-empty vector of the expected
//! dimension) and metadata completeness (every chunk has `filename`,
//! `folder_path`, and a valid `file_kind`). The export packager gates on
//! the resulting [`DataValidationReport`].

use anyhow::Result;
use serde::Serialize;

use crate::manifest::ExportKind;
use crate::store::{ChunkFilter, Include, KnowledgeBase};

/// Violation message for an empty store on full export.
pub const NOTHING_TO_EXPORT: &str = "Knowledge base contains no chunks - nothing to export";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingCoverage {
    pub total_chunks: u64,
    pub total_embeddings: u64,
    /// Dimension the scan checked against, if one was known.
    pub expected_dimension: Option<usize>,
    pub missing_embeddings: Vec<String>,
    pub dimension_mismatches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataCompleteness {
    pub total_chunks: u64,
    /// Ids of chunks missing one or more mandatory keys.
    pub incomplete_metadata: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataValidationReport {
    pub embeddings: EmbeddingCoverage,
    pub metadata: MetadataCompleteness,
}

impl DataValidationReport {
    pub fn total_chunks(&self) -> u64 {
        self.embeddings.total_chunks
    }

    /// Human-readable violations that block an export of `kind`.
    pub fn violations(&self, kind: ExportKind) -> Vec<String> {
        let mut out = Vec::new();
        if kind == ExportKind::Full && self.total_chunks() == 0 {
            out.push(NOTHING_TO_EXPORT.to_string());
        }
        if !self.embeddings.missing_embeddings.is_empty() {
            out.push(format!(
                "Found {} chunks missing embeddings",
                self.embeddings.missing_embeddings.len()
            ));
        }
        if !self.embeddings.dimension_mismatches.is_empty() {
            out.push(format!(
                "Found {} chunks with embedding dimension other than {}",
                self.embeddings.dimension_mismatches.len(),
                self.embeddings.expected_dimension.unwrap_or_default()
            ));
        }
        if !self.metadata.incomplete_metadata.is_empty() {
            out.push(format!(
                "Found {} chunks with incomplete metadata",
                self.metadata.incomplete_metadata.len()
            ));
        }
        out
    }

    pub fn passes(&self, kind: ExportKind) -> bool {
        self.violations(kind).is_empty()
    }
}

pub struct DataValidator<'a> {
    kb: &'a dyn KnowledgeBase,
    expected_dimension: Option<usize>,
}

impl<'a> DataValidator<'a> {
    /// `expected_dimension` is the configured embedding dimension; when
    /// `None`, the store's own dimension is used.
    pub fn new(kb: &'a dyn KnowledgeBase, expected_dimension: Option<usize>) -> Self {
        Self {
            kb,
            expected_dimension,
        }
    }

    pub async fn check_embedding_coverage(&self) -> Result<EmbeddingCoverage> {
        let chunks = self.kb.get(&ChunkFilter::All, Include::EMBEDDINGS).await?;
        let expected = match self.expected_dimension {
            Some(d) => Some(d),
            None => self.kb.dimension().await?,
        };

        let mut report = EmbeddingCoverage {
            total_chunks: chunks.len() as u64,
            expected_dimension: expected,
            ..Default::default()
        };

        for chunk in &chunks {
            let id = chunk.id.clone().unwrap_or_default();
            match chunk.embedding.as_ref().filter(|v| !v.is_empty()) {
                None => report.missing_embeddings.push(id),
                Some(v) => {
                    report.total_embeddings += 1;
                    if expected.is_some_and(|d| d != v.len()) {
                        report.dimension_mismatches.push(id);
                    }
                }
            }
        }

        Ok(report)
    }

    pub async fn check_metadata_completeness(&self) -> Result<MetadataCompleteness> {
        let chunks = self.kb.get(&ChunkFilter::All, Include::METADATA).await?;
        Ok(MetadataCompleteness {
            total_chunks: chunks.len() as u64,
            incomplete_metadata: chunks
                .iter()
                .filter(|c| !c.metadata.is_complete())
                .map(|c| c.id.clone().unwrap_or_default())
                .collect(),
        })
    }

    pub async fn validate(&self) -> Result<DataValidationReport> {
        Ok(DataValidationReport {
            embeddings: self.check_embedding_coverage().await?,
            metadata: self.check_metadata_completeness().await?,
        })
    }
}
