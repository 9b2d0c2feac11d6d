//! Collaborator traits for the processing pipeline.
//!
//! The orchestrator never touches the filesystem layout, PDF parser,
//! vision model, or rasterizer directly; it goes through these traits so
//! each can be swapped for a stub in tests or a different backend in
//! deployment.
//!
//! ```text
//!   FolderScanner ──► paths ──► TextExtractor ──► pages ──┐
//!                          │                               ├─► chunks ─► Embedder ─► KnowledgeBase
//!                          └──► PageRasterizer ─► VisionExtractor ─┘
//! ```
//!
//! [`Embedder`](docbridge_core::embedding::Embedder) and
//! [`KnowledgeBase`](docbridge_core::store::KnowledgeBase) live in the core
//! crate because export and merge use them too.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

/// Files under a watched folder, split by how they are processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub text: Vec<PathBuf>,
    pub images: Vec<PathBuf>,
}

impl ScanResult {
    pub fn len(&self) -> usize {
        self.text.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Enumerates processable files under a folder.
pub trait FolderScanner: Send + Sync {
    fn scan(&self, folder: &Path) -> Result<ScanResult>;
}

/// Text of one PDF page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 1-based.
    pub page_number: u32,
    pub text: String,
    /// The text layer looks unusable (scanned, tabular, garbled); the page
    /// should also go through vision extraction.
    pub needs_vision: bool,
}

/// Output of a [`TextExtractor`].
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Unpaginated text (plain text, markdown).
    Plain(String),
    Pages(Vec<PageText>),
}

impl Extraction {
    /// True when no page has any text at all.
    pub fn is_blank(&self) -> bool {
        match self {
            Extraction::Plain(text) => text.trim().is_empty(),
            Extraction::Pages(pages) => pages.iter().all(|p| p.text.trim().is_empty()),
        }
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Extraction>;
}

/// Structured fields and free text read from an image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionExtraction {
    pub fields: BTreeMap<String, serde_json::Value>,
    pub raw_text: String,
}

impl VisionExtraction {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.raw_text.trim().is_empty()
    }
}

#[async_trait]
pub trait VisionExtractor: Send + Sync {
    /// Model identifier recorded in chunk metadata and export manifests.
    fn model_name(&self) -> &str;

    async fn extract(&self, image: &[u8]) -> Result<VisionExtraction>;
}

/// A rendered page image (PNG bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page_number: u32,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render one page (1-based) or, with `None`, every page.
    async fn rasterize(&self, pdf: &Path, page: Option<u32>) -> Result<Vec<PageImage>>;
}
