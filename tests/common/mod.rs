//! Shared fixtures: a node (state store + knowledge base in a temp dir)
//! and stub collaborators.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use docbridge::config::{parse_config, Config};
use docbridge::extract::FileTextExtractor;
use docbridge::fields::KeywordFieldClassifier;
use docbridge::orchestrator::{Collaborators, ProcessingOrchestrator};
use docbridge::scanner::FsFolderScanner;
use docbridge::sqlite_kb::SqliteKnowledgeBase;
use docbridge::state::StateStore;
use docbridge::tracker::FileChangeTracker;
use docbridge::traits::{
    Extraction, PageImage, PageRasterizer, PageText, TextExtractor, VisionExtraction,
    VisionExtractor,
};
use docbridge_core::embedding::Embedder;
use docbridge_core::store::KnowledgeBase;
use tempfile::TempDir;

pub const DIMS: usize = 4;

pub struct Node {
    pub tmp: TempDir,
    pub config: Config,
    pub state: StateStore,
    pub kb: Arc<SqliteKnowledgeBase>,
}

impl Node {
    pub async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = parse_config(&format!(
            r#"
[state]
path = "unused"

[knowledge_base]
path = "unused"

[embedding]
provider = "ollama"
model = "stub-embed"
dims = {}
"#,
            DIMS
        ))
        .unwrap();
        config.state.path = tmp.path().join("data/state.sqlite");
        config.knowledge_base.path = tmp.path().join("data/knowledge_base");

        let state = StateStore::open(&config.state.path).await.unwrap();
        let kb = Arc::new(
            SqliteKnowledgeBase::open(&config.knowledge_base.path)
                .await
                .unwrap(),
        );
        Self {
            tmp,
            config,
            state,
            kb,
        }
    }

    pub fn kb(&self) -> Arc<dyn KnowledgeBase> {
        self.kb.clone()
    }

    /// A watched folder for `owner` at `<tmp>/<name>`, created on disk.
    pub async fn watch(&self, name: &str, owner: &str) -> PathBuf {
        let dir = self.tmp.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        self.state.ensure_owner(owner).await.unwrap();
        let folder = self.state.add_folder(&dir, owner).await.unwrap();
        PathBuf::from(folder.path)
    }

    pub fn orchestrator(
        &self,
        embedder: Arc<dyn Embedder>,
        vision: Option<Arc<dyn VisionExtractor>>,
    ) -> ProcessingOrchestrator {
        self.orchestrator_with(
            embedder,
            vision,
            Arc::new(FileTextExtractor),
            Arc::new(NoRasterizer),
        )
    }

    pub fn orchestrator_with(
        &self,
        embedder: Arc<dyn Embedder>,
        vision: Option<Arc<dyn VisionExtractor>>,
        text: Arc<dyn TextExtractor>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> ProcessingOrchestrator {
        let collab = Collaborators {
            scanner: Arc::new(FsFolderScanner::new(&self.config.scan).unwrap()),
            text,
            vision,
            rasterizer,
            embedder,
            knowledge_base: self.kb(),
            fields: Arc::new(KeywordFieldClassifier::default()),
        };
        ProcessingOrchestrator::new(
            FileChangeTracker::new(self.state.clone()),
            collab,
            self.config.chunking.options(),
        )
    }
}

/// Deterministic vectors derived from the text.
pub struct HashEmbedder {
    pub calls: AtomicU64,
}

impl HashEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let bytes = text.as_bytes();
    let sum: u64 = bytes.iter().map(|&b| b as u64).sum();
    vec![
        (bytes.len() % 7) as f32 + 1.0,
        (sum % 13) as f32 + 1.0,
        text.matches('e').count() as f32 + 1.0,
        1.0,
    ]
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "stub-embed"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

/// Fails any batch containing `POISON`.
pub struct PoisonEmbedder;

#[async_trait]
impl Embedder for PoisonEmbedder {
    fn model_name(&self) -> &str {
        "stub-embed"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("POISON")) {
            bail!("embedding service unavailable");
        }
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

/// Returns a fixed receipt for every image.
pub struct StubVision;

#[async_trait]
impl VisionExtractor for StubVision {
    fn model_name(&self) -> &str {
        "stub-vision"
    }
    async fn extract(&self, _image: &[u8]) -> Result<VisionExtraction> {
        let mut extraction = VisionExtraction::default();
        extraction
            .fields
            .insert("merchant".into(), serde_json::json!("Costco"));
        extraction
            .fields
            .insert("total".into(), serde_json::json!(222.18));
        extraction.raw_text = "COSTCO WHOLESALE TOTAL 222.18".into();
        Ok(extraction)
    }
}

pub struct NoRasterizer;

#[async_trait]
impl PageRasterizer for NoRasterizer {
    async fn rasterize(&self, pdf: &Path, _page: Option<u32>) -> Result<Vec<PageImage>> {
        bail!("no rasterizer for {}", pdf.display())
    }
}

/// Returns the same pages for every file.
pub struct PagedExtractor {
    pub pages: Vec<PageText>,
}

impl PagedExtractor {
    pub fn new(pages: &[(&str, bool)]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages
                .iter()
                .enumerate()
                .map(|(i, (text, needs_vision))| PageText {
                    page_number: i as u32 + 1,
                    text: text.to_string(),
                    needs_vision: *needs_vision,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl TextExtractor for PagedExtractor {
    async fn extract(&self, _path: &Path) -> Result<Extraction> {
        Ok(Extraction::Pages(self.pages.clone()))
    }
}

/// Renders `page_count` blank pages; records every request.
pub struct StubRasterizer {
    pub page_count: u32,
    pub requests: std::sync::Mutex<Vec<Option<u32>>>,
}

impl StubRasterizer {
    pub fn new(page_count: u32) -> Arc<Self> {
        Arc::new(Self {
            page_count,
            requests: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Option<u32>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageRasterizer for StubRasterizer {
    async fn rasterize(&self, _pdf: &Path, page: Option<u32>) -> Result<Vec<PageImage>> {
        self.requests.lock().unwrap().push(page);
        let pages: Vec<u32> = match page {
            Some(p) => vec![p],
            None => (1..=self.page_count).collect(),
        };
        Ok(pages
            .into_iter()
            .map(|page_number| PageImage {
                page_number,
                bytes: vec![0x89, b'P', b'N', b'G'],
            })
            .collect())
    }
}

pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
