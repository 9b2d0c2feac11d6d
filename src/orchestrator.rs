//! Incremental document processing.
//!
//! [`ProcessingOrchestrator::run`] walks every watched folder and drives
//! each file through:
//!
//! ```text
//! SCAN → CLASSIFY ─unchanged─► SKIP
//!           │
//!           └─new/modified─► EXTRACT → EMBED → STORE → COMMIT → DONE
//! ```
//!
//! Any step failing moves that file to FAILED with a message; the batch
//! always continues, and `run` itself never returns an error. State is
//! committed only after a file's chunks are stored, so an interrupted run
//! reprocesses at most the file it was working on.
//!
//! PDFs are processed page by page. Pages whose text layer the extractor
//! flags as unreliable are also rasterized and read by the vision model,
//! and the vision chunk is stored next to that page's text chunks. A PDF
//! with no text at all is handled by vision alone.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use docbridge_core::chunk::{chunk_text, ChunkOptions};
use docbridge_core::embedding::Embedder;
use docbridge_core::models::{normalize_path, ChunkMetadata, DocumentChunk, FileKind, FileState};
use docbridge_core::store::KnowledgeBase;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::fields::{flatten_scalar_fields, format_extraction, FieldClassifier};
use crate::models::WatchedFolder;
use crate::progress::{FileOutcome, NoProgress, ProgressEvent, ProgressReporter};
use crate::tracker::{path_key, FileChangeTracker};
use crate::traits::{Extraction, FolderScanner, PageRasterizer, TextExtractor, VisionExtractor};

/// Live totals across every run of one orchestrator. Readers (the
/// resource monitor, the CLI) only load; the pipeline only adds.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    chunks_stored: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub chunks_stored: u64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: FileOutcome) {
        let counter = match outcome {
            FileOutcome::Processed => &self.processed,
            FileOutcome::Skipped => &self.skipped,
            FileOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn add_chunks(&self, n: u64) {
        self.chunks_stored.fetch_add(n, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of one processing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<FileFailure>,
}

impl ProcessingResult {
    fn fail(&mut self, path: impl Into<String>, error: impl ToString) {
        self.failed += 1;
        self.failures.push(FileFailure {
            path: path.into(),
            error: error.to_string(),
        });
    }
}

/// Everything the pipeline calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub scanner: Arc<dyn FolderScanner>,
    pub text: Arc<dyn TextExtractor>,
    /// `None` when vision is disabled: images then fail, and PDF pages are
    /// taken from their text layer only.
    pub vision: Option<Arc<dyn VisionExtractor>>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub embedder: Arc<dyn Embedder>,
    pub knowledge_base: Arc<dyn KnowledgeBase>,
    pub fields: Arc<dyn FieldClassifier>,
}

pub struct ProcessingOrchestrator {
    tracker: FileChangeTracker,
    collab: Collaborators,
    chunking: ChunkOptions,
    counters: Arc<PipelineCounters>,
    progress: Arc<dyn ProgressReporter>,
}

impl ProcessingOrchestrator {
    pub fn new(tracker: FileChangeTracker, collab: Collaborators, chunking: ChunkOptions) -> Self {
        Self {
            tracker,
            collab,
            chunking,
            counters: Arc::new(PipelineCounters::default()),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn counters(&self) -> Arc<PipelineCounters> {
        Arc::clone(&self.counters)
    }

    /// Process every watched folder, or only `owner`'s.
    pub async fn run(&self, owner: Option<&str>) -> ProcessingResult {
        let mut result = ProcessingResult::default();

        let folders = match self.tracker.state().list_folders(owner).await {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "could not list watched folders");
                result.fail(self.tracker.state().path().display().to_string(), e);
                return result;
            }
        };
        if folders.is_empty() {
            info!("no watched folders");
        }

        for folder in &folders {
            self.process_folder(folder, &mut result).await;
        }

        info!(
            processed = result.processed,
            skipped = result.skipped,
            failed = result.failed,
            "processing complete"
        );
        self.progress.report(ProgressEvent::Finished {
            processed: result.processed,
            skipped: result.skipped,
            failed: result.failed,
        });
        result
    }

    async fn process_folder(&self, folder: &WatchedFolder, result: &mut ProcessingResult) {
        self.progress.report(ProgressEvent::Scanning {
            folder: folder.path.clone(),
        });

        let scan = match self.collab.scanner.scan(Path::new(&folder.path)) {
            Ok(s) => s,
            Err(e) => {
                error!(folder = %folder.path, error = %e, "scan failed");
                self.counters.record(FileOutcome::Failed);
                result.fail(folder.path.clone(), e);
                return;
            }
        };
        info!(
            folder = %folder.path,
            owner = %folder.owner,
            text = scan.text.len(),
            images = scan.images.len(),
            "scanned folder"
        );

        let total = scan.len() as u64;
        let files = scan
            .text
            .iter()
            .map(|p| (p, FileKind::Text))
            .chain(scan.images.iter().map(|p| (p, FileKind::Image)));

        for (n, (path, kind)) in files.enumerate() {
            let outcome = match self.process_file(path, kind, folder).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "file failed");
                    result.fail(path_key(path), e);
                    FileOutcome::Failed
                }
            };
            match outcome {
                FileOutcome::Processed => result.processed += 1,
                FileOutcome::Skipped => result.skipped += 1,
                FileOutcome::Failed => {}
            }
            self.counters.record(outcome);
            self.progress.report(ProgressEvent::File {
                folder: folder.path.clone(),
                n: n as u64 + 1,
                total,
                outcome,
            });
        }
    }

    /// Run one file through the pipeline. Returns `Processed` or `Skipped`;
    /// every failure is an `Err`.
    pub async fn process_file(
        &self,
        path: &Path,
        kind: FileKind,
        folder: &WatchedFolder,
    ) -> Result<FileOutcome> {
        let state = self.tracker.classify(path, &folder.owner).await?;
        if state == FileState::Unchanged {
            debug!(file = %path.display(), "unchanged, skipping");
            return Ok(FileOutcome::Skipped);
        }
        info!(file = %path.display(), state = %state, kind = %kind, "processing");

        let base = base_metadata(path, kind, &folder.owner);
        let mut chunks = match kind {
            FileKind::Text => self.text_chunks(path, &base).await?,
            FileKind::Image => self.image_chunks(path, &base).await?,
        };
        if chunks.is_empty() {
            warn!(file = %path.display(), "no content extracted");
        } else {
            self.embed(&mut chunks).await?;
        }

        let key = path_key(path);
        if state == FileState::Modified {
            let deleted = self
                .collab
                .knowledge_base
                .delete_by_path(&key)
                .await
                .map_err(Error::Other)?;
            debug!(file = %key, deleted, "replaced previous chunks");
        }
        if !chunks.is_empty() {
            self.collab
                .knowledge_base
                .add(&chunks)
                .await
                .map_err(|e| Error::IntegrityViolation(e.to_string()))?;
            self.counters.add_chunks(chunks.len() as u64);
        }

        self.tracker
            .commit(path, folder.id, kind, &folder.owner)
            .await?;
        info!(file = %key, chunks = chunks.len(), "processed");
        Ok(FileOutcome::Processed)
    }

    async fn text_chunks(&self, path: &Path, base: &ChunkMetadata) -> Result<Vec<DocumentChunk>> {
        let extraction = self
            .collab
            .text
            .extract(path)
            .await
            .map_err(|e| Error::Corruption(format!("{}: {}", path.display(), e)))?;

        let blank = extraction.is_blank();
        match extraction {
            Extraction::Plain(text) => Ok(self.split(&text, base, None)),
            Extraction::Pages(pages) if blank => {
                info!(file = %path.display(), pages = pages.len(), "no text layer, using vision only");
                self.vision_chunks(path, None, base).await
            }
            Extraction::Pages(pages) => {
                let mut chunks = Vec::new();
                for page in &pages {
                    chunks.extend(self.split(&page.text, base, Some(page.page_number)));
                    if page.needs_vision && self.collab.vision.is_some() {
                        match self.vision_chunks(path, Some(page.page_number), base).await {
                            Ok(v) => chunks.extend(v),
                            Err(e) => warn!(
                                file = %path.display(),
                                page = page.page_number,
                                error = %e,
                                "vision pass failed, keeping text layer"
                            ),
                        }
                    }
                }
                Ok(chunks)
            }
        }
    }

    fn split(&self, text: &str, base: &ChunkMetadata, page: Option<u32>) -> Vec<DocumentChunk> {
        chunk_text(text, &self.chunking)
            .into_iter()
            .enumerate()
            .map(|(i, content)| {
                let mut meta = base.clone().with("source", "text").with("chunk_index", i as i64);
                if let Some(p) = page {
                    meta.insert("page_number", p as i64);
                }
                DocumentChunk::new(content, meta)
            })
            .collect()
    }

    /// Rasterize one page (or all) and read each image with the vision model.
    async fn vision_chunks(
        &self,
        path: &Path,
        page: Option<u32>,
        base: &ChunkMetadata,
    ) -> Result<Vec<DocumentChunk>> {
        let vision = self.require_vision()?;
        let images = self
            .collab
            .rasterizer
            .rasterize(path, page)
            .await
            .map_err(|e| Error::TransientExternal(format!("rasterize {}: {}", path.display(), e)))?;

        let mut chunks = Vec::new();
        for image in images {
            let extraction = vision
                .extract(&image.bytes)
                .await
                .map_err(|e| Error::TransientExternal(e.to_string()))?;
            if extraction.is_empty() {
                continue;
            }
            let mut meta = base
                .clone()
                .with("source", "vision")
                .with("vision_model", vision.model_name())
                .with("page_number", image.page_number as i64)
                .with("chunk_index", 0i64);
            for (k, v) in flatten_scalar_fields(&extraction, self.collab.fields.as_ref()) {
                meta.insert(&k, v);
            }
            chunks.push(DocumentChunk::new(
                format_extraction(&extraction, self.collab.fields.as_ref()),
                meta,
            ));
        }
        Ok(chunks)
    }

    async fn image_chunks(&self, path: &Path, base: &ChunkMetadata) -> Result<Vec<DocumentChunk>> {
        let vision = self.require_vision()?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::from_file_io(path, e))?;
        let extraction = vision
            .extract(&bytes)
            .await
            .map_err(|e| Error::TransientExternal(e.to_string()))?;
        if extraction.is_empty() {
            return Ok(Vec::new());
        }

        let mut meta = base
            .clone()
            .with("source", "vision")
            .with("vision_model", vision.model_name())
            .with("chunk_index", 0i64);
        for (k, v) in flatten_scalar_fields(&extraction, self.collab.fields.as_ref()) {
            meta.insert(&k, v);
        }
        Ok(vec![DocumentChunk::new(
            format_extraction(&extraction, self.collab.fields.as_ref()),
            meta,
        )])
    }

    fn require_vision(&self) -> Result<&Arc<dyn VisionExtractor>> {
        self.collab
            .vision
            .as_ref()
            .ok_or_else(|| Error::TransientExternal("vision extraction is disabled".into()))
    }

    /// Attach a vector to every chunk.
    async fn embed(&self, chunks: &mut [DocumentChunk]) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .collab
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| Error::TransientExternal(e.to_string()))?;
        if vectors.len() != chunks.len() {
            return Err(Error::TransientExternal(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let expected = match self
            .collab
            .knowledge_base
            .dimension()
            .await
            .map_err(Error::Other)?
        {
            Some(d) => d,
            None => match self.collab.embedder.dims() {
                0 => vectors.first().map(|v| v.len()).unwrap_or(0),
                d => d,
            },
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(Error::IntegrityViolation(format!(
                "embedding dimension {} does not match knowledge base dimension {}",
                bad.len(),
                expected
            )));
        }

        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }
        Ok(())
    }
}

fn base_metadata(path: &Path, kind: FileKind, owner: &str) -> ChunkMetadata {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let folder = path
        .parent()
        .map(|p| normalize_path(&p.to_string_lossy()))
        .unwrap_or_default();
    ChunkMetadata::new(filename, folder, kind).with("owner", owner)
}
