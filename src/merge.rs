//! Merging export packages into a replica.
//!
//! Conflict policy is "newer wins, whole file": every local chunk of a
//! file present in the package is deleted before the package's chunks for
//! that file are inserted. A file edited on both sides keeps only the
//! package's version.
//!
//! Everything that can reject a package (missing artifacts, invalid
//! manifest, dimension mismatch) is checked before the first write. Once
//! writing starts, problems are recorded in [`MergeOutcome::errors`]
//! instead of aborting, and a failed post-merge integrity check is
//! reported through [`MergeOutcome::integrity_ok`] without rolling back.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use docbridge_core::manifest::{ExportManifest, ManifestValidator};
use docbridge_core::models::DocumentChunk;
use docbridge_core::store::{ChunkFilter, Include, KnowledgeBase};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::export::{KB_DIR, MANIFEST_FILE, STATE_FILE};
use crate::models::PortableFileRecord;
use crate::sqlite_kb::{SqliteKnowledgeBase, KB_FILE};
use crate::state::StateStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Treat a full package as a delta. Used to seed a replica that
    /// already has local data.
    pub accept_full: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub success: bool,
    /// Chunks inserted from the package.
    pub merged: u64,
    /// Processed-file rows written to the local state store.
    pub updated: u64,
    /// Local chunks removed because their file arrived in the package.
    pub deleted: u64,
    pub integrity_ok: bool,
    pub errors: Vec<String>,
    pub elapsed_secs: f64,
}

/// Everything read from a package before the first local write.
struct LoadedPackage {
    manifest: ExportManifest,
    chunks: Vec<DocumentChunk>,
    records: std::result::Result<Vec<PortableFileRecord>, String>,
}

pub struct SyncReconciler {
    state: StateStore,
    kb: Arc<dyn KnowledgeBase>,
}

impl SyncReconciler {
    pub fn new(state: StateStore, kb: Arc<dyn KnowledgeBase>) -> Self {
        Self { state, kb }
    }

    /// Merge an incremental package.
    pub async fn merge_package(&self, package: &Path) -> Result<MergeOutcome> {
        self.merge_package_with(package, MergeOptions::default()).await
    }

    /// Merge a package. Returns `Err` only for rejections, which happen
    /// before anything local is modified.
    pub async fn merge_package_with(
        &self,
        package: &Path,
        opts: MergeOptions,
    ) -> Result<MergeOutcome> {
        let started = Instant::now();
        info!(package = %package.display(), accept_full = opts.accept_full, "starting merge");

        let loaded = self.load(package, opts).await?;
        let dimension = loaded.manifest.embedding_dimension();

        let pre_count = self.kb.stats().await?.total_chunks;
        let mut outcome = MergeOutcome {
            success: true,
            merged: 0,
            updated: 0,
            deleted: 0,
            integrity_ok: true,
            errors: Vec::new(),
            elapsed_secs: 0.0,
        };

        if loaded.chunks.is_empty() {
            warn!("package contains no chunks");
        } else {
            let files: BTreeSet<String> = loaded.chunks.iter().map(|c| c.file_path()).collect();
            info!(files = files.len(), chunks = loaded.chunks.len(), "replacing files");

            for file in &files {
                match self.kb.delete_by_path(file).await {
                    Ok(n) => {
                        if n > 0 {
                            debug!(file = %file, deleted = n, "removed local chunks");
                        }
                        outcome.deleted += n;
                    }
                    Err(e) => {
                        warn!(file = %file, "could not remove local chunks: {}", e);
                        outcome.errors.push(format!("delete {}: {}", file, e));
                    }
                }
            }

            match self.kb.add(&loaded.chunks).await {
                Ok(ids) => outcome.merged = ids.len() as u64,
                Err(e) => {
                    error!("inserting package chunks failed: {}", e);
                    outcome.success = false;
                    outcome
                        .errors
                        .push(format!("Error merging chunks into knowledge base: {}", e));
                }
            }
        }

        match loaded.records {
            Ok(records) => match self.state.merge_records(&records).await {
                Ok(n) => outcome.updated = n,
                Err(e) => {
                    error!("state merge failed: {}", e);
                    outcome.errors.push(format!("Error updating state store: {}", e));
                }
            },
            Err(e) => {
                warn!("skipping state merge: {}", e);
                outcome.errors.push(e);
            }
        }

        if let Err(e) = self.kb.flush().await {
            warn!("flush after merge failed: {}", e);
        }

        if outcome.success {
            if let Err(msg) = self
                .verify(pre_count, outcome.deleted, outcome.merged, dimension)
                .await
            {
                error!("merge integrity check failed: {}", msg);
                outcome.integrity_ok = false;
                outcome.errors.push(msg);
            }
        }

        outcome.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            merged = outcome.merged,
            updated = outcome.updated,
            deleted = outcome.deleted,
            elapsed_secs = outcome.elapsed_secs,
            "merge finished"
        );
        Ok(outcome)
    }

    /// Validate the package and read its contents. No local writes.
    async fn load(&self, package: &Path, opts: MergeOptions) -> Result<LoadedPackage> {
        if !package.is_dir() {
            return Err(Error::NotFound(format!("package {}", package.display())));
        }
        let manifest_path = package.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&manifest_path)
            .map_err(|e| Error::from_file_io(&manifest_path, e))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| Error::Validation(format!("{} is not valid JSON: {}", MANIFEST_FILE, e)))?;

        let manifest = match ManifestValidator::parse(&value) {
            Ok((manifest, check)) => {
                for w in &check.warnings {
                    warn!("manifest: {}", w);
                }
                manifest
            }
            Err(check) => {
                return Err(Error::Validation(format!(
                    "invalid manifest: {}",
                    check.errors.join("; ")
                )))
            }
        };

        if !manifest.incremental.is_incremental && !opts.accept_full {
            return Err(Error::Validation(
                "package is not incremental (use accept_full to merge a full export)".into(),
            ));
        }

        let dimension = manifest.embedding_dimension();
        match self.kb.dimension().await? {
            Some(local) if local != dimension => {
                return Err(Error::IntegrityViolation(format!(
                    "embedding dimension mismatch: local {}, package {}",
                    local, dimension
                )))
            }
            Some(_) => {}
            None => info!(dimension, "local knowledge base is empty, accepting package dimension"),
        }

        let kb_dir = package.join(KB_DIR);
        if !kb_dir.join(KB_FILE).is_file() {
            return Err(Error::NotFound(format!(
                "package knowledge base {}",
                kb_dir.display()
            )));
        }
        let incoming = SqliteKnowledgeBase::open_existing(&kb_dir).await?;
        let chunks = incoming.get(&ChunkFilter::All, Include::ALL).await;
        incoming.close().await;
        let chunks = chunks?;

        for chunk in &chunks {
            if let Some(v) = chunk.embedding.as_ref().filter(|v| !v.is_empty()) {
                if v.len() != dimension {
                    return Err(Error::IntegrityViolation(format!(
                        "chunk of {} has {} dimensions, manifest declares {}",
                        chunk.file_path(),
                        v.len(),
                        dimension
                    )));
                }
            }
        }

        let records = read_records(&package.join(STATE_FILE)).await;
        Ok(LoadedPackage {
            manifest,
            chunks,
            records,
        })
    }

    /// The store holds at least what it held before, minus what was
    /// replaced, plus what arrived, and still has a dimension.
    async fn verify(
        &self,
        pre: u64,
        deleted: u64,
        merged: u64,
        dimension: usize,
    ) -> std::result::Result<(), String> {
        let stats = self.kb.stats().await.map_err(|e| e.to_string())?;
        let expected = pre.saturating_sub(deleted) + merged;
        if stats.total_chunks < expected {
            return Err(format!(
                "Merge integrity verification failed: expected at least {} chunks, found {}",
                expected, stats.total_chunks
            ));
        }
        if stats.total_chunks > 0 {
            match self.kb.dimension().await.map_err(|e| e.to_string())? {
                None => {
                    return Err(
                        "Merge integrity verification failed: cannot determine embedding dimension"
                            .to_string(),
                    )
                }
                Some(d) if merged > 0 && d != dimension => {
                    return Err(format!(
                        "Merge integrity verification failed: store dimension {} differs from package {}",
                        d, dimension
                    ))
                }
                Some(_) => {}
            }
        }
        debug!(total = stats.total_chunks, "merge integrity check passed");
        Ok(())
    }
}

async fn read_records(path: &Path) -> std::result::Result<Vec<PortableFileRecord>, String> {
    if !path.is_file() {
        return Err(format!("{} not found in package", STATE_FILE));
    }
    let store = StateStore::open_existing(path)
        .await
        .map_err(|e| e.to_string())?;
    let records = store.export_records().await.map_err(|e| e.to_string());
    store.close().await;
    records
}
