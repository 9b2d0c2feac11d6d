//! Export packages: a self-contained snapshot (full) or delta
//! (incremental) of the knowledge base and state store, ready to be
//! loaded or merged on a replica.
//!
//! # Package Layout
//!
//! ```text
//! <output>/docbridge_<kind>_<YYYYmmdd_HHMMSS>/
//!     knowledge_base/kb.sqlite
//!     state.sqlite
//!     manifest.json
//!     replica.toml
//!     DEPLOYMENT.md
//! <output>/docbridge_<kind>_<YYYYmmdd_HHMMSS>.zip
//! ```
//!
//! Everything is written into `<package>.partial` first and renamed into
//! place only once all five artifacts exist. The archive is produced last;
//! a failed build leaves neither a package nor an archive behind.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docbridge_core::manifest::{
    ExportKind, ExportManifest, ExportStatistics, ManifestValidator, PrimaryConfig,
    ReplicaRequirements, ValidationResult,
};
use docbridge_core::store::{ChunkFilter, Include, KnowledgeBase};
use docbridge_core::validator::DataValidator;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::sqlite_kb::SqliteKnowledgeBase;
use crate::state::StateStore;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const STATE_FILE: &str = "state.sqlite";
pub const KB_DIR: &str = "knowledge_base";
pub const CONFIG_FILE: &str = "replica.toml";
pub const INSTRUCTIONS_FILE: &str = "DEPLOYMENT.md";

/// Free space required relative to the data being exported.
const SPACE_FACTOR: f64 = 1.2;

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Directory the package and archive are written into.
    pub output_dir: PathBuf,
    pub kind: ExportKind,
    /// Lower bound (exclusive) on `processed_at` for incremental exports.
    pub since: Option<DateTime<Utc>>,
}

impl ExportRequest {
    pub fn full(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            kind: ExportKind::Full,
            since: None,
        }
    }

    pub fn incremental(output_dir: impl Into<PathBuf>, since: DateTime<Utc>) -> Self {
        Self {
            output_dir: output_dir.into(),
            kind: ExportKind::Incremental,
            since: Some(since),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub success: bool,
    pub package_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    /// Size of the archive, or 0 when none was written.
    pub size_bytes: u64,
    pub statistics: Option<ExportStatistics>,
    pub manifest: Option<ExportManifest>,
    pub errors: Vec<String>,
}

impl ExportResult {
    fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            package_path: None,
            archive_path: None,
            size_bytes: 0,
            statistics: None,
            manifest: None,
            errors,
        }
    }
}

/// Builds export packages from a primary's state store and knowledge base.
pub struct ExportPackager {
    config: Config,
    state: StateStore,
    kb: Arc<dyn KnowledgeBase>,
    kb_dir: PathBuf,
}

impl ExportPackager {
    pub fn new(config: Config, state: StateStore, kb: Arc<dyn KnowledgeBase>) -> Self {
        let kb_dir = config.knowledge_base.path.clone();
        Self {
            config,
            state,
            kb,
            kb_dir,
        }
    }

    /// Build a package. Never returns an error: every failure is listed in
    /// [`ExportResult::errors`] with `success = false`.
    pub async fn export(&self, req: &ExportRequest) -> ExportResult {
        info!(kind = %req.kind, output = %req.output_dir.display(), "starting export");

        let preflight = self.preflight(req).await;
        if !preflight.is_empty() {
            for e in &preflight {
                error!("export precondition failed: {}", e);
            }
            return ExportResult::failed(preflight);
        }

        let name = unique_name(&req.output_dir, &package_name(req.kind, Utc::now()));
        let package = req.output_dir.join(&name);
        let staging = req.output_dir.join(format!("{}.partial", name));

        let manifest = match self.build_staged(req, &staging).await {
            Ok(m) => m,
            Err(e) => {
                error!("export build failed: {}", e);
                let _ = std::fs::remove_dir_all(&staging);
                return ExportResult::failed(vec![e.to_string()]);
            }
        };

        if let Err(e) = promote(&staging, &package) {
            error!("could not move package into place: {}", e);
            let _ = std::fs::remove_dir_all(&staging);
            return ExportResult::failed(vec![e.to_string()]);
        }

        let archive = req.output_dir.join(format!("{}.zip", name));
        let zip_src = package.clone();
        let zip_dest = archive.clone();
        let zipped = tokio::task::spawn_blocking(move || fsutil::zip_dir(&zip_src, &zip_dest))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);

        match zipped {
            Ok(size_bytes) => {
                info!(
                    package = %package.display(),
                    archive = %archive.display(),
                    size_bytes,
                    chunks = manifest.statistics.total_chunks,
                    "export complete"
                );
                ExportResult {
                    success: true,
                    package_path: Some(package),
                    archive_path: Some(archive),
                    size_bytes,
                    statistics: Some(manifest.statistics.clone()),
                    manifest: Some(manifest),
                    errors: Vec::new(),
                }
            }
            Err(e) => {
                error!("archive creation failed: {}", e);
                let _ = std::fs::remove_file(&archive);
                ExportResult {
                    success: false,
                    package_path: Some(package),
                    archive_path: None,
                    size_bytes: 0,
                    statistics: Some(manifest.statistics.clone()),
                    manifest: Some(manifest),
                    errors: vec![format!("Failed to create archive: {}", e)],
                }
            }
        }
    }

    /// Checks that run before anything is written. Returns every violated
    /// precondition.
    async fn preflight(&self, req: &ExportRequest) -> Vec<String> {
        let mut errors = Vec::new();

        if req.kind == ExportKind::Incremental && req.since.is_none() {
            errors.push(
                Error::Validation("incremental export requires a since timestamp".into())
                    .to_string(),
            );
        }
        if !self.kb_dir.is_dir() {
            errors.push(
                Error::NotFound(format!("knowledge base {}", self.kb_dir.display())).to_string(),
            );
        }
        if !self.state.path().is_file() {
            errors.push(
                Error::NotFound(format!("state store {}", self.state.path().display()))
                    .to_string(),
            );
        }
        if !errors.is_empty() {
            return errors;
        }

        let validator = DataValidator::new(self.kb.as_ref(), self.config.embedding.dims);
        match validator.validate().await {
            Ok(report) => {
                for v in report.violations(req.kind) {
                    errors.push(Error::IntegrityViolation(v).to_string());
                }
            }
            Err(e) if req.kind == ExportKind::Full => {
                errors.push(format!("Data validation could not run: {}", e));
            }
            Err(e) => warn!("data validation could not run, continuing incremental export: {}", e),
        }

        let data_bytes = fsutil::tree_size(&self.kb_dir) + fsutil::tree_size(self.state.path());
        let required = (data_bytes as f64 * SPACE_FACTOR) as u64;
        match fsutil::free_space(&req.output_dir) {
            Some(free) if free < required => errors.push(
                Error::ResourceExhaustion(format!(
                    "need {} bytes free at {}, have {}",
                    required,
                    req.output_dir.display(),
                    free
                ))
                .to_string(),
            ),
            Some(_) => {}
            None => warn!(
                "could not determine free space at {}, continuing",
                req.output_dir.display()
            ),
        }

        errors
    }

    /// Write data, manifest, config, and instructions into `staging`.
    async fn build_staged(&self, req: &ExportRequest, staging: &Path) -> Result<ExportManifest> {
        if staging.exists() {
            std::fs::remove_dir_all(staging)?;
        }
        std::fs::create_dir_all(staging)?;

        let (mut statistics, exported_dim) = match req.kind {
            ExportKind::Full => self.write_full(staging).await?,
            ExportKind::Incremental => {
                let since = req.since.ok_or_else(|| {
                    Error::Validation("incremental export requires a since timestamp".into())
                })?;
                self.write_delta(staging, since).await?
            }
        };
        statistics.knowledge_base_size_mb = fsutil::tree_size(&staging.join(KB_DIR)) as f64 / MIB;
        statistics.state_store_size_mb = fsutil::tree_size(&staging.join(STATE_FILE)) as f64 / MIB;

        let dimension = match exported_dim {
            Some(d) => d,
            None => self
                .kb
                .dimension()
                .await?
                .or(self.config.embedding.dims)
                .ok_or_else(|| {
                    Error::IntegrityViolation(
                        "cannot determine embedding dimension for manifest".into(),
                    )
                })?,
        };

        let manifest = ExportManifest::new(
            req.kind,
            PrimaryConfig {
                embedding_model: self
                    .config
                    .embedding
                    .model
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
                embedding_dimension: dimension,
                vision_model: self.config.vision.model_name().to_string(),
            },
            ReplicaRequirements {
                conversational_model: self.config.export.conversational_model.clone(),
                min_memory_gb: self.config.export.min_memory_gb,
                embedding_dimension: dimension,
            },
            statistics,
            req.since,
        );

        let check = ManifestValidator::validate_manifest(&manifest);
        if !check.valid {
            return Err(Error::IntegrityViolation(format!(
                "generated manifest is invalid: {}",
                check.errors.join("; ")
            )));
        }
        for w in &check.warnings {
            warn!("manifest: {}", w);
        }
        std::fs::write(
            staging.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        std::fs::write(staging.join(CONFIG_FILE), replica_config(&self.config)?)?;
        std::fs::write(
            staging.join(INSTRUCTIONS_FILE),
            deployment_instructions(&manifest),
        )?;

        Ok(manifest)
    }

    /// Verbatim copy of the knowledge-base tree and state store.
    async fn write_full(&self, staging: &Path) -> Result<(ExportStatistics, Option<usize>)> {
        self.kb.flush().await?;
        self.state.checkpoint().await?;

        let src = self.kb_dir.clone();
        let dest = staging.join(KB_DIR);
        tokio::task::spawn_blocking(move || fsutil::copy_tree(&src, &dest, fsutil::is_shm_file))
            .await
            .map_err(anyhow::Error::from)??;
        self.copy_state(staging)?;

        let stats = self.kb.stats().await?;
        let statistics = ExportStatistics {
            total_documents: stats.distinct_files,
            total_chunks: stats.total_chunks,
            total_embeddings: stats.embedded_chunks,
            ..Default::default()
        };
        Ok((statistics, self.kb.dimension().await?))
    }

    /// Chunks of files processed after `since`, copied into a fresh
    /// knowledge base. The state store is copied whole.
    async fn write_delta(
        &self,
        staging: &Path,
        since: DateTime<Utc>,
    ) -> Result<(ExportStatistics, Option<usize>)> {
        let paths: HashSet<String> = self
            .state
            .processed_since(since.timestamp_millis())
            .await?
            .into_iter()
            .collect();

        let delta: Vec<_> = self
            .kb
            .get(&ChunkFilter::All, Include::ALL)
            .await?
            .into_iter()
            .filter(|c| paths.contains(&c.file_path()))
            .collect();
        info!(
            files = paths.len(),
            chunks = delta.len(),
            since = %since.to_rfc3339(),
            "collected incremental delta"
        );

        let dest = SqliteKnowledgeBase::open(&staging.join(KB_DIR)).await?;
        if !delta.is_empty() {
            dest.add(&delta).await?;
        }
        let stats = dest.stats().await?;
        let dimension = dest.dimension().await?;
        dest.flush().await?;
        dest.close().await;

        self.state.checkpoint().await?;
        self.copy_state(staging)?;

        let statistics = ExportStatistics {
            total_documents: stats.distinct_files,
            total_chunks: stats.total_chunks,
            total_embeddings: stats.embedded_chunks,
            new_documents: Some(paths.len() as u64),
            ..Default::default()
        };
        Ok((statistics, dimension))
    }

    fn copy_state(&self, staging: &Path) -> Result<()> {
        let dest = staging.join(STATE_FILE);
        std::fs::copy(self.state.path(), &dest)
            .map_err(|e| Error::from_file_io(self.state.path(), e))?;
        Ok(())
    }
}

/// Re-check a package on disk: all artifacts present, manifest valid.
pub fn validate_package(package: &Path) -> ValidationResult {
    let mut result = ValidationResult::new();

    if !package.is_dir() {
        result.error(format!("Package directory not found: {}", package.display()));
        return result;
    }

    let kb_dir = package.join(KB_DIR);
    if !kb_dir.is_dir() {
        result.error(format!("Missing {}/ directory", KB_DIR));
    } else if std::fs::read_dir(&kb_dir)
        .map(|mut d| d.next().is_none())
        .unwrap_or(true)
    {
        result.warn(format!("{}/ directory is empty", KB_DIR));
    }

    let state = package.join(STATE_FILE);
    match std::fs::metadata(&state) {
        Err(_) => result.error(format!("Missing {}", STATE_FILE)),
        Ok(m) if m.len() == 0 => result.warn(format!("{} is empty", STATE_FILE)),
        Ok(_) => {}
    }

    for file in [CONFIG_FILE, INSTRUCTIONS_FILE] {
        if !package.join(file).is_file() {
            result.error(format!("Missing {}", file));
        }
    }

    let manifest_path = package.join(MANIFEST_FILE);
    match std::fs::read_to_string(&manifest_path) {
        Err(_) => result.error(format!("Missing {}", MANIFEST_FILE)),
        Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => result.absorb(ManifestValidator::validate(&value)),
            Err(e) => result.error(format!("{} is not valid JSON: {}", MANIFEST_FILE, e)),
        },
    }

    result
}

fn package_name(kind: ExportKind, at: DateTime<Utc>) -> String {
    format!("docbridge_{}_{}", kind, at.format("%Y%m%d_%H%M%S"))
}

/// `base`, or `base_2`, `base_3`, ... if a package, archive, or staging
/// directory of that name already exists in `dir`.
fn unique_name(dir: &Path, base: &str) -> String {
    let taken = |name: &str| {
        dir.join(name).exists()
            || dir.join(format!("{}.zip", name)).exists()
            || dir.join(format!("{}.partial", name)).exists()
    };
    if !taken(base) {
        return base.to_string();
    }
    (2u32..)
        .map(|n| format!("{}_{}", base, n))
        .find(|name| !taken(name))
        .unwrap_or_else(|| format!("{}_{}", base, uuid::Uuid::new_v4().simple()))
}

/// Rename the staging directory to its final name. Never replaces an
/// existing package.
fn promote(staging: &Path, package: &Path) -> Result<()> {
    if package.exists() {
        return Err(Error::Validation(format!(
            "package {} already exists",
            package.display()
        )));
    }
    std::fs::rename(staging, package)?;
    Ok(())
}

/// Replica configuration: the primary's, with data paths relative to the
/// unpacked package and vision turned off.
pub fn replica_config(config: &Config) -> Result<String> {
    let mut replica = config.clone();
    replica.state.path = PathBuf::from("data").join(STATE_FILE);
    replica.knowledge_base.path = PathBuf::from("data").join(KB_DIR);
    replica.vision.provider = "disabled".to_string();

    let body = toml::to_string_pretty(&replica).map_err(anyhow::Error::from)?;
    Ok(format!(
        "# Generated by docbridge export. Copy to config/docbridge.toml on the replica.\n\n{}",
        body
    ))
}

fn deployment_instructions(manifest: &ExportManifest) -> String {
    let stats = &manifest.statistics;
    let mut out = String::new();

    out.push_str("# docbridge replica deployment\n\n");
    out.push_str(&format!(
        "Created {} ({} export).\n\n",
        manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        manifest.export_kind
    ));

    out.push_str("## Contents\n\n");
    out.push_str(&format!("- `{}/`: chunk store\n", KB_DIR));
    out.push_str(&format!("- `{}`: processed-file state\n", STATE_FILE));
    out.push_str(&format!("- `{}`: package description\n", MANIFEST_FILE));
    out.push_str(&format!("- `{}`: replica configuration\n\n", CONFIG_FILE));

    out.push_str("## Statistics\n\n");
    out.push_str(&format!("- Documents: {}\n", stats.total_documents));
    out.push_str(&format!("- Chunks: {}\n", stats.total_chunks));
    out.push_str(&format!("- Embeddings: {}\n", stats.total_embeddings));
    if let Some(n) = stats.new_documents {
        out.push_str(&format!("- Files in this delta: {}\n", n));
    }
    out.push_str(&format!(
        "- Knowledge base size: {:.2} MB\n\n",
        stats.knowledge_base_size_mb
    ));

    let req = &manifest.replica_requirements;
    out.push_str("## Requirements\n\n");
    out.push_str(&format!(
        "- Embedding model: `{}` ({} dimensions)\n",
        manifest.primary_config.embedding_model, req.embedding_dimension
    ));
    out.push_str(&format!(
        "- Conversational model: `{}`\n",
        req.conversational_model
    ));
    out.push_str(&format!("- Memory: at least {} GB\n\n", req.min_memory_gb));

    match manifest.export_kind {
        ExportKind::Full => {
            out.push_str("## First deployment\n\n");
            out.push_str("```sh\n");
            out.push_str("mkdir -p data config\n");
            out.push_str(&format!("cp -r {} data/\n", KB_DIR));
            out.push_str(&format!("cp {} data/\n", STATE_FILE));
            out.push_str(&format!("cp {} data/\n", MANIFEST_FILE));
            out.push_str(&format!("cp {} config/docbridge.toml\n", CONFIG_FILE));
            out.push_str("docbridge check-replica\n");
            out.push_str("docbridge stats\n");
            out.push_str("```\n\n");
            out.push_str("To seed an existing replica instead, run `docbridge merge <package> --accept-full`.\n\n");
        }
        ExportKind::Incremental => {
            out.push_str("## Applying this update\n\n");
            out.push_str("```sh\n");
            out.push_str("docbridge validate-package <package>\n");
            out.push_str("docbridge merge <package>\n");
            out.push_str("docbridge check-replica --manifest <package>/manifest.json\n");
            out.push_str("```\n\n");
            out.push_str(
                "Files present in this delta replace every local chunk of the same file.\n\n",
            );
        }
    }

    out.push_str("## Troubleshooting\n\n");
    out.push_str(
        "- Dimension mismatch on merge: the replica was built with a different embedding model. \
Redeploy from a full export.\n",
    );
    out.push_str("- Run with `RUST_LOG=docbridge=debug` for per-file detail.\n");
    out
}
