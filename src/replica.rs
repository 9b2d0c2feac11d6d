//! Replica-side deployment check.
//!
//! After a package has been copied into place (or merged), [`check_replica`]
//! opens the deployed knowledge base without creating anything and
//! confirms it can serve this replica's configuration:
//!
//! - the knowledge base exists and holds chunks,
//! - its embedding dimension matches `[embedding] dims`,
//! - the deployed manifest, when present, agrees with both.
//!
//! Model and memory recommendations from the manifest only produce
//! warnings.

use std::path::{Path, PathBuf};

use docbridge_core::manifest::ManifestValidator;
use docbridge_core::store::KnowledgeBase;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::export::MANIFEST_FILE;
use crate::monitor;
use crate::sqlite_kb::{SqliteKnowledgeBase, KB_FILE};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplicaCheck {
    pub valid: bool,
    pub total_chunks: u64,
    pub store_dimension: Option<usize>,
    pub configured_dimension: Option<usize>,
    pub manifest_dimension: Option<usize>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Where a deployed manifest is looked for when none is given: beside the
/// knowledge base directory (`data/manifest.json` in a replica layout).
pub fn default_manifest_path(config: &Config) -> PathBuf {
    config
        .knowledge_base
        .path
        .parent()
        .map(|p| p.join(MANIFEST_FILE))
        .unwrap_or_else(|| PathBuf::from(MANIFEST_FILE))
}

/// Check the deployed knowledge base against `config` and the manifest.
///
/// Returns `Err` only when the knowledge base is missing or cannot be
/// opened; every other problem is listed in [`ReplicaCheck::errors`].
pub async fn check_replica(config: &Config, manifest: Option<&Path>) -> Result<ReplicaCheck> {
    let kb_dir = &config.knowledge_base.path;
    if !kb_dir.join(KB_FILE).is_file() {
        return Err(Error::NotFound(format!(
            "knowledge base {} (extract the export package first)",
            kb_dir.display()
        )));
    }

    let kb = SqliteKnowledgeBase::open_existing(kb_dir).await?;
    let stats = kb.stats().await;
    let dimension = kb.dimension().await;
    kb.close().await;

    let mut check = ReplicaCheck {
        total_chunks: stats?.total_chunks,
        store_dimension: dimension?,
        configured_dimension: config.embedding.dims,
        ..Default::default()
    };

    if check.total_chunks == 0 {
        check
            .errors
            .push("Knowledge base is empty; process documents on the primary before exporting".into());
    }

    if let (Some(store), Some(configured)) = (check.store_dimension, check.configured_dimension) {
        if store != configured {
            check.errors.push(format!(
                "Embedding dimension mismatch: knowledge base has {}, [embedding] dims is {}",
                store, configured
            ));
        }
    }

    let manifest_path = manifest
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_manifest_path(config));
    check_manifest(&manifest_path, config, &mut check);

    check.valid = check.errors.is_empty();
    if check.valid {
        info!(
            chunks = check.total_chunks,
            dimension = ?check.store_dimension,
            "replica check passed"
        );
    } else {
        warn!(errors = check.errors.len(), "replica check failed");
    }
    Ok(check)
}

fn check_manifest(path: &Path, config: &Config, check: &mut ReplicaCheck) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => {
            check.warnings.push(format!(
                "No manifest at {}; model compatibility not verified",
                path.display()
            ));
            return;
        }
    };
    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            check
                .errors
                .push(format!("{} is not valid JSON: {}", path.display(), e));
            return;
        }
    };
    let manifest = match ManifestValidator::parse(&value) {
        Ok((manifest, result)) => {
            check.warnings.extend(result.warnings);
            manifest
        }
        Err(result) => {
            check.errors.extend(result.errors);
            return;
        }
    };

    let declared = manifest.embedding_dimension();
    check.manifest_dimension = Some(declared);
    if let Some(store) = check.store_dimension {
        if store != declared {
            check.errors.push(format!(
                "Embedding dimension mismatch: manifest declares {}, knowledge base has {}",
                declared, store
            ));
        }
    }
    if let Some(configured) = check.configured_dimension {
        if configured != declared {
            check.errors.push(format!(
                "Embedding dimension mismatch: manifest declares {}, [embedding] dims is {}",
                declared, configured
            ));
        }
    }

    let required = &manifest.replica_requirements;
    if required.conversational_model != config.export.conversational_model {
        check.warnings.push(format!(
            "Model mismatch: manifest recommends {}, configuration uses {}",
            required.conversational_model, config.export.conversational_model
        ));
    }
    if let Some(sample) = monitor::sample_memory() {
        let total_gb = sample.total_kb as f64 / (1024.0 * 1024.0);
        if total_gb < required.min_memory_gb {
            check.warnings.push(format!(
                "System memory ({:.1} GB) is below the recommended {} GB",
                total_gb, required.min_memory_gb
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use docbridge_core::models::{ChunkMetadata, DocumentChunk, FileKind};
    use tempfile::TempDir;

    fn config(tmp: &TempDir, dims: usize) -> Config {
        let mut config = parse_config(&format!(
            r#"
[state]
path = "unused"

[knowledge_base]
path = "unused"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = {}
"#,
            dims
        ))
        .unwrap();
        config.state.path = tmp.path().join("data/state.sqlite");
        config.knowledge_base.path = tmp.path().join("data/knowledge_base");
        config
    }

    async fn seed(config: &Config, dims: usize) {
        let kb = SqliteKnowledgeBase::open(&config.knowledge_base.path)
            .await
            .unwrap();
        let chunk = DocumentChunk::new(
            "receipt text",
            ChunkMetadata::new("r.txt", "/docs", FileKind::Text),
        )
        .with_embedding(vec![0.5; dims]);
        kb.add(&[chunk]).await.unwrap();
        kb.close().await;
    }

    #[tokio::test]
    async fn test_missing_knowledge_base_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = check_replica(&config(&tmp, 3), None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!tmp.path().join("data/knowledge_base").exists());
    }

    #[tokio::test]
    async fn test_matching_store_without_manifest_passes_with_warning() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, 3);
        seed(&config, 3).await;

        let check = check_replica(&config, None).await.unwrap();
        assert!(check.valid, "{:?}", check.errors);
        assert_eq!(check.total_chunks, 1);
        assert_eq!(check.store_dimension, Some(3));
        assert!(check.warnings[0].contains("No manifest"));
    }

    #[tokio::test]
    async fn test_store_dimension_must_match_config() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, 4);
        seed(&config, 3).await;

        let check = check_replica(&config, None).await.unwrap();
        assert!(!check.valid);
        assert!(check.errors[0].contains("[embedding] dims is 4"));
    }

    #[tokio::test]
    async fn test_manifest_dimension_is_compared() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, 3);
        seed(&config, 3).await;

        let manifest = docbridge_core::manifest::ExportManifest::new(
            docbridge_core::manifest::ExportKind::Full,
            docbridge_core::manifest::PrimaryConfig {
                embedding_model: "nomic-embed-text".into(),
                embedding_dimension: 8,
                vision_model: "none".into(),
            },
            docbridge_core::manifest::ReplicaRequirements {
                conversational_model: config.export.conversational_model.clone(),
                min_memory_gb: 0.001,
                embedding_dimension: 8,
            },
            docbridge_core::manifest::ExportStatistics {
                total_documents: 1,
                total_chunks: 1,
                total_embeddings: 1,
                ..Default::default()
            },
            None,
        );
        std::fs::write(
            default_manifest_path(&config),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();

        let check = check_replica(&config, None).await.unwrap();
        assert!(!check.valid);
        assert_eq!(check.manifest_dimension, Some(8));
        assert_eq!(check.errors.len(), 2, "{:?}", check.errors);
        assert!(check.warnings.is_empty(), "{:?}", check.warnings);
    }
}
