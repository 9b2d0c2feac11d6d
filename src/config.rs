//! TOML configuration.
//!
//! A single file (default `./config/docbridge.toml`) configures both the
//! primary and the replica; the replica's file is generated by the export
//! packager from the primary's. Every section except `[state]` and
//! `[knowledge_base]` has defaults.
//!
//! ```toml
//! [state]
//! path = "./data/state.sqlite"
//!
//! [knowledge_base]
//! path = "./data/knowledge_base"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//! ```

use anyhow::{bail, Context, Result};
use docbridge_core::chunk::ChunkOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub state: StateConfig,
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub fields: FieldsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StateConfig {
    /// SQLite file holding owners, watched folders, and processed-file rows.
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KnowledgeBaseConfig {
    /// Directory holding the chunk store.
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VisionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_vision_retries")]
    pub max_retries: u32,
    #[serde(default = "default_vision_timeout")]
    pub timeout_secs: u64,
    /// Resolution used when rasterizing PDF pages for vision extraction.
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Rasterizer executable (poppler's `pdftoppm` interface).
    #[serde(default = "default_rasterizer")]
    pub rasterizer: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            max_retries: default_vision_retries(),
            timeout_secs: default_vision_timeout(),
            dpi: default_dpi(),
            rasterizer: default_rasterizer(),
        }
    }
}

impl VisionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Model name as recorded in export manifests.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("none")
    }
}

fn default_vision_retries() -> u32 {
    3
}
fn default_vision_timeout() -> u64 {
    120
}
fn default_dpi() -> u32 {
    150
}
fn default_rasterizer() -> String {
    "pdftoppm".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            max_chars: self.max_chars,
            min_chars: self.min_chars,
            overlap_chars: self.overlap_chars,
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_min_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    100
}

/// Replica requirements written into export manifests.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_conversational_model")]
    pub conversational_model: String,
    #[serde(default = "default_min_memory_gb")]
    pub min_memory_gb: f64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            conversational_model: default_conversational_model(),
            min_memory_gb: default_min_memory_gb(),
        }
    }
}

fn default_conversational_model() -> String {
    "llama3.2:3b".to_string()
}
fn default_min_memory_gb() -> f64 {
    4.0
}

/// Keyword lists steering how vision-extracted fields are ordered and
/// which are dropped. Matching is case-insensitive substring.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FieldsConfig {
    #[serde(default = "default_priority_fields")]
    pub priority: Vec<String>,
    #[serde(default = "default_skip_fields")]
    pub skip: Vec<String>,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            priority: default_priority_fields(),
            skip: default_skip_fields(),
        }
    }
}

fn default_priority_fields() -> Vec<String> {
    ["document_type", "title", "merchant", "vendor", "date", "total", "amount"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_skip_fields() -> Vec<String> {
    ["raw_response", "confidence", "debug"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_warn_percent")]
    pub warn_percent: f64,
    #[serde(default = "default_critical_percent")]
    pub critical_percent: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            warn_percent: default_warn_percent(),
            critical_percent: default_critical_percent(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}
fn default_warn_percent() -> f64 {
    90.0
}
fn default_critical_percent() -> f64 {
    95.0
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ScanConfig {
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    let chunking = &config.chunking;
    if chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if chunking.min_chars > chunking.max_chars {
        bail!("chunking.min_chars must be <= chunking.max_chars");
    }
    if chunking.overlap_chars >= chunking.max_chars {
        bail!("chunking.overlap_chars must be < chunking.max_chars");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.vision.provider.as_str() {
        "disabled" => {}
        "ollama" => {
            if config.vision.model.is_none() {
                bail!("vision.model must be specified when provider is 'ollama'");
            }
        }
        other => bail!(
            "Unknown vision provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    if config.export.min_memory_gb <= 0.0 {
        bail!("export.min_memory_gb must be > 0");
    }

    let monitor = &config.monitor;
    if monitor.interval_secs == 0 {
        bail!("monitor.interval_secs must be > 0");
    }
    if !(0.0..=100.0).contains(&monitor.warn_percent)
        || !(0.0..=100.0).contains(&monitor.critical_percent)
        || monitor.warn_percent > monitor.critical_percent
    {
        bail!("monitor thresholds must satisfy 0 <= warn_percent <= critical_percent <= 100");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[state]
path = "/tmp/state.sqlite"

[knowledge_base]
path = "/tmp/kb"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.max_chars, 1000);
        assert_eq!(cfg.chunking.overlap_chars, 100);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.vision.is_enabled());
        assert_eq!(cfg.monitor.interval_secs, 60);
        assert_eq!(cfg.export.min_memory_gb, 4.0);
        assert!(cfg.fields.priority.iter().any(|f| f == "merchant"));
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let text = format!("{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\n", MINIMAL);
        let err = parse_config(&text).unwrap_err().to_string();
        assert!(err.contains("embedding.dims"), "{}", err);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        let text = format!("{}\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_unknown_vision_provider_rejected() {
        let text = format!("{}\n[vision]\nprovider = \"cloud\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_config_survives_toml_roundtrip() {
        let text = format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\ndims = 384\n",
            MINIMAL
        );
        let cfg = parse_config(&text).unwrap();
        let rendered = toml::to_string_pretty(&cfg).unwrap();
        let again = parse_config(&rendered).unwrap();
        assert_eq!(again.embedding.dims, Some(384));
        assert_eq!(again.state.path, cfg.state.path);
    }
}
