//! Export manifest schema and its validator.
//!
//! The manifest (`manifest.json`) declares what an export package holds
//! and what a replica needs to load it. [`ManifestValidator`] runs the
//! same checks when a package is built and when one is loaded. It works
//! on raw [`serde_json::Value`] so an incomplete manifest is reported
//! field by field instead of as a single deserialization error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MANIFEST_VERSION: &str = "1.0";

const REQUIRED_FIELDS: [&str; 7] = [
    "version",
    "created_at",
    "export_kind",
    "primary_config",
    "replica_requirements",
    "statistics",
    "incremental",
];

const STATISTICS_FIELDS: [&str; 3] = ["total_documents", "total_chunks", "total_embeddings"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Full,
    Incremental,
}

impl ExportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportKind::Full => "full",
            ExportKind::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for ExportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Models in use on the exporting side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryConfig {
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub vision_model: String,
}

/// What the loading side must provide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaRequirements {
    pub conversational_model: String,
    pub min_memory_gb: f64,
    pub embedding_dimension: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportStatistics {
    #[serde(default)]
    pub total_documents: u64,
    #[serde(default)]
    pub total_chunks: u64,
    #[serde(default)]
    pub total_embeddings: u64,
    /// Files in the delta; incremental exports only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_documents: Option<u64>,
    #[serde(default)]
    pub knowledge_base_size_mb: f64,
    #[serde(default)]
    pub state_store_size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalInfo {
    pub is_incremental: bool,
    #[serde(default)]
    pub base_version: Option<String>,
    #[serde(default)]
    pub since_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub export_kind: ExportKind,
    pub primary_config: PrimaryConfig,
    pub replica_requirements: ReplicaRequirements,
    pub statistics: ExportStatistics,
    pub incremental: IncrementalInfo,
}

impl ExportManifest {
    /// Build a manifest stamped with the current time.
    pub fn new(
        export_kind: ExportKind,
        primary_config: PrimaryConfig,
        replica_requirements: ReplicaRequirements,
        statistics: ExportStatistics,
        since: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            created_at: Utc::now(),
            export_kind,
            primary_config,
            replica_requirements,
            statistics,
            incremental: IncrementalInfo {
                is_incremental: export_kind == ExportKind::Incremental,
                base_version: None,
                since_timestamp: since,
            },
        }
    }

    /// Dimension both sides agree on.
    pub fn embedding_dimension(&self) -> usize {
        self.primary_config.embedding_dimension
    }
}

/// Outcome of a manifest, package, or data check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.valid = false;
        self.errors.push(msg.into());
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Fold another result's findings into this one.
    pub fn absorb(&mut self, other: ValidationResult) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Structural and cross-field checks for `manifest.json`.
pub struct ManifestValidator;

impl ManifestValidator {
    /// Check a manifest in its JSON form.
    pub fn validate(value: &Value) -> ValidationResult {
        let mut result = ValidationResult::new();

        let Some(obj) = value.as_object() else {
            result.error("Manifest must be a JSON object");
            return result;
        };

        for field in REQUIRED_FIELDS {
            if !obj.contains_key(field) {
                result.error(format!("Missing required field: {}", field));
            }
        }

        if let Some(version) = obj.get("version").and_then(Value::as_str) {
            if version != MANIFEST_VERSION {
                result.warn(format!("Unknown manifest version: {}", version));
            }
        }

        if let Some(created) = obj.get("created_at") {
            if created
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .is_none()
            {
                result.error("created_at must be an RFC 3339 timestamp");
            }
        }

        let kind = obj.get("export_kind").map(|k| match k.as_str() {
            Some("full") => Some(ExportKind::Full),
            Some("incremental") => Some(ExportKind::Incremental),
            _ => None,
        });
        if let Some(None) = kind {
            result.error("export_kind must be 'full' or 'incremental'");
        }

        let primary_dim = obj
            .get("primary_config")
            .and_then(|p| check_primary(p, &mut result));
        let replica_dim = obj
            .get("replica_requirements")
            .and_then(|r| check_replica(r, &mut result));

        if let (Some(p), Some(r)) = (primary_dim, replica_dim) {
            if p != r {
                result.error(format!(
                    "Embedding dimension mismatch: primary_config={}, replica_requirements={}",
                    p, r
                ));
            }
        }

        if let Some(stats) = obj.get("statistics") {
            check_statistics(stats, &mut result);
        }

        if let Some(inc) = obj.get("incremental") {
            check_incremental(inc, kind.flatten(), &mut result);
        }

        result
    }

    /// Check an in-memory manifest.
    pub fn validate_manifest(manifest: &ExportManifest) -> ValidationResult {
        match serde_json::to_value(manifest) {
            Ok(value) => Self::validate(&value),
            Err(e) => {
                let mut result = ValidationResult::new();
                result.error(format!("Manifest cannot be serialized: {}", e));
                result
            }
        }
    }

    /// Validate, then deserialize. Warnings are returned with the manifest.
    pub fn parse(value: &Value) -> Result<(ExportManifest, ValidationResult), ValidationResult> {
        let mut result = Self::validate(value);
        if !result.valid {
            return Err(result);
        }
        match serde_json::from_value::<ExportManifest>(value.clone()) {
            Ok(manifest) => Ok((manifest, result)),
            Err(e) => {
                result.error(format!("Manifest does not match schema: {}", e));
                Err(result)
            }
        }
    }
}

fn positive_int(v: Option<&Value>) -> Option<u64> {
    v.and_then(Value::as_u64).filter(|&n| n > 0)
}

fn require_string(obj: &Value, section: &str, field: &str, result: &mut ValidationResult) {
    match obj.get(field) {
        None => result.error(format!("Missing {}.{}", section, field)),
        Some(v) if v.as_str().is_none() => {
            result.error(format!("{}.{} must be a string", section, field))
        }
        Some(_) => {}
    }
}

fn check_primary(section: &Value, result: &mut ValidationResult) -> Option<u64> {
    require_string(section, "primary_config", "embedding_model", result);
    require_string(section, "primary_config", "vision_model", result);
    dimension_field(section, "primary_config", result)
}

fn check_replica(section: &Value, result: &mut ValidationResult) -> Option<u64> {
    require_string(section, "replica_requirements", "conversational_model", result);
    match section.get("min_memory_gb") {
        None => result.error("Missing replica_requirements.min_memory_gb"),
        Some(v) if v.as_f64().filter(|&m| m > 0.0).is_none() => {
            result.error("replica_requirements.min_memory_gb must be a positive number")
        }
        Some(_) => {}
    }
    dimension_field(section, "replica_requirements", result)
}

fn dimension_field(section: &Value, name: &str, result: &mut ValidationResult) -> Option<u64> {
    match section.get("embedding_dimension") {
        None => {
            result.error(format!("Missing {}.embedding_dimension", name));
            None
        }
        Some(v) => {
            let dim = positive_int(Some(v));
            if dim.is_none() {
                result.error(format!(
                    "{}.embedding_dimension must be a positive integer",
                    name
                ));
            }
            dim
        }
    }
}

fn check_statistics(stats: &Value, result: &mut ValidationResult) {
    if !stats.is_object() {
        result.error("statistics must be an object");
        return;
    }
    for field in STATISTICS_FIELDS {
        match stats.get(field) {
            None => result.warn(format!("Missing statistics field: {}", field)),
            Some(v) if v.as_u64().is_none() => {
                result.error(format!("statistics.{} must be a non-negative integer", field))
            }
            Some(_) => {}
        }
    }
    if stats.get("total_chunks").and_then(Value::as_u64) == Some(0) {
        result.warn("Manifest reports zero chunks");
    }
    if stats.get("total_documents").and_then(Value::as_u64) == Some(0) {
        result.warn("Manifest reports zero documents");
    }
}

fn check_incremental(inc: &Value, kind: Option<ExportKind>, result: &mut ValidationResult) {
    let is_incremental = match inc.get("is_incremental") {
        None => {
            result.error("Missing incremental.is_incremental");
            return;
        }
        Some(v) => match v.as_bool() {
            Some(b) => b,
            None => {
                result.error("incremental.is_incremental must be a boolean");
                return;
            }
        },
    };

    if inc.get("base_version").is_none() {
        result.warn("Missing incremental.base_version");
    }

    match inc.get("since_timestamp") {
        None | Some(Value::Null) => {
            if is_incremental {
                result.error("Incremental manifest requires incremental.since_timestamp");
            }
        }
        Some(v) => {
            if v
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .is_none()
            {
                result.error("incremental.since_timestamp must be an RFC 3339 timestamp");
            }
        }
    }

    if let Some(kind) = kind {
        if (kind == ExportKind::Incremental) != is_incremental {
            result.warn(format!(
                "export_kind '{}' disagrees with incremental.is_incremental={}",
                kind, is_incremental
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(kind: ExportKind, since: Option<DateTime<Utc>>) -> ExportManifest {
        ExportManifest::new(
            kind,
            PrimaryConfig {
                embedding_model: "nomic-embed-text".into(),
                embedding_dimension: 384,
                vision_model: "qwen2.5vl".into(),
            },
            ReplicaRequirements {
                conversational_model: "llama3.2:1b".into(),
                min_memory_gb: 4.0,
                embedding_dimension: 384,
            },
            ExportStatistics {
                total_documents: 2,
                total_chunks: 5,
                total_embeddings: 5,
                ..Default::default()
            },
            since,
        )
    }

    #[test]
    fn test_built_manifest_is_valid() {
        let result = ManifestValidator::validate_manifest(&manifest(ExportKind::Full, None));
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_parse_returns_typed_manifest() {
        let m = manifest(ExportKind::Incremental, Some(Utc::now()));
        let value = serde_json::to_value(&m).unwrap();
        let (parsed, result) = ManifestValidator::parse(&value).unwrap();
        assert!(result.valid);
        assert_eq!(parsed, m);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let mut value = serde_json::to_value(manifest(ExportKind::Full, None)).unwrap();
        value["replica_requirements"]["embedding_dimension"] = json!(512);
        let result = ManifestValidator::validate(&value);
        assert!(!result.valid);
        assert!(result.errors[0].contains("mismatch"));
    }

    #[test]
    fn test_non_positive_fields_are_errors() {
        let mut value = serde_json::to_value(manifest(ExportKind::Full, None)).unwrap();
        value["primary_config"]["embedding_dimension"] = json!(0);
        value["replica_requirements"]["min_memory_gb"] = json!(-1);
        let result = ManifestValidator::validate(&value);
        assert_eq!(result.errors.len(), 2, "{:?}", result.errors);
    }

    #[test]
    fn test_incremental_requires_since() {
        let value = serde_json::to_value(manifest(ExportKind::Incremental, None)).unwrap();
        let result = ManifestValidator::validate(&value);
        assert!(!result.valid);
        assert!(result.errors[0].contains("since_timestamp"));
    }

    #[test]
    fn test_missing_fields_reported_individually() {
        let result = ManifestValidator::validate(&json!({
            "version": "1.0",
            "primary_config": {"embedding_dimension": 384}
        }));
        assert!(result
            .errors
            .contains(&"Missing required field: statistics".to_string()));
        assert!(result
            .errors
            .contains(&"Missing primary_config.embedding_model".to_string()));
        assert!(ManifestValidator::parse(&json!({"version": "1.0"})).is_err());
    }

    #[test]
    fn test_warnings_do_not_invalidate() {
        let mut m = manifest(ExportKind::Full, None);
        m.statistics.total_chunks = 0;
        m.statistics.total_documents = 0;
        let mut value = serde_json::to_value(&m).unwrap();
        value["incremental"]["is_incremental"] = json!(true);
        value["incremental"]["since_timestamp"] = json!("2026-01-01T00:00:00Z");
        let result = ManifestValidator::validate(&value);
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.warnings.len(), 3, "{:?}", result.warnings);
    }

    #[test]
    fn test_missing_statistics_fields_still_parse() {
        let mut value = serde_json::to_value(manifest(ExportKind::Full, None)).unwrap();
        let stats = value["statistics"].as_object_mut().unwrap();
        stats.remove("total_documents");
        stats.remove("total_embeddings");

        let result = ManifestValidator::validate(&value);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result
            .warnings
            .contains(&"Missing statistics field: total_documents".to_string()));

        let (parsed, warnings) = ManifestValidator::parse(&value).unwrap();
        assert_eq!(parsed.statistics.total_documents, 0);
        assert_eq!(parsed.statistics.total_chunks, 5);
        assert_eq!(warnings, result);
    }

    #[test]
    fn test_mistyped_statistics_field_is_error() {
        let mut value = serde_json::to_value(manifest(ExportKind::Full, None)).unwrap();
        value["statistics"]["total_chunks"] = json!("five");
        assert!(!ManifestValidator::validate(&value).valid);
        assert!(ManifestValidator::parse(&value).is_err());
    }
}
