//! Core data types shared by processing, export, and merge.
//!
//! A [`DocumentChunk`] is the unit stored in a knowledge base: text, an
//! optional embedding vector, and [`ChunkMetadata`]. Metadata is a small
//! wrapping struct for the three keys every chunk must carry plus an open,
//! ordered extension map of scalar [`MetadataValue`]s.
//!
//! Chunks are linked back to processed-file state rows through their
//! reconstructed path ([`reconstruct_path`]), not through a foreign key.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Metadata keys every stored chunk must carry.
pub const REQUIRED_METADATA_KEYS: [&str; 3] = ["filename", "folder_path", "file_kind"];

/// Kind of source file a chunk was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Image,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Image => "image",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a [`FileKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFileKind(pub String);

impl fmt::Display for UnknownFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown file kind '{}' (expected text or image)", self.0)
    }
}

impl std::error::Error for UnknownFileKind {}

impl FromStr for FileKind {
    type Err = UnknownFileKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(FileKind::Text),
            "image" => Ok(FileKind::Image),
            other => Err(UnknownFileKind(other.to_string())),
        }
    }
}

/// Change-detection verdict for a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// No processed-file record exists.
    New,
    /// Content hash differs, or the file's mtime is newer than recorded.
    Modified,
    Unchanged,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::New => "new",
            FileState::Modified => "modified",
            FileState::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed scalar type for chunk metadata values.
///
/// Serialized untagged, so a metadata map round-trips through JSON as a
/// flat object. Variant order matters for deserialization: integers are
/// tried before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert a JSON value, keeping only scalars.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(MetadataValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(MetadataValue::Int)
                .or_else(|| n.as_f64().map(MetadataValue::Float)),
            serde_json::Value::String(s) => Some(MetadataValue::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(n) => write!(f, "{}", n),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Str(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Str(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Int(n)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        MetadataValue::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Per-chunk metadata.
///
/// The mandatory keys deserialize to empty strings when absent so that
/// chunks written by other tools can still be loaded and then reported by
/// the data validator instead of failing the whole scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub folder_path: String,
    #[serde(default)]
    pub file_kind: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, MetadataValue>,
}

impl ChunkMetadata {
    pub fn new(filename: impl Into<String>, folder_path: impl Into<String>, kind: FileKind) -> Self {
        Self {
            filename: filename.into(),
            folder_path: folder_path.into(),
            file_kind: kind.as_str().to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Builder-style insert into the extension map.
    pub fn with(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert into the extension map. Mandatory keys are never shadowed.
    pub fn insert(&mut self, key: &str, value: impl Into<MetadataValue>) {
        if REQUIRED_METADATA_KEYS.contains(&key) {
            return;
        }
        self.extra.insert(key.to_string(), value.into());
    }

    /// Look up any key, mandatory or extension.
    pub fn get(&self, key: &str) -> Option<MetadataValue> {
        match key {
            "filename" => Some(MetadataValue::Str(self.filename.clone())),
            "folder_path" => Some(MetadataValue::Str(self.folder_path.clone())),
            "file_kind" => Some(MetadataValue::Str(self.file_kind.clone())),
            other => self.extra.get(other).cloned(),
        }
    }

    pub fn kind(&self) -> Option<FileKind> {
        self.file_kind.parse().ok()
    }

    /// Mandatory keys that are empty or, for `file_kind`, not a known kind.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.filename.trim().is_empty() {
            missing.push("filename");
        }
        if self.folder_path.trim().is_empty() {
            missing.push("folder_path");
        }
        if self.kind().is_none() {
            missing.push("file_kind");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// The source file path this chunk was derived from.
    pub fn file_path(&self) -> String {
        reconstruct_path(&self.folder_path, &self.filename)
    }
}

/// A unit of embeddable content stored in a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Assigned by the knowledge base on insertion.
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    pub metadata: ChunkMetadata,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl DocumentChunk {
    pub fn new(content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: None,
            content: content.into(),
            metadata,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// True when the chunk carries a non-empty vector.
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|v| !v.is_empty())
    }

    pub fn file_path(&self) -> String {
        self.metadata.file_path()
    }
}

/// Normalize path separators to `/` so paths compare equal across platforms.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Join a chunk's `folder_path` and `filename` metadata into a file path.
///
/// ```rust
/// use docbridge_core::models::reconstruct_path;
///
/// assert_eq!(reconstruct_path("/data/docs/", "a.pdf"), "/data/docs/a.pdf");
/// assert_eq!(reconstruct_path("C:\\docs", "b.txt"), "C:/docs/b.txt");
/// ```
pub fn reconstruct_path(folder_path: &str, filename: &str) -> String {
    let folder = normalize_path(folder_path);
    let trimmed = folder.trim_end_matches('/');
    if trimmed.is_empty() {
        if folder.starts_with('/') {
            return format!("/{}", filename);
        }
        return filename.to_string();
    }
    format!("{}/{}", trimmed, filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruct_path_root_and_relative() {
        assert_eq!(reconstruct_path("/", "a.txt"), "/a.txt");
        assert_eq!(reconstruct_path("", "a.txt"), "a.txt");
        assert_eq!(reconstruct_path("docs", "a.txt"), "docs/a.txt");
    }

    #[test]
    fn test_metadata_flattens_extension_keys() {
        let meta = ChunkMetadata::new("a.pdf", "/docs", FileKind::Text)
            .with("chunk_index", 2i64)
            .with("page_number", 1i64)
            .with("total", 12.5)
            .with("merchant", "ACME");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["filename"], "a.pdf");
        assert_eq!(json["chunk_index"], 2);
        assert_eq!(json["merchant"], "ACME");

        let back: ChunkMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.get("total"), Some(MetadataValue::Float(12.5)));
        assert_eq!(back.get("chunk_index").and_then(|v| v.as_i64()), Some(2));
    }

    #[test]
    fn test_missing_mandatory_keys_are_reported() {
        let meta: ChunkMetadata =
            serde_json::from_str(r#"{"filename":"a.txt","file_kind":"audio"}"#).unwrap();
        assert_eq!(meta.missing_fields(), vec!["folder_path", "file_kind"]);
        assert!(!meta.is_complete());
    }

    #[test]
    fn test_insert_never_shadows_mandatory_keys() {
        let mut meta = ChunkMetadata::new("a.txt", "/d", FileKind::Text);
        meta.insert("filename", "evil.txt");
        assert_eq!(meta.filename, "a.txt");
        assert!(meta.extra.is_empty());
    }

    #[test]
    fn test_file_kind_parse() {
        assert_eq!("image".parse::<FileKind>().unwrap(), FileKind::Image);
        assert!("video".parse::<FileKind>().is_err());
    }

    #[test]
    fn test_has_embedding_requires_values() {
        let meta = ChunkMetadata::new("a.txt", "/d", FileKind::Text);
        assert!(!DocumentChunk::new("x", meta.clone()).has_embedding());
        assert!(!DocumentChunk::new("x", meta.clone())
            .with_embedding(vec![])
            .has_embedding());
        assert!(DocumentChunk::new("x", meta)
            .with_embedding(vec![0.1])
            .has_embedding());
    }
}
