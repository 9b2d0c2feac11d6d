//! State-store row types.
//!
//! Timestamps are unix milliseconds. Chunk-level types live in
//! [`docbridge_core::models`].

use chrono::Utc;
use docbridge_core::models::FileKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Owner {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchedFolder {
    pub id: i64,
    /// Absolute path with `/` separators.
    pub path: String,
    pub owner_id: i64,
    pub owner: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedFileRecord {
    pub id: i64,
    pub file_path: String,
    pub owner_id: i64,
    pub folder_id: i64,
    /// SHA-256, lowercase hex.
    pub content_hash: String,
    /// File mtime when last processed.
    pub modified_at: i64,
    pub processed_at: i64,
    pub file_kind: FileKind,
}

/// Values written by a tracker commit. `processed_at` is stamped by the store.
#[derive(Debug, Clone)]
pub struct FileUpsert {
    pub file_path: String,
    pub owner_id: i64,
    pub folder_id: i64,
    pub content_hash: String,
    pub modified_at: i64,
    pub file_kind: FileKind,
}

/// A processed-file row with owner and folder resolved to names, so it
/// can be applied to a different state store whose ids differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableFileRecord {
    pub file_path: String,
    pub owner: String,
    pub folder_path: String,
    pub content_hash: String,
    pub modified_at: i64,
    pub processed_at: i64,
    pub file_kind: FileKind,
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
