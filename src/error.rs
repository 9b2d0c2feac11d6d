//! Error taxonomy for docbridge operations.
//!
//! Batch entry points (processing, export, merge) never return these to
//! their caller for per-item problems; they record them as strings in the
//! structured result. Single-item operations (tracker, state store,
//! packaging preconditions) return them directly.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad path, owner, kind, or schema violation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Dimension or manifest mismatch, missing embeddings or metadata.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("insufficient resources: {0}")]
    ResourceExhaustion(String),

    /// Embedding or vision collaborator failed.
    #[error("external service failed: {0}")]
    TransientExternal(String),

    /// File exists but cannot be read.
    #[error("unreadable file: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify an I/O failure on `path`: missing files are `NotFound`,
    /// everything else is `Corruption`.
    pub fn from_file_io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.display().to_string())
        } else {
            Error::Corruption(format!("{}: {}", path.display(), err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_file_io_classification() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            Error::from_file_io(Path::new("/x"), missing),
            Error::NotFound(_)
        ));
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(
            Error::from_file_io(Path::new("/x"), denied),
            Error::Corruption(_)
        ));
    }
}
