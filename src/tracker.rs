//! Content-hash change detection for watched files.
//!
//! A file is identified by its normalized absolute path and owner. Its
//! SHA-256 digest and modification time are compared against the last
//! committed [`ProcessedFileRecord`] to decide whether it needs
//! reprocessing. Nothing is written until [`FileChangeTracker::commit`]
//! runs, which the orchestrator calls only after the file's chunks are
//! stored.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use docbridge_core::models::{normalize_path, FileKind, FileState};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{FileUpsert, ProcessedFileRecord};
use crate::state::StateStore;

const HASH_BUFFER: usize = 8192;

/// Digest and mtime of a file as it is on disk now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub content_hash: String,
    pub modified_at: i64,
}

#[derive(Clone)]
pub struct FileChangeTracker {
    state: StateStore,
}

impl FileChangeTracker {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Decide whether `path` is new, modified, or unchanged for `owner`.
    pub async fn classify(&self, path: &Path, owner: &str) -> Result<FileState> {
        let owner = self.state.require_owner(owner).await?;
        let fingerprint = fingerprint(path).await?;
        let key = path_key(path);

        let state = match self.state.get_file(&key, owner.id).await? {
            None => FileState::New,
            Some(rec)
                if rec.content_hash != fingerprint.content_hash
                    || fingerprint.modified_at > rec.modified_at =>
            {
                FileState::Modified
            }
            Some(_) => FileState::Unchanged,
        };
        debug!(file = %key, state = %state, "classified");
        Ok(state)
    }

    /// Record `path` as processed. The hash and mtime are recomputed so
    /// the record describes the bytes that were actually chunked.
    pub async fn commit(
        &self,
        path: &Path,
        folder_id: i64,
        kind: FileKind,
        owner: &str,
    ) -> Result<ProcessedFileRecord> {
        let owner = self.state.require_owner(owner).await?;
        let folder = self
            .state
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("unknown folder id {}", folder_id)))?;
        if folder.owner_id != owner.id {
            return Err(Error::Validation(format!(
                "folder {} does not belong to owner '{}'",
                folder.path, owner.name
            )));
        }

        let fingerprint = fingerprint(path).await?;
        self.state
            .upsert_file(&FileUpsert {
                file_path: path_key(path),
                owner_id: owner.id,
                folder_id,
                content_hash: fingerprint.content_hash,
                modified_at: fingerprint.modified_at,
                file_kind: kind,
            })
            .await
    }
}

/// Key under which a file's state is stored.
pub fn path_key(path: &Path) -> String {
    normalize_path(&path.to_string_lossy())
}

/// Hash the file off the async runtime.
pub async fn fingerprint(path: &Path) -> Result<FileFingerprint> {
    let owned: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_blocking(&owned))
        .await
        .map_err(|e| Error::Other(e.into()))?
}

fn fingerprint_blocking(path: &Path) -> Result<FileFingerprint> {
    let meta = std::fs::metadata(path).map_err(|e| Error::from_file_io(path, e))?;
    if !meta.is_file() {
        return Err(Error::Validation(format!(
            "not a regular file: {}",
            path.display()
        )));
    }
    let modified_at = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let mut file = File::open(path).map_err(|e| Error::from_file_io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BUFFER];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::from_file_io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(FileFingerprint {
        content_hash: hex::encode(hasher.finalize()),
        modified_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup(tmp: &TempDir) -> (FileChangeTracker, i64, PathBuf) {
        let state = StateStore::open(&tmp.path().join("state.sqlite"))
            .await
            .unwrap();
        state.ensure_owner("alice").await.unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        let folder = state.add_folder(&docs, "alice").await.unwrap();
        (
            FileChangeTracker::new(state),
            folder.id,
            PathBuf::from(folder.path),
        )
    }

    #[tokio::test]
    async fn test_new_then_unchanged_then_modified() {
        let tmp = TempDir::new().unwrap();
        let (tracker, folder_id, docs) = setup(&tmp).await;
        let file = docs.join("a.txt");
        std::fs::write(&file, "first").unwrap();

        assert_eq!(tracker.classify(&file, "alice").await.unwrap(), FileState::New);
        tracker
            .commit(&file, folder_id, FileKind::Text, "alice")
            .await
            .unwrap();
        assert_eq!(
            tracker.classify(&file, "alice").await.unwrap(),
            FileState::Unchanged
        );

        std::fs::write(&file, "second").unwrap();
        assert_eq!(
            tracker.classify(&file, "alice").await.unwrap(),
            FileState::Modified
        );
    }

    #[tokio::test]
    async fn test_hash_matches_sha256_hex() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("x.txt");
        std::fs::write(&file, "abc").unwrap();
        let fp = fingerprint(&file).await.unwrap();
        assert_eq!(
            fp.content_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let (tracker, folder_id, docs) = setup(&tmp).await;
        let gone = docs.join("gone.txt");
        assert!(matches!(
            tracker.classify(&gone, "alice").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            tracker.commit(&gone, folder_id, FileKind::Text, "alice").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_rejects_foreign_folder_and_unknown_owner() {
        let tmp = TempDir::new().unwrap();
        let (tracker, folder_id, docs) = setup(&tmp).await;
        let file = docs.join("a.txt");
        std::fs::write(&file, "x").unwrap();
        tracker.state().ensure_owner("bob").await.unwrap();

        assert!(matches!(
            tracker.commit(&file, folder_id, FileKind::Text, "bob").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            tracker.commit(&file, folder_id, FileKind::Text, "carol").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            tracker.commit(&file, 9999, FileKind::Text, "alice").await,
            Err(Error::Validation(_))
        ));
    }
}
