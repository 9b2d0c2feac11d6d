//! Filesystem helpers for packaging: tree sizes, recursive copy, free
//! space, zip archives.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Total size in bytes of every regular file under `path` (or of `path`
/// itself if it is a file). Missing paths count as zero.
pub fn tree_size(path: &Path) -> u64 {
    if path.is_file() {
        return std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Copy a directory tree, skipping files for which `skip` returns true.
pub fn copy_tree(src: &Path, dest: &Path, skip: impl Fn(&Path) -> bool) -> Result<u64> {
    let mut copied = 0u64;
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() && !skip(entry.path()) {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            copied += std::fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(copied)
}

/// SQLite shared-memory index files are rebuilt on open and never copied.
pub fn is_shm_file(path: &Path) -> bool {
    path.to_string_lossy().ends_with("-shm")
}

/// The closest ancestor of `path` (or `path` itself) that exists.
pub fn nearest_existing(path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    absolute.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
}

/// Bytes available to unprivileged users on the filesystem holding
/// `path`, or `None` if it cannot be determined.
pub fn free_space(path: &Path) -> Option<u64> {
    let existing = nearest_existing(path)?;
    fs4::available_space(&existing).ok()
}

/// Write `dir` into a deflate-compressed zip at `archive`. Entries are
/// prefixed with the directory's own name.
pub fn zip_dir(dir: &Path, archive: &Path) -> Result<u64> {
    let root_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "package".to_string());

    let file = File::create(archive)
        .with_context(|| format!("Failed to create archive {}", archive.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut buf = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let name = Path::new(&root_name)
            .join(relative)
            .to_string_lossy()
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name.trim_end_matches('/')), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            buf.clear();
            File::open(entry.path())?.read_to_end(&mut buf)?;
            zip.write_all(&buf)?;
        }
    }

    let file = zip.finish()?;
    Ok(file.metadata()?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_skips_shm_and_sizes_match() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("kb.sqlite"), b"12345").unwrap();
        std::fs::write(src.join("kb.sqlite-shm"), b"xx").unwrap();
        std::fs::write(src.join("nested/a.bin"), b"abc").unwrap();

        let dest = tmp.path().join("dest");
        copy_tree(&src, &dest, is_shm_file).unwrap();
        assert!(dest.join("kb.sqlite").exists());
        assert!(dest.join("nested/a.bin").exists());
        assert!(!dest.join("kb.sqlite-shm").exists());
        assert_eq!(tree_size(&dest), 8);
        assert_eq!(tree_size(&tmp.path().join("missing")), 0);
    }

    #[test]
    fn test_nearest_existing_walks_up() {
        let tmp = TempDir::new().unwrap();
        let deep = tmp.path().join("a/b/c");
        assert_eq!(nearest_existing(&deep).unwrap(), tmp.path());
    }

    #[test]
    fn test_free_space_is_reported() {
        let tmp = TempDir::new().unwrap();
        assert!(free_space(&tmp.path().join("not/yet")).is_some());
    }

    #[test]
    fn test_zip_contains_prefixed_entries() {
        let tmp = TempDir::new().unwrap();
        let pkg = tmp.path().join("pkg");
        std::fs::create_dir_all(pkg.join("knowledge_base")).unwrap();
        std::fs::write(pkg.join("manifest.json"), b"{}").unwrap();
        let archive = tmp.path().join("pkg.zip");
        zip_dir(&pkg, &archive).unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert!(zip.by_name("pkg/manifest.json").is_ok());
    }
}
