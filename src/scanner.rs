//! Filesystem [`FolderScanner`].
//!
//! Walks a watched folder recursively and routes files by extension:
//! `.pdf .txt .md` go to text extraction, `.png .jpg .jpeg` to vision.
//! Matching is case-insensitive. Hidden entries and VCS directories are
//! skipped, as is anything matching a configured exclude glob (relative
//! to the folder root).

use std::path::Path;

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;
use crate::traits::{FolderScanner, ScanResult};

pub const TEXT_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub struct FsFolderScanner {
    excludes: GlobSet,
    follow_symlinks: bool,
}

impl FsFolderScanner {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let mut patterns = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
        patterns.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            excludes: build_globset(&patterns)?,
            follow_symlinks: config.follow_symlinks,
        })
    }
}

impl FolderScanner for FsFolderScanner {
    fn scan(&self, folder: &Path) -> Result<ScanResult> {
        if !folder.is_dir() {
            bail!("watched folder does not exist: {}", folder.display());
        }

        let mut result = ScanResult::default();
        let walker = WalkDir::new(folder)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(folder).unwrap_or(path);
            if self.excludes.is_match(relative) {
                continue;
            }

            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if TEXT_EXTENSIONS.contains(&ext.as_str()) {
                result.text.push(path.to_path_buf());
            } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                result.images.push(path.to_path_buf());
            }
        }

        result.text.sort();
        result.images.sort();
        Ok(result)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_routes_by_extension_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.TXT"), "x").unwrap();
        std::fs::write(root.join("sub/b.pdf"), "x").unwrap();
        std::fs::write(root.join("c.JPeG"), "x").unwrap();
        std::fs::write(root.join("d.docx"), "x").unwrap();

        let scanner = FsFolderScanner::new(&ScanConfig::default()).unwrap();
        let found = scanner.scan(root).unwrap();
        assert_eq!(found.text, vec![root.join("a.TXT"), root.join("sub/b.pdf")]);
        assert_eq!(found.images, vec![root.join("c.JPeG")]);
    }

    #[test]
    fn test_skips_hidden_and_excluded() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join(".cache")).unwrap();
        std::fs::create_dir_all(root.join("drafts")).unwrap();
        std::fs::write(root.join(".cache/a.txt"), "x").unwrap();
        std::fs::write(root.join(".hidden.md"), "x").unwrap();
        std::fs::write(root.join("drafts/b.txt"), "x").unwrap();
        std::fs::write(root.join("keep.md"), "x").unwrap();

        let config = ScanConfig {
            exclude_globs: vec!["drafts/**".into()],
            follow_symlinks: false,
        };
        let found = FsFolderScanner::new(&config).unwrap().scan(root).unwrap();
        assert_eq!(found.text, vec![root.join("keep.md")]);
        assert!(found.images.is_empty());
    }

    #[test]
    fn test_missing_folder_is_error() {
        let scanner = FsFolderScanner::new(&ScanConfig::default()).unwrap();
        assert!(scanner.scan(Path::new("/definitely/not/here")).is_err());
    }
}
