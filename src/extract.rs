//! Text extraction for `.pdf`, `.txt`, and `.md` files.
//!
//! Plain text is read as UTF-8 with invalid sequences replaced. PDFs are
//! parsed page by page with `pdf-extract` on a blocking thread; each page
//! is scored by [`needs_vision`] so the orchestrator can send poor text
//! layers through the vision model as well.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::traits::{Extraction, PageText, TextExtractor};

/// Pages with fewer trimmed characters than this are treated as image-only.
const SPARSE_PAGE_CHARS: usize = 100;
/// Minimum trimmed length before the readable-character ratio is checked.
const QUALITY_MIN_CHARS: usize = 50;
const MIN_READABLE_RATIO: f64 = 0.5;
const TABLE_LINE_RATIO: f64 = 0.4;

#[derive(Debug, Default, Clone, Copy)]
pub struct FileTextExtractor;

#[async_trait]
impl TextExtractor for FileTextExtractor {
    async fn extract(&self, path: &Path) -> Result<Extraction> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "md" => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Ok(Extraction::Plain(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ))
            }
            "pdf" => {
                let owned: PathBuf = path.to_path_buf();
                let pages = tokio::task::spawn_blocking(move || extract_pdf_pages(&owned)).await??;
                Ok(Extraction::Pages(pages))
            }
            other => bail!("unsupported file type '{}': {}", other, path.display()),
        }
    }
}

fn extract_pdf_pages(path: &Path) -> Result<Vec<PageText>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let texts = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| anyhow::anyhow!("PDF extraction failed for {}: {}", path.display(), e))?;

    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page_number: i as u32 + 1,
            needs_vision: needs_vision(&text),
            text,
        })
        .collect())
}

/// Whether a page's extracted text is too sparse, garbled, or tabular to
/// be trusted on its own.
pub fn needs_vision(text: &str) -> bool {
    let trimmed = text.trim();
    let len = trimmed.chars().count();

    if len < SPARSE_PAGE_CHARS {
        return true;
    }

    if len > QUALITY_MIN_CHARS {
        let readable = trimmed
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
            .count();
        if (readable as f64 / len as f64) < MIN_READABLE_RATIO {
            return true;
        }
    }

    let lines: Vec<&str> = text.lines().collect();
    let table_lines = lines
        .iter()
        .filter(|l| l.matches("   ").count() >= 2 || l.contains("\t\t"))
        .count();
    table_lines as f64 > lines.len() as f64 * TABLE_LINE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prose() -> String {
        "The quarterly report covers revenue, expenses, and outlook for the region. ".repeat(4)
    }

    #[test]
    fn test_sparse_page_needs_vision() {
        assert!(needs_vision(""));
        assert!(needs_vision("   Invoice #42   "));
        assert!(!needs_vision(&prose()));
    }

    #[test]
    fn test_garbled_page_needs_vision() {
        let garbled = "§¶•ªº–≠‰€£¥©®™".repeat(10);
        assert!(needs_vision(&garbled));
    }

    #[test]
    fn test_tabular_page_needs_vision() {
        let table = "Item   Qty   Price\nApple   2   1.00\nPear   3   2.50\nPlum   1   0.75\n".repeat(3);
        assert!(needs_vision(&table));

        let mostly_prose = format!("{}\nA   B   C\n", prose());
        assert!(!needs_vision(&mostly_prose));
    }

    #[tokio::test]
    async fn test_plain_text_read_lossily() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.md");
        std::fs::write(&path, b"hello \xff world").unwrap();

        let out = FileTextExtractor.extract(&path).await.unwrap();
        match out {
            Extraction::Plain(text) => assert!(text.starts_with("hello ")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_extension_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.docx");
        std::fs::write(&path, "x").unwrap();
        assert!(FileTextExtractor.extract(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_pdf_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, "not a pdf").unwrap();
        assert!(FileTextExtractor.extract(&path).await.is_err());
    }
}
