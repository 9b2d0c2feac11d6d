//! Character-window text chunker.
//!
//! Splits extracted text into overlapping windows of at most `max_chars`
//! characters. A window prefers to end at a paragraph break, then a line
//! break, then a space, provided the break lies at or past `min_chars`
//! into the window; otherwise it is cut hard at `max_chars`. Consecutive
//! windows share `overlap_chars` characters.
//!
//! Windows are measured in `char`s, never bytes, so multi-byte text is
//! never split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use docbridge_core::chunk::{chunk_text, ChunkOptions};
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", &ChunkOptions::default());
//! assert_eq!(chunks.len(), 1);
//! ```

/// Window sizing for [`chunk_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_chars: usize,
    /// A soft break is only taken this far into the window.
    pub min_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            min_chars: 500,
            overlap_chars: 100,
        }
    }
}

/// Split `text` into trimmed, non-empty windows.
///
/// Returns an empty vector for blank input.
pub fn chunk_text(text: &str, opts: &ChunkOptions) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let max = opts.max_chars.max(1);
    let overlap = opts.overlap_chars.min(max - 1);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let hard_end = (start + max).min(total);
        let end = if hard_end < total {
            find_break(&chars, start, hard_end, opts.min_chars)
        } else {
            hard_end
        };

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= total {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Find the end (exclusive) of a window starting at `start`.
fn find_break(chars: &[char], start: usize, hard_end: usize, min_chars: usize) -> usize {
    let floor = (start + min_chars).min(hard_end);

    let paragraph = (floor..hard_end)
        .rev()
        .find(|&i| chars[i] == '\n' && i > start && chars[i - 1] == '\n');
    let line = || (floor..hard_end).rev().find(|&i| chars[i] == '\n');
    let space = || (floor..hard_end).rev().find(|&i| chars[i].is_whitespace());

    paragraph
        .or_else(line)
        .or_else(space)
        .map(|i| i + 1)
        .unwrap_or(hard_end)
}
