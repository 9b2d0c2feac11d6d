//! Ordering and filtering of vision-extracted fields.
//!
//! Vision models return an open set of keys. A [`FieldClassifier`]
//! decides which come first in the chunk text, which are kept, and which
//! are dropped; [`format_extraction`] renders the result as the chunk
//! content and [`flatten_scalar_fields`] copies scalar values into chunk
//! metadata.

use std::collections::BTreeMap;

use docbridge_core::models::MetadataValue;

use crate::config::FieldsConfig;
use crate::traits::VisionExtraction;

/// Maximum characters rendered per field value.
pub const MAX_FIELD_CHARS: usize = 2000;
/// Maximum characters of raw text appended after the fields.
pub const MAX_RAW_TEXT_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldRank {
    Priority,
    Normal,
    Skip,
}

pub trait FieldClassifier: Send + Sync {
    fn rank(&self, key: &str) -> FieldRank;
}

/// Case-insensitive substring matching against keyword lists. Skip
/// keywords win over priority keywords.
pub struct KeywordFieldClassifier {
    priority: Vec<String>,
    skip: Vec<String>,
}

impl KeywordFieldClassifier {
    pub fn new(config: &FieldsConfig) -> Self {
        Self {
            priority: config.priority.iter().map(|k| k.to_lowercase()).collect(),
            skip: config.skip.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

impl Default for KeywordFieldClassifier {
    fn default() -> Self {
        Self::new(&FieldsConfig::default())
    }
}

impl FieldClassifier for KeywordFieldClassifier {
    fn rank(&self, key: &str) -> FieldRank {
        let key = key.to_lowercase();
        if self.skip.iter().any(|k| key.contains(k.as_str())) {
            FieldRank::Skip
        } else if self.priority.iter().any(|k| key.contains(k.as_str())) {
            FieldRank::Priority
        } else {
            FieldRank::Normal
        }
    }
}

/// Render fields as `Field Name: value` lines, priority fields first, then
/// a `Raw Text:` section.
pub fn format_extraction(extraction: &VisionExtraction, classifier: &dyn FieldClassifier) -> String {
    let mut ranked: Vec<(FieldRank, &String, &serde_json::Value)> = extraction
        .fields
        .iter()
        .map(|(k, v)| (classifier.rank(k), k, v))
        .filter(|(rank, _, v)| *rank != FieldRank::Skip && !is_empty_value(v))
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    let mut out = String::new();
    for (_, key, value) in ranked {
        out.push_str(&display_name(key));
        out.push_str(": ");
        out.push_str(&truncate_chars(&render_value(value), MAX_FIELD_CHARS));
        out.push('\n');
    }

    let raw = extraction.raw_text.trim();
    if !raw.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("Raw Text:\n");
        out.push_str(&truncate_chars(raw, MAX_RAW_TEXT_CHARS));
    }
    out.trim_end().to_string()
}

/// Scalar, non-skipped fields as chunk metadata. Nested values are left
/// in the chunk text only.
pub fn flatten_scalar_fields(
    extraction: &VisionExtraction,
    classifier: &dyn FieldClassifier,
) -> BTreeMap<String, MetadataValue> {
    extraction
        .fields
        .iter()
        .filter(|(k, _)| classifier.rank(k) != FieldRank::Skip)
        .filter_map(|(k, v)| {
            let value = MetadataValue::from_json(v)?;
            if matches!(&value, MetadataValue::Str(s) if s.trim().is_empty()) {
                return None;
            }
            Some((k.to_lowercase().replace(' ', "_"), value))
        })
        .collect()
}

fn is_empty_value(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn render_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

/// `merchant_name` → `Merchant Name`.
fn display_name(key: &str) -> String {
    key.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
