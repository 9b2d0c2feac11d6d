//! Vision extraction and PDF page rasterization.
//!
//! [`OllamaVisionExtractor`] sends a base64 image to Ollama's
//! `/api/generate` with `format: "json"` and reads back a flat object of
//! fields. Models that ignore the format hint are handled by falling back
//! to `Key: value` line parsing; the full response is always kept as raw
//! text. [`PdftoppmRasterizer`] renders pages with poppler's `pdftoppm`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use tracing::debug;

use crate::config::VisionConfig;
use crate::http::{self, JsonPost};
use crate::traits::{PageImage, PageRasterizer, VisionExtraction, VisionExtractor};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

const EXTRACTION_PROMPT: &str = "Extract the content of this document image as a flat JSON object. \
Include document_type, title, merchant or vendor, date, total amount, payment method, and line items \
when present, plus a raw_text field with all readable text.";

pub struct OllamaVisionExtractor {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaVisionExtractor {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("vision.model required for Ollama provider"))?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl VisionExtractor for OllamaVisionExtractor {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn extract(&self, image: &[u8]) -> Result<VisionExtraction> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": EXTRACTION_PROMPT,
            "images": [encoded],
            "format": "json",
            "stream": false,
        });

        let json = http::post_json(
            &self.client,
            JsonPost {
                url: format!("{}/api/generate", self.url.trim_end_matches('/')),
                bearer: None,
                body: &body,
                max_retries: self.max_retries,
                service: "Ollama",
            },
        )
        .await?;

        let response = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response text"))?;
        Ok(parse_vision_response(response))
    }
}

/// Turn a model response into fields and raw text.
pub fn parse_vision_response(response: &str) -> VisionExtraction {
    let cleaned = strip_wrappers(response);

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(&cleaned)
    {
        let mut fields: BTreeMap<String, serde_json::Value> = map.into_iter().collect();
        let raw_text = match fields.remove("raw_text") {
            Some(serde_json::Value::String(s)) => s,
            _ => cleaned.clone(),
        };
        return VisionExtraction { fields, raw_text };
    }

    debug!("vision response is not a JSON object, parsing key/value lines");
    let mut fields = BTreeMap::new();
    for line in cleaned.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '•']).trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase().replace(' ', "_");
        let value = value.trim();
        if key.is_empty() || value.is_empty() || key.len() > 40 {
            continue;
        }
        fields
            .entry(key)
            .or_insert_with(|| serde_json::Value::String(value.to_string()));
    }
    VisionExtraction {
        fields,
        raw_text: cleaned,
    }
}

/// Remove reasoning blocks and markdown code fences some models emit.
fn strip_wrappers(response: &str) -> String {
    let mut text = response.to_string();
    while let Some(start) = text.find("<think>") {
        match text[start..].find("</think>") {
            Some(end) => text.replace_range(start..start + end + "</think>".len(), ""),
            None => {
                text.truncate(start);
                break;
            }
        }
    }

    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    unfenced.trim().to_string()
}

/// Renders PDF pages to PNG with a `pdftoppm`-compatible executable.
pub struct PdftoppmRasterizer {
    program: String,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(config: &VisionConfig) -> Self {
        Self {
            program: config.rasterizer.clone(),
            dpi: config.dpi,
        }
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn rasterize(&self, pdf: &Path, page: Option<u32>) -> Result<Vec<PageImage>> {
        let out_dir = tempfile::tempdir().context("Failed to create rasterizer temp dir")?;
        let prefix = out_dir.path().join("page");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("-png").arg("-r").arg(self.dpi.to_string());
        if let Some(n) = page {
            cmd.arg("-f").arg(n.to_string()).arg("-l").arg(n.to_string());
        }
        cmd.arg(pdf).arg(&prefix);

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !output.status.success() {
            bail!(
                "{} failed for {}: {}",
                self.program,
                pdf.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        // Output files are `page-<n>.png`, zero-padded by page count.
        let mut images = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(number) = name
                .strip_prefix("page-")
                .and_then(|s| s.strip_suffix(".png"))
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            images.push(PageImage {
                page_number: number,
                bytes: tokio::fs::read(entry.path()).await?,
            });
        }
        images.sort_by_key(|i| i.page_number);
        Ok(images)
    }
}
