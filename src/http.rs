//! JSON-over-HTTP calls with retry and exponential backoff, shared by
//! the embedding and vision clients.
//!
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::warn;

pub struct JsonPost<'a> {
    pub url: String,
    pub bearer: Option<&'a str>,
    pub body: &'a serde_json::Value,
    pub max_retries: u32,
    /// Service name used in error messages (`"OpenAI"`, `"Ollama"`).
    pub service: &'a str,
}

pub async fn post_json(client: &reqwest::Client, req: JsonPost<'_>) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=req.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut builder = client
            .post(&req.url)
            .header("Content-Type", "application/json")
            .json(req.body);
        if let Some(token) = req.bearer {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(service = req.service, %status, attempt, "retryable API error");
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        req.service,
                        status,
                        body_text
                    ));
                    continue;
                }

                bail!("{} API error {}: {}", req.service, status, body_text);
            }
            Err(e) => {
                warn!(service = req.service, attempt, error = %e, "connection error");
                last_err = Some(anyhow::anyhow!(
                    "{} connection error ({}): {}",
                    req.service,
                    req.url,
                    e
                ));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", req.service)))
}

pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}
