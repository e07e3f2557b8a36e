//! PDF downloader with retry/backoff and content sniffing.
//!
//! The downloader only produces bytes; the orchestrator hands them to
//! StorageLayout for the atomic `source.pdf` write. Skips are per-paper and
//! never fatal to the job.

use std::time::Duration;

use lamina_common::config::DownloadConfig;
use lamina_common::net::ConfinedClient;
use lamina_common::LaminaError;
use tracing::{debug, instrument, warn};

use crate::models::{PaperRecord, SkipReason};

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched { bytes: Vec<u8> },
    Skipped(SkipReason),
}

pub struct Downloader {
    client: ConfinedClient,
    cfg: DownloadConfig,
}

impl Downloader {
    pub fn new(client: ConfinedClient, cfg: DownloadConfig) -> Self {
        Self { client, cfg }
    }

    /// Fetch a paper's PDF. Transient failures (network, 5xx) are retried
    /// with exponential backoff up to the configured attempt count; 4xx is
    /// terminal for the paper.
    #[instrument(skip(self, record), fields(key = %record.paper_key()))]
    pub async fn fetch(&self, record: &PaperRecord) -> FetchOutcome {
        let Some(url) = record.pdf_url.as_deref() else {
            return FetchOutcome::Skipped(SkipReason::NoUrl);
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_fetch(url).await {
                Ok(outcome) => return outcome,
                Err(Attempt::Terminal(reason)) => return FetchOutcome::Skipped(reason),
                Err(Attempt::Transient(msg)) => {
                    if attempt >= self.cfg.max_attempts {
                        warn!(url, attempts = attempt, "download retries exhausted: {msg}");
                        return FetchOutcome::Skipped(SkipReason::ExceededRetry);
                    }
                    let backoff = self.cfg.backoff_base_ms * 2u64.pow(attempt - 1);
                    debug!(url, attempt, backoff_ms = backoff, "transient download failure: {msg}");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<FetchOutcome, Attempt> {
        let request = match self.client.get(url) {
            Ok(r) => r,
            // Host outside the allowlist is a policy decision, not a retry case.
            Err(LaminaError::Security(msg)) => {
                warn!(url, "refusing download: {msg}");
                return Err(Attempt::Terminal(SkipReason::Forbidden));
            }
            Err(e) => return Err(Attempt::Transient(e.to_string())),
        };

        let resp = request.send().await.map_err(|e| Attempt::Transient(e.to_string()))?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(Attempt::Transient(format!("HTTP {status}")));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Attempt::Terminal(SkipReason::NotFound));
        }
        if status.is_client_error() {
            return Err(Attempt::Terminal(SkipReason::Forbidden));
        }
        if !status.is_success() {
            return Err(Attempt::Transient(format!("HTTP {status}")));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if let Some(len) = resp.content_length() {
            if len > self.cfg.size_cap_bytes {
                return Err(Attempt::Terminal(SkipReason::NotPdf));
            }
        }

        // Stream the body so an over-cap response stops early instead of
        // buffering the remainder.
        let mut bytes: Vec<u8> = Vec::new();
        let mut resp = resp;
        loop {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    if bytes.len() as u64 + chunk.len() as u64 > self.cfg.size_cap_bytes {
                        return Err(Attempt::Terminal(SkipReason::NotPdf));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => return Err(Attempt::Transient(e.to_string())),
            }
        }

        if !is_pdf(&content_type, &bytes) {
            return Err(Attempt::Terminal(SkipReason::NotPdf));
        }

        debug!(url, n = bytes.len(), "PDF downloaded");
        Ok(FetchOutcome::Fetched { bytes })
    }
}

enum Attempt {
    Transient(String),
    Terminal(SkipReason),
}

/// Accept iff the server says PDF or the payload carries the PDF magic.
fn is_pdf(content_type: &str, bytes: &[u8]) -> bool {
    content_type.to_ascii_lowercase().contains("pdf") || bytes.starts_with(b"%PDF-")
}
