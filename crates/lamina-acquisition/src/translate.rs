//! Field translation with chunking and rate discipline.
//!
//! The provider is vendor-neutral: anything that can translate one chunk of
//! text sits behind `TranslationProvider`. The `Translator` wrapper owns
//! sentence-boundary chunking, the inter-call delay, and per-chunk retries;
//! a permanent failure on any chunk aborts translation for that paper.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lamina_common::config::TranslateConfig;
use lamina_common::net::ConfinedClient;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::sources::RequestPacer;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("transient translation failure: {0}")]
    Transient(String),
    #[error("permanent translation failure: {0}")]
    Permanent(String),
    #[error("translation provider not configured")]
    Unavailable,
}

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate_chunk(&self, text: &str, target_lang: &str) -> Result<String, TranslateError>;
}

/// LibreTranslate-shaped HTTP provider:
/// `POST {endpoint}/translate` with `{q, source: "auto", target, api_key}`.
pub struct HttpTranslationProvider {
    client: ConfinedClient,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTranslationProvider {
    pub fn new(mut client: ConfinedClient, endpoint: String, api_key: Option<String>) -> Self {
        client.allow_url_host(&endpoint);
        Self { client, endpoint, api_key }
    }
}

#[async_trait]
impl TranslationProvider for HttpTranslationProvider {
    async fn translate_chunk(&self, text: &str, target_lang: &str) -> Result<String, TranslateError> {
        let url = format!("{}/translate", self.endpoint.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "q": text,
            "source": "auto",
            "target": target_lang,
            "format": "text",
        });
        if let Some(key) = &self.api_key {
            body["api_key"] = serde_json::Value::String(key.clone());
        }

        let resp = self
            .client
            .post(&url)
            .map_err(|e| TranslateError::Permanent(e.to_string()))?
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslateError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(TranslateError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(TranslateError::Permanent(format!("HTTP {status}")));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TranslateError::Transient(e.to_string()))?;
        json["translatedText"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| TranslateError::Permanent("response missing translatedText".into()))
    }
}

/// Chunking, pacing, and retry policy around a provider.
pub struct Translator {
    provider: Arc<dyn TranslationProvider>,
    max_chunk_chars: usize,
    max_chunk_retries: u32,
    pacer: RequestPacer,
}

impl Translator {
    pub fn new(provider: Arc<dyn TranslationProvider>, cfg: &TranslateConfig) -> Self {
        Self {
            provider,
            max_chunk_chars: cfg.max_chunk_chars,
            max_chunk_retries: cfg.max_chunk_retries,
            pacer: RequestPacer::new(Duration::from_millis(cfg.min_call_delay_ms)),
        }
    }

    /// Build from config when an endpoint is configured.
    pub fn from_config(client: &ConfinedClient, cfg: &TranslateConfig) -> Option<Self> {
        let endpoint = cfg.endpoint.clone()?;
        let provider = Arc::new(HttpTranslationProvider::new(
            client.clone(),
            endpoint,
            cfg.api_key.clone(),
        ));
        Some(Self::new(provider, cfg))
    }

    /// Translate a text; chunks are submitted sequentially and concatenated
    /// in order. Errors out on the first chunk whose retries are exhausted.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn translate(&self, text: &str, target_lang: &str) -> Result<String, TranslateError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let chunks = split_chunks(text, self.max_chunk_chars);
        debug!(n_chunks = chunks.len(), "translating");
        let mut out: Vec<String> = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            let mut retries = 0u32;
            loop {
                self.pacer.pace().await;
                match self.provider.translate_chunk(chunk, target_lang).await {
                    Ok(translated) => {
                        out.push(translated);
                        break;
                    }
                    Err(TranslateError::Transient(msg)) if retries < self.max_chunk_retries => {
                        retries += 1;
                        warn!(retries, "transient translation failure, retrying: {msg}");
                    }
                    Err(TranslateError::Transient(msg)) => {
                        return Err(TranslateError::Permanent(format!(
                            "retries exhausted: {msg}"
                        )));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(out.join(" "))
    }
}

/// Split at sentence boundaries into chunks not exceeding `max_chars`.
/// A single sentence longer than the limit is hard-split on char
/// boundaries.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        for piece in hard_split(&sentence, max_chars) {
            if current.is_empty() {
                current = piece;
            } else if current.chars().count() + 1 + piece.chars().count() <= max_chars {
                current.push(' ');
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::take(&mut current));
                current = piece;
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Sentence boundaries: terminal punctuation followed by whitespace, or a
/// newline. Keeps the punctuation with its sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            if !current.trim().is_empty() {
                sentences.push(current.trim().to_string());
            }
            current.clear();
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            if !current.trim().is_empty() {
                sentences.push(current.trim().to_string());
            }
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences
}

fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let count = sentence.chars().count();
    if count <= max_chars {
        return vec![sentence.to_string()];
    }
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}
