//! Configuration loading for Lamina.
//! Reads lamina.toml from the current directory or path in LAMINA_CONFIG env var.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub translate: TranslateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String { "127.0.0.1:3040".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,
}

fn default_storage_root() -> String { "./storage".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: default_storage_root() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How many jobs run concurrently; excess submissions queue.
    #[serde(default = "default_job_concurrency")]
    pub max_concurrent: usize,
    /// Cap on pages fetched per source per job.
    #[serde(default = "default_page_cap")]
    pub page_cap: usize,
    /// Records requested per page from each source.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_job_concurrency() -> usize { 2 }
fn default_page_cap() -> usize { 20 }
fn default_page_size() -> usize { 20 }

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_job_concurrency(),
            page_cap: default_page_cap(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub pubmed: SourceConfig,
    #[serde(default)]
    pub arxiv: SourceConfig,
    #[serde(default)]
    pub semantic_scholar: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub api_key: Option<String>,
    /// Minimum delay between successive page requests to this source.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

fn default_page_delay_ms() -> u64 { 500 }

impl Default for SourceConfig {
    fn default() -> Self {
        Self { api_key: None, page_delay_ms: default_page_delay_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_size_cap")]
    pub size_cap_bytes: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_base_ms: u64,
}

fn default_download_concurrency() -> usize { 4 }
fn default_max_attempts() -> u32 { 3 }
fn default_size_cap() -> u64 { 50 * 1024 * 1024 }
fn default_backoff_ms() -> u64 { 500 }

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_download_concurrency(),
            max_attempts: default_max_attempts(),
            size_cap_bytes: default_size_cap(),
            backoff_base_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Extraction stops after this many pages.
    #[serde(default = "default_page_budget")]
    pub page_budget: usize,
}

fn default_page_budget() -> usize { 20 }

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { page_budget: default_page_budget() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Base URL of the translation endpoint; translation is disabled when unset.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_call_delay_ms")]
    pub min_call_delay_ms: u64,
    #[serde(default = "default_chunk_retries")]
    pub max_chunk_retries: u32,
}

fn default_chunk_chars() -> usize { 4500 }
fn default_call_delay_ms() -> u64 { 500 }
fn default_chunk_retries() -> u32 { 2 }

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            max_chunk_chars: default_chunk_chars(),
            min_call_delay_ms: default_call_delay_ms(),
            max_chunk_retries: default_chunk_retries(),
        }
    }
}

impl Config {
    /// Load configuration from lamina.toml.
    /// Checks LAMINA_CONFIG env var first, then the current directory.
    /// A missing file yields the built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("LAMINA_CONFIG")
            .unwrap_or_else(|_| "lamina.toml".to_string());

        if !Path::new(&path).exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
