//! Data models for the acquisition pipeline.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lamina_common::{LaminaError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which backend a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Pubmed,
    Arxiv,
    SemanticScholar,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Pubmed => "pubmed",
            SourceTag::Arxiv => "arxiv",
            SourceTag::SemanticScholar => "semantic_scholar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pubmed" => Some(SourceTag::Pubmed),
            "arxiv" => Some(SourceTag::Arxiv),
            "semantic_scholar" => Some(SourceTag::SemanticScholar),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the source told us about full-text availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessHint {
    AbstractOnly,
    FulltextAvailable,
    #[default]
    Unknown,
}

impl AccessHint {
    /// Merge rule: a claim of full text always wins over weaker hints.
    pub fn promote(self, other: AccessHint) -> AccessHint {
        match (self, other) {
            (AccessHint::FulltextAvailable, _) | (_, AccessHint::FulltextAvailable) => {
                AccessHint::FulltextAvailable
            }
            (AccessHint::AbstractOnly, _) | (_, AccessHint::AbstractOnly) => {
                AccessHint::AbstractOnly
            }
            _ => AccessHint::Unknown,
        }
    }
}

/// Why a paper did not complete a stage. Never fatal to the owning job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoUrl,
    NotPdf,
    Forbidden,
    NotFound,
    ExceededRetry,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoUrl => "no_url",
            SkipReason::NotPdf => "not_pdf",
            SkipReason::Forbidden => "forbidden",
            SkipReason::NotFound => "not_found",
            SkipReason::ExceededRetry => "exceeded_retry",
        }
    }
}

/// Translated renderings of selected fields, keyed by target language in
/// `PaperRecord::translations`. Source-language fields are never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranslatedFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<String>,
}

/// Normalized bibliographic entity produced by a source adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    pub source_tag: SourceTag,
    pub source_id: String,
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmc_id: Option<String>,
    pub arxiv_id: Option<String>,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub keywords: BTreeSet<String>,
    pub pdf_url: Option<String>,
    pub access_hint: AccessHint,
    #[serde(default)]
    pub translations: BTreeMap<String, TranslatedFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub fetched_at: DateTime<Utc>,
}

impl PaperRecord {
    /// Construct a record with the invariants enforced: non-empty title and
    /// a usable (source_tag, source_id) identity. Remaining fields start
    /// empty and are filled by the adapter.
    pub fn new(source_tag: SourceTag, source_id: impl Into<String>, title: impl Into<String>) -> Result<Self> {
        let source_id = source_id.into();
        let title = title.into();
        if title.trim().is_empty() {
            return Err(LaminaError::Validation("paper title must be non-empty".into()));
        }
        if source_id.trim().is_empty() {
            return Err(LaminaError::Validation("paper source_id must be non-empty".into()));
        }
        Ok(Self {
            source_tag,
            source_id,
            doi: None,
            pmid: None,
            pmc_id: None,
            arxiv_id: None,
            title,
            authors: Vec::new(),
            abstract_text: None,
            journal: None,
            year: None,
            keywords: BTreeSet::new(),
            pdf_url: None,
            access_hint: AccessHint::Unknown,
            translations: BTreeMap::new(),
            skip_reason: None,
            fetched_at: Utc::now(),
        })
    }

    /// Deterministic filesystem-safe key: first of doi → pmid → arxiv_id →
    /// `source_tag:source_id`. The sole mechanism for idempotent resumption.
    pub fn paper_key(&self) -> String {
        let raw = self
            .doi
            .as_deref()
            .or(self.pmid.as_deref())
            .or(self.arxiv_id.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}", self.source_tag, self.source_id));
        sanitize_key(&raw)
    }
}

/// Lowercase, map everything outside `[a-z0-9._-]` to `_`, cap the length.
pub fn sanitize_key(raw: &str) -> String {
    let mut key: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    key.truncate(120);
    key
}

/// A key is safe to use as a path component iff sanitization is a no-op.
pub fn is_safe_key(key: &str) -> bool {
    !key.is_empty() && sanitize_key(key) == key
}

// ── Job model ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job toggles chosen at submission.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobOptions {
    #[serde(default)]
    pub download_pdfs: bool,
    #[serde(default)]
    pub translate: bool,
    #[serde(default)]
    pub target_language: Option<String>,
    /// PubMed only: order by publication date instead of relevance.
    #[serde(default)]
    pub sort_by_date: bool,
}

/// Counts of completed per-paper work items, per stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StageCounters {
    pub found: usize,
    pub downloaded: usize,
    pub extracted: usize,
    pub translated: usize,
}

/// One submitted acquisition request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub project_id: String,
    pub query: String,
    pub sources: Vec<SourceTag>,
    pub target_count: usize,
    pub options: JobOptions,
    pub status: JobStatus,
    pub progress_pct: u8,
    pub counters: StageCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_warning: Option<String>,
}

/// Submission payload, validated before a Job row is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub query: String,
    pub sources: Vec<SourceTag>,
    pub target_count: usize,
    #[serde(default)]
    pub download_pdfs: bool,
    #[serde(default)]
    pub translate: bool,
    #[serde(default)]
    pub target_language: Option<String>,
    pub project_id: String,
    #[serde(default)]
    pub sort_by_date: bool,
}

impl JobRequest {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(LaminaError::Validation("query must be non-empty".into()));
        }
        if self.sources.is_empty() {
            return Err(LaminaError::Validation("at least one source must be selected".into()));
        }
        if self.target_count == 0 {
            return Err(LaminaError::Validation("target_count must be >= 1".into()));
        }
        if self.translate && self.target_language.as_deref().map_or(true, |l| l.trim().is_empty()) {
            return Err(LaminaError::Validation(
                "target_language is required when translate is set".into(),
            ));
        }
        Ok(())
    }

    pub fn into_job(self) -> Job {
        let now = Utc::now();
        Job {
            job_id: Uuid::new_v4(),
            project_id: self.project_id,
            query: self.query,
            sources: self.sources,
            target_count: self.target_count,
            options: JobOptions {
                download_pdfs: self.download_pdfs,
                translate: self.translate,
                target_language: self.target_language,
                sort_by_date: self.sort_by_date,
            },
            status: JobStatus::Pending,
            progress_pct: 0,
            counters: StageCounters::default(),
            created_at: now,
            updated_at: now,
            error: None,
            last_warning: None,
        }
    }
}
