//! On-disk layout per job and per paper.
//!
//! ```text
//! <storage_root>/<job_id>/
//!   job.json                  # Job snapshot
//!   papers/<paper_key>/
//!     metadata.json           # PaperRecord + translations
//!     source.pdf              # present iff PDF fetched
//!     fulltext.txt            # present iff extraction succeeded
//!     summary.<lang>.txt      # present iff translated
//!   index.json                # paper_keys in insertion order
//!   events.log                # append-only progress events, one JSON per line
//! ```
//!
//! This is the only component that touches the filesystem. All writes are
//! atomic (temp file + rename) and confined under the storage root.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use lamina_common::{LaminaError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::warn;
use uuid::Uuid;

use crate::models::{is_safe_key, Job, PaperRecord, TranslatedFields};
use crate::progress::ProgressEvent;

pub const JOB_FILE: &str = "job.json";
pub const INDEX_FILE: &str = "index.json";
pub const EVENTS_FILE: &str = "events.log";
pub const METADATA_FILE: &str = "metadata.json";
pub const PDF_FILE: &str = "source.pdf";
pub const FULLTEXT_FILE: &str = "fulltext.txt";

pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| LaminaError::Storage(format!("cannot create storage root: {e}")))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    fn paper_dir(&self, job_id: Uuid, key: &str) -> Result<PathBuf> {
        if !is_safe_key(key) {
            return Err(LaminaError::Storage(format!("unsafe paper key: {key:?}")));
        }
        let dir = self.job_dir(job_id).join("papers").join(key);
        self.confine(&dir)?;
        Ok(dir)
    }

    /// Every produced path must resolve under the storage root. Components
    /// are sanitized before joining, so this is a backstop, not the fence.
    fn confine(&self, path: &Path) -> Result<()> {
        if !path.starts_with(&self.root) {
            return Err(LaminaError::Storage(format!(
                "path {} escapes storage root",
                path.display()
            )));
        }
        Ok(())
    }

    // ── Job snapshot ──────────────────────────────────────────────────────────

    pub fn write_job(&self, job: &Job) -> Result<()> {
        let dir = self.job_dir(job.job_id);
        fs::create_dir_all(&dir)
            .map_err(|e| LaminaError::Storage(format!("cannot create job dir: {e}")))?;
        self.write_json_atomic(&dir.join(JOB_FILE), job)
    }

    pub fn read_job(&self, job_id: Uuid) -> Result<Job> {
        self.read_json(&self.job_dir(job_id).join(JOB_FILE))
    }

    /// Enumerate persisted jobs. Directories whose name is not a UUID are
    /// ignored; a UUID directory with an unreadable snapshot is reported as
    /// `Err` so the registry can mark it failed.
    pub fn list_jobs(&self) -> Result<Vec<(Uuid, Result<Job>)>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.root)
            .map_err(|e| LaminaError::Storage(format!("cannot read storage root: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| LaminaError::Storage(e.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Ok(job_id) = Uuid::parse_str(&name.to_string_lossy()) else {
                continue;
            };
            out.push((job_id, self.read_job(job_id)));
        }
        Ok(out)
    }

    // ── Paper artifacts ───────────────────────────────────────────────────────

    pub fn write_metadata(&self, job_id: Uuid, record: &PaperRecord) -> Result<()> {
        let dir = self.paper_dir(job_id, &record.paper_key())?;
        fs::create_dir_all(&dir)
            .map_err(|e| LaminaError::Storage(format!("cannot create paper dir: {e}")))?;
        self.write_json_atomic(&dir.join(METADATA_FILE), record)
    }

    pub fn read_metadata(&self, job_id: Uuid, key: &str) -> Result<PaperRecord> {
        self.read_json(&self.paper_dir(job_id, key)?.join(METADATA_FILE))
    }

    pub fn write_pdf(&self, job_id: Uuid, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.paper_dir(job_id, key)?;
        fs::create_dir_all(&dir)
            .map_err(|e| LaminaError::Storage(format!("cannot create paper dir: {e}")))?;
        let path = dir.join(PDF_FILE);
        self.write_bytes_atomic(&path, bytes)?;
        Ok(path)
    }

    pub fn write_fulltext(&self, job_id: Uuid, key: &str, text: &str) -> Result<()> {
        let dir = self.paper_dir(job_id, key)?;
        fs::create_dir_all(&dir)
            .map_err(|e| LaminaError::Storage(format!("cannot create paper dir: {e}")))?;
        self.write_bytes_atomic(&dir.join(FULLTEXT_FILE), text.as_bytes())
    }

    pub fn read_fulltext(&self, job_id: Uuid, key: &str) -> Result<String> {
        let path = self.fulltext_path(job_id, key)?;
        fs::read_to_string(&path)
            .map_err(|e| LaminaError::Storage(format!("cannot read {}: {e}", path.display())))
    }

    pub fn write_summary(&self, job_id: Uuid, key: &str, lang: &str, text: &str) -> Result<()> {
        if !is_safe_key(lang) {
            return Err(LaminaError::Storage(format!("unsafe language tag: {lang:?}")));
        }
        let dir = self.paper_dir(job_id, key)?;
        fs::create_dir_all(&dir)
            .map_err(|e| LaminaError::Storage(format!("cannot create paper dir: {e}")))?;
        self.write_bytes_atomic(&dir.join(format!("summary.{lang}.txt")), text.as_bytes())
    }

    pub fn pdf_path(&self, job_id: Uuid, key: &str) -> Result<PathBuf> {
        Ok(self.paper_dir(job_id, key)?.join(PDF_FILE))
    }

    pub fn fulltext_path(&self, job_id: Uuid, key: &str) -> Result<PathBuf> {
        Ok(self.paper_dir(job_id, key)?.join(FULLTEXT_FILE))
    }

    pub fn summary_path(&self, job_id: Uuid, key: &str, lang: &str) -> Result<PathBuf> {
        if !is_safe_key(lang) {
            return Err(LaminaError::Storage(format!("unsafe language tag: {lang:?}")));
        }
        Ok(self.paper_dir(job_id, key)?.join(format!("summary.{lang}.txt")))
    }

    pub fn has_pdf(&self, job_id: Uuid, key: &str) -> bool {
        self.pdf_path(job_id, key).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn has_fulltext(&self, job_id: Uuid, key: &str) -> bool {
        self.fulltext_path(job_id, key).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn has_summary(&self, job_id: Uuid, key: &str, lang: &str) -> bool {
        self.summary_path(job_id, key, lang).map(|p| p.is_file()).unwrap_or(false)
    }

    // ── Index ─────────────────────────────────────────────────────────────────

    /// Append a key to `index.json`, preserving insertion order. Idempotent:
    /// a key already present is left where it first appeared.
    pub fn append_index(&self, job_id: Uuid, key: &str) -> Result<()> {
        let mut index = self.read_index(job_id)?;
        if !index.iter().any(|k| k == key) {
            index.push(key.to_string());
            self.write_json_atomic(&self.job_dir(job_id).join(INDEX_FILE), &index)?;
        }
        Ok(())
    }

    pub fn read_index(&self, job_id: Uuid) -> Result<Vec<String>> {
        let path = self.job_dir(job_id).join(INDEX_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.read_json(&path)
    }

    // ── Events ────────────────────────────────────────────────────────────────

    pub fn append_event(&self, event: &ProgressEvent) -> Result<()> {
        let dir = self.job_dir(event.job_id);
        fs::create_dir_all(&dir)
            .map_err(|e| LaminaError::Storage(format!("cannot create job dir: {e}")))?;
        let line = serde_json::to_string(event)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENTS_FILE))
            .map_err(|e| LaminaError::Storage(format!("cannot open events.log: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| LaminaError::Storage(format!("cannot append events.log: {e}")))?;
        Ok(())
    }

    /// Replay the event log. Unparseable lines are skipped with a warning so
    /// a torn tail write cannot poison replays.
    pub fn read_events(&self, job_id: Uuid) -> Result<Vec<ProgressEvent>> {
        let path = self.job_dir(job_id).join(EVENTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| LaminaError::Storage(format!("cannot read events.log: {e}")))?;
        let mut events = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(e) => events.push(e),
                Err(e) => warn!(job_id = %job_id, "skipping malformed event line: {e}"),
            }
        }
        Ok(events)
    }

    // ── Low-level writes ──────────────────────────────────────────────────────

    fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes_atomic(path, &bytes)
    }

    fn write_bytes_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.confine(path)?;
        let dir = path
            .parent()
            .ok_or_else(|| LaminaError::Storage(format!("no parent for {}", path.display())))?;
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| LaminaError::Storage(format!("cannot create temp file: {e}")))?;
        tmp.write_all(bytes)
            .map_err(|e| LaminaError::Storage(format!("cannot write temp file: {e}")))?;
        tmp.persist(path)
            .map_err(|e| LaminaError::Storage(format!("cannot persist {}: {e}", path.display())))?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)
            .map_err(|e| LaminaError::Storage(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| LaminaError::Storage(format!("cannot parse {}: {e}", path.display())))
    }
}

/// Human-readable rendering of a paper in the translation language, written
/// as `summary.<lang>.txt`.
pub fn render_summary(record: &PaperRecord, lang: &str, translated: &TranslatedFields) -> String {
    let mut out = String::new();
    out.push_str(translated.title.as_deref().unwrap_or(&record.title));
    out.push('\n');
    if !record.authors.is_empty() {
        out.push_str(&record.authors.join(", "));
        out.push('\n');
    }
    if let Some(journal) = &record.journal {
        out.push_str(journal);
        if let Some(year) = record.year {
            out.push_str(&format!(" ({year})"));
        }
        out.push('\n');
    }
    out.push('\n');
    if let Some(abstract_text) = translated
        .abstract_text
        .as_deref()
        .or(record.abstract_text.as_deref())
    {
        out.push_str(abstract_text);
        out.push('\n');
    }
    if let Some(sections) = &translated.sections {
        out.push('\n');
        out.push_str(sections);
        out.push('\n');
    }
    let _ = lang; // language is carried in the filename
    out
}
