//! Cross-source deduplication for one job.
//!
//! Stage 1: identifier lookup in priority order doi → pmid → pmc_id → arxiv_id
//! Stage 2: normalized-title match, accepted when years agree within 1
//! Stage 3: insert as new
//!
//! Stateless across jobs; stateful within one.

use std::collections::HashMap;

use crate::models::PaperRecord;

/// Result of offering a record to the deduper. Both variants carry the
/// paper_key of the record that owns the data afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    Inserted(String),
    Merged(String),
}

pub struct Deduper {
    records: Vec<PaperRecord>,
    /// Keys are fixed at insertion time; later-merged identifiers never
    /// change a paper's key, which keeps resumption deterministic.
    keys: Vec<String>,
    by_doi: HashMap<String, usize>,
    by_pmid: HashMap<String, usize>,
    by_pmc: HashMap<String, usize>,
    by_arxiv: HashMap<String, usize>,
    by_title: HashMap<String, usize>,
}

impl Deduper {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            keys: Vec::new(),
            by_doi: HashMap::new(),
            by_pmid: HashMap::new(),
            by_pmc: HashMap::new(),
            by_arxiv: HashMap::new(),
            by_title: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &PaperRecord)> {
        self.keys.iter().map(String::as_str).zip(self.records.iter())
    }

    pub fn get(&self, key: &str) -> Option<&PaperRecord> {
        self.keys.iter().position(|k| k == key).map(|i| &self.records[i])
    }

    pub fn add(&mut self, record: PaperRecord) -> DedupOutcome {
        if let Some(idx) = self.find_by_identifier(&record) {
            self.merge_into(idx, record);
            return DedupOutcome::Merged(self.keys[idx].clone());
        }

        let norm = normalize_title(&record.title);
        if let Some(&idx) = self.by_title.get(&norm) {
            if years_compatible(self.records[idx].year, record.year) {
                self.merge_into(idx, record);
                return DedupOutcome::Merged(self.keys[idx].clone());
            }
        }

        self.insert(record, norm)
    }

    fn find_by_identifier(&self, record: &PaperRecord) -> Option<usize> {
        if let Some(doi) = &record.doi {
            if let Some(&idx) = self.by_doi.get(doi) {
                return Some(idx);
            }
        }
        if let Some(pmid) = &record.pmid {
            if let Some(&idx) = self.by_pmid.get(pmid) {
                return Some(idx);
            }
        }
        if let Some(pmc) = &record.pmc_id {
            if let Some(&idx) = self.by_pmc.get(pmc) {
                return Some(idx);
            }
        }
        if let Some(arxiv) = &record.arxiv_id {
            if let Some(&idx) = self.by_arxiv.get(arxiv) {
                return Some(idx);
            }
        }
        None
    }

    fn insert(&mut self, record: PaperRecord, norm_title: String) -> DedupOutcome {
        let idx = self.records.len();
        let key = record.paper_key();
        self.index_identifiers(&record, idx);
        self.by_title.entry(norm_title).or_insert(idx);
        self.records.push(record);
        self.keys.push(key.clone());
        DedupOutcome::Inserted(key)
    }

    /// Merge rule: union keywords; keep first-seen authors and source_tag;
    /// fill empty fields from the newcomer; promote access_hint; retain the
    /// first non-empty pdf_url.
    fn merge_into(&mut self, idx: usize, incoming: PaperRecord) {
        self.index_identifiers(&incoming, idx);
        let existing = &mut self.records[idx];

        existing.doi = existing.doi.take().or(incoming.doi);
        existing.pmid = existing.pmid.take().or(incoming.pmid);
        existing.pmc_id = existing.pmc_id.take().or(incoming.pmc_id);
        existing.arxiv_id = existing.arxiv_id.take().or(incoming.arxiv_id);
        existing.abstract_text = existing.abstract_text.take().or(incoming.abstract_text);
        existing.journal = existing.journal.take().or(incoming.journal);
        existing.year = existing.year.or(incoming.year);
        existing.pdf_url = existing.pdf_url.take().or(incoming.pdf_url);
        if existing.authors.is_empty() {
            existing.authors = incoming.authors;
        }
        existing.keywords.extend(incoming.keywords);
        existing.access_hint = existing.access_hint.promote(incoming.access_hint);
    }

    fn index_identifiers(&mut self, record: &PaperRecord, idx: usize) {
        if let Some(doi) = &record.doi {
            self.by_doi.entry(doi.clone()).or_insert(idx);
        }
        if let Some(pmid) = &record.pmid {
            self.by_pmid.entry(pmid.clone()).or_insert(idx);
        }
        if let Some(pmc) = &record.pmc_id {
            self.by_pmc.entry(pmc.clone()).or_insert(idx);
        }
        if let Some(arxiv) = &record.arxiv_id {
            self.by_arxiv.entry(arxiv.clone()).or_insert(idx);
        }
    }
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_space = true;
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Title matches only count when publication years agree within one; a
/// missing year on either side does not block the match.
fn years_compatible(a: Option<i32>, b: Option<i32>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() <= 1,
        _ => true,
    }
}
