//! arXiv Atom feed adapter.
//!
//! Endpoint: https://export.arxiv.org/api/query
//!
//! A single Atom query per page; entries carry the abstract in `<summary>`
//! and the canonical id as an abs URL, from which the PDF URL is derived.

use async_trait::async_trait;
use lamina_common::config::SourceConfig;
use lamina_common::net::ConfinedClient;
use lamina_common::{LaminaError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, instrument, warn};

use super::{RequestPacer, SearchOptions, SearchPage, SourceAdapter};
use crate::models::{AccessHint, PaperRecord, SourceTag};

const QUERY_URL: &str = "https://export.arxiv.org/api/query";

pub struct ArxivAdapter {
    client: ConfinedClient,
    pacer: RequestPacer,
}

impl ArxivAdapter {
    pub fn new(client: ConfinedClient, cfg: &SourceConfig) -> Self {
        Self { client, pacer: RequestPacer::from_millis(cfg.page_delay_ms) }
    }
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    fn tag(&self) -> SourceTag {
        SourceTag::Arxiv
    }

    #[instrument(skip(self))]
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_per_page: usize,
        _options: SearchOptions,
    ) -> Result<SearchPage> {
        let start: usize = page_token.map(|t| t.parse().unwrap_or(0)).unwrap_or(0);
        self.pacer.pace().await;

        let search_query = format!("all:{query}");
        let xml = self
            .client
            .get(QUERY_URL)?
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", &start.to_string()),
                ("max_results", &max_per_page.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let (records, total) = parse_atom_feed(&xml)?;
        debug!(n = records.len(), total = ?total, "arXiv query returned entries");

        let fetched_through = start + records.len();
        let next_token = match total {
            Some(total) if records.len() == max_per_page && fetched_through < total => {
                Some(fetched_through.to_string())
            }
            _ => None,
        };

        Ok(SearchPage { records, next_token, total_hint: total })
    }
}

/// Parse an arXiv Atom feed into records plus the opensearch total.
fn parse_atom_feed(xml: &str) -> Result<(Vec<PaperRecord>, Option<usize>)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut total: Option<usize> = None;

    let mut current: Option<EntryDraft> = None;
    let mut in_entry = false;
    let mut in_id = false;
    let mut in_title = false;
    let mut in_summary = false;
    let mut in_author = false;
    let mut in_name = false;
    let mut in_published = false;
    let mut in_total = false;
    let mut in_journal_ref = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"entry" => {
                    in_entry = true;
                    current = Some(EntryDraft::default());
                }
                b"id" if in_entry => in_id = true,
                b"title" if in_entry => in_title = true,
                b"summary" => in_summary = true,
                b"author" => in_author = true,
                b"name" if in_author => in_name = true,
                b"published" => in_published = true,
                b"opensearch:totalResults" => in_total = true,
                b"arxiv:journal_ref" => in_journal_ref = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == b"category" && in_entry {
                    if let Some(ref mut draft) = current {
                        if let Ok(Some(term)) = e.try_get_attribute("term") {
                            if let Ok(v) = term.unescape_value() {
                                draft.categories.push(v.to_string());
                            }
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if in_total {
                    total = text.parse().ok();
                }
                if let Some(ref mut draft) = current {
                    if in_id {
                        draft.abs_url.push_str(&text);
                    }
                    if in_title {
                        if !draft.title.is_empty() {
                            draft.title.push(' ');
                        }
                        draft.title.push_str(text.trim());
                    }
                    if in_summary {
                        if !draft.summary.is_empty() {
                            draft.summary.push(' ');
                        }
                        draft.summary.push_str(text.trim());
                    }
                    if in_name {
                        draft.authors.push(text.clone());
                    }
                    if in_published && draft.year.is_none() {
                        draft.year = text.get(..4).and_then(|y| y.parse().ok());
                    }
                    if in_journal_ref && draft.journal.is_none() {
                        draft.journal = Some(text.clone());
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"entry" => {
                    in_entry = false;
                    if let Some(draft) = current.take() {
                        match draft.finish() {
                            Some(record) => records.push(record),
                            None => warn!("skipping arXiv entry with empty title or id"),
                        }
                    }
                }
                b"id" => in_id = false,
                b"title" => in_title = false,
                b"summary" => in_summary = false,
                b"author" => in_author = false,
                b"name" => in_name = false,
                b"published" => in_published = false,
                b"opensearch:totalResults" => in_total = false,
                b"arxiv:journal_ref" => in_journal_ref = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(LaminaError::Xml(format!("arXiv Atom parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok((records, total))
}

#[derive(Default)]
struct EntryDraft {
    abs_url: String,
    title: String,
    summary: String,
    authors: Vec<String>,
    year: Option<i32>,
    journal: Option<String>,
    categories: Vec<String>,
}

impl EntryDraft {
    fn finish(self) -> Option<PaperRecord> {
        let arxiv_id = arxiv_id_from_url(&self.abs_url)?;
        let mut record = PaperRecord::new(SourceTag::Arxiv, arxiv_id.clone(), self.title).ok()?;
        record.arxiv_id = Some(arxiv_id.clone());
        record.authors = self.authors;
        record.year = self.year;
        record.journal = self.journal;
        record.keywords = self.categories.into_iter().collect();
        if !self.summary.is_empty() {
            record.abstract_text = Some(self.summary);
        }
        record.pdf_url = Some(format!("https://arxiv.org/pdf/{arxiv_id}"));
        record.access_hint = AccessHint::FulltextAvailable;
        Some(record)
    }
}

/// `http://arxiv.org/abs/2301.07041v2` → `2301.07041` (version stripped so
/// the same paper keys identically across feed revisions).
fn arxiv_id_from_url(url: &str) -> Option<String> {
    let id = url.rsplit("/abs/").next()?;
    if id.is_empty() || id == url {
        return None;
    }
    let id = match id.rfind('v') {
        Some(pos) if id[pos + 1..].chars().all(|c| c.is_ascii_digit()) && pos > 0 => &id[..pos],
        _ => id,
    };
    Some(id.to_string())
}
