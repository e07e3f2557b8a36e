//! Semantic Scholar graph API adapter.
//!
//! Endpoint: https://api.semanticscholar.org/graph/v1/paper/search
//!
//! A single JSON endpoint with offset pagination. `openAccessPdf.url` is
//! copied into pdf_url when present; `externalIds` supplies DOI/PMID/PMC/
//! arXiv cross-identifiers for the deduper.

use async_trait::async_trait;
use lamina_common::config::SourceConfig;
use lamina_common::net::ConfinedClient;
use lamina_common::Result;
use tracing::{debug, instrument, warn};

use super::{RequestPacer, SearchOptions, SearchPage, SourceAdapter};
use crate::models::{AccessHint, PaperRecord, SourceTag};

const SEARCH_URL: &str = "https://api.semanticscholar.org/graph/v1/paper/search";
const FIELDS: &str = "paperId,title,abstract,year,venue,authors,externalIds,openAccessPdf,fieldsOfStudy";

pub struct SemanticScholarAdapter {
    client: ConfinedClient,
    api_key: Option<String>,
    pacer: RequestPacer,
}

impl SemanticScholarAdapter {
    pub fn new(client: ConfinedClient, cfg: &SourceConfig) -> Self {
        Self {
            client,
            api_key: cfg.api_key.clone(),
            pacer: RequestPacer::from_millis(cfg.page_delay_ms),
        }
    }
}

#[async_trait]
impl SourceAdapter for SemanticScholarAdapter {
    fn tag(&self) -> SourceTag {
        SourceTag::SemanticScholar
    }

    #[instrument(skip(self))]
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_per_page: usize,
        _options: SearchOptions,
    ) -> Result<SearchPage> {
        let offset: usize = page_token.map(|t| t.parse().unwrap_or(0)).unwrap_or(0);
        self.pacer.pace().await;

        let mut request = self.client.get(SEARCH_URL)?.query(&[
            ("query", query),
            ("offset", &offset.to_string()),
            ("limit", &max_per_page.to_string()),
            ("fields", FIELDS),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let resp: serde_json::Value = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let items = resp["data"].as_array().cloned().unwrap_or_default();
        debug!(n = items.len(), "Semantic Scholar search results");

        let records: Vec<PaperRecord> = items.iter().filter_map(item_to_record).collect();
        let total = resp["total"].as_u64().map(|t| t as usize);
        // The API hands back the next offset directly when more pages exist.
        let next_token = resp["next"].as_u64().map(|n| n.to_string());

        Ok(SearchPage { records, next_token, total_hint: total })
    }
}

fn item_to_record(item: &serde_json::Value) -> Option<PaperRecord> {
    let paper_id = item["paperId"].as_str().unwrap_or("");
    let title = item["title"].as_str().unwrap_or("");
    let mut record = match PaperRecord::new(SourceTag::SemanticScholar, paper_id, title) {
        Ok(r) => r,
        Err(_) => {
            warn!("skipping Semantic Scholar item with empty title or id");
            return None;
        }
    };

    record.abstract_text = item["abstract"].as_str().map(String::from);
    record.journal = item["venue"].as_str().filter(|v| !v.is_empty()).map(String::from);
    record.year = item["year"].as_i64().map(|y| y as i32);
    record.authors = item["authors"]
        .as_array()
        .unwrap_or(&vec![])
        .iter()
        .filter_map(|a| a["name"].as_str().map(String::from))
        .collect();
    record.keywords = item["fieldsOfStudy"]
        .as_array()
        .unwrap_or(&vec![])
        .iter()
        .filter_map(|f| f.as_str().map(String::from))
        .collect();

    let ids = &item["externalIds"];
    record.doi = ids["DOI"].as_str().map(String::from);
    record.pmid = ids["PubMed"].as_str().map(String::from);
    record.pmc_id = ids["PubMedCentral"].as_str().map(String::from);
    record.arxiv_id = ids["ArXiv"].as_str().map(String::from);

    if let Some(url) = item["openAccessPdf"]["url"].as_str() {
        record.pdf_url = Some(url.to_string());
        record.access_hint = AccessHint::FulltextAvailable;
    } else {
        record.access_hint = AccessHint::AbstractOnly;
    }

    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_to_record_full() {
        let item = serde_json::json!({
            "paperId": "abc123def",
            "title": "Robotic assistance in pedicle screw placement",
            "abstract": "We evaluate robotic guidance.",
            "year": 2023,
            "venue": "European Spine Journal",
            "authors": [{ "name": "D. Surgeon" }, { "name": "E. Engineer" }],
            "externalIds": { "DOI": "10.1007/s00586", "PubMed": "37001122", "ArXiv": "2304.00001" },
            "openAccessPdf": { "url": "https://link.example.org/robotic.pdf" },
            "fieldsOfStudy": ["Medicine"]
        });
        let r = item_to_record(&item).unwrap();
        assert_eq!(r.source_id, "abc123def");
        assert_eq!(r.doi.as_deref(), Some("10.1007/s00586"));
        assert_eq!(r.pmid.as_deref(), Some("37001122"));
        assert_eq!(r.arxiv_id.as_deref(), Some("2304.00001"));
        assert_eq!(r.authors.len(), 2);
        assert_eq!(r.journal.as_deref(), Some("European Spine Journal"));
        assert_eq!(r.pdf_url.as_deref(), Some("https://link.example.org/robotic.pdf"));
        assert_eq!(r.access_hint, AccessHint::FulltextAvailable);
        assert_eq!(r.paper_key(), "10.1007_s00586");
    }

    #[test]
    fn test_item_without_pdf_is_abstract_only() {
        let item = serde_json::json!({
            "paperId": "xyz",
            "title": "No open access here",
            "externalIds": {}
        });
        let r = item_to_record(&item).unwrap();
        assert!(r.pdf_url.is_none());
        assert_eq!(r.access_hint, AccessHint::AbstractOnly);
        assert_eq!(r.paper_key(), "semantic_scholar_xyz");
    }

    #[test]
    fn test_empty_title_skipped() {
        let item = serde_json::json!({ "paperId": "xyz", "title": "" });
        assert!(item_to_record(&item).is_none());
    }

    #[tokio::test]
    #[ignore = "hits the live Semantic Scholar API"]
    async fn test_live_search() {
        let client = ConfinedClient::new().unwrap();
        let adapter = SemanticScholarAdapter::new(client, &SourceConfig::default());
        let page = adapter
            .search("lumbar interbody fusion", None, 3, SearchOptions::default())
            .await
            .expect("Semantic Scholar search failed");
        assert!(!page.records.is_empty());
    }
}
