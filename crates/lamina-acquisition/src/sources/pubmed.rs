//! PubMed E-utilities adapter.
//!
//! Two-phase search:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi
//!
//! esearch returns PMIDs for the query page; efetch is then issued in
//! batches of at most 20 ids and its XML parsed into PaperRecords. A PMC id
//! on an article yields a full-text hint and a PMC PDF URL.

use async_trait::async_trait;
use lamina_common::config::SourceConfig;
use lamina_common::net::ConfinedClient;
use lamina_common::{LaminaError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, instrument, warn};

use super::{RequestPacer, SearchOptions, SearchPage, SourceAdapter};
use crate::models::{AccessHint, PaperRecord, SourceTag};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

/// E-utilities allows long id lists, but batches stay small to keep each
/// response bounded.
const EFETCH_BATCH: usize = 20;

pub struct PubMedAdapter {
    client: ConfinedClient,
    api_key: Option<String>,
    pacer: RequestPacer,
}

impl PubMedAdapter {
    pub fn new(client: ConfinedClient, cfg: &SourceConfig) -> Self {
        Self {
            client,
            api_key: cfg.api_key.clone(),
            pacer: RequestPacer::from_millis(cfg.page_delay_ms),
        }
    }

    /// Search PubMed and return one page of PMIDs plus the total hit count.
    #[instrument(skip(self))]
    async fn esearch(
        &self,
        query: &str,
        retstart: usize,
        retmax: usize,
        sort_by_date: bool,
    ) -> Result<(Vec<String>, usize)> {
        let sort = if sort_by_date { "pub_date" } else { "relevance" };
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("term", query.to_string()),
            ("retmode", "json".to_string()),
            ("retstart", retstart.to_string()),
            ("retmax", retmax.to_string()),
            ("sort", sort.to_string()),
            ("usehistory", "n".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }

        let resp: serde_json::Value = self
            .client
            .get(ESEARCH_URL)?
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let ids: Vec<String> = resp["esearchresult"]["idlist"]
            .as_array()
            .unwrap_or(&vec![])
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
        let count = resp["esearchresult"]["count"]
            .as_str()
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(ids.len());

        debug!(n = ids.len(), count, "PubMed esearch returned PMIDs");
        Ok((ids, count))
    }

    /// Fetch PubMed XML for a list of PMIDs and parse into PaperRecords.
    #[instrument(skip(self, pmids), fields(n = pmids.len()))]
    async fn efetch(&self, pmids: &[String]) -> Result<Vec<PaperRecord>> {
        let mut records = Vec::with_capacity(pmids.len());
        for batch in pmids.chunks(EFETCH_BATCH) {
            self.pacer.pace().await;
            let mut params = vec![
                ("db", "pubmed".to_string()),
                ("id", batch.join(",")),
                ("rettype", "abstract".to_string()),
                ("retmode", "xml".to_string()),
            ];
            if let Some(key) = &self.api_key {
                params.push(("api_key", key.clone()));
            }

            let xml = self
                .client
                .get(EFETCH_URL)?
                .query(&params)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;

            records.extend(parse_pubmed_xml(&xml)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for PubMedAdapter {
    fn tag(&self) -> SourceTag {
        SourceTag::Pubmed
    }

    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_per_page: usize,
        options: SearchOptions,
    ) -> Result<SearchPage> {
        let retstart: usize = page_token.map(|t| t.parse().unwrap_or(0)).unwrap_or(0);
        self.pacer.pace().await;
        let (ids, count) = self
            .esearch(query, retstart, max_per_page, options.sort_by_date)
            .await?;
        let records = self.efetch(&ids).await?;

        let fetched_through = retstart + ids.len();
        let next_token = if ids.len() == max_per_page && fetched_through < count {
            Some(fetched_through.to_string())
        } else {
            None
        };

        Ok(SearchPage { records, next_token, total_hint: Some(count) })
    }
}

/// Parse PubMed efetch XML (`<PubmedArticleSet>`) into PaperRecords.
fn parse_pubmed_xml(xml: &str) -> Result<Vec<PaperRecord>> {
    let mut papers = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<RecordDraft> = None;
    let mut in_pmid = false;
    let mut in_title = false;
    let mut in_abstract = false;
    let mut in_author = false;
    let mut in_last_name = false;
    let mut in_fore_name = false;
    let mut in_journal = false;
    let mut in_year = false;
    let mut in_keyword = false;
    let mut article_id_type: Option<String> = None;
    let mut current_last = String::new();
    let mut current_fore = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"PubmedArticle" => current = Some(RecordDraft::default()),
                b"PMID" => in_pmid = true,
                b"ArticleTitle" => in_title = true,
                b"AbstractText" => in_abstract = true,
                b"Author" => {
                    in_author = true;
                    current_last.clear();
                    current_fore.clear();
                }
                b"LastName" => in_last_name = true,
                b"ForeName" => in_fore_name = true,
                b"Title" => in_journal = true,
                b"Year" => in_year = true,
                b"Keyword" => in_keyword = true,
                b"ArticleId" => {
                    article_id_type = e
                        .try_get_attribute("IdType")
                        .ok()
                        .flatten()
                        .and_then(|a| a.unescape_value().ok())
                        .map(|v| v.to_string());
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if let Some(ref mut p) = current {
                    if in_pmid && p.pmid.is_empty() {
                        p.pmid = text.clone();
                    }
                    if in_title {
                        p.title.push_str(&text);
                    }
                    if in_abstract {
                        if !p.abstract_text.is_empty() {
                            p.abstract_text.push(' ');
                        }
                        p.abstract_text.push_str(&text);
                    }
                    if in_last_name {
                        current_last = text.clone();
                    }
                    if in_fore_name {
                        current_fore = text.clone();
                    }
                    if in_journal && p.journal.is_none() {
                        p.journal = Some(text.clone());
                    }
                    if in_year && p.year.is_none() {
                        p.year = text.parse().ok();
                    }
                    if in_keyword {
                        p.keywords.push(text.clone());
                    }
                    match article_id_type.as_deref() {
                        Some("doi") if p.doi.is_none() => p.doi = Some(text.clone()),
                        Some("pmc") if p.pmc_id.is_none() => p.pmc_id = Some(text.clone()),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"PMID" => in_pmid = false,
                b"ArticleTitle" => in_title = false,
                b"AbstractText" => in_abstract = false,
                b"LastName" => in_last_name = false,
                b"ForeName" => in_fore_name = false,
                b"Title" => in_journal = false,
                b"Year" => in_year = false,
                b"Keyword" => in_keyword = false,
                b"ArticleId" => article_id_type = None,
                b"Author" => {
                    if in_author {
                        if let Some(ref mut p) = current {
                            let name = if current_fore.is_empty() {
                                current_last.clone()
                            } else {
                                format!("{} {}", current_fore, current_last)
                            };
                            if !name.is_empty() {
                                p.authors.push(name);
                            }
                        }
                        in_author = false;
                    }
                }
                b"PubmedArticle" => {
                    if let Some(draft) = current.take() {
                        match draft.finish() {
                            Some(record) => papers.push(record),
                            None => warn!("skipping PubMed article with empty title or PMID"),
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LaminaError::Xml(format!("PubMed XML parse error: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

#[derive(Default)]
struct RecordDraft {
    pmid: String,
    doi: Option<String>,
    pmc_id: Option<String>,
    title: String,
    abstract_text: String,
    authors: Vec<String>,
    journal: Option<String>,
    year: Option<i32>,
    keywords: Vec<String>,
}

impl RecordDraft {
    fn finish(self) -> Option<PaperRecord> {
        let mut record = PaperRecord::new(SourceTag::Pubmed, self.pmid.clone(), self.title).ok()?;
        record.pmid = Some(self.pmid);
        record.doi = self.doi;
        record.authors = self.authors;
        record.journal = self.journal;
        record.year = self.year;
        record.keywords = self.keywords.into_iter().collect();
        if !self.abstract_text.is_empty() {
            record.abstract_text = Some(self.abstract_text);
        }
        if let Some(pmc) = self.pmc_id {
            record.pdf_url = Some(format!(
                "https://www.ncbi.nlm.nih.gov/pmc/articles/{pmc}/pdf/"
            ));
            record.access_hint = AccessHint::FulltextAvailable;
            record.pmc_id = Some(pmc);
        } else {
            record.access_hint = AccessHint::AbstractOnly;
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>38012345</PMID>
      <Article>
        <Journal><Title>Spine</Title><JournalIssue><PubDate><Year>2024</Year></PubDate></JournalIssue></Journal>
        <ArticleTitle>Lumbar fusion outcomes in degenerative disease</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Fusion is common.</AbstractText>
          <AbstractText Label="RESULTS">Outcomes vary.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author><LastName>Kim</LastName><ForeName>Jin</ForeName></Author>
          <Author><LastName>Lee</LastName><ForeName>Soo</ForeName></Author>
        </AuthorList>
      </Article>
      <KeywordList><Keyword>lumbar fusion</Keyword><Keyword>outcomes</Keyword></KeywordList>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">38012345</ArticleId>
        <ArticleId IdType="doi">10.1000/spine.2024.001</ArticleId>
        <ArticleId IdType="pmc">PMC9988776</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>38099999</PMID>
      <Article>
        <ArticleTitle></ArticleTitle>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_full_article() {
        let papers = parse_pubmed_xml(SAMPLE).unwrap();
        assert_eq!(papers.len(), 1, "empty-title article must be skipped");

        let p = &papers[0];
        assert_eq!(p.pmid.as_deref(), Some("38012345"));
        assert_eq!(p.doi.as_deref(), Some("10.1000/spine.2024.001"));
        assert_eq!(p.pmc_id.as_deref(), Some("PMC9988776"));
        assert_eq!(p.title, "Lumbar fusion outcomes in degenerative disease");
        assert_eq!(p.authors, vec!["Jin Kim".to_string(), "Soo Lee".to_string()]);
        assert_eq!(p.journal.as_deref(), Some("Spine"));
        assert_eq!(p.year, Some(2024));
        assert!(p.keywords.contains("outcomes"));
        assert_eq!(p.abstract_text.as_deref(), Some("Fusion is common. Outcomes vary."));
    }

    #[test]
    fn test_pmc_yields_pdf_url_and_hint() {
        let papers = parse_pubmed_xml(SAMPLE).unwrap();
        let p = &papers[0];
        assert_eq!(p.access_hint, AccessHint::FulltextAvailable);
        assert_eq!(
            p.pdf_url.as_deref(),
            Some("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC9988776/pdf/")
        );
    }

    #[test]
    fn test_no_pmc_means_abstract_only() {
        let xml = r#"<PubmedArticleSet><PubmedArticle><MedlineCitation>
            <PMID>1</PMID><Article><ArticleTitle>T</ArticleTitle></Article>
            </MedlineCitation></PubmedArticle></PubmedArticleSet>"#;
        let papers = parse_pubmed_xml(xml).unwrap();
        assert_eq!(papers[0].access_hint, AccessHint::AbstractOnly);
        assert!(papers[0].pdf_url.is_none());
    }

    #[tokio::test]
    #[ignore = "hits the live PubMed API"]
    async fn test_live_search() {
        let client = ConfinedClient::new().unwrap();
        let adapter = PubMedAdapter::new(client, &SourceConfig::default());
        let page = adapter
            .search("lumbar fusion", None, 5, SearchOptions::default())
            .await
            .expect("PubMed search failed");
        assert!(!page.records.is_empty());
        for r in &page.records {
            assert!(!r.title.is_empty());
            assert!(r.pmid.is_some());
        }
    }
}
