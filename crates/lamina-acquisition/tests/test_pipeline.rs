//! End-to-end pipeline tests against scripted adapters, a loopback PDF
//! server, and a scripted translation provider. No external network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lamina_common::config::{Config, TranslateConfig};
use lamina_common::net::ConfinedClient;
use lamina_common::{LaminaError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use lamina_acquisition::download::Downloader;
use lamina_acquisition::models::{
    JobRequest, JobStatus, PaperRecord, SkipReason, SourceTag,
};
use lamina_acquisition::orchestrator::Orchestrator;
use lamina_acquisition::progress::{EventKind, ProgressBus};
use lamina_acquisition::registry::JobRegistry;
use lamina_acquisition::sources::{
    AdapterRegistry, SearchOptions, SearchPage, SourceAdapter,
};
use lamina_acquisition::storage::StorageLayout;
use lamina_acquisition::translate::{TranslateError, TranslationProvider, Translator};

// ── Scripted source adapter ───────────────────────────────────────────────────

struct MockAdapter {
    tag: SourceTag,
    records: Vec<PaperRecord>,
    fail: bool,
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn tag(&self) -> SourceTag {
        self.tag
    }

    async fn search(
        &self,
        _query: &str,
        page_token: Option<&str>,
        max_per_page: usize,
        _options: SearchOptions,
    ) -> Result<SearchPage> {
        if self.fail {
            return Err(LaminaError::Validation("mock source is down".into()));
        }
        let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + max_per_page).min(self.records.len());
        let records = self.records[start..end].to_vec();
        let next_token = if end < self.records.len() { Some(end.to_string()) } else { None };
        Ok(SearchPage { records, next_token, total_hint: Some(self.records.len()) })
    }
}

fn pubmed_record(pmid: &str, title: &str) -> PaperRecord {
    let mut r = PaperRecord::new(SourceTag::Pubmed, pmid, title).unwrap();
    r.pmid = Some(pmid.to_string());
    r.authors = vec!["Kim J".into(), "Lee S".into()];
    r.abstract_text = Some(format!("Abstract of {title}."));
    r.journal = Some("Spine".into());
    r.year = Some(2024);
    r
}

// ── Scripted translation provider ─────────────────────────────────────────────

struct MockProvider {
    fail_marker: Option<String>,
}

#[async_trait]
impl TranslationProvider for MockProvider {
    async fn translate_chunk(&self, text: &str, lang: &str) -> std::result::Result<String, TranslateError> {
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(TranslateError::Permanent("provider rejected text".into()));
            }
        }
        Ok(format!("[{lang}] {text}"))
    }
}

fn mock_translator(fail_marker: Option<&str>) -> Arc<Translator> {
    let cfg = TranslateConfig {
        endpoint: None,
        api_key: None,
        max_chunk_chars: 4500,
        min_call_delay_ms: 0,
        max_chunk_retries: 2,
    };
    Arc::new(Translator::new(
        Arc::new(MockProvider { fail_marker: fail_marker.map(String::from) }),
        &cfg,
    ))
}

// ── Loopback PDF server ───────────────────────────────────────────────────────

/// Serves the given body on every request. Returns the URL.
async fn serve_bytes(body: Vec<u8>, content_type: &'static str, delay: Duration) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                tokio::time::sleep(delay).await;
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(header.as_bytes()).await;
                let _ = sock.write_all(&body).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    format!("http://127.0.0.1:{}/paper.pdf", addr.port())
}

/// A one-page PDF with real text content, so extraction has something to
/// find.
fn minimal_pdf(text: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    _dir: tempfile::TempDir,
    storage: Arc<StorageLayout>,
    registry: Arc<JobRegistry>,
    bus: Arc<ProgressBus>,
    orchestrator: Arc<Orchestrator>,
}

fn harness(adapters: Vec<Arc<dyn SourceAdapter>>, translator: Option<Arc<Translator>>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    harness_at(dir, adapters, translator)
}

fn harness_at(
    dir: tempfile::TempDir,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    translator: Option<Arc<Translator>>,
) -> Harness {
    let mut cfg = Config::default();
    cfg.download.backoff_base_ms = 10;
    cfg.jobs.page_size = 2;

    let storage = Arc::new(StorageLayout::new(dir.path()).unwrap());
    let registry = Arc::new(JobRegistry::new(storage.clone()));
    let bus = Arc::new(ProgressBus::new());
    let client = ConfinedClient::new().unwrap();
    let downloader = Arc::new(Downloader::new(client, cfg.download.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        storage.clone(),
        Arc::new(AdapterRegistry::from_adapters(adapters)),
        downloader,
        translator,
        bus.clone(),
        &cfg,
    ));
    Harness { _dir: dir, storage, registry, bus, orchestrator }
}

fn request(sources: Vec<SourceTag>, target_count: usize) -> JobRequest {
    JobRequest {
        query: "lumbar fusion".into(),
        sources,
        target_count,
        download_pdfs: false,
        translate: false,
        target_language: None,
        project_id: "spine-team".into(),
        sort_by_date: false,
    }
}

async fn await_terminal(harness: &Harness, job_id: Uuid) -> JobStatus {
    for _ in 0..500 {
        let job = harness.registry.get(job_id).await.unwrap();
        if job.status.is_terminal() {
            return job.status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job did not reach a terminal state");
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

/// S1: metadata-only job completes with exactly target_count papers and no
/// PDFs on disk.
#[tokio::test(flavor = "multi_thread")]
async fn test_s1_metadata_only_job() {
    let records = vec![
        pubmed_record("100", "Lumbar fusion one"),
        pubmed_record("101", "Lumbar fusion two"),
        pubmed_record("102", "Lumbar fusion three"),
        pubmed_record("103", "Lumbar fusion four"),
    ];
    let h = harness(
        vec![Arc::new(MockAdapter { tag: SourceTag::Pubmed, records, fail: false })],
        None,
    );

    let job = h.registry.create(request(vec![SourceTag::Pubmed], 3)).await.unwrap();
    h.orchestrator.spawn(job.clone());
    assert_eq!(await_terminal(&h, job.job_id).await, JobStatus::Completed);

    let index = h.storage.read_index(job.job_id).unwrap();
    assert_eq!(index.len(), 3);
    for key in &index {
        let record = h.storage.read_metadata(job.job_id, key).unwrap();
        assert!(!record.title.is_empty());
        assert!(!record.authors.is_empty());
        assert_eq!(record.source_tag, SourceTag::Pubmed);
        assert!(!h.storage.has_pdf(job.job_id, key));
    }

    // Progress monotonicity and completed-at-100.
    let events = h.storage.read_events(job.job_id).unwrap();
    let mut last = 0u8;
    for e in &events {
        assert!(e.progress_pct >= last, "progress went backwards");
        assert!(e.progress_pct <= 100);
        last = e.progress_pct;
    }
    let terminal = events.last().unwrap();
    assert_eq!(terminal.kind, EventKind::Terminal);
    assert_eq!(terminal.progress_pct, 100);

    let final_job = h.registry.get(job.job_id).await.unwrap();
    assert_eq!(final_job.progress_pct, 100);
    assert_eq!(final_job.counters.found, 3);
}

/// S2: with downloads on, papers with a pdf_url get source.pdf; the one
/// without records SkipReason::NoUrl.
#[tokio::test(flavor = "multi_thread")]
async fn test_s2_downloads_and_no_url_skip() {
    let pdf_url = serve_bytes(minimal_pdf("Fusion outcomes text"), "application/pdf", Duration::ZERO).await;

    let mut with_pdf_a = pubmed_record("200", "Paper with pdf A");
    with_pdf_a.pdf_url = Some(pdf_url.clone());
    let mut with_pdf_b = pubmed_record("201", "Paper with pdf B");
    with_pdf_b.pdf_url = Some(pdf_url.clone());
    let no_url = pubmed_record("202", "Paper without pdf");

    let h = harness(
        vec![Arc::new(MockAdapter {
            tag: SourceTag::Pubmed,
            records: vec![with_pdf_a, with_pdf_b, no_url],
            fail: false,
        })],
        None,
    );

    let mut req = request(vec![SourceTag::Pubmed], 3);
    req.download_pdfs = true;
    let job = h.registry.create(req).await.unwrap();
    h.orchestrator.spawn(job.clone());
    assert_eq!(await_terminal(&h, job.job_id).await, JobStatus::Completed);

    assert!(h.storage.has_pdf(job.job_id, "200"));
    assert!(h.storage.has_pdf(job.job_id, "201"));
    assert!(!h.storage.has_pdf(job.job_id, "202"));

    let skipped = h.storage.read_metadata(job.job_id, "202").unwrap();
    assert_eq!(skipped.skip_reason, Some(SkipReason::NoUrl));

    // Downloaded PDFs start with the magic bytes.
    for key in ["200", "201"] {
        let path = h.storage.pdf_path(job.job_id, key).unwrap();
        let bytes = std::fs::read(path).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }

    let final_job = h.registry.get(job.job_id).await.unwrap();
    assert_eq!(final_job.counters.downloaded, 2);
    // The served one-pager carries real text, so extraction ran too.
    assert_eq!(final_job.counters.extracted, 2);
    assert!(h.storage.has_fulltext(job.job_id, "200"));
}

/// S3: an unreachable source produces one warning; the job completes from
/// the remaining sources.
#[tokio::test(flavor = "multi_thread")]
async fn test_s3_source_unavailable() {
    let records = vec![
        pubmed_record("300", "Reachable one"),
        pubmed_record("301", "Reachable two"),
        pubmed_record("302", "Reachable three"),
    ];
    let h = harness(
        vec![
            Arc::new(MockAdapter { tag: SourceTag::Pubmed, records, fail: false }),
            Arc::new(MockAdapter { tag: SourceTag::Arxiv, records: vec![], fail: true }),
        ],
        None,
    );

    let job = h
        .registry
        .create(request(vec![SourceTag::Pubmed, SourceTag::Arxiv], 5))
        .await
        .unwrap();
    h.orchestrator.spawn(job.clone());
    assert_eq!(await_terminal(&h, job.job_id).await, JobStatus::Completed);

    let index = h.storage.read_index(job.job_id).unwrap();
    assert_eq!(index.len(), 3, "job completes with what the live sources had");

    let events = h.storage.read_events(job.job_id).unwrap();
    let warnings: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Warning && e.message.contains("arxiv"))
        .collect();
    assert_eq!(warnings.len(), 1, "exactly one warning for the dead source");
}

/// S4: a permanent translation failure on one paper leaves it without a
/// translations entry and warns with its paper_key; other papers carry
/// translated title and abstract.
#[tokio::test(flavor = "multi_thread")]
async fn test_s4_partial_translation_failure() {
    let records = vec![
        pubmed_record("400", "Fusion outcomes"),
        pubmed_record("401", "POISON paper title"),
        pubmed_record("402", "Disc replacement"),
    ];
    let h = harness(
        vec![Arc::new(MockAdapter { tag: SourceTag::Pubmed, records, fail: false })],
        Some(mock_translator(Some("POISON"))),
    );

    let mut req = request(vec![SourceTag::Pubmed], 3);
    req.translate = true;
    req.target_language = Some("ko".into());
    let job = h.registry.create(req).await.unwrap();
    h.orchestrator.spawn(job.clone());
    assert_eq!(await_terminal(&h, job.job_id).await, JobStatus::Completed);

    let poisoned = h.storage.read_metadata(job.job_id, "401").unwrap();
    assert!(poisoned.translations.get("ko").is_none());
    assert!(!h.storage.has_summary(job.job_id, "401", "ko"));

    for key in ["400", "402"] {
        let record = h.storage.read_metadata(job.job_id, key).unwrap();
        let ko = record.translations.get("ko").expect("translation present");
        assert!(ko.title.as_deref().unwrap().starts_with("[ko]"));
        assert!(ko.abstract_text.as_deref().unwrap().starts_with("[ko]"));
        assert!(h.storage.has_summary(job.job_id, key, "ko"));
    }

    let events = h.storage.read_events(job.job_id).unwrap();
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::Warning && e.paper_key.as_deref() == Some("401")));
}

/// S5: cancelling mid-download ends the job as cancelled and stops new
/// per-paper download events for papers not already in flight.
#[tokio::test(flavor = "multi_thread")]
async fn test_s5_cancel_mid_download() {
    let pdf_url =
        serve_bytes(minimal_pdf("slow download"), "application/pdf", Duration::from_millis(150)).await;

    let records: Vec<PaperRecord> = (0..6)
        .map(|i| {
            let mut r = pubmed_record(&format!("50{i}"), &format!("Cancellable paper {i}"));
            r.pdf_url = Some(pdf_url.clone());
            r
        })
        .collect();
    let h = harness(
        vec![Arc::new(MockAdapter { tag: SourceTag::Pubmed, records, fail: false })],
        None,
    );

    let mut req = request(vec![SourceTag::Pubmed], 6);
    req.download_pdfs = true;
    let job = h.registry.create(req).await.unwrap();

    let mut rx = h.bus.subscribe(job.job_id);
    h.orchestrator.spawn(job.clone());

    // Cancel on the first completed download.
    let mut cancel_at = None;
    while let Ok(event) = rx.recv().await {
        if event.kind == EventKind::PaperDownloaded {
            cancel_at = Some(event.timestamp);
            h.registry.transition(job.job_id, JobStatus::Cancelled).await.unwrap();
            break;
        }
        if event.kind == EventKind::Terminal {
            panic!("job finished before the test could cancel it");
        }
    }
    let cancel_at = cancel_at.unwrap();

    assert_eq!(await_terminal(&h, job.job_id).await, JobStatus::Cancelled);

    let events = h.storage.read_events(job.job_id).unwrap();
    let terminal = events.last().unwrap();
    assert_eq!(terminal.kind, EventKind::Terminal);
    assert!(terminal.message.contains("cancelled"));

    // At most the in-flight completions may land after the cancel stamp.
    let late_downloads = events
        .iter()
        .filter(|e| e.kind == EventKind::PaperDownloaded && e.timestamp > cancel_at)
        .count();
    assert!(late_downloads <= 4, "more than the in-flight bound completed after cancel");
}

/// S6: restart resumes from the on-disk layout; completed artifacts are not
/// re-done (the pre-seeded fulltext survives byte-identical).
#[tokio::test(flavor = "multi_thread")]
async fn test_s6_resume_after_restart() {
    let pdf_bytes = minimal_pdf("Resumable paper text");
    let pdf_url = serve_bytes(pdf_bytes.clone(), "application/pdf", Duration::ZERO).await;

    let mut paper_done = pubmed_record("600", "Already processed paper");
    paper_done.pdf_url = Some(pdf_url.clone());
    let mut paper_todo = pubmed_record("601", "Still pending paper");
    paper_todo.pdf_url = Some(pdf_url.clone());
    let records = vec![paper_done.clone(), paper_todo.clone()];

    let dir = tempfile::tempdir().unwrap();

    // Simulate a run that was killed mid-extract: paper 600 fully done,
    // paper 601 found but neither downloaded nor extracted.
    let job_id;
    {
        let storage = Arc::new(StorageLayout::new(dir.path()).unwrap());
        let registry = JobRegistry::new(storage.clone());
        let mut req = request(vec![SourceTag::Pubmed], 2);
        req.download_pdfs = true;
        let job = registry.create(req).await.unwrap();
        job_id = job.job_id;
        registry.transition(job_id, JobStatus::Running).await.unwrap();

        storage.write_metadata(job_id, &paper_done).unwrap();
        storage.append_index(job_id, "600").unwrap();
        storage.write_pdf(job_id, "600", &pdf_bytes).unwrap();
        storage.write_fulltext(job_id, "600", "SENTINEL FULLTEXT").unwrap();
        storage.write_metadata(job_id, &paper_todo).unwrap();
        storage.append_index(job_id, "601").unwrap();
    }

    // Fresh process over the same storage root.
    let h = harness_at(
        dir,
        vec![Arc::new(MockAdapter { tag: SourceTag::Pubmed, records, fail: false })],
        None,
    );
    let resumed = h.orchestrator.resume_recovered().await.unwrap();
    assert_eq!(resumed, 1);
    assert_eq!(await_terminal(&h, job_id).await, JobStatus::Completed);

    // Pre-seeded artifacts were not redone.
    assert_eq!(h.storage.read_fulltext(job_id, "600").unwrap(), "SENTINEL FULLTEXT");

    // The pending paper was carried through download and extract.
    assert!(h.storage.has_pdf(job_id, "601"));
    assert!(h.storage.has_fulltext(job_id, "601"));

    // Index kept insertion order and gained nothing new.
    assert_eq!(h.storage.read_index(job_id).unwrap(), vec!["600", "601"]);

    // No duplicate paper_found events for already-indexed papers.
    let events = h.storage.read_events(job_id).unwrap();
    let found_600 = events
        .iter()
        .filter(|e| e.kind == EventKind::PaperFound && e.paper_key.as_deref() == Some("600"))
        .count();
    assert_eq!(found_600, 0);
}

/// Pause holds the pipeline between work items; resume finishes it.
#[tokio::test(flavor = "multi_thread")]
async fn test_pause_and_resume() {
    let records = vec![
        pubmed_record("700", "Pausable one"),
        pubmed_record("701", "Pausable two"),
        pubmed_record("702", "Pausable three"),
    ];
    let h = harness(
        vec![Arc::new(MockAdapter { tag: SourceTag::Pubmed, records, fail: false })],
        None,
    );

    let job = h.registry.create(request(vec![SourceTag::Pubmed], 3)).await.unwrap();
    let mut rx = h.bus.subscribe(job.job_id);
    h.orchestrator.spawn(job.clone());

    // Pause as soon as the first paper lands.
    while let Ok(event) = rx.recv().await {
        if event.kind == EventKind::PaperFound {
            break;
        }
    }
    // The transition may race job completion on a fast machine; both
    // outcomes are valid states, so only assert when the pause landed.
    if h.registry.transition(job.job_id, JobStatus::Paused).await.is_ok() {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let paused = h.registry.get(job.job_id).await.unwrap();
        assert_eq!(paused.status, JobStatus::Paused);

        h.registry.transition(job.job_id, JobStatus::Running).await.unwrap();
    }
    assert_eq!(await_terminal(&h, job.job_id).await, JobStatus::Completed);
}

/// A non-PDF response is skipped as not_pdf after the content check.
#[tokio::test(flavor = "multi_thread")]
async fn test_html_response_skipped_as_not_pdf() {
    let url = serve_bytes(b"<html>paywall</html>".to_vec(), "text/html", Duration::ZERO).await;
    let mut record = pubmed_record("800", "Paywalled paper");
    record.pdf_url = Some(url);

    let h = harness(
        vec![Arc::new(MockAdapter { tag: SourceTag::Pubmed, records: vec![record], fail: false })],
        None,
    );
    let mut req = request(vec![SourceTag::Pubmed], 1);
    req.download_pdfs = true;
    let job = h.registry.create(req).await.unwrap();
    h.orchestrator.spawn(job.clone());
    assert_eq!(await_terminal(&h, job.job_id).await, JobStatus::Completed);

    let meta = h.storage.read_metadata(job.job_id, "800").unwrap();
    assert_eq!(meta.skip_reason, Some(SkipReason::NotPdf));
    assert!(!h.storage.has_pdf(job.job_id, "800"));
}

/// Cross-source duplicates collapse to one paper under the job budget.
#[tokio::test(flavor = "multi_thread")]
async fn test_cross_source_dedup() {
    let mut from_pubmed = pubmed_record("900", "Shared spine study");
    from_pubmed.doi = Some("10.9/shared".into());

    let mut from_s2 = PaperRecord::new(SourceTag::SemanticScholar, "s2-900", "Shared spine study").unwrap();
    from_s2.doi = Some("10.9/shared".into());
    from_s2.abstract_text = Some("Extra abstract from S2.".into());

    let h = harness(
        vec![
            Arc::new(MockAdapter { tag: SourceTag::Pubmed, records: vec![from_pubmed], fail: false }),
            Arc::new(MockAdapter {
                tag: SourceTag::SemanticScholar,
                records: vec![from_s2],
                fail: false,
            }),
        ],
        None,
    );

    let job = h
        .registry
        .create(request(vec![SourceTag::Pubmed, SourceTag::SemanticScholar], 5))
        .await
        .unwrap();
    h.orchestrator.spawn(job.clone());
    assert_eq!(await_terminal(&h, job.job_id).await, JobStatus::Completed);

    let index = h.storage.read_index(job.job_id).unwrap();
    assert_eq!(index.len(), 1, "duplicates across sources must collapse");
}
