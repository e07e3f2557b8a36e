//! Drives a job through search → download → extract → translate.
//!
//! Pause and cancel are checked between page fetches, between download
//! completions, and between per-paper extract/translate calls. Metadata and
//! the index are written as each paper reaches its per-stage terminal
//! state, so an interrupted job resumes from the on-disk layout alone.

use std::sync::Arc;

use chrono::Utc;
use lamina_common::config::{Config, ExtractConfig, JobsConfig};
use lamina_common::{LaminaError, Result};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::dedup::{DedupOutcome, Deduper};
use crate::download::{Downloader, FetchOutcome};
use crate::extract::{detect_sections, extract_pdf_text, sections_to_text};
use crate::models::{
    Job, JobStatus, PaperRecord, SkipReason, SourceTag, StageCounters, TranslatedFields,
};
use crate::progress::{EventKind, ProgressBus, ProgressEvent, Stage};
use crate::registry::{ControlSignal, JobControl, JobRegistry};
use crate::sources::{AdapterRegistry, SearchOptions, SourceAdapter};
use crate::storage::{render_summary, StorageLayout};
use crate::translate::{TranslateError, Translator};

pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    storage: Arc<StorageLayout>,
    adapters: Arc<AdapterRegistry>,
    downloader: Arc<Downloader>,
    translator: Option<Arc<Translator>>,
    bus: Arc<ProgressBus>,
    jobs_cfg: JobsConfig,
    extract_cfg: ExtractConfig,
    download_concurrency: usize,
    job_slots: Arc<Semaphore>,
}

/// Why a job stopped before completing.
enum Abort {
    Cancelled,
    Fatal { stage: Stage, message: String },
}

fn fatal(stage: Stage) -> impl Fn(LaminaError) -> Abort {
    move |e| Abort::Fatal { stage, message: e.to_string() }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        storage: Arc<StorageLayout>,
        adapters: Arc<AdapterRegistry>,
        downloader: Arc<Downloader>,
        translator: Option<Arc<Translator>>,
        bus: Arc<ProgressBus>,
        cfg: &Config,
    ) -> Self {
        Self {
            registry,
            storage,
            adapters,
            downloader,
            translator,
            bus,
            jobs_cfg: cfg.jobs.clone(),
            extract_cfg: cfg.extract.clone(),
            download_concurrency: cfg.download.concurrency,
            job_slots: Arc::new(Semaphore::new(cfg.jobs.max_concurrent)),
        }
    }

    /// Schedule a job onto the orchestrator. Returns immediately; the job
    /// waits for a concurrency slot in the background.
    pub fn spawn(self: &Arc<Self>, job: Job) {
        let this = self.clone();
        tokio::spawn(async move { this.run_job(job).await });
    }

    /// Recover persisted jobs after a restart and reschedule the
    /// non-terminal ones.
    pub async fn resume_recovered(self: &Arc<Self>) -> Result<usize> {
        let resumable = self.registry.recover().await?;
        let n = resumable.len();
        for job in resumable {
            self.spawn(job);
        }
        Ok(n)
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    async fn run_job(self: Arc<Self>, job: Job) {
        let Ok(_permit) = self.job_slots.clone().acquire_owned().await else {
            return;
        };
        let job_id = job.job_id;
        let mut events = JobEvents::new(
            job_id,
            &job,
            self.bus.clone(),
            self.storage.clone(),
            self.registry.clone(),
        );

        match self.drive(&job, &mut events).await {
            Ok(()) => {
                // A cancel can land between the last checkpoint and here; the
                // registry's verdict wins so the job is never observed in two
                // terminal states.
                let status = match self.registry.transition(job_id, JobStatus::Completed).await {
                    Ok(updated) => updated.status,
                    Err(_) => self
                        .registry
                        .get(job_id)
                        .await
                        .map(|j| j.status)
                        .unwrap_or(JobStatus::Completed),
                };
                if status == JobStatus::Completed {
                    events.force_full_progress();
                }
                events.terminal(status.as_str(), None).await;
                info!(job_id = %job_id, status = %status, "job finished");
            }
            Err(Abort::Cancelled) => {
                // Status was already set by the cancel request.
                events.terminal("cancelled", None).await;
                info!(job_id = %job_id, "job cancelled");
            }
            Err(Abort::Fatal { stage, message }) => {
                let full = format!("{}: {message}", stage.as_str());
                if let Err(e) = self.registry.fail(job_id, full.clone()).await {
                    warn!(job_id = %job_id, "failed-transition rejected: {e}");
                }
                events.terminal("failed", Some(full)).await;
            }
        }
    }

    async fn drive(&self, job: &Job, events: &mut JobEvents) -> std::result::Result<(), Abort> {
        let job_id = job.job_id;
        let control = self.registry.control(job_id).await.map_err(fatal(Stage::Search))?;
        // A job cancelled before its concurrency slot freed never starts.
        self.checkpoint(&control).await?;
        if job.status == JobStatus::Pending {
            self.registry
                .transition(job_id, JobStatus::Running)
                .await
                .map_err(fatal(Stage::Search))?;
        }

        // Rebuild per-job state from disk; this covers both cold start and
        // resume. The index, not directory enumeration, defines the order.
        let mut deduper = Deduper::new();
        let index = self.storage.read_index(job_id).map_err(fatal(Stage::Search))?;
        for key in &index {
            let record = self.storage.read_metadata(job_id, key).map_err(|e| Abort::Fatal {
                stage: Stage::Search,
                message: format!("corrupt paper metadata for {key}: {e}"),
            })?;
            deduper.add(record);
        }

        self.search_stage(job, &control, &mut deduper, events).await?;

        let mut papers: Vec<(String, PaperRecord)> =
            deduper.records().map(|(k, r)| (k.to_string(), r.clone())).collect();

        if job.options.download_pdfs {
            self.download_stage(job, &control, &mut papers, events).await?;
            self.extract_stage(job, &control, &mut papers, events).await?;
        }
        if job.options.translate {
            self.translate_stage(job, &control, &mut papers, events).await?;
        }
        Ok(())
    }

    // ── Search ────────────────────────────────────────────────────────────────

    async fn search_stage(
        &self,
        job: &Job,
        control: &JobControl,
        deduper: &mut Deduper,
        events: &mut JobEvents,
    ) -> std::result::Result<(), Abort> {
        let job_id = job.job_id;
        let target = job.target_count;
        events
            .emit(EventKind::StageStarted, Some(Stage::Search), "searching sources".into(), None, None)
            .await
            .map_err(fatal(Stage::Search))?;
        events.set_fraction(Stage::Search, deduper.len(), target);

        if deduper.len() < target {
            let (tx, mut rx) = mpsc::channel::<SearchMsg>(8);
            let (stop_tx, stop_rx) = watch::channel(false);
            let options = SearchOptions { sort_by_date: job.options.sort_by_date };

            let mut tasks = JoinSet::new();
            for tag in &job.sources {
                let Some(adapter) = self.adapters.get(*tag) else {
                    events
                        .warning(Some(Stage::Search), format!("source {tag} is not configured"), None)
                        .await
                        .map_err(fatal(Stage::Search))?;
                    continue;
                };
                tasks.spawn(source_task(
                    adapter,
                    job.query.clone(),
                    options,
                    self.jobs_cfg.page_size,
                    self.jobs_cfg.page_cap,
                    tx.clone(),
                    stop_rx.clone(),
                    control.clone(),
                ));
            }
            drop(tx);

            while let Some(msg) = rx.recv().await {
                self.checkpoint(control).await?;
                match msg {
                    SearchMsg::Page { source, records } => {
                        tracing::debug!(source = %source, n = records.len(), "search page received");
                        for record in records {
                            if deduper.len() >= target {
                                break;
                            }
                            match deduper.add(record) {
                                DedupOutcome::Inserted(key) => {
                                    let inserted = deduper.get(&key).expect("just inserted").clone();
                                    self.storage
                                        .write_metadata(job_id, &inserted)
                                        .map_err(fatal(Stage::Search))?;
                                    self.storage
                                        .append_index(job_id, &key)
                                        .map_err(fatal(Stage::Search))?;
                                    events.counters.found = deduper.len();
                                    events.set_fraction(Stage::Search, deduper.len(), target);
                                    events
                                        .emit(
                                            EventKind::PaperFound,
                                            Some(Stage::Search),
                                            format!("found: {}", inserted.title),
                                            Some(key),
                                            None,
                                        )
                                        .await
                                        .map_err(fatal(Stage::Search))?;
                                }
                                DedupOutcome::Merged(key) => {
                                    // The merge may have added identifiers or a
                                    // pdf_url; keep the snapshot current.
                                    let merged = deduper.get(&key).expect("merge target").clone();
                                    self.storage
                                        .write_metadata(job_id, &merged)
                                        .map_err(fatal(Stage::Search))?;
                                }
                            }
                        }
                        if deduper.len() >= target {
                            let _ = stop_tx.send(true);
                        }
                    }
                    SearchMsg::SourceFailed(tag, message) => {
                        events
                            .warning(
                                Some(Stage::Search),
                                format!("source {tag} unavailable: {message}"),
                                None,
                            )
                            .await
                            .map_err(fatal(Stage::Search))?;
                    }
                    SearchMsg::SourceDone(tag) => {
                        tracing::debug!(source = %tag, "source exhausted");
                    }
                }
            }
            tasks.shutdown().await;
        }

        events.set_fraction_complete(Stage::Search);
        events
            .emit(
                EventKind::StageCompleted,
                Some(Stage::Search),
                format!("search complete: {} unique records", deduper.len()),
                None,
                None,
            )
            .await
            .map_err(fatal(Stage::Search))?;
        Ok(())
    }

    // ── Download ──────────────────────────────────────────────────────────────

    async fn download_stage(
        &self,
        job: &Job,
        control: &JobControl,
        papers: &mut [(String, PaperRecord)],
        events: &mut JobEvents,
    ) -> std::result::Result<(), Abort> {
        let job_id = job.job_id;
        let total = papers.len();
        events
            .emit(EventKind::StageStarted, Some(Stage::Download), "downloading PDFs".into(), None, None)
            .await
            .map_err(fatal(Stage::Download))?;

        let mut done = 0usize;
        let semaphore = Arc::new(Semaphore::new(self.download_concurrency));
        let mut inflight: JoinSet<(usize, FetchOutcome)> = JoinSet::new();

        for (i, (key, record)) in papers.iter().enumerate() {
            // No new work is started once cancel lands; anything already
            // in flight is dropped with the JoinSet.
            self.checkpoint(control).await?;

            // Settled on a previous run.
            if self.storage.has_pdf(job_id, key) || record.skip_reason.is_some() {
                done += 1;
                events.set_fraction(Stage::Download, done, total);
                continue;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let downloader = self.downloader.clone();
            let record = record.clone();
            inflight.spawn(async move {
                let outcome = downloader.fetch(&record).await;
                drop(permit);
                (i, outcome)
            });
        }

        while let Some(joined) = inflight.join_next().await {
            self.checkpoint(control).await?;
            let Ok((i, outcome)) = joined else { continue };
            done += 1;
            let (key, record) = &mut papers[i];
            match outcome {
                FetchOutcome::Fetched { bytes } => {
                    self.storage.write_pdf(job_id, key, &bytes).map_err(fatal(Stage::Download))?;
                    self.storage.write_metadata(job_id, record).map_err(fatal(Stage::Download))?;
                    events.counters.downloaded += 1;
                    events.set_fraction(Stage::Download, done, total);
                    events
                        .emit(
                            EventKind::PaperDownloaded,
                            Some(Stage::Download),
                            format!("downloaded {} bytes", bytes.len()),
                            Some(key.clone()),
                            None,
                        )
                        .await
                        .map_err(fatal(Stage::Download))?;
                }
                FetchOutcome::Skipped(reason) => {
                    record.skip_reason = Some(reason);
                    self.storage.write_metadata(job_id, record).map_err(fatal(Stage::Download))?;
                    events.set_fraction(Stage::Download, done, total);
                    events
                        .emit(
                            EventKind::PaperDownloaded,
                            Some(Stage::Download),
                            format!("skipped: {}", reason.as_str()),
                            Some(key.clone()),
                            None,
                        )
                        .await
                        .map_err(fatal(Stage::Download))?;
                }
            }
        }

        events.set_fraction_complete(Stage::Download);
        events
            .emit(
                EventKind::StageCompleted,
                Some(Stage::Download),
                format!("download complete: {} PDFs", events.counters.downloaded),
                None,
                None,
            )
            .await
            .map_err(fatal(Stage::Download))?;
        Ok(())
    }

    // ── Extract ───────────────────────────────────────────────────────────────

    async fn extract_stage(
        &self,
        job: &Job,
        control: &JobControl,
        papers: &mut [(String, PaperRecord)],
        events: &mut JobEvents,
    ) -> std::result::Result<(), Abort> {
        let job_id = job.job_id;
        events
            .emit(EventKind::StageStarted, Some(Stage::Extract), "extracting text".into(), None, None)
            .await
            .map_err(fatal(Stage::Extract))?;

        let work: Vec<usize> = papers
            .iter()
            .enumerate()
            .filter(|(_, (key, _))| self.storage.has_pdf(job_id, key))
            .map(|(i, _)| i)
            .collect();
        let total = work.len();
        let mut done = 0usize;

        for i in work {
            self.checkpoint(control).await?;
            let (key, record) = &mut papers[i];

            if self.storage.has_fulltext(job_id, key) {
                done += 1;
                events.set_fraction(Stage::Extract, done, total);
                continue;
            }

            let pdf_path = self.storage.pdf_path(job_id, key).map_err(fatal(Stage::Extract))?;
            let cfg = self.extract_cfg.clone();
            let extracted = tokio::task::spawn_blocking(move || extract_pdf_text(&pdf_path, &cfg))
                .await
                .map_err(|e| Abort::Fatal { stage: Stage::Extract, message: e.to_string() })?;

            done += 1;
            match extracted {
                Ok(extraction) if !extraction.full_text.trim().is_empty() => {
                    self.storage
                        .write_fulltext(job_id, key, &extraction.full_text)
                        .map_err(fatal(Stage::Extract))?;
                    events.counters.extracted += 1;
                    events.set_fraction(Stage::Extract, done, total);
                    events
                        .emit(
                            EventKind::PaperExtracted,
                            Some(Stage::Extract),
                            format!("extracted {} sections", extraction.sections.len()),
                            Some(key.clone()),
                            None,
                        )
                        .await
                        .map_err(fatal(Stage::Extract))?;
                }
                other => {
                    let detail = match other {
                        Err(e) => format!("extraction failed: {e}"),
                        Ok(_) => "extraction yielded no text".to_string(),
                    };
                    record.skip_reason = record.skip_reason.or(Some(SkipReason::NotPdf));
                    self.storage.write_metadata(job_id, record).map_err(fatal(Stage::Extract))?;
                    events.set_fraction(Stage::Extract, done, total);
                    events
                        .warning(Some(Stage::Extract), detail, Some(key.clone()))
                        .await
                        .map_err(fatal(Stage::Extract))?;
                }
            }
        }

        events.set_fraction_complete(Stage::Extract);
        events
            .emit(
                EventKind::StageCompleted,
                Some(Stage::Extract),
                format!("extraction complete: {} papers", events.counters.extracted),
                None,
                None,
            )
            .await
            .map_err(fatal(Stage::Extract))?;
        Ok(())
    }

    // ── Translate ─────────────────────────────────────────────────────────────

    async fn translate_stage(
        &self,
        job: &Job,
        control: &JobControl,
        papers: &mut [(String, PaperRecord)],
        events: &mut JobEvents,
    ) -> std::result::Result<(), Abort> {
        let job_id = job.job_id;
        let lang = job.options.target_language.clone().unwrap_or_default();
        events
            .emit(
                EventKind::StageStarted,
                Some(Stage::Translate),
                format!("translating to {lang}"),
                None,
                None,
            )
            .await
            .map_err(fatal(Stage::Translate))?;

        let Some(translator) = self.translator.clone() else {
            events
                .warning(
                    Some(Stage::Translate),
                    "translation requested but no provider is configured".into(),
                    None,
                )
                .await
                .map_err(fatal(Stage::Translate))?;
            events.set_fraction_complete(Stage::Translate);
            events
                .emit(
                    EventKind::StageCompleted,
                    Some(Stage::Translate),
                    "translation skipped".into(),
                    None,
                    None,
                )
                .await
                .map_err(fatal(Stage::Translate))?;
            return Ok(());
        };

        let total = papers.len();
        let mut done = 0usize;

        for (key, record) in papers.iter_mut() {
            self.checkpoint(control).await?;
            done += 1;

            if record.translations.contains_key(&lang) {
                events.set_fraction(Stage::Translate, done, total);
                continue;
            }

            let sections_text = if self.storage.has_fulltext(job_id, key) {
                let fulltext =
                    self.storage.read_fulltext(job_id, key).map_err(fatal(Stage::Translate))?;
                let sections = detect_sections(&fulltext);
                if sections.is_empty() { None } else { Some(sections_to_text(&sections)) }
            } else {
                None
            };

            match translate_record(&translator, record, sections_text.as_deref(), &lang).await {
                Ok(fields) => {
                    record.translations.insert(lang.clone(), fields.clone());
                    self.storage.write_metadata(job_id, record).map_err(fatal(Stage::Translate))?;
                    let summary = render_summary(record, &lang, &fields);
                    self.storage
                        .write_summary(job_id, key, &lang, &summary)
                        .map_err(fatal(Stage::Translate))?;
                    events.counters.translated += 1;
                    events.set_fraction(Stage::Translate, done, total);
                    events
                        .emit(
                            EventKind::PaperTranslated,
                            Some(Stage::Translate),
                            format!("translated to {lang}"),
                            Some(key.clone()),
                            None,
                        )
                        .await
                        .map_err(fatal(Stage::Translate))?;
                }
                Err(e) => {
                    events.set_fraction(Stage::Translate, done, total);
                    events
                        .warning(
                            Some(Stage::Translate),
                            format!("translation failed: {e}"),
                            Some(key.clone()),
                        )
                        .await
                        .map_err(fatal(Stage::Translate))?;
                }
            }
        }

        events.set_fraction_complete(Stage::Translate);
        events
            .emit(
                EventKind::StageCompleted,
                Some(Stage::Translate),
                format!("translation complete: {} papers", events.counters.translated),
                None,
                None,
            )
            .await
            .map_err(fatal(Stage::Translate))?;
        Ok(())
    }

    /// Wait out a pause; bail on cancel. This is the suspension point
    /// crossed between work items.
    async fn checkpoint(&self, control: &JobControl) -> std::result::Result<(), Abort> {
        let mut rx = control.subscribe();
        loop {
            let signal = *rx.borrow_and_update();
            match signal {
                ControlSignal::Cancel => return Err(Abort::Cancelled),
                ControlSignal::Run => return Ok(()),
                ControlSignal::Pause => {
                    if rx.changed().await.is_err() {
                        return Err(Abort::Cancelled);
                    }
                }
            }
        }
    }
}

/// Translate the configured fields of one record. Any chunk-level permanent
/// failure aborts the whole paper so no partial entry is stored.
async fn translate_record(
    translator: &Translator,
    record: &PaperRecord,
    sections_text: Option<&str>,
    lang: &str,
) -> std::result::Result<TranslatedFields, TranslateError> {
    let title = translator.translate(&record.title, lang).await?;
    let abstract_text = match record.abstract_text.as_deref() {
        Some(text) => Some(translator.translate(text, lang).await?),
        None => None,
    };
    let sections = match sections_text {
        Some(text) => Some(translator.translate(text, lang).await?),
        None => None,
    };
    Ok(TranslatedFields { title: Some(title), abstract_text, sections })
}

// ── Search source task ────────────────────────────────────────────────────────

enum SearchMsg {
    Page { source: SourceTag, records: Vec<PaperRecord> },
    SourceFailed(SourceTag, String),
    SourceDone(SourceTag),
}

#[allow(clippy::too_many_arguments)]
async fn source_task(
    adapter: Arc<dyn SourceAdapter>,
    query: String,
    options: SearchOptions,
    page_size: usize,
    page_cap: usize,
    tx: mpsc::Sender<SearchMsg>,
    stop_rx: watch::Receiver<bool>,
    control: JobControl,
) {
    let tag = adapter.tag();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if *stop_rx.borrow() || control.current() == ControlSignal::Cancel {
            break;
        }
        match adapter.search(&query, token.as_deref(), page_size, options).await {
            Ok(page) => {
                let n = page.records.len();
                if tx.send(SearchMsg::Page { source: tag, records: page.records }).await.is_err() {
                    break;
                }
                pages += 1;
                match page.next_token {
                    Some(next) if pages < page_cap && n > 0 => token = Some(next),
                    _ => break,
                }
            }
            Err(e) => {
                // One warning per job for a source that cannot serve; it is
                // then treated as having no further results.
                warn!(source = %tag, "source page failed: {e}");
                let _ = tx.send(SearchMsg::SourceFailed(tag, e.to_string())).await;
                break;
            }
        }
    }
    let _ = tx.send(SearchMsg::SourceDone(tag)).await;
}

// ── Progress emission ─────────────────────────────────────────────────────────

/// Builds and fans out progress events, carrying the stage-weighted
/// percentage: search 30, download 30, extract 20, translate 20, rescaled
/// over the stages the job enables. The percentage never decreases within a
/// job, resumed runs included.
struct JobEvents {
    job_id: Uuid,
    bus: Arc<ProgressBus>,
    storage: Arc<StorageLayout>,
    registry: Arc<JobRegistry>,
    counters: StageCounters,
    enabled: [bool; 4],
    fractions: [f64; 4],
    last_pct: u8,
}

const STAGE_WEIGHTS: [u32; 4] = [30, 30, 20, 20];

fn stage_index(stage: Stage) -> usize {
    match stage {
        Stage::Search => 0,
        Stage::Download => 1,
        Stage::Extract => 2,
        Stage::Translate => 3,
    }
}

impl JobEvents {
    fn new(
        job_id: Uuid,
        job: &Job,
        bus: Arc<ProgressBus>,
        storage: Arc<StorageLayout>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        let enabled = [
            true,
            job.options.download_pdfs,
            job.options.download_pdfs,
            job.options.translate,
        ];
        Self {
            job_id,
            bus,
            storage,
            registry,
            counters: job.counters,
            enabled,
            fractions: [0.0; 4],
            last_pct: job.progress_pct,
        }
    }

    fn set_fraction(&mut self, stage: Stage, done: usize, total: usize) {
        let fraction = if total == 0 { 1.0 } else { (done as f64 / total as f64).min(1.0) };
        let idx = stage_index(stage);
        if fraction > self.fractions[idx] {
            self.fractions[idx] = fraction;
        }
    }

    fn set_fraction_complete(&mut self, stage: Stage) {
        self.fractions[stage_index(stage)] = 1.0;
    }

    fn force_full_progress(&mut self) {
        self.fractions = [1.0; 4];
    }

    fn pct(&mut self) -> u8 {
        let mut total_weight = 0u32;
        let mut acc = 0.0f64;
        for i in 0..4 {
            if self.enabled[i] {
                total_weight += STAGE_WEIGHTS[i];
                acc += STAGE_WEIGHTS[i] as f64 * self.fractions[i];
            }
        }
        let pct = if total_weight == 0 {
            100
        } else {
            (100.0 * acc / total_weight as f64) as u8
        };
        if pct > self.last_pct {
            self.last_pct = pct;
        }
        self.last_pct.min(100)
    }

    async fn emit(
        &mut self,
        kind: EventKind,
        stage: Option<Stage>,
        message: String,
        paper_key: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let event = ProgressEvent {
            job_id: self.job_id,
            timestamp: Utc::now(),
            kind,
            stage,
            counters: self.counters,
            progress_pct: self.pct(),
            message,
            paper_key,
            error,
        };
        // Log first, then broadcast: replay-then-subscribe can only observe
        // a duplicate, never a gap.
        self.storage.append_event(&event)?;
        self.bus.publish(&event);
        self.registry
            .update_progress(self.job_id, event.progress_pct, self.counters)
            .await?;
        Ok(())
    }

    async fn warning(
        &mut self,
        stage: Option<Stage>,
        message: String,
        paper_key: Option<String>,
    ) -> Result<()> {
        if let Err(e) = self.registry.record_warning(self.job_id, message.clone()).await {
            warn!(job_id = %self.job_id, "warning not recorded on job row: {e}");
        }
        self.emit(EventKind::Warning, stage, message, paper_key, None).await
    }

    /// Best-effort: a terminal event must go out even when storage is the
    /// thing that failed.
    async fn terminal(&mut self, status: &str, error: Option<String>) {
        let event = ProgressEvent {
            job_id: self.job_id,
            timestamp: Utc::now(),
            kind: EventKind::Terminal,
            stage: None,
            counters: self.counters,
            progress_pct: self.pct(),
            message: format!("job {status}"),
            paper_key: None,
            error,
        };
        if let Err(e) = self.storage.append_event(&event) {
            warn!(job_id = %self.job_id, "terminal event not persisted: {e}");
        }
        self.bus.publish(&event);
    }
}
