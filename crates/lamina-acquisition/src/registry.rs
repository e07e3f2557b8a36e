//! Job rows, validated state transitions, and restart recovery.
//!
//! Rows live in memory behind a per-job lock and are written through to
//! `job.json` on every change, so the on-disk snapshot is always current.
//! The registry is the only shared mutable store in the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use lamina_common::{LaminaError, Result};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Job, JobRequest, JobStatus, StageCounters};
use crate::storage::StorageLayout;

/// Desired execution state, checked by the orchestrator at every suspension
/// boundary between work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

/// Handle for signalling a running job. Cloneable; the watch channel keeps
/// the latest signal for late subscribers.
#[derive(Clone)]
pub struct JobControl {
    tx: Arc<watch::Sender<ControlSignal>>,
}

impl JobControl {
    fn new(initial: ControlSignal) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, signal: ControlSignal) {
        let _ = self.tx.send(signal);
    }

    pub fn current(&self) -> ControlSignal {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlSignal> {
        self.tx.subscribe()
    }
}

struct JobEntry {
    job: Mutex<Job>,
    control: JobControl,
}

pub struct JobRegistry {
    storage: Arc<StorageLayout>,
    jobs: RwLock<HashMap<Uuid, Arc<JobEntry>>>,
}

impl JobRegistry {
    pub fn new(storage: Arc<StorageLayout>) -> Self {
        Self { storage, jobs: RwLock::new(HashMap::new()) }
    }

    /// Validate a submission and create the Pending row.
    pub async fn create(&self, request: JobRequest) -> Result<Job> {
        request.validate()?;
        let job = request.into_job();
        self.storage.write_job(&job)?;

        let entry = Arc::new(JobEntry {
            job: Mutex::new(job.clone()),
            control: JobControl::new(ControlSignal::Run),
        });
        self.jobs.write().await.insert(job.job_id, entry);
        info!(job_id = %job.job_id, query = %job.query, "job created");
        Ok(job)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job> {
        let entry = self.entry(job_id).await?;
        let job = entry.job.lock().await;
        Ok(job.clone())
    }

    pub async fn list(&self, project_id: Option<&str>) -> Vec<Job> {
        let entries: Vec<Arc<JobEntry>> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            let job = entry.job.lock().await.clone();
            if project_id.map_or(true, |p| job.project_id == p) {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn control(&self, job_id: Uuid) -> Result<JobControl> {
        Ok(self.entry(job_id).await?.control.clone())
    }

    /// Apply a validated status transition. The per-job lock serializes
    /// concurrent control requests; an edge outside the state machine is
    /// rejected. Control signals follow the status so the orchestrator
    /// observes pause/cancel at its next checkpoint.
    pub async fn transition(&self, job_id: Uuid, to: JobStatus) -> Result<Job> {
        let entry = self.entry(job_id).await?;
        let mut job = entry.job.lock().await;

        if !valid_transition(job.status, to) {
            return Err(LaminaError::InvalidTransition {
                from: job.status.to_string(),
                to: to.to_string(),
            });
        }

        job.status = to;
        job.updated_at = Utc::now();
        if to == JobStatus::Completed {
            job.progress_pct = 100;
        }
        self.storage.write_job(&job)?;

        match to {
            JobStatus::Cancelled => entry.control.set(ControlSignal::Cancel),
            JobStatus::Paused => entry.control.set(ControlSignal::Pause),
            JobStatus::Running => entry.control.set(ControlSignal::Run),
            _ => {}
        }

        info!(job_id = %job_id, status = %to, "job transition");
        Ok(job.clone())
    }

    /// Unrecoverable error: transition to Failed with a message naming the
    /// failing stage.
    pub async fn fail(&self, job_id: Uuid, message: impl Into<String>) -> Result<Job> {
        let entry = self.entry(job_id).await?;
        let mut job = entry.job.lock().await;

        if !valid_transition(job.status, JobStatus::Failed) {
            return Err(LaminaError::InvalidTransition {
                from: job.status.to_string(),
                to: JobStatus::Failed.to_string(),
            });
        }

        job.status = JobStatus::Failed;
        job.error = Some(message.into());
        job.updated_at = Utc::now();
        self.storage.write_job(&job)?;
        warn!(job_id = %job_id, error = ?job.error, "job failed");
        Ok(job.clone())
    }

    /// Monotonic, idempotent progress write: a lower percentage than the
    /// current row is ignored.
    pub async fn update_progress(
        &self,
        job_id: Uuid,
        progress_pct: u8,
        counters: StageCounters,
    ) -> Result<Job> {
        let entry = self.entry(job_id).await?;
        let mut job = entry.job.lock().await;
        let pct = progress_pct.min(100);
        if pct > job.progress_pct {
            job.progress_pct = pct;
        }
        job.counters = counters;
        job.updated_at = Utc::now();
        self.storage.write_job(&job)?;
        Ok(job.clone())
    }

    pub async fn record_warning(&self, job_id: Uuid, message: impl Into<String>) -> Result<()> {
        let entry = self.entry(job_id).await?;
        let mut job = entry.job.lock().await;
        job.last_warning = Some(message.into());
        job.updated_at = Utc::now();
        self.storage.write_job(&job)?;
        Ok(())
    }

    /// Reload persisted jobs after a restart. Returns the jobs that need an
    /// orchestrator task (pending, running, or paused at shutdown). A UUID
    /// directory whose snapshot cannot be parsed is recorded as failed.
    pub async fn recover(&self) -> Result<Vec<Job>> {
        let mut resumable = Vec::new();
        for (job_id, loaded) in self.storage.list_jobs()? {
            match loaded {
                Ok(job) => {
                    let initial = match job.status {
                        JobStatus::Paused => ControlSignal::Pause,
                        _ => ControlSignal::Run,
                    };
                    let entry = Arc::new(JobEntry {
                        job: Mutex::new(job.clone()),
                        control: JobControl::new(initial),
                    });
                    self.jobs.write().await.insert(job_id, entry);
                    if !job.status.is_terminal() {
                        info!(job_id = %job_id, status = %job.status, "recovered resumable job");
                        resumable.push(job);
                    }
                }
                Err(e) => {
                    warn!(job_id = %job_id, "corrupt job snapshot, marking failed: {e}");
                    let now = Utc::now();
                    let job = Job {
                        job_id,
                        project_id: String::new(),
                        query: String::new(),
                        sources: Vec::new(),
                        target_count: 1,
                        options: Default::default(),
                        status: JobStatus::Failed,
                        progress_pct: 0,
                        counters: StageCounters::default(),
                        created_at: now,
                        updated_at: now,
                        error: Some(format!("corrupt job snapshot on resume: {e}")),
                        last_warning: None,
                    };
                    self.storage.write_job(&job)?;
                    let entry = Arc::new(JobEntry {
                        job: Mutex::new(job),
                        control: JobControl::new(ControlSignal::Cancel),
                    });
                    self.jobs.write().await.insert(job_id, entry);
                }
            }
        }
        Ok(resumable)
    }

    async fn entry(&self, job_id: Uuid) -> Result<Arc<JobEntry>> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| LaminaError::JobNotFound(job_id.to_string()))
    }
}

/// Transitions are monotonic except the running↔paused pair.
fn valid_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Running, Paused)
            | (Paused, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Pending, Failed)
            | (Pending, Cancelled)
            | (Running, Cancelled)
            | (Paused, Cancelled)
    )
}
