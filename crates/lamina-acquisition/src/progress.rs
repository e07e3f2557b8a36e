//! Progress events and the fan-out bus.
//!
//! Every event is appended to the job's `events.log` before being broadcast,
//! so a subscriber that reconnects and replays the log can only observe a
//! duplicate, never a gap.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::StageCounters;

/// Queue depth per subscriber; a receiver that lags beyond this is dropped
/// and must reconnect and replay from `events.log`.
const SUBSCRIBER_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Download,
    Extract,
    Translate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Download => "download",
            Stage::Extract => "extract",
            Stage::Translate => "translate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StageStarted,
    PaperFound,
    PaperDownloaded,
    PaperExtracted,
    PaperTranslated,
    StageCompleted,
    Warning,
    Terminal,
}

/// Append-only record of observable progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub counters: StageCounters,
    pub progress_pct: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fan-out of progress events to live subscribers, one channel per job.
///
/// Delivery is at-most-once per live subscriber and order-preserving per
/// job; the durable record is `events.log`, not this bus.
pub struct ProgressBus {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self { channels: Mutex::new(HashMap::new()) }
    }

    /// Subscribe to a job's live events. Creates the channel on first use so
    /// subscribers may attach before the orchestrator starts emitting.
    pub fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_QUEUE).0)
            .subscribe()
    }

    /// Publish to live subscribers. A send with no receivers is not an error.
    pub fn publish(&self, event: &ProgressEvent) {
        let mut channels = self.channels.lock().unwrap();
        let tx = channels
            .entry(event.job_id)
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_QUEUE).0);
        let _ = tx.send(event.clone());
        if event.kind == EventKind::Terminal {
            channels.remove(&event.job_id);
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
