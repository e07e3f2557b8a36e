//! Job submission, inspection, and control.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lamina_acquisition::models::{Job, JobRequest, JobStatus};
use lamina_acquisition::progress::ProgressEvent;

use super::ApiError;
use crate::state::SharedState;

#[derive(Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// `POST /api/jobs` — validate and schedule an acquisition job.
pub async fn submit(
    State(state): State<SharedState>,
    Json(request): Json<JobRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let job = state.registry.create(request).await?;
    state.orchestrator.spawn(job.clone());
    Ok(Json(SubmitResponse { job_id: job.job_id, status: job.status }))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub project_id: Option<String>,
}

/// `GET /api/jobs` — job snapshots, optionally filtered by project.
pub async fn list(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Job>> {
    Json(state.registry.list(params.project_id.as_deref()).await)
}

/// Full snapshot plus the most recent progress event.
#[derive(Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<ProgressEvent>,
}

/// `GET /api/jobs/{id}`
pub async fn get_job(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.registry.get(job_id).await?;
    let last_event = state.storage.read_events(job_id).unwrap_or_default().pop();
    Ok(Json(JobView { job, last_event }))
}

/// `POST /api/jobs/{id}/pause` — idempotent for paused and terminal jobs.
pub async fn pause(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state.registry.get(job_id).await?;
    if job.status == JobStatus::Paused || job.status.is_terminal() {
        return Ok(Json(job));
    }
    Ok(Json(state.registry.transition(job_id, JobStatus::Paused).await?))
}

/// `POST /api/jobs/{id}/resume`
pub async fn resume(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state.registry.get(job_id).await?;
    if job.status == JobStatus::Running || job.status.is_terminal() {
        return Ok(Json(job));
    }
    Ok(Json(state.registry.transition(job_id, JobStatus::Running).await?))
}

/// `POST /api/jobs/{id}/cancel` — the orchestrator stops initiating new
/// work at its next checkpoint; partial artifacts stay on disk.
pub async fn cancel(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state.registry.get(job_id).await?;
    if job.status.is_terminal() {
        return Ok(Json(job));
    }
    Ok(Json(state.registry.transition(job_id, JobStatus::Cancelled).await?))
}
