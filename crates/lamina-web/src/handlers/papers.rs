//! Result enumeration and artifact retrieval.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use lamina_acquisition::models::PaperRecord;

use super::ApiError;
use crate::state::SharedState;

/// `GET /api/jobs/{id}/papers` — records in index (insertion) order.
pub async fn list_papers(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Vec<PaperRecord>>, ApiError> {
    // 404 for unknown jobs, empty list for known-but-empty ones.
    state.registry.get(job_id).await?;
    let index = state.storage.read_index(job_id)?;
    let mut records = Vec::with_capacity(index.len());
    for key in &index {
        records.push(state.storage.read_metadata(job_id, key)?);
    }
    Ok(Json(records))
}

/// `GET /api/jobs/{id}/papers/{key}` — metadata.json.
pub async fn get_paper(
    State(state): State<SharedState>,
    Path((job_id, key)): Path<(Uuid, String)>,
) -> Result<Json<PaperRecord>, ApiError> {
    state.registry.get(job_id).await?;
    match state.storage.read_metadata(job_id, &key) {
        Ok(record) => Ok(Json(record)),
        Err(_) => Err(ApiError(lamina_common::LaminaError::JobNotFound(format!(
            "paper {key} in job {job_id}"
        )))),
    }
}

/// `GET /api/jobs/{id}/papers/{key}/fulltext`
pub async fn fulltext(
    State(state): State<SharedState>,
    Path((job_id, key)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    state.registry.get(job_id).await?;
    if !state.storage.has_fulltext(job_id, &key) {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let text = state.storage.read_fulltext(job_id, &key)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
}

/// `GET /api/jobs/{id}/papers/{key}/pdf`
pub async fn pdf(
    State(state): State<SharedState>,
    Path((job_id, key)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    state.registry.get(job_id).await?;
    let path = state.storage.pdf_path(job_id, &key)?;
    if !path.is_file() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let bytes = std::fs::read(&path)
        .map_err(|e| lamina_common::LaminaError::Storage(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/pdf")], bytes).into_response())
}

/// `GET /api/jobs/{id}/papers/{key}/summary/{lang}`
pub async fn summary(
    State(state): State<SharedState>,
    Path((job_id, key, lang)): Path<(Uuid, String, String)>,
) -> Result<Response, ApiError> {
    state.registry.get(job_id).await?;
    let path = state.storage.summary_path(job_id, &key, &lang)?;
    if !path.is_file() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| lamina_common::LaminaError::Storage(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
}
