//! Axum router — maps all URL paths to handlers.

use axum::{
    routing::{get, post},
    Json, Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{
    jobs::{cancel, get_job, list, pause, resume, submit},
    papers::{fulltext, get_paper, list_papers, pdf, summary},
};
use crate::state::SharedState;
use crate::ws::stream;

/// Build and return the full Axum router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // Jobs
        .route("/api/jobs", post(submit).get(list))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/pause", post(pause))
        .route("/api/jobs/{id}/resume", post(resume))
        .route("/api/jobs/{id}/cancel", post(cancel))

        // Progress streaming
        .route("/api/jobs/{id}/stream", get(stream))

        // Results
        .route("/api/jobs/{id}/papers", get(list_papers))
        .route("/api/jobs/{id}/papers/{key}", get(get_paper))
        .route("/api/jobs/{id}/papers/{key}/fulltext", get(fulltext))
        .route("/api/jobs/{id}/papers/{key}/pdf", get(pdf))
        .route("/api/jobs/{id}/papers/{key}/summary/{lang}", get(summary))

        // Liveness
        .route("/api/health", get(health))

        // Middleware
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
