//! HTTP handlers.

pub mod jobs;
pub mod papers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lamina_common::LaminaError;

/// Maps pipeline errors onto HTTP statuses.
pub struct ApiError(pub LaminaError);

impl From<LaminaError> for ApiError {
    fn from(e: LaminaError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LaminaError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LaminaError::JobNotFound(_) => StatusCode::NOT_FOUND,
            LaminaError::InvalidTransition { .. } => StatusCode::CONFLICT,
            LaminaError::Security(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
