//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use spatia_core::SpatiaError;
use spatia_pipeline::PipelineError;

/// Error returned by API handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Command rejected by the pipeline
    #[error(transparent)]
    Command(#[from] PipelineError),

    #[error(transparent)]
    Service(#[from] SpatiaError),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Service(SpatiaError::Validation(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Service(SpatiaError::NotFound(message.into()))
    }

    fn status_and_code(&self) -> (u16, &'static str) {
        match self {
            Self::Command(e) => (e.status_code(), e.error_code()),
            Self::Service(e) => (e.status_code(), e.error_code()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if status.is_server_error() && status != StatusCode::INSUFFICIENT_STORAGE {
            tracing::error!(error = %self, "Internal error");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "ok": false,
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
