use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub const SETUP_FAILURE: &str = "Server error during streaming setup";

/// Failures of the relay endpoints that happen before any reply bytes are written.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("Assistant ID not configured on server.")]
    NotConfigured,
    #[error("{0:#}")]
    ThreadInit(anyhow::Error),
    #[error("{0:#}")]
    StreamSetup(anyhow::Error),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            RelayError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            RelayError::NotConfigured => {
                error!("chat requested but no assistant id is configured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": self.to_string() })),
                )
                    .into_response()
            }
            RelayError::ThreadInit(ref err) => {
                error!(error = ?err, "thread initialisation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": self.to_string() })),
                )
                    .into_response()
            }
            RelayError::StreamSetup(ref err) => {
                error!(error = ?err, "failed to start assistant run");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(CONTENT_TYPE, "text/plain; charset=utf-8")],
                    SETUP_FAILURE,
                )
                    .into_response()
            }
        }
    }
}
