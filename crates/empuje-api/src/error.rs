//! Empuje API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use empuje_core::bus::BusError;
use empuje_core::error::SyncError;
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The message bus could not be prepared or subscribed to.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Tracing or span export could not be initialised.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `SyncError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            SyncError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            SyncError::Decode(_) => (StatusCode::BAD_REQUEST, "decode_error"),
            SyncError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            SyncError::Rejected(_) => (StatusCode::UNPROCESSABLE_ENTITY, "rejected"),
            SyncError::Deferred(_) => (StatusCode::UNPROCESSABLE_ENTITY, "deferred"),
            SyncError::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
            }
        };

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
