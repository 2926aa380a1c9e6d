//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] vectorsync_engine::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wire error body, matching the `ERROR` frame's `code`/`message`/`retryable` fields.
#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    retryable: bool,
}

impl AppError {
    /// Maps to the wire error taxonomy and an HTTP status, independent of transport.
    fn wire(&self) -> (StatusCode, &'static str, bool) {
        match self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", true),
            AppError::Engine(e) => {
                let code = e.code();
                let status = match e {
                    vectorsync_engine::Error::CollectionNotFound(_)
                    | vectorsync_engine::Error::RecordNotFound(_)
                    | vectorsync_engine::Error::OwnerNotFound(_) => StatusCode::NOT_FOUND,
                    vectorsync_engine::Error::InvalidPayload(_)
                    | vectorsync_engine::Error::MissingRequiredField(_)
                    | vectorsync_engine::Error::TypeMismatch { .. }
                    | vectorsync_engine::Error::Protocol(_)
                    | vectorsync_engine::Error::InvalidSessionState(_) => StatusCode::BAD_REQUEST,
                    vectorsync_engine::Error::StaleBase { .. } => StatusCode::CONFLICT,
                    vectorsync_engine::Error::ManualConflict { .. } => StatusCode::CONFLICT,
                    vectorsync_engine::Error::OperationOnDeleted(_) => StatusCode::GONE,
                    vectorsync_engine::Error::Unauthorized(_) => StatusCode::FORBIDDEN,
                    vectorsync_engine::Error::Backpressure(_) => StatusCode::TOO_MANY_REQUESTS,
                    vectorsync_engine::Error::InvalidSnapshot(_)
                    | vectorsync_engine::Error::SchemaVersionMismatch { .. }
                    | vectorsync_engine::Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let retryable = matches!(
                    e,
                    vectorsync_engine::Error::StaleBase { .. } | vectorsync_engine::Error::Backpressure(_)
                );
                (status, code, retryable)
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "protocol", false),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "owner_not_found", false),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", false),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", true),
        }
    }

    /// The wire taxonomy code, for embedding in an `ERROR` websocket frame.
    pub fn code(&self) -> &'static str {
        self.wire().1
    }

    /// Whether a client can reasonably retry the operation that produced this error.
    pub fn retryable(&self) -> bool {
        self.wire().2
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, retryable) = self.wire();

        match &self {
            AppError::Database(e) => tracing::error!("database error: {e:?}"),
            AppError::Internal(msg) => tracing::error!("internal error: {msg}"),
            AppError::Engine(e) => tracing::warn!("engine rejected operation: {e}"),
            _ => {}
        }

        let body = Json(ErrorResponse {
            code,
            message: self.to_string(),
            retryable,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
