use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Errors raised by the external payment gateway. Rate limits are kept
/// separate from hard failures because the sweep scheduler backs off and
/// retries on 429s but alerts on everything else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway rate limited: {0}")]
    RateLimited(String),

    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    #[error("gateway object not found: {0}")]
    NotFound(String),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("gateway call timed out after {0}s")]
    Timeout(u64),

    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate write: {0}")]
    DuplicateWrite(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same operation later can reasonably succeed.
    /// Drives the ledger retry-count bookkeeping.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Gateway(
                GatewayError::RateLimited(_)
                    | GatewayError::Unreachable(_)
                    | GatewayError::Timeout(_)
            ) | AppError::Database(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred".to_string(),
                )
            }
            AppError::NotFound(ref msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Validation(ref msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::DuplicateWrite(ref msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Gateway(ref err) => {
                tracing::error!("Gateway error: {}", err);
                let status = match err {
                    GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                    GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, err.to_string())
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return AppError::DuplicateWrite(db_err.to_string());
            }
        }
        AppError::Database(err.to_string())
    }
}
