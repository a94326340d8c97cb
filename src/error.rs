use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

/// Rejection of a single trade event at the ledger boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("invalid event {id}: {reason}")]
    InvalidEvent { id: String, reason: String },
}

impl IngestError {
    pub fn invalid(id: &str, reason: impl Into<String>) -> Self {
        IngestError::InvalidEvent {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// A ledger scan ran past its budget. Callers may retry with a narrower window.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("query timeout: scan of {scanned} rows exceeds budget of {budget}")]
    RowBudget { scanned: usize, budget: usize },

    #[error("query timeout: deadline passed after {scanned} rows")]
    Deadline { scanned: usize },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Ingest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Query(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::BadRequest(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
