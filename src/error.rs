use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Availability table `{0}` does not exist")]
    MissingTable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Rewrites a sqlx "no such table" failure into `MissingTable` so the
    /// query boundary can report which sport's storage is absent.
    pub fn from_query(e: sqlx::Error, table: &str) -> Self {
        let missing = e
            .as_database_error()
            .map(|d| d.message().contains("no such table"))
            .unwrap_or(false);
        if missing {
            AppError::MissingTable(table.to_string())
        } else {
            AppError::Database(e)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::MissingTable(_) | AppError::Database(_) | AppError::Migration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Failure of a single site fetch. Always recovered by the orchestrator.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no adapter registered for site `{0}`")]
    NoAdapter(String),
}

/// A time-of-day string that matched none of the accepted formats.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognised time format: {0:?}")]
pub struct TimeFormatError(pub String);
