use thiserror::Error;
use axum::response::{IntoResponse, Response};
use axum::http::StatusCode;

use crate::services::upstream::UpstreamError;

/// Errors raised by the cache layer.
///
/// Only `Configuration` and `InvalidFilter` ever reach a caller. `TransientStore`
/// and `MalformedRecord` are constructed for logging and then absorbed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache configuration error: {0}")]
    Configuration(String),

    #[error("Cache store unavailable: {0}")]
    TransientStore(String),

    #[error("Malformed permission record: {0}")]
    MalformedRecord(String),

    #[error("Invalid cache filter: either role_id or user_id must be specified")]
    InvalidFilter,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Server(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Don't expose internal error details
        let body = match &self {
            AppError::Internal(_) => "Internal error".to_string(),
            _ => self.to_string(),
        };

        (status, body).into_response()
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidFilter => AppError::InvalidInput(err.to_string()),
            CacheError::Configuration(msg) => AppError::Config(msg),
            CacheError::TransientStore(_) | CacheError::MalformedRecord(_) => {
                AppError::Server(err.to_string())
            }
        }
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Rejected { .. } => AppError::InvalidInput(err.to_string()),
            UpstreamError::Timeout | UpstreamError::Connection(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
            UpstreamError::InvalidResponse(_) => AppError::Server(err.to_string()),
            UpstreamError::Configuration(msg) => AppError::Config(msg),
        }
    }
}
