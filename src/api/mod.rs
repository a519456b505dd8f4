//! REST client for the guard backend.

mod client;
mod models;

pub use client::*;
pub use models::*;

use thiserror::Error;

/// Guard backend error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Auth failures, validation rejections and 404s are final; every other
    /// status and all transport failures may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => !matches!(status, 400 | 401 | 403 | 404 | 422),
            ApiError::Transport(_) => true,
            ApiError::Decode(_) | ApiError::InvalidRequest(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if e.is_builder() {
            ApiError::InvalidRequest(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}
