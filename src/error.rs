//! Error taxonomy shared by every pipeline stage.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QaError {
    /// A required setting is absent from both the dotfile and the environment.
    #[error("missing configuration value: {key}")]
    ConfigMissing { key: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read document {}: {reason}", path.display())]
    DocumentUnreadable { path: PathBuf, reason: String },

    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    InvalidChunkConfiguration { size: usize, overlap: usize },

    /// Embedding or completion call failed (network, auth, rate-limit, bad payload).
    #[error("{service} request failed{}: {message}", status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    RemoteService {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QaError {
    pub fn remote(service: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        QaError::RemoteService {
            service,
            status,
            message: message.into(),
        }
    }

    /// Transport failures, rate limiting and upstream 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            QaError::RemoteService { status: None, .. } => true,
            QaError::RemoteService {
                status: Some(code), ..
            } => *code == 429 || (500..600).contains(code),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, QaError>;
