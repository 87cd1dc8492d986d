//! Error types for shawzin

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShawzinError {
    #[error("Insufficient data: cannot detect a key from an empty note sequence")]
    InsufficientData,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Unsupported range: {0}")]
    UnsupportedRange(String),
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ShawzinError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ShawzinError>;
