use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table} record {id} not found")]
    NotFound { table: String, id: String },

    #[error("version conflict on {id}: stored version is no longer {version}")]
    Conflict { id: String, version: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Transient failures worth another attempt. A conflict or a missing
    /// record will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io { .. })
    }
}
