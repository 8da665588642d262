use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("SQLite operation failed: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed internal id '{id}': {reason}")]
    MalformedId { id: String, reason: String },

    #[error("Mirror store failure: {0}")]
    Store(String),

    #[error("Indexer {operation} failed for '{id}': {message}")]
    Indexer {
        operation: &'static str,
        id: String,
        message: String,
    },

    #[error("Indexer {operation} timed out for '{id}' after {millis}ms")]
    Timeout {
        operation: &'static str,
        id: String,
        millis: u64,
    },

    #[error("Sync cancelled for connector {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Synchronization failed: {0}")]
    SyncError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MirrorError {
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        MirrorError::MalformedId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Per-node indexer failures that a later attempt may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MirrorError::Indexer { .. } | MirrorError::Timeout { .. } | MirrorError::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
