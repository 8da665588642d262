use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarehouseFetcherError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("catalog API error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog API returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WarehouseFetcherError>;
