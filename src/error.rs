use thiserror::Error;

/// Malformed input URL or shape. User-correctable.
#[derive(Debug, Clone, Error)]
#[error("{message}: {input}")]
pub struct ValidationError {
    pub message: String,
    pub input: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            input: input.into(),
        }
    }
}

/// Upstream failure while fetching a page.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("rate limited by upstream while fetching {url}")]
    RateLimited { url: String },
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("request to {url} failed: {reason}")]
    Other { url: String, reason: String },
}

impl TransportError {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::RateLimited { .. } => "rate_limited",
            TransportError::NotFound { .. } => "not_found",
            TransportError::Other { .. } => "other",
        }
    }
}

/// The target page could not be read as a profile page at all.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("no profile handle in {0}")]
    MissingHandle(String),
    #[error("invalid profile url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not encode record: {0}")]
    Encode(#[from] serde_json::Error),
}
