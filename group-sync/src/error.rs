use thiserror::Error;

pub type GroupSyncResult<T> = Result<T, GroupSyncError>;

#[derive(Debug, Error)]
pub enum GroupSyncError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{url} responded with status code {status}: {body}")]
    ApiError { status: u16, url: String, body: String },

    #[error("Failed decoding {context} response: {source}")]
    DecodeError {
        context: String,
        body: String,
        #[source]
        source: serde_json::Error
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Token error: {0}")]
    TokenError(#[from] jsonwebtoken::errors::Error),

    #[error("Rate limited: retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Pagination exceeded {max_pages} pages while fetching {context}")]
    PaginationOverflow { context: String, max_pages: u32 },

    #[error("Pagination stalled on repeated page token while fetching {context}")]
    PaginationStalled { context: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Member fetch task failed: {0}")]
    TaskError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error)
}

impl GroupSyncError {
    pub fn decode(context: impl Into<String>, body: &[u8], source: serde_json::Error) -> Self {
        Self::DecodeError {
            context: context.into(),
            body: String::from_utf8_lossy(body).into_owned(),
            source
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status, .. } => *status >= 500,
            _ => false
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        if let Self::RateLimited {
            retry_after_seconds
        } = self
        {
            Some(*retry_after_seconds)
        } else {
            None
        }
    }
}
