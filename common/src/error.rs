use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Core internal errors shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Rate limited: {0}")]
    RateLimit(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

/// Stable error codes surfaced to callers and recorded on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Validation,
    NotFound,
    Embedding,
    Storage,
    Extraction,
    Timeout,
    RateLimit,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Embedding => "EMBEDDING_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Extraction => "EXTRACTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::RateLimit => "RATE_LIMIT",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl AppError {
    /// The stable code for this error, used by the API surface and the job
    /// queue's `last_error_code` column.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Embedding(_) => ErrorCode::Embedding,
            Self::Database(_) | Self::Storage(_) => ErrorCode::Storage,
            Self::Extraction(_) => ErrorCode::Extraction,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::RateLimit(_) => ErrorCode::RateLimit,
            Self::OpenAI(_)
            | Self::Join(_)
            | Self::Io(_)
            | Self::Config(_)
            | Self::Anyhow(_)
            | Self::InternalError(_) => ErrorCode::Internal,
        }
    }

    /// Whether a background job failing with this error should be retried.
    /// Validation and not-found failures are permanent; provider and network
    /// trouble is transient.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Embedding(_)
                | Self::Extraction(_)
                | Self::Timeout(_)
                | Self::RateLimit(_)
                | Self::OpenAI(_)
                | Self::Io(_)
        )
    }
}
