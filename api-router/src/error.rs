use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::{AppError, ErrorCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced on the request surface, carrying the stable code
/// taxonomy from §7 of the design.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Embedding provider error")]
    Embedding(String),

    #[error("Storage error")]
    Storage(String),

    #[error("Extraction error")]
    Extraction(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Embedding(_) => ErrorCode::Embedding,
            Self::Storage(_) => ErrorCode::Storage,
            Self::Extraction(_) => ErrorCode::Extraction,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::RateLimit(_) => ErrorCode::RateLimit,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Message shown to the caller. Internal details never leak; the full
    /// error is already logged where it happened.
    fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::NotFound(msg) | Self::Timeout(msg)
            | Self::RateLimit(msg) => msg.clone(),
            Self::Embedding(_) => "embedding provider failed".to_string(),
            Self::Storage(_) => "storage operation failed".to_string(),
            Self::Extraction(_) => "extraction failed".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let message = err.to_string();
        match err.code() {
            ErrorCode::Validation => Self::Validation(message),
            ErrorCode::NotFound => Self::NotFound(message),
            ErrorCode::Embedding => Self::Embedding(message),
            ErrorCode::Storage => {
                tracing::error!("storage error: {message}");
                Self::Storage(message)
            }
            ErrorCode::Extraction => Self::Extraction(message),
            ErrorCode::Timeout => Self::Timeout(message),
            ErrorCode::RateLimit => Self::RateLimit(message),
            ErrorCode::Internal => {
                tracing::error!("internal error: {message}");
                Self::Internal(message)
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Embedding(_) | Self::Extraction(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().as_str(),
                message: self.public_message(),
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: ApiError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn app_errors_map_onto_the_taxonomy() {
        let validation = ApiError::from(AppError::Validation("bad input".into()));
        assert!(matches!(validation, ApiError::Validation(_)));
        assert_eq!(validation.code().as_str(), "VALIDATION_ERROR");

        let not_found = ApiError::from(AppError::NotFound("missing".into()));
        assert_eq!(not_found.code().as_str(), "NOT_FOUND");

        let embedding = ApiError::from(AppError::Embedding("provider down".into()));
        assert_eq!(embedding.code().as_str(), "EMBEDDING_ERROR");

        let storage = ApiError::from(AppError::Storage("disk full".into()));
        assert_eq!(storage.code().as_str(), "STORAGE_ERROR");

        let internal = ApiError::from(AppError::InternalError("invariant".into()));
        assert_eq!(internal.code().as_str(), "INTERNAL_ERROR");
    }

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(
            status_of(ApiError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(ApiError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ApiError::RateLimit("x".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(ApiError::Timeout("x".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(ApiError::Embedding("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(ApiError::Internal("secret".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_messages_are_sanitized() {
        let error = ApiError::Internal("db password incorrect".to_string());
        assert_eq!(error.public_message(), "internal server error");

        let storage = ApiError::Storage("connection string leaked".to_string());
        assert_eq!(storage.public_message(), "storage operation failed");
    }
}
