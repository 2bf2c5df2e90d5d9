use axum::http::StatusCode;
use thiserror::Error as ThisError;

use super::{ErrorClass, IsRetryable};

#[derive(Debug, ThisError)]
pub enum GatewayError {
    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("Upstream rate limit: {0}")]
    UpstreamRateLimit(String),

    #[error("Upstream error with status {status}: {message}")]
    UpstreamStatus { status: StatusCode, message: String },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("No active credentials")]
    NoCredentials,

    #[error("{0}")]
    LimitExceeded(String),

    #[error("Token refresh refused: {0}")]
    RefreshRefused(String),

    #[error("Token refresh failed: {0}")]
    RefreshTransient(String),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl GatewayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::UpstreamAuth(_) | GatewayError::RefreshRefused(_) => ErrorClass::Auth,
            GatewayError::UpstreamRateLimit(_) => ErrorClass::RateLimit,
            GatewayError::UpstreamStatus { status, .. } => classify_status(*status),
            GatewayError::Reqwest(e) if e.is_timeout() || e.is_connect() => ErrorClass::Transient,
            GatewayError::Reqwest(_)
            | GatewayError::StreamProtocol(_)
            | GatewayError::RefreshTransient(_) => ErrorClass::Transient,
            GatewayError::BadRequest(_) | GatewayError::Json(_) => ErrorClass::BadRequest,
            GatewayError::NoCredentials => ErrorClass::Unavailable,
            GatewayError::LimitExceeded(_) => ErrorClass::LimitExceeded,
            GatewayError::Database(_)
            | GatewayError::Url(_)
            | GatewayError::Actor(_)
            | GatewayError::Cancelled
            | GatewayError::Unexpected(_) => ErrorClass::Internal,
        }
    }

    /// Build the upstream-status variant with pre-classified convenience.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::UpstreamAuth(message),
            StatusCode::TOO_MANY_REQUESTS => GatewayError::UpstreamRateLimit(message),
            _ => GatewayError::UpstreamStatus { status, message },
        }
    }
}

fn classify_status(status: StatusCode) -> ErrorClass {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorClass::Auth,
        StatusCode::TOO_MANY_REQUESTS => ErrorClass::RateLimit,
        s if s.is_server_error() => ErrorClass::Transient,
        s if s.is_client_error() => ErrorClass::BadRequest,
        _ => ErrorClass::Internal,
    }
}

impl IsRetryable for GatewayError {
    /// Retryable here means "another credential might succeed"; the failover
    /// loop uses this, never a blind network retry.
    fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Auth | ErrorClass::RateLimit | ErrorClass::Transient
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_follows_taxonomy() {
        assert_eq!(
            GatewayError::from_status(StatusCode::UNAUTHORIZED, "x").class(),
            ErrorClass::Auth
        );
        assert_eq!(
            GatewayError::from_status(StatusCode::TOO_MANY_REQUESTS, "x").class(),
            ErrorClass::RateLimit
        );
        assert_eq!(
            GatewayError::from_status(StatusCode::BAD_GATEWAY, "x").class(),
            ErrorClass::Transient
        );
        assert_eq!(
            GatewayError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "x").class(),
            ErrorClass::BadRequest
        );
    }

    #[test]
    fn bad_request_is_never_retryable() {
        assert!(!GatewayError::BadRequest("oops".to_string()).is_retryable());
        assert!(GatewayError::UpstreamRateLimit("slow down".to_string()).is_retryable());
    }
}
