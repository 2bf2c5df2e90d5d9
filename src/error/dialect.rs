use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use super::{ErrorClass, GatewayError};

/// Inbound wire dialect of the current request. Determines the error-body
/// `type` alphabet and the SSE grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Claude,
    Openai,
}

/// `{"error":{"type":...,"message":...}}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorObject,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        ErrorBody {
            error: ErrorObject {
                kind: kind.to_string(),
                message: message.into(),
            },
        }
    }
}

fn claude_kind(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Auth => "authentication_error",
        ErrorClass::RateLimit | ErrorClass::LimitExceeded => "rate_limit_error",
        ErrorClass::BadRequest => "invalid_request_error",
        ErrorClass::Unavailable => "overloaded_error",
        ErrorClass::Transient | ErrorClass::Internal => "api_error",
    }
}

fn openai_kind(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Auth => "authentication_error",
        ErrorClass::RateLimit | ErrorClass::LimitExceeded => "rate_limit_error",
        ErrorClass::BadRequest => "invalid_request_error",
        ErrorClass::Unavailable | ErrorClass::Transient | ErrorClass::Internal => "server_error",
    }
}

fn response_status(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Auth => StatusCode::UNAUTHORIZED,
        ErrorClass::RateLimit | ErrorClass::LimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
        ErrorClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Transient => StatusCode::BAD_GATEWAY,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn user_message(err: &GatewayError) -> String {
    match err {
        GatewayError::NoCredentials => "No active credentials".to_string(),
        GatewayError::LimitExceeded(reason) => reason.clone(),
        GatewayError::BadRequest(msg) => msg.clone(),
        GatewayError::UpstreamRateLimit(msg) if !msg.is_empty() => msg.clone(),
        GatewayError::UpstreamStatus { message, .. } if !message.is_empty() => message.clone(),
        GatewayError::UpstreamAuth(_) | GatewayError::RefreshRefused(_) => {
            "Upstream authentication failed.".to_string()
        }
        GatewayError::Database(_) | GatewayError::Actor(_) | GatewayError::Unexpected(_) => {
            "An internal server error occurred.".to_string()
        }
        other => other.to_string(),
    }
}

/// A gateway error bound to the inbound dialect, ready for the wire.
#[derive(Debug)]
pub struct DialectError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl GatewayError {
    pub fn into_dialect(self, dialect: Dialect) -> DialectError {
        let class = self.class();
        let kind = match dialect {
            Dialect::Claude => claude_kind(class),
            Dialect::Openai => openai_kind(class),
        };
        DialectError {
            status: response_status(class),
            body: ErrorBody::new(kind, user_message(&self)),
        }
    }
}

impl IntoResponse for DialectError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_maps_to_503_overloaded() {
        let err = GatewayError::NoCredentials.into_dialect(Dialect::Claude);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.body.error.kind, "overloaded_error");
        assert_eq!(err.body.error.message, "No active credentials");
    }

    #[test]
    fn limit_exceeded_keeps_descriptive_reason() {
        let err = GatewayError::LimitExceeded("Daily request limit reached (10)".to_string())
            .into_dialect(Dialect::Openai);
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body.error.kind, "rate_limit_error");
        assert_eq!(err.body.error.message, "Daily request limit reached (10)");
    }

    #[test]
    fn internal_details_never_reach_the_wire() {
        let err = GatewayError::Unexpected("lock poisoned at pool.rs:42".to_string())
            .into_dialect(Dialect::Claude);
        assert_eq!(err.body.error.message, "An internal server error occurred.");
    }
}
