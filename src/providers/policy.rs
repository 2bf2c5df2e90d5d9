use reqwest::StatusCode;

use crate::error::GatewayError;

pub const UPSTREAM_BODY_PREVIEW_CHARS: usize = 300;

/// Known upstream service exceptions whose bodies are masked to neutral
/// text instead of being forwarded to clients.
const MASKED_MARKERS: [(&str, &str); 2] = [
    ("AccessDeniedException", "Upstream denied access for this credential."),
    ("ValidationException", "Upstream rejected the request payload."),
];

/// Replace known service-exception bodies with neutral text; other
/// messages pass through truncated.
pub fn mask_upstream_message(body: &str) -> String {
    for (marker, replacement) in MASKED_MARKERS {
        if body.contains(marker) {
            return replacement.to_string();
        }
    }
    let mut preview = body.trim().to_string();
    if preview.len() > UPSTREAM_BODY_PREVIEW_CHARS {
        let mut cut = UPSTREAM_BODY_PREVIEW_CHARS;
        while !preview.is_char_boundary(cut) {
            cut -= 1;
        }
        preview.truncate(cut);
    }
    preview
}

/// Classify a non-2xx upstream response into the gateway error taxonomy,
/// consuming the body for the (masked) message.
pub async fn classify_upstream_error(resp: reqwest::Response) -> GatewayError {
    let status = resp.status();
    let body = resp.bytes().await.unwrap_or_default();
    let raw = String::from_utf8_lossy(&body);
    let message = mask_upstream_message(&raw);

    tracing::debug!(
        %status,
        body = %format!("{:.len$}", raw, len = UPSTREAM_BODY_PREVIEW_CHARS),
        "upstream error body"
    );

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::UpstreamAuth(message),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::UpstreamRateLimit(message),
        s if s.is_server_error() => GatewayError::UpstreamStatus {
            status: s,
            message,
        },
        // Remaining 4xx are request-shaped problems; retrying against a
        // different credential cannot succeed.
        s => GatewayError::BadRequest(format!("upstream rejected request ({s}): {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn known_service_exceptions_are_masked() {
        let masked = mask_upstream_message(
            r#"{"__type":"AccessDeniedException","message":"arn:aws:... is naughty"}"#,
        );
        assert_eq!(masked, "Upstream denied access for this credential.");
        assert!(!masked.contains("arn:aws"));
    }

    #[test]
    fn unknown_messages_pass_through() {
        assert_eq!(mask_upstream_message("quota exceeded"), "quota exceeded");
    }

    #[tokio::test]
    async fn validation_status_aborts_rather_than_retries() {
        // A plain 422 maps to BadRequest, which the failover loop treats
        // as non-retryable.
        let err = GatewayError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "bad shape");
        assert_eq!(err.class(), ErrorClass::BadRequest);
    }
}
