use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::db::models::DbApiKey;
use crate::error::ErrorBody;
use crate::server::router::GatewayState;

/// Secret from `x-api-key` or `Authorization: Bearer`.
pub fn extract_secret(headers: &HeaderMap) -> Option<String> {
    if let Some(k) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(k.to_string());
    }
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

pub fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Best-effort client address for per-key concurrency scoping.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map_or_else(|| "unknown".to_string(), |ip| ip.trim().to_string())
}

/// Data-plane authentication: resolves the caller's api key row by secret
/// hash. Inactive and unknown keys are rejected here; expiry and ceilings
/// are the meter's concern.
#[derive(Debug, Clone)]
pub struct AuthedKey {
    pub key: DbApiKey,
    pub client_ip: String,
}

impl FromRequestParts<GatewayState> for AuthedKey {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &GatewayState,
    ) -> Result<Self, Self::Rejection> {
        let secret = extract_secret(&parts.headers).ok_or(AuthError::MissingKey)?;
        let key = state
            .db
            .get_api_key_by_hash(hash_secret(&secret))
            .await
            .map_err(|_| AuthError::LookupFailed)?
            .ok_or(AuthError::InvalidKey)?;

        Ok(AuthedKey {
            key,
            client_ip: client_ip(&parts.headers),
        })
    }
}

/// Control-plane guard: the master gateway key, compared in constant time.
#[derive(Debug, Clone, Copy)]
pub struct RequireMasterKey;

impl FromRequestParts<GatewayState> for RequireMasterKey {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &GatewayState,
    ) -> Result<Self, Self::Rejection> {
        let secret = extract_secret(&parts.headers).ok_or(AuthError::MissingKey)?;
        let expected = state.master_key.as_ref();
        if secret.as_bytes().ct_eq(expected.as_bytes()).into() {
            Ok(RequireMasterKey)
        } else {
            Err(AuthError::InvalidKey)
        }
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingKey,
    InvalidKey,
    LookupFailed,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingKey => (StatusCode::UNAUTHORIZED, "Missing API key"),
            AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            AuthError::LookupFailed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Key lookup failed")
            }
        };
        (
            status,
            Json(ErrorBody::new("authentication_error", message)),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_hex_sha256() {
        let h = hash_secret("ck-test");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, hash_secret("ck-test"));
        assert_ne!(h, hash_secret("ck-other"));
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.1.2.3, 172.16.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.1.2.3");
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }
}
