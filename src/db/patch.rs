use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::manifest::{AuthMethod, ProviderKind};

/// Insert payload for a new pool credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialCreate {
    pub provider: ProviderKind,
    pub auth_method: AuthMethod,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub region: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Partial update for a pool credential. `None` fields are left untouched;
/// double-`Option` fields distinguish "leave" from "set NULL".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialPatch {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub quota_data: Option<String>,
    pub last_error: Option<Option<String>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    /// Adds to `use_count` when set.
    pub bump_use_count: Option<i64>,
    /// Adds to `error_count` when set; `Some(0)` resets to zero.
    pub bump_error_count: Option<i64>,
}

impl CredentialPatch {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.expires_at.is_none()
            && self.project_id.is_none()
            && self.quota_data.is_none()
            && self.last_error.is_none()
            && self.last_used_at.is_none()
            && self.is_active.is_none()
            && self.bump_use_count.is_none()
            && self.bump_error_count.is_none()
    }
}

/// Insert payload for a new api key. The secret itself never reaches the
/// store; only its hash and display prefix do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyCreate {
    pub key_hash: String,
    pub key_prefix: String,
    pub name: Option<String>,
    pub daily_limit: i64,
    pub monthly_limit: i64,
    pub total_limit: i64,
    pub daily_cost_limit: f64,
    pub monthly_cost_limit: f64,
    pub total_cost_limit: f64,
    pub concurrent_limit: i64,
    pub rate_limit: i64,
    pub expires_in_days: i64,
}

impl Default for ApiKeyCreate {
    fn default() -> Self {
        Self {
            key_hash: String::new(),
            key_prefix: String::new(),
            name: None,
            daily_limit: 0,
            monthly_limit: 0,
            total_limit: 0,
            daily_cost_limit: 0.0,
            monthly_cost_limit: 0.0,
            total_cost_limit: 0.0,
            concurrent_limit: 0,
            rate_limit: 0,
            expires_in_days: 0,
        }
    }
}

/// Insert payload for one completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogCreate {
    pub request_id: String,
    pub api_key_id: i64,
    pub ip_address: Option<String>,
    pub provider: ProviderKind,
    pub credential_id: Option<i64>,
    pub model: String,
    pub stream: bool,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub cost: f64,
}

/// Flush payload for one credential's health state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthFlush {
    pub provider: ProviderKind,
    pub credential_id: i64,
    pub score: i64,
    pub bucket_tokens: f64,
    pub bucket_refilled_at: DateTime<Utc>,
    pub paused_until: Option<DateTime<Utc>>,
    pub rate_limit_hits: i64,
    pub last_rate_limit_at: Option<DateTime<Utc>>,
    pub last_error_class: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
}
