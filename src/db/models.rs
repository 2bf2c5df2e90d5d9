use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::providers::manifest::{AuthMethod, ProviderKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbCredential {
    pub id: i64,
    pub provider: String,
    pub auth_method: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub region: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub use_count: i64,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// JSON: model -> {remaining_fraction, reset_time}
    pub quota_data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbCredential {
    pub fn provider_kind(&self) -> Option<ProviderKind> {
        self.provider.parse().ok()
    }

    pub fn auth_method_kind(&self) -> AuthMethod {
        self.auth_method.parse().unwrap_or(AuthMethod::None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbQuarantinedCredential {
    pub id: i64,
    pub provider: String,
    pub auth_method: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub region: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub use_count: i64,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub error_class: String,
    pub quarantined_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbApiKey {
    pub id: i64,
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
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl DbApiKey {
    /// Validity window end, computed in UTC. `expires_in_days = 0` means the
    /// key never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        (self.expires_in_days > 0).then(|| self.created_at + chrono::Duration::days(self.expires_in_days))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbHealthRecord {
    pub provider: String,
    pub credential_id: i64,
    pub score: i64,
    pub bucket_tokens: f64,
    pub bucket_refilled_at: DateTime<Utc>,
    pub paused_until: Option<DateTime<Utc>>,
    pub rate_limit_hits: i64,
    pub last_rate_limit_at: Option<DateTime<Utc>>,
    pub last_error_class: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbPriceRow {
    pub model: String,
    pub input_price: f64,
    pub output_price: f64,
    pub updated_at: DateTime<Utc>,
}

/// Aggregated request/cost totals for one api key over one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, FromRow)]
pub struct UsageWindow {
    pub requests: i64,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    pub daily: UsageWindow,
    pub monthly: UsageWindow,
    pub total: UsageWindow,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(expires_in_days: i64, created_at: DateTime<Utc>) -> DbApiKey {
        DbApiKey {
            id: 1,
            key_hash: "h".to_string(),
            key_prefix: "ck-000000".to_string(),
            name: None,
            daily_limit: 0,
            monthly_limit: 0,
            total_limit: 0,
            daily_cost_limit: 0.0,
            monthly_cost_limit: 0.0,
            total_cost_limit: 0.0,
            concurrent_limit: 0,
            rate_limit: 0,
            expires_in_days,
            is_active: true,
            created_at,
        }
    }

    #[test]
    fn zero_expiry_means_never() {
        let created = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(!key(0, created).is_expired(Utc::now()));
    }

    #[test]
    fn expiry_window_is_created_at_plus_days_utc() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let k = key(30, created);
        let deadline = k.expires_at().unwrap();
        assert_eq!(deadline, created + chrono::Duration::days(30));
        assert!(!k.is_expired(deadline - chrono::Duration::seconds(1)));
        assert!(k.is_expired(deadline));
    }
}
