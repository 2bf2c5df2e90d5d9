use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Remaining fraction at or below which a credential is excluded outright.
pub const QUOTA_CRITICAL: f64 = 0.05;
/// Remaining fraction at or below which selection is biased away.
pub const QUOTA_LOW: f64 = 0.20;

/// Score used when no quota information is available.
const QUOTA_UNKNOWN_SCORE: f64 = 50.0;
/// Snapshots older than this take a 10% score penalty.
const QUOTA_STALE_AFTER: Duration = Duration::minutes(5);

/// Per-model remaining quota reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelQuota {
    pub remaining_fraction: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
}

/// One credential's quota snapshot across models, with fetch time for
/// staleness scoring. Serialized as-is into the credential's `quota_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    #[serde(default)]
    pub models: BTreeMap<String, ModelQuota>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl QuotaSnapshot {
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn remaining(&self, model: &str) -> Option<f64> {
        self.models.get(model).map(|q| q.remaining_fraction)
    }

    /// Quota component of the hybrid score, in [0, 100].
    pub fn score(&self, model: &str, now: DateTime<Utc>) -> f64 {
        let Some(quota) = self.models.get(model) else {
            return QUOTA_UNKNOWN_SCORE;
        };
        let base = 100.0 * quota.remaining_fraction.clamp(0.0, 1.0);
        let stale = self
            .fetched_at
            .is_none_or(|t| now - t > QUOTA_STALE_AFTER);
        if stale { base * 0.9 } else { base }
    }

    pub fn is_critical(&self, model: &str) -> bool {
        self.remaining(model).is_some_and(|f| f <= QUOTA_CRITICAL)
    }

    pub fn is_low(&self, model: &str) -> bool {
        self.remaining(model).is_some_and(|f| f <= QUOTA_LOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(fraction: f64, age: Duration) -> (QuotaSnapshot, DateTime<Utc>) {
        let now = Utc::now();
        let mut models = BTreeMap::new();
        models.insert(
            "m".to_string(),
            ModelQuota {
                remaining_fraction: fraction,
                reset_time: None,
            },
        );
        (
            QuotaSnapshot {
                models,
                fetched_at: Some(now - age),
            },
            now,
        )
    }

    #[test]
    fn unknown_model_scores_fifty() {
        let (snap, now) = snapshot(1.0, Duration::zero());
        assert_eq!(snap.score("other", now), QUOTA_UNKNOWN_SCORE);
    }

    #[test]
    fn fresh_snapshot_scores_full() {
        let (snap, now) = snapshot(0.8, Duration::zero());
        assert!((snap.score("m", now) - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stale_snapshot_takes_ten_percent_penalty() {
        let (snap, now) = snapshot(0.8, Duration::minutes(6));
        assert!((snap.score("m", now) - 72.0).abs() < f64::EPSILON);
    }

    #[test]
    fn critical_and_low_thresholds() {
        let (snap, _) = snapshot(0.05, Duration::zero());
        assert!(snap.is_critical("m"));
        let (snap, _) = snapshot(0.15, Duration::zero());
        assert!(!snap.is_critical("m"));
        assert!(snap.is_low("m"));
    }

    #[test]
    fn json_round_trip_preserves_models() {
        let (snap, _) = snapshot(0.4, Duration::zero());
        let parsed = QuotaSnapshot::from_json(&snap.to_json()).unwrap();
        assert_eq!(parsed.remaining("m"), Some(0.4));
    }
}
