use chrono::{DateTime, Duration, Utc};

use crate::db::models::DbHealthRecord;
use crate::db::patch::HealthFlush;
use crate::providers::manifest::ProviderKind;

pub const INITIAL_SCORE: i64 = 70;
pub const MAX_SCORE: i64 = 100;
/// Below this a credential is only eligible when every candidate is.
pub const HEALTHY_THRESHOLD: i64 = 50;

pub const BUCKET_MAX: f64 = 50.0;
pub const BUCKET_REFILL_PER_MIN: f64 = 6.0;

const SUCCESS_REWARD: i64 = 1;
const FAILURE_PENALTY: i64 = 20;
const RATE_LIMIT_PENALTY: i64 = 10;
const RECOVERY_PER_HOUR: i64 = 10;

/// Consecutive rate-limit hits inside this window advance the backoff tier.
const RATE_LIMIT_WINDOW: Duration = Duration::minutes(10);

/// Backoff tiers for consecutive rate limits: 1 min, 5 min, 30 min, 2 h.
const BACKOFF_TIERS_SECS: [i64; 4] = [60, 300, 1800, 7200];

/// Per-credential health state: score, admission bucket, rate-limit pause.
///
/// All time-based effects (bucket refill, idle recovery) are applied lazily
/// on the next read via [`HealthState::settle`].
#[derive(Debug, Clone)]
pub struct HealthState {
    pub score: i64,
    pub bucket_tokens: f64,
    pub bucket_refilled_at: DateTime<Utc>,
    pub paused_until: Option<DateTime<Utc>>,
    pub rate_limit_hits: i64,
    pub last_rate_limit_at: Option<DateTime<Utc>>,
    pub last_error_class: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Advances as idle-recovery hours are credited; not persisted directly.
    recovery_anchor: DateTime<Utc>,
}

impl HealthState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            score: INITIAL_SCORE,
            bucket_tokens: BUCKET_MAX,
            bucket_refilled_at: now,
            paused_until: None,
            rate_limit_hits: 0,
            last_rate_limit_at: None,
            last_error_class: None,
            last_failure_at: None,
            recovery_anchor: now,
        }
    }

    pub fn from_db(row: &DbHealthRecord) -> Self {
        Self {
            score: row.score.clamp(0, MAX_SCORE),
            bucket_tokens: row.bucket_tokens.clamp(0.0, BUCKET_MAX),
            bucket_refilled_at: row.bucket_refilled_at,
            paused_until: row.paused_until,
            rate_limit_hits: row.rate_limit_hits,
            last_rate_limit_at: row.last_rate_limit_at,
            last_error_class: row.last_error_class.clone(),
            last_failure_at: row.last_failure_at,
            recovery_anchor: row.updated_at,
        }
    }

    pub fn to_flush(&self, provider: ProviderKind, credential_id: i64) -> HealthFlush {
        HealthFlush {
            provider,
            credential_id,
            score: self.score,
            bucket_tokens: self.bucket_tokens,
            bucket_refilled_at: self.bucket_refilled_at,
            paused_until: self.paused_until,
            rate_limit_hits: self.rate_limit_hits,
            last_rate_limit_at: self.last_rate_limit_at,
            last_error_class: self.last_error_class.clone(),
            last_failure_at: self.last_failure_at,
        }
    }

    /// Apply lazy bucket refill and idle recovery up to `now`.
    pub fn settle(&mut self, now: DateTime<Utc>) {
        // Bucket refill at 6 tokens/min, capped.
        let elapsed_secs = (now - self.bucket_refilled_at).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs > 0.0 {
            self.bucket_tokens =
                (self.bucket_tokens + elapsed_secs / 60.0 * BUCKET_REFILL_PER_MIN).min(BUCKET_MAX);
            self.bucket_refilled_at = now;
        }

        // +10 score per full hour without failure.
        let idle_hours = (now - self.recovery_anchor).num_hours();
        if idle_hours > 0 && self.score < MAX_SCORE {
            self.score = (self.score + idle_hours * RECOVERY_PER_HOUR).min(MAX_SCORE);
            self.recovery_anchor += Duration::hours(idle_hours);
        }

        if self.paused_until.is_some_and(|t| t <= now) {
            self.paused_until = None;
        }
    }

    pub fn on_success(&mut self, now: DateTime<Utc>) {
        self.settle(now);
        self.score = (self.score + SUCCESS_REWARD).min(MAX_SCORE);
        self.paused_until = None;
        self.last_error_class = None;
    }

    pub fn on_failure(&mut self, now: DateTime<Utc>, error_class: &str) {
        self.settle(now);
        self.score = (self.score - FAILURE_PENALTY).max(0);
        self.last_error_class = Some(error_class.to_string());
        self.last_failure_at = Some(now);
        self.recovery_anchor = now;
    }

    /// Record a rate-limit hit and return the pause applied.
    pub fn on_rate_limit(&mut self, now: DateTime<Utc>) -> Duration {
        self.settle(now);
        self.score = (self.score - RATE_LIMIT_PENALTY).max(0);

        let consecutive = self
            .last_rate_limit_at
            .is_some_and(|t| now - t <= RATE_LIMIT_WINDOW);
        self.rate_limit_hits = if consecutive {
            self.rate_limit_hits + 1
        } else {
            1
        };
        self.last_rate_limit_at = Some(now);
        self.last_failure_at = Some(now);
        self.recovery_anchor = now;
        self.last_error_class = Some("rate-limit".to_string());

        let tier = usize::try_from(self.rate_limit_hits - 1)
            .unwrap_or(0)
            .min(BACKOFF_TIERS_SECS.len() - 1);
        let backoff = Duration::seconds(BACKOFF_TIERS_SECS[tier]);
        self.paused_until = Some(now + backoff);
        backoff
    }

    /// Consume one admission token; refuses when the bucket is dry.
    pub fn try_admit(&mut self, now: DateTime<Utc>) -> bool {
        self.settle(now);
        if self.bucket_tokens >= 1.0 {
            self.bucket_tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.is_some_and(|t| t > now)
    }

    pub fn is_healthy(&self) -> bool {
        self.score >= HEALTHY_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn success_caps_at_max() {
        let t = now();
        let mut h = HealthState::new(t);
        h.score = MAX_SCORE;
        h.on_success(t);
        assert_eq!(h.score, MAX_SCORE);
    }

    #[test]
    fn repeated_failures_floor_at_zero_within_one_generation() {
        let t = now();
        let mut h = HealthState::new(t);
        for _ in 0..10 {
            h.on_failure(t, "auth");
        }
        assert_eq!(h.score, 0);

        // Marking unhealthy k+1 times equals marking it until the floor.
        let mut single = HealthState::new(t);
        for _ in 0..4 {
            single.on_failure(t, "auth");
        }
        assert_eq!(single.score, 0);
    }

    #[test]
    fn rate_limit_tiers_advance_within_window() {
        let t = now();
        let mut h = HealthState::new(t);
        assert_eq!(h.on_rate_limit(t), Duration::seconds(60));
        assert_eq!(h.on_rate_limit(t + Duration::minutes(1)), Duration::seconds(300));
        assert_eq!(h.on_rate_limit(t + Duration::minutes(2)), Duration::seconds(1800));
        assert_eq!(h.on_rate_limit(t + Duration::minutes(3)), Duration::seconds(7200));
        // Still capped at the top tier.
        assert_eq!(h.on_rate_limit(t + Duration::minutes(4)), Duration::seconds(7200));
    }

    #[test]
    fn rate_limit_tier_resets_outside_window() {
        let t = now();
        let mut h = HealthState::new(t);
        h.on_rate_limit(t);
        let later = t + Duration::minutes(11);
        assert_eq!(h.on_rate_limit(later), Duration::seconds(60));
    }

    #[test]
    fn bucket_refills_lazily_and_admission_consumes() {
        let t = now();
        let mut h = HealthState::new(t);
        h.bucket_tokens = 0.0;
        h.bucket_refilled_at = t;
        assert!(!h.try_admit(t));

        // 10 seconds -> 1 token.
        assert!(h.try_admit(t + Duration::seconds(10)));
        assert!(h.bucket_tokens < 1.0);
    }

    #[test]
    fn idle_recovery_credits_ten_per_hour() {
        let t = now();
        let mut h = HealthState::new(t);
        h.on_failure(t, "transient");
        assert_eq!(h.score, 50);

        h.settle(t + Duration::hours(2));
        assert_eq!(h.score, 70);

        // Partial hours are not credited twice.
        h.settle(t + Duration::hours(2) + Duration::minutes(30));
        assert_eq!(h.score, 70);
    }

    #[test]
    fn success_clears_pause() {
        let t = now();
        let mut h = HealthState::new(t);
        h.on_rate_limit(t);
        assert!(h.is_paused(t + Duration::seconds(30)));
        h.on_success(t + Duration::seconds(30));
        assert!(!h.is_paused(t + Duration::seconds(31)));
    }
}
