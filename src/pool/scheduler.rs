use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::SelectionStrategy;
use crate::db::models::{DbCredential, DbHealthRecord};
use crate::db::patch::HealthFlush;
use crate::pool::health::HealthState;
use crate::pool::quota::QuotaSnapshot;
use crate::pool::sessions::StickySessions;
use crate::providers::manifest::{AuthMethod, CredentialLease, ProviderKind};

/// Hybrid score weights: health, bucket tokens, quota, recency-of-last-use.
const W_HEALTH: f64 = 2.0;
const W_TOKENS: f64 = 5.0;
const W_QUOTA: f64 = 3.0;
const W_LRU: f64 = 0.1;

/// Extra penalty for low-but-not-critical quota.
const LOW_QUOTA_BIAS: f64 = 10.0;

/// In-memory credential state held by the pool.
#[derive(Debug, Clone)]
pub struct PooledCredential {
    pub id: i64,
    pub provider: ProviderKind,
    pub auth_method: AuthMethod,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub region: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Consecutive auth failures in the current token generation.
    pub auth_failures: u32,
}

impl PooledCredential {
    pub fn from_db(provider: ProviderKind, row: &DbCredential) -> Self {
        Self {
            id: row.id,
            provider,
            auth_method: row.auth_method_kind(),
            access_token: row.access_token.clone(),
            refresh_token: row.refresh_token.clone(),
            expires_at: row.expires_at,
            project_id: row.project_id.clone(),
            region: row.region.clone(),
            client_id: row.client_id.clone(),
            client_secret: row.client_secret.clone(),
            last_used_at: row.last_used_at,
            auth_failures: 0,
        }
    }

    pub fn lease(&self, quota_remaining: Option<f64>) -> Option<CredentialLease> {
        Some(CredentialLease {
            id: self.id,
            provider: self.provider,
            access_token: self.access_token.clone()?,
            project_id: self.project_id.clone(),
            region: self.region.clone(),
            expires_at: self.expires_at,
            quota_remaining,
        })
    }
}

/// Parameters of one selection call.
#[derive(Debug, Default)]
pub struct SelectRequest<'a> {
    pub model: &'a str,
    pub session_id: Option<&'a str>,
    pub exclude: &'a [i64],
}

/// Core selection logic for one provider's credential pool.
/// Pure state machine: no IO, no locks; the owning actor serializes access.
pub struct CredentialPool {
    provider: ProviderKind,
    strategy: SelectionStrategy,
    creds: HashMap<i64, PooledCredential>,
    health: HashMap<i64, HealthState>,
    quotas: HashMap<i64, QuotaSnapshot>,
    sessions: StickySessions,
    rr_cursor: usize,
}

impl CredentialPool {
    pub fn new(provider: ProviderKind, strategy: SelectionStrategy, session_ttl_secs: u64) -> Self {
        Self {
            provider,
            strategy,
            creds: HashMap::new(),
            health: HashMap::new(),
            quotas: HashMap::new(),
            sessions: StickySessions::new(session_ttl_secs),
            rr_cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.creds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creds.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.creds.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&PooledCredential> {
        self.creds.get(&id)
    }

    pub fn get_mut(&mut self, id: i64) -> Option<&mut PooledCredential> {
        self.creds.get_mut(&id)
    }

    pub fn insert(&mut self, cred: PooledCredential) {
        self.creds.insert(cred.id, cred);
    }

    pub fn remove(&mut self, id: i64) {
        self.creds.remove(&id);
        self.sessions.evict_credential(id);
        // Health records are never deleted; scores recover by elapsed time.
    }

    pub fn load_health(&mut self, rows: &[DbHealthRecord]) {
        for row in rows {
            self.health
                .insert(row.credential_id, HealthState::from_db(row));
        }
    }

    pub fn quota(&self, id: i64) -> Option<&QuotaSnapshot> {
        self.quotas.get(&id)
    }

    pub fn set_quota(&mut self, id: i64, snapshot: QuotaSnapshot) {
        self.quotas.insert(id, snapshot);
    }

    /// Health record, created lazily on first touch.
    fn health_entry(&mut self, id: i64, now: DateTime<Utc>) -> &mut HealthState {
        self.health.entry(id).or_insert_with(|| HealthState::new(now))
    }

    pub fn report_success(&mut self, id: i64, now: DateTime<Utc>) {
        self.health_entry(id, now).on_success(now);
        if let Some(cred) = self.creds.get_mut(&id) {
            cred.auth_failures = 0;
        }
    }

    /// Returns the credential's consecutive auth-failure count so the caller
    /// can decide on quarantine.
    pub fn report_auth_failure(&mut self, id: i64, now: DateTime<Utc>) -> u32 {
        self.health_entry(id, now).on_failure(now, "auth");
        match self.creds.get_mut(&id) {
            Some(cred) => {
                cred.auth_failures += 1;
                cred.auth_failures
            }
            None => 0,
        }
    }

    pub fn report_failure(&mut self, id: i64, now: DateTime<Utc>, error_class: &str) {
        self.health_entry(id, now).on_failure(now, error_class);
    }

    pub fn report_rate_limit(&mut self, id: i64, now: DateTime<Utc>) -> chrono::Duration {
        self.health_entry(id, now).on_rate_limit(now)
    }

    pub fn health(&self, id: i64) -> Option<&HealthState> {
        self.health.get(&id)
    }

    pub fn flush_rows(&mut self, now: DateTime<Utc>) -> Vec<HealthFlush> {
        let provider = self.provider;
        let live: Vec<i64> = self.creds.keys().copied().collect();
        live.iter()
            .filter_map(|id| {
                let state = self.health.get_mut(id)?;
                state.settle(now);
                Some(state.to_flush(provider, *id))
            })
            .collect()
    }

    /// Candidate ids passing the hard eligibility filters: not paused, not
    /// critically out of quota, admission bucket not dry.
    fn eligible(&mut self, model: &str, now: DateTime<Utc>) -> Vec<i64> {
        let ids: Vec<i64> = self.creds.keys().copied().collect();
        ids.into_iter()
            .filter(|id| {
                let state = self.health_entry(*id, now);
                state.settle(now);
                if state.is_paused(now) || state.bucket_tokens < 1.0 {
                    return false;
                }
                !self
                    .quotas
                    .get(id)
                    .is_some_and(|q| q.is_critical(model))
            })
            .collect()
    }

    /// Select one credential, honoring the exclusion list. Never returns
    /// `None` because of exclusions alone: when they empty the candidate
    /// set, selection falls back to the unfiltered set so the caller can
    /// still make a best-effort attempt.
    pub fn select(&mut self, req: &SelectRequest<'_>, now: DateTime<Utc>) -> Option<i64> {
        let eligible = self.eligible(req.model, now);
        if eligible.is_empty() {
            return None;
        }

        let mut candidates: Vec<i64> = eligible
            .iter()
            .copied()
            .filter(|id| !req.exclude.contains(id))
            .collect();
        if candidates.is_empty() {
            candidates = eligible;
        }

        // Unhealthy credentials only compete when no healthy one remains.
        let healthy: Vec<i64> = candidates
            .iter()
            .copied()
            .filter(|id| self.health.get(id).is_none_or(HealthState::is_healthy))
            .collect();
        if !healthy.is_empty() {
            candidates = healthy;
        }

        let chosen = match self.strategy {
            SelectionStrategy::Hybrid => self.pick_hybrid(req.model, &candidates, now),
            SelectionStrategy::Sticky => self.pick_sticky(req, &candidates, now),
            SelectionStrategy::RoundRobin => self.pick_round_robin(&candidates),
        }?;

        // A selection costs one admission token.
        self.health_entry(chosen, now).try_admit(now).then_some(())?;
        if let Some(cred) = self.creds.get_mut(&chosen) {
            cred.last_used_at = Some(now);
        }
        Some(chosen)
    }

    fn pick_hybrid(&mut self, model: &str, candidates: &[i64], now: DateTime<Utc>) -> Option<i64> {
        // Normalize recency against the widest finite idle span among
        // candidates; never-used credentials are handled separately.
        let max_idle_secs = candidates
            .iter()
            .map(|id| self.idle_secs(*id, now))
            .filter(|idle| idle.is_finite())
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let mut best: Option<(f64, i64)> = None;
        for &id in candidates {
            let score = self.hybrid_score(id, model, now, max_idle_secs);
            let better = match best {
                None => true,
                // Tie-break: lower credential id.
                Some((best_score, best_id)) => {
                    score > best_score || (score == best_score && id < best_id)
                }
            };
            if better {
                best = Some((score, id));
            }
        }
        best.map(|(_, id)| id)
    }

    fn idle_secs(&self, id: i64, now: DateTime<Utc>) -> f64 {
        self.creds
            .get(&id)
            .and_then(|c| c.last_used_at)
            .map_or(f64::INFINITY, |t| {
                ((now - t).num_milliseconds() as f64 / 1000.0).max(0.0)
            })
    }

    fn hybrid_score(&mut self, id: i64, model: &str, now: DateTime<Utc>, max_idle: f64) -> f64 {
        let state = self.health_entry(id, now);
        let h = state.score as f64;
        let b = state.bucket_tokens / crate::pool::health::BUCKET_MAX * 100.0;

        let (q, low) = match self.quotas.get(&id) {
            Some(snap) => (snap.score(model, now), snap.is_low(model)),
            None => (50.0, false),
        };

        // Recency normalized to [0,1]; never-used counts as fully idle, so
        // least-recently-used candidates score highest on the LRU component.
        let idle = self.idle_secs(id, now);
        let recency = if idle.is_finite() {
            1.0 - (idle / max_idle).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let l = 100.0 * (1.0 - recency);

        let mut total = W_HEALTH * h + W_TOKENS * b + W_QUOTA * q + W_LRU * l;
        if low {
            total -= LOW_QUOTA_BIAS;
        }
        total
    }

    fn pick_sticky(
        &mut self,
        req: &SelectRequest<'_>,
        candidates: &[i64],
        now: DateTime<Utc>,
    ) -> Option<i64> {
        if let Some(session_id) = req.session_id {
            if let Some(pinned) = self.sessions.get(session_id) {
                if candidates.contains(&pinned) {
                    return Some(pinned);
                }
            }
            let chosen = self.pick_hybrid(req.model, candidates, now)?;
            self.sessions.record(session_id, chosen);
            return Some(chosen);
        }
        self.pick_hybrid(req.model, candidates, now)
    }

    fn pick_round_robin(&mut self, candidates: &[i64]) -> Option<i64> {
        if candidates.is_empty() {
            return None;
        }
        let mut sorted = candidates.to_vec();
        sorted.sort_unstable();
        let chosen = sorted[self.rr_cursor % sorted.len()];
        self.rr_cursor = self.rr_cursor.wrapping_add(1);
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(id: i64) -> PooledCredential {
        PooledCredential {
            id,
            provider: ProviderKind::Kiro,
            auth_method: AuthMethod::Social,
            access_token: Some(format!("token-{id}")),
            refresh_token: Some(format!("refresh-{id}")),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            project_id: None,
            region: None,
            client_id: None,
            client_secret: None,
            last_used_at: None,
            auth_failures: 0,
        }
    }

    fn pool(strategy: SelectionStrategy, ids: &[i64]) -> CredentialPool {
        let mut pool = CredentialPool::new(ProviderKind::Kiro, strategy, 1800);
        for &id in ids {
            pool.insert(cred(id));
        }
        pool
    }

    #[test]
    fn excluded_credential_is_not_selected_while_others_remain() {
        let mut pool = pool(SelectionStrategy::Hybrid, &[1, 2]);
        let now = Utc::now();
        let picked = pool
            .select(
                &SelectRequest {
                    model: "m",
                    session_id: None,
                    exclude: &[1],
                },
                now,
            )
            .unwrap();
        assert_eq!(picked, 2);
    }

    #[test]
    fn exhausted_exclusions_fall_back_to_unfiltered_set() {
        let mut pool = pool(SelectionStrategy::Hybrid, &[1]);
        let now = Utc::now();
        let picked = pool.select(
            &SelectRequest {
                model: "m",
                session_id: None,
                exclude: &[1],
            },
            now,
        );
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn paused_credential_is_excluded_outright() {
        let mut pool = pool(SelectionStrategy::Hybrid, &[1, 2]);
        let now = Utc::now();
        pool.report_rate_limit(1, now);
        let picked = pool
            .select(
                &SelectRequest {
                    model: "m",
                    session_id: None,
                    exclude: &[],
                },
                now,
            )
            .unwrap();
        assert_eq!(picked, 2);
    }

    #[test]
    fn unhealthy_credential_only_wins_when_alone() {
        let mut pool = pool(SelectionStrategy::Hybrid, &[1, 2]);
        let now = Utc::now();
        // Two failures drop id 1 to 30, below the healthy threshold.
        pool.report_failure(1, now, "transient");
        pool.report_failure(1, now, "transient");
        let picked = pool
            .select(
                &SelectRequest {
                    model: "m",
                    session_id: None,
                    exclude: &[],
                },
                now,
            )
            .unwrap();
        assert_eq!(picked, 2);

        // With id 2 gone, the unhealthy credential is still eligible.
        pool.remove(2);
        let picked = pool
            .select(
                &SelectRequest {
                    model: "m",
                    session_id: None,
                    exclude: &[],
                },
                now,
            )
            .unwrap();
        assert_eq!(picked, 1);
    }

    #[test]
    fn critical_quota_excludes_credential() {
        let mut pool = pool(SelectionStrategy::Hybrid, &[1, 2]);
        let now = Utc::now();
        let mut snap = QuotaSnapshot::default();
        snap.models.insert(
            "m".to_string(),
            crate::pool::quota::ModelQuota {
                remaining_fraction: 0.01,
                reset_time: None,
            },
        );
        snap.fetched_at = Some(now);
        pool.set_quota(1, snap);

        let picked = pool
            .select(
                &SelectRequest {
                    model: "m",
                    session_id: None,
                    exclude: &[],
                },
                now,
            )
            .unwrap();
        assert_eq!(picked, 2);
    }

    #[test]
    fn empty_admission_bucket_refuses_selection() {
        let mut pool = pool(SelectionStrategy::Hybrid, &[1]);
        let now = Utc::now();
        pool.health_entry(1, now).bucket_tokens = 0.0;
        pool.health_entry(1, now).bucket_refilled_at = now;
        let picked = pool.select(
            &SelectRequest {
                model: "m",
                session_id: None,
                exclude: &[],
            },
            now,
        );
        assert_eq!(picked, None);
    }

    #[test]
    fn sticky_reuses_live_mapping() {
        let mut pool = pool(SelectionStrategy::Sticky, &[1, 2]);
        let now = Utc::now();
        let req = SelectRequest {
            model: "m",
            session_id: Some("sess-1"),
            exclude: &[],
        };
        let first = pool.select(&req, now).unwrap();
        let second = pool.select(&req, now).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn round_robin_rotates_by_id() {
        let mut pool = pool(SelectionStrategy::RoundRobin, &[3, 1, 2]);
        let now = Utc::now();
        let req = SelectRequest {
            model: "m",
            session_id: None,
            exclude: &[],
        };
        let picks: Vec<i64> = (0..3).map(|_| pool.select(&req, now).unwrap()).collect();
        assert_eq!(picks, vec![1, 2, 3]);
    }

    #[test]
    fn hybrid_prefers_least_recently_used_on_equal_health() {
        let mut pool = pool(SelectionStrategy::Hybrid, &[1, 2]);
        let now = Utc::now();
        pool.get_mut(1).unwrap().last_used_at = Some(now);
        pool.get_mut(2).unwrap().last_used_at = Some(now - chrono::Duration::minutes(10));
        let picked = pool
            .select(
                &SelectRequest {
                    model: "m",
                    session_id: None,
                    exclude: &[],
                },
                now,
            )
            .unwrap();
        assert_eq!(picked, 2);
    }
}
