use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{PoolConfig, SelectionStrategy};
use crate::db::patch::CredentialPatch;
use crate::db::{DbActorHandle, models::DbCredential};
use crate::error::GatewayError;
use crate::pool::quota::QuotaSnapshot;
use crate::pool::scheduler::{CredentialPool, PooledCredential, SelectRequest};
use crate::providers::manifest::{CredentialLease, ProviderKind};

/// Auth failures in one token generation before quarantine.
const QUARANTINE_AFTER_AUTH_FAILURES: u32 = 2;

const HEALTH_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one dispatched request against a credential.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Success,
    /// 401/403 from upstream; repeated hits quarantine the credential.
    AuthFailure { message: String },
    /// 429 or provider equivalent; starts the backoff tier.
    RateLimited,
    /// 5xx / network timeout; recorded without score penalty.
    Transient { message: String },
    /// Client went away mid-request; no penalty.
    Cancelled,
}

/// Parameters of one credential acquisition.
#[derive(Debug, Clone, Default)]
pub struct AcquireRequest {
    pub model: String,
    pub session_id: Option<String>,
    pub exclude: Vec<i64>,
}

#[derive(Debug)]
pub enum PoolActorMessage {
    /// Select one credential; `None` when the pool has no eligible entry.
    Acquire(AcquireRequest, RpcReplyPort<Option<CredentialLease>>),

    /// Live pool size (used to bound failover attempts).
    PoolSize(RpcReplyPort<usize>),

    /// Report the outcome of a dispatched request.
    ReportOutcome(i64, RequestOutcome),

    /// Apply refreshed token data to the in-memory credential.
    UpdateCredential(i64, CredentialPatch),

    /// Activate a credential (import, restore, startup backfill).
    AddCredential(DbCredential),

    /// Drop a credential from the pool (quarantine, admin deactivation).
    RemoveCredential(i64),

    /// Store a fresh quota snapshot and persist it.
    SetQuota(i64, QuotaSnapshot),

    // Internal: periodic health persistence tick.
    FlushHealth,
}

/// Handle for interacting with one provider's pool actor.
#[derive(Clone)]
pub struct PoolHandle {
    provider: ProviderKind,
    actor: ActorRef<PoolActorMessage>,
}

impl PoolHandle {
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub async fn acquire(
        &self,
        req: AcquireRequest,
    ) -> Result<Option<CredentialLease>, GatewayError> {
        ractor::call!(self.actor, PoolActorMessage::Acquire, req)
            .map_err(|e| GatewayError::Actor(format!("PoolActor Acquire RPC failed: {e}")))
    }

    pub async fn pool_size(&self) -> Result<usize, GatewayError> {
        ractor::call!(self.actor, PoolActorMessage::PoolSize)
            .map_err(|e| GatewayError::Actor(format!("PoolActor PoolSize RPC failed: {e}")))
    }

    pub fn report_outcome(&self, id: i64, outcome: RequestOutcome) {
        let _ = ractor::cast!(self.actor, PoolActorMessage::ReportOutcome(id, outcome));
    }

    pub fn update_credential(&self, id: i64, patch: CredentialPatch) {
        let _ = ractor::cast!(self.actor, PoolActorMessage::UpdateCredential(id, patch));
    }

    pub fn add_credential(&self, row: DbCredential) {
        let _ = ractor::cast!(self.actor, PoolActorMessage::AddCredential(row));
    }

    pub fn remove_credential(&self, id: i64) {
        let _ = ractor::cast!(self.actor, PoolActorMessage::RemoveCredential(id));
    }

    pub fn set_quota(&self, id: i64, snapshot: QuotaSnapshot) {
        let _ = ractor::cast!(self.actor, PoolActorMessage::SetQuota(id, snapshot));
    }
}

struct PoolActorState {
    pool: CredentialPool,
    db: DbActorHandle,
    provider: ProviderKind,
}

struct PoolActor;

#[ractor::async_trait]
impl Actor for PoolActor {
    type Msg = PoolActorMessage;
    type State = PoolActorState;
    type Arguments = (ProviderKind, SelectionStrategy, u64, DbActorHandle);

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let (provider, strategy, session_ttl_secs, db) = args;

        let mut pool = CredentialPool::new(provider, strategy, session_ttl_secs);

        let rows = db
            .list_active(provider)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("DB load active creds failed: {e}")))?;
        for row in &rows {
            let mut cred = PooledCredential::from_db(provider, row);
            if let Some(raw) = row.quota_data.as_deref() {
                if let Some(snapshot) = QuotaSnapshot::from_json(raw) {
                    pool.set_quota(row.id, snapshot);
                }
            }
            cred.auth_failures = 0;
            pool.insert(cred);
        }

        let health_rows = db
            .load_health(provider)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("DB load health failed: {e}")))?;
        pool.load_health(&health_rows);

        info!(
            provider = %provider,
            total_creds = pool.len(),
            health_rows = health_rows.len(),
            "PoolActor started from DB"
        );

        // Periodic health persistence.
        tokio::spawn({
            let myself = myself.clone();
            async move {
                let mut tick = tokio::time::interval(HEALTH_FLUSH_INTERVAL);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    if myself.cast(PoolActorMessage::FlushHealth).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(PoolActorState { pool, db, provider })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolActorMessage::Acquire(req, reply) => {
                let now = Utc::now();
                let selected = state.pool.select(
                    &SelectRequest {
                        model: &req.model,
                        session_id: req.session_id.as_deref(),
                        exclude: &req.exclude,
                    },
                    now,
                );

                let lease = selected.and_then(|id| {
                    let quota_remaining = state
                        .pool
                        .quota(id)
                        .and_then(|snapshot| snapshot.remaining(&req.model));
                    state
                        .pool
                        .get(id)
                        .and_then(|cred| cred.lease(quota_remaining))
                });
                match &lease {
                    Some(lease) => debug!(
                        provider = %state.provider,
                        id = lease.id,
                        model = %req.model,
                        excluded = req.exclude.len(),
                        "credential acquired"
                    ),
                    None => warn!(
                        provider = %state.provider,
                        model = %req.model,
                        pool_len = state.pool.len(),
                        excluded = req.exclude.len(),
                        "no credential available"
                    ),
                }
                let _ = reply.send(lease);
            }

            PoolActorMessage::PoolSize(reply) => {
                let _ = reply.send(state.pool.len());
            }

            PoolActorMessage::ReportOutcome(id, outcome) => {
                self.handle_outcome(state, id, outcome);
            }

            PoolActorMessage::UpdateCredential(id, patch) => {
                if let Some(cred) = state.pool.get_mut(id) {
                    if let Some(token) = patch.access_token {
                        cred.access_token = Some(token);
                        // New token generation; prior auth failures no
                        // longer count toward quarantine.
                        cred.auth_failures = 0;
                    }
                    if let Some(token) = patch.refresh_token {
                        cred.refresh_token = Some(token);
                    }
                    if let Some(expiry) = patch.expires_at {
                        cred.expires_at = Some(expiry);
                    }
                    if let Some(project) = patch.project_id {
                        cred.project_id = Some(project);
                    }
                    debug!(provider = %state.provider, id, "in-memory credential updated");
                }
            }

            PoolActorMessage::AddCredential(row) => {
                if let Some(raw) = row.quota_data.as_deref() {
                    if let Some(snapshot) = QuotaSnapshot::from_json(raw) {
                        state.pool.set_quota(row.id, snapshot);
                    }
                }
                let cred = PooledCredential::from_db(state.provider, &row);
                info!(provider = %state.provider, id = cred.id, "credential activated");
                state.pool.insert(cred);
            }

            PoolActorMessage::RemoveCredential(id) => {
                state.pool.remove(id);
                info!(provider = %state.provider, id, "credential removed from pool");
            }

            PoolActorMessage::SetQuota(id, snapshot) => {
                let quota_json = snapshot.to_json();
                state.pool.set_quota(id, snapshot);

                let db = state.db.clone();
                tokio::spawn(async move {
                    let patch = CredentialPatch {
                        quota_data: Some(quota_json),
                        ..CredentialPatch::default()
                    };
                    if let Err(e) = db.patch_credential(id, patch).await {
                        warn!(id, "quota persistence failed: {}", e);
                    }
                });
            }

            PoolActorMessage::FlushHealth => {
                let rows = state.pool.flush_rows(Utc::now());
                if !rows.is_empty() {
                    state.db.flush_health(rows);
                }
            }
        }
        Ok(())
    }
}

impl PoolActor {
    fn handle_outcome(&self, state: &mut PoolActorState, id: i64, outcome: RequestOutcome) {
        let now = Utc::now();
        match outcome {
            RequestOutcome::Success => {
                state.pool.report_success(id, now);
                let db = state.db.clone();
                tokio::spawn(async move {
                    let patch = CredentialPatch {
                        bump_use_count: Some(1),
                        bump_error_count: Some(0),
                        last_used_at: Some(now),
                        ..CredentialPatch::default()
                    };
                    if let Err(e) = db.patch_credential(id, patch).await {
                        warn!(id, "success bookkeeping failed: {}", e);
                    }
                });
            }

            RequestOutcome::AuthFailure { message } => {
                let failures = state.pool.report_auth_failure(id, now);
                let quarantine = failures >= QUARANTINE_AFTER_AUTH_FAILURES;
                if quarantine {
                    state.pool.remove(id);
                    warn!(
                        provider = %state.provider,
                        id,
                        failures,
                        "credential quarantined after repeated auth failures"
                    );
                }

                let db = state.db.clone();
                tokio::spawn(async move {
                    if quarantine {
                        if let Err(e) = db.quarantine(id, "auth", Some(message)).await {
                            warn!(id, "quarantine move failed: {}", e);
                        }
                    } else {
                        let patch = CredentialPatch {
                            bump_error_count: Some(1),
                            last_error: Some(Some(message)),
                            ..CredentialPatch::default()
                        };
                        if let Err(e) = db.patch_credential(id, patch).await {
                            warn!(id, "auth-failure bookkeeping failed: {}", e);
                        }
                    }
                });
            }

            RequestOutcome::RateLimited => {
                let backoff = state.pool.report_rate_limit(id, now);
                info!(
                    provider = %state.provider,
                    id,
                    pause_secs = backoff.num_seconds(),
                    "credential paused after rate limit"
                );
            }

            RequestOutcome::Transient { message } => {
                // No score penalty; the failover loop already moved on.
                let db = state.db.clone();
                tokio::spawn(async move {
                    let patch = CredentialPatch {
                        bump_error_count: Some(1),
                        last_error: Some(Some(message)),
                        ..CredentialPatch::default()
                    };
                    if let Err(e) = db.patch_credential(id, patch).await {
                        warn!(id, "transient-failure bookkeeping failed: {}", e);
                    }
                });
            }

            RequestOutcome::Cancelled => {
                debug!(provider = %state.provider, id, "request cancelled; no penalty");
            }
        }
    }
}

/// Spawn one provider's pool actor and return a handle.
pub async fn spawn(
    provider: ProviderKind,
    cfg: &PoolConfig,
    db: DbActorHandle,
) -> PoolHandle {
    static SPAWN_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let seq = SPAWN_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let (actor, _jh) = Actor::spawn(
        Some(format!("PoolActor-{provider}-{seq}")),
        PoolActor,
        (provider, cfg.strategy, cfg.session_ttl_secs, db),
    )
    .await
    .unwrap_or_else(|e| panic!("failed to spawn PoolActor for {provider}: {e}"));

    PoolHandle { provider, actor }
}
