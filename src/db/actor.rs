use crate::db::models::{
    DbApiKey, DbCredential, DbHealthRecord, DbPriceRow, DbQuarantinedCredential, UsageTotals,
    UsageWindow,
};
use crate::db::patch::{
    ApiKeyCreate, CredentialCreate, CredentialPatch, HealthFlush, RequestLogCreate,
};
use crate::db::schema::SQLITE_INIT;
use crate::error::GatewayError;
use crate::providers::manifest::ProviderKind;
use chrono::{Datelike, TimeZone, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::{str::FromStr, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub enum DbActorMessage {
    /// List active pool credentials for one provider.
    ListActive(
        ProviderKind,
        RpcReplyPort<Result<Vec<DbCredential>, GatewayError>>,
    ),

    /// Fetch one pool credential by id.
    GetCredential(i64, RpcReplyPort<Result<DbCredential, GatewayError>>),

    /// Insert a pool credential and return its id.
    InsertCredential(
        CredentialCreate,
        RpcReplyPort<Result<i64, GatewayError>>,
    ),

    /// Patch a pool credential by id.
    PatchCredential(i64, CredentialPatch, RpcReplyPort<Result<(), GatewayError>>),

    /// Move a credential pool -> error table (single transaction).
    Quarantine(
        i64,
        String,
        Option<String>,
        RpcReplyPort<Result<(), GatewayError>>,
    ),

    /// Move a credential error table -> pool with fresh token data.
    Restore(i64, CredentialPatch, RpcReplyPort<Result<(), GatewayError>>),

    /// List quarantined credentials that still hold a refresh token.
    ListQuarantined(
        ProviderKind,
        RpcReplyPort<Result<Vec<DbQuarantinedCredential>, GatewayError>>,
    ),

    /// Look up an api key by secret hash.
    GetApiKeyByHash(String, RpcReplyPort<Result<Option<DbApiKey>, GatewayError>>),

    /// Mint an api key row and return its id.
    InsertApiKey(ApiKeyCreate, RpcReplyPort<Result<i64, GatewayError>>),

    /// List all api keys (admin surface).
    ListApiKeys(RpcReplyPort<Result<Vec<DbApiKey>, GatewayError>>),

    /// Deactivate an api key.
    DeactivateApiKey(i64, RpcReplyPort<Result<(), GatewayError>>),

    /// Write one completed-request log row.
    InsertRequestLog(RequestLogCreate, RpcReplyPort<Result<i64, GatewayError>>),

    /// Aggregate daily/monthly/total usage for one api key.
    UsageTotals(i64, RpcReplyPort<Result<UsageTotals, GatewayError>>),

    /// Load persisted health rows for one provider.
    LoadHealth(
        ProviderKind,
        RpcReplyPort<Result<Vec<DbHealthRecord>, GatewayError>>,
    ),

    /// Persist health state; fire-and-forget.
    FlushHealth(Vec<HealthFlush>),

    /// Per-model price override, if any.
    PriceOverride(String, RpcReplyPort<Result<Option<DbPriceRow>, GatewayError>>),
}

#[derive(Clone)]
pub struct DbActorHandle {
    actor: ActorRef<DbActorMessage>,
}

macro_rules! db_call {
    ($self:expr, $variant:ident $(, $arg:expr)*) => {
        ractor::call!($self.actor, DbActorMessage::$variant $(, $arg)*)
            .map_err(|e| GatewayError::Actor(format!(concat!("DbActor ", stringify!($variant), " RPC failed: {}"), e)))?
    };
}

impl DbActorHandle {
    pub async fn list_active(
        &self,
        provider: ProviderKind,
    ) -> Result<Vec<DbCredential>, GatewayError> {
        db_call!(self, ListActive, provider)
    }

    pub async fn get_credential(&self, id: i64) -> Result<DbCredential, GatewayError> {
        db_call!(self, GetCredential, id)
    }

    pub async fn insert_credential(&self, create: CredentialCreate) -> Result<i64, GatewayError> {
        db_call!(self, InsertCredential, create)
    }

    pub async fn patch_credential(
        &self,
        id: i64,
        patch: CredentialPatch,
    ) -> Result<(), GatewayError> {
        db_call!(self, PatchCredential, id, patch)
    }

    pub async fn quarantine(
        &self,
        id: i64,
        error_class: &str,
        message: Option<String>,
    ) -> Result<(), GatewayError> {
        db_call!(self, Quarantine, id, error_class.to_string(), message)
    }

    pub async fn restore(&self, id: i64, patch: CredentialPatch) -> Result<(), GatewayError> {
        db_call!(self, Restore, id, patch)
    }

    pub async fn list_quarantined(
        &self,
        provider: ProviderKind,
    ) -> Result<Vec<DbQuarantinedCredential>, GatewayError> {
        db_call!(self, ListQuarantined, provider)
    }

    pub async fn get_api_key_by_hash(
        &self,
        key_hash: String,
    ) -> Result<Option<DbApiKey>, GatewayError> {
        db_call!(self, GetApiKeyByHash, key_hash)
    }

    pub async fn insert_api_key(&self, create: ApiKeyCreate) -> Result<i64, GatewayError> {
        db_call!(self, InsertApiKey, create)
    }

    pub async fn list_api_keys(&self) -> Result<Vec<DbApiKey>, GatewayError> {
        db_call!(self, ListApiKeys)
    }

    pub async fn deactivate_api_key(&self, id: i64) -> Result<(), GatewayError> {
        db_call!(self, DeactivateApiKey, id)
    }

    pub async fn insert_request_log(&self, log: RequestLogCreate) -> Result<i64, GatewayError> {
        db_call!(self, InsertRequestLog, log)
    }

    pub async fn usage_totals(&self, api_key_id: i64) -> Result<UsageTotals, GatewayError> {
        db_call!(self, UsageTotals, api_key_id)
    }

    pub async fn load_health(
        &self,
        provider: ProviderKind,
    ) -> Result<Vec<DbHealthRecord>, GatewayError> {
        db_call!(self, LoadHealth, provider)
    }

    pub fn flush_health(&self, rows: Vec<HealthFlush>) {
        let _ = ractor::cast!(self.actor, DbActorMessage::FlushHealth(rows));
    }

    pub async fn price_override(
        &self,
        model: String,
    ) -> Result<Option<DbPriceRow>, GatewayError> {
        db_call!(self, PriceOverride, model)
    }
}

struct DbActorState {
    pool: SqlitePool,
}

struct DbActor;

#[ractor::async_trait]
impl Actor for DbActor {
    type Msg = DbActorMessage;
    type State = DbActorState;
    type Arguments = String;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        database_url: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let connect_opts = SqliteConnectOptions::from_str(database_url.as_str())
            .map_err(|e| ActorProcessingErr::from(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_opts)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db connect failed: {e}")))?;

        apply_schema(&pool)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db schema init failed: {e}")))?;

        info!("DbActor initialized");
        Ok(DbActorState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let pool = &state.pool;
        match message {
            DbActorMessage::ListActive(provider, reply) => {
                let _ = reply.send(ops::list_active(pool, provider).await);
            }
            DbActorMessage::GetCredential(id, reply) => {
                let _ = reply.send(ops::get_credential(pool, id).await);
            }
            DbActorMessage::InsertCredential(create, reply) => {
                let _ = reply.send(ops::insert_credential(pool, create).await);
            }
            DbActorMessage::PatchCredential(id, patch, reply) => {
                let _ = reply.send(ops::patch_credential(pool, id, patch).await);
            }
            DbActorMessage::Quarantine(id, error_class, message, reply) => {
                let _ = reply.send(ops::quarantine(pool, id, &error_class, message).await);
            }
            DbActorMessage::Restore(id, patch, reply) => {
                let _ = reply.send(ops::restore(pool, id, patch).await);
            }
            DbActorMessage::ListQuarantined(provider, reply) => {
                let _ = reply.send(ops::list_quarantined(pool, provider).await);
            }
            DbActorMessage::GetApiKeyByHash(hash, reply) => {
                let _ = reply.send(ops::get_api_key_by_hash(pool, &hash).await);
            }
            DbActorMessage::InsertApiKey(create, reply) => {
                let _ = reply.send(ops::insert_api_key(pool, create).await);
            }
            DbActorMessage::ListApiKeys(reply) => {
                let _ = reply.send(ops::list_api_keys(pool).await);
            }
            DbActorMessage::DeactivateApiKey(id, reply) => {
                let _ = reply.send(ops::deactivate_api_key(pool, id).await);
            }
            DbActorMessage::InsertRequestLog(log, reply) => {
                let _ = reply.send(ops::insert_request_log(pool, log).await);
            }
            DbActorMessage::UsageTotals(api_key_id, reply) => {
                let _ = reply.send(ops::usage_totals(pool, api_key_id).await);
            }
            DbActorMessage::LoadHealth(provider, reply) => {
                let _ = reply.send(ops::load_health(pool, provider).await);
            }
            DbActorMessage::FlushHealth(rows) => {
                if let Err(e) = ops::flush_health(pool, rows).await {
                    warn!("health flush failed: {}", e);
                }
            }
            DbActorMessage::PriceOverride(model, reply) => {
                let _ = reply.send(ops::price_override(pool, &model).await);
            }
        }
        Ok(())
    }
}

mod ops {
    use super::*;

    const CREDENTIAL_COLUMNS: &str = "id, provider, auth_method, access_token, refresh_token, \
         expires_at, project_id, region, client_id, client_secret, use_count, error_count, \
         last_error, last_used_at, is_active, quota_data, created_at, updated_at";

    pub async fn list_active(
        pool: &SqlitePool,
        provider: ProviderKind,
    ) -> Result<Vec<DbCredential>, GatewayError> {
        let rows = sqlx::query_as::<_, DbCredential>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials \
             WHERE provider = ? AND is_active = 1 ORDER BY id"
        ))
        .bind(provider.as_str())
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_credential(pool: &SqlitePool, id: i64) -> Result<DbCredential, GatewayError> {
        let row = sqlx::query_as::<_, DbCredential>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_credential(
        pool: &SqlitePool,
        c: CredentialCreate,
    ) -> Result<i64, GatewayError> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO credentials (
                provider, auth_method, access_token, refresh_token, expires_at,
                project_id, region, client_id, client_secret, is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING id
            ",
        )
        .bind(c.provider.as_str())
        .bind(c.auth_method.as_str())
        .bind(c.access_token)
        .bind(c.refresh_token)
        .bind(c.expires_at)
        .bind(c.project_id)
        .bind(c.region)
        .bind(c.client_id)
        .bind(c.client_secret)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(id)
    }

    pub async fn patch_credential(
        pool: &SqlitePool,
        id: i64,
        patch: CredentialPatch,
    ) -> Result<(), GatewayError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE credentials SET ");
        let mut set = qb.separated(", ");
        if let Some(v) = patch.access_token {
            set.push("access_token = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.refresh_token {
            set.push("refresh_token = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.expires_at {
            set.push("expires_at = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.project_id {
            set.push("project_id = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.quota_data {
            set.push("quota_data = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.last_error {
            set.push("last_error = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.last_used_at {
            set.push("last_used_at = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.is_active {
            set.push("is_active = ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.bump_use_count {
            set.push("use_count = use_count + ").push_bind_unseparated(v);
        }
        if let Some(v) = patch.bump_error_count {
            if v == 0 {
                set.push("error_count = 0");
            } else {
                set.push("error_count = error_count + ")
                    .push_bind_unseparated(v);
            }
        }
        set.push("updated_at = ").push_bind_unseparated(Utc::now());

        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(pool).await?;
        Ok(())
    }

    /// A credential is in exactly one of {pool, error-table}; both moves are
    /// single transactions so the invariant holds at every commit point.
    pub async fn quarantine(
        pool: &SqlitePool,
        id: i64,
        error_class: &str,
        message: Option<String>,
    ) -> Result<(), GatewayError> {
        let mut tx = pool.begin().await?;
        let now = Utc::now();

        let moved = sqlx::query(
            r"
            INSERT INTO credential_errors (
                id, provider, auth_method, access_token, refresh_token, expires_at,
                project_id, region, client_id, client_secret, use_count, error_count,
                last_error, error_class, quarantined_at, created_at, updated_at
            )
            SELECT id, provider, auth_method, access_token, refresh_token, expires_at,
                   project_id, region, client_id, client_secret, use_count, error_count,
                   COALESCE(?, last_error), ?, ?, created_at, ?
            FROM credentials WHERE id = ?
            ",
        )
        .bind(message)
        .bind(error_class)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if moved == 0 {
            // Already quarantined (or deleted); nothing to do.
            tx.rollback().await?;
            return Ok(());
        }

        sqlx::query("DELETE FROM credentials WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn restore(
        pool: &SqlitePool,
        id: i64,
        patch: CredentialPatch,
    ) -> Result<(), GatewayError> {
        let mut tx = pool.begin().await?;
        let now = Utc::now();

        let moved = sqlx::query(
            r"
            INSERT INTO credentials (
                id, provider, auth_method, access_token, refresh_token, expires_at,
                project_id, region, client_id, client_secret, use_count, error_count,
                last_error, last_used_at, is_active, quota_data, created_at, updated_at
            )
            SELECT id, provider, auth_method, access_token, refresh_token, expires_at,
                   project_id, region, client_id, client_secret, use_count, 0,
                   NULL, NULL, 1, NULL, created_at, ?
            FROM credential_errors WHERE id = ?
            ",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if moved == 0 {
            tx.rollback().await?;
            return Ok(());
        }

        sqlx::query("DELETE FROM credential_errors WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        // Apply the fresh token data outside the move transaction.
        patch_credential(pool, id, patch).await
    }

    pub async fn list_quarantined(
        pool: &SqlitePool,
        provider: ProviderKind,
    ) -> Result<Vec<DbQuarantinedCredential>, GatewayError> {
        let rows = sqlx::query_as::<_, DbQuarantinedCredential>(
            r"
            SELECT id, provider, auth_method, access_token, refresh_token, expires_at,
                   project_id, region, client_id, client_secret, use_count, error_count,
                   last_error, error_class, quarantined_at, created_at, updated_at
            FROM credential_errors
            WHERE provider = ? AND refresh_token IS NOT NULL
            ORDER BY id
            ",
        )
        .bind(provider.as_str())
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    const API_KEY_COLUMNS: &str = "id, key_hash, key_prefix, name, daily_limit, monthly_limit, \
         total_limit, daily_cost_limit, monthly_cost_limit, total_cost_limit, concurrent_limit, \
         rate_limit, expires_in_days, is_active, created_at";

    pub async fn get_api_key_by_hash(
        pool: &SqlitePool,
        key_hash: &str,
    ) -> Result<Option<DbApiKey>, GatewayError> {
        let row = sqlx::query_as::<_, DbApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = ? AND is_active = 1"
        ))
        .bind(key_hash)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_api_key(
        pool: &SqlitePool,
        c: ApiKeyCreate,
    ) -> Result<i64, GatewayError> {
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO api_keys (
                key_hash, key_prefix, name, daily_limit, monthly_limit, total_limit,
                daily_cost_limit, monthly_cost_limit, total_cost_limit,
                concurrent_limit, rate_limit, expires_in_days, is_active, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            RETURNING id
            ",
        )
        .bind(c.key_hash)
        .bind(c.key_prefix)
        .bind(c.name)
        .bind(c.daily_limit)
        .bind(c.monthly_limit)
        .bind(c.total_limit)
        .bind(c.daily_cost_limit)
        .bind(c.monthly_cost_limit)
        .bind(c.total_cost_limit)
        .bind(c.concurrent_limit)
        .bind(c.rate_limit)
        .bind(c.expires_in_days)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
        Ok(id)
    }

    pub async fn list_api_keys(pool: &SqlitePool) -> Result<Vec<DbApiKey>, GatewayError> {
        let rows = sqlx::query_as::<_, DbApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys ORDER BY id"
        ))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn deactivate_api_key(pool: &SqlitePool, id: i64) -> Result<(), GatewayError> {
        sqlx::query("UPDATE api_keys SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn insert_request_log(
        pool: &SqlitePool,
        log: RequestLogCreate,
    ) -> Result<i64, GatewayError> {
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO request_logs (
                request_id, api_key_id, ip_address, provider, credential_id, model,
                stream, input_tokens, output_tokens, status_code, error_message,
                duration_ms, cost, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(log.request_id)
        .bind(log.api_key_id)
        .bind(log.ip_address)
        .bind(log.provider.as_str())
        .bind(log.credential_id)
        .bind(log.model)
        .bind(log.stream)
        .bind(log.input_tokens)
        .bind(log.output_tokens)
        .bind(i64::from(log.status_code))
        .bind(log.error_message)
        .bind(log.duration_ms)
        .bind(log.cost)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
        Ok(id)
    }

    pub async fn usage_totals(
        pool: &SqlitePool,
        api_key_id: i64,
    ) -> Result<UsageTotals, GatewayError> {
        let now = Utc::now();
        let day_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);
        let month_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);

        async fn window(
            pool: &SqlitePool,
            api_key_id: i64,
            since: Option<chrono::DateTime<Utc>>,
        ) -> Result<UsageWindow, GatewayError> {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT COUNT(*) AS requests, COALESCE(SUM(cost), 0.0) AS cost \
                 FROM request_logs WHERE api_key_id = ",
            );
            qb.push_bind(api_key_id);
            if let Some(since) = since {
                qb.push(" AND created_at >= ").push_bind(since);
            }
            let row = qb
                .build_query_as::<UsageWindow>()
                .fetch_one(pool)
                .await?;
            Ok(row)
        }

        Ok(UsageTotals {
            daily: window(pool, api_key_id, Some(day_start)).await?,
            monthly: window(pool, api_key_id, Some(month_start)).await?,
            total: window(pool, api_key_id, None).await?,
        })
    }

    pub async fn load_health(
        pool: &SqlitePool,
        provider: ProviderKind,
    ) -> Result<Vec<DbHealthRecord>, GatewayError> {
        let rows = sqlx::query_as::<_, DbHealthRecord>(
            r"
            SELECT provider, credential_id, score, bucket_tokens, bucket_refilled_at,
                   paused_until, rate_limit_hits, last_rate_limit_at, last_error_class,
                   last_failure_at, updated_at
            FROM health_records WHERE provider = ?
            ",
        )
        .bind(provider.as_str())
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn flush_health(
        pool: &SqlitePool,
        rows: Vec<HealthFlush>,
    ) -> Result<(), GatewayError> {
        let now = Utc::now();
        for row in rows {
            sqlx::query(
                r"
                INSERT INTO health_records (
                    provider, credential_id, score, bucket_tokens, bucket_refilled_at,
                    paused_until, rate_limit_hits, last_rate_limit_at, last_error_class,
                    last_failure_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(provider, credential_id) DO UPDATE SET
                    score = excluded.score,
                    bucket_tokens = excluded.bucket_tokens,
                    bucket_refilled_at = excluded.bucket_refilled_at,
                    paused_until = excluded.paused_until,
                    rate_limit_hits = excluded.rate_limit_hits,
                    last_rate_limit_at = excluded.last_rate_limit_at,
                    last_error_class = excluded.last_error_class,
                    last_failure_at = excluded.last_failure_at,
                    updated_at = excluded.updated_at
                ",
            )
            .bind(row.provider.as_str())
            .bind(row.credential_id)
            .bind(row.score)
            .bind(row.bucket_tokens)
            .bind(row.bucket_refilled_at)
            .bind(row.paused_until)
            .bind(row.rate_limit_hits)
            .bind(row.last_rate_limit_at)
            .bind(row.last_error_class)
            .bind(row.last_failure_at)
            .bind(now)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub async fn price_override(
        pool: &SqlitePool,
        model: &str,
    ) -> Result<Option<DbPriceRow>, GatewayError> {
        let row = sqlx::query_as::<_, DbPriceRow>(
            "SELECT model, input_price, output_price, updated_at FROM pricing WHERE model = ?",
        )
        .bind(model)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }
}

/// Spawn the database actor and return a cloneable handle.
///
/// Actor names are registered process-wide; a monotonic suffix keeps
/// repeated spawns (tests, embedded use) from colliding.
pub async fn spawn(database_url: &str) -> DbActorHandle {
    static SPAWN_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let seq = SPAWN_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let (actor, _jh) = ractor::Actor::spawn(
        Some(format!("DbActor-{seq}")),
        DbActor,
        database_url.to_string(),
    )
    .await
    .expect("failed to spawn DbActor");

    DbActorHandle { actor }
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), GatewayError> {
    for stmt in SQLITE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}
