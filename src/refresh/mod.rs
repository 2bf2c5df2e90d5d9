mod discovery;
mod protocols;
mod singleflight;
mod sweeper;

pub use discovery::discover_project_id;
pub use singleflight::{RefreshFailure, RefreshedToken, Singleflight};
pub use sweeper::spawn_sweeper;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{GeminiResolvedConfig, KiroResolvedConfig};
use crate::db::models::{DbCredential, DbQuarantinedCredential};
use crate::db::patch::CredentialPatch;
use crate::db::DbActorHandle;
use crate::error::GatewayError;
use crate::pool::PoolHandle;
use crate::providers::manifest::ProviderKind;

const REFRESH_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const REFRESH_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct RefresherInner {
    db: DbActorHandle,
    pools: HashMap<ProviderKind, PoolHandle>,
    flights: Arc<Singleflight>,
    http: reqwest::Client,
    kiro_cfg: Arc<KiroResolvedConfig>,
    gemini_cfg: Arc<GeminiResolvedConfig>,
}

/// Credential refresh service: runs the per-provider refresh protocol,
/// updates the store, and keeps the pool actors' in-memory copies in sync.
/// Request-path and sweep-path callers deduplicate through the singleflight.
#[derive(Clone)]
pub struct Refresher {
    inner: Arc<RefresherInner>,
}

impl Refresher {
    pub fn new(
        db: DbActorHandle,
        pools: HashMap<ProviderKind, PoolHandle>,
        kiro_cfg: Arc<KiroResolvedConfig>,
        gemini_cfg: Arc<GeminiResolvedConfig>,
        proxy: Option<url::Url>,
    ) -> Self {
        let mut builder = reqwest::Client::builder()
            .user_agent("castor-refresh/1.0")
            .connect_timeout(REFRESH_CONNECT_TIMEOUT)
            .timeout(REFRESH_HTTP_TIMEOUT);
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .expect("invalid proxy url for refresh HTTP client");
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .expect("FATAL: initialize refresh HTTP client failed");

        Self {
            inner: Arc::new(RefresherInner {
                db,
                pools,
                flights: Singleflight::new(),
                http,
                kiro_cfg,
                gemini_cfg,
            }),
        }
    }

    /// Refresh a pool credential, deduplicated per credential id.
    pub async fn refresh(&self, id: i64) -> Result<RefreshedToken, GatewayError> {
        let inner = Arc::clone(&self.inner);
        let outcome = self
            .inner
            .flights
            .run(id, move || async move { inner.execute(id).await })
            .await;

        match outcome {
            Ok(token) => Ok(token),
            Err(RefreshFailure::Terminal(msg)) => Err(GatewayError::RefreshRefused(msg)),
            Err(RefreshFailure::Transient(msg)) => Err(GatewayError::RefreshTransient(msg)),
        }
    }

    /// Attempt to bring a quarantined credential back into the pool.
    pub async fn try_restore(&self, row: &DbQuarantinedCredential) -> Result<(), GatewayError> {
        let inner = &self.inner;
        let as_pool_row = quarantined_as_credential(row);

        match protocols::refresh_credential(
            &as_pool_row,
            &inner.kiro_cfg,
            &inner.gemini_cfg,
            &inner.http,
        )
        .await
        {
            Ok(token) => {
                let patch = CredentialPatch {
                    access_token: Some(token.access_token),
                    refresh_token: token.refresh_token,
                    expires_at: token.expires_at,
                    bump_error_count: Some(0),
                    ..CredentialPatch::default()
                };
                inner.db.restore(row.id, patch).await?;

                let restored = inner.db.get_credential(row.id).await?;
                if let Some(kind) = restored.provider_kind() {
                    if let Some(pool) = inner.pools.get(&kind) {
                        pool.add_credential(restored);
                    }
                }
                info!(id = row.id, provider = %row.provider, "credential restored from quarantine");
                Ok(())
            }
            Err(RefreshFailure::Terminal(msg)) => {
                // Still dead; stays quarantined.
                Err(GatewayError::RefreshRefused(msg))
            }
            Err(RefreshFailure::Transient(msg)) => Err(GatewayError::RefreshTransient(msg)),
        }
    }

    pub(crate) fn db(&self) -> &DbActorHandle {
        &self.inner.db
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub(crate) fn gemini_cfg(&self) -> &GeminiResolvedConfig {
        &self.inner.gemini_cfg
    }

    pub(crate) fn kiro_cfg(&self) -> &KiroResolvedConfig {
        &self.inner.kiro_cfg
    }

    pub(crate) fn pool(&self, provider: ProviderKind) -> Option<&PoolHandle> {
        self.inner.pools.get(&provider)
    }
}

impl RefresherInner {
    async fn execute(&self, id: i64) -> Result<RefreshedToken, RefreshFailure> {
        // Re-read the row inside the flight so a caller that joined after a
        // completed refresh sees the updated generation, not a stale copy.
        let row = match self.db.get_credential(id).await {
            Ok(row) => row,
            Err(e) => {
                return Err(RefreshFailure::Transient(format!(
                    "credential {id} unavailable for refresh: {e}"
                )));
            }
        };

        match protocols::refresh_credential(&row, &self.kiro_cfg, &self.gemini_cfg, &self.http)
            .await
        {
            Ok(mut token) => {
                // Gemini credentials must carry a project before first use.
                let mut project_id = None;
                if row.provider_kind() == Some(ProviderKind::Gemini)
                    && row
                        .project_id
                        .as_deref()
                        .is_none_or(|p| p.trim().is_empty())
                {
                    match discovery::discover_project_id(
                        &self.gemini_cfg,
                        &token.access_token,
                        &self.http,
                    )
                    .await
                    {
                        Ok(pid) => {
                            info!(id, project_id = %pid, "gemini project discovered");
                            project_id = Some(pid);
                        }
                        Err(e) => {
                            return Err(RefreshFailure::Transient(format!(
                                "project discovery failed: {e}"
                            )));
                        }
                    }
                }

                debug_assert!(
                    token.expires_at.is_none_or(|t| t > Utc::now()),
                    "a completed refresh must yield a future expiry"
                );

                token.project_id = project_id.clone().or_else(|| row.project_id.clone());

                let patch = CredentialPatch {
                    access_token: Some(token.access_token.clone()),
                    refresh_token: token.refresh_token.clone(),
                    expires_at: token.expires_at,
                    project_id,
                    last_error: Some(None),
                    bump_error_count: Some(0),
                    ..CredentialPatch::default()
                };

                if let Err(e) = self.db.patch_credential(id, patch.clone()).await {
                    warn!(id, "refresh DB update failed: {}", e);
                    return Err(RefreshFailure::Transient(format!(
                        "refresh store update failed: {e}"
                    )));
                }
                if let Some(kind) = row.provider_kind() {
                    if let Some(pool) = self.pools.get(&kind) {
                        pool.update_credential(id, patch);
                    }
                }

                Ok(token)
            }

            Err(RefreshFailure::Terminal(msg)) => {
                warn!(id, "refresh refused terminally: {}. Quarantining.", msg);
                if let Err(e) = self.db.quarantine(id, "auth", Some(msg.clone())).await {
                    warn!(id, "quarantine move failed: {}", e);
                }
                if let Some(kind) = row.provider_kind() {
                    if let Some(pool) = self.pools.get(&kind) {
                        pool.remove_credential(id);
                    }
                }
                Err(RefreshFailure::Terminal(msg))
            }

            Err(transient) => Err(transient),
        }
    }
}

fn quarantined_as_credential(row: &DbQuarantinedCredential) -> DbCredential {
    DbCredential {
        id: row.id,
        provider: row.provider.clone(),
        auth_method: row.auth_method.clone(),
        access_token: row.access_token.clone(),
        refresh_token: row.refresh_token.clone(),
        expires_at: row.expires_at,
        project_id: row.project_id.clone(),
        region: row.region.clone(),
        client_id: row.client_id.clone(),
        client_secret: row.client_secret.clone(),
        use_count: row.use_count,
        error_count: row.error_count,
        last_error: row.last_error.clone(),
        last_used_at: None,
        is_active: false,
        quota_data: None,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}
