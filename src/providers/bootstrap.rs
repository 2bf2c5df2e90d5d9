use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use castor_sigcache::SignatureCache;

use crate::config::{
    AnthropicResolvedConfig, Config, GeminiResolvedConfig, KiroResolvedConfig,
};
use crate::db::DbActorHandle;
use crate::error::GatewayError;
use crate::locks::CredentialLocks;
use crate::pool::{self, PoolHandle};
use crate::providers::anthropic::ClaudeClient;
use crate::providers::dispatch::Dispatcher;
use crate::providers::gemini::GeminiClient;
use crate::providers::kiro::KiroClient;
use crate::providers::manifest::ProviderKind;
use crate::refresh::{Refresher, spawn_sweeper};

pub const KIRO_USER_AGENT: &str = "aws-sdk-js/1.0.7 KiroIDE";
pub const GEMINI_USER_AGENT: &str = "antigravity/1.16.5 linux/amd64";
pub const CLAUDE_USER_AGENT: &str = "claude-cli/1.0 (external)";

/// Full upstream response budget.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Thinking-signature cache: one hour, well past the sticky-session TTL.
const SIGNATURE_TTL_SECS: u64 = 3600;
const SIGNATURE_CAPACITY: u64 = 16_384;

/// Aggregates the per-provider pool actors, dialect clients, and the
/// refresh machinery.
///
/// Kept as a simple struct (vs. a dynamic registry) to preserve
/// compile-time ergonomics and avoid over-abstracting too early.
#[derive(Clone)]
pub struct Providers {
    pools: HashMap<ProviderKind, PoolHandle>,
    pub kiro_cfg: Arc<KiroResolvedConfig>,
    pub gemini_cfg: Arc<GeminiResolvedConfig>,
    pub anthropic_cfg: Arc<AnthropicResolvedConfig>,
    kiro: KiroClient,
    gemini: GeminiClient,
    claude: ClaudeClient,
    pub refresher: Refresher,
    pub locks: Arc<CredentialLocks>,
}

fn build_client(user_agent: &str, proxy: Option<url::Url>, enable_multiplexing: bool) -> reqwest::Client {
    let mut headers = HeaderMap::new();

    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
        .timeout(UPSTREAM_TIMEOUT);

    if let Some(proxy_url) = proxy {
        let proxy =
            reqwest::Proxy::all(proxy_url.as_str()).expect("invalid proxy url for reqwest client");
        builder = builder.proxy(proxy);
    }

    if enable_multiplexing {
        builder = builder.http2_adaptive_window(true);
    } else {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        builder = builder
            .http1_only()
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(Duration::from_secs(0));
    }

    builder
        .default_headers(headers)
        .build()
        .expect("failed to build reqwest client")
}

impl Providers {
    pub async fn spawn(db: DbActorHandle, cfg: &Config) -> Self {
        let kiro_cfg = Arc::new(cfg.kiro());
        let gemini_cfg = Arc::new(cfg.gemini());
        let anthropic_cfg = Arc::new(cfg.anthropic());

        info!(
            strategy = ?cfg.pool.strategy,
            session_ttl_secs = cfg.pool.session_ttl_secs,
            disable_credential_lock = cfg.pool.disable_credential_lock,
            refresh_interval_secs = cfg.pool.refresh_interval_secs,
            refresh_threshold_secs = cfg.pool.refresh_threshold_secs,
            "Pool config (effective)"
        );
        info!(
            kiro_default_region = %kiro_cfg.default_region,
            kiro_oauth_tps = kiro_cfg.oauth_tps,
            kiro_model_list = ?kiro_cfg.model_list,
            "Kiro config (effective)"
        );
        info!(
            gemini_api_url = %gemini_cfg.api_url,
            gemini_oauth_tps = gemini_cfg.oauth_tps,
            gemini_model_list = ?gemini_cfg.model_list,
            "Gemini config (effective)"
        );
        info!(
            anthropic_api_url = %anthropic_cfg.api_url,
            anthropic_compat = ?anthropic_cfg.compat.keys().collect::<Vec<_>>(),
            anthropic_model_list = ?anthropic_cfg.model_list,
            "Anthropic config (effective)"
        );

        let mut pools = HashMap::new();
        for provider in ProviderKind::ALL {
            let handle = pool::actor::spawn(provider, &cfg.pool, db.clone()).await;
            pools.insert(provider, handle);
        }

        let kiro_client = build_client(
            KIRO_USER_AGENT,
            kiro_cfg.proxy.clone(),
            kiro_cfg.enable_multiplexing,
        );
        let gemini_client = build_client(
            GEMINI_USER_AGENT,
            gemini_cfg.proxy.clone(),
            gemini_cfg.enable_multiplexing,
        );
        let claude_client = build_client(
            CLAUDE_USER_AGENT,
            anthropic_cfg.proxy.clone(),
            anthropic_cfg.enable_multiplexing,
        );

        let signatures = Arc::new(SignatureCache::new(SIGNATURE_TTL_SECS, SIGNATURE_CAPACITY));

        let kiro = KiroClient::new(kiro_cfg.clone(), kiro_client);
        let gemini = GeminiClient::new(gemini_cfg.clone(), gemini_client, signatures);
        let claude = ClaudeClient::new(anthropic_cfg.clone(), claude_client);

        let refresher = Refresher::new(
            db.clone(),
            pools.clone(),
            kiro_cfg.clone(),
            gemini_cfg.clone(),
            cfg.providers.defaults.proxy.clone(),
        );

        let oauth_tps = kiro_cfg.oauth_tps.max(gemini_cfg.oauth_tps).max(1);
        spawn_sweeper(refresher.clone(), &cfg.pool, oauth_tps);
        spawn_quota_refresh(
            refresher.clone(),
            cfg.pool.refresh_interval_secs,
        );

        let locks = CredentialLocks::new(cfg.pool.disable_credential_lock);

        Self {
            pools,
            kiro_cfg,
            gemini_cfg,
            anthropic_cfg,
            kiro,
            gemini,
            claude,
            refresher,
            locks,
        }
    }

    pub fn pool(&self, provider: ProviderKind) -> &PoolHandle {
        self.pools
            .get(&provider)
            .expect("a pool actor exists for every provider kind")
    }

    pub fn pools(&self) -> &HashMap<ProviderKind, PoolHandle> {
        &self.pools
    }

    /// Dialect adapter for the given provider family.
    pub fn dispatcher(&self, provider: ProviderKind) -> Dispatcher {
        match provider {
            ProviderKind::Kiro => Dispatcher::Kiro(self.kiro.clone()),
            ProviderKind::Gemini => Dispatcher::Gemini(self.gemini.clone()),
            _ => Dispatcher::Claude(self.claude.clone()),
        }
    }

    /// Supported-model union for `/v1/models`.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .kiro_cfg
            .model_list
            .iter()
            .chain(self.gemini_cfg.model_list.iter())
            .chain(self.anthropic_cfg.model_list.iter())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Periodically refresh per-credential quota snapshots for providers that
/// expose a usage endpoint (Kiro `getUsageLimits`).
fn spawn_quota_refresh(refresher: Refresher, interval_secs: u64) {
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(Duration::from_secs(interval_secs.max(60)));
        tick.tick().await;
        loop {
            tick.tick().await;
            if let Err(e) = refresh_kiro_quotas(&refresher).await {
                warn!("kiro quota sweep failed: {}", e);
            }
        }
    });
}

async fn refresh_kiro_quotas(refresher: &Refresher) -> Result<(), GatewayError> {
    let rows = refresher.db().list_active(ProviderKind::Kiro).await?;
    let Some(pool) = refresher.pool(ProviderKind::Kiro) else {
        return Ok(());
    };

    for row in rows {
        let Some(token) = row.access_token.as_deref() else {
            continue;
        };
        match crate::providers::kiro::fetch_quota(
            refresher.kiro_cfg(),
            token,
            row.region.as_deref(),
            refresher.http(),
        )
        .await
        {
            Ok(snapshot) => pool.set_quota(row.id, snapshot),
            Err(e) => warn!(id = row.id, "quota fetch failed: {}", e),
        }
    }
    Ok(())
}
