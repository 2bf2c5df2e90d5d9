use serde::{Deserialize, Serialize};

/// Credential selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Weighted health/bucket/quota/recency score.
    #[default]
    Hybrid,
    /// Session-id pinning with hybrid fallback.
    Sticky,
    /// Rotate by credential id.
    RoundRobin,
}

/// Pool and locking configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Selection strategy for all providers.
    /// TOML: `pool.strategy`. Default: `hybrid`.
    #[serde(default)]
    pub strategy: SelectionStrategy,

    /// Sticky-session TTL in seconds.
    /// TOML: `pool.session_ttl_secs`. Default: `1800`.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Removes per-credential request serialization. The upstream may reject
    /// concurrent use of one token; enable at your own risk.
    /// TOML: `pool.disable_credential_lock`. Default: `false`.
    #[serde(default)]
    pub disable_credential_lock: bool,

    /// Background refresh sweep interval in seconds.
    /// TOML: `pool.refresh_interval_secs`. Default: `1800`.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Tokens expiring within this window are refreshed before use.
    /// TOML: `pool.refresh_threshold_secs`. Default: `600`.
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            session_ttl_secs: default_session_ttl_secs(),
            disable_credential_lock: false,
            refresh_interval_secs: default_refresh_interval_secs(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

fn default_refresh_interval_secs() -> u64 {
    30 * 60
}

fn default_refresh_threshold_secs() -> u64 {
    10 * 60
}
