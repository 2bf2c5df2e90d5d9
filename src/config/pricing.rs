use serde::{Deserialize, Serialize};
use url::Url;

/// Pricing cascade configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingConfig {
    /// Public price-list endpoint for the remote-sync tier. When unset the
    /// cascade is DB override -> static defaults only.
    /// TOML: `pricing.sync_url`.
    #[serde(default)]
    pub sync_url: Option<Url>,

    /// Remote price-list sync interval in seconds.
    /// TOML: `pricing.sync_interval_secs`. Default: `3600`.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            sync_url: None,
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

fn default_sync_interval_secs() -> u64 {
    3600
}
