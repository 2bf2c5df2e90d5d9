use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use super::ProviderDefaults;

/// Anthropic-dialect provider configuration managed by Figment.
///
/// Covers Anthropic proper and the Claude-compatible providers (Orchids,
/// Warp, Vertex, Bedrock) that dispatch through the same Messages adapter
/// against a per-provider base URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnthropicConfig {
    /// Base URL for the Anthropic Messages API. Overridable for self-hosted
    /// or compatible gateways.
    /// TOML: `providers.anthropic.api_url`. Default: `https://api.anthropic.com`.
    #[serde(default = "default_api_url")]
    pub api_url: Url,

    /// `anthropic-version` header sent upstream.
    /// TOML: `providers.anthropic.api_version`. Default: `2023-06-01`.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Base URLs for Claude-compatible providers, keyed by provider name
    /// (`orchids`, `warp`, `vertex`, `bedrock`). A provider without an entry
    /// here cannot be dispatched.
    /// TOML: `providers.anthropic.compat`.
    #[serde(default)]
    pub compat: BTreeMap<String, Url>,

    /// List of supported model names (allowlist).
    /// TOML: `providers.anthropic.model_list`.
    #[serde(default = "default_model_list")]
    pub model_list: Vec<String>,

    /// Optional upstream HTTP proxy; falls back to `providers.defaults.proxy`.
    /// TOML: `providers.anthropic.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Falls back to `providers.defaults.enable_multiplexing`.
    /// TOML: `providers.anthropic.enable_multiplexing`.
    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    /// Falls back to `providers.defaults.retry_max_times`.
    /// TOML: `providers.anthropic.retry_max_times`.
    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AnthropicResolvedConfig {
    pub api_url: Url,
    pub api_version: String,
    pub compat: BTreeMap<String, Url>,
    pub model_list: Vec<String>,
    pub proxy: Option<Url>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
}

impl AnthropicConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> AnthropicResolvedConfig {
        AnthropicResolvedConfig {
            api_url: self.api_url.clone(),
            api_version: self.api_version.clone(),
            compat: self.compat.clone(),
            model_list: self.model_list.clone(),
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
        }
    }
}

impl AnthropicResolvedConfig {
    /// Messages endpoint for the given base.
    pub fn messages_url(base: &Url) -> Url {
        base.join("/v1/messages")
            .expect("anthropic base URL must join /v1/messages")
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_version: default_api_version(),
            compat: BTreeMap::new(),
            model_list: default_model_list(),
            proxy: None,
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_api_url() -> Url {
    Url::parse("https://api.anthropic.com").expect("default anthropic api_url must be a valid URL")
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_model_list() -> Vec<String> {
    vec![
        "claude-sonnet-4-20250514".to_string(),
        "claude-opus-4-1-20250805".to_string(),
        "claude-haiku-4-5-20251001".to_string(),
    ]
}
