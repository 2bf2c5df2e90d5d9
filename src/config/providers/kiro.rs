use serde::{Deserialize, Serialize};
use url::Url;

use super::ProviderDefaults;

/// Kiro / CodeWhisperer provider configuration managed by Figment.
///
/// Refresh endpoints are region-templated: `{region}` in the templates is
/// substituted with the credential's region at call time.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KiroConfig {
    /// CodeWhisperer API host template.
    /// TOML: `providers.kiro.api_host`.
    /// Default: `https://codewhisperer.{region}.amazonaws.com`.
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// Kiro auth-service refresh endpoint template (social logins).
    /// TOML: `providers.kiro.social_refresh_host`.
    /// Default: `https://prod.{region}.auth.desktop.kiro.dev`.
    #[serde(default = "default_social_refresh_host")]
    pub social_refresh_host: String,

    /// OIDC token endpoint template (Builder ID / IAM Identity Center).
    /// TOML: `providers.kiro.oidc_host`.
    /// Default: `https://oidc.{region}.amazonaws.com`.
    #[serde(default = "default_oidc_host")]
    pub oidc_host: String,

    /// Region used when a credential does not carry one.
    /// TOML: `providers.kiro.default_region`. Default: `us-east-1`.
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Optional CodeWhisperer profile ARN attached to chat requests.
    /// TOML: `providers.kiro.profile_arn`.
    #[serde(default)]
    pub profile_arn: Option<String>,

    /// OAuth refresh requests per second for the refresh pipeline.
    /// TOML: `providers.kiro.oauth_tps`. Default: `5`.
    #[serde(default = "default_oauth_tps")]
    pub oauth_tps: usize,

    /// List of supported model names (allowlist).
    /// TOML: `providers.kiro.model_list`.
    #[serde(default = "default_model_list")]
    pub model_list: Vec<String>,

    /// Optional upstream HTTP proxy; falls back to `providers.defaults.proxy`.
    /// TOML: `providers.kiro.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Falls back to `providers.defaults.enable_multiplexing`.
    /// TOML: `providers.kiro.enable_multiplexing`.
    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    /// Falls back to `providers.defaults.retry_max_times`.
    /// TOML: `providers.kiro.retry_max_times`.
    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct KiroResolvedConfig {
    pub api_host: String,
    pub social_refresh_host: String,
    pub oidc_host: String,
    pub default_region: String,
    pub profile_arn: Option<String>,
    pub oauth_tps: usize,
    pub model_list: Vec<String>,
    pub proxy: Option<Url>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
}

impl KiroConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> KiroResolvedConfig {
        KiroResolvedConfig {
            api_host: self.api_host.clone(),
            social_refresh_host: self.social_refresh_host.clone(),
            oidc_host: self.oidc_host.clone(),
            default_region: self.default_region.clone(),
            profile_arn: self.profile_arn.clone(),
            oauth_tps: self.oauth_tps,
            model_list: self.model_list.clone(),
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
        }
    }
}

impl KiroResolvedConfig {
    fn fill_region(template: &str, region: &str) -> String {
        template.replace("{region}", region)
    }

    fn region_or_default<'a>(&'a self, region: Option<&'a str>) -> &'a str {
        region.filter(|r| !r.is_empty()).unwrap_or(&self.default_region)
    }

    /// `generateAssistantResponse` URL for a credential's region.
    pub fn assistant_response_url(&self, region: Option<&str>) -> Url {
        let host = Self::fill_region(&self.api_host, self.region_or_default(region));
        Url::parse(&format!("{host}/generateAssistantResponse"))
            .expect("kiro api_host template must produce a valid URL")
    }

    /// `getUsageLimits` URL for a credential's region.
    pub fn usage_limits_url(&self, region: Option<&str>) -> Url {
        let host = Self::fill_region(&self.api_host, self.region_or_default(region));
        Url::parse(&format!("{host}/getUsageLimits"))
            .expect("kiro api_host template must produce a valid URL")
    }

    /// `ListAvailableModels` URL for a credential's region.
    pub fn list_models_url(&self, region: Option<&str>) -> Url {
        let host = Self::fill_region(&self.api_host, self.region_or_default(region));
        Url::parse(&format!("{host}/ListAvailableModels"))
            .expect("kiro api_host template must produce a valid URL")
    }

    /// Social-login refresh URL for a credential's region.
    pub fn social_refresh_url(&self, region: Option<&str>) -> Url {
        let host = Self::fill_region(&self.social_refresh_host, self.region_or_default(region));
        Url::parse(&format!("{host}/refreshToken"))
            .expect("kiro social_refresh_host template must produce a valid URL")
    }

    /// OIDC token URL for a credential's region.
    pub fn oidc_token_url(&self, region: Option<&str>) -> Url {
        let host = Self::fill_region(&self.oidc_host, self.region_or_default(region));
        Url::parse(&format!("{host}/token"))
            .expect("kiro oidc_host template must produce a valid URL")
    }
}

impl Default for KiroConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            social_refresh_host: default_social_refresh_host(),
            oidc_host: default_oidc_host(),
            default_region: default_region(),
            profile_arn: None,
            oauth_tps: default_oauth_tps(),
            model_list: default_model_list(),
            proxy: None,
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_api_host() -> String {
    "https://codewhisperer.{region}.amazonaws.com".to_string()
}

fn default_social_refresh_host() -> String {
    "https://prod.{region}.auth.desktop.kiro.dev".to_string()
}

fn default_oidc_host() -> String {
    "https://oidc.{region}.amazonaws.com".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_oauth_tps() -> usize {
    5
}

fn default_model_list() -> Vec<String> {
    vec![
        "claude-sonnet-4-20250514".to_string(),
        "claude-sonnet-4-5-20250929".to_string(),
        "claude-haiku-4-5-20251001".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_template_substitutes_credential_region() {
        let cfg = KiroConfig::default().resolve(&ProviderDefaults::default());
        assert_eq!(
            cfg.assistant_response_url(Some("eu-west-1")).as_str(),
            "https://codewhisperer.eu-west-1.amazonaws.com/generateAssistantResponse"
        );
        assert_eq!(
            cfg.social_refresh_url(None).as_str(),
            "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"
        );
        assert_eq!(
            cfg.usage_limits_url(None).as_str(),
            "https://codewhisperer.us-east-1.amazonaws.com/getUsageLimits"
        );
        assert_eq!(
            cfg.list_models_url(None).as_str(),
            "https://codewhisperer.us-east-1.amazonaws.com/ListAvailableModels"
        );
    }

    #[test]
    fn empty_region_falls_back_to_default() {
        let cfg = KiroConfig::default().resolve(&ProviderDefaults::default());
        assert_eq!(
            cfg.oidc_token_url(Some("")).as_str(),
            "https://oidc.us-east-1.amazonaws.com/token"
        );
    }
}
