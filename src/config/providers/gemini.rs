use serde::{Deserialize, Serialize};
use url::Url;

use super::ProviderDefaults;

/// Gemini Antigravity provider configuration managed by Figment.
///
/// OAuth endpoints and client credentials are fixed to built-in defaults;
/// only the API surface and pipeline knobs are configurable.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeminiConfig {
    /// Base API URL for the Antigravity upstream.
    /// TOML: `providers.gemini.api_url`.
    /// Default: `https://daily-cloudcode-pa.googleapis.com`.
    #[serde(default = "default_api_url")]
    pub api_url: Url,

    /// OAuth refresh requests per second for the refresh pipeline.
    /// TOML: `providers.gemini.oauth_tps`. Default: `5`.
    #[serde(default = "default_oauth_tps")]
    pub oauth_tps: usize,

    /// List of supported model names (allowlist).
    /// TOML: `providers.gemini.model_list`.
    #[serde(default = "default_model_list")]
    pub model_list: Vec<String>,

    /// Optional upstream HTTP proxy; falls back to `providers.defaults.proxy`.
    /// TOML: `providers.gemini.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Falls back to `providers.defaults.enable_multiplexing`.
    /// TOML: `providers.gemini.enable_multiplexing`.
    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    /// Falls back to `providers.defaults.retry_max_times`.
    /// TOML: `providers.gemini.retry_max_times`.
    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GeminiResolvedConfig {
    pub api_url: Url,
    pub oauth_tps: usize,
    pub model_list: Vec<String>,
    pub proxy: Option<Url>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub oauth_token_url: Url,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
}

impl GeminiConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> GeminiResolvedConfig {
        GeminiResolvedConfig {
            api_url: self.api_url.clone(),
            oauth_tps: self.oauth_tps,
            model_list: self.model_list.clone(),
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            oauth_token_url: default_oauth_token_url(),
            oauth_client_id: default_oauth_client_id(),
            oauth_client_secret: default_oauth_client_secret(),
        }
    }
}

impl GeminiResolvedConfig {
    fn endpoint(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self
            .api_url
            .join(path)
            .expect("gemini api_url must join endpoint paths");
        url.set_query(query);
        url
    }

    pub fn stream_generate_url(&self) -> Url {
        self.endpoint("/v1internal:streamGenerateContent", Some("alt=sse"))
    }

    pub fn generate_url(&self) -> Url {
        self.endpoint("/v1internal:generateContent", None)
    }

    pub fn load_code_assist_url(&self) -> Url {
        self.endpoint("/v1internal:loadCodeAssist", None)
    }

    pub fn onboard_user_url(&self) -> Url {
        self.endpoint("/v1internal:onboardUser", None)
    }

    pub fn fetch_models_url(&self) -> Url {
        self.endpoint("/v1internal:fetchAvailableModels", None)
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            oauth_tps: default_oauth_tps(),
            model_list: default_model_list(),
            proxy: None,
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_api_url() -> Url {
    Url::parse("https://daily-cloudcode-pa.googleapis.com")
        .expect("default gemini api_url must be a valid URL")
}

fn default_oauth_tps() -> usize {
    5
}

fn default_model_list() -> Vec<String> {
    vec![
        "gemini-2.5-pro".to_string(),
        "gemini-2.5-flash".to_string(),
        "gemini-3-pro-preview".to_string(),
    ]
}

fn default_oauth_token_url() -> Url {
    Url::parse("https://oauth2.googleapis.com/token")
        .expect("default oauth_token_url must be a valid URL")
}

fn default_oauth_client_id() -> String {
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com".to_string()
}

fn default_oauth_client_secret() -> String {
    "d-FL95Q19q7MQmFpd7hHD0Ty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_use_expected_literals() {
        let cfg = GeminiConfig::default().resolve(&ProviderDefaults::default());
        assert_eq!(
            cfg.stream_generate_url().as_str(),
            "https://daily-cloudcode-pa.googleapis.com/v1internal:streamGenerateContent?alt=sse"
        );
        assert_eq!(
            cfg.load_code_assist_url().as_str(),
            "https://daily-cloudcode-pa.googleapis.com/v1internal:loadCodeAssist"
        );
        assert_eq!(
            cfg.onboard_user_url().as_str(),
            "https://daily-cloudcode-pa.googleapis.com/v1internal:onboardUser"
        );
        assert_eq!(
            cfg.fetch_models_url().as_str(),
            "https://daily-cloudcode-pa.googleapis.com/v1internal:fetchAvailableModels"
        );
    }
}
