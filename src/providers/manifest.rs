use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upstream provider families served by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Kiro,
    Gemini,
    Orchids,
    Warp,
    Vertex,
    Bedrock,
    Anthropic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::Kiro,
        ProviderKind::Gemini,
        ProviderKind::Orchids,
        ProviderKind::Warp,
        ProviderKind::Vertex,
        ProviderKind::Bedrock,
        ProviderKind::Anthropic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Kiro => "kiro",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Orchids => "orchids",
            ProviderKind::Warp => "warp",
            ProviderKind::Vertex => "vertex",
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    /// Providers whose upstream speaks the Anthropic Messages dialect.
    pub fn is_claude_compatible(self) -> bool {
        matches!(
            self,
            ProviderKind::Orchids
                | ProviderKind::Warp
                | ProviderKind::Vertex
                | ProviderKind::Bedrock
                | ProviderKind::Anthropic
        )
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kiro" | "codewhisperer" => Ok(ProviderKind::Kiro),
            "gemini" | "antigravity" | "gemini-antigravity" => Ok(ProviderKind::Gemini),
            "orchids" => Ok(ProviderKind::Orchids),
            "warp" => Ok(ProviderKind::Warp),
            "vertex" => Ok(ProviderKind::Vertex),
            "bedrock" => Ok(ProviderKind::Bedrock),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// How a credential's token generation is renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// Kiro auth-service refresh (Google/GitHub social logins).
    Social,
    /// AWS Builder ID via the OIDC token endpoint.
    BuilderId,
    /// IAM Identity Center via the OIDC token endpoint.
    Idc,
    /// Google OAuth refresh (Gemini Antigravity).
    Google,
    /// Warp provider refresh.
    Warp,
    /// Static secret; never refreshed.
    None,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Social => "social",
            AuthMethod::BuilderId => "builder-id",
            AuthMethod::Idc => "idc",
            AuthMethod::Google => "google",
            AuthMethod::Warp => "warp",
            AuthMethod::None => "none",
        }
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "social" => Ok(AuthMethod::Social),
            "builder-id" | "builder_id" => Ok(AuthMethod::BuilderId),
            "idc" => Ok(AuthMethod::Idc),
            "google" => Ok(AuthMethod::Google),
            "warp" => Ok(AuthMethod::Warp),
            "none" | "" => Ok(AuthMethod::None),
            other => Err(format!("unknown auth method: {other}")),
        }
    }
}

/// A selected credential handed to the dispatch path. Carries everything
/// needed to call upstream without re-reading the store.
#[derive(Debug, Clone)]
pub struct CredentialLease {
    pub id: i64,
    pub provider: ProviderKind,
    pub access_token: String,
    pub project_id: Option<String>,
    pub region: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Remaining quota fraction for the requested model at selection time.
    pub quota_remaining: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_round_trip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
    }

    #[test]
    fn claude_family_is_marked_compatible() {
        assert!(ProviderKind::Warp.is_claude_compatible());
        assert!(ProviderKind::Anthropic.is_claude_compatible());
        assert!(!ProviderKind::Kiro.is_claude_compatible());
        assert!(!ProviderKind::Gemini.is_claude_compatible());
    }
}
