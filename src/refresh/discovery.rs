use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GeminiResolvedConfig;
use crate::error::GatewayError;

const ONBOARD_MAX_ATTEMPTS: usize = 30;
const ONBOARD_RETRY_DELAY: Duration = Duration::from_secs(2);

const CLIENT_METADATA: &str =
    r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadCodeAssistResponse {
    cloudaicompanion_project: Option<String>,
    #[serde(default)]
    allowed_tiers: Vec<AllowedTier>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowedTier {
    id: Option<String>,
    #[serde(default)]
    is_default: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnboardUserOperation {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<OnboardUserResponse>,
}

#[derive(Debug, Deserialize)]
struct OnboardUserResponse {
    #[serde(rename = "cloudaicompanionProject")]
    project: Option<ProjectIdOrObject>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProjectIdOrObject {
    String(String),
    Object { id: String },
}

impl ProjectIdOrObject {
    fn into_id(self) -> Option<String> {
        match self {
            ProjectIdOrObject::String(s) if !s.trim().is_empty() => Some(s),
            ProjectIdOrObject::Object { id } if !id.trim().is_empty() => Some(id),
            _ => None,
        }
    }
}

fn metadata() -> Value {
    serde_json::from_str(CLIENT_METADATA).expect("client metadata literal must parse")
}

async fn post_internal(
    client: &reqwest::Client,
    url: url::Url,
    access_token: &str,
    body: &Value,
) -> Result<Value, GatewayError> {
    let resp = client
        .post(url)
        .bearer_auth(access_token)
        .json(body)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(GatewayError::from_status(status, text));
    }
    Ok(resp.json::<Value>().await?)
}

/// Discover (and, if necessary, provision) the Cloud AI Companion project
/// for a Gemini credential: `loadCodeAssist`, then `onboardUser` polled
/// until the long-running operation completes.
pub async fn discover_project_id(
    cfg: &GeminiResolvedConfig,
    access_token: &str,
    client: &reqwest::Client,
) -> Result<String, GatewayError> {
    let load_json = post_internal(
        client,
        cfg.load_code_assist_url(),
        access_token,
        &json!({ "metadata": metadata() }),
    )
    .await?;
    debug!(body = %load_json, "gemini loadCodeAssist upstream body");

    let load_resp: LoadCodeAssistResponse = serde_json::from_value(load_json)?;
    if let Some(pid) = load_resp
        .cloudaicompanion_project
        .filter(|s| !s.trim().is_empty())
    {
        return Ok(pid);
    }

    let tier_id = load_resp
        .allowed_tiers
        .iter()
        .find(|t| t.is_default)
        .and_then(|t| t.id.clone())
        .unwrap_or_else(|| "LEGACY".to_string());

    onboard(cfg, access_token, &tier_id, client).await
}

async fn onboard(
    cfg: &GeminiResolvedConfig,
    access_token: &str,
    tier_id: &str,
    client: &reqwest::Client,
) -> Result<String, GatewayError> {
    let body = json!({ "tierId": tier_id, "metadata": metadata() });

    for attempt in 1..=ONBOARD_MAX_ATTEMPTS {
        let resp_json = post_internal(client, cfg.onboard_user_url(), access_token, &body).await?;
        debug!(body = %resp_json, "gemini onboardUser upstream body");

        let op: OnboardUserOperation = serde_json::from_value(resp_json)?;
        if op.done {
            return op
                .response
                .and_then(|r| r.project)
                .and_then(ProjectIdOrObject::into_id)
                .ok_or_else(|| {
                    GatewayError::Unexpected(
                        "onboarding completed but returned no project id".to_string(),
                    )
                });
        }

        if attempt < ONBOARD_MAX_ATTEMPTS {
            info!(
                "gemini onboardUser pending (attempt {}/{}), retrying in {:?}...",
                attempt, ONBOARD_MAX_ATTEMPTS, ONBOARD_RETRY_DELAY
            );
            sleep(ONBOARD_RETRY_DELAY).await;
        }
    }

    Err(GatewayError::Unexpected(
        "gemini project provisioning timed out".to_string(),
    ))
}
