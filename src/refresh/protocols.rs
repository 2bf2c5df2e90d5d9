use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    Client as OAuth2Client, ClientId, ClientSecret, EmptyExtraTokenFields, RefreshToken,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::config::{GeminiResolvedConfig, KiroResolvedConfig};
use crate::db::models::DbCredential;
use crate::providers::manifest::AuthMethod;
use crate::providers::mask_upstream_message;
use crate::refresh::singleflight::{RefreshFailure, RefreshedToken};

/// Firebase secure-token endpoint used by the Warp refresh protocol; the
/// credential's `client_id` carries the API key.
const WARP_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Fallback token lifetime when the provider omits one.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

type GoogleTokenResponse = StandardTokenResponse<EmptyExtraTokenFields, BasicTokenType>;

/// Run the provider-specific refresh protocol for one credential row.
///
/// Classification: HTTP 400/401/403 (and a 2xx missing the access token)
/// are terminal for this token generation; network errors and 5xx are
/// transient and leave the credential in the pool.
pub async fn refresh_credential(
    row: &DbCredential,
    kiro_cfg: &KiroResolvedConfig,
    gemini_cfg: &GeminiResolvedConfig,
    client: &reqwest::Client,
) -> Result<RefreshedToken, RefreshFailure> {
    let refresh_token = row
        .refresh_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| RefreshFailure::Terminal("credential has no refresh token".to_string()))?;

    match row.auth_method_kind() {
        AuthMethod::Social => refresh_social(row, refresh_token, kiro_cfg, client).await,
        AuthMethod::BuilderId | AuthMethod::Idc => {
            refresh_oidc(row, refresh_token, kiro_cfg, client).await
        }
        AuthMethod::Google => refresh_google(row, refresh_token, gemini_cfg, client).await,
        AuthMethod::Warp => refresh_warp(row, refresh_token, client).await,
        AuthMethod::None => Err(RefreshFailure::Transient(
            "auth method 'none' has no refresh protocol".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocialRefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    expires_in: Option<i64>,
}

async fn refresh_social(
    row: &DbCredential,
    refresh_token: &str,
    cfg: &KiroResolvedConfig,
    client: &reqwest::Client,
) -> Result<RefreshedToken, RefreshFailure> {
    let url = cfg.social_refresh_url(row.region.as_deref());
    let resp = client
        .post(url)
        .json(&serde_json::json!({ "refreshToken": refresh_token }))
        .send()
        .await
        .map_err(transport_failure)?;

    let body: SocialRefreshResponse = read_refresh_body(resp).await?;

    let access_token = body
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RefreshFailure::Terminal("refresh response missing accessToken".to_string()))?;

    let expires_at = body
        .expires_at
        .or_else(|| body.expires_in.map(expiry_from_seconds))
        .unwrap_or_else(|| expiry_from_seconds(DEFAULT_EXPIRES_IN_SECS));

    debug!(id = row.id, "kiro social refresh completed");
    Ok(RefreshedToken {
        access_token,
        refresh_token: body.refresh_token.filter(|t| !t.is_empty()),
        expires_at: Some(expires_at),
        project_id: None,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OidcTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

async fn refresh_oidc(
    row: &DbCredential,
    refresh_token: &str,
    cfg: &KiroResolvedConfig,
    client: &reqwest::Client,
) -> Result<RefreshedToken, RefreshFailure> {
    let (Some(client_id), Some(client_secret)) = (&row.client_id, &row.client_secret) else {
        return Err(RefreshFailure::Terminal(
            "OIDC refresh requires clientId and clientSecret".to_string(),
        ));
    };

    let url = cfg.oidc_token_url(row.region.as_deref());
    let resp = client
        .post(url)
        .json(&serde_json::json!({
            "clientId": client_id,
            "clientSecret": client_secret,
            "grantType": "refresh_token",
            "refreshToken": refresh_token,
        }))
        .send()
        .await
        .map_err(transport_failure)?;

    let body: OidcTokenResponse = read_refresh_body(resp).await?;

    let access_token = body
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RefreshFailure::Terminal("refresh response missing accessToken".to_string()))?;

    debug!(id = row.id, "kiro OIDC refresh completed");
    Ok(RefreshedToken {
        access_token,
        refresh_token: body.refresh_token.filter(|t| !t.is_empty()),
        expires_at: Some(expiry_from_seconds(
            body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        )),
        project_id: None,
    })
}

async fn refresh_google(
    row: &DbCredential,
    refresh_token: &str,
    cfg: &GeminiResolvedConfig,
    client: &reqwest::Client,
) -> Result<RefreshedToken, RefreshFailure> {
    // Per-credential OAuth client parameters win over the built-in pair.
    let client_id = row
        .client_id
        .clone()
        .unwrap_or_else(|| cfg.oauth_client_id.clone());
    let client_secret = row
        .client_secret
        .clone()
        .unwrap_or_else(|| cfg.oauth_client_secret.clone());

    let token_url = TokenUrl::new(cfg.oauth_token_url.to_string())
        .map_err(|e| RefreshFailure::Transient(format!("invalid token url: {e}")))?;

    let oauth = OAuth2Client::<
        BasicErrorResponse,
        GoogleTokenResponse,
        BasicTokenIntrospectionResponse,
        StandardRevocableToken,
        BasicRevocationErrorResponse,
    >::new(ClientId::new(client_id))
    .set_client_secret(ClientSecret::new(client_secret))
    .set_token_uri(token_url);

    let token = oauth
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(client)
        .await
        .map_err(|err| match err {
            // The authorization server refused the grant; this token
            // generation is over.
            oauth2::RequestTokenError::ServerResponse(resp) => {
                RefreshFailure::Terminal(resp.to_string())
            }
            other => RefreshFailure::Transient(other.to_string()),
        })?;

    let expires_in = token
        .expires_in()
        .map_or(DEFAULT_EXPIRES_IN_SECS, |d| d.as_secs() as i64);

    debug!(id = row.id, "google oauth refresh completed");
    Ok(RefreshedToken {
        access_token: token.access_token().secret().to_string(),
        refresh_token: token.refresh_token().map(|t| t.secret().to_string()),
        expires_at: Some(expiry_from_seconds(expires_in)),
        project_id: None,
    })
}

#[derive(Debug, Deserialize)]
struct WarpTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

async fn refresh_warp(
    row: &DbCredential,
    refresh_token: &str,
    client: &reqwest::Client,
) -> Result<RefreshedToken, RefreshFailure> {
    let api_key = row.client_id.as_deref().ok_or_else(|| {
        RefreshFailure::Terminal("warp refresh requires an API key in clientId".to_string())
    })?;

    let resp = client
        .post(WARP_TOKEN_URL)
        .query(&[("key", api_key)])
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await
        .map_err(transport_failure)?;

    let body: WarpTokenResponse = read_refresh_body(resp).await?;

    let access_token = body
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RefreshFailure::Terminal("refresh response missing access_token".to_string()))?;

    let expires_in = body
        .expires_in
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    debug!(id = row.id, "warp refresh completed");
    Ok(RefreshedToken {
        access_token,
        refresh_token: body.refresh_token.filter(|t| !t.is_empty()),
        expires_at: Some(expiry_from_seconds(expires_in)),
        project_id: None,
    })
}

fn expiry_from_seconds(secs: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(secs.max(1))
}

fn transport_failure(err: reqwest::Error) -> RefreshFailure {
    RefreshFailure::Transient(err.to_string())
}

/// Read a refresh response, mapping the status to the failure taxonomy
/// before attempting to parse the body.
async fn read_refresh_body<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, RefreshFailure> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| RefreshFailure::Transient(format!("invalid refresh response: {e}")));
    }

    let body = resp.text().await.unwrap_or_default();
    let message = mask_upstream_message(&body);
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
            RefreshFailure::Terminal(format!("refresh rejected ({status}): {message}")),
        ),
        _ => Err(RefreshFailure::Transient(format!(
            "refresh failed ({status}): {message}"
        ))),
    }
}
