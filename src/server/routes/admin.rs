use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::patch::{ApiKeyCreate, CredentialCreate};
use crate::error::ErrorBody;
use crate::providers::manifest::{AuthMethod, ProviderKind};
use crate::server::guards::auth::{RequireMasterKey, hash_secret};
use crate::server::router::GatewayState;

const KEY_PREFIX_LEN: usize = 10;

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new("invalid_request_error", message)),
    )
        .into_response()
}

fn internal(message: impl Into<String>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new("api_error", message)),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub provider: String,
    pub credentials: Vec<ImportSeed>,
}

/// 0-trust credential seed: the refresher validates it (and discovers the
/// Gemini project) before the credential serves traffic.
#[derive(Debug, Deserialize)]
pub struct ImportSeed {
    #[serde(default)]
    pub auth_method: Option<String>,
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub accepted: Vec<i64>,
}

fn default_auth_method(provider: ProviderKind) -> AuthMethod {
    match provider {
        ProviderKind::Kiro => AuthMethod::Social,
        ProviderKind::Gemini => AuthMethod::Google,
        ProviderKind::Warp => AuthMethod::Warp,
        _ => AuthMethod::None,
    }
}

/// `POST /admin/credentials:import`: insert seeds and kick off validation
/// refreshes; each seed only joins the pool once its refresh succeeds.
pub async fn import_credentials(
    State(state): State<GatewayState>,
    RequireMasterKey: RequireMasterKey,
    Json(body): Json<ImportRequest>,
) -> Response {
    let Ok(provider) = body.provider.parse::<ProviderKind>() else {
        return bad_request(format!("unknown provider: {}", body.provider));
    };
    if body.credentials.is_empty() {
        return bad_request("credentials must be non-empty");
    }

    let mut accepted = Vec::new();
    for seed in body.credentials {
        if seed.refresh_token.trim().is_empty() {
            continue;
        }
        let auth_method = seed
            .auth_method
            .as_deref()
            .and_then(|m| m.parse::<AuthMethod>().ok())
            .unwrap_or_else(|| default_auth_method(provider));

        let create = CredentialCreate {
            provider,
            auth_method,
            access_token: seed.access_token,
            refresh_token: Some(seed.refresh_token),
            expires_at: None,
            project_id: seed.project_id,
            region: seed.region,
            client_id: seed.client_id,
            client_secret: seed.client_secret,
        };

        match state.db.insert_credential(create).await {
            Ok(id) => {
                accepted.push(id);
                spawn_activation(&state, provider, id);
            }
            Err(e) => {
                warn!(provider = %provider, "credential insert failed: {}", e);
            }
        }
    }

    info!(provider = %provider, count = accepted.len(), "credential import accepted");
    (StatusCode::ACCEPTED, Json(ImportResponse { accepted })).into_response()
}

/// Validate a seed via the refresher; on success the credential joins the
/// in-memory pool. A terminal refusal leaves it quarantined.
fn spawn_activation(state: &GatewayState, provider: ProviderKind, id: i64) {
    let refresher = state.providers.refresher.clone();
    let pool = state.providers.pool(provider).clone();
    let db = state.db.clone();
    tokio::spawn(async move {
        match refresher.refresh(id).await {
            Ok(_) => match db.get_credential(id).await {
                Ok(row) => pool.add_credential(row),
                Err(e) => warn!(id, "activation read-back failed: {}", e),
            },
            Err(e) => warn!(id, "seed validation failed: {}", e),
        }
    });
}

#[derive(Debug, Deserialize, Default)]
pub struct MintKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub daily_limit: i64,
    #[serde(default)]
    pub monthly_limit: i64,
    #[serde(default)]
    pub total_limit: i64,
    #[serde(default)]
    pub daily_cost_limit: f64,
    #[serde(default)]
    pub monthly_cost_limit: f64,
    #[serde(default)]
    pub total_cost_limit: f64,
    #[serde(default)]
    pub concurrent_limit: i64,
    #[serde(default)]
    pub rate_limit: i64,
    #[serde(default)]
    pub expires_in_days: i64,
}

#[derive(Debug, Serialize)]
pub struct MintKeyResponse {
    pub id: i64,
    /// The full secret; shown exactly once.
    pub key: String,
    pub key_prefix: String,
}

fn generate_key_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!(
        "ck-{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// `POST /admin/keys`: mint a key; the store keeps only the hash and the
/// display prefix.
pub async fn mint_key(
    State(state): State<GatewayState>,
    RequireMasterKey: RequireMasterKey,
    Json(body): Json<MintKeyRequest>,
) -> Response {
    let secret = generate_key_secret();
    let key_prefix: String = secret.chars().take(KEY_PREFIX_LEN).collect();

    let create = ApiKeyCreate {
        key_hash: hash_secret(&secret),
        key_prefix: key_prefix.clone(),
        name: body.name,
        daily_limit: body.daily_limit,
        monthly_limit: body.monthly_limit,
        total_limit: body.total_limit,
        daily_cost_limit: body.daily_cost_limit,
        monthly_cost_limit: body.monthly_cost_limit,
        total_cost_limit: body.total_cost_limit,
        concurrent_limit: body.concurrent_limit,
        rate_limit: body.rate_limit,
        expires_in_days: body.expires_in_days,
    };

    match state.db.insert_api_key(create).await {
        Ok(id) => {
            info!(id, %key_prefix, "api key minted");
            (
                StatusCode::CREATED,
                Json(MintKeyResponse {
                    id,
                    key: secret,
                    key_prefix,
                }),
            )
                .into_response()
        }
        Err(e) => internal(format!("key insert failed: {e}")),
    }
}

#[derive(Debug, Serialize)]
pub struct KeySummary {
    pub id: i64,
    pub key_prefix: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// `GET /admin/keys`: prefixes only, never hashes.
pub async fn list_keys(
    State(state): State<GatewayState>,
    RequireMasterKey: RequireMasterKey,
) -> Response {
    match state.db.list_api_keys().await {
        Ok(keys) => {
            let summaries: Vec<KeySummary> = keys
                .into_iter()
                .map(|k| KeySummary {
                    id: k.id,
                    key_prefix: k.key_prefix,
                    name: k.name,
                    is_active: k.is_active,
                    created_at: k.created_at,
                })
                .collect();
            Json(summaries).into_response()
        }
        Err(e) => internal(format!("key listing failed: {e}")),
    }
}

/// `DELETE /admin/keys/{id}`: deactivate; rows are kept for log joins.
pub async fn revoke_key(
    State(state): State<GatewayState>,
    RequireMasterKey: RequireMasterKey,
    Path(id): Path<i64>,
) -> Response {
    match state.db.deactivate_api_key(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal(format!("key revoke failed: {e}")),
    }
}
