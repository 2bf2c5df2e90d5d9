pub mod admin;
pub mod chat;
pub mod messages;
pub mod models;

use axum::http::HeaderMap;
use chrono::Utc;
use uuid::Uuid;

use castor_schema::exchange::{CompletedTurn, MessagePart, TurnUsage};

use crate::error::GatewayError;
use crate::locks::SlotGuard;
use crate::meter::{check_key_ceilings, estimate_tokens};
use crate::providers::manifest::ProviderKind;
use crate::server::guards::auth::AuthedKey;
use crate::server::router::GatewayState;

const MODEL_PROVIDER_HEADER: &str = "model-provider";

/// Resolve the serving provider: explicit header wins, then the model-name
/// prefix, then the configured default.
pub fn route_provider(headers: &HeaderMap, model: &str, default: ProviderKind) -> ProviderKind {
    if let Some(kind) = headers
        .get(MODEL_PROVIDER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<ProviderKind>().ok())
    {
        return kind;
    }

    if model.starts_with("gemini") {
        return ProviderKind::Gemini;
    }
    if model.starts_with("claude") {
        // Any claude-family provider can serve these; the default wins
        // unless it cannot speak the dialect.
        return if default == ProviderKind::Gemini {
            ProviderKind::Kiro
        } else {
            default
        };
    }
    default
}

/// Per-request bookkeeping that survives until the response completes.
pub struct Preflight {
    pub slot: Option<SlotGuard>,
    pub request_id: String,
}

/// Limit pre-checks in request order: per-minute rate, store-backed
/// ceilings, then the atomic concurrent-slot acquire. Failing any check
/// rejects before a credential is ever touched.
pub async fn preflight(
    state: &GatewayState,
    auth: &AuthedKey,
    headers: &HeaderMap,
) -> Result<Preflight, GatewayError> {
    let now = Utc::now();
    let key = &auth.key;

    let rate_limit = u32::try_from(key.rate_limit).unwrap_or(0);
    if !state.rates.check(key.id, rate_limit, now) {
        return Err(GatewayError::LimitExceeded(format!(
            "Rate limit reached ({} requests per minute)",
            key.rate_limit
        )));
    }

    check_key_ceilings(&state.db, key, now).await?;

    let concurrent_limit = u32::try_from(key.concurrent_limit).unwrap_or(0);
    let slot = state
        .slots
        .try_acquire(key.id, &auth.client_ip, concurrent_limit)
        .ok_or_else(|| {
            GatewayError::LimitExceeded(format!(
                "Concurrent request limit reached ({})",
                key.concurrent_limit
            ))
        })?;

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    Ok(Preflight {
        slot: Some(slot),
        request_id,
    })
}

/// Fill in estimates for token counts the upstream did not report.
pub fn resolve_usage(turn: &CompletedTurn, input_estimate: u64) -> TurnUsage {
    let mut usage = turn.usage;
    if usage.input_tokens == 0 {
        usage.input_tokens = input_estimate;
    }
    if usage.output_tokens == 0 {
        let chars: u64 = turn
            .parts
            .iter()
            .map(|part| match part {
                MessagePart::Text { text } | MessagePart::Thinking { text, .. } => {
                    text.chars().count() as u64
                }
                MessagePart::ToolUse { input, .. } => input.to_string().chars().count() as u64,
                MessagePart::ToolResult { .. } => 0,
            })
            .sum();
        usage.output_tokens = estimate_tokens(chars);
    }
    usage
}
