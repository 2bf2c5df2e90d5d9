use axum::{
    Router,
    extract::Request,
    http::{HeaderName, StatusCode, Version, header::USER_AGENT},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use base64::Engine as _;
use rand::RngCore;
use reqwest::header::HeaderValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::DbActorHandle;
use crate::locks::{ConcurrencySlots, RateWindows};
use crate::meter::{PricingTable, UsageMeter};
use crate::providers::Providers;
use crate::providers::manifest::ProviderKind;
use crate::relay::FailoverExecutor;
use crate::server::routes::{admin, chat, messages, models};

const MAX_REQUEST_ID_LEN: usize = 128;
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn generate_request_id() -> String {
    // 96 bits => 16 chars base64url (no padding).
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/?",
    }
}

#[derive(Clone)]
pub struct GatewayState {
    pub providers: Providers,
    pub executor: FailoverExecutor,
    pub meter: UsageMeter,
    pub slots: Arc<ConcurrencySlots>,
    pub rates: Arc<RateWindows>,
    pub db: DbActorHandle,
    pub master_key: Arc<str>,
    pub default_provider: ProviderKind,
}

impl GatewayState {
    pub fn new(providers: Providers, db: DbActorHandle, cfg: &Config) -> Self {
        let pricing = PricingTable::new(db.clone());
        pricing.spawn_sync(cfg.pricing.sync_url.clone(), cfg.pricing.sync_interval_secs);
        let meter = UsageMeter::new(db.clone(), pricing);

        let executor =
            FailoverExecutor::new(providers.clone(), cfg.pool.refresh_threshold_secs);

        let default_provider = cfg
            .basic
            .default_provider
            .parse()
            .unwrap_or(ProviderKind::Kiro);

        Self {
            providers,
            executor,
            meter,
            slots: ConcurrencySlots::new(),
            rates: Arc::new(RateWindows::new()),
            db,
            master_key: Arc::from(cfg.basic.gateway_key.as_str()),
            default_provider,
        }
    }
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn access_log(req: Request, next: Next) -> Response {
    // Capture request metadata before moving `req` into the handler stack.
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let mut resp = next.run(req).await;

    // Always reflect `x-request-id` for easier correlation, even if the
    // client didn't send one.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status();
    let latency_ms = start.elapsed().as_millis() as u64;
    let path = uri.path();
    let protocol = format_http_version(version);

    // Note: for SSE/streaming responses, `latency_ms` is time-to-first-byte
    // (handler return), not the full stream duration.
    if status.is_server_error() {
        error!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else if status.is_client_error() {
        warn!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else {
        info!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    }

    resp
}

pub fn gateway_router(state: GatewayState) -> Router {
    let data_plane = Router::new()
        .route("/v1/messages", post(messages::messages_handler))
        .route(
            "/gemini-antigravity/v1/messages",
            post(messages::antigravity_messages_handler),
        )
        .route("/v1/chat/completions", post(chat::chat_handler))
        .route("/v1/models", get(models::models_handler));

    let control_plane = Router::new()
        .route(
            "/admin/credentials:import",
            post(admin::import_credentials),
        )
        .route("/admin/keys", post(admin::mint_key).get(admin::list_keys))
        .route("/admin/keys/{id}", axum::routing::delete(admin::revoke_key));

    Router::new()
        .merge(data_plane)
        .merge(control_plane)
        .fallback(not_found_handler)
        .with_state(state)
        .layer(middleware::from_fn(access_log))
}
