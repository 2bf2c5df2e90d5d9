use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use castor::ProviderKind;
use castor::db::{ApiKeyCreate, RequestLogCreate};
use castor::server::guards::auth::hash_secret;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

const TEST_SECRET: &str = "ck-test-secret";

fn temp_database_url(tag: &str) -> (String, std::path::PathBuf) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("castor-{tag}-{}-{}.sqlite", std::process::id(), nanos));
    (format!("sqlite:{}", path.display()), path)
}

fn cleanup(path: &std::path::Path) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

async fn build_app(
    database_url: &str,
    key: ApiKeyCreate,
) -> (axum::Router, castor::db::DbActorHandle, i64) {
    let db = castor::db::spawn(database_url).await;
    let key_id = db.insert_api_key(key).await.unwrap();

    let mut cfg = castor::config::Config::default();
    cfg.basic.gateway_key = "master-pwd".to_string();

    let providers = castor::providers::Providers::spawn(db.clone(), &cfg).await;
    let state = castor::server::router::GatewayState::new(providers, db.clone(), &cfg);
    (castor::server::router::gateway_router(state), db, key_id)
}

fn data_key(daily_limit: i64) -> ApiKeyCreate {
    ApiKeyCreate {
        key_hash: hash_secret(TEST_SECRET),
        key_prefix: TEST_SECRET.chars().take(10).collect(),
        daily_limit,
        ..ApiKeyCreate::default()
    }
}

fn messages_request(body: &'static str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body)).expect("failed to build request")
}

const VALID_BODY: &str = r#"{"model":"claude-sonnet-4-20250514","max_tokens":64,"messages":[{"role":"user","content":"hi"}]}"#;

#[tokio::test]
async fn messages_route_authenticates_validates_and_maps_empty_pool_to_503() {
    let (database_url, path) = temp_database_url("route-basic");
    let (app, _db, _key_id) = build_app(&database_url, data_key(0)).await;

    // 1) no key -> 401
    let resp = app
        .clone()
        .oneshot(messages_request(VALID_BODY, None))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // 2) wrong key -> 401
    let resp = app
        .clone()
        .oneshot(messages_request(VALID_BODY, Some("ck-wrong")))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // 3) correct key + invalid JSON -> 400
    let resp = app
        .clone()
        .oneshot(messages_request("not-json", Some(TEST_SECRET)))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // 4) correct key + valid body + empty pool -> 503 in the Claude
    //    error grammar.
    let resp = app
        .clone()
        .oneshot(messages_request(VALID_BODY, Some(TEST_SECRET)))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"]["type"], "overloaded_error");
    assert_eq!(parsed["error"]["message"], "No active credentials");

    cleanup(&path);
}

#[tokio::test]
async fn chat_completions_route_uses_openai_error_grammar() {
    let (database_url, path) = temp_database_url("route-openai");
    let (app, _db, _key_id) = build_app(&database_url, data_key(0)).await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {TEST_SECRET}"))
                .body(Body::from(
                    r#"{"model":"claude-sonnet-4-20250514","messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"]["type"], "server_error");

    cleanup(&path);
}

#[tokio::test]
async fn daily_request_limit_rejects_the_eleventh_request() {
    let (database_url, path) = temp_database_url("route-daily");
    let (app, db, key_id) = build_app(&database_url, data_key(10)).await;

    for i in 0..10 {
        db.insert_request_log(RequestLogCreate {
            request_id: format!("req-{i}"),
            api_key_id: key_id,
            ip_address: None,
            provider: ProviderKind::Kiro,
            credential_id: Some(1),
            model: "claude-sonnet-4-20250514".to_string(),
            stream: false,
            input_tokens: 10,
            output_tokens: 10,
            status_code: 200,
            error_message: None,
            duration_ms: 50,
            cost: 0.001,
        })
        .await
        .unwrap();
    }

    let resp = app
        .clone()
        .oneshot(messages_request(VALID_BODY, Some(TEST_SECRET)))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"]["type"], "rate_limit_error");
    assert_eq!(parsed["error"]["message"], "Daily request limit reached (10)");

    cleanup(&path);
}

#[tokio::test]
async fn models_route_merges_provider_model_lists() {
    let (database_url, path) = temp_database_url("route-models");
    let (app, _db, _key_id) = build_app(&database_url, data_key(0)).await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/models")
                .header("x-api-key", TEST_SECRET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let ids: Vec<&str> = parsed["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"gemini-2.5-pro"));
    assert!(ids.iter().any(|id| id.starts_with("claude-")));

    cleanup(&path);
}

#[tokio::test]
async fn admin_surface_requires_the_master_key() {
    let (database_url, path) = temp_database_url("route-admin");
    let (app, _db, _key_id) = build_app(&database_url, data_key(0)).await;

    // A data-plane key is not the master key.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/keys")
                .header("content-type", "application/json")
                .header("x-api-key", TEST_SECRET)
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // The master key mints a key and returns the secret exactly once.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/keys")
                .header("content-type", "application/json")
                .header("x-api-key", "master-pwd")
                .body(Body::from(r#"{"name":"ci","daily_limit":100}"#))
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let secret = parsed["key"].as_str().unwrap();
    assert!(secret.starts_with("ck-"));
    assert_eq!(
        parsed["key_prefix"].as_str().unwrap(),
        &secret[..10]
    );

    // The minted key authenticates on the data plane.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/models")
                .header("x-api-key", secret)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    cleanup(&path);
}
