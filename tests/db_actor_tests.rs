use castor::ProviderKind;
use castor::db::{ApiKeyCreate, CredentialCreate, CredentialPatch, RequestLogCreate};
use chrono::{Duration, Utc};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

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

fn kiro_credential(token: &str) -> CredentialCreate {
    CredentialCreate {
        provider: ProviderKind::Kiro,
        auth_method: castor::AuthMethod::Social,
        access_token: Some(token.to_string()),
        refresh_token: Some(format!("refresh-{token}")),
        expires_at: Some(Utc::now() + Duration::hours(1)),
        project_id: None,
        region: Some("us-east-1".to_string()),
        client_id: None,
        client_secret: None,
    }
}

#[tokio::test]
async fn credential_lives_in_exactly_one_of_pool_and_error_table() {
    let (database_url, path) = temp_database_url("quarantine");
    let db = castor::db::spawn(&database_url).await;

    let id = db.insert_credential(kiro_credential("tok-1")).await.unwrap();
    assert_eq!(db.list_active(ProviderKind::Kiro).await.unwrap().len(), 1);
    assert!(db.list_quarantined(ProviderKind::Kiro).await.unwrap().is_empty());

    // Pool -> error table.
    db.quarantine(id, "auth", Some("403 twice".to_string()))
        .await
        .unwrap();
    assert!(db.list_active(ProviderKind::Kiro).await.unwrap().is_empty());
    let quarantined = db.list_quarantined(ProviderKind::Kiro).await.unwrap();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].id, id);
    assert_eq!(quarantined[0].error_class, "auth");
    assert_eq!(quarantined[0].last_error.as_deref(), Some("403 twice"));

    // Quarantining again is a no-op, not a duplicate.
    db.quarantine(id, "auth", None).await.unwrap();
    assert_eq!(db.list_quarantined(ProviderKind::Kiro).await.unwrap().len(), 1);

    // Error table -> pool with fresh token data.
    let patch = CredentialPatch {
        access_token: Some("tok-2".to_string()),
        expires_at: Some(Utc::now() + Duration::hours(1)),
        ..CredentialPatch::default()
    };
    db.restore(id, patch).await.unwrap();

    let active = db.list_active(ProviderKind::Kiro).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, id);
    assert_eq!(active[0].access_token.as_deref(), Some("tok-2"));
    assert_eq!(active[0].error_count, 0);
    assert!(db.list_quarantined(ProviderKind::Kiro).await.unwrap().is_empty());

    cleanup(&path);
}

#[tokio::test]
async fn credential_patch_updates_counters_and_tokens() {
    let (database_url, path) = temp_database_url("patch");
    let db = castor::db::spawn(&database_url).await;

    let id = db.insert_credential(kiro_credential("tok-1")).await.unwrap();

    let now = Utc::now();
    db.patch_credential(
        id,
        CredentialPatch {
            bump_use_count: Some(1),
            last_used_at: Some(now),
            ..CredentialPatch::default()
        },
    )
    .await
    .unwrap();
    db.patch_credential(
        id,
        CredentialPatch {
            bump_use_count: Some(1),
            bump_error_count: Some(1),
            last_error: Some(Some("timeout".to_string())),
            ..CredentialPatch::default()
        },
    )
    .await
    .unwrap();

    let row = db.get_credential(id).await.unwrap();
    assert_eq!(row.use_count, 2);
    assert_eq!(row.error_count, 1);
    assert_eq!(row.last_error.as_deref(), Some("timeout"));

    // `Some(0)` resets the error counter.
    db.patch_credential(
        id,
        CredentialPatch {
            bump_error_count: Some(0),
            ..CredentialPatch::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(db.get_credential(id).await.unwrap().error_count, 0);

    cleanup(&path);
}

#[tokio::test]
async fn api_key_lookup_and_usage_windows() {
    let (database_url, path) = temp_database_url("apikeys");
    let db = castor::db::spawn(&database_url).await;

    let key_id = db
        .insert_api_key(ApiKeyCreate {
            key_hash: "hash-1".to_string(),
            key_prefix: "ck-abc1234".to_string(),
            name: Some("tester".to_string()),
            daily_limit: 10,
            ..ApiKeyCreate::default()
        })
        .await
        .unwrap();

    let found = db
        .get_api_key_by_hash("hash-1".to_string())
        .await
        .unwrap()
        .expect("key must resolve by hash");
    assert_eq!(found.id, key_id);
    assert_eq!(found.daily_limit, 10);

    assert!(db.get_api_key_by_hash("nope".to_string()).await.unwrap().is_none());

    // Three completed requests today.
    for i in 0..3 {
        db.insert_request_log(RequestLogCreate {
            request_id: format!("req-{i}"),
            api_key_id: key_id,
            ip_address: Some("10.0.0.1".to_string()),
            provider: ProviderKind::Kiro,
            credential_id: Some(1),
            model: "claude-sonnet-4-20250514".to_string(),
            stream: false,
            input_tokens: 100,
            output_tokens: 50,
            status_code: 200,
            error_message: None,
            duration_ms: 120,
            cost: 0.5,
        })
        .await
        .unwrap();
    }

    let totals = db.usage_totals(key_id).await.unwrap();
    assert_eq!(totals.daily.requests, 3);
    assert!((totals.daily.cost - 1.5).abs() < 1e-9);
    assert_eq!(totals.total.requests, 3);

    // Deactivation removes the key from hash lookup.
    db.deactivate_api_key(key_id).await.unwrap();
    assert!(db.get_api_key_by_hash("hash-1".to_string()).await.unwrap().is_none());

    cleanup(&path);
}
