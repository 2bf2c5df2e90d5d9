use castor::config::PoolConfig;
use castor::db::CredentialCreate;
use castor::pool::{AcquireRequest, RequestOutcome};
use castor::{AuthMethod, ProviderKind};
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

fn credential(token: &str) -> CredentialCreate {
    CredentialCreate {
        provider: ProviderKind::Kiro,
        auth_method: AuthMethod::Social,
        access_token: Some(token.to_string()),
        refresh_token: Some(format!("refresh-{token}")),
        expires_at: Some(Utc::now() + Duration::hours(1)),
        project_id: None,
        region: None,
        client_id: None,
        client_secret: None,
    }
}

fn acquire_request(exclude: Vec<i64>) -> AcquireRequest {
    AcquireRequest {
        model: "claude-sonnet-4-20250514".to_string(),
        session_id: None,
        exclude,
    }
}

async fn wait_for_pool_size(
    pool: &castor::pool::PoolHandle,
    expected: usize,
) -> bool {
    for _ in 0..50 {
        if pool.pool_size().await.unwrap() == expected {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn acquire_honors_exclusions_and_reports_leases() {
    let (database_url, path) = temp_database_url("pool-acquire");
    let db = castor::db::spawn(&database_url).await;

    let id_a = db.insert_credential(credential("tok-a")).await.unwrap();
    let id_b = db.insert_credential(credential("tok-b")).await.unwrap();

    let pool = castor::pool::actor::spawn(
        ProviderKind::Kiro,
        &PoolConfig::default(),
        db.clone(),
    )
    .await;

    assert_eq!(pool.pool_size().await.unwrap(), 2);

    let lease = pool
        .acquire(acquire_request(vec![id_a]))
        .await
        .unwrap()
        .expect("one candidate remains");
    assert_eq!(lease.id, id_b);
    assert_eq!(lease.access_token, "tok-b");

    // Excluding the whole pool still yields a best-effort lease.
    let lease = pool
        .acquire(acquire_request(vec![id_a, id_b]))
        .await
        .unwrap()
        .expect("exclusion fallback");
    assert!(lease.id == id_a || lease.id == id_b);

    cleanup(&path);
}

#[tokio::test]
async fn rate_limited_credential_sits_out_its_pause() {
    let (database_url, path) = temp_database_url("pool-ratelimit");
    let db = castor::db::spawn(&database_url).await;

    let id_a = db.insert_credential(credential("tok-a")).await.unwrap();
    let id_b = db.insert_credential(credential("tok-b")).await.unwrap();

    let pool = castor::pool::actor::spawn(
        ProviderKind::Kiro,
        &PoolConfig::default(),
        db.clone(),
    )
    .await;
    assert!(wait_for_pool_size(&pool, 2).await);

    pool.report_outcome(id_a, RequestOutcome::RateLimited);

    // Reports are casts; give the actor a beat to apply them.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    for _ in 0..5 {
        let lease = pool
            .acquire(acquire_request(vec![]))
            .await
            .unwrap()
            .expect("the healthy credential serves");
        assert_eq!(lease.id, id_b);
    }

    cleanup(&path);
}

#[tokio::test]
async fn second_auth_failure_quarantines_the_credential() {
    let (database_url, path) = temp_database_url("pool-quarantine");
    let db = castor::db::spawn(&database_url).await;

    let id_a = db.insert_credential(credential("tok-a")).await.unwrap();
    let _id_b = db.insert_credential(credential("tok-b")).await.unwrap();

    let pool = castor::pool::actor::spawn(
        ProviderKind::Kiro,
        &PoolConfig::default(),
        db.clone(),
    )
    .await;
    assert!(wait_for_pool_size(&pool, 2).await);

    pool.report_outcome(
        id_a,
        RequestOutcome::AuthFailure {
            message: "403 AccessDenied".to_string(),
        },
    );
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(pool.pool_size().await.unwrap(), 2, "first 403 only penalizes");

    pool.report_outcome(
        id_a,
        RequestOutcome::AuthFailure {
            message: "403 AccessDenied".to_string(),
        },
    );
    assert!(
        wait_for_pool_size(&pool, 1).await,
        "second 403 removes the credential from the pool"
    );

    // The row moved to the error table.
    for _ in 0..50 {
        if !db
            .list_quarantined(ProviderKind::Kiro)
            .await
            .unwrap()
            .is_empty()
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let quarantined = db.list_quarantined(ProviderKind::Kiro).await.unwrap();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].id, id_a);

    // Subsequent requests only see the remaining pool.
    let lease = pool
        .acquire(acquire_request(vec![]))
        .await
        .unwrap()
        .expect("survivor serves");
    assert_ne!(lease.id, id_a);

    cleanup(&path);
}

#[tokio::test]
async fn success_resets_the_auth_failure_streak() {
    let (database_url, path) = temp_database_url("pool-streak");
    let db = castor::db::spawn(&database_url).await;

    let id = db.insert_credential(credential("tok-a")).await.unwrap();
    let pool = castor::pool::actor::spawn(
        ProviderKind::Kiro,
        &PoolConfig::default(),
        db.clone(),
    )
    .await;
    assert!(wait_for_pool_size(&pool, 1).await);

    pool.report_outcome(
        id,
        RequestOutcome::AuthFailure {
            message: "401".to_string(),
        },
    );
    pool.report_outcome(id, RequestOutcome::Success);
    pool.report_outcome(
        id,
        RequestOutcome::AuthFailure {
            message: "401".to_string(),
        },
    );
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    // Interleaved success broke the streak; still one failure away.
    assert_eq!(pool.pool_size().await.unwrap(), 1);

    cleanup(&path);
}
