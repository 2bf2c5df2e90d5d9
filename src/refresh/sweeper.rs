use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::StreamExt;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::providers::manifest::ProviderKind;
use crate::refresh::Refresher;

/// Spawn the periodic refresh sweep.
///
/// Each tick walks every provider's active pool and refreshes credentials
/// whose expiry falls inside the threshold window (`expires_at = NULL` is
/// never swept), then retries quarantined credentials that still hold a
/// refresh token. Jobs run through a governor rate limiter with bounded
/// concurrency so a large pool cannot stampede the OAuth endpoints.
pub fn spawn_sweeper(refresher: Refresher, cfg: &PoolConfig, oauth_tps: usize) -> JoinHandle<()> {
    let interval = Duration::from_secs(cfg.refresh_interval_secs.max(1));
    let threshold = ChronoDuration::seconds(
        i64::try_from(cfg.refresh_threshold_secs).unwrap_or(600),
    );
    let tps = oauth_tps.max(1);

    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            threshold_secs = threshold.num_seconds(),
            oauth_tps = tps,
            "refresh sweeper started"
        );

        let mut tick = tokio::time::interval(interval);
        tick.tick().await;
        loop {
            tick.tick().await;
            sweep_once(&refresher, threshold, tps).await;
        }
    })
}

pub async fn sweep_once(refresher: &Refresher, threshold: ChronoDuration, tps: usize) {
    let tps_u32 = u32::try_from(tps).unwrap_or(u32::MAX).max(1);
    let limiter = Arc::new(RateLimiter::direct(
        Quota::per_second(NonZeroU32::new(tps_u32).expect("tps is at least 1"))
            .allow_burst(NonZeroU32::new(tps_u32.saturating_mul(2).max(1)).expect("burst >= 1")),
    ));
    let concurrency = tps.saturating_mul(2).max(1);
    let deadline = Utc::now() + threshold;

    let mut due: Vec<i64> = Vec::new();
    let mut restorable = Vec::new();

    for provider in ProviderKind::ALL {
        match refresher.db().list_active(provider).await {
            Ok(rows) => {
                due.extend(
                    rows.iter()
                        .filter(|row| row.expires_at.is_some_and(|t| t <= deadline))
                        .map(|row| row.id),
                );
            }
            Err(e) => warn!(provider = %provider, "sweep listing failed: {}", e),
        }

        match refresher.db().list_quarantined(provider).await {
            Ok(rows) => restorable.extend(rows),
            Err(e) => warn!(provider = %provider, "quarantine listing failed: {}", e),
        }
    }

    if due.is_empty() && restorable.is_empty() {
        debug!("refresh sweep: nothing due");
        return;
    }
    info!(
        due = due.len(),
        quarantined = restorable.len(),
        "refresh sweep starting"
    );

    let refreshes = futures::stream::iter(due)
        .map(|id| {
            let refresher = refresher.clone();
            let limiter = Arc::clone(&limiter);
            async move {
                limiter.until_ready().await;
                if let Err(e) = refresher.refresh(id).await {
                    warn!(id, "sweep refresh failed: {}", e);
                }
            }
        })
        .buffer_unordered(concurrency);
    refreshes.collect::<()>().await;

    let restores = futures::stream::iter(restorable)
        .map(|row| {
            let refresher = refresher.clone();
            let limiter = Arc::clone(&limiter);
            async move {
                limiter.until_ready().await;
                if let Err(e) = refresher.try_restore(&row).await {
                    debug!(id = row.id, "quarantine restore attempt failed: {}", e);
                }
            }
        })
        .buffer_unordered(concurrency);
    restores.collect::<()>().await;

    info!("refresh sweep finished");
}
