use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use castor_schema::kiro::UsageLimitsResponse;

use crate::config::KiroResolvedConfig;
use crate::error::GatewayError;
use crate::pool::{ModelQuota, QuotaSnapshot};
use crate::providers::kiro::client::bearer_headers;
use crate::providers::policy::classify_upstream_error;

/// Fetch `getUsageLimits` for one credential and fold it into a quota
/// snapshot. The endpoint reports account-level windows, so the tightest
/// remaining fraction is applied to every serveable model.
pub async fn fetch_quota(
    cfg: &KiroResolvedConfig,
    access_token: &str,
    region: Option<&str>,
    client: &reqwest::Client,
) -> Result<QuotaSnapshot, GatewayError> {
    let url = cfg.usage_limits_url(region);
    let resp = client
        .post(url)
        .headers(bearer_headers(access_token)?)
        .json(&serde_json::json!({}))
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(classify_upstream_error(resp).await);
    }

    let body: UsageLimitsResponse = resp.json().await?;
    debug!(
        breakdowns = body.usage_breakdown_list.len(),
        "kiro usage limits fetched"
    );

    let mut tightest: Option<f64> = None;
    let mut reset_time: Option<DateTime<Utc>> = None;
    for breakdown in &body.usage_breakdown_list {
        if let Some(fraction) = breakdown.remaining_fraction() {
            tightest = Some(tightest.map_or(fraction, |t: f64| t.min(fraction)));
        }
        if let Some(epoch) = breakdown.next_date_reset {
            reset_time = DateTime::from_timestamp(epoch as i64, 0).or(reset_time);
        }
    }

    let mut models = BTreeMap::new();
    if let Some(fraction) = tightest {
        for model in &cfg.model_list {
            models.insert(
                model.clone(),
                ModelQuota {
                    remaining_fraction: fraction,
                    reset_time,
                },
            );
        }
    }

    Ok(QuotaSnapshot {
        models,
        fetched_at: Some(Utc::now()),
    })
}
