use chrono::{DateTime, Utc};

use crate::db::DbActorHandle;
use crate::db::models::{DbApiKey, UsageTotals};
use crate::error::GatewayError;

/// Enforce the per-key ceilings that require store aggregation: request
/// counts and cost over the daily/monthly/total windows, plus key expiry.
/// (Concurrency and per-minute rate ride the in-memory limiter tables.)
/// A limit of zero means unlimited.
pub async fn check_key_ceilings(
    db: &DbActorHandle,
    key: &DbApiKey,
    now: DateTime<Utc>,
) -> Result<(), GatewayError> {
    if key.is_expired(now) {
        return Err(GatewayError::LimitExceeded("API key expired".to_string()));
    }

    let totals = db.usage_totals(key.id).await?;
    check_windows(key, &totals)
}

pub fn check_windows(key: &DbApiKey, totals: &UsageTotals) -> Result<(), GatewayError> {
    if key.daily_limit > 0 && totals.daily.requests >= key.daily_limit {
        return Err(GatewayError::LimitExceeded(format!(
            "Daily request limit reached ({})",
            key.daily_limit
        )));
    }
    if key.monthly_limit > 0 && totals.monthly.requests >= key.monthly_limit {
        return Err(GatewayError::LimitExceeded(format!(
            "Monthly request limit reached ({})",
            key.monthly_limit
        )));
    }
    if key.total_limit > 0 && totals.total.requests >= key.total_limit {
        return Err(GatewayError::LimitExceeded(format!(
            "Total request limit reached ({})",
            key.total_limit
        )));
    }

    if key.daily_cost_limit > 0.0 && totals.daily.cost >= key.daily_cost_limit {
        return Err(GatewayError::LimitExceeded(format!(
            "Daily cost limit reached (${:.2})",
            key.daily_cost_limit
        )));
    }
    if key.monthly_cost_limit > 0.0 && totals.monthly.cost >= key.monthly_cost_limit {
        return Err(GatewayError::LimitExceeded(format!(
            "Monthly cost limit reached (${:.2})",
            key.monthly_cost_limit
        )));
    }
    if key.total_cost_limit > 0.0 && totals.total.cost >= key.total_cost_limit {
        return Err(GatewayError::LimitExceeded(format!(
            "Total cost limit reached (${:.2})",
            key.total_cost_limit
        )));
    }

    Ok(())
}
