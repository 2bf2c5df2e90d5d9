use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use castor_schema::exchange::TurnUsage;

use crate::db::DbActorHandle;
use crate::db::patch::RequestLogCreate;
use crate::meter::pricing::PricingTable;
use crate::providers::manifest::ProviderKind;

/// Everything known about a request by the time it completes.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request_id: String,
    pub api_key_id: i64,
    pub ip_address: Option<String>,
    pub provider: ProviderKind,
    pub credential_id: Option<i64>,
    pub model: String,
    pub stream: bool,
    pub usage: TurnUsage,
    pub status_code: u16,
    pub error_message: Option<String>,
}

/// Writes one log row per completed request, with cost from the pricing
/// cascade. Streams record through `record_detached` from their terminal
/// callback.
#[derive(Clone)]
pub struct UsageMeter {
    db: DbActorHandle,
    pricing: Arc<PricingTable>,
}

impl UsageMeter {
    pub fn new(db: DbActorHandle, pricing: Arc<PricingTable>) -> Self {
        Self { db, pricing }
    }

    /// Surface a warning when the chosen credential is nearly out of quota
    /// for this model; never blocks the request.
    pub fn warn_on_critical_quota(
        &self,
        provider: ProviderKind,
        credential_id: i64,
        model: &str,
        remaining_fraction: Option<f64>,
    ) {
        if let Some(fraction) = remaining_fraction {
            if fraction <= crate::pool::quota::QUOTA_CRITICAL {
                warn!(
                    provider = %provider,
                    credential_id,
                    model,
                    remaining = fraction,
                    "credential quota critically low"
                );
            }
        }
    }

    pub async fn record(&self, record: RequestRecord, started: Instant) {
        let cost = self.pricing.cost(&record.model, record.usage).await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        debug!(
            request_id = %record.request_id,
            api_key_id = record.api_key_id,
            status = record.status_code,
            input_tokens = record.usage.input_tokens,
            output_tokens = record.usage.output_tokens,
            cost,
            duration_ms,
            "request metered"
        );

        let log = RequestLogCreate {
            request_id: record.request_id,
            api_key_id: record.api_key_id,
            ip_address: record.ip_address,
            provider: record.provider,
            credential_id: record.credential_id,
            model: record.model,
            stream: record.stream,
            input_tokens: i64::try_from(record.usage.input_tokens).unwrap_or(i64::MAX),
            output_tokens: i64::try_from(record.usage.output_tokens).unwrap_or(i64::MAX),
            status_code: record.status_code,
            error_message: record.error_message,
            duration_ms,
            cost,
        };

        if let Err(e) = self.db.insert_request_log(log).await {
            warn!("request log write failed: {}", e);
        }
    }

    /// Fire-and-forget variant for stream-terminal callbacks, which cannot
    /// await.
    pub fn record_detached(&self, record: RequestRecord, started: Instant) {
        let meter = self.clone();
        tokio::spawn(async move {
            meter.record(record, started).await;
        });
    }
}
