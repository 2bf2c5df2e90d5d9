use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use castor_schema::exchange::TurnUsage;

use crate::db::DbActorHandle;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

/// Cache-write tokens bill at 1.25x the input price.
const CACHE_WRITE_MULTIPLIER: f64 = 1.25;
/// Cache-read tokens bill at 0.1x the input price.
const CACHE_READ_MULTIPLIER: f64 = 0.1;

/// Static price floor, used when neither the DB nor the remote sync knows
/// the model. Prefix-matched so dated variants inherit their family price.
const STATIC_PRICES: [(&str, ModelPrice); 6] = [
    ("claude-opus-4", ModelPrice { input: 15.0, output: 75.0 }),
    ("claude-sonnet-4", ModelPrice { input: 3.0, output: 15.0 }),
    ("claude-haiku-4", ModelPrice { input: 1.0, output: 5.0 }),
    ("gemini-2.5-pro", ModelPrice { input: 1.25, output: 10.0 }),
    ("gemini-2.5-flash", ModelPrice { input: 0.3, output: 2.5 }),
    ("gemini-3-pro", ModelPrice { input: 2.0, output: 12.0 }),
];

const FALLBACK_PRICE: ModelPrice = ModelPrice {
    input: 3.0,
    output: 15.0,
};

/// Remote price-list sync timeout (ancillary lookup budget).
const SYNC_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct RemotePrice {
    input: f64,
    output: f64,
}

/// Three-tier price cascade: per-model DB override, hourly remote-sync
/// cache, static defaults.
pub struct PricingTable {
    db: DbActorHandle,
    remote: RwLock<HashMap<String, ModelPrice>>,
}

impl PricingTable {
    pub fn new(db: DbActorHandle) -> Arc<Self> {
        Arc::new(Self {
            db,
            remote: RwLock::new(HashMap::new()),
        })
    }

    pub async fn price_for(&self, model: &str) -> ModelPrice {
        match self.db.price_override(model.to_string()).await {
            Ok(Some(row)) => {
                return ModelPrice {
                    input: row.input_price,
                    output: row.output_price,
                };
            }
            Ok(None) => {}
            Err(e) => warn!(model, "price override lookup failed: {}", e),
        }

        if let Some(price) = self
            .remote
            .read()
            .expect("price cache poisoned")
            .get(model)
        {
            return *price;
        }

        static_price(model)
    }

    pub async fn cost(&self, model: &str, usage: TurnUsage) -> f64 {
        let price = self.price_for(model).await;
        let per_token_in = price.input / 1_000_000.0;
        let per_token_out = price.output / 1_000_000.0;

        usage.input_tokens as f64 * per_token_in
            + usage.output_tokens as f64 * per_token_out
            + usage.cache_write_tokens as f64 * per_token_in * CACHE_WRITE_MULTIPLIER
            + usage.cache_read_tokens as f64 * per_token_in * CACHE_READ_MULTIPLIER
    }

    fn replace_remote(&self, prices: HashMap<String, ModelPrice>) {
        *self.remote.write().expect("price cache poisoned") = prices;
    }

    /// Start the hourly remote-sync task. No-op when no URL is configured.
    pub fn spawn_sync(self: &Arc<Self>, url: Option<Url>, interval_secs: u64) {
        let Some(url) = url else {
            debug!("no pricing sync_url configured; cascade is DB -> static");
            return;
        };
        let table = Arc::clone(self);
        let client = reqwest::Client::builder()
            .timeout(SYNC_TIMEOUT)
            .build()
            .expect("failed to build pricing sync HTTP client");

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(60)));
            loop {
                tick.tick().await;
                match fetch_prices(&client, &url).await {
                    Ok(prices) => {
                        info!(models = prices.len(), "price list synced");
                        table.replace_remote(prices);
                    }
                    Err(e) => warn!("price list sync failed: {}", e),
                }
            }
        });
    }
}

async fn fetch_prices(
    client: &reqwest::Client,
    url: &Url,
) -> Result<HashMap<String, ModelPrice>, reqwest::Error> {
    let raw: HashMap<String, RemotePrice> =
        client.get(url.clone()).send().await?.json().await?;
    Ok(raw
        .into_iter()
        .map(|(model, p)| {
            (
                model,
                ModelPrice {
                    input: p.input,
                    output: p.output,
                },
            )
        })
        .collect())
}

fn static_price(model: &str) -> ModelPrice {
    STATIC_PRICES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map_or(FALLBACK_PRICE, |(_, price)| *price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_prices_prefix_match_dated_variants() {
        let price = static_price("claude-sonnet-4-5-20250929");
        assert_eq!(price, ModelPrice { input: 3.0, output: 15.0 });
        assert_eq!(static_price("unknown-model"), FALLBACK_PRICE);
    }

    #[test]
    fn cache_multipliers_apply_to_input_price() {
        // 1M input at $3 + 1M cache-write at 1.25x + 1M cache-read at 0.1x.
        let usage = TurnUsage {
            input_tokens: 1_000_000,
            output_tokens: 0,
            cache_write_tokens: 1_000_000,
            cache_read_tokens: 1_000_000,
        };
        let price = static_price("claude-sonnet-4");
        let per_in = price.input / 1_000_000.0;
        let expected = usage.input_tokens as f64 * per_in
            + usage.cache_write_tokens as f64 * per_in * 1.25
            + usage.cache_read_tokens as f64 * per_in * 0.1;
        assert!((expected - (3.0 + 3.75 + 0.3)).abs() < 1e-9);
    }
}
