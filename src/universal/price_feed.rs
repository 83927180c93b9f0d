use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::common::logger::Logger;
use crate::universal::classifier::WSOL_MINT;
use crate::universal::positions::{Position, PositionObserver};

const PRICE_API: &str = "https://api.jup.ag/price/v2";

/// One price observation for an asset, in SOL per token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub asset_id: String,
    pub price: f64,
}

impl PriceSample {
    pub fn new(asset_id: impl Into<String>, price: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            price,
        }
    }

    /// A zero, negative or non-finite price is a feed error, not a price.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Source of price samples for a changing set of assets.
///
/// Samples are delivered on the channel handed to the feed's runner, not
/// through this trait. A failed fetch produces no sample.
pub trait PriceFeed: Send + Sync {
    fn subscribe(&self, asset_id: &str);
    fn unsubscribe(&self, asset_id: &str);

    /// Forget the last price emitted for `asset_id`, so the next quote is
    /// delivered even if it has not moved.
    fn refresh(&self, _asset_id: &str) {}
}

/// Keeps a feed's subscriptions in step with the position store.
pub struct FeedSubscription {
    feed: Arc<dyn PriceFeed>,
}

impl FeedSubscription {
    pub fn new(feed: Arc<dyn PriceFeed>) -> Self {
        Self { feed }
    }
}

impl PositionObserver for FeedSubscription {
    fn on_open(&self, position: &Position) {
        self.feed.subscribe(&position.asset_id);
    }

    fn on_close(&self, asset_id: &str) {
        self.feed.unsubscribe(asset_id);
    }
}

/// Polls the Jupiter price API and converts USD quotes into SOL.
///
/// A sample is emitted only when an asset's SOL price differs from the last
/// one emitted for it, or after [`PriceFeed::refresh`] for that asset.
pub struct JupiterPriceFeed {
    client: Client,
    interval: Duration,
    /// Subscribed assets and the last price emitted for each.
    subscribed: DashMap<String, Option<f64>>,
    logger: Logger,
}

impl JupiterPriceFeed {
    pub fn new(interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build price feed http client")?;
        Ok(Self {
            client,
            interval,
            subscribed: DashMap::new(),
            logger: Logger::new("PriceFeed"),
        })
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscribed.iter().map(|e| e.key().clone()).collect()
    }

    /// Fetch one round of quotes and return the changed samples.
    pub async fn poll_once(&self) -> Result<Vec<PriceSample>> {
        let ids = self.subscriptions();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}?ids={},{}", PRICE_API, ids.join(","), WSOL_MINT);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("price request failed")?
            .error_for_status()
            .context("price request rejected")?
            .json()
            .await
            .context("price body was not json")?;

        let quotes = parse_usd_prices(&body);
        let Some(sol_usd) = quotes.get(WSOL_MINT).copied() else {
            self.logger.warn("Could not fetch SOL price");
            return Ok(Vec::new());
        };

        Ok(self.changed_samples(prices_in_sol(&quotes, sol_usd, &ids)))
    }

    /// Keep the prices that differ from the last one emitted per asset and
    /// record them as emitted.
    pub fn changed_samples(&self, prices: Vec<(String, f64)>) -> Vec<PriceSample> {
        let mut samples = Vec::new();
        for (asset_id, price) in prices {
            // Unsubscribed while the request was in flight.
            let Some(mut last) = self.subscribed.get_mut(&asset_id) else {
                continue;
            };
            if *last != Some(price) {
                *last = Some(price);
                samples.push(PriceSample::new(asset_id, price));
            }
        }
        samples
    }

    /// Poll forever, pushing samples into `tx`. Returns when the receiver is gone.
    pub async fn run(self: Arc<Self>, tx: mpsc::Sender<PriceSample>) {
        self.logger.log(format!("Polling every {:?}", self.interval));
        loop {
            let started = Instant::now();
            match self.poll_once().await {
                Ok(samples) => {
                    for sample in samples {
                        if tx.send(sample).await.is_err() {
                            self.logger.warn("Sample receiver dropped, stopping feed");
                            return;
                        }
                    }
                }
                Err(e) => self.logger.error(format!("Error fetching prices: {:#}", e)),
            }
            if let Some(wait) = self.interval.checked_sub(started.elapsed()) {
                sleep(wait).await;
            }
        }
    }
}

impl PriceFeed for JupiterPriceFeed {
    fn subscribe(&self, asset_id: &str) {
        if self.subscribed.insert(asset_id.to_string(), None).is_none() {
            self.logger.log(format!("Monitoring {}", asset_id));
        }
    }

    fn unsubscribe(&self, asset_id: &str) {
        if self.subscribed.remove(asset_id).is_some() {
            self.logger.log(format!("Stopped monitoring {}", asset_id));
        } else {
            self.logger.debug(format!("{} is not being monitored", asset_id));
        }
    }

    fn refresh(&self, asset_id: &str) {
        if let Some(mut last) = self.subscribed.get_mut(asset_id) {
            *last = None;
        }
    }
}

/// Extract `data.<mint>.price` (string or number) from a price API body.
pub fn parse_usd_prices(body: &Value) -> HashMap<String, f64> {
    let Some(data) = body.get("data").and_then(Value::as_object) else {
        return HashMap::new();
    };
    data.iter()
        .filter_map(|(mint, entry)| {
            let price = match entry.get("price")? {
                Value::String(s) => s.parse::<f64>().ok()?,
                Value::Number(n) => n.as_f64()?,
                _ => return None,
            };
            Some((mint.clone(), price))
        })
        .collect()
}

/// Convert USD quotes for `ids` into SOL; assets without a usable quote are omitted.
pub fn prices_in_sol(quotes: &HashMap<String, f64>, sol_usd: f64, ids: &[String]) -> Vec<(String, f64)> {
    if !(sol_usd.is_finite() && sol_usd > 0.0) {
        return Vec::new();
    }
    ids.iter()
        .filter_map(|id| {
            let price = quotes.get(id)? / sol_usd;
            (price.is_finite() && price > 0.0).then(|| (id.clone(), price))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_and_numeric_prices() {
        let body = json!({
            "data": {
                "mintA": { "id": "mintA", "price": "0.5" },
                "mintB": { "id": "mintB", "price": 2.0 },
                "mintC": null,
                WSOL_MINT: { "id": WSOL_MINT, "price": "200" }
            }
        });
        let quotes = parse_usd_prices(&body);
        assert_eq!(quotes.get("mintA"), Some(&0.5));
        assert_eq!(quotes.get("mintB"), Some(&2.0));
        assert!(!quotes.contains_key("mintC"));
        assert_eq!(quotes.get(WSOL_MINT), Some(&200.0));
    }

    #[test]
    fn converts_to_sol_and_drops_missing_or_zero() {
        let quotes: HashMap<String, f64> = [("a".to_string(), 50.0), ("b".to_string(), 0.0)]
            .into_iter()
            .collect();
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(prices_in_sol(&quotes, 200.0, &ids), vec![("a".to_string(), 0.25)]);
        assert!(prices_in_sol(&quotes, 0.0, &ids).is_empty());
    }

    #[test]
    fn subscriptions_follow_subscribe_and_unsubscribe() {
        let feed = JupiterPriceFeed::new(Duration::from_millis(10)).unwrap();
        feed.subscribe("a");
        feed.subscribe("a");
        feed.subscribe("b");
        feed.unsubscribe("a");
        feed.unsubscribe("missing");
        assert_eq!(feed.subscriptions(), vec!["b".to_string()]);
    }

    #[test]
    fn unchanged_price_is_suppressed_until_refreshed() {
        let feed = JupiterPriceFeed::new(Duration::from_millis(10)).unwrap();
        feed.subscribe("a");
        let quote = || vec![("a".to_string(), 0.25), ("gone".to_string(), 1.0)];

        assert_eq!(feed.changed_samples(quote()), vec![PriceSample::new("a", 0.25)]);
        assert!(feed.changed_samples(quote()).is_empty());

        feed.refresh("a");
        feed.refresh("gone");
        assert_eq!(feed.changed_samples(quote()), vec![PriceSample::new("a", 0.25)]);
        assert_eq!(feed.subscriptions(), vec!["a".to_string()]);
    }
}
