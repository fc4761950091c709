//! Spread polling across the two markets.

use crate::config::AnalyzerConfig;
use crate::exchange::{AssetPair, MarketClient};
use crate::telemetry::Publisher;
use crate::utils::spread_pct;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/// Both last prices of one asset and the spread between them.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadSnapshot {
    pub asset: String,
    pub pair: AssetPair,
    pub future_price: Decimal,
    pub spot_price: Decimal,
    /// `(future - spot) * 100 / spot`
    pub spread: Decimal,
}

impl SpreadSnapshot {
    pub fn new(
        asset: &str,
        pair: AssetPair,
        future_price: Decimal,
        spot_price: Decimal,
    ) -> Option<Self> {
        let spread = spread_pct(future_price, spot_price)?;
        Some(Self {
            asset: asset.to_string(),
            pair,
            future_price,
            spot_price,
            spread,
        })
    }

    /// Human-readable telemetry line.
    pub fn line(&self) -> String {
        format!(
            "{} future {} spot {} spread {}%",
            self.pair,
            self.future_price,
            self.spot_price,
            self.spread.round_dp(3)
        )
    }
}

/// Reads cached prices from both markets, never waiting for a tick.
pub struct SpreadMonitor {
    future: Arc<dyn MarketClient>,
    spot: Arc<dyn MarketClient>,
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl SpreadMonitor {
    pub fn new(
        future: Arc<dyn MarketClient>,
        spot: Arc<dyn MarketClient>,
        publisher: Arc<dyn Publisher>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            future,
            spot,
            publisher,
            topic: topic.into(),
        }
    }

    /// Snapshot of one asset, or `None` while either price is unknown.
    pub async fn snapshot(&self, asset: &str, quote: &str) -> Option<SpreadSnapshot> {
        let pair = AssetPair::new(asset, quote);

        let Some(future) = self.future.get_ticker_value(&pair).await else {
            debug!(%pair, "No future price yet");
            return None;
        };
        let Some(spot) = self.spot.get_ticker_value(&pair).await else {
            debug!(%pair, "No spot price yet");
            return None;
        };

        let snapshot = SpreadSnapshot::new(asset, pair, future.last, spot.last);
        if snapshot.is_none() {
            debug!(asset, "Zero spot price, skipping");
        }
        snapshot
    }

    /// Snapshot every configured asset in name order and publish each line.
    pub async fn poll(&self, config: &AnalyzerConfig) -> Vec<SpreadSnapshot> {
        let mut snapshots = Vec::with_capacity(config.areas.len());

        for asset in config.areas.keys() {
            let Some(snapshot) = self.snapshot(asset, &config.quote).await else {
                continue;
            };

            let line = snapshot.line();
            info!(
                asset = %snapshot.asset,
                future = %snapshot.future_price,
                spot = %snapshot.spot_price,
                spread = %snapshot.spread.round_dp(3),
                "Spread"
            );
            self.publisher.publish(&self.topic, &line).await;

            snapshots.push(snapshot);
        }

        snapshots
    }
}
