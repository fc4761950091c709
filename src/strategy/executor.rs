//! Order execution for a single leg.

use crate::config::RetryPolicy;
use crate::exchange::{Market, MarketClient, ResultCode, TradeConfig, TradeResult};
use crate::persistence::PersistenceManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Drives one leg to a `TradeResult`.
///
/// Each attempt is bounded by the leg timeout. Rejections and transport
/// errors are retried per the retry policy; a timeout is final because the
/// order may still be working on the exchange.
pub struct LegExecutor {
    retry: RetryPolicy,
    leg_timeout: Duration,
    persistence: Option<Arc<PersistenceManager>>,
}

impl LegExecutor {
    pub fn new(retry: RetryPolicy, leg_timeout: Duration) -> Self {
        Self {
            retry,
            leg_timeout,
            persistence: None,
        }
    }

    /// Record submitted orders and fills in `persistence`.
    pub fn with_persistence(mut self, persistence: Arc<PersistenceManager>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Place `config` on `client` and wait for its result.
    pub async fn execute(&self, client: &dyn MarketClient, config: &TradeConfig) -> TradeResult {
        let market = client.market();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match timeout(self.leg_timeout, client.place_order(config)).await {
                Ok(result) => result,
                Err(_) => TradeResult::timeout(),
            };

            self.record(market, config, attempt, &result);

            if result.is_success() {
                info!(
                    batch = %config.batch,
                    %market,
                    pair = %config.pair,
                    trade_type = %config.trade_type,
                    filled_qty = %result.filled_qty,
                    avg_price = ?result.avg_price,
                    "Leg filled"
                );
                return result;
            }

            let retryable = result.code != ResultCode::Timeout;
            if !retryable || attempt >= max_attempts {
                warn!(
                    batch = %config.batch,
                    %market,
                    pair = %config.pair,
                    trade_type = %config.trade_type,
                    attempt,
                    %result,
                    "Leg failed"
                );
                return result;
            }

            warn!(
                batch = %config.batch,
                %market,
                attempt,
                max_attempts,
                %result,
                "Leg failed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(self.retry.backoff_ms * attempt as u64)).await;
            attempt += 1;
        }
    }

    fn record(&self, market: Market, config: &TradeConfig, attempt: u8, result: &TradeResult) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        if let Err(e) = persistence.record_order(market, config, attempt, result) {
            warn!(batch = %config.batch, %market, "Failed to record order: {:#}", e);
        }
        if result.is_success() {
            if let Err(e) = persistence.record_trade(market, config, result) {
                warn!(batch = %config.batch, %market, "Failed to record trade: {:#}", e);
            }
        }
    }
}
