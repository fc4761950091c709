//! Market client abstraction used by the hedge engine.
//!
//! One client serves one market (futures or spot). The engine only needs to:
//! - start/stop the connection and learn about its state via `MarketEvent`s
//! - subscribe to and read the latest traded price of a pair
//! - place a single order and get back a `TradeResult`

use super::types::{AssetPair, Market, MarketEvent, TickerValue, TradeConfig, TradeResult};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketClient: Send + Sync {
    /// Which market this client trades.
    fn market(&self) -> Market;

    /// Connect and report the outcome on `events`.
    ///
    /// Calling `start` again after an `Error` event reconnects.
    async fn start(&self, events: mpsc::Sender<MarketEvent>) -> Result<()>;

    /// Begin streaming the last traded price of `pair`.
    async fn subscribe_ticker(&self, pair: &AssetPair) -> Result<()>;

    /// Latest cached ticker, `None` if nothing has arrived yet.
    ///
    /// Never waits for a tick.
    async fn get_ticker_value(&self, pair: &AssetPair) -> Option<TickerValue>;

    /// Place one order. Failures are reported in the result, not as `Err`.
    async fn place_order(&self, config: &TradeConfig) -> TradeResult;

    /// Release connections and stop streams.
    async fn close(&self) -> Result<()>;
}
