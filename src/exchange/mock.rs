//! In-memory market for paper runs and tests.
//!
//! Prices are set by hand, orders fill according to a scripted queue of
//! outcomes (default: fill everything at the reference price), and every
//! submitted order is logged so tests can assert exactly what was sent.

use super::types::*;
use super::MarketClient;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// How the next order on a mock market resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    /// Fill the full quantity at the order's reference price
    Fill,
    /// Fill the full quantity at a given price
    FillAt(Decimal),
    /// Fill at most this quantity at the reference price
    FillQty(Decimal),
    /// Refuse the order
    Reject(String),
    /// Never answer
    Hang,
}

/// Simulated market for one of the two legs.
pub struct MockMarketClient {
    market: Market,
    prices: RwLock<HashMap<AssetPair, TickerValue>>,
    /// Scripted outcomes with the latency before each resolves
    outcomes: RwLock<VecDeque<(MockOutcome, Duration)>>,
    orders: RwLock<Vec<TradeConfig>>,
    /// Signed net quantity per pair (positive = long)
    positions: RwLock<HashMap<AssetPair, Decimal>>,
    subscriptions: RwLock<HashSet<AssetPair>>,
    fail_connect: AtomicBool,
    closed: AtomicBool,
    starts: AtomicU64,
}

impl MockMarketClient {
    pub fn new(market: Market) -> Self {
        Self {
            market,
            prices: RwLock::new(HashMap::new()),
            outcomes: RwLock::new(VecDeque::new()),
            orders: RwLock::new(Vec::new()),
            positions: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashSet::new()),
            fail_connect: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            starts: AtomicU64::new(0),
        }
    }

    /// Set the last traded price of a pair.
    pub async fn set_price(&self, pair: &AssetPair, last: Decimal) {
        let value = TickerValue {
            last,
            event_time: chrono::Utc::now().timestamp_millis(),
        };
        self.prices.write().await.insert(pair.clone(), value);
    }

    /// Forget the price of a pair, as if no tick had arrived yet.
    pub async fn clear_price(&self, pair: &AssetPair) {
        self.prices.write().await.remove(pair);
    }

    /// Queue the outcome of the next order.
    pub async fn push_outcome(&self, outcome: MockOutcome) {
        self.push_outcome_after(outcome, Duration::ZERO).await;
    }

    /// Queue the outcome of the next order, resolved after `delay`.
    pub async fn push_outcome_after(&self, outcome: MockOutcome, delay: Duration) {
        self.outcomes.write().await.push_back((outcome, delay));
    }

    /// Make the next `start` calls report a connection error.
    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Every order submitted so far, in submission order.
    pub async fn orders(&self) -> Vec<TradeConfig> {
        self.orders.read().await.clone()
    }

    /// Net filled quantity of a pair.
    pub async fn net_position(&self, pair: &AssetPair) -> Decimal {
        self.positions
            .read()
            .await
            .get(pair)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn is_subscribed(&self, pair: &AssetPair) -> bool {
        self.subscriptions.read().await.contains(pair)
    }

    pub fn start_count(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketClient for MockMarketClient {
    fn market(&self) -> Market {
        self.market
    }

    async fn start(&self, events: mpsc::Sender<MarketEvent>) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);

        if self.fail_connect.load(Ordering::SeqCst) {
            let _ = events
                .send(MarketEvent::Error(self.market, "mock connect failure".to_string()))
                .await;
            anyhow::bail!("mock connect failure");
        }

        let _ = events.send(MarketEvent::Connected(self.market)).await;
        debug!(market = %self.market, "Mock market connected");
        Ok(())
    }

    async fn subscribe_ticker(&self, pair: &AssetPair) -> Result<()> {
        self.subscriptions.write().await.insert(pair.clone());
        Ok(())
    }

    async fn get_ticker_value(&self, pair: &AssetPair) -> Option<TickerValue> {
        self.prices.read().await.get(pair).copied()
    }

    async fn place_order(&self, config: &TradeConfig) -> TradeResult {
        self.orders.write().await.push(config.clone());

        let (outcome, delay) = self
            .outcomes
            .write()
            .await
            .pop_front()
            .unwrap_or((MockOutcome::Fill, Duration::ZERO));

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (fill_price, quantity) = match outcome {
            MockOutcome::Fill => (config.price, config.quantity),
            MockOutcome::FillAt(price) => (price, config.quantity),
            MockOutcome::FillQty(quantity) => (config.price, quantity.min(config.quantity)),
            MockOutcome::Reject(reason) => {
                info!(
                    market = %self.market,
                    pair = %config.pair,
                    trade_type = %config.trade_type,
                    %reason,
                    "Mock order rejected"
                );
                return TradeResult::failed(ResultCode::Rejected, reason);
            }
            MockOutcome::Hang => std::future::pending().await,
        };

        let signed = if config.trade_type.is_buy() {
            quantity
        } else {
            -quantity
        };
        *self
            .positions
            .write()
            .await
            .entry(config.pair.clone())
            .or_insert(Decimal::ZERO) += signed;

        info!(
            market = %self.market,
            pair = %config.pair,
            trade_type = %config.trade_type,
            %quantity,
            price = %fill_price,
            "Mock order filled"
        );

        TradeResult::filled(quantity, fill_price)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.subscriptions.write().await.clear();
        Ok(())
    }
}
