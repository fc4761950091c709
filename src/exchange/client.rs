//! Binance market client (REST orders + WebSocket last prices).

use crate::config::BinanceConfig;
use crate::exchange::types::*;
use crate::exchange::websocket::{BinanceWebSocket, WsEvent};
use crate::exchange::MarketClient;
use crate::utils::limit_price;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";
const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";

const DEFAULT_PRICE_DECIMALS: u32 = 2;

/// Binance client for one market (USDT-M futures or spot).
pub struct BinanceMarketClient {
    market: Market,
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    price_decimals: u32,
    ws: BinanceWebSocket,
    /// Latest ticker per exchange symbol
    tickers: Arc<RwLock<HashMap<String, TickerValue>>>,
    events: Mutex<Option<mpsc::Sender<MarketEvent>>>,
    /// Reader and forwarder tasks per subscribed symbol
    streams: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl BinanceMarketClient {
    /// Create a new client from configuration.
    pub fn new(market: Market, config: &BinanceConfig) -> Result<Self> {
        let base_url = match (market, config.testnet) {
            (Market::Future, false) => FUTURES_BASE_URL,
            (Market::Future, true) => FUTURES_TESTNET_URL,
            (Market::Spot, false) => SPOT_BASE_URL,
            (Market::Spot, true) => SPOT_TESTNET_URL,
        };
        Self::with_base_url(market, config, base_url)
    }

    /// Create a client against an explicit REST endpoint.
    pub fn with_base_url(market: Market, config: &BinanceConfig, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            market,
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            price_decimals: DEFAULT_PRICE_DECIMALS,
            ws: BinanceWebSocket::new(market, config.testnet),
            tickers: Arc::new(RwLock::new(HashMap::new())),
            events: Mutex::new(None),
            streams: Mutex::new(HashMap::new()),
        })
    }

    /// Decimals used when rounding limit prices.
    pub fn with_price_decimals(mut self, decimals: u32) -> Self {
        self.price_decimals = decimals;
        self
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn ping_path(&self) -> &'static str {
        match self.market {
            Market::Future => "/fapi/v1/ping",
            Market::Spot => "/api/v3/ping",
        }
    }

    fn order_path(&self) -> &'static str {
        match self.market {
            Market::Future => "/fapi/v1/order",
            Market::Spot => "/api/v3/order",
        }
    }

    /// Check REST connectivity.
    #[instrument(skip(self), fields(market = %self.market))]
    async fn ping(&self) -> Result<()> {
        let url = format!("{}{}", self.base_url, self.ping_path());
        self.http
            .get(&url)
            .send()
            .await
            .context("Failed to reach exchange")?
            .error_for_status()
            .context("Exchange ping rejected")?;
        Ok(())
    }

    /// Build the order request for a leg.
    fn build_order(&self, config: &TradeConfig) -> NewOrder {
        let side = config.trade_type.order_side();
        let price = limit_price(config.price, config.limit, config.trade_type.is_buy())
            .round_dp(self.price_decimals);
        let client_id = format!(
            "{}-{}{}",
            config.batch,
            &self.market.to_string()[..1],
            Self::timestamp() % 100_000_000
        );

        NewOrder {
            symbol: config.pair.symbol(),
            side,
            order_type: OrderType::Limit,
            quantity: config.quantity,
            price: Some(price),
            time_in_force: Some(TimeInForce::Ioc),
            reduce_only: match self.market {
                Market::Future if config.trade_type.reduce_only() => Some(true),
                _ => None,
            },
            new_client_order_id: Some(client_id),
        }
    }

    /// Sign and send an order, returning the raw response body.
    #[instrument(skip(self, order), fields(market = %self.market, symbol = %order.symbol))]
    async fn send_order(&self, order: &NewOrder) -> Result<(reqwest::StatusCode, String)> {
        let timestamp = Self::timestamp();
        let mut params = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), format!("{:?}", order.side).to_uppercase()),
            ("type".to_string(), format!("{:?}", order.order_type).to_uppercase()),
            ("quantity".to_string(), order.quantity.normalize().to_string()),
            ("timestamp".to_string(), timestamp.to_string()),
        ];

        if let Some(price) = &order.price {
            params.push(("price".to_string(), price.normalize().to_string()));
        }

        if let Some(tif) = &order.time_in_force {
            params.push(("timeInForce".to_string(), format!("{:?}", tif).to_uppercase()));
        }

        if let Some(reduce_only) = order.reduce_only {
            params.push(("reduceOnly".to_string(), reduce_only.to_string()));
        }

        if let Some(client_id) = &order.new_client_order_id {
            params.push(("newClientOrderId".to_string(), client_id.clone()));
        }

        if self.market == Market::Spot {
            params.push(("newOrderRespType".to_string(), "RESULT".to_string()));
        }

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign(&query_string);
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url,
            self.order_path(),
            query_string,
            signature
        );

        debug!("Placing order: {:?}", order);

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to place order")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read order response")?;
        Ok((status, body))
    }

    /// Map an order response body to a leg result.
    fn parse_result(&self, status: reqwest::StatusCode, body: &str) -> TradeResult {
        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(body)
                .map(|e| format!("{} ({})", e.msg, e.code))
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return TradeResult::failed(ResultCode::Rejected, message);
        }

        let (executed_qty, avg_price, order_status) = match self.market {
            Market::Future => match serde_json::from_str::<OrderResponse>(body) {
                Ok(r) => (r.executed_qty, r.avg_price, r.status),
                Err(e) => return TradeResult::failed(ResultCode::Error, e.to_string()),
            },
            Market::Spot => match serde_json::from_str::<SpotOrderResponse>(body) {
                Ok(r) => {
                    let avg = if r.executed_qty > Decimal::ZERO {
                        r.cummulative_quote_qty / r.executed_qty
                    } else {
                        Decimal::ZERO
                    };
                    (r.executed_qty, avg, r.status)
                }
                Err(e) => return TradeResult::failed(ResultCode::Error, e.to_string()),
            },
        };

        // IOC orders end as EXPIRED when only partially filled
        if executed_qty > Decimal::ZERO {
            TradeResult::filled(executed_qty, avg_price)
        } else {
            TradeResult::failed(
                ResultCode::Rejected,
                format!("order not filled: {:?}", order_status),
            )
        }
    }

    async fn emit(&self, event: MarketEvent) {
        if let Some(tx) = self.events.lock().await.as_ref() {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl MarketClient for BinanceMarketClient {
    fn market(&self) -> Market {
        self.market
    }

    async fn start(&self, events: mpsc::Sender<MarketEvent>) -> Result<()> {
        *self.events.lock().await = Some(events);

        match self.ping().await {
            Ok(()) => {
                info!(market = %self.market, "Market connected");
                self.emit(MarketEvent::Connected(self.market)).await;
                Ok(())
            }
            Err(e) => {
                warn!(market = %self.market, error = %e, "Market connection failed");
                self.emit(MarketEvent::Error(self.market, e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn subscribe_ticker(&self, pair: &AssetPair) -> Result<()> {
        let symbol = pair.symbol();
        let (tx, mut rx) = mpsc::channel(256);
        let reader = self.ws.subscribe_mini_ticker(&symbol, tx).await?;

        let tickers = Arc::clone(&self.tickers);
        let events = self.events.lock().await.clone();
        let market = self.market;
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    WsEvent::MiniTicker(update) => {
                        tickers.write().await.insert(
                            update.symbol.clone(),
                            TickerValue {
                                last: update.close_price,
                                event_time: update.event_time,
                            },
                        );
                    }
                    WsEvent::Connected => debug!(%market, "Ticker stream connected"),
                    WsEvent::Disconnected(reason) => {
                        if let Some(tx) = &events {
                            let _ = tx.send(MarketEvent::Error(market, reason)).await;
                        }
                        return;
                    }
                }
            }
        });

        let mut streams = self.streams.lock().await;
        if let Some(old) = streams.insert(symbol.clone(), vec![reader, forwarder]) {
            for handle in old {
                handle.abort();
            }
        }

        info!(market = %self.market, %symbol, "Subscribed to ticker");
        Ok(())
    }

    async fn get_ticker_value(&self, pair: &AssetPair) -> Option<TickerValue> {
        self.tickers.read().await.get(&pair.symbol()).copied()
    }

    async fn place_order(&self, config: &TradeConfig) -> TradeResult {
        let order = self.build_order(config);
        match self.send_order(&order).await {
            Ok((status, body)) => self.parse_result(status, &body),
            Err(e) => TradeResult::failed(ResultCode::Error, format!("{:#}", e)),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut streams = self.streams.lock().await;
        for (_, handles) in streams.drain() {
            for handle in handles {
                handle.abort();
            }
        }
        self.events.lock().await.take();
        info!(market = %self.market, "Market client closed");
        Ok(())
    }
}
