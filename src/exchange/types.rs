//! Trade intents, results and Binance wire types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==================== Markets and Pairs ====================

/// Which of the two markets a leg trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Future,
    Spot,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Future => write!(f, "future"),
            Market::Spot => write!(f, "spot"),
        }
    }
}

/// A base/quote pair such as `btc/usdt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetPair {
    pub base: String,
    pub quote: String,
}

impl AssetPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_lowercase(),
            quote: quote.into().to_lowercase(),
        }
    }

    /// Exchange symbol, e.g. `BTCUSDT`.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote).to_uppercase()
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

// ==================== Trade Intents ====================

/// Direction of a leg.
///
/// Futures legs open and close positions; spot legs buy and sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Buy,
    Sell,
}

impl TradeType {
    /// The trade that undoes this one.
    pub fn reverse(self) -> Self {
        match self {
            TradeType::OpenLong => TradeType::CloseLong,
            TradeType::CloseLong => TradeType::OpenLong,
            TradeType::OpenShort => TradeType::CloseShort,
            TradeType::CloseShort => TradeType::OpenShort,
            TradeType::Buy => TradeType::Sell,
            TradeType::Sell => TradeType::Buy,
        }
    }

    /// Order side on the exchange.
    pub fn order_side(self) -> OrderSide {
        match self {
            TradeType::OpenLong | TradeType::CloseShort | TradeType::Buy => OrderSide::Buy,
            TradeType::OpenShort | TradeType::CloseLong | TradeType::Sell => OrderSide::Sell,
        }
    }

    pub fn is_buy(self) -> bool {
        self.order_side() == OrderSide::Buy
    }

    /// Whether the order may only shrink an existing futures position.
    pub fn reduce_only(self) -> bool {
        matches!(self, TradeType::CloseLong | TradeType::CloseShort)
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradeType::OpenLong => "open_long",
            TradeType::OpenShort => "open_short",
            TradeType::CloseLong => "close_long",
            TradeType::CloseShort => "close_short",
            TradeType::Buy => "buy",
            TradeType::Sell => "sell",
        };
        f.write_str(name)
    }
}

/// One leg's order intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Correlates the two legs of one hedge
    pub batch: String,
    pub pair: AssetPair,
    pub trade_type: TradeType,
    /// Reference price the slippage limit applies to
    pub price: Decimal,
    pub quantity: Decimal,
    /// Allowed slippage (0.005 = 0.5%)
    pub limit: Decimal,
}

impl TradeConfig {
    /// Same intent with the side reversed.
    pub fn reversed(&self) -> Self {
        Self {
            trade_type: self.trade_type.reverse(),
            ..self.clone()
        }
    }
}

/// Outcome code of one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    /// Exchange refused or did not fill the order
    Rejected,
    /// No result within the leg timeout
    Timeout,
    /// Transport or protocol failure
    Error,
}

/// Outcome of one leg.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeResult {
    pub code: ResultCode,
    /// Filled quantity (zero unless successful)
    pub filled_qty: Decimal,
    /// Average fill price when known
    pub avg_price: Option<Decimal>,
    pub message: Option<String>,
}

impl TradeResult {
    pub fn filled(filled_qty: Decimal, avg_price: Decimal) -> Self {
        Self {
            code: ResultCode::Success,
            filled_qty,
            avg_price: Some(avg_price),
            message: None,
        }
    }

    pub fn failed(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            filled_qty: Decimal::ZERO,
            avg_price: None,
            message: Some(message.into()),
        }
    }

    pub fn timeout() -> Self {
        Self::failed(ResultCode::Timeout, "no result within leg timeout")
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }

    /// Quantity of a `requested` order still open after this result.
    pub fn unfilled(&self, requested: Decimal) -> Decimal {
        if self.is_success() {
            (requested - self.filled_qty).max(Decimal::ZERO)
        } else {
            requested
        }
    }

    /// Whether the whole `requested` quantity filled.
    pub fn is_complete(&self, requested: Decimal) -> bool {
        self.unfilled(requested).is_zero()
    }
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.message) {
            (ResultCode::Success, _) => write!(f, "filled {}", self.filled_qty),
            (code, Some(message)) => write!(f, "{:?}: {}", code, message),
            (code, None) => write!(f, "{:?}", code),
        }
    }
}

// ==================== Market Data ====================

/// Latest ticker snapshot for a pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerValue {
    pub last: Decimal,
    /// Exchange event time in milliseconds
    pub event_time: i64,
}

/// Connection-state notifications from a market client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    Connected(Market),
    Error(Market, String),
}

// ==================== Binance Wire Types ====================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Time in force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc, // Good Till Cancel
    Ioc, // Immediate or Cancel
    Fok, // Fill or Kill
    Gtx, // Post Only (Good Till Crossing)
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    ExpiredInMatch,
}

/// New order request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: Option<bool>,
    pub new_client_order_id: Option<String>,
}

/// Futures order response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    pub client_order_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: Option<TimeInForce>,
    pub update_time: i64,
}

/// Spot order response (`newOrderRespType=RESULT`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotOrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    pub client_order_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub cummulative_quote_qty: Decimal,
    pub side: OrderSide,
    pub transact_time: i64,
}

/// Error body returned by Binance on rejected requests.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reverse_is_involution() {
        for t in [
            TradeType::OpenLong,
            TradeType::OpenShort,
            TradeType::CloseLong,
            TradeType::CloseShort,
            TradeType::Buy,
            TradeType::Sell,
        ] {
            assert_eq!(t.reverse().reverse(), t);
            assert_ne!(t.reverse().order_side(), t.order_side());
        }
    }

    #[test]
    fn test_unfilled_quantity() {
        let partial = TradeResult::filled(dec!(2), dec!(100));
        assert_eq!(partial.unfilled(dec!(5)), dec!(3));
        assert!(!partial.is_complete(dec!(5)));
        assert!(TradeResult::filled(dec!(5), dec!(100)).is_complete(dec!(5)));

        let rejected = TradeResult::failed(ResultCode::Rejected, "no margin");
        assert_eq!(rejected.unfilled(dec!(5)), dec!(5));
        assert!(!TradeResult::timeout().is_complete(dec!(5)));
    }

    #[test]
    fn test_close_short_buys_reduce_only() {
        let t = TradeType::OpenShort.reverse();
        assert_eq!(t, TradeType::CloseShort);
        assert!(t.is_buy());
        assert!(t.reduce_only());
        assert!(!TradeType::Buy.reduce_only());
    }

    #[test]
    fn test_pair_symbol() {
        let pair = AssetPair::new("BTC", "usdt");
        assert_eq!(pair.symbol(), "BTCUSDT");
        assert_eq!(pair.to_string(), "btc/usdt");
    }

    #[test]
    fn test_parse_spot_order_response() {
        let body = r#"{
            "symbol": "LTCUSDT", "orderId": 28, "orderListId": -1,
            "clientOrderId": "6gCrw2kRUAF9CvJDGP16IP", "transactTime": 1507725176595,
            "price": "100.50", "origQty": "0.50", "executedQty": "0.50",
            "cummulativeQuoteQty": "50.00", "status": "FILLED",
            "timeInForce": "IOC", "type": "LIMIT", "side": "BUY"
        }"#;
        let response: SpotOrderResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.status, OrderStatus::Filled);
        assert_eq!(response.executed_qty, dec!(0.5));
        assert_eq!(response.cummulative_quote_qty, dec!(50));
    }
}
