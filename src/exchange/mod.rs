//! Market integrations for the two hedge legs.
//!
//! ## Binance
//! One `BinanceMarketClient` per market (USDT-M futures and spot):
//! - Last traded prices streamed over WebSocket into a local cache
//! - Limit IOC order placement signed with HMAC-SHA256
//!
//! ## Mock
//! `MockMarketClient` fills orders from a scripted queue for paper runs
//! and tests.

mod client;
pub mod mock;
mod traits;
mod types;
mod websocket;

pub use client::BinanceMarketClient;
pub use mock::{MockMarketClient, MockOutcome};
#[cfg(test)]
pub use traits::MockMarketClient as AutoMockMarketClient;
pub use traits::MarketClient;
pub use types::*;
pub use websocket::BinanceWebSocket;
