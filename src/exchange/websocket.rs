//! Binance WebSocket client for last-price streams.

use super::types::Market;
use anyhow::{Context, Result};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const FUTURES_WS_URL: &str = "wss://fstream.binance.com";
const FUTURES_TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";
const SPOT_WS_URL: &str = "wss://stream.binance.com:9443";
const SPOT_TESTNET_WS_URL: &str = "wss://testnet.binance.vision";

/// WebSocket event types.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// 24h rolling mini ticker (carries the last price)
    MiniTicker(MiniTickerUpdate),
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiniTickerUpdate {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c", with = "rust_decimal::serde::str")]
    pub close_price: Decimal,
}

/// Binance WebSocket client.
pub struct BinanceWebSocket {
    base_url: String,
}

impl BinanceWebSocket {
    /// Create a new WebSocket client for a market.
    pub fn new(market: Market, testnet: bool) -> Self {
        let base_url = match (market, testnet) {
            (Market::Future, false) => FUTURES_WS_URL,
            (Market::Future, true) => FUTURES_TESTNET_WS_URL,
            (Market::Spot, false) => SPOT_WS_URL,
            (Market::Spot, true) => SPOT_TESTNET_WS_URL,
        };

        Self {
            base_url: base_url.to_string(),
        }
    }

    /// Subscribe to the mini ticker stream of one symbol.
    pub async fn subscribe_mini_ticker(
        &self,
        symbol: &str,
        tx: mpsc::Sender<WsEvent>,
    ) -> Result<JoinHandle<()>> {
        let url = format!("{}/ws/{}@miniTicker", self.base_url, symbol.to_lowercase());
        self.connect_and_handle(url, tx, |msg| {
            match serde_json::from_str::<MiniTickerUpdate>(&msg) {
                Ok(update) => vec![WsEvent::MiniTicker(update)],
                Err(_) => vec![],
            }
        })
        .await
    }

    /// Generic WebSocket connection handler.
    async fn connect_and_handle<F>(
        &self,
        url: String,
        tx: mpsc::Sender<WsEvent>,
        parser: F,
    ) -> Result<JoinHandle<()>>
    where
        F: Fn(String) -> Vec<WsEvent> + Send + 'static,
    {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .context("Failed to connect to WebSocket")?;

        let (_write, mut read) = ws_stream.split();

        // Notify connection established
        let _ = tx.send(WsEvent::Connected).await;

        // Handle incoming messages
        let handle = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        for event in parser(text.to_string()) {
                            if tx.send(event).await.is_err() {
                                warn!("Event receiver dropped");
                                return;
                            }
                        }
                    }
                    Ok(Message::Ping(_data)) => {
                        debug!("Received ping, sending pong");
                        // Pong is handled automatically by tungstenite
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket closed by server");
                        let _ = tx
                            .send(WsEvent::Disconnected("closed by server".to_string()))
                            .await;
                        return;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        let _ = tx.send(WsEvent::Disconnected(e.to_string())).await;
                        return;
                    }
                    _ => {}
                }
            }
            let _ = tx
                .send(WsEvent::Disconnected("stream ended".to_string()))
                .await;
        });

        Ok(handle)
    }
}
