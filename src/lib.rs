//! # Basis Hedger
//!
//! Futures/spot spread arbitrage on Binance: watches the spread between a
//! USDT-M perpetual and its spot pair, opens a hedge (one leg per market)
//! when the spread is wide and closes it when the spread reverts or the
//! futures price breaks its stop-loss band.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Market clients (Binance REST + WebSocket, in-memory mock)
//! - `strategy`: Spread monitor, decision engine, dual-leg coordinator, ledger
//! - `lifecycle`: Status state machine, start/stop control, driver loop
//! - `persistence`: SQLite order and trade store
//! - `telemetry`: Best-effort publish channel for spread lines
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod exchange;
pub mod lifecycle;
pub mod persistence;
pub mod strategy;
pub mod telemetry;
pub mod utils;

pub use config::Config;
