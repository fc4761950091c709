//! Configuration management for the basis hedger.
//!
//! Loads settings from environment variables and config files. The
//! strategy thresholds (`AnalyzerConfig`) can also be supplied as a JSON
//! document through the control surface.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Spread thresholds and per-asset sizing
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    /// Driver loop and order dispatch settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Telemetry publish channel
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Trade/order store
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

/// Spread thresholds for one asset.
///
/// All fields are required: a partially specified area fails to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerArea {
    /// Absolute spread (in %) above which a hedge is opened
    pub open: Decimal,
    /// Absolute spread (in %) below which an open hedge is closed
    pub close: Decimal,
    /// Futures leg quantity in contracts
    pub position: Decimal,
    /// Spot leg size in quote currency
    #[serde(default = "default_spot_notional")]
    pub spot_notional: Decimal,
    /// Decimals kept when normalizing leg quantities
    #[serde(default = "default_quantity_decimals")]
    pub quantity_decimals: u32,
}

impl TriggerArea {
    pub fn new(open: Decimal, close: Decimal, position: Decimal) -> Self {
        Self {
            open,
            close,
            position,
            spot_notional: default_spot_notional(),
            quantity_decimals: default_quantity_decimals(),
        }
    }

    pub fn with_quantity_decimals(mut self, decimals: u32) -> Self {
        self.quantity_decimals = decimals;
        self
    }
}

/// Strategy thresholds, immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Per-asset thresholds keyed by lowercase base asset (e.g. "btc")
    #[serde(alias = "area", default = "default_areas")]
    pub areas: BTreeMap<String, TriggerArea>,
    /// Quote currency shared by all pairs
    #[serde(default = "default_quote")]
    pub quote: String,
    /// Allowed price slippage when placing orders (0.005 = 0.5%)
    #[serde(alias = "limitopen", default = "default_limit_open")]
    pub limit_open: Decimal,
    /// Stop-loss band around the futures entry price (0.03 = 3%)
    #[serde(alias = "limitclose", default = "default_limit_close")]
    pub limit_close: Decimal,
}

/// Retry policy for a single order placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per leg; 1 means fail fast
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    /// Linear backoff step between attempts
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between monitor cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound on waiting for one leg's result
    #[serde(default = "default_leg_timeout")]
    pub leg_timeout_secs: u64,
    /// Log intended orders instead of sending them
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// Delay before restarting a market client after an error
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// WebSocket endpoint of the publish server; disabled when unset
    #[serde(default)]
    pub url: Option<String>,
    /// Topic for spread lines
    #[serde(default = "default_topic")]
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_areas() -> BTreeMap<String, TriggerArea> {
    let mut areas = BTreeMap::new();
    areas.insert(
        "btc".to_string(),
        TriggerArea::new(Decimal::new(16, 1), Decimal::new(5, 1), Decimal::new(5, 0))
            .with_quantity_decimals(5),
    );
    areas.insert(
        "ltc".to_string(),
        TriggerArea::new(Decimal::new(3, 0), Decimal::new(15, 1), Decimal::new(5, 0)),
    );
    areas
}

fn default_quote() -> String {
    "usdt".to_string()
}

fn default_spot_notional() -> Decimal {
    Decimal::new(50, 0) // 50 USDT
}

fn default_quantity_decimals() -> u32 {
    2
}

fn default_limit_open() -> Decimal {
    Decimal::new(5, 3) // 0.005
}

fn default_limit_close() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

fn default_max_attempts() -> u8 {
    1
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_poll_interval() -> u64 {
    10
}

fn default_leg_timeout() -> u64 {
    30
}

fn default_dry_run() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_topic() -> String {
    "spread".to_string()
}

fn default_db_path() -> String {
    "data/basis_hedger.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    ///
    /// `path` overrides the default `config` file stem; a named file must exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::default().separator("__").prefix("BH"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.analyzer.validate()?;
        self.engine.validate()
    }
}

impl AnalyzerConfig {
    /// Parse a JSON document; an empty document yields the defaults.
    pub fn from_document(document: &str) -> Result<Self> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(document).context("Failed to parse analyzer document")
    }

    /// Check that every asset has a usable threshold entry.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.areas.is_empty(), "at least one asset area is required");
        anyhow::ensure!(!self.quote.is_empty(), "quote currency must be set");
        anyhow::ensure!(
            self.limit_open > Decimal::ZERO && self.limit_open < Decimal::ONE,
            "limit_open must be between 0 and 1"
        );
        anyhow::ensure!(
            self.limit_close > Decimal::ZERO && self.limit_close < Decimal::ONE,
            "limit_close must be between 0 and 1"
        );

        for (asset, area) in &self.areas {
            anyhow::ensure!(
                !asset.is_empty() && asset.chars().all(|c| c.is_ascii_alphanumeric()),
                "invalid asset name {:?}",
                asset
            );
            anyhow::ensure!(
                area.close >= Decimal::ZERO && area.open > area.close,
                "area {}: open must be greater than close and close non-negative",
                asset
            );
            anyhow::ensure!(
                area.position > Decimal::ZERO,
                "area {}: position must be positive",
                asset
            );
            anyhow::ensure!(
                area.quantity_decimals <= 8,
                "area {}: quantity_decimals must be at most 8",
                asset
            );
            anyhow::ensure!(
                area.spot_notional > Decimal::ZERO,
                "area {}: spot_notional must be positive",
                asset
            );
        }

        Ok(())
    }

    /// Threshold entry for an asset.
    pub fn area(&self, asset: &str) -> Option<&TriggerArea> {
        self.areas.get(asset)
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.poll_interval_secs > 0,
            "poll_interval_secs must be positive"
        );
        anyhow::ensure!(
            self.leg_timeout_secs > 0,
            "leg_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.retry.max_attempts >= 1,
            "retry.max_attempts must be at least 1"
        );

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn leg_timeout(&self) -> Duration {
        Duration::from_secs(self.leg_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            areas: default_areas(),
            quote: default_quote(),
            limit_open: default_limit_open(),
            limit_close: default_limit_close(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            leg_timeout_secs: default_leg_timeout(),
            dry_run: default_dry_run(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            url: None,
            topic: default_topic(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.engine.dry_run);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AnalyzerConfig::from_document("  ").unwrap();
        assert_eq!(config, AnalyzerConfig::default());
        assert_eq!(config.area("btc").unwrap().open, dec!(1.6));
    }

    #[test]
    fn test_legacy_field_names() {
        let doc = r#"{
            "area": { "eth": { "open": 2.0, "close": 0.4, "position": 3 } },
            "limitopen": 0.004,
            "limitclose": 0.02
        }"#;
        let config = AnalyzerConfig::from_document(doc).unwrap();
        assert_eq!(config.limit_open, dec!(0.004));
        assert_eq!(config.limit_close, dec!(0.02));
        let eth = config.area("eth").unwrap();
        assert_eq!(eth.position, dec!(3));
        assert_eq!(eth.spot_notional, dec!(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_incomplete_area_is_rejected() {
        let doc = r#"{ "area": { "eth": { "open": 2.0, "close": 0.4 } } }"#;
        assert!(AnalyzerConfig::from_document(doc).is_err());
    }

    #[test]
    fn test_malformed_document_is_rejected() {
        assert!(AnalyzerConfig::from_document("{ not json").is_err());
    }

    #[test]
    fn test_inverted_thresholds_fail_validation() {
        let mut config = AnalyzerConfig::default();
        config
            .areas
            .insert("eth".to_string(), TriggerArea::new(dec!(0.5), dec!(1.0), dec!(1)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_fails_validation() {
        let mut config = Config::default();
        config.engine.poll_interval_secs = 0;
        assert!(config.validate().is_err());
        assert!(config.engine.validate().is_err());
    }

    #[test]
    fn test_empty_areas_fail_validation() {
        let config = AnalyzerConfig {
            areas: BTreeMap::new(),
            ..AnalyzerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
