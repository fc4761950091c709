//! SQLite persistence for submitted orders and executed trades.
//!
//! Both tables are append-only and carry the hedge batch id so the two legs
//! (and any unwind order) of one hedge can be read back together.

use crate::exchange::{Market, ResultCode, TradeConfig, TradeResult};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// An executed trade as stored.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub batch: String,
    pub market: String,
    pub pair: String,
    pub trade_type: String,
    pub quantity: Decimal,
    pub price: Decimal,
}

/// SQLite-based order and trade store.
///
/// The connection sits behind a mutex so both legs of a hedge can record
/// from concurrent tasks.
pub struct PersistenceManager {
    conn: Mutex<Option<Connection>>,
}

impl PersistenceManager {
    /// Open the store, creating the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {:?}", db_path))?;

        let manager = Self {
            conn: Mutex::new(Some(conn)),
        };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path);
        Ok(manager)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("persistence mutex poisoned"))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| anyhow!("persistence store is closed"))?;
        f(conn)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                -- Every order sent to a market, including retries and unwinds
                CREATE TABLE IF NOT EXISTS orders (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    batch TEXT NOT NULL,
                    market TEXT NOT NULL,
                    pair TEXT NOT NULL,
                    trade_type TEXT NOT NULL,
                    price TEXT NOT NULL,
                    quantity TEXT NOT NULL,
                    slippage_limit TEXT NOT NULL,
                    attempt INTEGER NOT NULL,
                    result TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_orders_batch ON orders(batch);

                -- Fills
                CREATE TABLE IF NOT EXISTS trades (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    batch TEXT NOT NULL,
                    market TEXT NOT NULL,
                    pair TEXT NOT NULL,
                    trade_type TEXT NOT NULL,
                    quantity TEXT NOT NULL,
                    price TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_trades_batch ON trades(batch);
                CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
                "#,
            )?;
            Ok(())
        })?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Record a submitted order and its result code.
    pub fn record_order(
        &self,
        market: Market,
        config: &TradeConfig,
        attempt: u8,
        result: &TradeResult,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO orders (timestamp, batch, market, pair, trade_type, price,
                                    quantity, slippage_limit, attempt, result)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    Utc::now().to_rfc3339(),
                    config.batch,
                    market.to_string(),
                    config.pair.to_string(),
                    config.trade_type.to_string(),
                    config.price.to_string(),
                    config.quantity.to_string(),
                    config.limit.to_string(),
                    attempt,
                    result_code_str(result.code),
                ],
            )?;
            Ok(())
        })
    }

    /// Record a fill.
    pub fn record_trade(
        &self,
        market: Market,
        config: &TradeConfig,
        result: &TradeResult,
    ) -> Result<()> {
        let price = result.avg_price.unwrap_or(config.price);
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO trades (timestamp, batch, market, pair, trade_type, quantity, price)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    Utc::now().to_rfc3339(),
                    config.batch,
                    market.to_string(),
                    config.pair.to_string(),
                    config.trade_type.to_string(),
                    result.filled_qty.to_string(),
                    price.to_string(),
                ],
            )?;
            Ok(())
        })?;

        debug!(batch = %config.batch, %market, "Trade recorded");
        Ok(())
    }

    /// Most recent trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT timestamp, batch, market, pair, trade_type, quantity, price
                FROM trades ORDER BY id DESC LIMIT ?1
                "#,
            )?;

            let rows = stmt.query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut trades = Vec::new();
            for row in rows {
                let (ts, batch, market, pair, trade_type, qty, price) = row?;
                let timestamp = DateTime::parse_from_rfc3339(&ts)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                trades.push(TradeRecord {
                    timestamp,
                    batch,
                    market,
                    pair,
                    trade_type,
                    quantity: Decimal::from_str(&qty).unwrap_or_default(),
                    price: Decimal::from_str(&price).unwrap_or_default(),
                });
            }
            Ok(trades)
        })
    }

    /// Number of orders submitted.
    pub fn order_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM orders")
    }

    /// Number of orders that did not fill.
    pub fn failed_order_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM orders WHERE result != 'success'")
    }

    /// Number of fills.
    pub fn trade_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM trades")
    }

    fn count(&self, sql: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Close the connection; later writes fail.
    pub fn close(&self) -> Result<()> {
        let conn = self.lock()?.take();
        if let Some(conn) = conn {
            conn.close()
                .map_err(|(_, e)| e)
                .context("Failed to close database")?;
            info!("Persistence store closed");
        } else {
            warn!("Persistence store already closed");
        }
        Ok(())
    }
}

fn result_code_str(code: ResultCode) -> &'static str {
    match code {
        ResultCode::Success => "success",
        ResultCode::Rejected => "rejected",
        ResultCode::Timeout => "timeout",
        ResultCode::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{AssetPair, TradeType};
    use rust_decimal_macros::dec;

    fn leg(batch: &str, trade_type: TradeType) -> TradeConfig {
        TradeConfig {
            batch: batch.to_string(),
            pair: AssetPair::new("ltc", "usdt"),
            trade_type,
            price: dec!(102),
            quantity: dec!(5),
            limit: dec!(0.005),
        }
    }

    #[test]
    fn test_record_orders_and_trades() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let open = leg("b1", TradeType::OpenShort);
        let filled = TradeResult::filled(dec!(5), dec!(102));

        manager.record_order(Market::Future, &open, 1, &filled).unwrap();
        manager.record_trade(Market::Future, &open, &filled).unwrap();

        let spot = leg("b1", TradeType::Buy);
        let rejected = TradeResult::failed(ResultCode::Rejected, "no balance");
        manager.record_order(Market::Spot, &spot, 1, &rejected).unwrap();

        assert_eq!(manager.order_count().unwrap(), 2);
        assert_eq!(manager.failed_order_count().unwrap(), 1);
        assert_eq!(manager.trade_count().unwrap(), 1);

        let trades = manager.recent_trades(10).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].batch, "b1");
        assert_eq!(trades[0].trade_type, "open_short");
        assert_eq!(trades[0].price, dec!(102));
    }

    #[test]
    fn test_recent_trades_newest_first() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let filled = TradeResult::filled(dec!(5), dec!(102));
        manager
            .record_trade(Market::Future, &leg("old", TradeType::OpenShort), &filled)
            .unwrap();
        manager
            .record_trade(Market::Future, &leg("new", TradeType::CloseShort), &filled)
            .unwrap();

        let trades = manager.recent_trades(1).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].batch, "new");
    }

    #[test]
    fn test_writes_fail_after_close() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        manager.close().unwrap();

        let filled = TradeResult::filled(dec!(5), dec!(102));
        let result = manager.record_trade(Market::Spot, &leg("b", TradeType::Buy), &filled);
        assert!(result.is_err());
        // Closing twice is harmless
        assert!(manager.close().is_ok());
    }
}
