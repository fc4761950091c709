//! Open/close/hold decisions per asset.
//!
//! The engine is pure: it reads a spread snapshot and the ledger and returns
//! what should happen. An asset with open hedges is only ever evaluated for
//! closing, so opening and closing the same asset in one cycle cannot happen.

use super::ledger::{OperationItem, PositionLedger};
use super::monitor::SpreadSnapshot;
use crate::config::{AnalyzerConfig, TriggerArea};
use crate::exchange::{TradeConfig, TradeType};
use crate::utils::{in_price_area, truncate_to_precision};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why an open hedge is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Future price left the band around its entry price
    StopLoss,
    /// Spread fell back under the close threshold
    Reversion,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::Reversion => write!(f, "reversion"),
        }
    }
}

/// Both opening legs of a new hedge.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgePlan {
    pub asset: String,
    pub batch: String,
    pub future: TradeConfig,
    pub spot: TradeConfig,
    /// Decimals kept when storing filled quantities
    pub quantity_decimals: u32,
}

/// Close request for one ledger entry, with the prices to close at.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOrder {
    pub index: u64,
    pub reason: CloseReason,
    pub future_price: Decimal,
    pub spot_price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Hold,
    Open(HedgePlan),
    Close(Vec<CloseOrder>),
}

/// Fresh 12 hex character batch id shared by the legs of one hedge.
pub fn new_batch_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

pub struct HedgeDecisionEngine {
    config: Arc<AnalyzerConfig>,
}

impl HedgeDecisionEngine {
    pub fn new(config: Arc<AnalyzerConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Decide what to do with `snapshot.asset` given the open hedges.
    pub fn evaluate(&self, snapshot: &SpreadSnapshot, ledger: &PositionLedger) -> Decision {
        let Some(area) = self.config.area(&snapshot.asset) else {
            warn!(asset = %snapshot.asset, "No trigger area configured");
            return Decision::Hold;
        };

        let open = ledger.positions_for(&snapshot.asset);
        if !open.is_empty() {
            let closes: Vec<CloseOrder> = open
                .into_iter()
                .filter_map(|index| {
                    let item = ledger.get(index)?;
                    let reason = self.close_reason(item, area, snapshot)?;
                    Some(CloseOrder {
                        index,
                        reason,
                        future_price: snapshot.future_price,
                        spot_price: snapshot.spot_price,
                    })
                })
                .collect();

            return if closes.is_empty() {
                Decision::Hold
            } else {
                Decision::Close(closes)
            };
        }

        if snapshot.spread.abs() > area.open {
            if let Some(plan) = self.plan_open(snapshot, area) {
                return Decision::Open(plan);
            }
        }

        Decision::Hold
    }

    fn close_reason(
        &self,
        item: &OperationItem,
        area: &TriggerArea,
        snapshot: &SpreadSnapshot,
    ) -> Option<CloseReason> {
        if !in_price_area(
            snapshot.future_price,
            item.future_entry_price,
            self.config.limit_close,
        ) {
            debug!(
                batch = %item.batch,
                entry = %item.future_entry_price,
                price = %snapshot.future_price,
                "Stop-loss band breached"
            );
            return Some(CloseReason::StopLoss);
        }

        if snapshot.spread.abs() < area.close {
            return Some(CloseReason::Reversion);
        }

        None
    }

    fn plan_open(&self, snapshot: &SpreadSnapshot, area: &TriggerArea) -> Option<HedgePlan> {
        let (future_type, spot_type) = if snapshot.future_price > snapshot.spot_price {
            (TradeType::OpenShort, TradeType::Buy)
        } else {
            (TradeType::OpenLong, TradeType::Sell)
        };

        let future_qty = truncate_to_precision(area.position, area.quantity_decimals);
        let spot_qty = truncate_to_precision(
            area.spot_notional / snapshot.spot_price,
            area.quantity_decimals,
        );
        if future_qty.is_zero() || spot_qty.is_zero() {
            warn!(
                asset = %snapshot.asset,
                %future_qty,
                %spot_qty,
                "Leg quantity rounds to zero, not opening"
            );
            return None;
        }

        let batch = new_batch_id();
        let leg = |trade_type, price, quantity| TradeConfig {
            batch: batch.clone(),
            pair: snapshot.pair.clone(),
            trade_type,
            price,
            quantity,
            limit: self.config.limit_open,
        };

        Some(HedgePlan {
            asset: snapshot.asset.clone(),
            future: leg(future_type, snapshot.future_price, future_qty),
            spot: leg(spot_type, snapshot.spot_price, spot_qty),
            batch,
            quantity_decimals: area.quantity_decimals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::AssetPair;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn test_config() -> AnalyzerConfig {
        let mut config = AnalyzerConfig::default();
        config
            .areas
            .insert("ltc".to_string(), TriggerArea::new(dec!(1.6), dec!(0.5), dec!(5)));
        config
    }

    fn engine() -> HedgeDecisionEngine {
        HedgeDecisionEngine::new(Arc::new(test_config()))
    }

    fn snapshot(asset: &str, future: Decimal, spot: Decimal) -> SpreadSnapshot {
        SpreadSnapshot::new(asset, AssetPair::new(asset, "usdt"), future, spot).unwrap()
    }

    /// Hedge opened short future at 102 and long spot at 100.
    fn open_item(asset: &str) -> OperationItem {
        let pair = AssetPair::new(asset, "usdt");
        let leg = |trade_type, price, quantity| TradeConfig {
            batch: "0123456789ab".to_string(),
            pair: pair.clone(),
            trade_type,
            price,
            quantity,
            limit: dec!(0.005),
        };
        OperationItem {
            asset: asset.to_string(),
            batch: "0123456789ab".to_string(),
            future: leg(TradeType::CloseShort, dec!(102), dec!(5)),
            spot: leg(TradeType::Sell, dec!(100), dec!(0.5)),
            future_entry_price: dec!(102),
            spot_entry_price: dec!(100),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_opens_short_future_when_future_is_rich() {
        let decision = engine().evaluate(
            &snapshot("ltc", dec!(102), dec!(100)),
            &PositionLedger::new(),
        );

        let Decision::Open(plan) = decision else {
            panic!("expected open, got {:?}", decision);
        };
        assert_eq!(plan.future.trade_type, TradeType::OpenShort);
        assert_eq!(plan.spot.trade_type, TradeType::Buy);
        assert_eq!(plan.future.batch, plan.spot.batch);
        assert_eq!(plan.batch.len(), 12);
        assert!(plan.batch.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(plan.future.quantity, dec!(5));
        assert_eq!(plan.spot.quantity, dec!(0.5));
        assert_eq!(plan.future.price, dec!(102));
        assert_eq!(plan.spot.price, dec!(100));
        assert_eq!(plan.future.limit, dec!(0.005));
    }

    #[test]
    fn test_opens_long_future_when_future_is_cheap() {
        let decision = engine().evaluate(
            &snapshot("ltc", dec!(96), dec!(100)),
            &PositionLedger::new(),
        );

        let Decision::Open(plan) = decision else {
            panic!("expected open, got {:?}", decision);
        };
        assert_eq!(plan.future.trade_type, TradeType::OpenLong);
        assert_eq!(plan.spot.trade_type, TradeType::Sell);
    }

    #[test]
    fn test_holds_inside_open_threshold() {
        let decision = engine().evaluate(
            &snapshot("ltc", dec!(101), dec!(100)),
            &PositionLedger::new(),
        );
        assert_eq!(decision, Decision::Hold);
    }

    #[test]
    fn test_open_position_blocks_new_open() {
        let mut ledger = PositionLedger::new();
        ledger.insert(open_item("ltc"));

        // Spread still wide and price inside the stop-loss band
        let decision = engine().evaluate(&snapshot("ltc", dec!(104), dec!(100)), &ledger);

        assert_eq!(decision, Decision::Hold);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_reversion_closes() {
        let mut ledger = PositionLedger::new();
        let index = ledger.insert(open_item("ltc"));

        let decision = engine().evaluate(&snapshot("ltc", dec!(101.4), dec!(101.0)), &ledger);

        assert_eq!(
            decision,
            Decision::Close(vec![CloseOrder {
                index,
                reason: CloseReason::Reversion,
                future_price: dec!(101.4),
                spot_price: dec!(101.0),
            }])
        );
    }

    #[test]
    fn test_stop_loss_uses_entry_price() {
        let mut ledger = PositionLedger::new();
        ledger.insert(open_item("ltc"));

        // 102 * 1.03 = 105.06
        let decision = engine().evaluate(&snapshot("ltc", dec!(105.1), dec!(100)), &ledger);

        let Decision::Close(orders) = decision else {
            panic!("expected close, got {:?}", decision);
        };
        assert_eq!(orders[0].reason, CloseReason::StopLoss);
    }

    #[test]
    fn test_other_assets_are_independent() {
        let mut ledger = PositionLedger::new();
        ledger.insert(open_item("btc"));

        let decision = engine().evaluate(&snapshot("ltc", dec!(104), dec!(100)), &ledger);

        assert!(matches!(decision, Decision::Open(_)));
    }

    #[test]
    fn test_unconfigured_asset_holds() {
        let decision = engine().evaluate(
            &snapshot("doge", dec!(110), dec!(100)),
            &PositionLedger::new(),
        );
        assert_eq!(decision, Decision::Hold);
    }

    #[test]
    fn test_zero_quantity_does_not_open() {
        let mut config = test_config();
        if let Some(area) = config.areas.get_mut("ltc") {
            area.spot_notional = dec!(0.001);
        }
        let engine = HedgeDecisionEngine::new(Arc::new(config));

        let decision = engine.evaluate(
            &snapshot("ltc", dec!(104), dec!(100)),
            &PositionLedger::new(),
        );

        assert_eq!(decision, Decision::Hold);
    }
}
