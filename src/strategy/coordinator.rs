//! Concurrent execution and reconciliation of the two legs of a hedge.
//!
//! Both legs are dispatched together and both results are awaited before
//! anything is decided. Reconciliation only looks at the pair of results, so
//! the outcome does not depend on which leg answered first:
//!
//! | future | spot | open                          | close                          |
//! |--------|------|-------------------------------|--------------------------------|
//! | ok     | ok   | record hedge                  | remove hedge                   |
//! | ok     | fail | unwind future                 | resubmit spot close once       |
//! | fail   | ok   | unwind spot                   | resubmit future close once     |
//! | fail   | fail | nothing recorded, Error       | hedge kept, Error              |
//!
//! A close or unwind order counts only once its whole quantity filled; a
//! partial fill leaves the remainder to be resubmitted (close) or reported
//! (unwind). A failed unwind or resubmission leaves exposure on one market
//! and moves the run to Error, with the ledger entry shrunk to what is
//! still open.

use super::decision::{CloseOrder, HedgePlan};
use super::executor::LegExecutor;
use super::ledger::{OperationItem, PositionLedger};
use crate::exchange::{Market, MarketClient, TradeConfig, TradeResult};
use crate::lifecycle::{Status, StatusHandle};
use crate::utils::truncate_to_precision;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Why a hedge action was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Run status does not allow the action
    Status(Status),
    /// Orders are logged, not sent
    DryRun,
    /// No ledger entry under the requested index
    UnknownPosition(u64),
}

/// Result of one open or close action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HedgeOutcome {
    Skipped(SkipReason),
    /// Both open legs filled; hedge recorded under `index`
    Opened { index: u64 },
    /// Both close legs filled; hedge removed
    Closed { index: u64 },
    /// One open leg filled and was reversed; nothing recorded
    Unwound { batch: String, market: Market },
    /// Exposure left on `market`; run moved to Error
    Unhedged { batch: String, market: Market },
    /// Both legs failed; run moved to Error
    Failed { batch: String },
}

impl HedgeOutcome {
    /// Whether this outcome moves the run to Error.
    pub fn is_error(&self) -> bool {
        matches!(self, HedgeOutcome::Unhedged { .. } | HedgeOutcome::Failed { .. })
    }
}

/// Build the order that reverses a filled leg.
///
/// The quantity is the filled quantity truncated to `decimals` (the
/// requested quantity if that is zero), the price the fill price (the
/// reference price if unknown).
fn reverse_leg(config: &TradeConfig, result: &TradeResult, decimals: u32) -> TradeConfig {
    let filled = truncate_to_precision(result.filled_qty, decimals);
    TradeConfig {
        quantity: if filled.is_zero() { config.quantity } else { filled },
        price: result.avg_price.unwrap_or(config.price),
        ..config.reversed()
    }
}

/// Record what is still open of a partly closed hedge.
fn shrink(ledger: &mut PositionLedger, index: u64, future_left: Decimal, spot_left: Decimal) {
    if let Some(item) = ledger.get_mut(index) {
        item.future.quantity = future_left;
        item.spot.quantity = spot_left;
    }
}

pub struct DualLegCoordinator {
    future: Arc<dyn MarketClient>,
    spot: Arc<dyn MarketClient>,
    executor: LegExecutor,
    status: StatusHandle,
    dry_run: bool,
}

impl DualLegCoordinator {
    /// New coordinator, in dry-run mode until told otherwise.
    pub fn new(
        future: Arc<dyn MarketClient>,
        spot: Arc<dyn MarketClient>,
        executor: LegExecutor,
        status: StatusHandle,
    ) -> Self {
        Self {
            future,
            spot,
            executor,
            status,
            dry_run: true,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn client(&self, market: Market) -> &dyn MarketClient {
        match market {
            Market::Future => self.future.as_ref(),
            Market::Spot => self.spot.as_ref(),
        }
    }

    /// Open a hedge. Requires status Processing.
    pub async fn open(&self, plan: HedgePlan, ledger: &mut PositionLedger) -> HedgeOutcome {
        let status = self.status.get();
        if status != Status::Processing {
            debug!(batch = %plan.batch, %status, "Open skipped");
            return HedgeOutcome::Skipped(SkipReason::Status(status));
        }

        if self.dry_run {
            info!(
                batch = %plan.batch,
                asset = %plan.asset,
                future = %plan.future.trade_type,
                future_qty = %plan.future.quantity,
                future_price = %plan.future.price,
                spot = %plan.spot.trade_type,
                spot_qty = %plan.spot.quantity,
                spot_price = %plan.spot.price,
                "Dry run: open not sent"
            );
            return HedgeOutcome::Skipped(SkipReason::DryRun);
        }

        let entered = match self.enter_ordering() {
            Ok(entered) => entered,
            Err(status) => return HedgeOutcome::Skipped(SkipReason::Status(status)),
        };

        info!(batch = %plan.batch, asset = %plan.asset, "Opening hedge");
        let (future_result, spot_result) = tokio::join!(
            self.executor.execute(self.future.as_ref(), &plan.future),
            self.executor.execute(self.spot.as_ref(), &plan.spot),
        );

        let outcome = self
            .reconcile_open(&plan, future_result, spot_result, ledger)
            .await;
        self.leave_ordering(entered, &outcome);
        outcome
    }

    async fn reconcile_open(
        &self,
        plan: &HedgePlan,
        future: TradeResult,
        spot: TradeResult,
        ledger: &mut PositionLedger,
    ) -> HedgeOutcome {
        let decimals = plan.quantity_decimals;

        match (future.is_success(), spot.is_success()) {
            (true, true) => {
                let item = OperationItem {
                    asset: plan.asset.clone(),
                    batch: plan.batch.clone(),
                    future: reverse_leg(&plan.future, &future, decimals),
                    spot: reverse_leg(&plan.spot, &spot, decimals),
                    future_entry_price: future.avg_price.unwrap_or(plan.future.price),
                    spot_entry_price: spot.avg_price.unwrap_or(plan.spot.price),
                    opened_at: Utc::now(),
                };
                let index = ledger.insert(item);
                info!(
                    batch = %plan.batch,
                    asset = %plan.asset,
                    index,
                    open_positions = ledger.len(),
                    "Hedge opened"
                );
                HedgeOutcome::Opened { index }
            }
            (true, false) => {
                self.unwind(Market::Future, &plan.future, &future, decimals)
                    .await
            }
            (false, true) => self.unwind(Market::Spot, &plan.spot, &spot, decimals).await,
            (false, false) => {
                error!(
                    batch = %plan.batch,
                    future = %future,
                    spot = %spot,
                    "Both open legs failed"
                );
                HedgeOutcome::Failed {
                    batch: plan.batch.clone(),
                }
            }
        }
    }

    /// Reverse the one leg that filled.
    async fn unwind(
        &self,
        market: Market,
        config: &TradeConfig,
        filled: &TradeResult,
        decimals: u32,
    ) -> HedgeOutcome {
        let compensating = reverse_leg(config, filled, decimals);
        warn!(
            batch = %config.batch,
            %market,
            trade_type = %compensating.trade_type,
            quantity = %compensating.quantity,
            price = %compensating.price,
            "Only one leg filled, unwinding"
        );

        let result = self
            .executor
            .execute(self.client(market), &compensating)
            .await;

        if result.is_complete(compensating.quantity) {
            info!(batch = %config.batch, %market, "Unwind filled, no exposure left");
            HedgeOutcome::Unwound {
                batch: config.batch.clone(),
                market,
            }
        } else {
            error!(
                batch = %config.batch,
                %market,
                %result,
                remaining = %result.unfilled(compensating.quantity),
                "Unwind failed, position is unhedged"
            );
            HedgeOutcome::Unhedged {
                batch: config.batch.clone(),
                market,
            }
        }
    }

    /// Close the hedge at `order.index`. Requires status Processing or Ordering.
    pub async fn close(&self, order: &CloseOrder, ledger: &mut PositionLedger) -> HedgeOutcome {
        let status = self.status.get();
        if !status.is_running() {
            debug!(index = order.index, %status, "Close skipped");
            return HedgeOutcome::Skipped(SkipReason::Status(status));
        }

        let Some(item) = ledger.get_mut(order.index) else {
            debug!(index = order.index, "Close skipped, no such position");
            return HedgeOutcome::Skipped(SkipReason::UnknownPosition(order.index));
        };
        item.refresh_prices(order.future_price, order.spot_price);
        let item = item.clone();

        if self.dry_run {
            info!(
                batch = %item.batch,
                asset = %item.asset,
                reason = %order.reason,
                future = %item.future.trade_type,
                future_price = %item.future.price,
                spot = %item.spot.trade_type,
                spot_price = %item.spot.price,
                "Dry run: close not sent"
            );
            return HedgeOutcome::Skipped(SkipReason::DryRun);
        }

        let entered = match self.enter_ordering() {
            Ok(entered) => entered,
            Err(status) => return HedgeOutcome::Skipped(SkipReason::Status(status)),
        };

        info!(
            batch = %item.batch,
            asset = %item.asset,
            reason = %order.reason,
            "Closing hedge"
        );
        let (future_result, spot_result) = tokio::join!(
            self.executor.execute(self.future.as_ref(), &item.future),
            self.executor.execute(self.spot.as_ref(), &item.spot),
        );

        let future_left = future_result.unfilled(item.future.quantity);
        let spot_left = spot_result.unfilled(item.spot.quantity);

        let outcome = match (future_left.is_zero(), spot_left.is_zero()) {
            (true, true) => self.remove(order.index, &item, ledger),
            (true, false) => {
                self.finish_close(order.index, Market::Spot, spot_left, &item, ledger)
                    .await
            }
            (false, true) => {
                self.finish_close(order.index, Market::Future, future_left, &item, ledger)
                    .await
            }
            (false, false) => {
                error!(
                    batch = %item.batch,
                    future = %future_result,
                    spot = %spot_result,
                    %future_left,
                    %spot_left,
                    "Both close legs failed, hedge kept"
                );
                shrink(ledger, order.index, future_left, spot_left);
                HedgeOutcome::Failed {
                    batch: item.batch.clone(),
                }
            }
        };

        self.leave_ordering(entered, &outcome);
        outcome
    }

    /// Resubmit the `remaining` quantity of the close leg on `market`.
    async fn finish_close(
        &self,
        index: u64,
        market: Market,
        remaining: Decimal,
        item: &OperationItem,
        ledger: &mut PositionLedger,
    ) -> HedgeOutcome {
        let config = TradeConfig {
            quantity: remaining,
            ..match market {
                Market::Future => item.future.clone(),
                Market::Spot => item.spot.clone(),
            }
        };
        warn!(
            batch = %item.batch,
            %market,
            %remaining,
            "Close leg not fully filled, resubmitting"
        );

        let result = self.executor.execute(self.client(market), &config).await;
        let left = result.unfilled(remaining);
        if left.is_zero() {
            return self.remove(index, item, ledger);
        }

        error!(
            batch = %item.batch,
            %market,
            %result,
            remaining = %left,
            "Close resubmission failed, hedge partially closed"
        );
        let (future_left, spot_left) = match market {
            Market::Future => (left, Decimal::ZERO),
            Market::Spot => (Decimal::ZERO, left),
        };
        shrink(ledger, index, future_left, spot_left);
        HedgeOutcome::Unhedged {
            batch: item.batch.clone(),
            market,
        }
    }

    fn remove(
        &self,
        index: u64,
        item: &OperationItem,
        ledger: &mut PositionLedger,
    ) -> HedgeOutcome {
        if ledger.remove(index).is_some() {
            info!(
                batch = %item.batch,
                asset = %item.asset,
                index,
                open_positions = ledger.len(),
                "Hedge closed"
            );
        }
        HedgeOutcome::Closed { index }
    }

    /// Move Processing -> Ordering. `Ok(false)` if already Ordering.
    fn enter_ordering(&self) -> Result<bool, Status> {
        match self.status.transition(Status::Processing, Status::Ordering) {
            Ok(()) => Ok(true),
            Err(_) => match self.status.get() {
                Status::Ordering => Ok(false),
                other => Err(other),
            },
        }
    }

    fn leave_ordering(&self, entered: bool, outcome: &HedgeOutcome) {
        if outcome.is_error() {
            if let Err(e) = self.status.fail() {
                warn!("Could not move status to error: {}", e);
            }
        } else if entered {
            if let Err(e) = self.status.transition(Status::Ordering, Status::Processing) {
                debug!("Status changed while ordering: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::exchange::{AssetPair, MockMarketClient, MockOutcome, ResultCode, TradeType};
    use crate::strategy::decision::CloseReason;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        future: Arc<MockMarketClient>,
        spot: Arc<MockMarketClient>,
        status: StatusHandle,
        coordinator: DualLegCoordinator,
    }

    fn harness(dry_run: bool) -> Harness {
        let future = Arc::new(MockMarketClient::new(Market::Future));
        let spot = Arc::new(MockMarketClient::new(Market::Spot));
        let status = StatusHandle::new();
        status.transition(Status::None, Status::Processing).unwrap();
        let executor = LegExecutor::new(RetryPolicy::default(), Duration::from_millis(100));
        let coordinator =
            DualLegCoordinator::new(future.clone(), spot.clone(), executor, status.clone())
                .with_dry_run(dry_run);
        Harness {
            future,
            spot,
            status,
            coordinator,
        }
    }

    fn plan() -> HedgePlan {
        let leg = |trade_type, price, quantity| TradeConfig {
            batch: "0123456789ab".to_string(),
            pair: AssetPair::new("ltc", "usdt"),
            trade_type,
            price,
            quantity,
            limit: dec!(0.005),
        };
        HedgePlan {
            asset: "ltc".to_string(),
            batch: "0123456789ab".to_string(),
            future: leg(TradeType::OpenShort, dec!(102), dec!(5)),
            spot: leg(TradeType::Buy, dec!(100), dec!(0.5)),
            quantity_decimals: 2,
        }
    }

    fn close_order(index: u64) -> CloseOrder {
        CloseOrder {
            index,
            reason: CloseReason::Reversion,
            future_price: dec!(101.4),
            spot_price: dec!(101.0),
        }
    }

    #[tokio::test]
    async fn test_open_records_reversed_legs() {
        let h = harness(false);
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan(), &mut ledger).await;

        let HedgeOutcome::Opened { index } = outcome else {
            panic!("expected opened, got {:?}", outcome);
        };
        let item = ledger.get(index).unwrap();
        assert_eq!(item.future.trade_type, TradeType::CloseShort);
        assert_eq!(item.spot.trade_type, TradeType::Sell);
        assert_eq!(item.future_entry_price, dec!(102));
        assert_eq!(item.spot_entry_price, dec!(100));
        assert_eq!(item.spot.quantity, dec!(0.5));
        assert_eq!(h.status.get(), Status::Processing);
    }

    #[tokio::test]
    async fn test_open_uses_fill_price_and_truncated_quantity() {
        let h = harness(false);
        h.spot.push_outcome(MockOutcome::FillAt(dec!(100.2))).await;
        let mut plan = plan();
        plan.spot.quantity = dec!(0.4999);
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan, &mut ledger).await;

        let HedgeOutcome::Opened { index } = outcome else {
            panic!("expected opened, got {:?}", outcome);
        };
        let item = ledger.get(index).unwrap();
        assert_eq!(item.spot.quantity, dec!(0.49));
        assert_eq!(item.spot_entry_price, dec!(100.2));
        assert_eq!(item.spot.price, dec!(100.2));
    }

    #[tokio::test]
    async fn test_future_only_fill_is_unwound() {
        let h = harness(false);
        h.spot.push_outcome(MockOutcome::Reject("insufficient balance".into())).await;
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan(), &mut ledger).await;

        assert_eq!(
            outcome,
            HedgeOutcome::Unwound {
                batch: "0123456789ab".to_string(),
                market: Market::Future
            }
        );
        assert!(ledger.is_empty());
        assert_eq!(h.status.get(), Status::Processing);

        let orders = h.future.orders().await;
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].trade_type, TradeType::CloseShort);
        assert_eq!(orders[1].price, dec!(102));
        assert_eq!(orders[1].quantity, dec!(5));
        assert_eq!(h.spot.orders().await.len(), 1);
        assert_eq!(h.future.net_position(&plan().future.pair).await, dec!(0));
    }

    #[tokio::test]
    async fn test_failed_unwind_moves_to_error() {
        let h = harness(false);
        h.future.push_outcome(MockOutcome::Fill).await;
        h.future.push_outcome(MockOutcome::Reject("reduce only rejected".into())).await;
        h.spot.push_outcome(MockOutcome::Reject("insufficient balance".into())).await;
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan(), &mut ledger).await;

        assert_eq!(
            outcome,
            HedgeOutcome::Unhedged {
                batch: "0123456789ab".to_string(),
                market: Market::Future
            }
        );
        assert!(ledger.is_empty());
        assert_eq!(h.status.get(), Status::Error);
    }

    #[tokio::test]
    async fn test_partial_unwind_moves_to_error() {
        let h = harness(false);
        h.future.push_outcome(MockOutcome::Fill).await;
        h.future.push_outcome(MockOutcome::FillQty(dec!(2))).await;
        h.spot.push_outcome(MockOutcome::Reject("insufficient balance".into())).await;
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan(), &mut ledger).await;

        assert!(matches!(outcome, HedgeOutcome::Unhedged { market: Market::Future, .. }));
        assert_eq!(h.status.get(), Status::Error);
        assert_eq!(h.future.net_position(&plan().future.pair).await, dec!(-3));
    }

    #[tokio::test]
    async fn test_spot_only_fill_unwinds_spot() {
        let h = harness(false);
        h.future.push_outcome(MockOutcome::Reject("no margin".into())).await;
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan(), &mut ledger).await;

        assert!(matches!(outcome, HedgeOutcome::Unwound { market: Market::Spot, .. }));
        let orders = h.spot.orders().await;
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].trade_type, TradeType::Sell);
        assert_eq!(h.future.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_both_open_legs_fail() {
        let h = harness(false);
        h.future.push_outcome(MockOutcome::Reject("no margin".into())).await;
        h.spot.push_outcome(MockOutcome::Reject("no balance".into())).await;
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan(), &mut ledger).await;

        assert!(matches!(outcome, HedgeOutcome::Failed { .. }));
        assert!(ledger.is_empty());
        assert_eq!(h.status.get(), Status::Error);
        // No compensating orders
        assert_eq!(h.future.orders().await.len(), 1);
        assert_eq!(h.spot.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let h = harness(false);
        h.spot.push_outcome(MockOutcome::Hang).await;
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan(), &mut ledger).await;

        assert!(matches!(outcome, HedgeOutcome::Unwound { market: Market::Future, .. }));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_reconciliation_ignores_arrival_order() {
        let delay = Duration::from_millis(30);

        let future_last = harness(false);
        future_last.future.push_outcome_after(MockOutcome::Fill, delay).await;
        future_last.spot.push_outcome(MockOutcome::Reject("late".into())).await;

        let spot_last = harness(false);
        spot_last.future.push_outcome(MockOutcome::Fill).await;
        spot_last
            .spot
            .push_outcome_after(MockOutcome::Reject("late".into()), delay)
            .await;

        let mut ledger_a = PositionLedger::new();
        let mut ledger_b = PositionLedger::new();
        let a = future_last.coordinator.open(plan(), &mut ledger_a).await;
        let b = spot_last.coordinator.open(plan(), &mut ledger_b).await;

        assert_eq!(a, b);
        assert_eq!(future_last.future.orders().await, spot_last.future.orders().await);
        assert_eq!(ledger_a.len(), ledger_b.len());
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let h = harness(true);
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan(), &mut ledger).await;

        assert_eq!(outcome, HedgeOutcome::Skipped(SkipReason::DryRun));
        assert!(h.future.orders().await.is_empty());
        assert!(h.spot.orders().await.is_empty());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_open_requires_processing() {
        let h = harness(false);
        h.status.fail().unwrap();
        let mut ledger = PositionLedger::new();

        let outcome = h.coordinator.open(plan(), &mut ledger).await;

        assert_eq!(outcome, HedgeOutcome::Skipped(SkipReason::Status(Status::Error)));
        assert!(h.future.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_removes_on_dual_success() {
        let h = harness(false);
        let mut ledger = PositionLedger::new();
        let HedgeOutcome::Opened { index } = h.coordinator.open(plan(), &mut ledger).await else {
            panic!("open failed");
        };

        let outcome = h.coordinator.close(&close_order(index), &mut ledger).await;

        assert_eq!(outcome, HedgeOutcome::Closed { index });
        assert!(ledger.is_empty());
        let future_orders = h.future.orders().await;
        assert_eq!(future_orders[1].trade_type, TradeType::CloseShort);
        assert_eq!(future_orders[1].price, dec!(101.4));
        let spot_orders = h.spot.orders().await;
        assert_eq!(spot_orders[1].trade_type, TradeType::Sell);
        assert_eq!(spot_orders[1].price, dec!(101.0));
        assert_eq!(h.status.get(), Status::Processing);
    }

    #[tokio::test]
    async fn test_double_close_is_a_no_op() {
        let h = harness(false);
        let mut ledger = PositionLedger::new();
        let HedgeOutcome::Opened { index: first } = h.coordinator.open(plan(), &mut ledger).await
        else {
            panic!("open failed");
        };
        let HedgeOutcome::Opened { index: second } = h.coordinator.open(plan(), &mut ledger).await
        else {
            panic!("open failed");
        };

        h.coordinator.close(&close_order(first), &mut ledger).await;
        let again = h.coordinator.close(&close_order(first), &mut ledger).await;

        assert_eq!(again, HedgeOutcome::Skipped(SkipReason::UnknownPosition(first)));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get(second).is_some());
    }

    #[tokio::test]
    async fn test_partial_close_is_resubmitted() {
        let h = harness(false);
        let mut ledger = PositionLedger::new();
        let HedgeOutcome::Opened { index } = h.coordinator.open(plan(), &mut ledger).await else {
            panic!("open failed");
        };
        h.spot.push_outcome(MockOutcome::Reject("expired".into())).await;

        let outcome = h.coordinator.close(&close_order(index), &mut ledger).await;

        assert_eq!(outcome, HedgeOutcome::Closed { index });
        assert!(ledger.is_empty());
        let spot_orders = h.spot.orders().await;
        assert_eq!(spot_orders.len(), 3);
        assert_eq!(spot_orders[2].trade_type, TradeType::Sell);
        // Future leg closed exactly once
        assert_eq!(h.future.orders().await.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_close_leg_resubmits_remainder() {
        let h = harness(false);
        let mut ledger = PositionLedger::new();
        let HedgeOutcome::Opened { index } = h.coordinator.open(plan(), &mut ledger).await else {
            panic!("open failed");
        };
        h.future.push_outcome(MockOutcome::FillQty(dec!(2))).await;

        let outcome = h.coordinator.close(&close_order(index), &mut ledger).await;

        assert_eq!(outcome, HedgeOutcome::Closed { index });
        assert!(ledger.is_empty());
        let future_orders = h.future.orders().await;
        assert_eq!(future_orders.len(), 3);
        assert_eq!(future_orders[2].trade_type, TradeType::CloseShort);
        assert_eq!(future_orders[2].quantity, dec!(3));
        assert_eq!(h.future.net_position(&plan().future.pair).await, dec!(0));
        assert_eq!(h.spot.orders().await.len(), 2);
        assert_eq!(h.status.get(), Status::Processing);
    }

    #[tokio::test]
    async fn test_partial_resubmission_keeps_remainder() {
        let h = harness(false);
        let mut ledger = PositionLedger::new();
        let HedgeOutcome::Opened { index } = h.coordinator.open(plan(), &mut ledger).await else {
            panic!("open failed");
        };
        h.future.push_outcome(MockOutcome::FillQty(dec!(2))).await;
        h.future.push_outcome(MockOutcome::FillQty(dec!(1))).await;

        let outcome = h.coordinator.close(&close_order(index), &mut ledger).await;

        assert!(matches!(outcome, HedgeOutcome::Unhedged { market: Market::Future, .. }));
        assert_eq!(h.status.get(), Status::Error);
        let item = ledger.get(index).unwrap();
        assert_eq!(item.future.quantity, dec!(2));
        assert_eq!(item.spot.quantity, dec!(0));
        assert_eq!(h.future.net_position(&plan().future.pair).await, dec!(-2));
    }

    #[tokio::test]
    async fn test_failed_resubmission_keeps_hedge() {
        let h = harness(false);
        let mut ledger = PositionLedger::new();
        let HedgeOutcome::Opened { index } = h.coordinator.open(plan(), &mut ledger).await else {
            panic!("open failed");
        };
        h.future.push_outcome(MockOutcome::Reject("expired".into())).await;
        h.future.push_outcome(MockOutcome::Reject("expired".into())).await;

        let outcome = h.coordinator.close(&close_order(index), &mut ledger).await;

        assert!(matches!(outcome, HedgeOutcome::Unhedged { market: Market::Future, .. }));
        assert!(ledger.get(index).is_some());
        assert_eq!(h.status.get(), Status::Error);
    }

    #[tokio::test]
    async fn test_both_close_legs_fail() {
        let h = harness(false);
        let mut ledger = PositionLedger::new();
        let HedgeOutcome::Opened { index } = h.coordinator.open(plan(), &mut ledger).await else {
            panic!("open failed");
        };
        h.future.push_outcome(MockOutcome::Reject("expired".into())).await;
        h.spot.push_outcome(MockOutcome::Reject("expired".into())).await;

        let outcome = h.coordinator.close(&close_order(index), &mut ledger).await;

        assert!(matches!(outcome, HedgeOutcome::Failed { .. }));
        assert_eq!(ledger.len(), 1);
        assert_eq!(h.status.get(), Status::Error);
    }

    #[tokio::test]
    async fn test_reverse_leg_falls_back_to_request() {
        let config = plan().future;
        let result = TradeResult {
            code: ResultCode::Success,
            filled_qty: dec!(0.001),
            avg_price: None,
            message: None,
        };

        let reversed = reverse_leg(&config, &result, 2);

        assert_eq!(reversed.trade_type, TradeType::CloseShort);
        assert_eq!(reversed.quantity, dec!(5));
        assert_eq!(reversed.price, dec!(102));
    }
}
