//! One monitor → decide → execute pass over all assets.

use super::status::{Status, StatusHandle};
use crate::config::AnalyzerConfig;
use crate::strategy::{
    Decision, DualLegCoordinator, HedgeDecisionEngine, HedgeOutcome, PositionLedger, SpreadMonitor,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// State owned by the driver loop for the lifetime of a run.
///
/// The ledger lives here and nowhere else; every mutation happens inside
/// `run_cycle`.
pub struct CycleContext {
    config: Arc<AnalyzerConfig>,
    monitor: SpreadMonitor,
    engine: HedgeDecisionEngine,
    coordinator: DualLegCoordinator,
    ledger: PositionLedger,
    status: StatusHandle,
}

impl CycleContext {
    pub fn new(
        config: Arc<AnalyzerConfig>,
        monitor: SpreadMonitor,
        coordinator: DualLegCoordinator,
        status: StatusHandle,
    ) -> Self {
        Self {
            engine: HedgeDecisionEngine::new(config.clone()),
            config,
            monitor,
            coordinator,
            ledger: PositionLedger::new(),
            status,
        }
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Poll every asset and act on its decision.
    ///
    /// Stops early once the run leaves Processing/Ordering.
    pub async fn run_cycle(&mut self) -> Vec<HedgeOutcome> {
        let mut outcomes = Vec::new();
        if !self.status.get().is_running() {
            return outcomes;
        }

        let snapshots = self.monitor.poll(&self.config).await;

        for snapshot in &snapshots {
            let status = self.status.get();
            if !status.is_running() {
                warn!(%status, "Cycle abandoned");
                break;
            }

            match self.engine.evaluate(snapshot, &self.ledger) {
                Decision::Hold => {}
                Decision::Open(plan) => {
                    outcomes.push(self.coordinator.open(plan, &mut self.ledger).await);
                }
                Decision::Close(orders) => {
                    for order in &orders {
                        if !self.status.get().is_running() {
                            break;
                        }
                        outcomes.push(self.coordinator.close(order, &mut self.ledger).await);
                    }
                }
            }
        }

        debug!(
            assets = snapshots.len(),
            actions = outcomes.len(),
            open_positions = self.ledger.len(),
            "Cycle complete"
        );
        outcomes
    }
}
