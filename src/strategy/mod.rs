//! Hedge strategy.
//!
//! Contains the core logic for:
//! - Spread polling across the future and spot markets
//! - Open/close decisions per asset
//! - Concurrent dual-leg execution with partial-fill recovery
//! - The registry of open hedges

pub mod coordinator;
pub mod decision;
pub mod executor;
pub mod ledger;
pub mod monitor;

pub use coordinator::{DualLegCoordinator, HedgeOutcome, SkipReason};
pub use decision::{CloseOrder, CloseReason, Decision, HedgeDecisionEngine, HedgePlan};
pub use executor::LegExecutor;
pub use ledger::{OperationItem, PositionLedger};
pub use monitor::{SpreadMonitor, SpreadSnapshot};
