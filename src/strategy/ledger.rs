//! Registry of open hedges.

use crate::exchange::TradeConfig;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// An open hedge.
///
/// The stored configs are already side-reversed, ready to be submitted as
/// the closing legs.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationItem {
    pub asset: String,
    pub batch: String,
    pub future: TradeConfig,
    pub spot: TradeConfig,
    pub future_entry_price: Decimal,
    pub spot_entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl OperationItem {
    /// Update the reference prices of the closing legs.
    pub fn refresh_prices(&mut self, future_price: Decimal, spot_price: Decimal) {
        self.future.price = future_price;
        self.spot.price = spot_price;
    }
}

/// Open hedges keyed by a monotonically increasing index.
///
/// Indices are never reused, even after removal.
#[derive(Debug, Default)]
pub struct PositionLedger {
    items: BTreeMap<u64, OperationItem>,
    next_index: u64,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a hedge and return its index.
    pub fn insert(&mut self, item: OperationItem) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.items.insert(index, item);
        index
    }

    pub fn get(&self, index: u64) -> Option<&OperationItem> {
        self.items.get(&index)
    }

    pub fn get_mut(&mut self, index: u64) -> Option<&mut OperationItem> {
        self.items.get_mut(&index)
    }

    /// Remove a hedge; removing an unknown index is a no-op.
    pub fn remove(&mut self, index: u64) -> Option<OperationItem> {
        self.items.remove(&index)
    }

    /// Indices of the open hedges on `asset`, ascending.
    pub fn positions_for(&self, asset: &str) -> Vec<u64> {
        self.items
            .iter()
            .filter(|(_, item)| item.asset == asset)
            .map(|(index, _)| *index)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &OperationItem)> {
        self.items.iter().map(|(index, item)| (*index, item))
    }
}
