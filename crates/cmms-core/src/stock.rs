//! # Stock Ledger Rules
//!
//! Balance derivation and debit checks for the parts ledger. Balances are
//! never stored; they are the sum of a part's transaction deltas.
//!
//! ```text
//!   +20 replenishment ─┐
//!    -5 consumption   ─┼──► on-hand = 12      (never < 0)
//!    -3 adjustment    ─┘
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Part, StockReason, StockTransaction};

/// Sums transaction deltas.
pub fn on_hand<'a>(transactions: impl IntoIterator<Item = &'a StockTransaction>) -> i64 {
    transactions.into_iter().map(|t| t.delta).sum()
}

/// Rejects a debit of `quantity` that would take `on_hand` below zero.
pub fn check_debit(part: &Part, on_hand: i64, quantity: i64) -> CoreResult<()> {
    if on_hand - quantity < 0 {
        return Err(CoreError::InsufficientStock {
            part_id: part.id.clone(),
            sku: part.sku.clone(),
            on_hand,
            requested: quantity,
        });
    }
    Ok(())
}

/// Strictly below the reorder threshold.
pub fn is_below_threshold(on_hand: i64, reorder_threshold: i64) -> bool {
    on_hand < reorder_threshold
}

/// A part with its derived balance, as shown on stock reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockLevel {
    pub part: Part,
    pub on_hand: i64,
    pub below_threshold: bool,
    pub value: Money,
}

impl StockLevel {
    pub fn new(part: Part, on_hand: i64) -> Self {
        let below_threshold = is_below_threshold(on_hand, part.reorder_threshold);
        let value = part.unit_cost().extended(on_hand);
        StockLevel {
            part,
            on_hand,
            below_threshold,
            value,
        }
    }

    /// Units to order to get back to the threshold.
    pub fn shortfall(&self) -> i64 {
        (self.part.reorder_threshold - self.on_hand).max(0)
    }
}

/// Aggregate stock figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockValuation {
    pub part_count: i64,
    pub total_units: i64,
    pub total_value: Money,
    pub low_stock_count: i64,
}

/// Rolls stock levels up into a valuation.
pub fn valuate<'a>(levels: impl IntoIterator<Item = &'a StockLevel>) -> StockValuation {
    levels
        .into_iter()
        .fold(StockValuation::default(), |mut acc, level| {
            acc.part_count += 1;
            acc.total_units += level.on_hand;
            acc.total_value += level.value;
            if level.below_threshold {
                acc.low_stock_count += 1;
            }
            acc
        })
}

// =============================================================================
// Usage Report
// =============================================================================

/// Consumption of one part over a reporting window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PartUsage {
    pub part_id: String,
    pub sku: String,
    pub name: String,
    pub total_quantity: i64,
    /// Distinct work orders that drew the part.
    pub work_order_count: i64,
    /// Quantity at the current unit cost.
    pub total_cost: Money,
}

/// Rolls consumption transactions up per part, costliest first, then by sku.
/// Other reasons and unknown parts are ignored.
pub fn usage_by_part<'a>(
    transactions: impl IntoIterator<Item = &'a StockTransaction>,
    parts: &[Part],
) -> Vec<PartUsage> {
    let mut drawn: BTreeMap<&str, (i64, BTreeSet<&str>)> = BTreeMap::new();
    for t in transactions
        .into_iter()
        .filter(|t| t.reason == StockReason::Consumption)
    {
        let entry = drawn.entry(t.part_id.as_str()).or_default();
        entry.0 += -t.delta;
        if let Some(wo) = t.work_order_id.as_deref() {
            entry.1.insert(wo);
        }
    }

    let mut usage: Vec<PartUsage> = parts
        .iter()
        .filter_map(|part| {
            let (quantity, orders) = drawn.get(part.id.as_str())?;
            Some(PartUsage {
                part_id: part.id.clone(),
                sku: part.sku.clone(),
                name: part.name.clone(),
                total_quantity: *quantity,
                work_order_count: orders.len() as i64,
                total_cost: part.unit_cost().extended(*quantity),
            })
        })
        .collect();
    usage.sort_by(|a, b| b.total_cost.cmp(&a.total_cost).then_with(|| a.sku.cmp(&b.sku)));
    usage
}

// =============================================================================
// Unit Tests
// =============================================================================
