//! # Parts Stock Ledger
//!
//! Part catalog plus the append-only stock ledger. On-hand is always the sum
//! of a part's deltas; nothing stores a balance.
//!
//! ## Append Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  lock(part)                        (held by the orchestrator)           │
//! │     │                                                                   │
//! │     ├─ on_hand = Σ delta           (inside the tx)                      │
//! │     ├─ on_hand + delta ≥ 0 ?       no ──► InsufficientStock             │
//! │     ├─ update_part(version + 1)    stale ──► Conflict                   │
//! │     └─ append StockTransaction                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The version bump on every append makes two writers that slipped past
//! the in-process lock (another process on the same database) collide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use cmms_core::stock::{
    check_debit, is_below_threshold, usage_by_part, valuate, PartUsage, StockLevel,
    StockValuation,
};
use cmms_core::store::{LogCursor, StoreTx};
use cmms_core::validation::{
    validate_adjustment, validate_optional_text, validate_quantity, validate_sku, validate_text,
};
use cmms_core::{
    new_id, Action, CoreError, CoreResult, Part, StockReason, StockTransaction, ValidationError,
};

use crate::audit::{AuditDraft, Mutation};
use crate::locks::EntityLocks;

/// Fields for a new catalog part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPart {
    pub sku: String,
    pub name: String,
    pub location: Option<String>,
    pub reorder_threshold: i64,
    pub unit_cost_cents: i64,
}

/// Partial update of a part. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartChanges {
    pub name: Option<String>,
    pub location: Option<String>,
    pub reorder_threshold: Option<i64>,
    pub unit_cost_cents: Option<i64>,
}

fn check_non_negative(field: &str, value: i64) -> CoreResult<()> {
    if value < 0 {
        return Err(CoreError::invalid_config(
            field,
            format!("must be zero or more, got {}", value),
        ));
    }
    Ok(())
}

/// Rows per store round trip when scanning the ledger for a report.
const USAGE_SCAN_PAGE: usize = 500;

/// Loads a part or fails with `NotFound`.
pub(crate) async fn load_part<T: StoreTx>(tx: &mut T, part_id: &str) -> CoreResult<Part> {
    tx.get_part(part_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Part", part_id))
}

#[derive(Debug)]
pub struct Ledger {
    locks: EntityLocks,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Ledger {
            locks: EntityLocks::new("part"),
        }
    }

    /// Serializes appends for one part.
    pub async fn lock(&self, part_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(part_id).await
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub async fn create_part<T: StoreTx>(
        &self,
        tx: &mut T,
        input: NewPart,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<Part>> {
        validate_sku(&input.sku)?;
        validate_text("name", &input.name, 200)?;
        validate_optional_text("location", input.location.as_deref(), 100)?;
        check_non_negative("reorder_threshold", input.reorder_threshold)?;
        check_non_negative("unit_cost_cents", input.unit_cost_cents)?;

        let sku = input.sku.trim().to_string();
        if tx.get_part_by_sku(&sku).await?.is_some() {
            return Err(ValidationError::Duplicate {
                field: "sku".to_string(),
                value: sku,
            }
            .into());
        }

        let part = Part {
            id: new_id(),
            sku,
            name: input.name.trim().to_string(),
            location: input.location.map(|l| l.trim().to_string()),
            reorder_threshold: input.reorder_threshold,
            unit_cost_cents: input.unit_cost_cents,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        tx.insert_part(&part).await?;

        info!(part_id = %part.id, sku = %part.sku, "Part created");
        let audit = AuditDraft::new(Action::CreatePart)
            .target(&part.id)
            .after(&part);
        Ok(Mutation::new(part, audit))
    }

    pub async fn update_part<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: &str,
        changes: PartChanges,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<Part>> {
        let before = load_part(tx, part_id).await?;
        let mut part = before.clone();

        if let Some(name) = changes.name {
            validate_text("name", &name, 200)?;
            part.name = name.trim().to_string();
        }
        if let Some(location) = changes.location {
            validate_text("location", &location, 100)?;
            part.location = Some(location.trim().to_string());
        }
        if let Some(threshold) = changes.reorder_threshold {
            check_non_negative("reorder_threshold", threshold)?;
            part.reorder_threshold = threshold;
        }
        if let Some(cost) = changes.unit_cost_cents {
            check_non_negative("unit_cost_cents", cost)?;
            part.unit_cost_cents = cost;
        }

        part.updated_at = now;
        part.version = before.version + 1;
        tx.update_part(&part, before.version).await?;

        let audit = AuditDraft::new(Action::UpdatePart)
            .target(&part.id)
            .before(&before)
            .after(&part);
        Ok(Mutation::new(part, audit))
    }

    // =========================================================================
    // Stock Movements
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn append<T: StoreTx>(
        &self,
        tx: &mut T,
        part: &Part,
        delta: i64,
        reason: StockReason,
        work_order_id: Option<&str>,
        note: Option<String>,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<StockTransaction> {
        let mut bumped = part.clone();
        bumped.version = part.version + 1;
        tx.update_part(&bumped, part.version).await?;

        let transaction = StockTransaction {
            id: new_id(),
            part_id: part.id.clone(),
            delta,
            reason,
            work_order_id: work_order_id.map(str::to_string),
            note,
            actor_id: actor_id.to_string(),
            recorded_at: now,
        };

        debug!(part_id = %part.id, delta, reason = ?reason, "Appending stock transaction");
        tx.append_stock_transaction(&transaction).await?;
        Ok(transaction)
    }

    /// Debits `quantity` against a work order. Audited by the caller.
    ///
    /// ## Arguments
    /// * `work_order_id` - Order the parts are drawn for
    /// * `actor_id` - User confirming the consumption
    pub async fn consume<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: &str,
        quantity: i64,
        work_order_id: &str,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<StockTransaction> {
        validate_quantity(quantity)?;
        let part = load_part(tx, part_id).await?;
        let on_hand = tx.on_hand(part_id).await?;
        check_debit(&part, on_hand, quantity)?;

        self.append(
            tx,
            &part,
            -quantity,
            StockReason::Consumption,
            Some(work_order_id),
            None,
            actor_id,
            now,
        )
        .await
    }

    /// Receives `quantity` units into stock.
    pub async fn replenish<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: &str,
        quantity: i64,
        note: Option<String>,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<StockTransaction>> {
        validate_quantity(quantity)?;
        validate_optional_text("note", note.as_deref(), 500)?;
        let part = load_part(tx, part_id).await?;
        let on_hand = tx.on_hand(part_id).await?;

        let transaction = self
            .append(
                tx,
                &part,
                quantity,
                StockReason::Replenishment,
                None,
                note,
                actor_id,
                now,
            )
            .await?;

        info!(part_id = %part.id, sku = %part.sku, quantity, "Stock replenished");
        let audit = AuditDraft::new(Action::ReplenishStock)
            .target(&part.id)
            .before(&json!({ "on_hand": on_hand }))
            .after(&json!({ "on_hand": on_hand + quantity, "transaction": transaction }));
        Ok(Mutation::new(transaction, audit))
    }

    /// Cycle-count correction. A note is required; on-hand never goes negative.
    pub async fn adjust<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: &str,
        delta: i64,
        note: String,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<StockTransaction>> {
        validate_adjustment(delta)?;
        validate_text("note", &note, 500)?;
        let part = load_part(tx, part_id).await?;
        let on_hand = tx.on_hand(part_id).await?;
        if delta < 0 {
            check_debit(&part, on_hand, -delta)?;
        }

        let detail = note.trim().to_string();
        let transaction = self
            .append(
                tx,
                &part,
                delta,
                StockReason::Adjustment,
                None,
                Some(detail.clone()),
                actor_id,
                now,
            )
            .await?;

        info!(part_id = %part.id, sku = %part.sku, delta, "Stock adjusted");
        let audit = AuditDraft::new(Action::AdjustStock)
            .target(&part.id)
            .before(&json!({ "on_hand": on_hand }))
            .after(&json!({ "on_hand": on_hand + delta, "transaction": transaction }))
            .detail(detail);
        Ok(Mutation::new(transaction, audit))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_part<T: StoreTx>(&self, tx: &mut T, part_id: &str) -> CoreResult<Part> {
        load_part(tx, part_id).await
    }

    pub async fn list_parts<T: StoreTx>(&self, tx: &mut T) -> CoreResult<Vec<Part>> {
        tx.list_parts().await
    }

    pub async fn on_hand<T: StoreTx>(&self, tx: &mut T, part_id: &str) -> CoreResult<i64> {
        load_part(tx, part_id).await?;
        tx.on_hand(part_id).await
    }

    pub async fn below_reorder_threshold<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: &str,
    ) -> CoreResult<bool> {
        let part = load_part(tx, part_id).await?;
        let on_hand = tx.on_hand(part_id).await?;
        Ok(is_below_threshold(on_hand, part.reorder_threshold))
    }

    pub async fn stock_level<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: &str,
    ) -> CoreResult<StockLevel> {
        let part = load_part(tx, part_id).await?;
        let on_hand = tx.on_hand(part_id).await?;
        Ok(StockLevel::new(part, on_hand))
    }

    async fn all_levels<T: StoreTx>(&self, tx: &mut T) -> CoreResult<Vec<StockLevel>> {
        let parts = tx.list_parts().await?;
        let mut levels = Vec::with_capacity(parts.len());
        for part in parts {
            let on_hand = tx.on_hand(&part.id).await?;
            levels.push(StockLevel::new(part, on_hand));
        }
        Ok(levels)
    }

    /// Parts below their reorder threshold, largest shortfall first.
    pub async fn low_stock<T: StoreTx>(&self, tx: &mut T) -> CoreResult<Vec<StockLevel>> {
        let mut levels: Vec<StockLevel> = self
            .all_levels(tx)
            .await?
            .into_iter()
            .filter(|l| l.below_threshold)
            .collect();
        levels.sort_by(|a, b| {
            b.shortfall()
                .cmp(&a.shortfall())
                .then_with(|| a.part.sku.cmp(&b.part.sku))
        });
        Ok(levels)
    }

    pub async fn valuation<T: StoreTx>(&self, tx: &mut T) -> CoreResult<StockValuation> {
        let levels = self.all_levels(tx).await?;
        Ok(valuate(&levels))
    }

    /// The part's ledger, oldest first.
    pub async fn transactions_for<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: &str,
    ) -> CoreResult<Vec<StockTransaction>> {
        load_part(tx, part_id).await?;
        tx.stock_transactions_for_part(part_id).await
    }

    /// Per-part consumption recorded at or after `since`: quantity, distinct
    /// work orders and cost, costliest first.
    pub async fn usage_report<T: StoreTx>(
        &self,
        tx: &mut T,
        since: DateTime<Utc>,
    ) -> CoreResult<Vec<PartUsage>> {
        // An empty id sorts before every real one at `since`.
        let mut after = LogCursor {
            recorded_at: since,
            id: String::new(),
        };
        let mut consumed = Vec::new();
        loop {
            let page = tx
                .stock_transactions_page(None, Some(&after), USAGE_SCAN_PAGE)
                .await?;
            let last_page = page.len() < USAGE_SCAN_PAGE;
            if let Some(last) = page.last() {
                after = LogCursor::of_stock(last);
            }
            consumed.extend(
                page.into_iter()
                    .filter(|t| t.reason == StockReason::Consumption),
            );
            if last_page {
                break;
            }
        }

        let parts = tx.list_parts().await?;
        let usage = usage_by_part(&consumed, &parts);
        debug!(%since, parts = usage.len(), "Parts usage report built");
        Ok(usage)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use cmms_core::store::Store;

    fn bearing() -> NewPart {
        NewPart {
            sku: "BRG-6204".into(),
            name: "Deep groove bearing".into(),
            location: Some("Bin A3".into()),
            reorder_threshold: 4,
            unit_cost_cents: 1250,
        }
    }

    #[tokio::test]
    async fn test_replenish_then_consume() {
        let store = MemoryStore::new();
        let ledger = Ledger::new();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let part = ledger.create_part(&mut tx, bearing(), now).await.unwrap().value;
        ledger
            .replenish(&mut tx, &part.id, 10, None, "u-3", now)
            .await
            .unwrap();
        let debit = ledger
            .consume(&mut tx, &part.id, 7, "wo-1", "u-2", now)
            .await
            .unwrap();

        assert_eq!(debit.delta, -7);
        assert_eq!(debit.work_order_id.as_deref(), Some("wo-1"));
        assert_eq!(ledger.on_hand(&mut tx, &part.id).await.unwrap(), 3);
        assert!(ledger
            .below_reorder_threshold(&mut tx, &part.id)
            .await
            .unwrap());
        // create + two appends
        assert_eq!(ledger.get_part(&mut tx, &part.id).await.unwrap().version, 3);
    }

    #[tokio::test]
    async fn test_consume_beyond_on_hand_is_refused() {
        let store = MemoryStore::new();
        let ledger = Ledger::new();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let part = ledger.create_part(&mut tx, bearing(), now).await.unwrap().value;
        ledger
            .replenish(&mut tx, &part.id, 3, None, "u-3", now)
            .await
            .unwrap();

        match ledger.consume(&mut tx, &part.id, 5, "wo-1", "u-2", now).await {
            Err(CoreError::InsufficientStock {
                on_hand, requested, ..
            }) => {
                assert_eq!(on_hand, 3);
                assert_eq!(requested, 5);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(ledger.on_hand(&mut tx, &part.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_adjust_cannot_go_negative() {
        let store = MemoryStore::new();
        let ledger = Ledger::new();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let part = ledger.create_part(&mut tx, bearing(), now).await.unwrap().value;
        ledger
            .replenish(&mut tx, &part.id, 2, None, "u-3", now)
            .await
            .unwrap();

        assert!(ledger
            .adjust(&mut tx, &part.id, -3, "cycle count".into(), "u-3", now)
            .await
            .is_err());
        let m = ledger
            .adjust(&mut tx, &part.id, -2, "cycle count".into(), "u-3", now)
            .await
            .unwrap();
        assert_eq!(m.value.reason, StockReason::Adjustment);
        assert_eq!(ledger.on_hand(&mut tx, &part.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_negative_threshold_is_invalid_configuration() {
        let store = MemoryStore::new();
        let ledger = Ledger::new();
        let mut tx = store.begin().await.unwrap();
        let part = ledger
            .create_part(&mut tx, bearing(), Utc::now())
            .await
            .unwrap()
            .value;

        let result = ledger
            .update_part(
                &mut tx,
                &part.id,
                PartChanges {
                    reorder_threshold: Some(-1),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await;
        assert!(matches!(
            result,
            Err(CoreError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_sku() {
        let store = MemoryStore::new();
        let ledger = Ledger::new();
        let mut tx = store.begin().await.unwrap();
        ledger.create_part(&mut tx, bearing(), Utc::now()).await.unwrap();
        assert!(matches!(
            ledger.create_part(&mut tx, bearing(), Utc::now()).await,
            Err(CoreError::Validation(ValidationError::Duplicate { .. }))
        ));
    }

    #[tokio::test]
    async fn test_low_stock_and_valuation() {
        let store = MemoryStore::new();
        let ledger = Ledger::new();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let low = ledger.create_part(&mut tx, bearing(), now).await.unwrap().value;
        let ok = ledger
            .create_part(
                &mut tx,
                NewPart {
                    sku: "FLT-100".into(),
                    name: "Oil filter".into(),
                    location: None,
                    reorder_threshold: 1,
                    unit_cost_cents: 500,
                },
                now,
            )
            .await
            .unwrap()
            .value;
        ledger.replenish(&mut tx, &low.id, 1, None, "u", now).await.unwrap();
        ledger.replenish(&mut tx, &ok.id, 4, None, "u", now).await.unwrap();

        let report = ledger.low_stock(&mut tx).await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].part.sku, "BRG-6204");
        assert_eq!(report[0].shortfall(), 3);

        let valuation = ledger.valuation(&mut tx).await.unwrap();
        assert_eq!(valuation.part_count, 2);
        assert_eq!(valuation.total_units, 5);
        assert_eq!(valuation.total_value.cents(), 1250 + 4 * 500);
        assert_eq!(valuation.low_stock_count, 1);
    }

    #[tokio::test]
    async fn test_usage_report_counts_draws_since() {
        let store = MemoryStore::new();
        let ledger = Ledger::new();
        let now = Utc::now();
        let earlier = now - chrono::Duration::days(120);
        let mut tx = store.begin().await.unwrap();

        let part = ledger.create_part(&mut tx, bearing(), earlier).await.unwrap().value;
        ledger.replenish(&mut tx, &part.id, 20, None, "u", earlier).await.unwrap();
        ledger.consume(&mut tx, &part.id, 5, "wo-old", "u", earlier).await.unwrap();
        ledger.consume(&mut tx, &part.id, 2, "wo-1", "u", now).await.unwrap();
        ledger.consume(&mut tx, &part.id, 1, "wo-1", "u", now).await.unwrap();
        ledger.consume(&mut tx, &part.id, 3, "wo-2", "u", now).await.unwrap();

        let since = now - chrono::Duration::days(90);
        let usage = ledger.usage_report(&mut tx, since).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].sku, "BRG-6204");
        assert_eq!(usage[0].total_quantity, 6);
        assert_eq!(usage[0].work_order_count, 2);
        assert_eq!(usage[0].total_cost.cents(), 6 * 1250);

        // Draws at exactly `since` are included.
        let all = ledger.usage_report(&mut tx, earlier).await.unwrap();
        assert_eq!(all[0].total_quantity, 11);
        assert_eq!(all[0].work_order_count, 3);
    }
}
