//! # CM Work Order Manager
//!
//! Corrective work-order lifecycle and part consumption.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Open ──assign──► InProgress ──complete──► Completed ──close──► Closed │
//! │     │               │      ▲                                            │
//! │     │      shortage │      │ parts fulfilled                            │
//! │     │               ▼      │                                            │
//! │     │             PendingParts                                          │
//! │     │               │                                                   │
//! │     └───────────────┴──── cancel (with reason) ────► Cancelled          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consuming Parts
//! A consume that the ledger refuses for lack of stock is not an error for
//! the work order: the shortage is recorded, an in-progress order moves to
//! PendingParts, and that change is committed. The caller gets
//! [`ConsumeOutcome::PendingParts`] carrying the stock error.
//!
//! Later successful consumes of the same part count toward its shortage. The
//! shortage is fulfilled once they add up to the requested quantity, and once
//! no shortage is open the order returns to InProgress on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use cmms_core::store::{StoreTx, WorkOrderFilter};
use cmms_core::validation::{validate_optional_text, validate_quantity, validate_text};
use cmms_core::work_order::{
    check_cancel, check_close, check_complete, check_consumption, check_shortage,
    check_transition,
};
use cmms_core::{
    new_id, Action, CoreError, CoreResult, Money, PartConsumption, PartShortage, Priority, Role,
    ShortageResolution, StockTransaction, ValidationError, WorkOrder, WorkOrderStatus,
};

use crate::audit::{AuditDraft, Mutation};
use crate::ledger::{load_part, Ledger};
use crate::locks::EntityLocks;
use crate::registry::require_active;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWorkOrder {
    pub equipment_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
}

/// Result of a consume request that reached the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    /// Stock was debited.
    Consumed {
        work_order: WorkOrder,
        transaction: StockTransaction,
    },
    /// Stock was short; the shortage is recorded and the order is blocked.
    PendingParts {
        work_order: WorkOrder,
        error: CoreError,
    },
}

impl ConsumeOutcome {
    pub fn work_order(&self) -> &WorkOrder {
        match self {
            ConsumeOutcome::Consumed { work_order, .. } => work_order,
            ConsumeOutcome::PendingParts { work_order, .. } => work_order,
        }
    }

    /// The ledger entry, or the stock error for a blocked order.
    pub fn into_result(self) -> CoreResult<StockTransaction> {
        match self {
            ConsumeOutcome::Consumed { transaction, .. } => Ok(transaction),
            ConsumeOutcome::PendingParts { error, .. } => Err(error),
        }
    }
}

async fn load_work_order<T: StoreTx>(tx: &mut T, id: &str) -> CoreResult<WorkOrder> {
    tx.get_work_order(id)
        .await?
        .ok_or_else(|| CoreError::not_found("WorkOrder", id))
}

/// Records (or refreshes) the open shortage for `part_id`.
fn raise_shortage(
    wo: &mut WorkOrder,
    part_id: &str,
    requested: i64,
    available: i64,
    now: DateTime<Utc>,
) {
    match wo
        .shortages
        .iter_mut()
        .find(|s| s.is_open() && s.part_id == part_id)
    {
        Some(open) => {
            open.requested = requested;
            open.available = available;
            open.fulfilled = 0;
        }
        None => wo.shortages.push(PartShortage {
            part_id: part_id.to_string(),
            requested,
            available,
            fulfilled: 0,
            raised_at: now,
            resolved_at: None,
            resolution: None,
        }),
    }
}

/// Credits a successful draw against the open shortage for `part_id`.
/// The shortage resolves only once the draws cover what was requested.
fn fulfil_shortage(wo: &mut WorkOrder, part_id: &str, quantity: i64, now: DateTime<Utc>) -> bool {
    let Some(open) = wo
        .shortages
        .iter_mut()
        .find(|s| s.is_open() && s.part_id == part_id)
    else {
        return false;
    };
    open.fulfilled = open.fulfilled.saturating_add(quantity);
    if open.outstanding() > 0 {
        return false;
    }
    open.resolved_at = Some(now);
    open.resolution = Some(ShortageResolution::Fulfilled);
    true
}

/// Resolves open shortages for `part_id`. Returns how many were resolved.
fn resolve_shortages(
    wo: &mut WorkOrder,
    part_id: &str,
    resolution: ShortageResolution,
    now: DateTime<Utc>,
) -> usize {
    let mut resolved = 0;
    for shortage in wo
        .shortages
        .iter_mut()
        .filter(|s| s.is_open() && s.part_id == part_id)
    {
        shortage.resolved_at = Some(now);
        shortage.resolution = Some(resolution);
        resolved += 1;
    }
    resolved
}

/// Returns a PendingParts order with nothing left open to InProgress.
fn release_if_clear(wo: &mut WorkOrder) -> bool {
    if wo.status == WorkOrderStatus::PendingParts && !wo.has_open_shortages() {
        wo.status = WorkOrderStatus::InProgress;
        return true;
    }
    false
}

fn stamp(wo: &mut WorkOrder, before: &WorkOrder, now: DateTime<Utc>) {
    wo.updated_at = now;
    wo.version = before.version + 1;
}

#[derive(Debug)]
pub struct WorkOrderManager {
    locks: EntityLocks,
}

impl Default for WorkOrderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkOrderManager {
    pub fn new() -> Self {
        WorkOrderManager {
            locks: EntityLocks::new("work_order"),
        }
    }

    /// Serializes mutations of one order. Take before any part lock.
    pub async fn lock(&self, work_order_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(work_order_id).await
    }

    async fn save<T: StoreTx>(
        &self,
        tx: &mut T,
        action: Action,
        before: WorkOrder,
        after: WorkOrder,
    ) -> CoreResult<Mutation<WorkOrder>> {
        tx.update_work_order(&after, before.version).await?;
        info!(
            work_order_id = %after.id,
            action = %action,
            from = %before.status,
            to = %after.status,
            "Work order updated"
        );
        let audit = AuditDraft::new(action)
            .target(&after.id)
            .before(&before)
            .after(&after);
        Ok(Mutation::new(after, audit))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn create<T: StoreTx>(
        &self,
        tx: &mut T,
        input: NewWorkOrder,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<WorkOrder>> {
        validate_text("title", &input.title, 200)?;
        validate_optional_text("description", input.description.as_deref(), 2000)?;
        let equipment = require_active(tx, &input.equipment_id, "create work order").await?;

        let wo = WorkOrder {
            id: new_id(),
            equipment_id: equipment.id,
            title: input.title.trim().to_string(),
            description: input.description.map(|d| d.trim().to_string()),
            priority: input.priority,
            status: WorkOrderStatus::Open,
            created_by: actor_id.to_string(),
            assigned_to: None,
            consumptions: Vec::new(),
            shortages: Vec::new(),
            completion_note: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            closed_at: None,
            version: 1,
        };
        tx.insert_work_order(&wo).await?;

        info!(work_order_id = %wo.id, equipment_id = %wo.equipment_id, priority = ?wo.priority, "Work order created");
        let audit = AuditDraft::new(Action::CreateWorkOrder)
            .target(&wo.id)
            .after(&wo);
        Ok(Mutation::new(wo, audit))
    }

    /// Open → InProgress with an active technician or manager assigned.
    pub async fn assign<T: StoreTx>(
        &self,
        tx: &mut T,
        work_order_id: &str,
        assignee_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<WorkOrder>> {
        let before = load_work_order(tx, work_order_id).await?;
        check_transition(&before, WorkOrderStatus::InProgress)?;
        if before.status != WorkOrderStatus::Open {
            return Err(CoreError::InvalidTransition {
                entity: "WorkOrder".to_string(),
                id: before.id.clone(),
                from: before.status.to_string(),
                attempted: "assign".to_string(),
                rule: "only open work orders can be assigned".to_string(),
            });
        }

        let assignee = tx.get_user(assignee_id).await?;
        match &assignee {
            Some(u) if u.active && matches!(u.role, Role::Technician | Role::Manager) => {}
            _ => {
                return Err(ValidationError::InvalidReference {
                    field: "assignee".to_string(),
                    id: assignee_id.to_string(),
                    reason: "must be an active technician or manager".to_string(),
                }
                .into())
            }
        }

        let mut wo = before.clone();
        wo.status = WorkOrderStatus::InProgress;
        wo.assigned_to = Some(assignee_id.to_string());
        stamp(&mut wo, &before, now);
        self.save(tx, Action::AssignWorkOrder, before, wo).await
    }

    /// Flags a part as missing. InProgress orders move to PendingParts;
    /// PendingParts orders gain another shortage.
    pub async fn report_shortage<T: StoreTx>(
        &self,
        tx: &mut T,
        work_order_id: &str,
        part_id: &str,
        requested: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<WorkOrder>> {
        validate_quantity(requested)?;
        let before = load_work_order(tx, work_order_id).await?;
        check_shortage(&before)?;
        load_part(tx, part_id).await?;
        let available = tx.on_hand(part_id).await?;

        let mut wo = before.clone();
        raise_shortage(&mut wo, part_id, requested, available, now);
        if wo.status == WorkOrderStatus::InProgress {
            wo.status = WorkOrderStatus::PendingParts;
        }
        stamp(&mut wo, &before, now);
        self.save(tx, Action::ReportShortage, before, wo).await
    }

    /// PendingParts → InProgress once stock covers every open shortage.
    /// The shortages stay open until the parts are consumed.
    pub async fn resume<T: StoreTx>(
        &self,
        tx: &mut T,
        work_order_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<WorkOrder>> {
        let before = load_work_order(tx, work_order_id).await?;
        if before.status != WorkOrderStatus::PendingParts {
            return Err(CoreError::InvalidTransition {
                entity: "WorkOrder".to_string(),
                id: before.id.clone(),
                from: before.status.to_string(),
                attempted: "resume".to_string(),
                rule: "only orders pending parts can resume".to_string(),
            });
        }

        let open: Vec<PartShortage> = before.open_shortages().cloned().collect();
        for shortage in &open {
            let on_hand = tx.on_hand(&shortage.part_id).await?;
            if on_hand < shortage.outstanding() {
                let part = load_part(tx, &shortage.part_id).await?;
                return Err(CoreError::InsufficientStock {
                    part_id: part.id,
                    sku: part.sku,
                    on_hand,
                    requested: shortage.outstanding(),
                });
            }
        }

        let mut wo = before.clone();
        wo.status = WorkOrderStatus::InProgress;
        stamp(&mut wo, &before, now);
        self.save(tx, Action::ResumeWorkOrder, before, wo).await
    }

    pub async fn complete<T: StoreTx>(
        &self,
        tx: &mut T,
        work_order_id: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<WorkOrder>> {
        if !note.trim().is_empty() {
            validate_text("completion_note", note, 2000)?;
        }
        let before = load_work_order(tx, work_order_id).await?;
        check_complete(&before, note)?;

        let mut wo = before.clone();
        wo.status = WorkOrderStatus::Completed;
        wo.completion_note = Some(note.trim().to_string());
        wo.completed_at = Some(now);
        stamp(&mut wo, &before, now);
        self.save(tx, Action::CompleteWorkOrder, before, wo).await
    }

    pub async fn close<T: StoreTx>(
        &self,
        tx: &mut T,
        work_order_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<WorkOrder>> {
        let before = load_work_order(tx, work_order_id).await?;
        check_close(&before)?;

        let mut wo = before.clone();
        wo.status = WorkOrderStatus::Closed;
        wo.closed_at = Some(now);
        stamp(&mut wo, &before, now);
        self.save(tx, Action::CloseWorkOrder, before, wo).await
    }

    pub async fn cancel<T: StoreTx>(
        &self,
        tx: &mut T,
        work_order_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<WorkOrder>> {
        let before = load_work_order(tx, work_order_id).await?;
        check_cancel(&before, reason)?;

        let mut wo = before.clone();
        wo.status = WorkOrderStatus::Cancelled;
        wo.cancel_reason = Some(reason.trim().to_string());
        stamp(&mut wo, &before, now);
        let mutation = self.save(tx, Action::CancelWorkOrder, before, wo).await?;
        let detail = format!("cancelled: {}", reason.trim());
        Ok(Mutation::new(mutation.value, mutation.audit.detail(detail)))
    }

    // =========================================================================
    // Parts
    // =========================================================================

    /// Draws `quantity` of a part from the ledger for this order.
    ///
    /// ## Returns
    /// * `Ok(Consumed)` - stock debited and credited to any open shortage
    /// * `Ok(PendingParts)` - stock short, shortage recorded (commit it)
    /// * `Err(InvalidTransition)` - order is not being worked; ledger untouched
    #[allow(clippy::too_many_arguments)]
    pub async fn consume_part<T: StoreTx>(
        &self,
        tx: &mut T,
        ledger: &Ledger,
        work_order_id: &str,
        part_id: &str,
        quantity: i64,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<ConsumeOutcome>> {
        validate_quantity(quantity)?;
        let before = load_work_order(tx, work_order_id).await?;
        check_consumption(&before)?;

        let mut wo = before.clone();
        match ledger
            .consume(tx, part_id, quantity, &wo.id, actor_id, now)
            .await
        {
            Ok(transaction) => {
                wo.consumptions.push(PartConsumption {
                    part_id: part_id.to_string(),
                    quantity,
                    transaction_id: transaction.id.clone(),
                    consumed_at: now,
                });
                fulfil_shortage(&mut wo, part_id, quantity, now);
                let released = release_if_clear(&mut wo);
                stamp(&mut wo, &before, now);

                let mut detail = format!("consumed {} of part {}", quantity, part_id);
                if released {
                    detail.push_str("; shortages cleared, resumed");
                }
                let mutation = self.save(tx, Action::ConsumePart, before, wo).await?;
                let audit = mutation.audit.detail(detail);
                Ok(Mutation::new(
                    ConsumeOutcome::Consumed {
                        work_order: mutation.value,
                        transaction,
                    },
                    audit,
                ))
            }
            Err(error @ CoreError::InsufficientStock { .. }) => {
                let available = match &error {
                    CoreError::InsufficientStock { on_hand, .. } => *on_hand,
                    _ => 0,
                };
                warn!(work_order_id = %wo.id, part_id, quantity, available, "Part short, work order blocked");

                raise_shortage(&mut wo, part_id, quantity, available, now);
                if wo.status == WorkOrderStatus::InProgress {
                    wo.status = WorkOrderStatus::PendingParts;
                }
                stamp(&mut wo, &before, now);

                let mutation = self.save(tx, Action::ConsumePart, before, wo).await?;
                let audit = mutation.audit.detail(error.to_string());
                Ok(Mutation::new(
                    ConsumeOutcome::PendingParts {
                        work_order: mutation.value,
                        error,
                    },
                    audit,
                ))
            }
            Err(other) => Err(other),
        }
    }

    /// Releases the order from needing a part without consuming it.
    pub async fn waive_shortage<T: StoreTx>(
        &self,
        tx: &mut T,
        work_order_id: &str,
        part_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<WorkOrder>> {
        let before = load_work_order(tx, work_order_id).await?;
        check_shortage(&before)?;

        let mut wo = before.clone();
        if resolve_shortages(&mut wo, part_id, ShortageResolution::Waived, now) == 0 {
            return Err(CoreError::InvalidTransition {
                entity: "WorkOrder".to_string(),
                id: before.id.clone(),
                from: before.status.to_string(),
                attempted: "waive shortage".to_string(),
                rule: format!("no open shortage for part {}", part_id),
            });
        }
        release_if_clear(&mut wo);
        stamp(&mut wo, &before, now);

        let mutation = self.save(tx, Action::WaiveShortage, before, wo).await?;
        let audit = mutation
            .audit
            .detail(format!("shortage of part {} waived", part_id));
        Ok(Mutation::new(mutation.value, audit))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get<T: StoreTx>(&self, tx: &mut T, work_order_id: &str) -> CoreResult<WorkOrder> {
        load_work_order(tx, work_order_id).await
    }

    pub async fn list<T: StoreTx>(
        &self,
        tx: &mut T,
        filter: &WorkOrderFilter,
    ) -> CoreResult<Vec<WorkOrder>> {
        tx.list_work_orders(filter).await
    }

    /// Σ quantity × current unit cost over the order's consumptions.
    pub async fn parts_cost<T: StoreTx>(&self, tx: &mut T, work_order_id: &str) -> CoreResult<Money> {
        let wo = load_work_order(tx, work_order_id).await?;
        let mut total = Money::zero();
        for consumption in &wo.consumptions {
            let part = load_part(tx, &consumption.part_id).await?;
            total += part.unit_cost().extended(consumption.quantity);
        }
        Ok(total)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
