//! # Persistence Port
//!
//! The generic storage interface the service layer runs against. The core
//! never names a database; implementations live in `cmms-service::memory`
//! (tests, embedding) and `cmms-db` (SQLite).
//!
//! ## Transaction Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  let mut tx = store.begin().await?;                                     │
//! │                                                                         │
//! │  tx.get_part(id)                 ← reads see the tx's own writes       │
//! │  tx.append_stock_transaction(t)  ← append-only logs                    │
//! │  tx.update_part(&p, expected)    ← optimistic version check            │
//! │  tx.append_audit(&entry)         ← same tx as the mutation             │
//! │                                                                         │
//! │  tx.commit().await?              ← all or nothing                      │
//! │  (drop / rollback = nothing happened)                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Versioning
//! `update_*(entity, expected_version)` succeeds only when the stored row is
//! still at `expected_version`; the caller has already set
//! `entity.version = expected_version + 1`. A mismatch is
//! [`CoreError::Conflict`](crate::CoreError::Conflict).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::types::{
    AuditEntry, Equipment, EquipmentStatus, MaintenanceTask, Part, PmCompletion, PmSchedule,
    Role, StockTransaction, User, WorkOrder, WorkOrderStatus,
};

// =============================================================================
// Filters & Cursors
// =============================================================================

/// Equipment list filter. Empty filter = everything, retired included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentFilter {
    pub status: Option<EquipmentStatus>,
    pub location: Option<String>,
}

impl EquipmentFilter {
    pub fn matches(&self, e: &Equipment) -> bool {
        self.status.map_or(true, |s| e.status == s)
            && self
                .location
                .as_deref()
                .map_or(true, |l| e.location == l)
    }
}

/// Work-order list filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderFilter {
    pub equipment_id: Option<String>,
    pub status: Option<WorkOrderStatus>,
    pub assigned_to: Option<String>,
    /// Only orders created at or after this instant.
    pub created_since: Option<DateTime<Utc>>,
}

impl WorkOrderFilter {
    pub fn for_equipment(equipment_id: impl Into<String>) -> Self {
        WorkOrderFilter {
            equipment_id: Some(equipment_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, wo: &WorkOrder) -> bool {
        self.equipment_id
            .as_deref()
            .map_or(true, |id| wo.equipment_id == id)
            && self.status.map_or(true, |s| wo.status == s)
            && self
                .assigned_to
                .as_deref()
                .map_or(true, |u| wo.assigned_to.as_deref() == Some(u))
            && self.created_since.map_or(true, |t| wo.created_at >= t)
    }
}

/// User list filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub active: Option<bool>,
}

impl UserFilter {
    pub fn matches(&self, u: &User) -> bool {
        self.role.map_or(true, |r| u.role == r) && self.active.map_or(true, |a| u.active == a)
    }
}

/// Keyset position in the due list: (next_due, equipment_id, schedule id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DueCursor {
    pub next_due: DateTime<Utc>,
    pub equipment_id: String,
    pub schedule_id: String,
}

impl DueCursor {
    pub fn of(s: &PmSchedule) -> Self {
        DueCursor {
            next_due: s.next_due,
            equipment_id: s.equipment_id.clone(),
            schedule_id: s.id.clone(),
        }
    }
}

/// Keyset position in an append-only log: (recorded_at, id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogCursor {
    pub recorded_at: DateTime<Utc>,
    pub id: String,
}

impl LogCursor {
    pub fn of_audit(e: &AuditEntry) -> Self {
        LogCursor {
            recorded_at: e.recorded_at,
            id: e.id.clone(),
        }
    }

    pub fn of_stock(t: &StockTransaction) -> Self {
        LogCursor {
            recorded_at: t.recorded_at,
            id: t.id.clone(),
        }
    }
}

// =============================================================================
// Store Traits
// =============================================================================

/// A handle that opens transactions. Cheap to clone, shared across tasks.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: StoreTx;

    /// Opens a transaction that may write.
    async fn begin(&self) -> CoreResult<Self::Tx>;

    /// Opens a transaction that only reads and is rolled back. Stores that
    /// can serve reads from a snapshot override this so readers never wait
    /// on writers.
    async fn begin_read(&self) -> CoreResult<Self::Tx> {
        self.begin().await
    }
}

/// One unit of work against the store.
///
/// Dropping a transaction without committing discards it.
#[async_trait]
pub trait StoreTx: Send {
    // -------------------------------------------------------------------------
    // Equipment
    // -------------------------------------------------------------------------
    async fn get_equipment(&mut self, id: &str) -> CoreResult<Option<Equipment>>;
    async fn list_equipment(&mut self, filter: &EquipmentFilter) -> CoreResult<Vec<Equipment>>;
    async fn insert_equipment(&mut self, equipment: &Equipment) -> CoreResult<()>;
    async fn update_equipment(
        &mut self,
        equipment: &Equipment,
        expected_version: i64,
    ) -> CoreResult<()>;

    // -------------------------------------------------------------------------
    // PM tasks, schedules, completions
    // -------------------------------------------------------------------------
    async fn get_task(&mut self, id: &str) -> CoreResult<Option<MaintenanceTask>>;
    async fn insert_task(&mut self, task: &MaintenanceTask) -> CoreResult<()>;

    async fn get_schedule(&mut self, id: &str) -> CoreResult<Option<PmSchedule>>;
    async fn schedules_for_equipment(&mut self, equipment_id: &str) -> CoreResult<Vec<PmSchedule>>;
    async fn insert_schedule(&mut self, schedule: &PmSchedule) -> CoreResult<()>;
    async fn update_schedule(
        &mut self,
        schedule: &PmSchedule,
        expected_version: i64,
    ) -> CoreResult<()>;

    /// Active schedules with `next_due <= due_by`, strictly after `after`,
    /// ordered by (next_due, equipment_id, id), at most `limit`.
    async fn due_schedules_page(
        &mut self,
        due_by: DateTime<Utc>,
        after: Option<&DueCursor>,
        limit: usize,
    ) -> CoreResult<Vec<PmSchedule>>;

    async fn append_completion(&mut self, completion: &PmCompletion) -> CoreResult<()>;
    /// Completions for a schedule, oldest first.
    async fn completions_for_schedule(&mut self, schedule_id: &str)
        -> CoreResult<Vec<PmCompletion>>;
    /// Completions for an equipment performed at or after `since`, oldest first.
    async fn completions_for_equipment(
        &mut self,
        equipment_id: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Vec<PmCompletion>>;

    // -------------------------------------------------------------------------
    // Work orders
    // -------------------------------------------------------------------------
    async fn get_work_order(&mut self, id: &str) -> CoreResult<Option<WorkOrder>>;
    /// Ordered by created_at, then id.
    async fn list_work_orders(&mut self, filter: &WorkOrderFilter) -> CoreResult<Vec<WorkOrder>>;
    async fn insert_work_order(&mut self, work_order: &WorkOrder) -> CoreResult<()>;
    async fn update_work_order(
        &mut self,
        work_order: &WorkOrder,
        expected_version: i64,
    ) -> CoreResult<()>;

    // -------------------------------------------------------------------------
    // Parts & stock ledger
    // -------------------------------------------------------------------------
    async fn get_part(&mut self, id: &str) -> CoreResult<Option<Part>>;
    async fn get_part_by_sku(&mut self, sku: &str) -> CoreResult<Option<Part>>;
    /// Ordered by sku.
    async fn list_parts(&mut self) -> CoreResult<Vec<Part>>;
    /// Fails with `Validation(Duplicate)` on a taken sku.
    async fn insert_part(&mut self, part: &Part) -> CoreResult<()>;
    async fn update_part(&mut self, part: &Part, expected_version: i64) -> CoreResult<()>;

    async fn append_stock_transaction(&mut self, transaction: &StockTransaction) -> CoreResult<()>;
    /// Σ delta for the part, including this transaction's own appends.
    async fn on_hand(&mut self, part_id: &str) -> CoreResult<i64>;
    /// Oldest first.
    async fn stock_transactions_for_part(
        &mut self,
        part_id: &str,
    ) -> CoreResult<Vec<StockTransaction>>;
    /// All parts' transactions ordered by (recorded_at, id), strictly after `after`.
    async fn stock_transactions_page(
        &mut self,
        part_id: Option<&str>,
        after: Option<&LogCursor>,
        limit: usize,
    ) -> CoreResult<Vec<StockTransaction>>;

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------
    async fn get_user(&mut self, id: &str) -> CoreResult<Option<User>>;
    async fn get_user_by_username(&mut self, username: &str) -> CoreResult<Option<User>>;
    /// Ordered by username.
    async fn list_users(&mut self, filter: &UserFilter) -> CoreResult<Vec<User>>;
    async fn count_users(&mut self) -> CoreResult<i64>;
    /// Fails with `Validation(Duplicate)` on a taken username.
    async fn insert_user(&mut self, user: &User) -> CoreResult<()>;
    async fn update_user(&mut self, user: &User, expected_version: i64) -> CoreResult<()>;

    // -------------------------------------------------------------------------
    // Audit
    // -------------------------------------------------------------------------
    async fn append_audit(&mut self, entry: &AuditEntry) -> CoreResult<()>;
    /// Entries for one target, oldest first.
    async fn audit_for_target(&mut self, target_id: &str) -> CoreResult<Vec<AuditEntry>>;
    /// Ordered by (recorded_at, id), strictly after `after`.
    async fn audit_page(
        &mut self,
        after: Option<&LogCursor>,
        limit: usize,
    ) -> CoreResult<Vec<AuditEntry>>;

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------
    async fn commit(self) -> CoreResult<()>;
    async fn rollback(self) -> CoreResult<()>;
}

// =============================================================================
// Unit Tests
// =============================================================================
