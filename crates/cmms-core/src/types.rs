//! # Domain Types
//!
//! Entities and records of the maintenance core.
//!
//! ## Entity Relationships
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Equipment 1 ──── * MaintenanceTask 1 ──── 1 PmSchedule 1 ── * PmCompletion
//! │      │                                                                  │
//! │      │ 1                                                                │
//! │      │                                                                  │
//! │      * WorkOrder ──── * PartConsumption ────► StockTransaction ──► Part │
//! │            │                                                            │
//! │            └───────── * PartShortage ──────────────────────────────► Part
//! │                                                                         │
//! │  User ──(actor_id)──► every StockTransaction / AuditEntry               │
//! │                                                                         │
//! │  References are ids only; resolution goes through the Store.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Derived values (on-hand quantity, health score) are never stored on an
//! entity; they are computed on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Equipment
// =============================================================================

/// Lifecycle status of a maintainable asset.
///
/// ```text
/// Active ◄──────► OutOfService
///   │                  │
///   └──────► Retired ◄─┘     (terminal, soft-delete)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    Active,
    OutOfService,
    /// Never deleted, only retired.
    Retired,
}

impl EquipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentStatus::Active => "active",
            EquipmentStatus::OutOfService => "out_of_service",
            EquipmentStatus::Retired => "retired",
        }
    }
}

impl fmt::Display for EquipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A maintainable asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Equipment {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name ("Boiler #2").
    pub name: String,

    /// Physical location ("Plant A / Line 3").
    pub location: String,

    pub description: Option<String>,

    pub status: EquipmentStatus,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    /// Optimistic-concurrency version, bumped on every write.
    pub version: i64,
}

impl Equipment {
    pub fn is_retired(&self) -> bool {
        self.status == EquipmentStatus::Retired
    }
}

// =============================================================================
// Preventive Maintenance
// =============================================================================

/// A recurring maintenance task defined for one piece of equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MaintenanceTask {
    pub id: String,
    pub equipment_id: String,
    pub description: String,

    /// Interval between occurrences, in whole days. Always > 0.
    pub cadence_days: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Due status of a PM schedule relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// next-due is more than the due-soon window away.
    Upcoming,
    /// now ≤ next-due ≤ now + due-soon window.
    Due,
    /// next-due has passed.
    Overdue,
}

/// Tracks when a maintenance task was last done and when it is next due.
///
/// ## Invariant
/// `next_due` only moves through [`crate::schedule::apply_completion`], which
/// never lets it move backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PmSchedule {
    pub id: String,
    pub equipment_id: String,
    pub task_id: String,

    /// Copy of the task cadence (days).
    pub cadence_days: i64,

    #[ts(as = "Option<String>")]
    pub last_completed: Option<DateTime<Utc>>,

    #[ts(as = "String")]
    pub next_due: DateTime<Utc>,

    /// Status as of the last read; refreshed by the scheduler on every read.
    pub status: ScheduleStatus,

    /// False once the owning equipment is retired.
    pub active: bool,

    pub version: i64,
}

/// One recorded completion of a PM schedule (append-only history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PmCompletion {
    pub id: String,
    pub schedule_id: String,
    pub equipment_id: String,

    /// When the work was actually performed.
    #[ts(as = "String")]
    pub completed_at: DateTime<Utc>,

    pub actor_id: String,
    pub notes: Option<String>,
    pub labor_minutes: Option<i64>,

    /// Whether this completion moved next-due forward. Late-arriving or
    /// duplicate completions are recorded with `false`.
    pub advanced: bool,

    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Corrective Work Orders
// =============================================================================

/// Work-order lifecycle states. See [`crate::work_order`] for the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Open,
    InProgress,
    PendingParts,
    Completed,
    Closed,
    Cancelled,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Open => "open",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::PendingParts => "pending_parts",
            WorkOrderStatus::Completed => "completed",
            WorkOrderStatus::Closed => "closed",
            WorkOrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// A part drawn from stock against a work order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PartConsumption {
    pub part_id: String,
    pub quantity: i64,
    /// The ledger entry that debited the stock.
    pub transaction_id: String,
    #[ts(as = "String")]
    pub consumed_at: DateTime<Utc>,
}

/// How an open shortage was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ShortageResolution {
    /// The part was later consumed.
    Fulfilled,
    /// A manager released the work order from needing the part.
    Waived,
}

/// A failed part request that blocks completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PartShortage {
    pub part_id: String,
    pub requested: i64,
    /// On-hand quantity when the shortage was raised.
    pub available: i64,
    /// Consumed against this shortage so far.
    #[serde(default)]
    pub fulfilled: i64,
    #[ts(as = "String")]
    pub raised_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<ShortageResolution>,
}

impl PartShortage {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Quantity still needed before the shortage is fulfilled.
    pub fn outstanding(&self) -> i64 {
        (self.requested - self.fulfilled).max(0)
    }
}

/// A corrective-maintenance work order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WorkOrder {
    pub id: String,
    pub equipment_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: WorkOrderStatus,

    /// User who raised the order.
    pub created_by: String,

    /// Technician doing the work; set on Open → InProgress.
    pub assigned_to: Option<String>,

    pub consumptions: Vec<PartConsumption>,
    pub shortages: Vec<PartShortage>,

    pub completion_note: Option<String>,
    pub cancel_reason: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,

    pub version: i64,
}

impl WorkOrder {
    pub fn open_shortages(&self) -> impl Iterator<Item = &PartShortage> {
        self.shortages.iter().filter(|s| s.is_open())
    }

    pub fn has_open_shortages(&self) -> bool {
        self.shortages.iter().any(PartShortage::is_open)
    }

    /// Total units of `part_id` consumed on this order.
    pub fn consumed_quantity(&self, part_id: &str) -> i64 {
        self.consumptions
            .iter()
            .filter(|c| c.part_id == part_id)
            .map(|c| c.quantity)
            .sum()
    }
}

// =============================================================================
// Parts & Stock
// =============================================================================

/// An MRO part kept in stock. On-hand quantity is derived from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Part {
    pub id: String,

    /// Stock Keeping Unit, unique.
    pub sku: String,

    pub name: String,
    pub location: Option<String>,

    /// Reorder when on-hand drops below this. ≥ 0.
    pub reorder_threshold: i64,

    /// Unit cost in cents. ≥ 0.
    pub unit_cost_cents: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    /// Bumped on every definition change and every stock movement, so that
    /// concurrent appends for the same part conflict at the store.
    pub version: i64,
}

impl Part {
    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockReason {
    /// Debit against a work order.
    Consumption,
    /// Goods received.
    Replenishment,
    /// Cycle-count correction, either sign.
    Adjustment,
}

/// Immutable ledger entry. on-hand(part) = Σ delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockTransaction {
    pub id: String,
    pub part_id: String,
    /// Signed quantity; negative for consumption.
    pub delta: i64,
    pub reason: StockReason,
    pub work_order_id: Option<String>,
    pub note: Option<String>,
    pub actor_id: String,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Manager,
    Technician,
    PartsCoordinator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Technician => "technician",
            Role::PartsCoordinator => "parts_coordinator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operator account. Credentials live outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct User {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    /// Inactive users are denied every action.
    pub active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

// =============================================================================
// Actions, Targets & Audit
// =============================================================================

/// Kind of entity an action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Equipment,
    PmSchedule,
    WorkOrder,
    Part,
    User,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Equipment => "equipment",
            TargetKind::PmSchedule => "pm_schedule",
            TargetKind::WorkOrder => "work_order",
            TargetKind::Part => "part",
            TargetKind::User => "user",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every mutating operation the core exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    RegisterEquipment,
    UpdateEquipment,
    ChangeEquipmentStatus,
    DefineTask,
    RecordCompletion,
    CreateWorkOrder,
    AssignWorkOrder,
    ReportShortage,
    ResumeWorkOrder,
    CompleteWorkOrder,
    CloseWorkOrder,
    CancelWorkOrder,
    ConsumePart,
    WaiveShortage,
    CreatePart,
    UpdatePart,
    ReplenishStock,
    AdjustStock,
    CreateUser,
    UpdateUser,
}

impl Action {
    pub const ALL: [Action; 20] = [
        Action::RegisterEquipment,
        Action::UpdateEquipment,
        Action::ChangeEquipmentStatus,
        Action::DefineTask,
        Action::RecordCompletion,
        Action::CreateWorkOrder,
        Action::AssignWorkOrder,
        Action::ReportShortage,
        Action::ResumeWorkOrder,
        Action::CompleteWorkOrder,
        Action::CloseWorkOrder,
        Action::CancelWorkOrder,
        Action::ConsumePart,
        Action::WaiveShortage,
        Action::CreatePart,
        Action::UpdatePart,
        Action::ReplenishStock,
        Action::AdjustStock,
        Action::CreateUser,
        Action::UpdateUser,
    ];

    /// The entity kind this action mutates.
    pub fn target_kind(&self) -> TargetKind {
        match self {
            Action::RegisterEquipment
            | Action::UpdateEquipment
            | Action::ChangeEquipmentStatus => TargetKind::Equipment,
            Action::DefineTask | Action::RecordCompletion => TargetKind::PmSchedule,
            Action::CreateWorkOrder
            | Action::AssignWorkOrder
            | Action::ReportShortage
            | Action::ResumeWorkOrder
            | Action::CompleteWorkOrder
            | Action::CloseWorkOrder
            | Action::CancelWorkOrder
            | Action::ConsumePart
            | Action::WaiveShortage => TargetKind::WorkOrder,
            Action::CreatePart
            | Action::UpdatePart
            | Action::ReplenishStock
            | Action::AdjustStock => TargetKind::Part,
            Action::CreateUser | Action::UpdateUser => TargetKind::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::RegisterEquipment => "register_equipment",
            Action::UpdateEquipment => "update_equipment",
            Action::ChangeEquipmentStatus => "change_equipment_status",
            Action::DefineTask => "define_task",
            Action::RecordCompletion => "record_completion",
            Action::CreateWorkOrder => "create_work_order",
            Action::AssignWorkOrder => "assign_work_order",
            Action::ReportShortage => "report_shortage",
            Action::ResumeWorkOrder => "resume_work_order",
            Action::CompleteWorkOrder => "complete_work_order",
            Action::CloseWorkOrder => "close_work_order",
            Action::CancelWorkOrder => "cancel_work_order",
            Action::ConsumePart => "consume_part",
            Action::WaiveShortage => "waive_shortage",
            Action::CreatePart => "create_part",
            Action::UpdatePart => "update_part",
            Action::ReplenishStock => "replenish_stock",
            Action::AdjustStock => "adjust_stock",
            Action::CreateUser => "create_user",
            Action::UpdateUser => "update_user",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Succeeded,
    /// Rejected by the access guard.
    DeniedAttempt,
    /// Authorized but rolled back.
    FailedAttempt,
}

/// Append-only record of an attempted or completed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AuditEntry {
    pub id: String,
    pub actor_id: String,
    pub action: Action,
    pub outcome: AuditOutcome,
    pub target_kind: TargetKind,
    /// None when the target was never created (failed create).
    pub target_id: Option<String>,
    #[ts(type = "unknown")]
    pub before: Option<serde_json::Value>,
    #[ts(type = "unknown")]
    pub after: Option<serde_json::Value>,
    /// Denial reason, violated rule, or a short note on what happened.
    pub detail: Option<String>,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
