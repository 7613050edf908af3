//! # SQLite Store
//!
//! [`Store`] / [`StoreTx`] over a `SqlitePool`.
//!
//! ## Transaction Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  store.begin()              writes                                      │
//! │     ├─ take the write gate        one writer per store                  │
//! │     └─ BEGIN IMMEDIATE            reserve the database write lock       │
//! │                                                                         │
//! │  store.begin_read()         reads, feed pages                           │
//! │     └─ BEGIN                      WAL snapshot, never waits on the gate │
//! │                                                                         │
//! │  tx.update_x(&row, expected)                                            │
//! │     UPDATE .. SET version = ? WHERE id = ? AND version = expected       │
//! │     0 rows ──► row exists? Conflict : NotFound                          │
//! │                                                                         │
//! │  tx.commit()   COMMIT, release the gate (if held)                       │
//! │  drop(tx)      ROLLBACK queued on the connection, release the gate      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! SQLite admits a single writer. The gate queues this process's writers
//! instead of letting them race for the lock; readers run beside them on
//! their own snapshots. Contention from another process surfaces as
//! `Conflict` once the busy timeout runs out.
//!
//! Work-order consumptions and shortages live in JSON columns on the order
//! row. Audit snapshots are JSON text.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteQueryResult;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use cmms_core::store::{
    DueCursor, EquipmentFilter, LogCursor, Store, StoreTx, UserFilter, WorkOrderFilter,
};
use cmms_core::{
    Action, AuditEntry, AuditOutcome, CoreError, CoreResult, Equipment, MaintenanceTask, Part,
    PmCompletion, PmSchedule, Priority, StockTransaction, TargetKind, User, WorkOrder,
    WorkOrderStatus,
};

use crate::error::DbError;

// =============================================================================
// Column Lists
// =============================================================================

const EQUIPMENT_COLUMNS: &str =
    "id, name, location, description, status, created_at, updated_at, version";

const TASK_COLUMNS: &str = "id, equipment_id, description, cadence_days, created_at";

const SCHEDULE_COLUMNS: &str =
    "id, equipment_id, task_id, cadence_days, last_completed, next_due, status, active, version";

const COMPLETION_COLUMNS: &str = "id, schedule_id, equipment_id, completed_at, actor_id, notes, \
     labor_minutes, advanced, recorded_at";

const WORK_ORDER_COLUMNS: &str = "id, equipment_id, title, description, priority, status, \
     created_by, assigned_to, consumptions, shortages, completion_note, cancel_reason, \
     created_at, updated_at, completed_at, closed_at, version";

const PART_COLUMNS: &str = "id, sku, name, location, reorder_threshold, unit_cost_cents, \
     created_at, updated_at, version";

const STOCK_COLUMNS: &str =
    "id, part_id, delta, reason, work_order_id, note, actor_id, recorded_at";

const USER_COLUMNS: &str =
    "id, username, full_name, role, active, created_at, updated_at, version";

const AUDIT_COLUMNS: &str = "id, actor_id, action, outcome, target_kind, target_id, \
     before_json, after_json, detail, recorded_at";

// =============================================================================
// Row Types
// =============================================================================

/// `work_orders` row; children are JSON text.
#[derive(Debug, FromRow)]
struct WorkOrderRow {
    id: String,
    equipment_id: String,
    title: String,
    description: Option<String>,
    priority: Priority,
    status: WorkOrderStatus,
    created_by: String,
    assigned_to: Option<String>,
    consumptions: String,
    shortages: String,
    completion_note: Option<String>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<WorkOrderRow> for WorkOrder {
    type Error = DbError;

    fn try_from(row: WorkOrderRow) -> Result<Self, DbError> {
        Ok(WorkOrder {
            consumptions: serde_json::from_str(&row.consumptions)
                .map_err(|e| DbError::corrupt("work_orders.consumptions", e))?,
            shortages: serde_json::from_str(&row.shortages)
                .map_err(|e| DbError::corrupt("work_orders.shortages", e))?,
            id: row.id,
            equipment_id: row.equipment_id,
            title: row.title,
            description: row.description,
            priority: row.priority,
            status: row.status,
            created_by: row.created_by,
            assigned_to: row.assigned_to,
            completion_note: row.completion_note,
            cancel_reason: row.cancel_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            closed_at: row.closed_at,
            version: row.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: String,
    actor_id: String,
    action: Action,
    outcome: AuditOutcome,
    target_kind: TargetKind,
    target_id: Option<String>,
    before_json: Option<String>,
    after_json: Option<String>,
    detail: Option<String>,
    recorded_at: DateTime<Utc>,
}

fn parse_snapshot(column: &str, raw: Option<String>) -> Result<Option<serde_json::Value>, DbError> {
    raw.map(|text| serde_json::from_str(&text).map_err(|e| DbError::corrupt(column, e)))
        .transpose()
}

fn encode_json<T: serde::Serialize + ?Sized>(column: &str, value: &T) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|e| DbError::corrupt(column, e))
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self, DbError> {
        Ok(AuditEntry {
            before: parse_snapshot("audit_log.before_json", row.before_json)?,
            after: parse_snapshot("audit_log.after_json", row.after_json)?,
            id: row.id,
            actor_id: row.actor_id,
            action: row.action,
            outcome: row.outcome,
            target_kind: row.target_kind,
            target_id: row.target_id,
            detail: row.detail,
            recorded_at: row.recorded_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> CoreResult<Vec<T>>
where
    T: TryFrom<R, Error = DbError>,
{
    rows.into_iter()
        .map(|row| T::try_from(row).map_err(CoreError::from))
        .collect()
}

// =============================================================================
// Error Helpers
// =============================================================================

fn sql(err: sqlx::Error) -> CoreError {
    DbError::from(err).into()
}

/// Maps an INSERT failure, naming the offending value on a unique violation.
/// `keys` pairs column names with the values bound for them.
fn insert_failed(entity: &str, err: sqlx::Error, keys: &[(&str, &str)]) -> CoreError {
    match DbError::from(err) {
        DbError::UniqueViolation { field, .. } => {
            let value = keys
                .iter()
                .find(|(column, _)| *column == field)
                .map_or("unknown", |(_, value)| *value);
            let field = if field == "id" {
                format!("{entity} id")
            } else {
                field
            };
            DbError::UniqueViolation {
                field,
                value: value.to_string(),
            }
            .into()
        }
        other => other.into(),
    }
}

fn limit_of(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    /// Held by write transactions only.
    writer: Arc<Mutex<()>>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStore {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    type Tx = SqliteTx;

    async fn begin(&self) -> CoreResult<SqliteTx> {
        let gate = self.writer.clone().lock_owned().await;
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(sql)?;
        trace!("Write transaction opened");
        Ok(SqliteTx {
            tx,
            _gate: Some(gate),
        })
    }

    async fn begin_read(&self) -> CoreResult<SqliteTx> {
        let tx = self.pool.begin().await.map_err(sql)?;
        trace!("Read transaction opened");
        Ok(SqliteTx { tx, _gate: None })
    }
}

/// One SQLite transaction. Field order matters: the transaction drops (and
/// queues its rollback) before the gate is released.
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
    _gate: Option<OwnedMutexGuard<()>>,
}

impl SqliteTx {
    /// Turns a zero-row versioned UPDATE into Conflict or NotFound.
    async fn versioned(
        &mut self,
        result: SqliteQueryResult,
        table: &str,
        entity: &str,
        id: &str,
    ) -> CoreResult<()> {
        if result.rows_affected() > 0 {
            return Ok(());
        }
        let current: Option<i64> =
            sqlx::query_scalar(&format!("SELECT version FROM {table} WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(sql)?;
        match current {
            Some(version) => {
                debug!(entity, id, version, "Stale version on update");
                Err(CoreError::conflict(entity, id))
            }
            None => Err(CoreError::not_found(entity, id)),
        }
    }
}

#[async_trait]
impl StoreTx for SqliteTx {
    // -------------------------------------------------------------------------
    // Equipment
    // -------------------------------------------------------------------------

    async fn get_equipment(&mut self, id: &str) -> CoreResult<Option<Equipment>> {
        sqlx::query_as(&format!("SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(sql)
    }

    async fn list_equipment(&mut self, filter: &EquipmentFilter) -> CoreResult<Vec<Equipment>> {
        sqlx::query_as(&format!(
            "SELECT {EQUIPMENT_COLUMNS} FROM equipment \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR location = ?2) \
             ORDER BY name, id"
        ))
        .bind(filter.status)
        .bind(filter.location.as_deref())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)
    }

    async fn insert_equipment(&mut self, equipment: &Equipment) -> CoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO equipment ({EQUIPMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ))
        .bind(equipment.id.as_str())
        .bind(equipment.name.as_str())
        .bind(equipment.location.as_str())
        .bind(equipment.description.as_deref())
        .bind(equipment.status)
        .bind(equipment.created_at)
        .bind(equipment.updated_at)
        .bind(equipment.version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| insert_failed("Equipment", e, &[("id", &equipment.id)]))?;
        Ok(())
    }

    async fn update_equipment(
        &mut self,
        equipment: &Equipment,
        expected_version: i64,
    ) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE equipment SET name = ?1, location = ?2, description = ?3, status = ?4, \
             updated_at = ?5, version = ?6 WHERE id = ?7 AND version = ?8",
        )
        .bind(equipment.name.as_str())
        .bind(equipment.location.as_str())
        .bind(equipment.description.as_deref())
        .bind(equipment.status)
        .bind(equipment.updated_at)
        .bind(equipment.version)
        .bind(equipment.id.as_str())
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(sql)?;
        self.versioned(result, "equipment", "Equipment", &equipment.id)
            .await
    }

    // -------------------------------------------------------------------------
    // PM tasks, schedules, completions
    // -------------------------------------------------------------------------

    async fn get_task(&mut self, id: &str) -> CoreResult<Option<MaintenanceTask>> {
        sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM maintenance_tasks WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(sql)
    }

    async fn insert_task(&mut self, task: &MaintenanceTask) -> CoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO maintenance_tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
        ))
        .bind(task.id.as_str())
        .bind(task.equipment_id.as_str())
        .bind(task.description.as_str())
        .bind(task.cadence_days)
        .bind(task.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| insert_failed("MaintenanceTask", e, &[("id", &task.id)]))?;
        Ok(())
    }

    async fn get_schedule(&mut self, id: &str) -> CoreResult<Option<PmSchedule>> {
        sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM pm_schedules WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(sql)
    }

    async fn schedules_for_equipment(&mut self, equipment_id: &str) -> CoreResult<Vec<PmSchedule>> {
        sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM pm_schedules WHERE equipment_id = ?1 \
             ORDER BY next_due, id"
        ))
        .bind(equipment_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)
    }

    async fn insert_schedule(&mut self, schedule: &PmSchedule) -> CoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO pm_schedules ({SCHEDULE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ))
        .bind(schedule.id.as_str())
        .bind(schedule.equipment_id.as_str())
        .bind(schedule.task_id.as_str())
        .bind(schedule.cadence_days)
        .bind(schedule.last_completed)
        .bind(schedule.next_due)
        .bind(schedule.status)
        .bind(schedule.active)
        .bind(schedule.version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| insert_failed("PmSchedule", e, &[("id", &schedule.id)]))?;
        Ok(())
    }

    async fn update_schedule(
        &mut self,
        schedule: &PmSchedule,
        expected_version: i64,
    ) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE pm_schedules SET cadence_days = ?1, last_completed = ?2, next_due = ?3, \
             status = ?4, active = ?5, version = ?6 WHERE id = ?7 AND version = ?8",
        )
        .bind(schedule.cadence_days)
        .bind(schedule.last_completed)
        .bind(schedule.next_due)
        .bind(schedule.status)
        .bind(schedule.active)
        .bind(schedule.version)
        .bind(schedule.id.as_str())
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(sql)?;
        self.versioned(result, "pm_schedules", "PmSchedule", &schedule.id)
            .await
    }

    async fn due_schedules_page(
        &mut self,
        due_by: DateTime<Utc>,
        after: Option<&DueCursor>,
        limit: usize,
    ) -> CoreResult<Vec<PmSchedule>> {
        sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM pm_schedules \
             WHERE active = 1 AND next_due <= ?1 \
               AND (?2 IS NULL OR (next_due, equipment_id, id) > (?2, ?3, ?4)) \
             ORDER BY next_due, equipment_id, id \
             LIMIT ?5"
        ))
        .bind(due_by)
        .bind(after.map(|c| c.next_due))
        .bind(after.map(|c| c.equipment_id.as_str()))
        .bind(after.map(|c| c.schedule_id.as_str()))
        .bind(limit_of(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)
    }

    async fn append_completion(&mut self, completion: &PmCompletion) -> CoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO pm_completions ({COMPLETION_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ))
        .bind(completion.id.as_str())
        .bind(completion.schedule_id.as_str())
        .bind(completion.equipment_id.as_str())
        .bind(completion.completed_at)
        .bind(completion.actor_id.as_str())
        .bind(completion.notes.as_deref())
        .bind(completion.labor_minutes)
        .bind(completion.advanced)
        .bind(completion.recorded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| insert_failed("PmCompletion", e, &[("id", &completion.id)]))?;
        Ok(())
    }

    async fn completions_for_schedule(
        &mut self,
        schedule_id: &str,
    ) -> CoreResult<Vec<PmCompletion>> {
        sqlx::query_as(&format!(
            "SELECT {COMPLETION_COLUMNS} FROM pm_completions WHERE schedule_id = ?1 \
             ORDER BY completed_at, id"
        ))
        .bind(schedule_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)
    }

    async fn completions_for_equipment(
        &mut self,
        equipment_id: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Vec<PmCompletion>> {
        sqlx::query_as(&format!(
            "SELECT {COMPLETION_COLUMNS} FROM pm_completions \
             WHERE equipment_id = ?1 AND completed_at >= ?2 \
             ORDER BY completed_at, id"
        ))
        .bind(equipment_id)
        .bind(since)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)
    }

    // -------------------------------------------------------------------------
    // Work orders
    // -------------------------------------------------------------------------

    async fn get_work_order(&mut self, id: &str) -> CoreResult<Option<WorkOrder>> {
        let row: Option<WorkOrderRow> = sqlx::query_as(&format!(
            "SELECT {WORK_ORDER_COLUMNS} FROM work_orders WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(sql)?;
        Ok(row.map(WorkOrder::try_from).transpose()?)
    }

    async fn list_work_orders(&mut self, filter: &WorkOrderFilter) -> CoreResult<Vec<WorkOrder>> {
        let rows: Vec<WorkOrderRow> = sqlx::query_as(&format!(
            "SELECT {WORK_ORDER_COLUMNS} FROM work_orders \
             WHERE (?1 IS NULL OR equipment_id = ?1) \
               AND (?2 IS NULL OR status = ?2) \
               AND (?3 IS NULL OR assigned_to = ?3) \
               AND (?4 IS NULL OR created_at >= ?4) \
             ORDER BY created_at, id"
        ))
        .bind(filter.equipment_id.as_deref())
        .bind(filter.status)
        .bind(filter.assigned_to.as_deref())
        .bind(filter.created_since)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)?;
        convert_all(rows)
    }

    async fn insert_work_order(&mut self, work_order: &WorkOrder) -> CoreResult<()> {
        let consumptions = encode_json("work_orders.consumptions", &work_order.consumptions)?;
        let shortages = encode_json("work_orders.shortages", &work_order.shortages)?;
        sqlx::query(&format!(
            "INSERT INTO work_orders ({WORK_ORDER_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ))
        .bind(work_order.id.as_str())
        .bind(work_order.equipment_id.as_str())
        .bind(work_order.title.as_str())
        .bind(work_order.description.as_deref())
        .bind(work_order.priority)
        .bind(work_order.status)
        .bind(work_order.created_by.as_str())
        .bind(work_order.assigned_to.as_deref())
        .bind(consumptions)
        .bind(shortages)
        .bind(work_order.completion_note.as_deref())
        .bind(work_order.cancel_reason.as_deref())
        .bind(work_order.created_at)
        .bind(work_order.updated_at)
        .bind(work_order.completed_at)
        .bind(work_order.closed_at)
        .bind(work_order.version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| insert_failed("WorkOrder", e, &[("id", &work_order.id)]))?;
        Ok(())
    }

    async fn update_work_order(
        &mut self,
        work_order: &WorkOrder,
        expected_version: i64,
    ) -> CoreResult<()> {
        let consumptions = encode_json("work_orders.consumptions", &work_order.consumptions)?;
        let shortages = encode_json("work_orders.shortages", &work_order.shortages)?;
        let result = sqlx::query(
            "UPDATE work_orders SET title = ?1, description = ?2, priority = ?3, status = ?4, \
             assigned_to = ?5, consumptions = ?6, shortages = ?7, completion_note = ?8, \
             cancel_reason = ?9, updated_at = ?10, completed_at = ?11, closed_at = ?12, \
             version = ?13 WHERE id = ?14 AND version = ?15",
        )
        .bind(work_order.title.as_str())
        .bind(work_order.description.as_deref())
        .bind(work_order.priority)
        .bind(work_order.status)
        .bind(work_order.assigned_to.as_deref())
        .bind(consumptions)
        .bind(shortages)
        .bind(work_order.completion_note.as_deref())
        .bind(work_order.cancel_reason.as_deref())
        .bind(work_order.updated_at)
        .bind(work_order.completed_at)
        .bind(work_order.closed_at)
        .bind(work_order.version)
        .bind(work_order.id.as_str())
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(sql)?;
        self.versioned(result, "work_orders", "WorkOrder", &work_order.id)
            .await
    }

    // -------------------------------------------------------------------------
    // Parts & stock ledger
    // -------------------------------------------------------------------------

    async fn get_part(&mut self, id: &str) -> CoreResult<Option<Part>> {
        sqlx::query_as(&format!("SELECT {PART_COLUMNS} FROM parts WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(sql)
    }

    async fn get_part_by_sku(&mut self, sku: &str) -> CoreResult<Option<Part>> {
        sqlx::query_as(&format!("SELECT {PART_COLUMNS} FROM parts WHERE sku = ?1"))
            .bind(sku)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(sql)
    }

    async fn list_parts(&mut self) -> CoreResult<Vec<Part>> {
        sqlx::query_as(&format!("SELECT {PART_COLUMNS} FROM parts ORDER BY sku"))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(sql)
    }

    async fn insert_part(&mut self, part: &Part) -> CoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO parts ({PART_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ))
        .bind(part.id.as_str())
        .bind(part.sku.as_str())
        .bind(part.name.as_str())
        .bind(part.location.as_deref())
        .bind(part.reorder_threshold)
        .bind(part.unit_cost_cents)
        .bind(part.created_at)
        .bind(part.updated_at)
        .bind(part.version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| insert_failed("Part", e, &[("id", &part.id), ("sku", &part.sku)]))?;
        Ok(())
    }

    async fn update_part(&mut self, part: &Part, expected_version: i64) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE parts SET name = ?1, location = ?2, reorder_threshold = ?3, \
             unit_cost_cents = ?4, updated_at = ?5, version = ?6 WHERE id = ?7 AND version = ?8",
        )
        .bind(part.name.as_str())
        .bind(part.location.as_deref())
        .bind(part.reorder_threshold)
        .bind(part.unit_cost_cents)
        .bind(part.updated_at)
        .bind(part.version)
        .bind(part.id.as_str())
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(sql)?;
        self.versioned(result, "parts", "Part", &part.id).await
    }

    async fn append_stock_transaction(&mut self, transaction: &StockTransaction) -> CoreResult<()> {
        trace!(part_id = %transaction.part_id, delta = transaction.delta, "Appending stock row");
        sqlx::query(&format!(
            "INSERT INTO stock_transactions ({STOCK_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ))
        .bind(transaction.id.as_str())
        .bind(transaction.part_id.as_str())
        .bind(transaction.delta)
        .bind(transaction.reason)
        .bind(transaction.work_order_id.as_deref())
        .bind(transaction.note.as_deref())
        .bind(transaction.actor_id.as_str())
        .bind(transaction.recorded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| insert_failed("StockTransaction", e, &[("id", &transaction.id)]))?;
        Ok(())
    }

    async fn on_hand(&mut self, part_id: &str) -> CoreResult<i64> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0) FROM stock_transactions WHERE part_id = ?1",
        )
        .bind(part_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(sql)
    }

    async fn stock_transactions_for_part(
        &mut self,
        part_id: &str,
    ) -> CoreResult<Vec<StockTransaction>> {
        sqlx::query_as(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_transactions WHERE part_id = ?1 \
             ORDER BY recorded_at, id"
        ))
        .bind(part_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)
    }

    async fn stock_transactions_page(
        &mut self,
        part_id: Option<&str>,
        after: Option<&LogCursor>,
        limit: usize,
    ) -> CoreResult<Vec<StockTransaction>> {
        sqlx::query_as(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_transactions \
             WHERE (?1 IS NULL OR part_id = ?1) \
               AND (?2 IS NULL OR (recorded_at, id) > (?2, ?3)) \
             ORDER BY recorded_at, id \
             LIMIT ?4"
        ))
        .bind(part_id)
        .bind(after.map(|c| c.recorded_at))
        .bind(after.map(|c| c.id.as_str()))
        .bind(limit_of(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    async fn get_user(&mut self, id: &str) -> CoreResult<Option<User>> {
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(sql)
    }

    async fn get_user_by_username(&mut self, username: &str) -> CoreResult<Option<User>> {
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"))
            .bind(username)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(sql)
    }

    async fn list_users(&mut self, filter: &UserFilter) -> CoreResult<Vec<User>> {
        sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE (?1 IS NULL OR role = ?1) AND (?2 IS NULL OR active = ?2) \
             ORDER BY username"
        ))
        .bind(filter.role)
        .bind(filter.active)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)
    }

    async fn count_users(&mut self) -> CoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(sql)
    }

    async fn insert_user(&mut self, user: &User) -> CoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ))
        .bind(user.id.as_str())
        .bind(user.username.as_str())
        .bind(user.full_name.as_str())
        .bind(user.role)
        .bind(user.active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            insert_failed(
                "User",
                e,
                &[("id", &user.id), ("username", &user.username)],
            )
        })?;
        Ok(())
    }

    async fn update_user(&mut self, user: &User, expected_version: i64) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET full_name = ?1, role = ?2, active = ?3, updated_at = ?4, \
             version = ?5 WHERE id = ?6 AND version = ?7",
        )
        .bind(user.full_name.as_str())
        .bind(user.role)
        .bind(user.active)
        .bind(user.updated_at)
        .bind(user.version)
        .bind(user.id.as_str())
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(sql)?;
        self.versioned(result, "users", "User", &user.id).await
    }

    // -------------------------------------------------------------------------
    // Audit
    // -------------------------------------------------------------------------

    async fn append_audit(&mut self, entry: &AuditEntry) -> CoreResult<()> {
        let before = entry
            .before
            .as_ref()
            .map(|v| encode_json("audit_log.before_json", v))
            .transpose()?;
        let after = entry
            .after
            .as_ref()
            .map(|v| encode_json("audit_log.after_json", v))
            .transpose()?;
        sqlx::query(&format!(
            "INSERT INTO audit_log ({AUDIT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ))
        .bind(entry.id.as_str())
        .bind(entry.actor_id.as_str())
        .bind(entry.action)
        .bind(entry.outcome)
        .bind(entry.target_kind)
        .bind(entry.target_id.as_deref())
        .bind(before)
        .bind(after)
        .bind(entry.detail.as_deref())
        .bind(entry.recorded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| insert_failed("AuditEntry", e, &[("id", &entry.id)]))?;
        Ok(())
    }

    async fn audit_for_target(&mut self, target_id: &str) -> CoreResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE target_id = ?1 \
             ORDER BY recorded_at, id"
        ))
        .bind(target_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)?;
        convert_all(rows)
    }

    async fn audit_page(
        &mut self,
        after: Option<&LogCursor>,
        limit: usize,
    ) -> CoreResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log \
             WHERE (?1 IS NULL OR (recorded_at, id) > (?1, ?2)) \
             ORDER BY recorded_at, id \
             LIMIT ?3"
        ))
        .bind(after.map(|c| c.recorded_at))
        .bind(after.map(|c| c.id.as_str()))
        .bind(limit_of(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(sql)?;
        convert_all(rows)
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    async fn commit(self) -> CoreResult<()> {
        let SqliteTx { tx, _gate } = self;
        tx.commit().await.map_err(sql)?;
        trace!("Transaction committed");
        Ok(())
    }

    async fn rollback(self) -> CoreResult<()> {
        let SqliteTx { tx, _gate } = self;
        tx.rollback().await.map_err(sql)
    }
}
