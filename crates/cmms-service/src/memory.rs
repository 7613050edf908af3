//! # In-Memory Store
//!
//! A complete [`Store`] kept in process memory. Used by tests and by
//! embedders that persist elsewhere.
//!
//! ## Transaction Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  begin()   : snapshot committed tables into the tx                      │
//! │  reads     : served from the snapshot (sees own writes)                 │
//! │  writes    : applied to the snapshot, first-touch version remembered    │
//! │  commit()  : lock committed tables                                      │
//! │              ├─ every touched row still at its first-touch version?     │
//! │              │     no  ──► Conflict, nothing applied                    │
//! │              ├─ sku / username still unique?                           │
//! │              │     no  ──► Duplicate, nothing applied                   │
//! │              └─ copy touched rows + appended log entries in             │
//! │  rollback(): drop the snapshot                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use cmms_core::schedule::is_due_by;
use cmms_core::store::{
    DueCursor, EquipmentFilter, LogCursor, Store, StoreTx, UserFilter, WorkOrderFilter,
};
use cmms_core::{
    AuditEntry, CoreError, CoreResult, Equipment, MaintenanceTask, Part, PmCompletion, PmSchedule,
    StockTransaction, User, ValidationError, WorkOrder,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    equipment: BTreeMap<String, Equipment>,
    tasks: BTreeMap<String, MaintenanceTask>,
    schedules: BTreeMap<String, PmSchedule>,
    completions: Vec<PmCompletion>,
    work_orders: BTreeMap<String, WorkOrder>,
    parts: BTreeMap<String, Part>,
    stock: Vec<StockTransaction>,
    users: BTreeMap<String, User>,
    audit: Vec<AuditEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RowKey {
    Equipment(String),
    Task(String),
    Schedule(String),
    WorkOrder(String),
    Part(String),
    User(String),
}

impl RowKey {
    fn entity(&self) -> (&'static str, &str) {
        match self {
            RowKey::Equipment(id) => ("Equipment", id),
            RowKey::Task(id) => ("MaintenanceTask", id),
            RowKey::Schedule(id) => ("PmSchedule", id),
            RowKey::WorkOrder(id) => ("WorkOrder", id),
            RowKey::Part(id) => ("Part", id),
            RowKey::User(id) => ("User", id),
        }
    }
}

impl Tables {
    /// Stored version of a row; tasks are immutable and report 0.
    fn version_of(&self, key: &RowKey) -> Option<i64> {
        match key {
            RowKey::Equipment(id) => self.equipment.get(id).map(|r| r.version),
            RowKey::Task(id) => self.tasks.get(id).map(|_| 0),
            RowKey::Schedule(id) => self.schedules.get(id).map(|r| r.version),
            RowKey::WorkOrder(id) => self.work_orders.get(id).map(|r| r.version),
            RowKey::Part(id) => self.parts.get(id).map(|r| r.version),
            RowKey::User(id) => self.users.get(id).map(|r| r.version),
        }
    }

    /// Copies one row from `source` into `self`.
    fn copy_row(&mut self, source: &Tables, key: &RowKey) {
        match key {
            RowKey::Equipment(id) => copy(&mut self.equipment, &source.equipment, id),
            RowKey::Task(id) => copy(&mut self.tasks, &source.tasks, id),
            RowKey::Schedule(id) => copy(&mut self.schedules, &source.schedules, id),
            RowKey::WorkOrder(id) => copy(&mut self.work_orders, &source.work_orders, id),
            RowKey::Part(id) => copy(&mut self.parts, &source.parts, id),
            RowKey::User(id) => copy(&mut self.users, &source.users, id),
        }
    }
}

fn copy<T: Clone>(dst: &mut BTreeMap<String, T>, src: &BTreeMap<String, T>, id: &str) {
    if let Some(row) = src.get(id) {
        dst.insert(id.to_string(), row.clone());
    }
}

fn duplicate(field: &str, value: &str) -> CoreError {
    CoreError::Validation(ValidationError::Duplicate {
        field: field.to_string(),
        value: value.to_string(),
    })
}

// =============================================================================
// Store
// =============================================================================

/// Shared handle to the committed tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> CoreResult<MemoryTx> {
        let view = self.committed.lock().await.clone();
        Ok(MemoryTx {
            committed: self.committed.clone(),
            view,
            touched: BTreeMap::new(),
            new_completions: Vec::new(),
            new_stock: Vec::new(),
            new_audit: Vec::new(),
        })
    }
}

// =============================================================================
// Transaction
// =============================================================================

pub struct MemoryTx {
    committed: Arc<Mutex<Tables>>,
    view: Tables,
    /// Row → version it had when this tx first wrote it (None = inserted).
    touched: BTreeMap<RowKey, Option<i64>>,
    new_completions: Vec<PmCompletion>,
    new_stock: Vec<StockTransaction>,
    new_audit: Vec<AuditEntry>,
}

impl MemoryTx {
    fn touch(&mut self, key: RowKey, before: Option<i64>) {
        self.touched.entry(key).or_insert(before);
    }

    fn insert_row(&mut self, key: RowKey) -> CoreResult<()> {
        if self.view.version_of(&key).is_some() {
            let (entity, id) = key.entity();
            return Err(duplicate(&format!("{} id", entity), id));
        }
        self.touch(key, None);
        Ok(())
    }

    fn update_row(&mut self, key: RowKey, expected_version: i64) -> CoreResult<()> {
        match self.view.version_of(&key) {
            None => {
                let (entity, id) = key.entity();
                Err(CoreError::not_found(entity, id))
            }
            Some(current) if current != expected_version => {
                let (entity, id) = key.entity();
                Err(CoreError::conflict(entity, id))
            }
            Some(current) => {
                self.touch(key, Some(current));
                Ok(())
            }
        }
    }
}

fn after_log(cursor: Option<&LogCursor>, recorded_at: DateTime<Utc>, id: &str) -> bool {
    match cursor {
        None => true,
        Some(c) => (recorded_at, id) > (c.recorded_at, c.id.as_str()),
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    // -------------------------------------------------------------------------
    // Equipment
    // -------------------------------------------------------------------------

    async fn get_equipment(&mut self, id: &str) -> CoreResult<Option<Equipment>> {
        Ok(self.view.equipment.get(id).cloned())
    }

    async fn list_equipment(&mut self, filter: &EquipmentFilter) -> CoreResult<Vec<Equipment>> {
        let mut rows: Vec<Equipment> = self
            .view
            .equipment
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert_equipment(&mut self, equipment: &Equipment) -> CoreResult<()> {
        self.insert_row(RowKey::Equipment(equipment.id.clone()))?;
        self.view
            .equipment
            .insert(equipment.id.clone(), equipment.clone());
        Ok(())
    }

    async fn update_equipment(
        &mut self,
        equipment: &Equipment,
        expected_version: i64,
    ) -> CoreResult<()> {
        self.update_row(RowKey::Equipment(equipment.id.clone()), expected_version)?;
        self.view
            .equipment
            .insert(equipment.id.clone(), equipment.clone());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // PM
    // -------------------------------------------------------------------------

    async fn get_task(&mut self, id: &str) -> CoreResult<Option<MaintenanceTask>> {
        Ok(self.view.tasks.get(id).cloned())
    }

    async fn insert_task(&mut self, task: &MaintenanceTask) -> CoreResult<()> {
        self.insert_row(RowKey::Task(task.id.clone()))?;
        self.view.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_schedule(&mut self, id: &str) -> CoreResult<Option<PmSchedule>> {
        Ok(self.view.schedules.get(id).cloned())
    }

    async fn schedules_for_equipment(&mut self, equipment_id: &str) -> CoreResult<Vec<PmSchedule>> {
        let mut rows: Vec<PmSchedule> = self
            .view
            .schedules
            .values()
            .filter(|s| s.equipment_id == equipment_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.next_due.cmp(&b.next_due).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert_schedule(&mut self, schedule: &PmSchedule) -> CoreResult<()> {
        self.insert_row(RowKey::Schedule(schedule.id.clone()))?;
        self.view
            .schedules
            .insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn update_schedule(
        &mut self,
        schedule: &PmSchedule,
        expected_version: i64,
    ) -> CoreResult<()> {
        self.update_row(RowKey::Schedule(schedule.id.clone()), expected_version)?;
        self.view
            .schedules
            .insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn due_schedules_page(
        &mut self,
        due_by: DateTime<Utc>,
        after: Option<&DueCursor>,
        limit: usize,
    ) -> CoreResult<Vec<PmSchedule>> {
        let mut rows: Vec<PmSchedule> = self
            .view
            .schedules
            .values()
            .filter(|s| is_due_by(s, due_by))
            .filter(|s| after.map_or(true, |c| DueCursor::of(s) > *c))
            .cloned()
            .collect();
        rows.sort_by_key(DueCursor::of);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn append_completion(&mut self, completion: &PmCompletion) -> CoreResult<()> {
        self.view.completions.push(completion.clone());
        self.new_completions.push(completion.clone());
        Ok(())
    }

    async fn completions_for_schedule(
        &mut self,
        schedule_id: &str,
    ) -> CoreResult<Vec<PmCompletion>> {
        let mut rows: Vec<PmCompletion> = self
            .view
            .completions
            .iter()
            .filter(|c| c.schedule_id == schedule_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    async fn completions_for_equipment(
        &mut self,
        equipment_id: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Vec<PmCompletion>> {
        let mut rows: Vec<PmCompletion> = self
            .view
            .completions
            .iter()
            .filter(|c| c.equipment_id == equipment_id && c.completed_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Work orders
    // -------------------------------------------------------------------------

    async fn get_work_order(&mut self, id: &str) -> CoreResult<Option<WorkOrder>> {
        Ok(self.view.work_orders.get(id).cloned())
    }

    async fn list_work_orders(&mut self, filter: &WorkOrderFilter) -> CoreResult<Vec<WorkOrder>> {
        let mut rows: Vec<WorkOrder> = self
            .view
            .work_orders
            .values()
            .filter(|wo| filter.matches(wo))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert_work_order(&mut self, work_order: &WorkOrder) -> CoreResult<()> {
        self.insert_row(RowKey::WorkOrder(work_order.id.clone()))?;
        self.view
            .work_orders
            .insert(work_order.id.clone(), work_order.clone());
        Ok(())
    }

    async fn update_work_order(
        &mut self,
        work_order: &WorkOrder,
        expected_version: i64,
    ) -> CoreResult<()> {
        self.update_row(RowKey::WorkOrder(work_order.id.clone()), expected_version)?;
        self.view
            .work_orders
            .insert(work_order.id.clone(), work_order.clone());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Parts & stock
    // -------------------------------------------------------------------------

    async fn get_part(&mut self, id: &str) -> CoreResult<Option<Part>> {
        Ok(self.view.parts.get(id).cloned())
    }

    async fn get_part_by_sku(&mut self, sku: &str) -> CoreResult<Option<Part>> {
        Ok(self.view.parts.values().find(|p| p.sku == sku).cloned())
    }

    async fn list_parts(&mut self) -> CoreResult<Vec<Part>> {
        let mut rows: Vec<Part> = self.view.parts.values().cloned().collect();
        rows.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(rows)
    }

    async fn insert_part(&mut self, part: &Part) -> CoreResult<()> {
        if self.view.parts.values().any(|p| p.sku == part.sku) {
            return Err(duplicate("sku", &part.sku));
        }
        self.insert_row(RowKey::Part(part.id.clone()))?;
        self.view.parts.insert(part.id.clone(), part.clone());
        Ok(())
    }

    async fn update_part(&mut self, part: &Part, expected_version: i64) -> CoreResult<()> {
        self.update_row(RowKey::Part(part.id.clone()), expected_version)?;
        self.view.parts.insert(part.id.clone(), part.clone());
        Ok(())
    }

    async fn append_stock_transaction(&mut self, transaction: &StockTransaction) -> CoreResult<()> {
        self.view.stock.push(transaction.clone());
        self.new_stock.push(transaction.clone());
        Ok(())
    }

    async fn on_hand(&mut self, part_id: &str) -> CoreResult<i64> {
        Ok(cmms_core::stock::on_hand(
            self.view.stock.iter().filter(|t| t.part_id == part_id),
        ))
    }

    async fn stock_transactions_for_part(
        &mut self,
        part_id: &str,
    ) -> CoreResult<Vec<StockTransaction>> {
        let mut rows: Vec<StockTransaction> = self
            .view
            .stock
            .iter()
            .filter(|t| t.part_id == part_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn stock_transactions_page(
        &mut self,
        part_id: Option<&str>,
        after: Option<&LogCursor>,
        limit: usize,
    ) -> CoreResult<Vec<StockTransaction>> {
        let mut rows: Vec<StockTransaction> = self
            .view
            .stock
            .iter()
            .filter(|t| part_id.map_or(true, |p| t.part_id == p))
            .filter(|t| after_log(after, t.recorded_at, &t.id))
            .cloned()
            .collect();
        rows.sort_by_key(LogCursor::of_stock);
        rows.truncate(limit);
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    async fn get_user(&mut self, id: &str) -> CoreResult<Option<User>> {
        Ok(self.view.users.get(id).cloned())
    }

    async fn get_user_by_username(&mut self, username: &str) -> CoreResult<Option<User>> {
        Ok(self
            .view
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&mut self, filter: &UserFilter) -> CoreResult<Vec<User>> {
        let mut rows: Vec<User> = self
            .view
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(rows)
    }

    async fn count_users(&mut self) -> CoreResult<i64> {
        Ok(self.view.users.len() as i64)
    }

    async fn insert_user(&mut self, user: &User) -> CoreResult<()> {
        if self.view.users.values().any(|u| u.username == user.username) {
            return Err(duplicate("username", &user.username));
        }
        self.insert_row(RowKey::User(user.id.clone()))?;
        self.view.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update_user(&mut self, user: &User, expected_version: i64) -> CoreResult<()> {
        self.update_row(RowKey::User(user.id.clone()), expected_version)?;
        self.view.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Audit
    // -------------------------------------------------------------------------

    async fn append_audit(&mut self, entry: &AuditEntry) -> CoreResult<()> {
        self.view.audit.push(entry.clone());
        self.new_audit.push(entry.clone());
        Ok(())
    }

    async fn audit_for_target(&mut self, target_id: &str) -> CoreResult<Vec<AuditEntry>> {
        let mut rows: Vec<AuditEntry> = self
            .view
            .audit
            .iter()
            .filter(|e| e.target_id.as_deref() == Some(target_id))
            .cloned()
            .collect();
        rows.sort_by_key(LogCursor::of_audit);
        Ok(rows)
    }

    async fn audit_page(
        &mut self,
        after: Option<&LogCursor>,
        limit: usize,
    ) -> CoreResult<Vec<AuditEntry>> {
        let mut rows: Vec<AuditEntry> = self
            .view
            .audit
            .iter()
            .filter(|e| after_log(after, e.recorded_at, &e.id))
            .cloned()
            .collect();
        rows.sort_by_key(LogCursor::of_audit);
        rows.truncate(limit);
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    async fn commit(self) -> CoreResult<()> {
        let mut committed = self.committed.lock().await;

        for (key, first_seen) in &self.touched {
            if committed.version_of(key) != *first_seen {
                let (entity, id) = key.entity();
                debug!(entity, id, "Commit rejected: row changed since it was read");
                return Err(CoreError::conflict(entity, id));
            }
        }

        for key in self.touched.keys() {
            match key {
                RowKey::Part(id) => {
                    if let Some(part) = self.view.parts.get(id) {
                        if committed
                            .parts
                            .values()
                            .any(|p| p.sku == part.sku && p.id != part.id)
                        {
                            return Err(duplicate("sku", &part.sku));
                        }
                    }
                }
                RowKey::User(id) => {
                    if let Some(user) = self.view.users.get(id) {
                        if committed
                            .users
                            .values()
                            .any(|u| u.username == user.username && u.id != user.id)
                        {
                            return Err(duplicate("username", &user.username));
                        }
                    }
                }
                _ => {}
            }
        }

        for key in self.touched.keys() {
            committed.copy_row(&self.view, key);
        }
        committed.completions.extend(self.new_completions);
        committed.stock.extend(self.new_stock);
        committed.audit.extend(self.new_audit);

        Ok(())
    }

    async fn rollback(self) -> CoreResult<()> {
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cmms_core::{new_id, StockReason};

    fn part(sku: &str) -> Part {
        Part {
            id: new_id(),
            sku: sku.into(),
            name: "V-belt".into(),
            location: None,
            reorder_threshold: 2,
            unit_cost_cents: 899,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    fn receipt(part_id: &str, delta: i64) -> StockTransaction {
        StockTransaction {
            id: new_id(),
            part_id: part_id.into(),
            delta,
            reason: StockReason::Replenishment,
            work_order_id: None,
            note: None,
            actor_id: "u-1".into(),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let p = part("BLT-A42");

        let mut tx = store.begin().await.unwrap();
        tx.insert_part(&p).await.unwrap();
        tx.append_stock_transaction(&receipt(&p.id, 5)).await.unwrap();
        assert_eq!(tx.on_hand(&p.id).await.unwrap(), 5);
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_part(&p.id).await.unwrap().is_none());
        assert_eq!(tx.on_hand(&p.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_update_conflicts_at_commit() {
        let store = MemoryStore::new();
        let p = part("BLT-A42");
        let mut tx = store.begin().await.unwrap();
        tx.insert_part(&p).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        let mut a = p.clone();
        a.version = 2;
        a.name = "first".into();
        first.update_part(&a, 1).await.unwrap();

        let mut b = p.clone();
        b.version = 2;
        b.name = "second".into();
        second.update_part(&b, 1).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(CoreError::Conflict { .. })
        ));

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_part(&p.id).await.unwrap().unwrap().name, "first");
    }

    #[tokio::test]
    async fn test_stale_expected_version_is_conflict() {
        let store = MemoryStore::new();
        let p = part("BLT-A42");
        let mut tx = store.begin().await.unwrap();
        tx.insert_part(&p).await.unwrap();
        let mut stale = p.clone();
        stale.version = 6;
        assert!(matches!(
            tx.update_part(&stale, 5).await,
            Err(CoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_sku_across_transactions() {
        let store = MemoryStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.insert_part(&part("BLT-A42")).await.unwrap();
        second.insert_part(&part("BLT-A42")).await.unwrap();
        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(CoreError::Validation(ValidationError::Duplicate { .. }))
        ));
    }
}
