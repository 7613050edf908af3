//! # Maintenance Orchestrator
//!
//! The public surface of the core. Every mutating operation runs the same
//! pipeline against one store transaction.
//!
//! ## Operation Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. lock entities          work order before part                       │
//! │  2. begin tx                                                            │
//! │  3. resolve actor          unknown ──► InvalidActor ─┐                  │
//! │  4. authorize              denied  ──► Denied ───────┤                  │
//! │                                                      ▼                  │
//! │                              rollback, DeniedAttempt audit (own tx)     │
//! │  5. component mutates      error ──► rollback, FailedAttempt (own tx)  │
//! │  6. append audit entry     (same tx as the mutation)                    │
//! │  7. commit                 error ──► FailedAttempt (own tx)             │
//! │  8. return value                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads are not gated and write nothing; each runs in a read transaction
//! (`Store::begin_read`) that is rolled back.
//!
//! ## Example
//! ```no_run
//! use cmms_service::{MemoryStore, Orchestrator, ServiceSettings};
//! use cmms_service::registry::NewEquipment;
//!
//! # async fn demo() -> cmms_core::CoreResult<()> {
//! let cmms = Orchestrator::new(MemoryStore::new(), ServiceSettings::default());
//! let admin = cmms.bootstrap_manager("admin", "Plant Manager").await?;
//! let _pump = cmms
//!     .register_equipment(
//!         &admin.id,
//!         NewEquipment {
//!             name: "Feed pump".into(),
//!             location: "Boiler house".into(),
//!             description: None,
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use cmms_core::health::{HealthReport, HistoryEvent, MonthlyTrend};
use cmms_core::stock::{PartUsage, StockLevel, StockValuation};
use cmms_core::store::{EquipmentFilter, Store, StoreTx, UserFilter, WorkOrderFilter};
use cmms_core::{
    Action, AuditEntry, AuditOutcome, CoreError, CoreResult, Equipment, EquipmentStatus,
    MaintenanceTask, Money, Part, PmCompletion, PmSchedule, StockTransaction, User, WorkOrder,
    DEFAULT_USAGE_WINDOW_DAYS, SYSTEM_ACTOR,
};

use crate::audit::{AuditDraft, AuditLogger, Mutation};
use crate::clock::{Clock, SystemClock};
use crate::config::ServiceSettings;
use crate::feed::{AuditFeed, AuditSource, DueFeed, DueSource, Feed, StockFeed, StockSource};
use crate::guard::AccessGuard;
use crate::ledger::{Ledger, NewPart, PartChanges};
use crate::registry::{EquipmentChanges, NewEquipment, Registry};
use crate::scheduler::{CompletionReport, DefinedTask, NewTask, Scheduler};
use crate::users::{NewUser, UserChanges, UserDirectory};
use crate::work_orders::{ConsumeOutcome, NewWorkOrder, WorkOrderManager};

pub struct Orchestrator<S: Store> {
    store: S,
    clock: Arc<dyn Clock>,
    settings: ServiceSettings,
    guard: AccessGuard,
    audit: AuditLogger,
    registry: Registry,
    scheduler: Scheduler,
    work_orders: WorkOrderManager,
    ledger: Ledger,
    users: UserDirectory,
}

impl<S: Store> Orchestrator<S> {
    pub fn new(store: S, settings: ServiceSettings) -> Self {
        Orchestrator {
            store,
            clock: Arc::new(SystemClock),
            registry: Registry::new(settings.health_window_days),
            scheduler: Scheduler::new(settings.due_soon_days),
            settings,
            guard: AccessGuard,
            audit: AuditLogger,
            work_orders: WorkOrderManager::new(),
            ledger: Ledger::new(),
            users: UserDirectory,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    async fn discard(&self, tx: S::Tx) {
        if let Err(error) = tx.rollback().await {
            warn!(%error, "Rollback failed");
        }
    }

    /// Writes a DeniedAttempt or FailedAttempt entry in its own transaction.
    async fn record_refusal(
        &self,
        actor_id: &str,
        action: Action,
        target_id: Option<&str>,
        outcome: AuditOutcome,
        error: &CoreError,
    ) {
        let mut draft = AuditDraft::new(action).detail(error.to_string());
        draft.target_id = target_id.map(str::to_string);
        let entry = draft.finish(actor_id, outcome, self.now());

        if let Err(audit_error) = self.append_alone(entry).await {
            warn!(
                actor = actor_id,
                action = %action,
                outcome = ?outcome,
                error = %audit_error,
                "Could not record refused operation"
            );
        }
    }

    async fn append_alone(&self, entry: AuditEntry) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        self.audit.record(&mut tx, entry).await?;
        tx.commit().await
    }

    /// Opens the operation's transaction and checks the actor may perform
    /// `action`. Refusals are rolled back and audited before returning.
    async fn admit(
        &self,
        actor_id: &str,
        action: Action,
        target_id: Option<&str>,
    ) -> CoreResult<(S::Tx, User)> {
        let mut tx = self.store.begin().await?;

        let checked = match self.guard.resolve_actor(&mut tx, actor_id).await {
            Ok(user) => self.guard.check(&user, action).map(|()| user),
            Err(error) => Err(error),
        };

        match checked {
            Ok(user) => Ok((tx, user)),
            Err(error) => {
                self.discard(tx).await;
                if matches!(
                    error,
                    CoreError::InvalidActor { .. } | CoreError::Denied { .. }
                ) {
                    self.record_refusal(
                        actor_id,
                        action,
                        target_id,
                        AuditOutcome::DeniedAttempt,
                        &error,
                    )
                    .await;
                }
                Err(error)
            }
        }
    }

    /// Audits and commits a component result, or rolls back and records
    /// the failure.
    async fn settle<R>(
        &self,
        mut tx: S::Tx,
        actor_id: &str,
        action: Action,
        target_id: Option<&str>,
        result: CoreResult<Mutation<R>>,
    ) -> CoreResult<R> {
        let Mutation { value, audit } = match result {
            Ok(mutation) => mutation,
            Err(error) => {
                self.discard(tx).await;
                warn!(actor = actor_id, action = %action, code = error.code(), %error, "Operation rolled back");
                self.record_refusal(actor_id, action, target_id, AuditOutcome::FailedAttempt, &error)
                    .await;
                return Err(error);
            }
        };

        let target = audit.target_id.clone();
        let entry = audit.finish(actor_id, AuditOutcome::Succeeded, self.now());
        if let Err(error) = self.audit.record(&mut tx, entry).await {
            self.discard(tx).await;
            self.record_refusal(actor_id, action, target_id, AuditOutcome::FailedAttempt, &error)
                .await;
            return Err(error);
        }

        if let Err(error) = tx.commit().await {
            warn!(actor = actor_id, action = %action, code = error.code(), %error, "Commit failed");
            self.record_refusal(
                actor_id,
                action,
                target.as_deref().or(target_id),
                AuditOutcome::FailedAttempt,
                &error,
            )
            .await;
            return Err(error);
        }

        debug!(actor = actor_id, action = %action, target = ?target, "Operation committed");
        Ok(value)
    }

    async fn read_tx(&self) -> CoreResult<S::Tx> {
        self.store.begin_read().await
    }

    async fn finish_read<R>(&self, tx: S::Tx, result: CoreResult<R>) -> CoreResult<R> {
        self.discard(tx).await;
        result
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Creates the first manager on an empty directory, audited as `system`.
    pub async fn bootstrap_manager(&self, username: &str, full_name: &str) -> CoreResult<User> {
        let mut tx = self.store.begin().await?;
        let result = self
            .users
            .bootstrap_manager(&mut tx, username, full_name, self.now())
            .await;
        self.settle(tx, SYSTEM_ACTOR, Action::CreateUser, None, result)
            .await
    }

    pub async fn create_user(&self, actor_id: &str, input: NewUser) -> CoreResult<User> {
        let (mut tx, _) = self.admit(actor_id, Action::CreateUser, None).await?;
        let result = self.users.create(&mut tx, input, self.now()).await;
        self.settle(tx, actor_id, Action::CreateUser, None, result)
            .await
    }

    pub async fn update_user(
        &self,
        actor_id: &str,
        user_id: &str,
        changes: UserChanges,
    ) -> CoreResult<User> {
        let (mut tx, actor) = self
            .admit(actor_id, Action::UpdateUser, Some(user_id))
            .await?;
        let result = self
            .users
            .update(&mut tx, &actor, user_id, changes, self.now())
            .await;
        self.settle(tx, actor_id, Action::UpdateUser, Some(user_id), result)
            .await
    }

    pub async fn get_user(&self, user_id: &str) -> CoreResult<User> {
        let mut tx = self.read_tx().await?;
        let result = self.users.get(&mut tx, user_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn list_users(&self, filter: &UserFilter) -> CoreResult<Vec<User>> {
        let mut tx = self.read_tx().await?;
        let result = self.users.list(&mut tx, filter).await;
        self.finish_read(tx, result).await
    }

    // =========================================================================
    // Equipment
    // =========================================================================

    pub async fn register_equipment(
        &self,
        actor_id: &str,
        input: NewEquipment,
    ) -> CoreResult<Equipment> {
        let (mut tx, _) = self
            .admit(actor_id, Action::RegisterEquipment, None)
            .await?;
        let result = self.registry.register(&mut tx, input, self.now()).await;
        self.settle(tx, actor_id, Action::RegisterEquipment, None, result)
            .await
    }

    pub async fn update_equipment(
        &self,
        actor_id: &str,
        equipment_id: &str,
        changes: EquipmentChanges,
    ) -> CoreResult<Equipment> {
        let (mut tx, _) = self
            .admit(actor_id, Action::UpdateEquipment, Some(equipment_id))
            .await?;
        let result = self
            .registry
            .update(&mut tx, equipment_id, changes, self.now())
            .await;
        self.settle(tx, actor_id, Action::UpdateEquipment, Some(equipment_id), result)
            .await
    }

    pub async fn change_equipment_status(
        &self,
        actor_id: &str,
        equipment_id: &str,
        status: EquipmentStatus,
        reason: &str,
    ) -> CoreResult<Equipment> {
        let action = Action::ChangeEquipmentStatus;
        let (mut tx, _) = self.admit(actor_id, action, Some(equipment_id)).await?;
        let result = self
            .registry
            .change_status(
                &mut tx,
                &self.scheduler,
                equipment_id,
                status,
                reason,
                self.now(),
            )
            .await;
        self.settle(tx, actor_id, action, Some(equipment_id), result)
            .await
    }

    pub async fn get_equipment(&self, equipment_id: &str) -> CoreResult<Equipment> {
        let mut tx = self.read_tx().await?;
        let result = self.registry.get(&mut tx, equipment_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn list_equipment(&self, filter: &EquipmentFilter) -> CoreResult<Vec<Equipment>> {
        let mut tx = self.read_tx().await?;
        let result = self.registry.list(&mut tx, filter).await;
        self.finish_read(tx, result).await
    }

    pub async fn equipment_health(&self, equipment_id: &str) -> CoreResult<HealthReport> {
        let mut tx = self.read_tx().await?;
        let result = self.registry.health(&mut tx, equipment_id, self.now()).await;
        self.finish_read(tx, result).await
    }

    pub async fn equipment_history(
        &self,
        equipment_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> CoreResult<Vec<HistoryEvent>> {
        let mut tx = self.read_tx().await?;
        let result = self.registry.history(&mut tx, equipment_id, since).await;
        self.finish_read(tx, result).await
    }

    /// Monthly PM, CM, labor and parts cost for the last `months` months.
    pub async fn maintenance_trends(
        &self,
        equipment_id: &str,
        months: u32,
    ) -> CoreResult<Vec<MonthlyTrend>> {
        let mut tx = self.read_tx().await?;
        let result = self
            .registry
            .trends(&mut tx, equipment_id, months, self.now())
            .await;
        self.finish_read(tx, result).await
    }

    // =========================================================================
    // Preventive Maintenance
    // =========================================================================

    pub async fn define_task(&self, actor_id: &str, input: NewTask) -> CoreResult<DefinedTask> {
        let (mut tx, _) = self.admit(actor_id, Action::DefineTask, None).await?;
        let result = self.scheduler.define_task(&mut tx, input, self.now()).await;
        self.settle(tx, actor_id, Action::DefineTask, None, result)
            .await
    }

    pub async fn record_completion(
        &self,
        actor_id: &str,
        schedule_id: &str,
        report: CompletionReport,
    ) -> CoreResult<PmSchedule> {
        let _schedule = self.scheduler.lock(schedule_id).await;
        let action = Action::RecordCompletion;
        let (mut tx, _) = self.admit(actor_id, action, Some(schedule_id)).await?;
        let result = self
            .scheduler
            .record_completion(&mut tx, schedule_id, report, actor_id, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(schedule_id), result)
            .await
    }

    pub async fn get_schedule(&self, schedule_id: &str) -> CoreResult<PmSchedule> {
        let mut tx = self.read_tx().await?;
        let result = self
            .scheduler
            .get_schedule(&mut tx, schedule_id, self.now())
            .await;
        self.finish_read(tx, result).await
    }

    pub async fn get_task(&self, task_id: &str) -> CoreResult<MaintenanceTask> {
        let mut tx = self.read_tx().await?;
        let result = self.scheduler.get_task(&mut tx, task_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn schedules_for(&self, equipment_id: &str) -> CoreResult<Vec<PmSchedule>> {
        let mut tx = self.read_tx().await?;
        let result = self
            .scheduler
            .schedules_for(&mut tx, equipment_id, self.now())
            .await;
        self.finish_read(tx, result).await
    }

    pub async fn completion_history(&self, schedule_id: &str) -> CoreResult<Vec<PmCompletion>> {
        let mut tx = self.read_tx().await?;
        let result = self.scheduler.completion_history(&mut tx, schedule_id).await;
        self.finish_read(tx, result).await
    }

    /// Active schedules due by `as_of + window`, soonest first. A negative
    /// or out-of-range window is a validation error.
    pub fn list_due(&self, as_of: DateTime<Utc>, window: Duration) -> CoreResult<DueFeed<S>> {
        let source = DueSource::new(
            self.store.clone(),
            as_of,
            window,
            self.settings.due_soon_days,
        )?;
        Ok(Feed::new(source, self.settings.page_size))
    }

    // =========================================================================
    // Work Orders
    // =========================================================================

    pub async fn create_work_order(
        &self,
        actor_id: &str,
        input: NewWorkOrder,
    ) -> CoreResult<WorkOrder> {
        let (mut tx, _) = self.admit(actor_id, Action::CreateWorkOrder, None).await?;
        let result = self
            .work_orders
            .create(&mut tx, input, actor_id, self.now())
            .await;
        self.settle(tx, actor_id, Action::CreateWorkOrder, None, result)
            .await
    }

    pub async fn assign_work_order(
        &self,
        actor_id: &str,
        work_order_id: &str,
        assignee_id: &str,
    ) -> CoreResult<WorkOrder> {
        let _wo = self.work_orders.lock(work_order_id).await;
        let action = Action::AssignWorkOrder;
        let (mut tx, _) = self.admit(actor_id, action, Some(work_order_id)).await?;
        let result = self
            .work_orders
            .assign(&mut tx, work_order_id, assignee_id, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(work_order_id), result)
            .await
    }

    pub async fn report_shortage(
        &self,
        actor_id: &str,
        work_order_id: &str,
        part_id: &str,
        requested: i64,
    ) -> CoreResult<WorkOrder> {
        let _wo = self.work_orders.lock(work_order_id).await;
        let action = Action::ReportShortage;
        let (mut tx, _) = self.admit(actor_id, action, Some(work_order_id)).await?;
        let result = self
            .work_orders
            .report_shortage(&mut tx, work_order_id, part_id, requested, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(work_order_id), result)
            .await
    }

    pub async fn resume_work_order(
        &self,
        actor_id: &str,
        work_order_id: &str,
    ) -> CoreResult<WorkOrder> {
        let _wo = self.work_orders.lock(work_order_id).await;
        let action = Action::ResumeWorkOrder;
        let (mut tx, _) = self.admit(actor_id, action, Some(work_order_id)).await?;
        let result = self
            .work_orders
            .resume(&mut tx, work_order_id, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(work_order_id), result)
            .await
    }

    pub async fn complete_work_order(
        &self,
        actor_id: &str,
        work_order_id: &str,
        note: &str,
    ) -> CoreResult<WorkOrder> {
        let _wo = self.work_orders.lock(work_order_id).await;
        let action = Action::CompleteWorkOrder;
        let (mut tx, _) = self.admit(actor_id, action, Some(work_order_id)).await?;
        let result = self
            .work_orders
            .complete(&mut tx, work_order_id, note, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(work_order_id), result)
            .await
    }

    pub async fn close_work_order(
        &self,
        actor_id: &str,
        work_order_id: &str,
    ) -> CoreResult<WorkOrder> {
        let _wo = self.work_orders.lock(work_order_id).await;
        let action = Action::CloseWorkOrder;
        let (mut tx, _) = self.admit(actor_id, action, Some(work_order_id)).await?;
        let result = self
            .work_orders
            .close(&mut tx, work_order_id, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(work_order_id), result)
            .await
    }

    pub async fn cancel_work_order(
        &self,
        actor_id: &str,
        work_order_id: &str,
        reason: &str,
    ) -> CoreResult<WorkOrder> {
        let _wo = self.work_orders.lock(work_order_id).await;
        let action = Action::CancelWorkOrder;
        let (mut tx, _) = self.admit(actor_id, action, Some(work_order_id)).await?;
        let result = self
            .work_orders
            .cancel(&mut tx, work_order_id, reason, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(work_order_id), result)
            .await
    }

    /// Draws parts for a work order. A stock shortfall is committed as a
    /// [`ConsumeOutcome::PendingParts`]; use
    /// [`ConsumeOutcome::into_result`] to treat it as an error.
    pub async fn consume_part(
        &self,
        actor_id: &str,
        work_order_id: &str,
        part_id: &str,
        quantity: i64,
    ) -> CoreResult<ConsumeOutcome> {
        let _wo = self.work_orders.lock(work_order_id).await;
        let _part = self.ledger.lock(part_id).await;
        let action = Action::ConsumePart;
        let (mut tx, _) = self.admit(actor_id, action, Some(work_order_id)).await?;
        let result = self
            .work_orders
            .consume_part(
                &mut tx,
                &self.ledger,
                work_order_id,
                part_id,
                quantity,
                actor_id,
                self.now(),
            )
            .await;
        self.settle(tx, actor_id, action, Some(work_order_id), result)
            .await
    }

    pub async fn waive_shortage(
        &self,
        actor_id: &str,
        work_order_id: &str,
        part_id: &str,
    ) -> CoreResult<WorkOrder> {
        let _wo = self.work_orders.lock(work_order_id).await;
        let action = Action::WaiveShortage;
        let (mut tx, _) = self.admit(actor_id, action, Some(work_order_id)).await?;
        let result = self
            .work_orders
            .waive_shortage(&mut tx, work_order_id, part_id, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(work_order_id), result)
            .await
    }

    pub async fn get_work_order(&self, work_order_id: &str) -> CoreResult<WorkOrder> {
        let mut tx = self.read_tx().await?;
        let result = self.work_orders.get(&mut tx, work_order_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn list_work_orders(&self, filter: &WorkOrderFilter) -> CoreResult<Vec<WorkOrder>> {
        let mut tx = self.read_tx().await?;
        let result = self.work_orders.list(&mut tx, filter).await;
        self.finish_read(tx, result).await
    }

    pub async fn parts_cost(&self, work_order_id: &str) -> CoreResult<Money> {
        let mut tx = self.read_tx().await?;
        let result = self.work_orders.parts_cost(&mut tx, work_order_id).await;
        self.finish_read(tx, result).await
    }

    // =========================================================================
    // Parts & Stock
    // =========================================================================

    pub async fn create_part(&self, actor_id: &str, input: NewPart) -> CoreResult<Part> {
        let (mut tx, _) = self.admit(actor_id, Action::CreatePart, None).await?;
        let result = self.ledger.create_part(&mut tx, input, self.now()).await;
        self.settle(tx, actor_id, Action::CreatePart, None, result)
            .await
    }

    pub async fn update_part(
        &self,
        actor_id: &str,
        part_id: &str,
        changes: PartChanges,
    ) -> CoreResult<Part> {
        let _part = self.ledger.lock(part_id).await;
        let (mut tx, _) = self
            .admit(actor_id, Action::UpdatePart, Some(part_id))
            .await?;
        let result = self
            .ledger
            .update_part(&mut tx, part_id, changes, self.now())
            .await;
        self.settle(tx, actor_id, Action::UpdatePart, Some(part_id), result)
            .await
    }

    pub async fn replenish(
        &self,
        actor_id: &str,
        part_id: &str,
        quantity: i64,
        note: Option<String>,
    ) -> CoreResult<StockTransaction> {
        let _part = self.ledger.lock(part_id).await;
        let action = Action::ReplenishStock;
        let (mut tx, _) = self.admit(actor_id, action, Some(part_id)).await?;
        let result = self
            .ledger
            .replenish(&mut tx, part_id, quantity, note, actor_id, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(part_id), result)
            .await
    }

    pub async fn adjust_stock(
        &self,
        actor_id: &str,
        part_id: &str,
        delta: i64,
        note: &str,
    ) -> CoreResult<StockTransaction> {
        let _part = self.ledger.lock(part_id).await;
        let action = Action::AdjustStock;
        let (mut tx, _) = self.admit(actor_id, action, Some(part_id)).await?;
        let result = self
            .ledger
            .adjust(&mut tx, part_id, delta, note.to_string(), actor_id, self.now())
            .await;
        self.settle(tx, actor_id, action, Some(part_id), result)
            .await
    }

    pub async fn get_part(&self, part_id: &str) -> CoreResult<Part> {
        let mut tx = self.read_tx().await?;
        let result = self.ledger.get_part(&mut tx, part_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn list_parts(&self) -> CoreResult<Vec<Part>> {
        let mut tx = self.read_tx().await?;
        let result = self.ledger.list_parts(&mut tx).await;
        self.finish_read(tx, result).await
    }

    pub async fn on_hand(&self, part_id: &str) -> CoreResult<i64> {
        let mut tx = self.read_tx().await?;
        let result = self.ledger.on_hand(&mut tx, part_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn below_reorder_threshold(&self, part_id: &str) -> CoreResult<bool> {
        let mut tx = self.read_tx().await?;
        let result = self.ledger.below_reorder_threshold(&mut tx, part_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn stock_level(&self, part_id: &str) -> CoreResult<StockLevel> {
        let mut tx = self.read_tx().await?;
        let result = self.ledger.stock_level(&mut tx, part_id).await;
        self.finish_read(tx, result).await
    }

    pub async fn low_stock(&self) -> CoreResult<Vec<StockLevel>> {
        let mut tx = self.read_tx().await?;
        let result = self.ledger.low_stock(&mut tx).await;
        self.finish_read(tx, result).await
    }

    pub async fn stock_valuation(&self) -> CoreResult<StockValuation> {
        let mut tx = self.read_tx().await?;
        let result = self.ledger.valuation(&mut tx).await;
        self.finish_read(tx, result).await
    }

    pub async fn transactions_for(&self, part_id: &str) -> CoreResult<Vec<StockTransaction>> {
        let mut tx = self.read_tx().await?;
        let result = self.ledger.transactions_for(&mut tx, part_id).await;
        self.finish_read(tx, result).await
    }

    /// Per-part consumption since `since`, or over the last
    /// [`DEFAULT_USAGE_WINDOW_DAYS`] days.
    pub async fn parts_usage(&self, since: Option<DateTime<Utc>>) -> CoreResult<Vec<PartUsage>> {
        let since = match since {
            Some(since) => since,
            None => self.now() - Duration::days(DEFAULT_USAGE_WINDOW_DAYS),
        };
        let mut tx = self.read_tx().await?;
        let result = self.ledger.usage_report(&mut tx, since).await;
        self.finish_read(tx, result).await
    }

    /// Stock transactions in (recorded_at, id) order; one part or all.
    pub fn ledger_feed(&self, part_id: Option<String>) -> StockFeed<S> {
        Feed::new(
            StockSource::new(self.store.clone(), part_id),
            self.settings.page_size,
        )
    }

    // =========================================================================
    // Audit
    // =========================================================================

    pub async fn audit_for(&self, target_id: &str) -> CoreResult<Vec<AuditEntry>> {
        let mut tx = self.read_tx().await?;
        let result = self.audit.entries_for(&mut tx, target_id).await;
        self.finish_read(tx, result).await
    }

    /// The whole audit trail in (recorded_at, id) order.
    pub fn audit_feed(&self) -> AuditFeed<S> {
        Feed::new(AuditSource::new(self.store.clone()), self.settings.page_size)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory::MemoryStore;
    use chrono::TimeZone;
    use cmms_core::{Role, TargetKind};

    fn orchestrator() -> Orchestrator<MemoryStore> {
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        Orchestrator::new(MemoryStore::new(), ServiceSettings::default())
            .with_clock(Arc::new(FixedClock::new(at)))
    }

    #[tokio::test]
    async fn test_success_writes_one_audit_entry() {
        let cmms = orchestrator();
        let admin = cmms.bootstrap_manager("admin", "Admin").await.unwrap();

        let eq = cmms
            .register_equipment(
                &admin.id,
                NewEquipment {
                    name: "Chiller".into(),
                    location: "Roof".into(),
                    description: None,
                },
            )
            .await
            .unwrap();

        let entries = cmms.audit_for(&eq.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, Action::RegisterEquipment);
        assert_eq!(entries[0].outcome, AuditOutcome::Succeeded);
        assert_eq!(entries[0].target_kind, TargetKind::Equipment);
        assert_eq!(entries[0].actor_id, admin.id);

        let bootstrap = cmms.audit_for(&admin.id).await.unwrap();
        assert_eq!(bootstrap[0].actor_id, SYSTEM_ACTOR);
    }

    #[tokio::test]
    async fn test_unknown_actor_is_invalid_and_audited() {
        let cmms = orchestrator();
        let result = cmms
            .register_equipment(
                "ghost",
                NewEquipment {
                    name: "Chiller".into(),
                    location: "Roof".into(),
                    description: None,
                },
            )
            .await;
        assert!(matches!(result, Err(CoreError::InvalidActor { .. })));

        let trail = cmms.audit_feed().collect_all().await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].outcome, AuditOutcome::DeniedAttempt);
        assert!(cmms
            .list_equipment(&EquipmentFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_records_failed_attempt() {
        let cmms = orchestrator();
        let admin = cmms.bootstrap_manager("admin", "Admin").await.unwrap();

        let result = cmms
            .create_user(
                &admin.id,
                NewUser {
                    username: "admin".into(),
                    full_name: "Duplicate".into(),
                    role: Role::Technician,
                },
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));

        let trail = cmms.audit_feed().collect_all().await.unwrap();
        let failed: Vec<_> = trail
            .iter()
            .filter(|e| e.outcome == AuditOutcome::FailedAttempt)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].action, Action::CreateUser);
        assert_eq!(cmms.list_users(&UserFilter::default()).await.unwrap().len(), 1);
    }
}
