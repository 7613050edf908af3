//! # PM Scheduler
//!
//! Maintenance tasks, their schedules and the completion history.
//!
//! ## Completion Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cadence 30d, next_due 2025-01-31                                       │
//! │                                                                         │
//! │  complete 2025-01-15 ──► next_due = max(01-31, 01-15 + 30d) = 02-14     │
//! │  complete 2025-01-10 ──► next_due = max(02-14, 01-10 + 30d) = 02-14     │
//! │                          (recorded, advanced = false)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Schedule status is stored as of the last write and re-derived against
//! the clock on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use cmms_core::schedule::{apply_completion, next_due_after, status_at, validate_cadence};
use cmms_core::store::StoreTx;
use cmms_core::validation::{
    validate_labor_minutes, validate_not_future, validate_optional_text, validate_text,
};
use cmms_core::{
    new_id, Action, CoreError, CoreResult, MaintenanceTask, PmCompletion, PmSchedule,
};

use crate::audit::{AuditDraft, Mutation};
use crate::locks::EntityLocks;
use crate::registry::require_active;

/// Anchor for a new schedule's first due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "at")]
pub enum ScheduleStart {
    /// The task was last done at this time; first due is one cadence later.
    LastCompleted(DateTime<Utc>),
    /// First due exactly at this time.
    FirstDue(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub equipment_id: String,
    pub description: String,
    pub cadence_days: i64,
    pub start: ScheduleStart,
}

/// A reported PM completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub completed_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub labor_minutes: Option<i64>,
}

impl CompletionReport {
    pub fn at(completed_at: DateTime<Utc>) -> Self {
        CompletionReport {
            completed_at,
            notes: None,
            labor_minutes: None,
        }
    }
}

/// A defined task together with its schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinedTask {
    pub task: MaintenanceTask,
    pub schedule: PmSchedule,
}

async fn load_schedule<T: StoreTx>(tx: &mut T, schedule_id: &str) -> CoreResult<PmSchedule> {
    tx.get_schedule(schedule_id)
        .await?
        .ok_or_else(|| CoreError::not_found("PmSchedule", schedule_id))
}

#[derive(Debug)]
pub struct Scheduler {
    locks: EntityLocks,
    due_soon_days: i64,
}

impl Scheduler {
    pub fn new(due_soon_days: i64) -> Self {
        Scheduler {
            locks: EntityLocks::new("schedule"),
            due_soon_days,
        }
    }

    pub async fn lock(&self, schedule_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(schedule_id).await
    }

    /// Re-derives the status of `schedule` as seen at `now`.
    pub fn refresh(&self, mut schedule: PmSchedule, now: DateTime<Utc>) -> PmSchedule {
        schedule.status = status_at(schedule.next_due, now, self.due_soon_days);
        schedule
    }

    /// Creates a task and its schedule for an in-service piece of equipment.
    pub async fn define_task<T: StoreTx>(
        &self,
        tx: &mut T,
        input: NewTask,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<DefinedTask>> {
        validate_text("description", &input.description, 500)?;
        validate_cadence(input.cadence_days)?;
        let equipment = require_active(tx, &input.equipment_id, "define task").await?;

        let task = MaintenanceTask {
            id: new_id(),
            equipment_id: equipment.id.clone(),
            description: input.description.trim().to_string(),
            cadence_days: input.cadence_days,
            created_at: now,
        };

        let (last_completed, next_due) = match input.start {
            ScheduleStart::LastCompleted(at) => (Some(at), next_due_after(at, task.cadence_days)?),
            ScheduleStart::FirstDue(at) => (None, at),
        };

        let schedule = PmSchedule {
            id: new_id(),
            equipment_id: equipment.id.clone(),
            task_id: task.id.clone(),
            cadence_days: task.cadence_days,
            last_completed,
            next_due,
            status: status_at(next_due, now, self.due_soon_days),
            active: true,
            version: 1,
        };

        tx.insert_task(&task).await?;
        tx.insert_schedule(&schedule).await?;

        info!(
            equipment_id = %equipment.id,
            schedule_id = %schedule.id,
            cadence_days = task.cadence_days,
            next_due = %schedule.next_due,
            "PM task defined"
        );

        let defined = DefinedTask { task, schedule };
        let audit = AuditDraft::new(Action::DefineTask)
            .target(&defined.schedule.id)
            .after(&defined);
        Ok(Mutation::new(defined, audit))
    }

    /// Records a completion and moves next-due forward when it is later
    /// than the current one.
    pub async fn record_completion<T: StoreTx>(
        &self,
        tx: &mut T,
        schedule_id: &str,
        report: CompletionReport,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<PmSchedule>> {
        validate_not_future("completed_at", report.completed_at, now)?;
        validate_labor_minutes(report.labor_minutes)?;
        validate_optional_text("notes", report.notes.as_deref(), 1000)?;

        let before = load_schedule(tx, schedule_id).await?;
        if !before.active {
            return Err(CoreError::InvalidTransition {
                entity: "PmSchedule".to_string(),
                id: before.id.clone(),
                from: "inactive".to_string(),
                attempted: "record completion".to_string(),
                rule: "completions cannot be recorded on an inactive schedule".to_string(),
            });
        }

        let effect = apply_completion(&before, report.completed_at)?;
        let mut schedule = before.clone();
        schedule.last_completed = Some(effect.last_completed);
        schedule.next_due = effect.next_due;
        schedule.status = status_at(effect.next_due, now, self.due_soon_days);
        schedule.version = before.version + 1;
        tx.update_schedule(&schedule, before.version).await?;

        let completion = PmCompletion {
            id: new_id(),
            schedule_id: schedule.id.clone(),
            equipment_id: schedule.equipment_id.clone(),
            completed_at: report.completed_at,
            actor_id: actor_id.to_string(),
            notes: report.notes.map(|n| n.trim().to_string()),
            labor_minutes: report.labor_minutes,
            advanced: effect.advanced,
            recorded_at: now,
        };
        tx.append_completion(&completion).await?;

        debug!(
            schedule_id = %schedule.id,
            completed_at = %completion.completed_at,
            next_due = %schedule.next_due,
            advanced = effect.advanced,
            "PM completion recorded"
        );

        let mut audit = AuditDraft::new(Action::RecordCompletion)
            .target(&schedule.id)
            .before(&before)
            .after(&schedule);
        if !effect.advanced {
            audit = audit.detail("completion did not advance next due");
        }
        Ok(Mutation::new(schedule, audit))
    }

    /// Deactivates every active schedule of a piece of equipment. Returns the
    /// number deactivated. Runs inside the caller's transaction.
    pub async fn deactivate_for_equipment<T: StoreTx>(
        &self,
        tx: &mut T,
        equipment_id: &str,
    ) -> CoreResult<usize> {
        let mut count = 0;
        for schedule in tx.schedules_for_equipment(equipment_id).await? {
            if !schedule.active {
                continue;
            }
            let mut inactive = schedule.clone();
            inactive.active = false;
            inactive.version = schedule.version + 1;
            tx.update_schedule(&inactive, schedule.version).await?;
            count += 1;
        }
        Ok(count)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_schedule<T: StoreTx>(
        &self,
        tx: &mut T,
        schedule_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<PmSchedule> {
        let schedule = load_schedule(tx, schedule_id).await?;
        Ok(self.refresh(schedule, now))
    }

    pub async fn get_task<T: StoreTx>(&self, tx: &mut T, task_id: &str) -> CoreResult<MaintenanceTask> {
        tx.get_task(task_id)
            .await?
            .ok_or_else(|| CoreError::not_found("MaintenanceTask", task_id))
    }

    /// All schedules of an equipment, active or not, soonest first.
    pub async fn schedules_for<T: StoreTx>(
        &self,
        tx: &mut T,
        equipment_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<PmSchedule>> {
        Ok(tx
            .schedules_for_equipment(equipment_id)
            .await?
            .into_iter()
            .map(|s| self.refresh(s, now))
            .collect())
    }

    /// Completion history of a schedule, oldest first.
    pub async fn completion_history<T: StoreTx>(
        &self,
        tx: &mut T,
        schedule_id: &str,
    ) -> CoreResult<Vec<PmCompletion>> {
        load_schedule(tx, schedule_id).await?;
        tx.completions_for_schedule(schedule_id).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
