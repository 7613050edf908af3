//! # Equipment Registry
//!
//! Catalog of maintainable assets, plus the derived health report and
//! maintenance history.
//!
//! ## Status Transitions
//! ```text
//!            ┌──────────────┐
//!   Active ◄─┤              ├─► OutOfService
//!      │     └──────────────┘        │
//!      └──────────► Retired ◄────────┘
//!                  (terminal, schedules deactivated)
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use std::collections::HashMap;

use cmms_core::health::{
    monthly_trends, score, timeline, trend_months, HealthInputs, HealthReport, HistoryEvent,
    MonthlyTrend,
};
use cmms_core::schedule::expected_completions;
use cmms_core::store::{EquipmentFilter, StoreTx, WorkOrderFilter};
use cmms_core::validation::{validate_optional_text, validate_text};
use cmms_core::{
    new_id, Action, CoreError, CoreResult, Equipment, EquipmentStatus, Money, ValidationError,
    WorkOrderStatus, MAX_TREND_MONTHS,
};

use crate::audit::{AuditDraft, Mutation};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEquipment {
    pub name: String,
    pub location: String,
    pub description: Option<String>,
}

/// Partial update. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentChanges {
    pub name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// `now - days`, clamped to the earliest representable instant.
fn window_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) async fn load_equipment<T: StoreTx>(tx: &mut T, id: &str) -> CoreResult<Equipment> {
    tx.get_equipment(id)
        .await?
        .ok_or_else(|| CoreError::not_found("Equipment", id))
}

fn retired(equipment: &Equipment, attempted: &str) -> CoreError {
    CoreError::InvalidTransition {
        entity: "Equipment".to_string(),
        id: equipment.id.clone(),
        from: equipment.status.to_string(),
        attempted: attempted.to_string(),
        rule: "retired equipment cannot take new work".to_string(),
    }
}

/// Loads equipment that is not retired. Used before attaching new tasks or
/// work orders to it.
pub(crate) async fn require_active<T: StoreTx>(
    tx: &mut T,
    id: &str,
    attempted: &str,
) -> CoreResult<Equipment> {
    let equipment = load_equipment(tx, id).await?;
    if equipment.is_retired() {
        return Err(retired(&equipment, attempted));
    }
    Ok(equipment)
}

fn can_change_status(from: EquipmentStatus, to: EquipmentStatus) -> bool {
    use EquipmentStatus::*;
    matches!(
        (from, to),
        (Active, OutOfService) | (OutOfService, Active) | (Active, Retired) | (OutOfService, Retired)
    )
}

#[derive(Debug)]
pub struct Registry {
    health_window_days: i64,
}

impl Registry {
    pub fn new(health_window_days: i64) -> Self {
        Registry { health_window_days }
    }

    pub async fn register<T: StoreTx>(
        &self,
        tx: &mut T,
        input: NewEquipment,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<Equipment>> {
        validate_text("name", &input.name, 200)?;
        validate_text("location", &input.location, 100)?;
        validate_optional_text("description", input.description.as_deref(), 1000)?;

        let equipment = Equipment {
            id: new_id(),
            name: input.name.trim().to_string(),
            location: input.location.trim().to_string(),
            description: input.description.map(|d| d.trim().to_string()),
            status: EquipmentStatus::Active,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        tx.insert_equipment(&equipment).await?;

        info!(equipment_id = %equipment.id, name = %equipment.name, "Equipment registered");
        let audit = AuditDraft::new(Action::RegisterEquipment)
            .target(&equipment.id)
            .after(&equipment);
        Ok(Mutation::new(equipment, audit))
    }

    /// Edits descriptive fields. Retired equipment is read-only.
    pub async fn update<T: StoreTx>(
        &self,
        tx: &mut T,
        id: &str,
        changes: EquipmentChanges,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<Equipment>> {
        let before = require_active(tx, id, "update").await?;
        let mut equipment = before.clone();

        if let Some(name) = changes.name {
            validate_text("name", &name, 200)?;
            equipment.name = name.trim().to_string();
        }
        if let Some(location) = changes.location {
            validate_text("location", &location, 100)?;
            equipment.location = location.trim().to_string();
        }
        if let Some(description) = changes.description {
            validate_text("description", &description, 1000)?;
            equipment.description = Some(description.trim().to_string());
        }

        equipment.updated_at = now;
        equipment.version = before.version + 1;
        tx.update_equipment(&equipment, before.version).await?;

        let audit = AuditDraft::new(Action::UpdateEquipment)
            .target(&equipment.id)
            .before(&before)
            .after(&equipment);
        Ok(Mutation::new(equipment, audit))
    }

    /// Moves equipment between statuses. Retiring deactivates its schedules
    /// in the same transaction.
    pub async fn change_status<T: StoreTx>(
        &self,
        tx: &mut T,
        scheduler: &Scheduler,
        id: &str,
        status: EquipmentStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<Equipment>> {
        validate_text("reason", reason, 500)?;
        let before = load_equipment(tx, id).await?;

        if !can_change_status(before.status, status) {
            return Err(CoreError::InvalidTransition {
                entity: "Equipment".to_string(),
                id: before.id.clone(),
                from: before.status.to_string(),
                attempted: format!("move to {}", status),
                rule: if before.is_retired() {
                    "retired is terminal".to_string()
                } else {
                    format!("equipment is already {}", status)
                },
            });
        }

        let mut equipment = before.clone();
        equipment.status = status;
        equipment.updated_at = now;
        equipment.version = before.version + 1;
        tx.update_equipment(&equipment, before.version).await?;

        let mut deactivated = 0;
        if status == EquipmentStatus::Retired {
            deactivated = scheduler.deactivate_for_equipment(tx, id).await?;
        }

        info!(
            equipment_id = %equipment.id,
            from = %before.status,
            to = %status,
            deactivated_schedules = deactivated,
            "Equipment status changed"
        );

        let audit = AuditDraft::new(Action::ChangeEquipmentStatus)
            .target(&equipment.id)
            .before(&before)
            .after(&equipment)
            .detail(format!(
                "{} -> {}: {}",
                before.status,
                status,
                reason.trim()
            ));
        Ok(Mutation::new(equipment, audit))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get<T: StoreTx>(&self, tx: &mut T, id: &str) -> CoreResult<Equipment> {
        load_equipment(tx, id).await
    }

    pub async fn list<T: StoreTx>(
        &self,
        tx: &mut T,
        filter: &EquipmentFilter,
    ) -> CoreResult<Vec<Equipment>> {
        tx.list_equipment(filter).await
    }

    /// Scores the equipment over the configured window ending at `now`.
    pub async fn health<T: StoreTx>(
        &self,
        tx: &mut T,
        id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<HealthReport> {
        let equipment = load_equipment(tx, id).await?;
        let since = window_start(now, self.health_window_days);

        let expected_pm: i64 = tx
            .schedules_for_equipment(id)
            .await?
            .iter()
            .filter(|s| s.active)
            .map(|s| expected_completions(s.cadence_days, self.health_window_days))
            .sum();

        let completions = tx.completions_for_equipment(id, since).await?;
        let labor_minutes: i64 = completions.iter().filter_map(|c| c.labor_minutes).sum();

        let work_orders = tx
            .list_work_orders(&WorkOrderFilter {
                equipment_id: Some(id.to_string()),
                created_since: Some(since),
                ..Default::default()
            })
            .await?;
        let corrective: Vec<_> = work_orders
            .iter()
            .filter(|wo| wo.status != WorkOrderStatus::Cancelled)
            .collect();

        let mut parts_count = 0;
        let mut parts_cost = Money::zero();
        for wo in &corrective {
            for consumption in &wo.consumptions {
                parts_count += consumption.quantity;
                if let Some(part) = tx.get_part(&consumption.part_id).await? {
                    parts_cost += part.unit_cost().extended(consumption.quantity);
                }
            }
        }

        let inputs = HealthInputs {
            status: equipment.status,
            window_days: self.health_window_days,
            expected_pm,
            completed_pm: completions.len() as i64,
            cm_count: corrective.len() as i64,
            parts_count,
            parts_cost,
            labor_minutes,
        };
        Ok(score(&equipment.id, &inputs))
    }

    /// Maintenance timeline, newest first. `since` bounds the oldest event.
    pub async fn history<T: StoreTx>(
        &self,
        tx: &mut T,
        id: &str,
        since: Option<DateTime<Utc>>,
    ) -> CoreResult<Vec<HistoryEvent>> {
        load_equipment(tx, id).await?;
        let from = since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let completions = tx.completions_for_equipment(id, from).await?;
        let work_orders = tx
            .list_work_orders(&WorkOrderFilter::for_equipment(id))
            .await?;
        let status_changes = tx.audit_for_target(id).await?;

        Ok(timeline(&completions, &work_orders, &status_changes)
            .into_iter()
            .filter(|e| e.at >= from)
            .collect())
    }

    /// PM count, CM count, PM labor and parts cost per calendar month, for
    /// the `months` months ending with the current one.
    pub async fn trends<T: StoreTx>(
        &self,
        tx: &mut T,
        id: &str,
        months: u32,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<MonthlyTrend>> {
        if months == 0 || months > MAX_TREND_MONTHS {
            return Err(ValidationError::OutOfRange {
                field: "months".to_string(),
                min: 1,
                max: i64::from(MAX_TREND_MONTHS),
            }
            .into());
        }
        load_equipment(tx, id).await?;

        let since = trend_months(now, months)
            .first()
            .and_then(|start| start.and_hms_opt(0, 0, 0))
            .map_or(DateTime::<Utc>::MIN_UTC, |start| start.and_utc());
        let completions = tx.completions_for_equipment(id, since).await?;
        let work_orders = tx
            .list_work_orders(&WorkOrderFilter::for_equipment(id))
            .await?;

        let mut costs: HashMap<String, Money> = HashMap::new();
        for consumption in work_orders.iter().flat_map(|wo| &wo.consumptions) {
            if costs.contains_key(&consumption.part_id) {
                continue;
            }
            if let Some(part) = tx.get_part(&consumption.part_id).await? {
                costs.insert(part.id.clone(), part.unit_cost());
            }
        }

        Ok(monthly_trends(now, months, &completions, &work_orders, |part_id| {
            costs.get(part_id).copied().unwrap_or_default()
        }))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
