//! End-to-end operator scenarios through the orchestrator.

mod common;

use chrono::Duration;
use cmms_core::health::HistoryKind;
use cmms_core::{
    Action, AuditOutcome, CoreError, EquipmentStatus, ScheduleStatus, WorkOrderStatus,
};
use cmms_service::scheduler::{CompletionReport, NewTask, ScheduleStart};
use cmms_service::ConsumeOutcome;

use common::{at, Plant};

#[tokio::test]
async fn test_pm_completion_advances_next_due() {
    let plant = Plant::new(at(2025, 1, 20)).await;
    let defined = plant
        .cmms
        .define_task(
            &plant.manager,
            NewTask {
                equipment_id: plant.equipment.clone(),
                description: "Inspect seal and coupling".into(),
                cadence_days: 30,
                start: ScheduleStart::LastCompleted(at(2025, 1, 1)),
            },
        )
        .await
        .unwrap();
    assert_eq!(defined.schedule.next_due, at(2025, 1, 31));

    let schedule = plant
        .cmms
        .record_completion(
            &plant.tech,
            &defined.schedule.id,
            CompletionReport {
                completed_at: at(2025, 1, 15),
                notes: Some("coupling realigned".into()),
                labor_minutes: Some(45),
            },
        )
        .await
        .unwrap();
    assert_eq!(schedule.next_due, at(2025, 2, 14));
    assert_eq!(schedule.status, ScheduleStatus::Upcoming);

    let entries = plant.cmms.audit_for(&defined.schedule.id).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .all(|e| e.outcome == AuditOutcome::Succeeded));

    // Three weeks later the same schedule is due, then overdue.
    plant.clock.set(at(2025, 2, 10));
    assert_eq!(
        plant
            .cmms
            .get_schedule(&defined.schedule.id)
            .await
            .unwrap()
            .status,
        ScheduleStatus::Due
    );
    plant.clock.advance(Duration::days(10));
    assert_eq!(
        plant
            .cmms
            .get_schedule(&defined.schedule.id)
            .await
            .unwrap()
            .status,
        ScheduleStatus::Overdue
    );
}

#[tokio::test]
async fn test_consume_beyond_stock_blocks_order() {
    let plant = Plant::new(at(2025, 3, 3)).await;
    plant.stock(3).await;
    let wo = plant.started_order("Seal leaking").await;

    let outcome = plant
        .cmms
        .consume_part(&plant.tech, &wo, &plant.part, 5)
        .await
        .unwrap();
    assert!(matches!(outcome, ConsumeOutcome::PendingParts { .. }));
    assert!(matches!(
        outcome.into_result(),
        Err(CoreError::InsufficientStock {
            on_hand: 3,
            requested: 5,
            ..
        })
    ));

    let order = plant.cmms.get_work_order(&wo).await.unwrap();
    assert_eq!(order.status, WorkOrderStatus::PendingParts);
    assert_eq!(order.open_shortages().count(), 1);
    assert_eq!(plant.cmms.on_hand(&plant.part).await.unwrap(), 3);

    let consume_entries: Vec<_> = plant
        .cmms
        .audit_for(&wo)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == Action::ConsumePart)
        .collect();
    assert_eq!(consume_entries.len(), 1);
    assert!(consume_entries[0]
        .detail
        .as_deref()
        .unwrap_or_default()
        .contains("Insufficient stock"));
}

#[tokio::test]
async fn test_manager_cancels_duplicate_order() {
    let plant = Plant::new(at(2025, 3, 3)).await;
    plant.stock(5).await;
    let wo = plant.open_order("Pump noisy").await;

    let cancelled = plant
        .cmms
        .cancel_work_order(&plant.manager, &wo, "duplicate")
        .await
        .unwrap();
    assert_eq!(cancelled.status, WorkOrderStatus::Cancelled);

    let entries = plant.cmms.audit_for(&wo).await.unwrap();
    assert!(entries.iter().any(|e| e.action == Action::CancelWorkOrder
        && e.outcome == AuditOutcome::Succeeded
        && e.actor_id == plant.manager));

    let consume = plant
        .cmms
        .consume_part(&plant.tech, &wo, &plant.part, 1)
        .await;
    assert!(matches!(consume, Err(CoreError::InvalidTransition { .. })));
    assert_eq!(plant.cmms.on_hand(&plant.part).await.unwrap(), 5);

    let failed = plant
        .cmms
        .audit_for(&wo)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.outcome == AuditOutcome::FailedAttempt)
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_technician_cannot_close() {
    let plant = Plant::new(at(2025, 3, 3)).await;
    let wo = plant.started_order("Replace gauge").await;
    plant
        .cmms
        .complete_work_order(&plant.tech, &wo, "gauge replaced and calibrated")
        .await
        .unwrap();

    let result = plant.cmms.close_work_order(&plant.tech, &wo).await;
    assert!(matches!(result, Err(CoreError::Denied { .. })));

    let order = plant.cmms.get_work_order(&wo).await.unwrap();
    assert_eq!(order.status, WorkOrderStatus::Completed);

    let denied: Vec<_> = plant
        .cmms
        .audit_for(&wo)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.outcome == AuditOutcome::DeniedAttempt)
        .collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].action, Action::CloseWorkOrder);
    assert_eq!(denied[0].actor_id, plant.tech);

    let closed = plant
        .cmms
        .close_work_order(&plant.manager, &wo)
        .await
        .unwrap();
    assert_eq!(closed.status, WorkOrderStatus::Closed);
}

#[tokio::test]
async fn test_full_repair_with_restock() {
    let plant = Plant::new(at(2025, 4, 1)).await;
    plant.stock(1).await;
    let wo = plant.started_order("Seal failed").await;

    plant
        .cmms
        .consume_part(&plant.tech, &wo, &plant.part, 2)
        .await
        .unwrap();
    assert!(plant.cmms.below_reorder_threshold(&plant.part).await.unwrap());

    // Resume is refused until stock covers the shortage.
    assert!(matches!(
        plant.cmms.resume_work_order(&plant.tech, &wo).await,
        Err(CoreError::InsufficientStock { .. })
    ));

    plant
        .cmms
        .replenish(&plant.clerk, &plant.part, 4, Some("PO 7781".into()))
        .await
        .unwrap();
    let outcome = plant
        .cmms
        .consume_part(&plant.clerk, &wo, &plant.part, 2)
        .await
        .unwrap();
    assert_eq!(outcome.work_order().status, WorkOrderStatus::InProgress);

    let done = plant
        .cmms
        .complete_work_order(&plant.tech, &wo, "seal kit fitted, no leaks on test run")
        .await
        .unwrap();
    assert_eq!(done.status, WorkOrderStatus::Completed);
    assert_eq!(plant.cmms.on_hand(&plant.part).await.unwrap(), 3);
    assert_eq!(plant.cmms.parts_cost(&wo).await.unwrap().cents(), 2 * 18_500);

    let history = plant
        .cmms
        .equipment_history(&plant.equipment, None)
        .await
        .unwrap();
    assert!(history.iter().any(|e| e.kind == HistoryKind::PartConsumed));
    assert!(history
        .iter()
        .any(|e| e.kind == HistoryKind::WorkOrderCompleted));
}

#[tokio::test]
async fn test_parts_coordinator_cannot_run_lifecycle() {
    let plant = Plant::new(at(2025, 4, 1)).await;
    let wo = plant.open_order("Check vibration").await;

    let result = plant
        .cmms
        .assign_work_order(&plant.clerk, &wo, &plant.tech)
        .await;
    assert!(matches!(result, Err(CoreError::Denied { .. })));
    assert_eq!(
        plant.cmms.get_work_order(&wo).await.unwrap().status,
        WorkOrderStatus::Open
    );
}

#[tokio::test]
async fn test_retire_equipment_stops_new_work() {
    let plant = Plant::new(at(2025, 5, 1)).await;
    plant
        .cmms
        .define_task(
            &plant.manager,
            NewTask {
                equipment_id: plant.equipment.clone(),
                description: "Lubricate motor bearings".into(),
                cadence_days: 90,
                start: ScheduleStart::FirstDue(at(2025, 5, 5)),
            },
        )
        .await
        .unwrap();

    let denied = plant
        .cmms
        .change_equipment_status(&plant.tech, &plant.equipment, EquipmentStatus::Retired, "old")
        .await;
    assert!(matches!(denied, Err(CoreError::Denied { .. })));

    plant
        .cmms
        .change_equipment_status(
            &plant.manager,
            &plant.equipment,
            EquipmentStatus::Retired,
            "replaced by new pump",
        )
        .await
        .unwrap();

    let schedules = plant.cmms.schedules_for(&plant.equipment).await.unwrap();
    assert!(schedules.iter().all(|s| !s.active));
    let due = plant
        .cmms
        .list_due(at(2025, 5, 1), Duration::days(30))
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert!(due.is_empty());

    let create = plant
        .cmms
        .create_work_order(
            &plant.tech,
            cmms_service::work_orders::NewWorkOrder {
                equipment_id: plant.equipment.clone(),
                title: "Leak".into(),
                description: None,
                priority: cmms_core::Priority::Low,
            },
        )
        .await;
    assert!(matches!(create, Err(CoreError::InvalidTransition { .. })));

    let history = plant
        .cmms
        .equipment_history(&plant.equipment, None)
        .await
        .unwrap();
    assert!(history.iter().any(|e| e.kind == HistoryKind::StatusChanged));

    let health = plant.cmms.equipment_health(&plant.equipment).await.unwrap();
    assert_eq!(health.status, EquipmentStatus::Retired);
    assert!(health.score <= 70);
}

#[tokio::test]
async fn test_inactive_user_is_denied() {
    let plant = Plant::new(at(2025, 5, 1)).await;
    plant
        .cmms
        .update_user(
            &plant.manager,
            &plant.tech,
            cmms_service::users::UserChanges {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let result = plant
        .cmms
        .create_work_order(
            &plant.tech,
            cmms_service::work_orders::NewWorkOrder {
                equipment_id: plant.equipment.clone(),
                title: "Leak".into(),
                description: None,
                priority: cmms_core::Priority::Low,
            },
        )
        .await;
    assert!(matches!(result, Err(CoreError::Denied { .. })));
}

#[tokio::test]
async fn test_partial_draw_keeps_shortage_open() {
    let plant = Plant::new(at(2025, 6, 2)).await;
    plant.stock(3).await;
    let wo = plant.started_order("Seal weeping").await;

    let short = plant
        .cmms
        .consume_part(&plant.tech, &wo, &plant.part, 5)
        .await
        .unwrap();
    assert_eq!(short.work_order().status, WorkOrderStatus::PendingParts);

    // One unit is not the five that were asked for.
    let outcome = plant
        .cmms
        .consume_part(&plant.tech, &wo, &plant.part, 1)
        .await
        .unwrap();
    assert!(matches!(outcome, ConsumeOutcome::Consumed { .. }));
    let order = outcome.work_order();
    assert_eq!(order.status, WorkOrderStatus::PendingParts);
    assert!(order.has_open_shortages());
    assert_eq!(order.shortages[0].fulfilled, 1);
    assert_eq!(order.shortages[0].outstanding(), 4);

    let complete = plant
        .cmms
        .complete_work_order(&plant.tech, &wo, "seal replaced")
        .await;
    assert!(matches!(complete, Err(CoreError::InvalidTransition { .. })));

    // Resume needs stock for what is still outstanding, not the full request.
    plant
        .cmms
        .replenish(&plant.clerk, &plant.part, 2, None)
        .await
        .unwrap();
    assert_eq!(plant.cmms.on_hand(&plant.part).await.unwrap(), 4);
    let resumed = plant.cmms.resume_work_order(&plant.tech, &wo).await.unwrap();
    assert_eq!(resumed.status, WorkOrderStatus::InProgress);
    assert!(resumed.has_open_shortages());

    let outcome = plant
        .cmms
        .consume_part(&plant.tech, &wo, &plant.part, 4)
        .await
        .unwrap();
    let order = outcome.work_order();
    assert!(!order.has_open_shortages());
    assert_eq!(
        order.shortages[0].resolution,
        Some(cmms_core::ShortageResolution::Fulfilled)
    );
    assert_eq!(order.consumed_quantity(&plant.part), 5);

    let done = plant
        .cmms
        .complete_work_order(&plant.tech, &wo, "seal replaced")
        .await
        .unwrap();
    assert_eq!(done.status, WorkOrderStatus::Completed);
}

#[tokio::test]
async fn test_consume_after_completion_leaves_ledger_alone() {
    let plant = Plant::new(at(2025, 6, 2)).await;
    plant.stock(6).await;
    let wo = plant.started_order("Replace seal").await;
    plant
        .cmms
        .consume_part(&plant.tech, &wo, &plant.part, 1)
        .await
        .unwrap();
    plant
        .cmms
        .complete_work_order(&plant.tech, &wo, "seal replaced")
        .await
        .unwrap();
    let ledger_before = plant.cmms.transactions_for(&plant.part).await.unwrap();

    let completed = plant
        .cmms
        .consume_part(&plant.tech, &wo, &plant.part, 1)
        .await;
    assert!(matches!(completed, Err(CoreError::InvalidTransition { .. })));
    assert_eq!(
        plant.cmms.transactions_for(&plant.part).await.unwrap(),
        ledger_before
    );

    plant
        .cmms
        .close_work_order(&plant.manager, &wo)
        .await
        .unwrap();
    let closed = plant
        .cmms
        .consume_part(&plant.manager, &wo, &plant.part, 1)
        .await;
    assert!(matches!(closed, Err(CoreError::InvalidTransition { .. })));
    assert_eq!(
        plant.cmms.transactions_for(&plant.part).await.unwrap(),
        ledger_before
    );
    assert_eq!(plant.cmms.on_hand(&plant.part).await.unwrap(), 5);
    assert_eq!(
        plant.cmms.get_work_order(&wo).await.unwrap().consumptions.len(),
        1
    );
}

#[tokio::test]
async fn test_trends_and_parts_usage_reports() {
    let plant = Plant::new(at(2025, 6, 20)).await;
    plant.stock(4).await;
    let defined = plant
        .cmms
        .define_task(
            &plant.manager,
            NewTask {
                equipment_id: plant.equipment.clone(),
                description: "Grease pump bearings".into(),
                cadence_days: 30,
                start: ScheduleStart::LastCompleted(at(2025, 4, 10)),
            },
        )
        .await
        .unwrap();
    plant
        .cmms
        .record_completion(
            &plant.tech,
            &defined.schedule.id,
            CompletionReport {
                completed_at: at(2025, 5, 10),
                notes: None,
                labor_minutes: Some(30),
            },
        )
        .await
        .unwrap();

    let wo = plant.started_order("Bearing noise").await;
    plant
        .cmms
        .consume_part(&plant.tech, &wo, &plant.part, 2)
        .await
        .unwrap();

    let trends = plant
        .cmms
        .maintenance_trends(&plant.equipment, 3)
        .await
        .unwrap();
    let months: Vec<&str> = trends.iter().map(|t| t.month.as_str()).collect();
    assert_eq!(months, vec!["2025-04", "2025-05", "2025-06"]);
    assert_eq!(trends[1].pm_count, 1);
    assert_eq!(trends[1].labor_minutes, 30);
    assert_eq!(trends[2].cm_count, 1);
    assert_eq!(trends[2].parts_cost.cents(), 2 * 18_500);

    let usage = plant.cmms.parts_usage(None).await.unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].part_id, plant.part);
    assert_eq!(usage[0].total_quantity, 2);
    assert_eq!(usage[0].work_order_count, 1);
    assert_eq!(usage[0].total_cost.cents(), 2 * 18_500);

    // Nothing was drawn after the repair.
    plant.clock.advance(Duration::days(1));
    let later = plant
        .cmms
        .parts_usage(Some(at(2025, 6, 21)))
        .await
        .unwrap();
    assert!(later.is_empty());
}
