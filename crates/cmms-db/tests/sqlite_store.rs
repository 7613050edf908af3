//! The orchestrator running on SQLite: the same rules as the in-memory
//! store, plus what only a real database can show (constraints, persisted
//! JSON columns, reopening a file).

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use cmms_core::store::{EquipmentFilter, Store, StoreTx};
use cmms_core::{
    Action, AuditOutcome, CoreError, Equipment, EquipmentStatus, Priority, Role, ScheduleStatus,
    StockReason, ValidationError, WorkOrderStatus,
};
use cmms_db::{Database, DbConfig, SqliteStore};
use cmms_service::ledger::NewPart;
use cmms_service::registry::NewEquipment;
use cmms_service::scheduler::{CompletionReport, NewTask, ScheduleStart};
use cmms_service::users::NewUser;
use cmms_service::work_orders::{ConsumeOutcome, NewWorkOrder};
use cmms_service::{FixedClock, Orchestrator, ServiceSettings};

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

struct Plant {
    cmms: Orchestrator<SqliteStore>,
    clock: Arc<FixedClock>,
    manager: String,
    tech: String,
    clerk: String,
    equipment: String,
}

async fn plant_on(db: &Database, settings: ServiceSettings, now: DateTime<Utc>) -> Plant {
    let clock = Arc::new(FixedClock::new(now));
    let cmms = Orchestrator::new(db.store(), settings).with_clock(clock.clone());

    let manager = cmms.bootstrap_manager("maria", "Maria Manager").await.unwrap().id;
    let tech = cmms
        .create_user(
            &manager,
            NewUser {
                username: "tom".into(),
                full_name: "Tom Technician".into(),
                role: Role::Technician,
            },
        )
        .await
        .unwrap()
        .id;
    let clerk = cmms
        .create_user(
            &manager,
            NewUser {
                username: "petra".into(),
                full_name: "Petra Parts".into(),
                role: Role::PartsCoordinator,
            },
        )
        .await
        .unwrap()
        .id;
    let equipment = cmms
        .register_equipment(
            &manager,
            NewEquipment {
                name: "Cooling tower fan".into(),
                location: "Roof".into(),
                description: None,
            },
        )
        .await
        .unwrap()
        .id;

    Plant {
        cmms,
        clock,
        manager,
        tech,
        clerk,
        equipment,
    }
}

async fn plant(now: DateTime<Utc>) -> Plant {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    plant_on(&db, ServiceSettings::default(), now).await
}

impl Plant {
    async fn part(&self, sku: &str, stock: i64) -> String {
        let part = self
            .cmms
            .create_part(
                &self.clerk,
                NewPart {
                    sku: sku.into(),
                    name: format!("Part {sku}"),
                    location: None,
                    reorder_threshold: 1,
                    unit_cost_cents: 2_500,
                },
            )
            .await
            .unwrap();
        if stock > 0 {
            self.cmms
                .replenish(&self.clerk, &part.id, stock, None)
                .await
                .unwrap();
        }
        part.id
    }

    async fn started_order(&self, title: &str) -> String {
        let id = self
            .cmms
            .create_work_order(
                &self.tech,
                NewWorkOrder {
                    equipment_id: self.equipment.clone(),
                    title: title.into(),
                    description: None,
                    priority: Priority::Medium,
                },
            )
            .await
            .unwrap()
            .id;
        self.cmms
            .assign_work_order(&self.manager, &id, &self.tech)
            .await
            .unwrap();
        id
    }
}

// =============================================================================
// Orchestrated flows
// =============================================================================

#[tokio::test]
async fn test_pm_cadence_persists() {
    let p = plant(at(2026, 1, 20)).await;
    let defined = p
        .cmms
        .define_task(
            &p.manager,
            NewTask {
                equipment_id: p.equipment.clone(),
                description: "Check gearbox oil".into(),
                cadence_days: 30,
                start: ScheduleStart::LastCompleted(at(2026, 1, 1)),
            },
        )
        .await
        .unwrap();
    assert_eq!(defined.schedule.next_due, at(2026, 1, 31));

    p.cmms
        .record_completion(
            &p.tech,
            &defined.schedule.id,
            CompletionReport {
                completed_at: at(2026, 1, 15),
                notes: Some("Topped up 200 ml".into()),
                labor_minutes: Some(25),
            },
        )
        .await
        .unwrap();

    let schedule = p.cmms.get_schedule(&defined.schedule.id).await.unwrap();
    assert_eq!(schedule.last_completed, Some(at(2026, 1, 15)));
    assert_eq!(schedule.next_due, at(2026, 2, 14));
    assert_eq!(schedule.status, ScheduleStatus::Upcoming);
    assert_eq!(schedule.version, defined.schedule.version + 1);

    let history = p.cmms.completion_history(&defined.schedule.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].notes.as_deref(), Some("Topped up 200 ml"));
    assert_eq!(history[0].labor_minutes, Some(25));
}

#[tokio::test]
async fn test_short_consume_keeps_shortage_on_the_order() {
    let p = plant(at(2026, 3, 1)).await;
    let part = p.part("FAN-BELT", 3).await;
    let order = p.started_order("Fan belt slipping").await;

    let outcome = p.cmms.consume_part(&p.tech, &order, &part, 5).await.unwrap();
    assert!(matches!(outcome, ConsumeOutcome::PendingParts { .. }));
    match outcome.into_result() {
        Err(CoreError::InsufficientStock {
            on_hand, requested, ..
        }) => {
            assert_eq!(on_hand, 3);
            assert_eq!(requested, 5);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // Read back through the JSON columns.
    let stored = p.cmms.get_work_order(&order).await.unwrap();
    assert_eq!(stored.status, WorkOrderStatus::PendingParts);
    assert_eq!(stored.shortages.len(), 1);
    assert_eq!(stored.shortages[0].part_id, part);
    assert_eq!(stored.shortages[0].requested, 5);
    assert!(stored.consumptions.is_empty());
    assert_eq!(p.cmms.on_hand(&part).await.unwrap(), 3);

    // Restock; the next draw fulfils the shortage and the order resumes.
    p.cmms.replenish(&p.clerk, &part, 4, None).await.unwrap();
    let outcome = p.cmms.consume_part(&p.tech, &order, &part, 5).await.unwrap();
    assert_eq!(outcome.work_order().status, WorkOrderStatus::InProgress);

    let stored = p.cmms.get_work_order(&order).await.unwrap();
    assert_eq!(stored.consumptions.len(), 1);
    assert_eq!(stored.consumptions[0].quantity, 5);
    assert_eq!(p.cmms.on_hand(&part).await.unwrap(), 2);

    let ledger = p.cmms.transactions_for(&part).await.unwrap();
    assert_eq!(ledger.len(), 3);
    let draws: Vec<_> = ledger
        .iter()
        .filter(|t| t.reason == StockReason::Consumption)
        .collect();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].delta, -5);
    assert_eq!(draws[0].work_order_id.as_deref(), Some(order.as_str()));
}

#[tokio::test]
async fn test_denied_close_is_audited() {
    let p = plant(at(2026, 3, 1)).await;
    let order = p.started_order("Vibration alarm").await;
    p.cmms
        .complete_work_order(&p.tech, &order, "Rebalanced blades")
        .await
        .unwrap();

    let err = p.cmms.close_work_order(&p.tech, &order).await.unwrap_err();
    assert!(matches!(err, CoreError::Denied { .. }));
    assert_eq!(
        p.cmms.get_work_order(&order).await.unwrap().status,
        WorkOrderStatus::Completed
    );

    let trail = p.cmms.audit_for(&order).await.unwrap();
    let denied: Vec<_> = trail
        .iter()
        .filter(|e| e.outcome == AuditOutcome::DeniedAttempt)
        .collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].action, Action::CloseWorkOrder);
    assert_eq!(denied[0].actor_id, p.tech);

    // Snapshots survive the JSON round trip.
    let completed = trail
        .iter()
        .find(|e| e.action == Action::CompleteWorkOrder)
        .unwrap();
    let after = completed.after.as_ref().unwrap();
    assert_eq!(after["status"], "completed");
}

#[tokio::test]
async fn test_duplicate_sku_is_a_validation_error() {
    let p = plant(at(2026, 3, 1)).await;
    p.part("BRG-6204", 0).await;

    let err = p
        .cmms
        .create_part(
            &p.clerk,
            NewPart {
                sku: "BRG-6204".into(),
                name: "Another bearing".into(),
                location: None,
                reorder_threshold: 0,
                unit_cost_cents: 100,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::Duplicate { .. })
    ));
    assert_eq!(p.cmms.list_parts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retire_then_history_and_feeds() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let settings = ServiceSettings {
        page_size: 2,
        ..ServiceSettings::default()
    };
    let p = plant_on(&db, settings, at(2026, 4, 1)).await;
    let part = p.part("FLT-10", 1).await;
    for _ in 0..4 {
        p.clock.advance(Duration::minutes(5));
        p.cmms.replenish(&p.clerk, &part, 2, None).await.unwrap();
    }

    let rows = p.cmms.ledger_feed(Some(part.clone())).collect_all().await.unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows
        .windows(2)
        .all(|w| (w[0].recorded_at, &w[0].id) < (w[1].recorded_at, &w[1].id)));
    assert_eq!(rows.iter().map(|r| r.delta).sum::<i64>(), 9);

    p.clock.advance(Duration::hours(1));
    p.cmms
        .change_equipment_status(
            &p.manager,
            &p.equipment,
            EquipmentStatus::Retired,
            "Replaced by new unit",
        )
        .await
        .unwrap();
    let history = p.cmms.equipment_history(&p.equipment, None).await.unwrap();
    assert!(!history.is_empty());

    let audit = p.cmms.audit_feed().collect_all().await.unwrap();
    assert!(audit
        .windows(2)
        .all(|w| (w[0].recorded_at, &w[0].id) < (w[1].recorded_at, &w[1].id)));
    assert_eq!(
        audit.last().map(|e| e.action),
        Some(Action::ChangeEquipmentStatus)
    );
}

// =============================================================================
// Store-level behavior
// =============================================================================

fn pump(id: &str) -> Equipment {
    let now = at(2026, 1, 1);
    Equipment {
        id: id.into(),
        name: "Pump".into(),
        location: "Basement".into(),
        description: None,
        status: EquipmentStatus::Active,
        created_at: now,
        updated_at: now,
        version: 1,
    }
}

#[tokio::test]
async fn test_stale_version_is_a_conflict() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let store = db.store();

    let mut tx = store.begin().await.unwrap();
    tx.insert_equipment(&pump("eq-1")).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut changed = pump("eq-1");
    changed.name = "Pump (rebuilt)".into();
    changed.version = 2;
    tx.update_equipment(&changed, 1).await.unwrap();

    // Someone else read version 1 as well.
    let err = tx.update_equipment(&changed, 1).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));
    assert!(err.is_retryable());

    let err = tx.update_equipment(&pump("eq-missing"), 1).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let stored = tx.get_equipment("eq-1").await.unwrap().unwrap();
    assert_eq!(stored.name, "Pump (rebuilt)");
    assert_eq!(stored.version, 2);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_dropped_transaction_discards_writes() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let store = db.store();

    {
        let mut tx = store.begin().await.unwrap();
        tx.insert_equipment(&pump("eq-1")).await.unwrap();
    }

    let mut tx = store.begin().await.unwrap();
    assert!(tx.get_equipment("eq-1").await.unwrap().is_none());
    let listed = tx.list_equipment(&EquipmentFilter::default()).await.unwrap();
    assert!(listed.is_empty());
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plant.db");

    let manager = {
        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let p = plant_on(&db, ServiceSettings::default(), at(2026, 5, 1)).await;
        p.part("GSK-100", 6).await;
        db.close().await;
        p.manager
    };

    let db = Database::new(DbConfig::new(&path)).await.unwrap();
    let cmms = Orchestrator::new(db.store(), ServiceSettings::default());

    assert_eq!(cmms.get_user(&manager).await.unwrap().role, Role::Manager);
    let equipment = cmms.list_equipment(&EquipmentFilter::default()).await.unwrap();
    assert_eq!(equipment.len(), 1);
    let parts = cmms.list_parts().await.unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(cmms.on_hand(&parts[0].id).await.unwrap(), 6);

    // Existing users block a second bootstrap.
    assert!(cmms.bootstrap_manager("again", "Second Manager").await.is_err());
    db.close().await;
}

#[tokio::test]
async fn test_reads_and_feeds_run_beside_an_open_write() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(DbConfig::new(dir.path().join("plant.db")))
        .await
        .unwrap();
    let p = plant_on(&db, ServiceSettings::default(), at(2026, 5, 1)).await;
    let store = db.store();

    let mut writer = store.begin().await.unwrap();
    writer.insert_equipment(&pump("eq-pending")).await.unwrap();

    let limit = std::time::Duration::from_secs(2);
    let listed = tokio::time::timeout(limit, p.cmms.list_equipment(&EquipmentFilter::default()))
        .await
        .expect("read waited on the writer")
        .unwrap();
    // The snapshot predates the uncommitted insert.
    assert_eq!(listed.len(), 1);

    let mut trail = p.cmms.audit_feed();
    let first = tokio::time::timeout(limit, trail.next())
        .await
        .expect("feed page waited on the writer")
        .unwrap();
    assert!(first.is_some());

    writer.commit().await.unwrap();
    let listed = p.cmms.list_equipment(&EquipmentFilter::default()).await.unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn test_second_writer_waits_for_the_first() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let store = db.store();

    let mut first = store.begin().await.unwrap();
    first.insert_equipment(&pump("eq-1")).await.unwrap();

    let waiting = tokio::time::timeout(std::time::Duration::from_millis(100), store.begin()).await;
    assert!(waiting.is_err());

    first.commit().await.unwrap();
    let mut second = store.begin().await.unwrap();
    assert!(second.get_equipment("eq-1").await.unwrap().is_some());
    second.rollback().await.unwrap();
}
