//! # Demo Plant Generator
//!
//! Populates a database with a small plant for development: staff,
//! equipment with PM tasks, a stocked parts room and a few work orders.
//!
//! ## Usage
//! ```bash
//! # Seed the configured database (or the platform default)
//! cargo run -p cmms-db --bin seed
//!
//! # Specify database path
//! cargo run -p cmms-db --bin seed -- --db ./data/plant.db
//! ```
//!
//! Everything goes through the orchestrator, so the audit trail and stock
//! ledger of a seeded plant look like those of a real one.

use std::env;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use cmms_core::store::UserFilter;
use cmms_core::{Priority, Role};
use cmms_db::{Database, DbConfig};
use cmms_service::ledger::NewPart;
use cmms_service::logging::init_tracing;
use cmms_service::registry::NewEquipment;
use cmms_service::scheduler::{NewTask, ScheduleStart};
use cmms_service::users::NewUser;
use cmms_service::work_orders::NewWorkOrder;
use cmms_service::{CmmsConfig, Orchestrator, ServiceSettings};

/// (name, location, PM tasks as (description, cadence days))
const EQUIPMENT: &[(&str, &str, &[(&str, i64)])] = &[
    (
        "Air Compressor AC-1",
        "Building A",
        &[("Drain condensate and check belts", 7), ("Replace intake filter", 90)],
    ),
    (
        "Conveyor Line 2",
        "Building B",
        &[("Lubricate drive chain", 14), ("Inspect rollers", 30)],
    ),
    (
        "Hydraulic Press HP-400",
        "Building B",
        &[("Check hydraulic fluid level", 7), ("Change hydraulic oil", 180)],
    ),
    (
        "Boiler B-1",
        "Utility Room",
        &[("Test safety valves", 30), ("Annual combustion inspection", 365)],
    ),
    ("Forklift FL-3", "Warehouse", &[("Pre-shift battery check", 1)]),
];

/// (sku, name, location, reorder threshold, unit cost cents, opening stock)
const PARTS: &[(&str, &str, &str, i64, i64, i64)] = &[
    ("BRG-6204", "Deep groove bearing 6204", "Bin A1", 4, 1850, 12),
    ("BLT-A42", "V-belt A42", "Bin A2", 2, 2400, 3),
    ("FLT-AIR-10", "Compressor intake filter", "Bin B1", 1, 6500, 2),
    ("OIL-HYD-46", "Hydraulic oil ISO 46 (20 L)", "Cage 1", 1, 11900, 4),
    ("CHN-60", "Roller chain #60 (10 ft)", "Bin C3", 1, 8700, 0),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Plantwise CMMS Demo Plant Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: from config)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let config = CmmsConfig::load_or_default(None);
    init_tracing(&config.logging.filter);

    let db_config = match db_path {
        Some(path) => DbConfig::new(path),
        None => DbConfig::from_settings(&config).ok_or("no database path configured")?,
    };

    println!("Plantwise CMMS Demo Plant Generator");
    println!("===================================");
    println!("Database: {}", db_config.database_path.display());
    println!();

    let db = Database::new(db_config).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let cmms = Orchestrator::new(db.store(), ServiceSettings::from(&config));

    let existing = cmms.list_users(&UserFilter::default()).await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} users", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    // Staff
    let manager = cmms.bootstrap_manager("mgarcia", "Maria Garcia").await?;
    let tech = cmms
        .create_user(
            &manager.id,
            NewUser {
                username: "dokafor".into(),
                full_name: "David Okafor".into(),
                role: Role::Technician,
            },
        )
        .await?;
    let clerk = cmms
        .create_user(
            &manager.id,
            NewUser {
                username: "lchen".into(),
                full_name: "Li Chen".into(),
                role: Role::PartsCoordinator,
            },
        )
        .await?;
    println!("✓ Created 3 users");

    // Equipment and PM
    let now = Utc::now();
    let mut equipment_ids = Vec::new();
    let mut tasks = 0;
    for (index, (name, location, pm)) in EQUIPMENT.iter().enumerate() {
        let equipment = cmms
            .register_equipment(
                &manager.id,
                NewEquipment {
                    name: name.to_string(),
                    location: location.to_string(),
                    description: None,
                },
            )
            .await?;

        for (offset, (description, cadence_days)) in pm.iter().enumerate() {
            // Stagger last completions so the due list has every status.
            let shift = ((index + offset) as i64 * 3).min(*cadence_days);
            let back = Duration::days(*cadence_days + 2 - shift);
            cmms.define_task(
                &manager.id,
                NewTask {
                    equipment_id: equipment.id.clone(),
                    description: description.to_string(),
                    cadence_days: *cadence_days,
                    start: ScheduleStart::LastCompleted(now - back),
                },
            )
            .await?;
            tasks += 1;
        }
        equipment_ids.push(equipment.id);
    }
    println!("✓ Registered {} machines with {} PM tasks", equipment_ids.len(), tasks);

    // Parts room
    let mut part_ids = Vec::new();
    for (sku, name, location, threshold, cost, stock) in PARTS {
        let part = cmms
            .create_part(
                &clerk.id,
                NewPart {
                    sku: sku.to_string(),
                    name: name.to_string(),
                    location: Some(location.to_string()),
                    reorder_threshold: *threshold,
                    unit_cost_cents: *cost,
                },
            )
            .await?;
        if *stock > 0 {
            cmms.replenish(&clerk.id, &part.id, *stock, Some("Opening count".into()))
                .await?;
        }
        part_ids.push(part.id);
    }
    println!("✓ Stocked {} parts", part_ids.len());

    // Corrective work
    let belt_job = cmms
        .create_work_order(
            &tech.id,
            NewWorkOrder {
                equipment_id: equipment_ids[0].clone(),
                title: "Belt squeal on startup".into(),
                description: Some("Noticeable at cold start, goes away after a minute".into()),
                priority: Priority::Medium,
            },
        )
        .await?;
    cmms.assign_work_order(&manager.id, &belt_job.id, &tech.id)
        .await?;
    cmms.consume_part(&tech.id, &belt_job.id, &part_ids[1], 1)
        .await?;

    let chain_job = cmms
        .create_work_order(
            &tech.id,
            NewWorkOrder {
                equipment_id: equipment_ids[1].clone(),
                title: "Drive chain stretched".into(),
                description: None,
                priority: Priority::High,
            },
        )
        .await?;
    cmms.assign_work_order(&manager.id, &chain_job.id, &tech.id)
        .await?;
    // The chain bin is empty, so this order waits on parts.
    let outcome = cmms
        .consume_part(&tech.id, &chain_job.id, &part_ids[4], 1)
        .await?;
    println!(
        "✓ Opened 2 work orders ({} is {:?})",
        chain_job.title,
        outcome.work_order().status
    );

    let low = cmms.low_stock().await?;
    println!("  Parts below reorder threshold: {}", low.len());

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}
