//! Shared fixture: a small plant with one of each role.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use cmms_core::{Priority, Role};
use cmms_service::ledger::NewPart;
use cmms_service::registry::NewEquipment;
use cmms_service::users::NewUser;
use cmms_service::work_orders::NewWorkOrder;
use cmms_service::{FixedClock, MemoryStore, Orchestrator, ServiceSettings};

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub struct Plant {
    pub cmms: Arc<Orchestrator<MemoryStore>>,
    pub clock: Arc<FixedClock>,
    pub manager: String,
    pub tech: String,
    pub clerk: String,
    pub equipment: String,
    pub part: String,
}

impl Plant {
    pub async fn new(now: DateTime<Utc>) -> Plant {
        let clock = Arc::new(FixedClock::new(now));
        let cmms = Orchestrator::new(MemoryStore::new(), ServiceSettings::default())
            .with_clock(clock.clone());

        let manager = cmms
            .bootstrap_manager("maria", "Maria Manager")
            .await
            .unwrap()
            .id;
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
                    name: "Boiler feed pump".into(),
                    location: "Boiler house".into(),
                    description: Some("Grundfos CR 10".into()),
                },
            )
            .await
            .unwrap()
            .id;

        let part = cmms
            .create_part(
                &clerk,
                NewPart {
                    sku: "SEAL-CR10".into(),
                    name: "Mechanical seal kit".into(),
                    location: Some("Cage 4".into()),
                    reorder_threshold: 2,
                    unit_cost_cents: 18_500,
                },
            )
            .await
            .unwrap()
            .id;

        Plant {
            cmms: Arc::new(cmms),
            clock,
            manager,
            tech,
            clerk,
            equipment,
            part,
        }
    }

    pub async fn stock(&self, quantity: i64) {
        self.cmms
            .replenish(&self.clerk, &self.part, quantity, Some("opening stock".into()))
            .await
            .unwrap();
    }

    pub async fn open_order(&self, title: &str) -> String {
        self.cmms
            .create_work_order(
                &self.tech,
                NewWorkOrder {
                    equipment_id: self.equipment.clone(),
                    title: title.into(),
                    description: None,
                    priority: Priority::High,
                },
            )
            .await
            .unwrap()
            .id
    }

    /// An order assigned to the technician (InProgress).
    pub async fn started_order(&self, title: &str) -> String {
        let id = self.open_order(title).await;
        self.cmms
            .assign_work_order(&self.manager, &id, &self.tech)
            .await
            .unwrap();
        id
    }
}
