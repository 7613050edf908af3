//! # Equipment Health & History
//!
//! Scoring and timeline assembly over an equipment's maintenance record.
//! Both are derived on read and never stored.
//!
//! ## Health Score
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  score = 100                                                            │
//! │        - 0.3 × (100 - PM compliance %)                                  │
//! │        - min(20, (CM per month - 1) × 10)     when CM per month > 1     │
//! │        - 30                                   when status ≠ active      │
//! │  clamped to 0..=100, truncated to an integer                            │
//! │                                                                         │
//! │  PM compliance = min(100, completed × 100 / expected) over the window   │
//! │                  100 when no completions are expected                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::{
    Action, AuditEntry, AuditOutcome, EquipmentStatus, PmCompletion, WorkOrder, WorkOrderStatus,
};

// =============================================================================
// Health Score
// =============================================================================

/// Raw counts over the scoring window, gathered by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthInputs {
    pub status: EquipmentStatus,
    pub window_days: i64,
    pub expected_pm: i64,
    pub completed_pm: i64,
    pub cm_count: i64,
    pub parts_count: i64,
    pub parts_cost: Money,
    pub labor_minutes: i64,
}

/// Health metrics for one piece of equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct HealthReport {
    pub equipment_id: String,
    pub status: EquipmentStatus,
    /// 0 (failing) to 100 (healthy).
    pub score: u8,
    pub pm_compliance: u8,
    pub cm_count: i64,
    /// CM work orders per month, one decimal.
    pub cm_per_month: f64,
    pub parts_count: i64,
    pub parts_cost: Money,
    pub labor_minutes: i64,
    pub window_days: i64,
    pub recommendations: Vec<String>,
}

/// PM compliance percentage.
pub fn pm_compliance(expected: i64, completed: i64) -> u8 {
    if expected <= 0 {
        return 100;
    }
    let pct = (completed.max(0) * 100) / expected;
    pct.min(100) as u8
}

/// CM frequency per month over the window, rounded to one decimal.
pub fn cm_per_month(cm_count: i64, window_days: i64) -> f64 {
    if window_days <= 0 {
        return 0.0;
    }
    let months = window_days as f64 * 12.0 / 365.0;
    ((cm_count as f64 / months) * 10.0).round() / 10.0
}

/// Scores an equipment from its window counts.
pub fn score(equipment_id: &str, inputs: &HealthInputs) -> HealthReport {
    let compliance = pm_compliance(inputs.expected_pm, inputs.completed_pm);
    let frequency = cm_per_month(inputs.cm_count, inputs.window_days);

    // Tenths of a point, so the weights stay exact.
    let mut tenths: i64 = 1000 - i64::from(100 - compliance) * 3;
    if frequency > 1.0 {
        tenths -= (((frequency - 1.0) * 100.0).round() as i64).min(200);
    }
    if inputs.status != EquipmentStatus::Active {
        tenths -= 300;
    }
    let score = (tenths.clamp(0, 1000) / 10) as u8;

    let mut recommendations = Vec::new();
    if compliance < 80 {
        recommendations.push(format!(
            "Improve PM compliance - currently {}%, below 80%",
            compliance
        ));
    }
    if frequency > 2.0 {
        recommendations.push("High CM frequency - investigate root causes".to_string());
    }
    if inputs.parts_count > 20 {
        recommendations.push("High parts usage - review equipment reliability".to_string());
    }
    if inputs.status != EquipmentStatus::Active {
        recommendations.push(format!(
            "Equipment status is '{}' - review and update",
            inputs.status
        ));
    }

    HealthReport {
        equipment_id: equipment_id.to_string(),
        status: inputs.status,
        score,
        pm_compliance: compliance,
        cm_count: inputs.cm_count,
        cm_per_month: frequency,
        parts_count: inputs.parts_count,
        parts_cost: inputs.parts_cost,
        labor_minutes: inputs.labor_minutes,
        window_days: inputs.window_days,
        recommendations,
    }
}

// =============================================================================
// History Timeline
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    PmCompleted,
    WorkOrderRaised,
    WorkOrderCompleted,
    WorkOrderClosed,
    WorkOrderCancelled,
    PartConsumed,
    StatusChanged,
}

/// One line of an equipment's maintenance history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct HistoryEvent {
    #[ts(as = "String")]
    pub at: DateTime<Utc>,
    pub kind: HistoryKind,
    /// Completion, work order or audit entry id.
    pub reference_id: String,
    pub summary: String,
}

/// Merges completions, work-order milestones, consumptions and successful
/// status changes into one timeline, newest first.
pub fn timeline(
    completions: &[PmCompletion],
    work_orders: &[WorkOrder],
    status_changes: &[AuditEntry],
) -> Vec<HistoryEvent> {
    let mut events = Vec::new();

    for c in completions {
        events.push(HistoryEvent {
            at: c.completed_at,
            kind: HistoryKind::PmCompleted,
            reference_id: c.id.clone(),
            summary: match &c.notes {
                Some(notes) => format!("PM completed by {}: {}", c.actor_id, notes),
                None => format!("PM completed by {}", c.actor_id),
            },
        });
    }

    for wo in work_orders {
        events.push(HistoryEvent {
            at: wo.created_at,
            kind: HistoryKind::WorkOrderRaised,
            reference_id: wo.id.clone(),
            summary: format!("Work order raised ({:?}): {}", wo.priority, wo.title),
        });

        for consumption in &wo.consumptions {
            events.push(HistoryEvent {
                at: consumption.consumed_at,
                kind: HistoryKind::PartConsumed,
                reference_id: wo.id.clone(),
                summary: format!(
                    "{} x part {} consumed",
                    consumption.quantity, consumption.part_id
                ),
            });
        }

        if let Some(at) = wo.completed_at {
            events.push(HistoryEvent {
                at,
                kind: HistoryKind::WorkOrderCompleted,
                reference_id: wo.id.clone(),
                summary: format!(
                    "Work order completed: {}",
                    wo.completion_note.as_deref().unwrap_or_default()
                ),
            });
        }

        match wo.status {
            WorkOrderStatus::Closed => {
                if let Some(at) = wo.closed_at {
                    events.push(HistoryEvent {
                        at,
                        kind: HistoryKind::WorkOrderClosed,
                        reference_id: wo.id.clone(),
                        summary: format!("Work order closed: {}", wo.title),
                    });
                }
            }
            WorkOrderStatus::Cancelled => events.push(HistoryEvent {
                at: wo.updated_at,
                kind: HistoryKind::WorkOrderCancelled,
                reference_id: wo.id.clone(),
                summary: format!(
                    "Work order cancelled: {}",
                    wo.cancel_reason.as_deref().unwrap_or_default()
                ),
            }),
            _ => {}
        }
    }

    for entry in status_changes.iter().filter(|e| {
        e.action == Action::ChangeEquipmentStatus && e.outcome == AuditOutcome::Succeeded
    }) {
        events.push(HistoryEvent {
            at: entry.recorded_at,
            kind: HistoryKind::StatusChanged,
            reference_id: entry.id.clone(),
            summary: entry
                .detail
                .clone()
                .unwrap_or_else(|| "Status changed".to_string()),
        });
    }

    events.sort_by(|a, b| b.at.cmp(&a.at).then_with(|| a.reference_id.cmp(&b.reference_id)));
    events
}

// =============================================================================
// Monthly Trends
// =============================================================================

/// Maintenance activity on one equipment in one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MonthlyTrend {
    /// `YYYY-MM`
    pub month: String,
    pub pm_count: i64,
    /// Corrective work orders raised, cancelled ones excluded.
    pub cm_count: i64,
    /// PM labor recorded on completions.
    pub labor_minutes: i64,
    pub parts_cost: Money,
}

fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

fn month_of(trends: &mut [MonthlyTrend], at: DateTime<Utc>) -> Option<&mut MonthlyTrend> {
    let key = month_key(at.date_naive());
    trends.iter_mut().find(|t| t.month == key)
}

/// First days of the `months` calendar months ending with the one holding
/// `now`, oldest first.
pub fn trend_months(now: DateTime<Utc>, months: u32) -> Vec<NaiveDate> {
    let today = now.date_naive();
    let Some(current) = today.checked_sub_days(Days::new(u64::from(today.day0()))) else {
        return Vec::new();
    };
    (0..months)
        .rev()
        .filter_map(|back| current.checked_sub_months(Months::new(back)))
        .collect()
}

/// Buckets completions, work orders and their consumptions by month.
/// `unit_cost` prices a part id; events outside the months are dropped.
pub fn monthly_trends(
    now: DateTime<Utc>,
    months: u32,
    completions: &[PmCompletion],
    work_orders: &[WorkOrder],
    unit_cost: impl Fn(&str) -> Money,
) -> Vec<MonthlyTrend> {
    let mut trends: Vec<MonthlyTrend> = trend_months(now, months)
        .into_iter()
        .map(|start| MonthlyTrend {
            month: month_key(start),
            pm_count: 0,
            cm_count: 0,
            labor_minutes: 0,
            parts_cost: Money::zero(),
        })
        .collect();

    for c in completions {
        if let Some(t) = month_of(&mut trends, c.completed_at) {
            t.pm_count += 1;
            t.labor_minutes += c.labor_minutes.unwrap_or(0);
        }
    }

    for wo in work_orders {
        if wo.status != WorkOrderStatus::Cancelled {
            if let Some(t) = month_of(&mut trends, wo.created_at) {
                t.cm_count += 1;
            }
        }
        for consumption in &wo.consumptions {
            if let Some(t) = month_of(&mut trends, consumption.consumed_at) {
                t.parts_cost += unit_cost(&consumption.part_id).extended(consumption.quantity);
            }
        }
    }

    trends
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PartConsumption, Priority, TargetKind};
    use chrono::TimeZone;

    fn inputs() -> HealthInputs {
        HealthInputs {
            status: EquipmentStatus::Active,
            window_days: 365,
            expected_pm: 12,
            completed_pm: 12,
            cm_count: 0,
            parts_count: 0,
            parts_cost: Money::zero(),
            labor_minutes: 0,
        }
    }

    #[test]
    fn test_perfect_record_scores_100() {
        let report = score("eq-1", &inputs());
        assert_eq!(report.score, 100);
        assert_eq!(report.pm_compliance, 100);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_poor_compliance_deducts() {
        let report = score(
            "eq-1",
            &HealthInputs {
                completed_pm: 6,
                ..inputs()
            },
        );
        // 100 - 0.3 × 50 = 85
        assert_eq!(report.pm_compliance, 50);
        assert_eq!(report.score, 85);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn test_cm_frequency_deduction_is_capped() {
        let report = score(
            "eq-1",
            &HealthInputs {
                cm_count: 60, // 5 per month
                ..inputs()
            },
        );
        assert_eq!(report.cm_per_month, 5.0);
        assert_eq!(report.score, 80);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("High CM frequency")));
    }

    #[test]
    fn test_inactive_status_deducts_and_floors_at_zero() {
        let report = score(
            "eq-1",
            &HealthInputs {
                status: EquipmentStatus::OutOfService,
                completed_pm: 0,
                cm_count: 120,
                parts_count: 25,
                ..inputs()
            },
        );
        // 100 - 30 - 20 - 30 = 20
        assert_eq!(report.score, 20);
        assert_eq!(report.recommendations.len(), 4);
    }

    #[test]
    fn test_no_expected_pm_is_full_compliance() {
        assert_eq!(pm_compliance(0, 0), 100);
        assert_eq!(pm_compliance(4, 9), 100);
        assert_eq!(pm_compliance(3, 1), 33);
    }

    #[test]
    fn test_timeline_is_newest_first() {
        let at = |d: u32| Utc.with_ymd_and_hms(2025, 4, d, 9, 0, 0).unwrap();

        let completion = PmCompletion {
            id: "c-1".into(),
            schedule_id: "s-1".into(),
            equipment_id: "eq-1".into(),
            completed_at: at(1),
            actor_id: "u-2".into(),
            notes: None,
            labor_minutes: Some(30),
            advanced: true,
            recorded_at: at(1),
        };

        let wo = WorkOrder {
            id: "wo-1".into(),
            equipment_id: "eq-1".into(),
            title: "Noisy gearbox".into(),
            description: None,
            priority: Priority::High,
            status: WorkOrderStatus::Closed,
            created_by: "u-1".into(),
            assigned_to: Some("u-2".into()),
            consumptions: vec![PartConsumption {
                part_id: "p-1".into(),
                quantity: 2,
                transaction_id: "t-1".into(),
                consumed_at: at(3),
            }],
            shortages: vec![],
            completion_note: Some("Replaced bearing".into()),
            cancel_reason: None,
            created_at: at(2),
            updated_at: at(5),
            completed_at: Some(at(4)),
            closed_at: Some(at(5)),
            version: 5,
        };

        let status_change = AuditEntry {
            id: "a-1".into(),
            actor_id: "u-1".into(),
            action: Action::ChangeEquipmentStatus,
            outcome: AuditOutcome::Succeeded,
            target_kind: TargetKind::Equipment,
            target_id: Some("eq-1".into()),
            before: None,
            after: None,
            detail: Some("active → out_of_service".into()),
            recorded_at: at(6),
        };

        let events = timeline(&[completion], &[wo], &[status_change]);
        let kinds: Vec<HistoryKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                HistoryKind::StatusChanged,
                HistoryKind::WorkOrderClosed,
                HistoryKind::WorkOrderCompleted,
                HistoryKind::PartConsumed,
                HistoryKind::WorkOrderRaised,
                HistoryKind::PmCompleted,
            ]
        );
    }

    #[test]
    fn test_trend_months_cross_year_end() {
        let now = Utc.with_ymd_and_hms(2025, 2, 17, 8, 0, 0).unwrap();
        let months: Vec<String> = trend_months(now, 4).into_iter().map(month_key).collect();
        assert_eq!(months, vec!["2024-11", "2024-12", "2025-01", "2025-02"]);
        assert!(trend_months(now, 0).is_empty());
    }

    #[test]
    fn test_monthly_trends_buckets_activity() {
        let at = |m: u32, d: u32| Utc.with_ymd_and_hms(2025, m, d, 9, 0, 0).unwrap();
        let completion = |id: &str, when: DateTime<Utc>, minutes: Option<i64>| PmCompletion {
            id: id.into(),
            schedule_id: "s-1".into(),
            equipment_id: "eq-1".into(),
            completed_at: when,
            actor_id: "u-2".into(),
            notes: None,
            labor_minutes: minutes,
            advanced: true,
            recorded_at: when,
        };
        let order = |id: &str, created: DateTime<Utc>, status: WorkOrderStatus| WorkOrder {
            id: id.into(),
            equipment_id: "eq-1".into(),
            title: "Leak".into(),
            description: None,
            priority: Priority::Medium,
            status,
            created_by: "u-1".into(),
            assigned_to: None,
            consumptions: vec![],
            shortages: vec![],
            completion_note: None,
            cancel_reason: None,
            created_at: created,
            updated_at: created,
            completed_at: None,
            closed_at: None,
            version: 1,
        };

        let completions = vec![
            completion("c-1", at(1, 10), Some(30)),
            completion("c-2", at(3, 2), Some(45)),
            completion("c-3", at(3, 20), None),
            // Before the window.
            completion("c-0", at(1, 1) - chrono::Duration::days(40), Some(90)),
        ];
        let mut repair = order("wo-1", at(2, 27), WorkOrderStatus::InProgress);
        repair.consumptions.push(PartConsumption {
            part_id: "p-1".into(),
            quantity: 2,
            transaction_id: "t-1".into(),
            consumed_at: at(3, 1),
        });
        let work_orders = vec![
            repair,
            order("wo-2", at(3, 5), WorkOrderStatus::Open),
            order("wo-3", at(3, 6), WorkOrderStatus::Cancelled),
        ];

        let trends = monthly_trends(at(3, 25), 3, &completions, &work_orders, |_| {
            Money::from_cents(1_000)
        });
        let months: Vec<&str> = trends.iter().map(|t| t.month.as_str()).collect();
        assert_eq!(months, vec!["2025-01", "2025-02", "2025-03"]);

        assert_eq!((trends[0].pm_count, trends[0].labor_minutes), (1, 30));
        assert_eq!((trends[1].pm_count, trends[1].cm_count), (0, 1));
        assert_eq!(trends[1].parts_cost, Money::zero());
        assert_eq!((trends[2].pm_count, trends[2].labor_minutes), (2, 45));
        assert_eq!(trends[2].cm_count, 1);
        assert_eq!(trends[2].parts_cost, Money::from_cents(2_000));
    }
}
