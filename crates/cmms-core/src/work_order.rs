//! # Work Order Lifecycle
//!
//! The fixed transition graph for corrective work orders and the rule checks
//! guarding each edge.
//!
//! ## Transition Graph
//! ```text
//!                 assign
//!   ┌──────┐ ─────────────► ┌────────────┐  shortage   ┌──────────────┐
//!   │ Open │                │ InProgress │ ──────────► │ PendingParts │
//!   └──┬───┘                │            │ ◄────────── │              │
//!      │                    └─────┬──────┘  fulfilled  └──────┬───────┘
//!      │                          │ complete (note,            │
//!      │                          │ no open shortages)         │
//!      │                          ▼                            │
//!      │                    ┌───────────┐  close   ┌────────┐  │
//!      │                    │ Completed │ ───────► │ Closed │  │
//!      │                    └───────────┘ (Mgr)    └────────┘  │
//!      │                                                       │
//!      └──────────────┬──────────────── cancel (Mgr, reason) ──┘
//!                     ▼           (also from InProgress)
//!               ┌───────────┐
//!               │ Cancelled │
//!               └───────────┘
//! ```
//!
//! Anything not drawn is rejected with `InvalidTransition` and the order is
//! left as it was.

use crate::error::{CoreError, CoreResult};
use crate::types::{WorkOrder, WorkOrderStatus};

impl WorkOrderStatus {
    /// Whether `self → to` is an edge of the graph.
    pub fn can_transition_to(self, to: WorkOrderStatus) -> bool {
        use WorkOrderStatus::*;
        matches!(
            (self, to),
            (Open, InProgress)
                | (InProgress, PendingParts)
                | (PendingParts, InProgress)
                | (InProgress, Completed)
                | (Completed, Closed)
                | (Open, Cancelled)
                | (InProgress, Cancelled)
                | (PendingParts, Cancelled)
        )
    }

    /// No further work may happen (Completed only moves on to Closed).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkOrderStatus::Completed | WorkOrderStatus::Closed | WorkOrderStatus::Cancelled
        )
    }

    /// Parts may be drawn against the order.
    pub fn accepts_consumption(self) -> bool {
        matches!(
            self,
            WorkOrderStatus::InProgress | WorkOrderStatus::PendingParts
        )
    }
}

fn rejected(wo: &WorkOrder, attempted: &str, rule: impl Into<String>) -> CoreError {
    CoreError::InvalidTransition {
        entity: "WorkOrder".to_string(),
        id: wo.id.clone(),
        from: wo.status.to_string(),
        attempted: attempted.to_string(),
        rule: rule.into(),
    }
}

/// Checks the edge `wo.status → to`.
pub fn check_transition(wo: &WorkOrder, to: WorkOrderStatus) -> CoreResult<()> {
    if wo.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(rejected(
            wo,
            &format!("move to {}", to),
            format!("no transition from {} to {}", wo.status, to),
        ))
    }
}

/// Parts may only be consumed while the order is being worked.
pub fn check_consumption(wo: &WorkOrder) -> CoreResult<()> {
    if wo.status.accepts_consumption() {
        Ok(())
    } else {
        Err(rejected(
            wo,
            "consume parts",
            "parts can only be consumed while in_progress or pending_parts",
        ))
    }
}

/// A shortage can be raised while work is underway or already blocked.
pub fn check_shortage(wo: &WorkOrder) -> CoreResult<()> {
    if wo.status.accepts_consumption() {
        Ok(())
    } else {
        Err(rejected(
            wo,
            "report shortage",
            "shortages can only be raised while in_progress or pending_parts",
        ))
    }
}

/// InProgress → Completed: requires a note and no open shortages.
pub fn check_complete(wo: &WorkOrder, note: &str) -> CoreResult<()> {
    check_transition(wo, WorkOrderStatus::Completed)?;

    if note.trim().is_empty() {
        return Err(rejected(wo, "complete", "a completion note is required"));
    }

    if wo.has_open_shortages() {
        return Err(rejected(wo, "complete", "open part shortages remain"));
    }

    Ok(())
}

/// Completed → Closed: shortages are re-verified at close time.
pub fn check_close(wo: &WorkOrder) -> CoreResult<()> {
    check_transition(wo, WorkOrderStatus::Closed)?;

    if wo.has_open_shortages() {
        return Err(rejected(wo, "close", "open part shortages remain"));
    }

    Ok(())
}

/// Any non-terminal state → Cancelled, with a reason.
pub fn check_cancel(wo: &WorkOrder, reason: &str) -> CoreResult<()> {
    check_transition(wo, WorkOrderStatus::Cancelled)?;

    if reason.trim().is_empty() {
        return Err(rejected(wo, "cancel", "a cancellation reason is required"));
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PartShortage, Priority};
    use chrono::Utc;
    use WorkOrderStatus::*;

    const ALL: [WorkOrderStatus; 6] = [Open, InProgress, PendingParts, Completed, Closed, Cancelled];

    fn order(status: WorkOrderStatus) -> WorkOrder {
        WorkOrder {
            id: "wo-1".into(),
            equipment_id: "eq-1".into(),
            title: "Fix leak".into(),
            description: None,
            priority: Priority::Medium,
            status,
            created_by: "u-1".into(),
            assigned_to: None,
            consumptions: vec![],
            shortages: vec![],
            completion_note: None,
            cancel_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            closed_at: None,
            version: 1,
        }
    }

    fn open_shortage() -> PartShortage {
        PartShortage {
            part_id: "p-1".into(),
            requested: 5,
            available: 3,
            fulfilled: 0,
            raised_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    #[test]
    fn test_graph_has_exactly_eight_edges() {
        let edges = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .count();
        assert_eq!(edges, 8);
    }

    #[test]
    fn test_terminal_states_have_no_exit_except_close() {
        for to in ALL {
            assert!(!Closed.can_transition_to(to));
            assert!(!Cancelled.can_transition_to(to));
        }
        assert!(Completed.can_transition_to(Closed));
        assert!(!Completed.can_transition_to(InProgress));
    }

    #[test]
    fn test_consumption_only_while_worked() {
        assert!(check_consumption(&order(InProgress)).is_ok());
        assert!(check_consumption(&order(PendingParts)).is_ok());
        for status in [Open, Completed, Closed, Cancelled] {
            assert!(matches!(
                check_consumption(&order(status)),
                Err(CoreError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_complete_requires_note_and_no_shortages() {
        let wo = order(InProgress);
        assert!(check_complete(&wo, "").is_err());
        assert!(check_complete(&wo, "  ").is_err());
        assert!(check_complete(&wo, "Replaced seal").is_ok());

        let mut blocked = order(InProgress);
        blocked.shortages.push(open_shortage());
        assert!(check_complete(&blocked, "Replaced seal").is_err());
    }

    #[test]
    fn test_close_reverifies_shortages() {
        assert!(check_close(&order(Completed)).is_ok());
        let mut wo = order(Completed);
        wo.shortages.push(open_shortage());
        assert!(check_close(&wo).is_err());
        assert!(check_close(&order(InProgress)).is_err());
    }

    #[test]
    fn test_cancel_requires_reason_and_non_terminal() {
        assert!(check_cancel(&order(Open), "duplicate").is_ok());
        assert!(check_cancel(&order(PendingParts), "duplicate").is_ok());
        assert!(check_cancel(&order(Open), "").is_err());
        assert!(check_cancel(&order(Completed), "duplicate").is_err());
    }
}
