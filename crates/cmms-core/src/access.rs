//! # Access Control
//!
//! Pure role → capability evaluation. No I/O, no lookups: the caller passes
//! the resolved [`User`].
//!
//! ## Capability Table
//! ```text
//! ┌──────────────────┬──────────────────────────────────────────────────────┐
//! │ Role             │ Allowed actions                                      │
//! ├──────────────────┼──────────────────────────────────────────────────────┤
//! │ Manager          │ everything                                           │
//! │ Technician       │ create / assign / report shortage / resume /         │
//! │                  │ complete work orders, consume parts on them,         │
//! │                  │ record PM completions                                │
//! │ PartsCoordinator │ create / update parts, replenish / adjust stock,     │
//! │                  │ consume parts on work orders                         │
//! └──────────────────┴──────────────────────────────────────────────────────┘
//!  Inactive users: denied regardless of role.
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{Action, Role, TargetKind, User};

const MANAGER: &[Action] = &Action::ALL;

const TECHNICIAN: &[Action] = &[
    Action::CreateWorkOrder,
    Action::AssignWorkOrder,
    Action::ReportShortage,
    Action::ResumeWorkOrder,
    Action::CompleteWorkOrder,
    Action::ConsumePart,
    Action::RecordCompletion,
];

const PARTS_COORDINATOR: &[Action] = &[
    Action::CreatePart,
    Action::UpdatePart,
    Action::ReplenishStock,
    Action::AdjustStock,
    Action::ConsumePart,
];

/// The static capability list for a role.
pub fn capabilities(role: Role) -> &'static [Action] {
    match role {
        Role::Manager => MANAGER,
        Role::Technician => TECHNICIAN,
        Role::PartsCoordinator => PARTS_COORDINATOR,
    }
}

/// Result of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Denied(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Decides whether `user` may perform `action` on an entity of kind `target`.
///
/// ## Example
/// ```rust
/// use chrono::Utc;
/// use cmms_core::access::{authorize, Decision};
/// use cmms_core::{Action, Role, TargetKind, User};
///
/// let tech = User {
///     id: "u-2".into(),
///     username: "tech".into(),
///     full_name: "Pat Tech".into(),
///     role: Role::Technician,
///     active: true,
///     created_at: Utc::now(),
///     updated_at: Utc::now(),
///     version: 1,
/// };
///
/// assert_eq!(
///     authorize(&tech, Action::ConsumePart, TargetKind::WorkOrder),
///     Decision::Allowed
/// );
/// assert!(!authorize(&tech, Action::CloseWorkOrder, TargetKind::WorkOrder).is_allowed());
/// ```
pub fn authorize(user: &User, action: Action, target: TargetKind) -> Decision {
    if !user.active {
        return Decision::Denied(format!("user {} is inactive", user.username));
    }

    if action.target_kind() != target {
        return Decision::Denied(format!("{} does not apply to {}", action, target));
    }

    if capabilities(user.role).contains(&action) {
        Decision::Allowed
    } else {
        Decision::Denied(format!("role {} lacks permission to {}", user.role, action))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
