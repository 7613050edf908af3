//! # Access Control Guard
//!
//! Resolves the acting user from the store and applies the static
//! capability table from [`cmms_core::access`].

use tracing::warn;

use cmms_core::access::{authorize, Decision};
use cmms_core::store::StoreTx;
use cmms_core::{Action, CoreError, CoreResult, User};

#[derive(Debug, Default, Clone, Copy)]
pub struct AccessGuard;

impl AccessGuard {
    /// Loads the acting user. Unknown ids are `InvalidActor`.
    pub async fn resolve_actor<T: StoreTx>(&self, tx: &mut T, actor_id: &str) -> CoreResult<User> {
        tx.get_user(actor_id)
            .await?
            .ok_or_else(|| CoreError::InvalidActor {
                actor: actor_id.to_string(),
                reason: "no such user".to_string(),
            })
    }

    /// Turns a [`Decision::Denied`] into [`CoreError::Denied`].
    pub fn check(&self, user: &User, action: Action) -> CoreResult<()> {
        match authorize(user, action, action.target_kind()) {
            Decision::Allowed => Ok(()),
            Decision::Denied(reason) => {
                warn!(user = %user.username, role = %user.role, action = %action, %reason, "Access denied");
                Err(CoreError::Denied {
                    actor: user.username.clone(),
                    action: action.to_string(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cmms_core::Role;

    #[test]
    fn test_check_maps_denial() {
        let tech = User {
            id: "u-2".into(),
            username: "pat".into(),
            full_name: "Pat Tech".into(),
            role: Role::Technician,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        };
        let guard = AccessGuard;
        assert!(guard.check(&tech, Action::CompleteWorkOrder).is_ok());
        match guard.check(&tech, Action::CloseWorkOrder) {
            Err(CoreError::Denied { actor, action, .. }) => {
                assert_eq!(actor, "pat");
                assert_eq!(action, "close_work_order");
            }
            other => panic!("expected Denied, got {other:?}"),
        }
    }
}
