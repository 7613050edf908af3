//! # User Directory
//!
//! Operator accounts and their roles. Credentials live outside the core;
//! an account here is an identity the guard can resolve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use cmms_core::store::{StoreTx, UserFilter};
use cmms_core::validation::{validate_text, validate_username};
use cmms_core::{new_id, Action, CoreError, CoreResult, Role, User, ValidationError};

use crate::audit::{AuditDraft, Mutation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

/// Partial update. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

async fn load_user<T: StoreTx>(tx: &mut T, user_id: &str) -> CoreResult<User> {
    tx.get_user(user_id)
        .await?
        .ok_or_else(|| CoreError::not_found("User", user_id))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UserDirectory;

impl UserDirectory {
    pub async fn create<T: StoreTx>(
        &self,
        tx: &mut T,
        input: NewUser,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<User>> {
        validate_username(&input.username)?;
        validate_text("full_name", &input.full_name, 100)?;

        if tx.get_user_by_username(&input.username).await?.is_some() {
            return Err(ValidationError::Duplicate {
                field: "username".to_string(),
                value: input.username,
            }
            .into());
        }

        let user = User {
            id: new_id(),
            username: input.username,
            full_name: input.full_name.trim().to_string(),
            role: input.role,
            active: true,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        tx.insert_user(&user).await?;

        info!(user_id = %user.id, username = %user.username, role = %user.role, "User created");
        let audit = AuditDraft::new(Action::CreateUser)
            .target(&user.id)
            .after(&user);
        Ok(Mutation::new(user, audit))
    }

    /// Applies `changes` on behalf of `actor`. A manager cannot demote or
    /// deactivate their own account.
    pub async fn update<T: StoreTx>(
        &self,
        tx: &mut T,
        actor: &User,
        user_id: &str,
        changes: UserChanges,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<User>> {
        let before = load_user(tx, user_id).await?;
        let mut user = before.clone();

        if let Some(full_name) = changes.full_name {
            validate_text("full_name", &full_name, 100)?;
            user.full_name = full_name.trim().to_string();
        }
        if let Some(role) = changes.role {
            if actor.id == user.id && role != Role::Manager {
                return Err(CoreError::invalid_config(
                    "role",
                    "managers cannot demote themselves",
                ));
            }
            user.role = role;
        }
        if let Some(active) = changes.active {
            if actor.id == user.id && !active {
                return Err(CoreError::invalid_config(
                    "active",
                    "managers cannot deactivate themselves",
                ));
            }
            user.active = active;
        }

        user.updated_at = now;
        user.version = before.version + 1;
        tx.update_user(&user, before.version).await?;

        info!(user_id = %user.id, role = %user.role, active = user.active, "User updated");
        let audit = AuditDraft::new(Action::UpdateUser)
            .target(&user.id)
            .before(&before)
            .after(&user);
        Ok(Mutation::new(user, audit))
    }

    /// Creates the first manager. Only valid while the directory is empty.
    pub async fn bootstrap_manager<T: StoreTx>(
        &self,
        tx: &mut T,
        username: &str,
        full_name: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Mutation<User>> {
        if tx.count_users().await? > 0 {
            return Err(CoreError::invalid_config(
                "users",
                "bootstrap is only allowed on an empty directory",
            ));
        }
        self.create(
            tx,
            NewUser {
                username: username.to_string(),
                full_name: full_name.to_string(),
                role: Role::Manager,
            },
            now,
        )
        .await
    }

    pub async fn get<T: StoreTx>(&self, tx: &mut T, user_id: &str) -> CoreResult<User> {
        load_user(tx, user_id).await
    }

    pub async fn list<T: StoreTx>(&self, tx: &mut T, filter: &UserFilter) -> CoreResult<Vec<User>> {
        tx.list_users(filter).await
    }
}
