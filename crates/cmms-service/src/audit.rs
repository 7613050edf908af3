//! # Audit Logger
//!
//! Append-only action trail. Components describe what they changed with an
//! [`AuditDraft`]; the orchestrator stamps actor, outcome and time and writes
//! it in the same transaction as the change.
//!
//! ```text
//! component ──► Mutation { value, audit: AuditDraft }
//!                                      │
//!   orchestrator: draft.finish(actor, Succeeded, now) ──► tx.append_audit
//!                                                         tx.commit
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use cmms_core::store::StoreTx;
use cmms_core::{new_id, Action, AuditEntry, AuditOutcome, CoreResult};

/// Snapshot of a record for the before/after columns.
pub fn snapshot<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Audit content known to the component that made a change.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDraft {
    pub action: Action,
    pub target_id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub detail: Option<String>,
}

impl AuditDraft {
    pub fn new(action: Action) -> Self {
        AuditDraft {
            action,
            target_id: None,
            before: None,
            after: None,
            detail: None,
        }
    }

    pub fn target(mut self, id: impl Into<String>) -> Self {
        self.target_id = Some(id.into());
        self
    }

    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = snapshot(value);
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = snapshot(value);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Completes the draft into an immutable entry.
    pub fn finish(self, actor_id: &str, outcome: AuditOutcome, now: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id: new_id(),
            actor_id: actor_id.to_string(),
            action: self.action,
            outcome,
            target_kind: self.action.target_kind(),
            target_id: self.target_id,
            before: self.before,
            after: self.after,
            detail: self.detail,
            recorded_at: now,
        }
    }
}

/// A committed-to-be change plus its audit description.
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    pub value: T,
    pub audit: AuditDraft,
}

impl<T> Mutation<T> {
    pub fn new(value: T, audit: AuditDraft) -> Self {
        Mutation { value, audit }
    }
}

/// Writes and reads audit entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuditLogger;

impl AuditLogger {
    /// Appends `entry` inside `tx` and returns its id.
    pub async fn record<T: StoreTx>(&self, tx: &mut T, entry: AuditEntry) -> CoreResult<String> {
        debug!(
            audit_id = %entry.id,
            actor = %entry.actor_id,
            action = %entry.action,
            outcome = ?entry.outcome,
            target = ?entry.target_id,
            "Recording audit entry"
        );
        tx.append_audit(&entry).await?;
        Ok(entry.id)
    }

    pub async fn entries_for<T: StoreTx>(
        &self,
        tx: &mut T,
        target_id: &str,
    ) -> CoreResult<Vec<AuditEntry>> {
        tx.audit_for_target(target_id).await
    }
}
