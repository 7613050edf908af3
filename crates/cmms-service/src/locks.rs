//! # Per-Entity Locks
//!
//! Serializes mutations of one entity (a part, a work order, a schedule)
//! while letting unrelated entities proceed in parallel.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  consume(part A) ──► lock("A") ─────────── held ──────────► release     │
//! │  consume(part A) ──► lock("A") ···· waits ····► held ──► release        │
//! │  consume(part B) ──► lock("B") ── held ──► release   (no waiting)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Guards are held across the whole transaction, commit included.
//! Callers needing two locks take the work order before the part.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Slots are pruned once the table grows past this many idle entries.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug)]
pub struct EntityLocks {
    kind: &'static str,
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new(kind: &'static str) -> Self {
        EntityLocks {
            kind,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for exclusive access to `id`.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            if slots.len() > PRUNE_THRESHOLD {
                // Only the table holds a reference: nobody owns or awaits it.
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            slots.entry(id.to_string()).or_default().clone()
        };

        trace!(kind = self.kind, id = %id, "Acquiring entity lock");
        slot.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_exclusive() {
        let locks = Arc::new(EntityLocks::new("part"));
        let guard = locks.lock("p-1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("p-1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let locks = EntityLocks::new("part");
        let _a = locks.lock("p-1").await;
        let _b = locks.lock("p-2").await;
    }
}
