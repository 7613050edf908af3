//! # cmms-core: Pure Domain Logic for Plantwise CMMS
//!
//! Everything here is deterministic: time, identity of the acting user and
//! stored state are passed in, never fetched.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Plantwise CMMS Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             Presentation (external: screens, reports)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ plain records                          │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          cmms-service: Orchestrator + components                │   │
//! │  │   authorize ─► lock ─► begin tx ─► mutate ─► audit ─► commit    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ cmms-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌────────────┐ ┌──────────────┐    │   │
//! │  │   │  types   │ │  access  │ │  schedule  │ │  work_order  │    │   │
//! │  │   │ entities │ │role table│ │cadence math│ │ transitions  │    │   │
//! │  │   └──────────┘ └──────────┘ └────────────┘ └──────────────┘    │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌────────────┐ ┌──────────────┐    │   │
//! │  │   │  stock   │ │  health  │ │   money    │ │    store     │    │   │
//! │  │   │ balances │ │  scoring │ │ unit cost  │ │ (port traits)│    │   │
//! │  │   └──────────┘ └──────────┘ └────────────┘ └──────────────┘    │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   Store implementations: in-memory (service), SQLite (cmms-db)  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entities and records (Equipment, WorkOrder, Part, ...)
//! - [`money`] - Integer-cents money for part costs
//! - [`error`] - Domain error taxonomy
//! - [`validation`] - Input validation
//! - [`access`] - Static role → capability table
//! - [`schedule`] - PM cadence and due-status rules
//! - [`work_order`] - Corrective work-order transition graph
//! - [`stock`] - Ledger balance rules
//! - [`health`] - Equipment health scoring
//! - [`store`] - Persistence port consumed by the service layer
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use cmms_core::schedule::next_due_after;
//!
//! let completed = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
//! let next = next_due_after(completed, 30).unwrap();
//! assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 14, 0, 0, 0).unwrap());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access;
pub mod error;
pub mod health;
pub mod money;
pub mod schedule;
pub mod stock;
pub mod store;
pub mod types;
pub mod validation;
pub mod work_order;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Actor id recorded for operations the system performs on its own behalf
/// (bootstrapping the first manager account).
pub const SYSTEM_ACTOR: &str = "system";

/// A schedule whose next-due date falls within this many days is `Due`.
pub const DEFAULT_DUE_SOON_DAYS: i64 = 7;

/// Look-back window for equipment health scoring.
pub const DEFAULT_HEALTH_WINDOW_DAYS: i64 = 365;

/// Upper bound on a single stock movement.
///
/// ## Business Reason
/// Catches typos (10000 instead of 10) before they reach the ledger.
pub const MAX_STOCK_MOVEMENT: i64 = 100_000;

/// Longest PM cadence accepted (100 years).
pub const MAX_CADENCE_DAYS: i64 = 36_500;

/// Longest maintenance-trend report, in calendar months.
pub const MAX_TREND_MONTHS: u32 = 120;

/// Look-back window of the parts usage report when none is given.
pub const DEFAULT_USAGE_WINDOW_DAYS: i64 = 90;

/// Generates a new opaque entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
