//! # cmms-service: Components and Orchestrator for Plantwise CMMS
//!
//! Runs the rules from `cmms-core` against any [`Store`](cmms_core::store::Store).
//!
//! ## Component Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator<S: Store>                          │
//! │   admit (guard) ─► component ─► settle (audit + commit)                 │
//! │                                                                         │
//! │   ┌───────────┐ ┌───────────┐ ┌──────────────────┐ ┌───────────┐        │
//! │   │ Registry  │ │ Scheduler │ │ WorkOrderManager │ │  Ledger   │        │
//! │   │ equipment │ │ PM tasks  │ │ CM lifecycle     │ │ parts +   │        │
//! │   │ health    │ │ due list  │ │ consume parts ───┼─► stock     │        │
//! │   └───────────┘ └───────────┘ └──────────────────┘ └───────────┘        │
//! │   ┌───────────────┐ ┌─────────────┐ ┌─────────────┐                     │
//! │   │ UserDirectory │ │ AccessGuard │ │ AuditLogger │                     │
//! │   └───────────────┘ └─────────────┘ └─────────────┘                     │
//! │                                                                         │
//! │   locks (per entity) • clock • feeds (keyset pages) • memory store      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`] - Public operations
//! - [`registry`], [`scheduler`], [`work_orders`], [`ledger`], [`users`] - Components
//! - [`guard`], [`audit`] - Authorization and the audit trail
//! - [`feed`] - Restartable paged reads (due list, audit and ledger export)
//! - [`memory`] - In-memory store
//! - [`locks`], [`clock`] - Concurrency and time
//! - [`config`], [`logging`] - Ambient setup

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod clock;
pub mod config;
pub mod feed;
pub mod guard;
pub mod ledger;
pub mod locks;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod users;
pub mod work_orders;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{CmmsConfig, ConfigError, ServiceSettings};
pub use memory::MemoryStore;
pub use orchestrator::Orchestrator;
pub use work_orders::ConsumeOutcome;
