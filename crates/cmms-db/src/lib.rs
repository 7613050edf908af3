//! # cmms-db: SQLite Persistence for Plantwise CMMS
//!
//! Implements the `cmms-core` store port on SQLite via sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Orchestrator<SqliteStore>  (cmms-service)                              │
//! │       │  begin / get / update(expected_version) / append / commit       │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                     cmms-db (THIS CRATE)                        │    │
//! │  │                                                                 │    │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐    │    │
//! │  │   │   Database    │    │  SqliteStore  │    │  Migrations  │    │    │
//! │  │   │   (pool.rs)   │◄───│  SqliteTx     │    │  (embedded)  │    │    │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘    │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (WAL), default under the platform data directory           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`store`] - `Store` / `StoreTx` over SQLite
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cmms_db::{Database, DbConfig};
//! use cmms_service::{Orchestrator, ServiceSettings};
//!
//! let db = Database::new(DbConfig::new("plant.db")).await?;
//! let cmms = Orchestrator::new(db.store(), ServiceSettings::default());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use store::{SqliteStore, SqliteTx};
