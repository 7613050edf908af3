//! # Database Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error / MigrateError / serde_json::Error                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module)      categorized, with context                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CoreError                  what the orchestrator and callers see       │
//! │    UniqueViolation ──► Validation(Duplicate)                            │
//! │    Busy            ──► Conflict                                         │
//! │    NotFound        ──► NotFound                                         │
//! │    everything else ──► Storage                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use cmms_core::{CoreError, ValidationError};
use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// UNIQUE or PRIMARY KEY constraint.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// The database was locked by another writer past the busy timeout, or
    /// this transaction's snapshot went stale.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored JSON column could not be read or written.
    #[error("Corrupt column {column}: {message}")]
    Corrupt { column: String, message: String },

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn corrupt(column: &str, err: serde_json::Error) -> Self {
        DbError::Corrupt {
            column: column.to_string(),
            message: err.to_string(),
        }
    }

    /// Fills in the offending value on a unique violation; SQLite only
    /// reports the column.
    pub fn with_value(self, value: &str) -> Self {
        match self {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: value.to_string(),
            },
            other => other,
        }
    }
}

/// SQLite result codes for a locked or busy database, including extended
/// codes (BUSY_RECOVERY, BUSY_SNAPSHOT, LOCKED_SHAREDCACHE).
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → constraint kind, busy code, or QueryFailed
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();
                let busy = db_err
                    .code()
                    .is_some_and(|code| BUSY_CODES.contains(&&*code));

                match db_err.kind() {
                    ErrorKind::UniqueViolation => {
                        // "UNIQUE constraint failed: parts.sku"
                        let field = msg
                            .rsplit(['.', ' '])
                            .next()
                            .unwrap_or("unknown")
                            .to_string();
                        DbError::UniqueViolation {
                            field,
                            value: "unknown".to_string(),
                        }
                    }
                    ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { message: msg },
                    _ if busy => DbError::Busy(msg),
                    _ => DbError::QueryFailed(msg),
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => CoreError::NotFound { entity, id },
            DbError::UniqueViolation { field, value } => {
                CoreError::Validation(ValidationError::Duplicate { field, value })
            }
            DbError::Busy(message) => CoreError::conflict("database", message),
            other => CoreError::Storage(other.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
