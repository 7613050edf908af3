//! # Error Types
//!
//! Domain error taxonomy for the maintenance core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  cmms-core errors (this file)                                          │
//! │  ├── CoreError        - Business rule / authorization / storage faults │
//! │  └── ValidationError  - Input shape failures                           │
//! │                                                                         │
//! │  cmms-db errors (separate crate)                                       │
//! │  └── DbError          - SQLite failures, mapped into CoreError         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError ← DbError                           │
//! │        CoreError::code() → stable machine code for the presentation    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Every variant names the entity kind and id it concerns
//! 2. Rule violations carry the rule text, not just a flag
//! 3. Only `Storage` and `Conflict` are retryable, and the core never retries

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors surfaced by every public core operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Referenced entity does not exist.
    ///
    /// ## When This Occurs
    /// - Unknown equipment, schedule, work order, part or user id
    /// - Unknown part sku in a lookup
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The operation is not legal from the entity's current state.
    ///
    /// ## When This Occurs
    /// - Work-order transition outside the fixed graph
    /// - Consuming parts on a Completed/Closed/Cancelled work order
    /// - Mutating retired equipment or an inactive schedule
    ///
    /// The entity is left unchanged.
    #[error("{entity} {id} is {from}, cannot {attempted}: {rule}")]
    InvalidTransition {
        entity: String,
        id: String,
        from: String,
        attempted: String,
        rule: String,
    },

    /// A definition value is out of its legal domain.
    ///
    /// ## When This Occurs
    /// - Maintenance cadence ≤ 0 days
    /// - Negative reorder threshold or unit cost
    /// - A manager demoting or deactivating their own account
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// A debit would drive a part's on-hand quantity below zero.
    ///
    /// ## User Workflow
    /// ```text
    /// consume_part(wo, part, qty: 5)
    ///      │
    ///      ▼
    /// on-hand = 3
    ///      │
    ///      ▼
    /// InsufficientStock { sku: "BRG-6204", on_hand: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Work order → PendingParts, ledger untouched
    /// ```
    #[error("Insufficient stock for {sku}: on hand {on_hand}, requested {requested}")]
    InsufficientStock {
        part_id: String,
        sku: String,
        on_hand: i64,
        requested: i64,
    },

    /// The acting user's role does not permit the action.
    #[error("{actor} may not {action}: {reason}")]
    Denied {
        actor: String,
        action: String,
        reason: String,
    },

    /// A concurrent writer changed the entity first.
    ///
    /// ## When This Occurs
    /// - Optimistic version check failed at commit
    /// - SQLite reported the database as busy/locked
    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: String, id: String },

    /// The acting user id does not resolve to a known user.
    #[error("Invalid actor {actor}: {reason}")]
    InvalidActor { actor: String, reason: String },

    /// Input validation failure.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Persistence fault (I/O, corrupted row, pool closed).
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Conflict error for a given entity type and id.
    pub fn conflict(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::Conflict {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidConfiguration error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable, machine-readable code for the presentation layer.
    ///
    /// ## Codes
    /// ```text
    /// NotFound             → NOT_FOUND
    /// InvalidTransition    → INVALID_TRANSITION
    /// InvalidConfiguration → INVALID_CONFIGURATION
    /// InsufficientStock    → INSUFFICIENT_STOCK
    /// Denied               → DENIED
    /// Conflict             → CONFLICT
    /// InvalidActor         → INVALID_ACTOR
    /// Validation           → VALIDATION_ERROR
    /// Storage              → STORAGE_ERROR
    /// ```
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CoreError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            CoreError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            CoreError::Denied { .. } => "DENIED",
            CoreError::Conflict { .. } => "CONFLICT",
            CoreError::InvalidActor { .. } => "INVALID_ACTOR",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Conflict { .. } | CoreError::Storage(_))
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any state is read, so they never leave partial effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (bad characters, timestamp in the future, ...).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (sku, username).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// A referenced record exists but cannot be used here.
    #[error("{field} '{id}' cannot be used: {reason}")]
    InvalidReference {
        field: String,
        id: String,
        reason: String,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            part_id: "p-1".to_string(),
            sku: "BRG-6204".to_string(),
            on_hand: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for BRG-6204: on hand 3, requested 5"
        );

        let err = CoreError::InvalidTransition {
            entity: "WorkOrder".to_string(),
            id: "wo-1".to_string(),
            from: "cancelled".to_string(),
            attempted: "consume parts".to_string(),
            rule: "work order is no longer active".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "WorkOrder wo-1 is cancelled, cannot consume parts: work order is no longer active"
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(CoreError::not_found("Part", "x").code(), "NOT_FOUND");
        assert_eq!(CoreError::conflict("Part", "x").code(), "CONFLICT");
        assert_eq!(
            CoreError::invalid_config("cadence_days", "must be > 0").code(),
            "INVALID_CONFIGURATION"
        );
        assert_eq!(CoreError::Storage("disk".into()).code(), "STORAGE_ERROR");
    }

    #[test]
    fn test_only_storage_and_conflict_are_retryable() {
        assert!(CoreError::Storage("io".into()).is_retryable());
        assert!(CoreError::conflict("Part", "x").is_retryable());
        assert!(!CoreError::not_found("Part", "x").is_retryable());
        assert!(!CoreError::Denied {
            actor: "u".into(),
            action: "close".into(),
            reason: "role".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "title".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.code(), "VALIDATION_ERROR");
    }
}
