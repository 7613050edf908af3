//! # Validation Module
//!
//! Input-shape checks run before any state is read.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: Presentation (external) - immediate feedback                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - field shape (empty, length, charset, sign)     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Components - state rules (transitions, stock, cadence)       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: Store - UNIQUE / version constraints                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::MAX_STOCK_MOVEMENT;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Rejects empty/whitespace-only values and values over `max` characters.
pub fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Like [`validate_text`] but `None` is accepted.
pub fn validate_optional_text(
    field: &str,
    value: Option<&str>,
    max: usize,
) -> ValidationResult<()> {
    match value {
        Some(v) => validate_text(field, v, max),
        None => Ok(()),
    }
}

/// Validates a part SKU.
///
/// ## Rules
/// - 1 to 50 characters
/// - letters, digits, hyphens, underscores
///
/// ## Example
/// ```rust
/// use cmms_core::validation::validate_sku;
///
/// assert!(validate_sku("BRG-6204").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("bad sku").is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    validate_text("sku", sku, 50)?;

    if !sku
        .trim()
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a login username.
///
/// ## Rules
/// - 3 to 50 characters
/// - ASCII letters, digits, `.`, `_`, `-`
pub fn validate_username(username: &str) -> ValidationResult<()> {
    let username = username.trim();

    if username.is_empty() {
        return Err(ValidationError::Required {
            field: "username".to_string(),
        });
    }

    if username.len() < 3 {
        return Err(ValidationError::TooShort {
            field: "username".to_string(),
            min: 3,
        });
    }

    if username.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "username".to_string(),
            max: 50,
        });
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ValidationError::InvalidFormat {
            field: "username".to_string(),
            reason: "must contain only letters, numbers, '.', '_' and '-'".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a stock movement quantity (consume, replenish, shortage request).
///
/// ## Example
/// ```rust
/// use cmms_core::validation::validate_quantity;
///
/// assert!(validate_quantity(5).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(-2).is_err());
/// ```
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if quantity > MAX_STOCK_MOVEMENT {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_STOCK_MOVEMENT,
        });
    }

    Ok(())
}

/// Validates a signed adjustment: non-zero and within the movement bound.
pub fn validate_adjustment(delta: i64) -> ValidationResult<()> {
    if delta == 0 || delta.abs() > MAX_STOCK_MOVEMENT {
        return Err(ValidationError::OutOfRange {
            field: "delta".to_string(),
            min: -MAX_STOCK_MOVEMENT,
            max: MAX_STOCK_MOVEMENT,
        });
    }
    Ok(())
}

/// Labor minutes, when given, must be positive and under a week.
pub fn validate_labor_minutes(minutes: Option<i64>) -> ValidationResult<()> {
    match minutes {
        Some(m) if m <= 0 || m > 7 * 24 * 60 => Err(ValidationError::OutOfRange {
            field: "labor_minutes".to_string(),
            min: 1,
            max: 7 * 24 * 60,
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Time Validators
// =============================================================================

/// A recorded event cannot be in the future relative to `now`.
pub fn validate_not_future(
    field: &str,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ValidationResult<()> {
    if at > now {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "cannot be in the future".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
