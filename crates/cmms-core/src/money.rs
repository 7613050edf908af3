//! # Money Module
//!
//! Integer-cents money for part unit costs, work-order parts cost and stock
//! valuation.
//!
//! ## Where Money Flows
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Part.unit_cost_cents ──┬──► consumption qty × unit cost ──► WO cost    │
//! │                         │                                               │
//! │                         └──► on-hand × unit cost ──► stock valuation    │
//! │                                                                         │
//! │  Never floats: 0.1 + 0.2 style drift is impossible in i64 cents         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use cmms_core::money::Money;
//!
//! let bearing = Money::from_cents(1250); // $12.50
//! assert_eq!(bearing.extended(4).cents(), 5000);
//! assert_eq!(bearing.to_string(), "$12.50");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// Signed so that valuation deltas and corrections can be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    pub const fn zero() -> Self {
        Money(0)
    }

    /// Extended cost of `quantity` units at this unit price.
    /// Saturates at the i64 bounds.
    #[inline]
    pub const fn extended(&self, quantity: i64) -> Money {
        Money(self.0.saturating_mul(quantity))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-oriented display ("$12.50"). Localized formatting belongs to the
/// presentation layer.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        self.extended(qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
