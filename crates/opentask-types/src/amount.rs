//! Reward and balance amounts for OpenTask
//!
//! Amounts are plain integers in minimal currency units. Fractional payouts
//! round down and the remainder goes back to the paying side, so a split
//! never creates or destroys value.

use serde::{Deserialize, Serialize};

/// An amount of value in minimal currency units
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Amount(pub u64);

impl Amount {
    /// The zero amount
    pub fn zero() -> Self {
        Self(0)
    }

    /// Create an amount from minimal units
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Checked addition
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiply by a percentage (0-100), rounding down
    ///
    /// Returns `None` for percentages above 100; the result can never
    /// exceed the original amount.
    pub fn percentage(self, percent: u8) -> Option<Self> {
        if percent > 100 {
            return None;
        }
        Some(Self(((self.0 as u128 * percent as u128) / 100) as u64))
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
