use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DomainError;

/// A count of stock units. Never negative and never above `i32::MAX`, so it
/// always fits the `INT4` columns it is persisted in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(u32);

impl Quantity {
    pub const MAX_VALUE: u32 = i32::MAX as u32;
    pub const ZERO: Quantity = Quantity(0);
    pub const ONE: Quantity = Quantity(1);

    pub fn new(value: u32) -> Result<Self, DomainError> {
        if value > Self::MAX_VALUE {
            return Err(DomainError::QuantityOutOfRange(i64::from(value)));
        }
        Ok(Self(value))
    }

    pub(crate) const fn new_const(value: u32) -> Self {
        assert!(value <= Self::MAX_VALUE);
        Self(value)
    }

    /// Accepts only strictly positive values; used for every mutating argument.
    pub fn positive(value: i64) -> Result<Self, DomainError> {
        let quantity = Self::try_from(value)?;
        quantity.ensure_positive()?;
        Ok(quantity)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn ensure_positive(self) -> Result<(), DomainError> {
        if self.is_zero() {
            return Err(DomainError::NonPositiveQuantity);
        }
        Ok(())
    }

    pub fn checked_add(self, other: Quantity) -> Result<Quantity, DomainError> {
        let sum = i64::from(self.0) + i64::from(other.0);
        Quantity::try_from(sum)
    }

    /// Fails instead of going below zero.
    pub fn checked_sub(self, other: Quantity) -> Result<Quantity, DomainError> {
        let difference = i64::from(self.0) - i64::from(other.0);
        Quantity::try_from(difference)
    }

    pub fn to_i32(self) -> i32 {
        // MAX_VALUE == i32::MAX
        self.0 as i32
    }
}

impl TryFrom<i64> for Quantity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 0 {
            return Err(DomainError::NegativeQuantity(value));
        }
        if value > i64::from(Self::MAX_VALUE) {
            return Err(DomainError::QuantityOutOfRange(value));
        }
        Ok(Self(value as u32))
    }
}

impl TryFrom<i32> for Quantity {
    type Error = DomainError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::try_from(i64::from(value))
    }
}

impl From<Quantity> for i64 {
    fn from(quantity: Quantity) -> Self {
        i64::from(quantity.0)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
