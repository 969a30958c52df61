use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;
use crate::quantity::Quantity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentType {
    Add,
    Subtract,
    Set,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::Add => "ADD",
            AdjustmentType::Subtract => "SUBTRACT",
            AdjustmentType::Set => "SET",
        }
    }
}

impl FromStr for AdjustmentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADD" => Ok(AdjustmentType::Add),
            "SUBTRACT" => Ok(AdjustmentType::Subtract),
            "SET" => Ok(AdjustmentType::Set),
            _ => Err(DomainError::UnknownAdjustmentType(s.to_string())),
        }
    }
}

impl fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A manual stock correction. ADD and SUBTRACT need a positive quantity,
/// SET accepts zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub adjustment_type: AdjustmentType,
    pub quantity: Quantity,
}

impl StockAdjustment {
    pub fn new(adjustment_type: AdjustmentType, quantity: i64) -> Result<Self, DomainError> {
        let quantity = match adjustment_type {
            AdjustmentType::Set => Quantity::try_from(quantity)?,
            AdjustmentType::Add | AdjustmentType::Subtract => Quantity::positive(quantity)?,
        };
        Ok(Self {
            adjustment_type,
            quantity,
        })
    }

    pub fn parse(adjustment_type: &str, quantity: i64) -> Result<Self, DomainError> {
        Self::new(adjustment_type.parse()?, quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_types_case_insensitively() {
        assert_eq!("add".parse::<AdjustmentType>(), Ok(AdjustmentType::Add));
        assert_eq!(" SUBTRACT ".parse::<AdjustmentType>(), Ok(AdjustmentType::Subtract));
        assert_eq!("Set".parse::<AdjustmentType>(), Ok(AdjustmentType::Set));
    }

    #[test]
    fn unknown_type_is_a_domain_error() {
        assert_eq!(
            StockAdjustment::parse("MULTIPLY", 3),
            Err(DomainError::UnknownAdjustmentType("MULTIPLY".to_string()))
        );
    }

    #[test]
    fn set_accepts_zero_but_add_does_not() {
        assert!(StockAdjustment::new(AdjustmentType::Set, 0).is_ok());
        assert_eq!(
            StockAdjustment::new(AdjustmentType::Add, 0),
            Err(DomainError::NonPositiveQuantity)
        );
        assert_eq!(
            StockAdjustment::new(AdjustmentType::Set, -1),
            Err(DomainError::NegativeQuantity(-1))
        );
    }
}
