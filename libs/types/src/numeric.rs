//! Fixed-point decimal types for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! A `Price` is always strictly positive; a `Quantity` is never negative.
//! Tick and step alignment is checked against the symbol configuration, not
//! here.

use crate::errors::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use thiserror::Error;

/// Numeric parse / range errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("not a decimal number: {0}")]
    Parse(String),

    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("quantity must not be negative, got {0}")]
    NegativeQuantity(Decimal),
}

/// Execution or limit price, quoted in the symbol's quote currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// Create a price from a whole number of quote units
    ///
    /// # Panics
    /// Panics if `value` is zero
    pub fn from_u64(value: u64) -> Self {
        assert!(value > 0, "Price must be positive");
        Self(Decimal::from(value))
    }

    /// Parse a price from its decimal string form
    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        let value: Decimal = s
            .trim()
            .parse()
            .map_err(|_| NumericError::Parse(s.to_string()))?;
        Self::try_from(value)
    }

    /// Wrap a decimal, returning None unless it is strictly positive
    pub fn try_new(value: Decimal) -> Option<Self> {
        Self::try_from(value).ok()
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Price {
    type Error = NumericError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value <= Decimal::ZERO {
            return Err(NumericError::NonPositivePrice(value));
        }
        Ok(Self(value.normalize()))
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Amount of the base currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Parse a quantity from its decimal string form
    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        let value: Decimal = s
            .trim()
            .parse()
            .map_err(|_| NumericError::Parse(s.to_string()))?;
        Self::try_from(value)
    }

    /// Wrap a decimal, returning None if it is negative
    pub fn try_new(value: Decimal) -> Option<Self> {
        Self::try_from(value).ok()
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Subtract, returning None if the result would go negative
    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        Self::try_new(self.0 - other.0)
    }

    /// Quote value of this quantity at `price`
    pub fn notional(&self, price: Price) -> Result<Decimal, EngineError> {
        self.0.checked_mul(price.as_decimal()).ok_or_else(|| {
            EngineError::InvariantViolation(format!("notional of {} at {} overflows", self.0, price))
        })
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = NumericError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value < Decimal::ZERO {
            return Err(NumericError::NegativeQuantity(value));
        }
        Ok(Self(value.normalize()))
    }
}

impl From<Quantity> for Decimal {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 + rhs.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        self.0 += rhs.0;
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round a decimal down to `dp` places; used where funds are split pro rata.
pub fn round_down(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, rust_decimal::RoundingStrategy::ToZero)
}
