//! Token amounts in base units
//!
//! Amounts are unsigned 128-bit integers in the smallest unit of the payment
//! token (18-decimal tokens fit comfortably). All arithmetic is checked; all
//! division is floor division.

use crate::error::{AgoraError, Result};
use crate::BPS_DENOMINATOR;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount of a fungible token, in base units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Amount(pub u128);

impl Amount {
    /// The zero amount
    pub const ZERO: Amount = Amount(0);

    /// Create an amount from raw base units
    pub fn new(value: u128) -> Self {
        Self(value)
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(AgoraError::AmountOverflow)
    }

    /// Checked subtraction; fails when the result would be negative
    pub fn checked_sub(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(AgoraError::AmountUnderflow)
    }

    /// Floor of `self · bps / 10000`
    pub fn bps(self, bps: u16) -> Result<Amount> {
        let scaled = self
            .0
            .checked_mul(bps as u128)
            .ok_or(AgoraError::AmountOverflow)?;
        Ok(Amount(scaled / BPS_DENOMINATOR))
    }

    /// Floor of half the amount; the residue of an odd split stays with
    /// whoever receives the remainder.
    pub fn half(self) -> Amount {
        Amount(self.0 / 2)
    }
}

impl From<u128> for Amount {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_arithmetic() {
        assert_eq!(
            Amount(100).checked_add(Amount(40)).unwrap(),
            Amount(140)
        );
        assert_eq!(Amount(100).checked_sub(Amount(40)).unwrap(), Amount(60));
        assert!(matches!(
            Amount(1).checked_sub(Amount(2)),
            Err(AgoraError::AmountUnderflow)
        ));
        assert!(matches!(
            Amount(u128::MAX).checked_add(Amount(1)),
            Err(AgoraError::AmountOverflow)
        ));
    }

    #[test]
    fn bps_is_floor_division() {
        // 5000 bps of 120 = 60; 2500 bps of 120 = 30
        assert_eq!(Amount(120).bps(5000).unwrap(), Amount(60));
        assert_eq!(Amount(120).bps(2500).unwrap(), Amount(30));
        // 3333 bps of 100 = 33.33 → 33
        assert_eq!(Amount(100).bps(3333).unwrap(), Amount(33));
        assert_eq!(Amount(7).bps(0).unwrap(), Amount::ZERO);
    }

    #[test]
    fn half_floors_odd_amounts() {
        assert_eq!(Amount(3).half(), Amount(1));
        assert_eq!(Amount(240).half(), Amount(120));
        assert_eq!(Amount(0).half(), Amount::ZERO);
    }
}
