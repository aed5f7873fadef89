//! Boundary scaling between token-native decimals and the internal scale.
//!
//! The engines work at a fixed 18-decimal scale regardless of what the tokens
//! themselves use. Callers convert on the way in and out, and the rounding
//! direction is theirs to state: amounts owed to the pool round up, amounts
//! owed to the caller round down.

use crate::errors::MathError;
use ethers::types::U256;

/// Decimal count of the internal scale.
pub const INTERNAL_DECIMALS: u8 = 18;

/// Largest token decimal count the scaler accepts. Nothing legitimate exceeds
/// this; past it the power-of-ten factor itself would overflow.
pub const MAX_TOKEN_DECIMALS: u8 = 36;

/// Rounding direction at the scaling boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

fn factor(token_decimals: u8) -> Result<U256, MathError> {
    if token_decimals > MAX_TOKEN_DECIMALS {
        return Err(MathError::Overflow);
    }
    let diff = (INTERNAL_DECIMALS as i32 - token_decimals as i32).unsigned_abs() as usize;
    Ok(U256::exp10(diff))
}

fn divide(amount: U256, divisor: U256, rounding: Rounding) -> U256 {
    let quotient = amount / divisor;
    match rounding {
        Rounding::Down => quotient,
        Rounding::Up => {
            if (amount % divisor).is_zero() {
                quotient
            } else {
                quotient + U256::one()
            }
        }
    }
}

/// Scales a token-native amount up or down to the internal 18-decimal scale.
pub fn to_internal(
    amount: U256,
    token_decimals: u8,
    rounding: Rounding,
) -> Result<U256, MathError> {
    let factor = factor(token_decimals)?;
    if token_decimals <= INTERNAL_DECIMALS {
        amount.checked_mul(factor).ok_or(MathError::Overflow)
    } else {
        Ok(divide(amount, factor, rounding))
    }
}

/// Scales an internal 18-decimal amount back to the token's native decimals.
pub fn from_internal(
    amount: U256,
    token_decimals: u8,
    rounding: Rounding,
) -> Result<U256, MathError> {
    let factor = factor(token_decimals)?;
    if token_decimals <= INTERNAL_DECIMALS {
        Ok(divide(amount, factor, rounding))
    } else {
        amount.checked_mul(factor).ok_or(MathError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_six_decimal_token_round_trips_exactly() {
        let native = U256::from(1_234_567u64);
        let internal = to_internal(native, 6, Rounding::Down).unwrap();
        assert_eq!(internal, native * U256::exp10(12));
        assert_eq!(from_internal(internal, 6, Rounding::Down).unwrap(), native);
    }

    #[test]
    fn test_eighteen_decimal_token_is_identity() {
        let amount = U256::exp10(18) + U256::from(7u64);
        assert_eq!(to_internal(amount, 18, Rounding::Up).unwrap(), amount);
        assert_eq!(from_internal(amount, 18, Rounding::Down).unwrap(), amount);
    }

    #[test]
    fn test_rounding_direction_on_truncation() {
        // An internal amount with sub-native dust.
        let internal = U256::exp10(12) + U256::one();
        assert_eq!(
            from_internal(internal, 6, Rounding::Down).unwrap(),
            U256::one()
        );
        assert_eq!(
            from_internal(internal, 6, Rounding::Up).unwrap(),
            U256::from(2u64)
        );
    }

    #[test]
    fn test_high_decimal_token_scales_down_on_entry() {
        let native = U256::exp10(24) + U256::one();
        assert_eq!(
            to_internal(native, 24, Rounding::Down).unwrap(),
            U256::exp10(18)
        );
        assert_eq!(
            to_internal(native, 24, Rounding::Up).unwrap(),
            U256::exp10(18) + U256::one()
        );
    }

    #[test]
    fn test_unreasonable_decimals_rejected() {
        assert_eq!(
            to_internal(U256::one(), 37, Rounding::Down),
            Err(MathError::Overflow)
        );
    }
}
