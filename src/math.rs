//! Fixed-point primitives shared by every pricing engine.
//!
//! All amounts are unsigned 256-bit at an internal 1e18 scale. Intermediate
//! products go through `U512` so that a multiply-divide never loses precision;
//! a result that does not fit the working 256-bit width is an [`MathError::Overflow`].
//! Rounding direction is always explicit at the call site: `_floor` variants
//! round toward zero, `_ceil` variants round away from it.

use crate::errors::MathError;
use ethers::types::{U256, U512};

/// The internal fixed-point base: 1e18.
pub fn one() -> U256 {
    U256::exp10(18)
}

/// One D8 unit (1e8), the scale of log-price and TWA values.
pub const D8: i64 = 100_000_000;

/// Computes `floor(x * y / k)` with a full-width intermediate product.
#[inline]
pub fn mul_div_floor(x: U256, y: U256, k: U256) -> Result<U256, MathError> {
    if k.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let product = U512::from(x)
        .checked_mul(U512::from(y))
        .ok_or(MathError::Overflow)?;
    let result = product
        .checked_div(U512::from(k))
        .ok_or(MathError::DivisionByZero)?;
    if result > U512::from(U256::MAX) {
        return Err(MathError::Overflow);
    }
    Ok(U256::try_from(result).map_err(|_| MathError::Overflow)?)
}

/// Computes `ceil(x * y / k)` with a full-width intermediate product.
#[inline]
pub fn mul_div_ceil(x: U256, y: U256, k: U256) -> Result<U256, MathError> {
    if k.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let product = U512::from(x)
        .checked_mul(U512::from(y))
        .ok_or(MathError::Overflow)?;
    let k512 = U512::from(k);
    let mut result = product
        .checked_div(k512)
        .ok_or(MathError::DivisionByZero)?;
    let remainder = product.checked_rem(k512).unwrap_or_default();
    if !remainder.is_zero() {
        result = result
            .checked_add(U512::one())
            .ok_or(MathError::Overflow)?;
    }
    if result > U512::from(U256::MAX) {
        return Err(MathError::Overflow);
    }
    Ok(U256::try_from(result).map_err(|_| MathError::Overflow)?)
}

/// `floor(x * y / 1e18)`.
#[inline]
pub fn mul_floor(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div_floor(x, y, one())
}

/// `ceil(x * y / 1e18)`.
#[inline]
pub fn mul_ceil(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div_ceil(x, y, one())
}

/// `floor(x * 1e18 / y)`.
#[inline]
pub fn div_floor(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div_floor(x, one(), y)
}

/// `ceil(x * 1e18 / y)`.
#[inline]
pub fn div_ceil(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div_ceil(x, one(), y)
}

/// Saturating subtraction: `max(0, x - y)`.
#[inline]
pub fn clip(x: U256, y: U256) -> U256 {
    if x < y {
        U256::zero()
    } else {
        x - y
    }
}

/// Integer square root, rounded down.
///
/// An initial guess is produced by halving the bit length through a shift
/// ladder, then refined with 7 Newton-Raphson steps. The final `min` corrects
/// the one case where Newton's method lands one above the floor.
pub fn sqrt_int(x: U256) -> U256 {
    if x <= U256::one() {
        return x;
    }
    let mut xx = x;
    let mut r = U256::one();
    if xx >= U256::one() << 128 {
        xx >>= 128;
        r <<= 64;
    }
    if xx >= U256::one() << 64 {
        xx >>= 64;
        r <<= 32;
    }
    if xx >= U256::one() << 32 {
        xx >>= 32;
        r <<= 16;
    }
    if xx >= U256::one() << 16 {
        xx >>= 16;
        r <<= 8;
    }
    if xx >= U256::one() << 8 {
        xx >>= 8;
        r <<= 4;
    }
    if xx >= U256::one() << 4 {
        xx >>= 4;
        r <<= 2;
    }
    if xx >= U256::one() << 2 {
        r <<= 1;
    }
    for _ in 0..7 {
        r = (r + x / r) >> 1;
    }
    std::cmp::min(r, x / r)
}

/// Square root of a 1e18-scaled value, returned at the 1e18 scale.
pub fn sqrt_d18(x: U256) -> Result<U256, MathError> {
    let scaled = x.checked_mul(one()).ok_or(MathError::Overflow)?;
    Ok(sqrt_int(scaled))
}

/// Floors a signed D8 value toward negative infinity, returning whole units.
///
/// Plain integer division truncates toward zero, which is wrong for negative
/// TWA values: `-0.5` must floor to `-1`, not `0`. Euclidean division gives
/// the sign-aware behavior the tick comparisons depend on.
#[inline]
pub fn floor_d8(v: i64) -> i32 {
    v.div_euclid(D8) as i32
}

/// Reinterprets the low 128 bits of an unsigned value as a two's-complement
/// signed integer, matching the fixed-width truncation the mirrored contract
/// applies to tick-balance deltas.
#[inline]
pub fn wrap_i128(x: U256) -> i128 {
    x.low_u128() as i128
}
