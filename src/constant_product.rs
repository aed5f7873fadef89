//! Constant-product (x*y=k) pricing engine.
//!
//! The simplest member of the engine family; pools with no bin data quote
//! through this path. Fees are expressed in basis points and come off the
//! input before the trade, matching the on-chain router formula.

use crate::errors::{MathError, PoolError};
use ethers::types::{U256, U512};
use tracing::warn;

/// Basis-point denominator (10000 = 100%).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Output for a fixed input:
/// `out = in * (10000 - fee) * reserve_out / (reserve_in * 10000 + in * (10000 - fee))`.
pub fn get_amount_out(
    reserve_in: U256,
    reserve_out: U256,
    amount_in: U256,
    fee_bps: u64,
) -> Result<U256, PoolError> {
    if amount_in.is_zero() {
        return Ok(U256::zero());
    }
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(PoolError::InsufficientLiquidity);
    }
    let fee_multiplier = U512::from(BPS_DENOMINATOR.saturating_sub(fee_bps));

    let amount_in_with_fee = U512::from(amount_in) * fee_multiplier;
    let numerator = amount_in_with_fee
        .checked_mul(U512::from(reserve_out))
        .ok_or(MathError::Overflow)?;
    let denominator = (U512::from(reserve_in) * U512::from(BPS_DENOMINATOR))
        .checked_add(amount_in_with_fee)
        .ok_or(MathError::Overflow)?;
    let out = numerator
        .checked_div(denominator)
        .ok_or(MathError::DivisionByZero)?;
    U256::try_from(out).map_err(|_| MathError::Overflow.into())
}

/// Input required for a fixed output, rounded up by one:
/// `in = reserve_in * out * 10000 / ((reserve_out - out) * (10000 - fee)) + 1`.
pub fn get_amount_in(
    reserve_in: U256,
    reserve_out: U256,
    amount_out: U256,
    fee_bps: u64,
) -> Result<U256, PoolError> {
    if amount_out.is_zero() {
        return Ok(U256::zero());
    }
    if reserve_in.is_zero() || reserve_out.is_zero() || amount_out >= reserve_out {
        return Err(PoolError::InsufficientLiquidity);
    }
    let fee_multiplier = U512::from(BPS_DENOMINATOR.saturating_sub(fee_bps));

    let numerator = U512::from(reserve_in)
        .checked_mul(U512::from(amount_out))
        .ok_or(MathError::Overflow)?
        .checked_mul(U512::from(BPS_DENOMINATOR))
        .ok_or(MathError::Overflow)?;
    let denominator = U512::from(reserve_out - amount_out)
        .checked_mul(fee_multiplier)
        .ok_or(MathError::Overflow)?;
    let amount = numerator
        .checked_div(denominator)
        .ok_or(MathError::DivisionByZero)?
        .checked_add(U512::one())
        .ok_or(MathError::Overflow)?;
    U256::try_from(amount).map_err(|_| MathError::Overflow.into())
}

/// Execution price impact versus the spot rate, in basis points.
pub fn price_impact_bps(
    reserve_in: U256,
    reserve_out: U256,
    amount_in: U256,
    amount_out: U256,
) -> Result<U256, PoolError> {
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(PoolError::InsufficientLiquidity);
    }
    if amount_in.is_zero() {
        return Ok(U256::zero());
    }
    let scale = U512::from(U256::exp10(18));
    let before_rate = U512::from(reserve_out) * scale / U512::from(reserve_in);
    let after_in = U512::from(reserve_in) + U512::from(amount_in);
    let after_out = U512::from(crate::math::clip(reserve_out, amount_out));
    let after_rate = after_out * scale / after_in;
    if before_rate.is_zero() {
        return Err(MathError::DivisionByZero.into());
    }

    let diff = if before_rate > after_rate {
        before_rate - after_rate
    } else {
        after_rate - before_rate
    };
    let impact = diff * U512::from(BPS_DENOMINATOR) / before_rate;
    if impact > U512::from(U256::MAX) {
        warn!("price impact exceeds the working width, clamping");
        return Ok(U256::MAX);
    }
    Ok(U256::try_from(impact).unwrap_or(U256::MAX))
}
