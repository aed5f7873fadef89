//! Bin/tick reserve accounting.
//!
//! A bin owns a fraction of its tick's pooled reserves proportional to its
//! `tick_balance` share of the tick's total supply. The inverse direction —
//! recovering a tick's liquidity and in-tick price from its reserves — feeds
//! the swap-step calculator.

use crate::errors::MathError;
use crate::math;
use crate::types::Tick;
use ethers::types::{U256, U512};

/// Reserve magnitude below which the liquidity solver shifts its inputs up
/// for extra precision. The exact threshold is part of the mirrored
/// contract's arithmetic and must not be changed.
const PRECISION_BUMP_RESERVE_BITS: usize = 78;
const PRECISION_BUMP_SHIFT: usize = 57;

/// Computes a bin's share of its tick's reserves.
///
/// The explicit `min` guards against proportional rounding handing out more
/// than the tick actually holds.
pub fn bin_reserves(bin_tick_balance: U256, tick: &Tick) -> Result<(U256, U256), MathError> {
    if tick.total_supply.is_zero() {
        return Ok((U256::zero(), U256::zero()));
    }
    let share_a = std::cmp::min(
        tick.reserve_a,
        math::mul_div_floor(tick.reserve_a, bin_tick_balance, tick.total_supply)?,
    );
    let share_b = std::cmp::min(
        tick.reserve_b,
        math::mul_div_floor(tick.reserve_b, bin_tick_balance, tick.total_supply)?,
    );
    Ok((share_a, share_b))
}

/// Values a reserve pair in token-A units at the tick's lower-bound price.
///
/// Used wherever share minting has to be proportional to contributed value:
/// both sides of the proportion go through this same formula, so only
/// internal consistency matters, not the choice of reference price.
pub fn reserve_value(
    reserve_a: U256,
    reserve_b: U256,
    sqrt_lower_price: U256,
) -> Result<U256, MathError> {
    let price_lower = math::mul_floor(sqrt_lower_price, sqrt_lower_price)?;
    let b_value = math::mul_floor(reserve_b, price_lower)?;
    reserve_a.checked_add(b_value).ok_or(MathError::Overflow)
}

/// Integer square root over a 512-bit operand, rounded down.
///
/// Only the liquidity discriminant needs this width; the public `sqrt_int`
/// stays at 256 bits with its fixed 7-step refinement.
fn sqrt_u512(x: U512) -> U512 {
    if x <= U512::one() {
        return x;
    }
    let mut xx = x;
    let mut r = U512::one();
    if xx >= U512::one() << 256 {
        xx >>= 256;
        r <<= 128;
    }
    if xx >= U512::one() << 128 {
        xx >>= 128;
        r <<= 64;
    }
    if xx >= U512::one() << 64 {
        xx >>= 64;
        r <<= 32;
    }
    if xx >= U512::one() << 32 {
        xx >>= 32;
        r <<= 16;
    }
    if xx >= U512::one() << 16 {
        xx >>= 16;
        r <<= 8;
    }
    if xx >= U512::one() << 8 {
        xx >>= 8;
        r <<= 4;
    }
    if xx >= U512::one() << 4 {
        xx >>= 4;
        r <<= 2;
    }
    if xx >= U512::one() << 2 {
        r <<= 1;
    }
    for _ in 0..10 {
        r = (r + x / r) >> 1;
    }
    std::cmp::min(r, x / r)
}

/// Recovers a tick's liquidity from its reserves and boundary prices.
///
/// Within a tick the reserves satisfy `reserve_a = L * (p - lower)` and
/// `reserve_b = L * (1/p - 1/upper)`; eliminating `p` leaves a quadratic in
/// `L` solved here with a full-width discriminant. Reserves that both fit in
/// 78 bits are shifted up 57 bits first and the result shifted back down,
/// reproducing the mirrored contract's precision bump verbatim.
pub fn tick_l(
    reserve_a: U256,
    reserve_b: U256,
    sqrt_lower_price: U256,
    sqrt_upper_price: U256,
) -> Result<U256, MathError> {
    let mut a = reserve_a;
    let mut b = reserve_b;
    let mut bump = 0usize;
    if (a >> PRECISION_BUMP_RESERVE_BITS).is_zero() && (b >> PRECISION_BUMP_RESERVE_BITS).is_zero()
    {
        bump = PRECISION_BUMP_SHIFT;
        a = a << bump;
        b = b << bump;
    }

    let width = sqrt_upper_price
        .checked_sub(sqrt_lower_price)
        .ok_or(MathError::Overflow)?;
    if width.is_zero() {
        return Err(MathError::DivisionByZero);
    }

    if a.is_zero() && b.is_zero() {
        return Ok(U256::zero());
    }
    if b.is_zero() {
        // All token A, price at the upper bound: L = a / (upper - lower).
        return Ok(math::mul_div_floor(a, math::one(), width)? >> bump);
    }
    if a.is_zero() {
        // All token B, price at the lower bound: L = b * lower * upper / (upper - lower).
        let lower_upper = math::mul_floor(sqrt_lower_price, sqrt_upper_price)?;
        return Ok(math::mul_div_floor(b, lower_upper, width)? >> bump);
    }

    // General case: e*L^2 - c*L - a*b = 0 with e = 1 - lower/upper and
    // c = a/upper + b*lower.
    let e = math::one()
        .checked_sub(math::mul_div_floor(sqrt_lower_price, math::one(), sqrt_upper_price)?)
        .ok_or(MathError::Overflow)?;
    let c = math::mul_div_floor(a, math::one(), sqrt_upper_price)?
        .checked_add(math::mul_floor(b, sqrt_lower_price)?)
        .ok_or(MathError::Overflow)?;
    let ab = math::mul_div_floor(a, b, math::one())?;

    let discriminant = U512::from(c) * U512::from(c)
        + U512::from(4u64) * U512::from(ab) * U512::from(e);
    let root = sqrt_u512(discriminant);
    let root = U256::try_from(root).map_err(|_| MathError::Overflow)?;

    let numerator = c.checked_add(root).ok_or(MathError::Overflow)?;
    let two_e = e.checked_mul(U256::from(2u64)).ok_or(MathError::Overflow)?;
    Ok(math::mul_div_floor(numerator, math::one(), two_e)? >> bump)
}

/// Recovers the in-tick square-root price from reserves and liquidity,
/// clamped to the tick's boundary prices.
pub fn tick_sqrt_price_from_reserves(
    reserve_a: U256,
    reserve_b: U256,
    sqrt_lower_price: U256,
    sqrt_upper_price: U256,
    liquidity: U256,
) -> Result<U256, MathError> {
    if reserve_a.is_zero() {
        return Ok(sqrt_lower_price);
    }
    if reserve_b.is_zero() {
        return Ok(sqrt_upper_price);
    }
    let numerator = reserve_a
        .checked_add(math::mul_floor(liquidity, sqrt_lower_price)?)
        .ok_or(MathError::Overflow)?;
    let denominator = reserve_b
        .checked_add(math::mul_div_floor(liquidity, math::one(), sqrt_upper_price)?)
        .ok_or(MathError::Overflow)?;
    if denominator.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let price = math::sqrt_d18(math::div_floor(numerator, denominator)?)?;
    Ok(price.max(sqrt_lower_price).min(sqrt_upper_price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick_math;

    fn tick_with(reserve_a: u128, reserve_b: u128, total_supply: u128) -> Tick {
        Tick {
            reserve_a: U256::from(reserve_a),
            reserve_b: U256::from(reserve_b),
            total_supply: U256::from(total_supply),
            bin_ids_by_kind: [0; 4],
        }
    }

    #[test]
    fn test_bin_reserves_zero_supply() {
        let tick = tick_with(1_000, 2_000, 0);
        assert_eq!(
            bin_reserves(U256::from(10u64), &tick).unwrap(),
            (U256::zero(), U256::zero())
        );
    }

    #[test]
    fn test_bin_reserves_proportional_share() {
        let tick = tick_with(1_000, 500, 100);
        let (a, b) = bin_reserves(U256::from(25u64), &tick).unwrap();
        assert_eq!(a, U256::from(250u64));
        assert_eq!(b, U256::from(125u64));
    }

    #[test]
    fn test_bin_reserves_min_guard() {
        // A balance above the total supply must never pay out more than the
        // tick holds.
        let tick = tick_with(1_000, 500, 100);
        let (a, b) = bin_reserves(U256::from(150u64), &tick).unwrap();
        assert_eq!(a, U256::from(1_000u64));
        assert_eq!(b, U256::from(500u64));
    }

    #[test]
    fn test_tick_l_single_sided() {
        let (lower, upper) = tick_math::tick_sqrt_prices(1, 0).unwrap();
        let b = U256::exp10(24);
        let l = tick_l(U256::zero(), b, lower, upper).unwrap();
        let expected =
            math::mul_div_floor(b, math::mul_floor(lower, upper).unwrap(), upper - lower).unwrap();
        // The precision bump only changes sub-unit rounding.
        let diff = if l > expected { l - expected } else { expected - l };
        assert!(diff <= U256::one(), "single-sided L off by {diff}");
    }

    #[test]
    fn test_tick_l_round_trip() {
        // Build reserves from a known L and price, then recover L.
        let (lower, upper) = tick_math::tick_sqrt_prices(1, 0).unwrap();
        let l = U256::exp10(26);
        let p = (lower + upper) / 2;
        let reserve_a = math::mul_floor(l, p - lower).unwrap();
        let reserve_b = math::mul_div_floor(l, math::one(), p).unwrap()
            - math::mul_div_floor(l, math::one(), upper).unwrap();
        let recovered = tick_l(reserve_a, reserve_b, lower, upper).unwrap();
        let diff = if recovered > l { recovered - l } else { l - recovered };
        // Relative error stays far below a part per million.
        assert!(diff < l / U256::exp10(6), "recovered {recovered} vs {l}");

        let price = tick_sqrt_price_from_reserves(reserve_a, reserve_b, lower, upper, recovered)
            .unwrap();
        let pdiff = if price > p { price - p } else { p - price };
        assert!(pdiff < p / U256::exp10(6), "recovered price {price} vs {p}");
    }

    #[test]
    fn test_price_pins_to_bounds_when_single_sided() {
        let (lower, upper) = tick_math::tick_sqrt_prices(1, 5).unwrap();
        let l = U256::exp10(20);
        assert_eq!(
            tick_sqrt_price_from_reserves(U256::zero(), U256::exp10(18), lower, upper, l).unwrap(),
            lower
        );
        assert_eq!(
            tick_sqrt_price_from_reserves(U256::exp10(18), U256::zero(), lower, upper, l).unwrap(),
            upper
        );
    }
}
