//! Tick price geometry.
//!
//! Converts an integer tick index into the pair of 1e18-scaled square-root
//! prices bounding that tick. The conversion walks a ladder of per-bit magic
//! constants at 128-bit scale, one constant per bit of `|tick| * tick_spacing`,
//! and inverts the accumulated ratio for positive ticks. Two independent
//! implementations quoting the same pool must agree on these values
//! bit-for-bit, so the ladder constants and rounding are fixed and must not
//! be "improved".

use crate::errors::MathError;
use crate::math;
use ethers::types::{U256, U512};

/// Largest supported `|tick| * tick_spacing`.
pub const MAX_SUB_TICK: u64 = 460_540;

/// Per-bit multipliers for the sqrt-price ladder, 128-bit fixed point.
/// `LADDER[i]` is the square-root price ratio contributed by bit `i` of the
/// sub-index.
const LADDER: [u128; 19] = [
    0xfffcb933bd6fad37aa2d162d1a594001,
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
];

/// Multiplies two 128-bit fixed-point ratios, keeping the 128-bit scale.
#[inline]
fn mul_shift(val: U256, mul: U256) -> U256 {
    let product = U512::from(val) * U512::from(mul);
    U256::try_from(product >> 128).unwrap_or(U256::MAX)
}

/// Returns the square-root price at the lower boundary of `tick`, 1e18 scale.
pub fn tick_sqrt_price(tick_spacing: u32, tick: i32) -> Result<U256, MathError> {
    let sub_tick = tick.unsigned_abs() as u64 * tick_spacing as u64;
    if sub_tick > MAX_SUB_TICK {
        return Err(MathError::TickOutOfBounds(tick));
    }

    let mut ratio = if sub_tick & 1 != 0 {
        U256::from(LADDER[0])
    } else {
        U256::one() << 128
    };
    for (bit, multiplier) in LADDER.iter().enumerate().skip(1) {
        if sub_tick & (1u64 << bit) != 0 {
            ratio = mul_shift(ratio, U256::from(*multiplier));
        }
    }

    // The ladder accumulates the ratio for negative ticks; positive ticks take
    // the full-width reciprocal.
    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Scale from 128-bit fixed point to the 1e18 working base.
    let scaled = (U512::from(ratio) * U512::from(math::one())) >> 128;
    U256::try_from(scaled).map_err(|_| MathError::Overflow)
}

/// Returns `(sqrt_lower, sqrt_upper)` for `tick`: the square-root prices at
/// the tick's lower and upper boundaries.
pub fn tick_sqrt_prices(tick_spacing: u32, tick: i32) -> Result<(U256, U256), MathError> {
    let lower = tick_sqrt_price(tick_spacing, tick)?;
    let upper = tick_sqrt_price(
        tick_spacing,
        tick.checked_add(1).ok_or(MathError::TickOutOfBounds(tick))?,
    )?;
    Ok((lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_zero_is_unit_price() {
        assert_eq!(tick_sqrt_price(1, 0).unwrap(), math::one());
    }

    #[test]
    fn test_prices_increase_with_tick() {
        let mut last = tick_sqrt_price(1, -5).unwrap();
        for tick in -4..=5 {
            let price = tick_sqrt_price(1, tick).unwrap();
            assert!(price > last, "price must grow with tick, failed at {tick}");
            last = price;
        }
    }

    #[test]
    fn test_spacing_scales_the_sub_index() {
        // One tick at spacing 10 covers the same range as ten ticks at spacing 1.
        assert_eq!(
            tick_sqrt_price(10, 3).unwrap(),
            tick_sqrt_price(1, 30).unwrap()
        );
    }

    #[test]
    fn test_ladder_symmetry() {
        // tick_sqrt_price(t) * tick_sqrt_price(-t) ~= 1 at the working scale.
        let one_sq = U512::from(math::one()) * U512::from(math::one());
        for &tick in &[1i32, 7, 100, 1_000, 25_000, 46_054] {
            let pos = tick_sqrt_price(10, tick).unwrap();
            let neg = tick_sqrt_price(10, -tick).unwrap();
            let product = U512::from(pos) * U512::from(neg);
            let diff = if product > one_sq {
                product - one_sq
            } else {
                one_sq - product
            };
            // Truncation to 1e18 loses up to one unit per factor.
            let tolerance = U512::from(pos) + U512::from(neg) + U512::from(2u64);
            assert!(diff <= tolerance, "asymmetry at tick {tick}: {diff}");
        }
    }

    #[test]
    fn test_sub_index_bound() {
        assert!(tick_sqrt_price(1, 460_540).is_ok());
        assert_eq!(
            tick_sqrt_price(1, 460_541),
            Err(MathError::TickOutOfBounds(460_541))
        );
        assert_eq!(
            tick_sqrt_price(10, -46_055),
            Err(MathError::TickOutOfBounds(-46_055))
        );
    }

    #[test]
    fn test_tick_bounds_pair() {
        let (lower, upper) = tick_sqrt_prices(1, 0).unwrap();
        assert_eq!(lower, math::one());
        assert!(upper > lower);
        // sqrt(1.0001) at 1e18 scale is 1.000049998750062496...
        let reference = U256::from_dec_str("1000049998750062496").unwrap();
        let diff = if upper > reference {
            upper - reference
        } else {
            reference - upper
        };
        assert!(diff <= U256::one(), "upper bound off by {diff}");
    }
}
