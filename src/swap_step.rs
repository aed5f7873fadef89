//! Single-tick swap calculator.
//!
//! Given one tick's reserves, liquidity and boundary prices, computes the
//! maximal fill for a requested input or output amount, the residual
//! ("excess") the tick could not absorb, and the in-tick price after the
//! step. Fees come off the gross input before any trading math; a protocol
//! fraction is carved out of the fee and the remainder is credited to the
//! bin's internal balance. Rounding always favors the pool: input
//! requirements round up, outputs round down.

use crate::errors::MathError;
use crate::math;
use crate::types::Delta;
use ethers::types::U256;

/// Scale of the protocol-fee ratio (1e3 = 100% of the fee).
pub const PROTOCOL_FEE_SCALE: u64 = 1_000;

/// Scale of the fractional in-tick position (1e8).
fn fractional_scale() -> U256 {
    U256::exp10(8)
}

/// Snapshot of the tick a swap step trades against.
#[derive(Debug, Clone)]
pub struct TickSwapState {
    pub reserve_a: U256,
    pub reserve_b: U256,
    pub sqrt_lower_price: U256,
    pub sqrt_upper_price: U256,
    pub sqrt_price: U256,
    pub liquidity: U256,
}

impl TickSwapState {
    fn output_reserve(&self, token_a_in: bool) -> U256 {
        if token_a_in {
            self.reserve_b
        } else {
            self.reserve_a
        }
    }

    /// Virtual in-side reserve at the current price, rounded in the pool's
    /// favor (`ceil` when it sizes a required input, `floor` otherwise).
    fn virtual_in(&self, token_a_in: bool, round_up: bool) -> Result<U256, MathError> {
        match (token_a_in, round_up) {
            (true, true) => math::mul_ceil(self.liquidity, self.sqrt_price),
            (true, false) => math::mul_floor(self.liquidity, self.sqrt_price),
            (false, true) => math::div_ceil(self.liquidity, self.sqrt_price),
            (false, false) => math::div_floor(self.liquidity, self.sqrt_price),
        }
    }

    fn virtual_out(&self, token_a_in: bool) -> Result<U256, MathError> {
        if token_a_in {
            math::div_floor(self.liquidity, self.sqrt_price)
        } else {
            math::mul_floor(self.liquidity, self.sqrt_price)
        }
    }
}

/// How much input the tick can absorb before handing out `output` of the
/// opposing token: `in = out * v_in / (v_out - out)` over the virtual
/// reserves, rounded up.
pub fn remaining_bin_input_space_given_output(
    tick: &TickSwapState,
    output: U256,
    token_a_in: bool,
) -> Result<U256, MathError> {
    if output.is_zero() {
        return Ok(U256::zero());
    }
    let v_in = tick.virtual_in(token_a_in, true)?;
    let v_out = tick.virtual_out(token_a_in)?;
    let denominator = math::clip(v_out, output);
    if denominator.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    math::mul_div_ceil(output, v_in, denominator)
}

/// Splits a gross fee between the protocol and the bin; returns the protocol
/// part, rounded up in the protocol's favor.
fn protocol_fee_portion(fee_amount: U256, protocol_fee_ratio: u64) -> Result<U256, MathError> {
    if protocol_fee_ratio == 0 || fee_amount.is_zero() {
        return Ok(U256::zero());
    }
    math::mul_div_ceil(
        fee_amount,
        U256::from(protocol_fee_ratio),
        U256::from(PROTOCOL_FEE_SCALE),
    )
}

/// Derives the in-tick price after absorbing `net_in`, and its fractional
/// position within the tick for TWA bookkeeping.
fn compute_end_price(
    delta: &mut Delta,
    tick: &TickSwapState,
    net_in: U256,
    token_a_in: bool,
) -> Result<(), MathError> {
    let end = if token_a_in {
        // p' = p + in / L
        tick.sqrt_price
            .checked_add(math::mul_div_floor(net_in, math::one(), tick.liquidity)?)
            .ok_or(MathError::Overflow)?
    } else {
        // 1/p' = 1/p + in / L, i.e. p' = L*p / (L + in*p)
        let numerator = math::mul_floor(tick.liquidity, tick.sqrt_price)?;
        let denominator = tick
            .liquidity
            .checked_add(math::mul_floor(net_in, tick.sqrt_price)?)
            .ok_or(MathError::Overflow)?;
        math::mul_div_floor(numerator, math::one(), denominator)?
    };
    let end = end
        .max(tick.sqrt_lower_price)
        .min(tick.sqrt_upper_price);
    delta.end_sqrt_price = end;

    let width = tick.sqrt_upper_price - tick.sqrt_lower_price;
    if width.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let fraction = math::mul_div_floor(
        math::clip(end, tick.sqrt_lower_price),
        fractional_scale(),
        width,
    )?;
    delta.fractional_part = fraction.min(fractional_scale());
    Ok(())
}

/// Pins the end price to the boundary the swap direction runs into.
fn pin_to_edge(delta: &mut Delta, tick: &TickSwapState, token_a_in: bool) {
    if token_a_in {
        delta.end_sqrt_price = tick.sqrt_upper_price;
        delta.fractional_part = fractional_scale();
    } else {
        delta.end_sqrt_price = tick.sqrt_lower_price;
        delta.fractional_part = U256::zero();
    }
}

/// Computes the maximal fill at one tick for a fixed gross input.
pub fn compute_swap_exact_in(
    tick: &TickSwapState,
    amount_in: U256,
    token_a_in: bool,
    fee: U256,
    protocol_fee_ratio: u64,
) -> Result<Delta, MathError> {
    let fee_complement = math::one().checked_sub(fee).ok_or(MathError::Overflow)?;
    let net_in = math::mul_floor(amount_in, fee_complement)?;
    let out_reserve = tick.output_reserve(token_a_in);
    let input_space = remaining_bin_input_space_given_output(tick, out_reserve, token_a_in)?;

    let mut delta = Delta {
        token_a_in,
        exact_output: false,
        sqrt_lower_tick_price: tick.sqrt_lower_price,
        sqrt_upper_tick_price: tick.sqrt_upper_price,
        ..Default::default()
    };

    if net_in < input_space {
        // The tick absorbs the whole request.
        let v_in = tick.virtual_in(token_a_in, false)?;
        let v_out = tick.virtual_out(token_a_in)?;
        let denominator = v_in.checked_add(net_in).ok_or(MathError::Overflow)?;
        let out = math::mul_div_floor(net_in, v_out, denominator)?.min(out_reserve);

        let fee_amount = amount_in - net_in;
        let protocol_fee = protocol_fee_portion(fee_amount, protocol_fee_ratio)?;
        delta.delta_in_erc = amount_in;
        delta.delta_in_bin_internal = math::clip(amount_in, protocol_fee);
        delta.delta_out_erc = out;
        delta.excess = U256::zero();
        compute_end_price(&mut delta, tick, net_in, token_a_in)?;
    } else {
        // The tick is drained; report the leftover input as excess.
        let gross_needed = math::mul_div_ceil(input_space, math::one(), fee_complement)?;
        let gross = gross_needed.min(amount_in);
        let fee_amount = math::clip(gross, input_space);
        let protocol_fee = protocol_fee_portion(fee_amount, protocol_fee_ratio)?;
        delta.delta_in_erc = gross;
        delta.delta_in_bin_internal = math::clip(gross, protocol_fee);
        delta.delta_out_erc = out_reserve;
        delta.excess = math::clip(amount_in, gross);
        pin_to_edge(&mut delta, tick, token_a_in);
    }
    Ok(delta)
}

/// Computes the required input at one tick for a fixed output.
pub fn compute_swap_exact_out(
    tick: &TickSwapState,
    amount_out: U256,
    token_a_in: bool,
    fee: U256,
    protocol_fee_ratio: u64,
) -> Result<Delta, MathError> {
    let fee_complement = math::one().checked_sub(fee).ok_or(MathError::Overflow)?;
    let out_reserve = tick.output_reserve(token_a_in);

    let mut delta = Delta {
        token_a_in,
        exact_output: true,
        sqrt_lower_tick_price: tick.sqrt_lower_price,
        sqrt_upper_tick_price: tick.sqrt_upper_price,
        ..Default::default()
    };

    let (out, excess) = if amount_out < out_reserve {
        (amount_out, U256::zero())
    } else {
        (out_reserve, amount_out - out_reserve)
    };

    let bin_in = remaining_bin_input_space_given_output(tick, out, token_a_in)?;
    let gross = math::mul_div_ceil(bin_in, math::one(), fee_complement)?;
    let fee_amount = math::clip(gross, bin_in);
    let protocol_fee = protocol_fee_portion(fee_amount, protocol_fee_ratio)?;

    delta.delta_in_erc = gross;
    delta.delta_in_bin_internal = math::clip(gross, protocol_fee);
    delta.delta_out_erc = out;
    delta.excess = excess;
    if excess.is_zero() {
        compute_end_price(&mut delta, tick, bin_in, token_a_in)?;
    } else {
        pin_to_edge(&mut delta, tick, token_a_in);
    }
    Ok(delta)
}
