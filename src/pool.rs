//! The bin-liquidity pool engine.
//!
//! [`BinPool`] owns an immutable [`PoolParams`] and a mutable [`PoolState`]
//! and exposes the four state transitions of the mirrored pool: swap,
//! add-liquidity, remove-liquidity and merge-chain migration. Every mutating
//! call runs against a cloned working state and commits only on success, so a
//! failed call can never leave the snapshot partially updated.
//! [`BinPool::estimate_swap`] runs the exact swap path against a discarded
//! clone and is the quoting entry point.

use crate::errors::{MathError, PoolError};
use crate::liquidity;
use crate::math;
use crate::swap_step::{self, TickSwapState};
use crate::tick_math;
use crate::twa;
use crate::types::{
    AddLiquidityParams, Bin, BinDelta, BinKind, Delta, MoveData, PoolParams, PoolState,
    RemoveLiquidityParams, Tick,
};
use ethers::types::U256;
use tracing::{debug, instrument};

/// Merges performed per direction per swap before movement is deferred to a
/// later call.
const MAX_MOVE_MERGES: u32 = 3;

/// Merge-chain hops flattened per migrate pass.
pub const MAX_MIGRATE_DEPTH: u32 = 3;

/// Half a tick at the D8 scale; the TWA must clear the half-tick boundary
/// before movable bins follow it.
const HALF_TICK_D8: i64 = math::D8 / 2;

/// Floor on the LP shares minted by a bin's first deposit. Guards the share
/// price against inflation attacks on near-empty bins.
pub fn minimum_liquidity() -> U256 {
    U256::exp10(8)
}

/// One bin-liquidity pool: fixed parameters plus replayable state.
#[derive(Debug, Clone)]
pub struct BinPool {
    params: PoolParams,
    state: PoolState,
}

impl BinPool {
    pub fn new(params: PoolParams, state: PoolState) -> Self {
        Self { params, state }
    }

    pub fn params(&self) -> &PoolParams {
        &self.params
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    /// Executes a swap and commits the resulting state.
    ///
    /// Returns `(amount_in, amount_out)` at the internal 18-decimal scale.
    /// `tick_limit` bounds how far the active tick may walk; crossing it with
    /// unfilled amount is an error and the state is left untouched.
    #[instrument(skip(self, amount), fields(amount = %amount))]
    pub fn swap(
        &mut self,
        timestamp: u64,
        amount: U256,
        token_a_in: bool,
        exact_output: bool,
        tick_limit: i32,
    ) -> Result<(U256, U256), PoolError> {
        let mut working = self.state.clone();
        let result = Self::swap_inner(
            &mut working,
            &self.params,
            timestamp,
            amount,
            token_a_in,
            exact_output,
            tick_limit,
        )?;
        self.state = working;
        Ok(result)
    }

    /// Quotes a swap against a discarded clone of the state.
    ///
    /// Runs at the state's own timestamp so the TWA and bin layout are not
    /// advanced, which keeps repeated estimates identical.
    pub fn estimate_swap(
        &self,
        amount: U256,
        token_a_in: bool,
        exact_output: bool,
        tick_limit: i32,
    ) -> Result<(U256, U256), PoolError> {
        let mut working = self.state.clone();
        let timestamp = working.last_timestamp;
        Self::swap_inner(
            &mut working,
            &self.params,
            timestamp,
            amount,
            token_a_in,
            exact_output,
            tick_limit,
        )
    }

    fn swap_inner(
        state: &mut PoolState,
        params: &PoolParams,
        timestamp: u64,
        amount: U256,
        token_a_in: bool,
        exact_output: bool,
        tick_limit: i32,
    ) -> Result<(U256, U256), PoolError> {
        if amount.is_zero() {
            return Ok((U256::zero(), U256::zero()));
        }
        if exact_output {
            let available = if token_a_in {
                state.reserve_b
            } else {
                state.reserve_a
            };
            if amount > available {
                return Err(PoolError::InsufficientLiquidity);
            }
        }

        let starting_tick = state.active_tick;
        let prev_twa = state.last_twa_d8;
        let direction: i32 = if token_a_in { 1 } else { -1 };
        let mut delta = Delta::new(amount, token_a_in, exact_output);

        while !delta.excess.is_zero() {
            if (token_a_in && state.active_tick > tick_limit)
                || (!token_a_in && state.active_tick < tick_limit)
            {
                return Err(PoolError::BeyondSwapLimit {
                    tick_limit,
                    excess: delta.excess.to_string(),
                });
            }

            let current = state.active_tick;
            let tick = state.ticks.get(&current).cloned().unwrap_or_default();
            if tick.output_reserve(token_a_in).is_zero() {
                Self::advance_tick(state, params, direction)?;
                continue;
            }

            let (sqrt_lower, sqrt_upper) =
                tick_math::tick_sqrt_prices(params.tick_spacing, current)?;
            let l = liquidity::tick_l(tick.reserve_a, tick.reserve_b, sqrt_lower, sqrt_upper)?;
            if l.is_zero() {
                Self::advance_tick(state, params, direction)?;
                continue;
            }
            let sqrt_price = liquidity::tick_sqrt_price_from_reserves(
                tick.reserve_a,
                tick.reserve_b,
                sqrt_lower,
                sqrt_upper,
                l,
            )?;
            let tick_state = TickSwapState {
                reserve_a: tick.reserve_a,
                reserve_b: tick.reserve_b,
                sqrt_lower_price: sqrt_lower,
                sqrt_upper_price: sqrt_upper,
                sqrt_price,
                liquidity: l,
            };

            let step = if exact_output {
                swap_step::compute_swap_exact_out(
                    &tick_state,
                    delta.excess,
                    token_a_in,
                    params.fee,
                    params.protocol_fee_ratio,
                )?
            } else {
                swap_step::compute_swap_exact_in(
                    &tick_state,
                    delta.excess,
                    token_a_in,
                    params.fee,
                    params.protocol_fee_ratio,
                )?
            };

            let entry = state
                .ticks
                .get_mut(&current)
                .ok_or_else(|| PoolError::InvalidState(format!("tick {current} vanished")))?;
            Self::allocate_swap_values_to_tick(entry, &step, token_a_in)?;
            delta.combine(&step);

            if !delta.excess.is_zero() {
                Self::advance_tick(state, params, direction)?;
            }
        }

        // Record the final in-tick position and let movable bins follow.
        let log_price_d8 =
            state.active_tick as i64 * math::D8 + delta.fractional_part.low_u64() as i64;
        twa::update_value(state, log_price_d8, params.lookback, timestamp);
        Self::move_bins(state, params, starting_tick, state.active_tick, prev_twa)?;

        let (added, removed) = (delta.delta_in_erc, delta.delta_out_erc);
        if token_a_in {
            state.reserve_a = state
                .reserve_a
                .checked_add(added)
                .ok_or(MathError::Overflow)?;
            state.reserve_b = math::clip(state.reserve_b, removed);
        } else {
            state.reserve_b = state
                .reserve_b
                .checked_add(added)
                .ok_or(MathError::Overflow)?;
            state.reserve_a = math::clip(state.reserve_a, removed);
        }
        Ok((added, removed))
    }

    fn advance_tick(
        state: &mut PoolState,
        params: &PoolParams,
        direction: i32,
    ) -> Result<(), PoolError> {
        state.active_tick += direction;
        let sub_tick = state.active_tick.unsigned_abs() as u64 * params.tick_spacing as u64;
        if sub_tick > tick_math::MAX_SUB_TICK {
            return Err(MathError::TickOutOfBounds(state.active_tick).into());
        }
        Ok(())
    }

    /// Credits a step's net input to the tick and debits its output. The
    /// protocol-fee part of the input never reaches the tick.
    fn allocate_swap_values_to_tick(
        tick: &mut Tick,
        step: &Delta,
        token_a_in: bool,
    ) -> Result<(), PoolError> {
        if token_a_in {
            tick.reserve_a = tick
                .reserve_a
                .checked_add(step.delta_in_bin_internal)
                .ok_or(MathError::Overflow)?;
            tick.reserve_b = math::clip(tick.reserve_b, step.delta_out_erc);
        } else {
            tick.reserve_b = tick
                .reserve_b
                .checked_add(step.delta_in_bin_internal)
                .ok_or(MathError::Overflow)?;
            tick.reserve_a = math::clip(tick.reserve_a, step.delta_out_erc);
        }
        Ok(())
    }

    /// Relocates movable bins after a swap, if the TWA crossed a half-tick
    /// boundary. At most one direction moves per call.
    fn move_bins(
        state: &mut PoolState,
        params: &PoolParams,
        start_tick: i32,
        end_tick: i32,
        prev_twa_d8: i64,
    ) -> Result<(), PoolError> {
        let new_twa_d8 = state.last_twa_d8;

        let prev_pos = math::floor_d8(prev_twa_d8 - HALF_TICK_D8);
        let new_pos = math::floor_d8(new_twa_d8 - HALF_TICK_D8);
        if new_pos > prev_pos {
            let target = new_pos;
            let low = start_tick.min(end_tick).min(prev_pos);
            return Self::move_direction(state, params, low, target, true);
        }

        let prev_neg = math::floor_d8(prev_twa_d8 + HALF_TICK_D8);
        let new_neg = math::floor_d8(new_twa_d8 + HALF_TICK_D8);
        if new_neg < prev_neg {
            let target = new_neg;
            let high = start_tick.max(end_tick).max(prev_neg);
            return Self::move_direction(state, params, target, high, false);
        }
        Ok(())
    }

    /// Consolidates and relocates the movable bins of each participating kind
    /// within `[low, high]` onto the direction's boundary tick.
    fn move_direction(
        state: &mut PoolState,
        params: &PoolParams,
        low: i32,
        high: i32,
        positive: bool,
    ) -> Result<(), PoolError> {
        let mut move_data = MoveData {
            search_start: low,
            search_end: high,
            target_tick: if positive { high } else { low },
            ..Default::default()
        };

        for kind in [BinKind::Right, BinKind::Left, BinKind::Both] {
            let participates = if positive {
                kind.moves_right()
            } else {
                kind.moves_left()
            };
            if !participates {
                continue;
            }

            let mut ids = Vec::new();
            for tick in move_data.search_start..=move_data.search_end {
                if let Some(entry) = state.ticks.get(&tick) {
                    let id = entry.bin_ids_by_kind[kind.index()];
                    if id != 0 {
                        ids.push(id);
                    }
                }
            }
            let Some(&first) = ids.iter().min() else {
                continue;
            };
            move_data.first_bin_id = first;
            move_data.first_bin_tick = state
                .bin(first)
                .ok_or(PoolError::BinNotFound(first))?
                .tick;

            // The oldest bin absorbs the rest, up to the per-swap merge
            // budget. If the budget runs out the relocation waits for a later
            // swap so a same-kind straggler can never collide at the target.
            let mut merged_all = true;
            for &id in ids.iter().filter(|&&id| id != first) {
                if move_data.merge_counter >= MAX_MOVE_MERGES {
                    merged_all = false;
                    break;
                }
                let (folded_a, folded_b) =
                    Self::merge_and_decommission_bin(state, params, id, first)?;
                move_data.total_reserve_a = move_data
                    .total_reserve_a
                    .checked_add(folded_a)
                    .ok_or(MathError::Overflow)?;
                move_data.total_reserve_b = move_data
                    .total_reserve_b
                    .checked_add(folded_b)
                    .ok_or(MathError::Overflow)?;
                move_data.merge_counter += 1;
            }

            if merged_all && move_data.first_bin_tick != move_data.target_tick {
                Self::move_bin_to_new_tick(state, params, first, move_data.target_tick)?;
            }
        }

        if move_data.merge_counter > 0 || move_data.first_bin_id != 0 {
            debug!(
                low = move_data.search_start,
                high = move_data.search_end,
                target = move_data.target_tick,
                merges = move_data.merge_counter,
                "moved bins"
            );
        }
        Ok(())
    }

    /// Folds `merged_id` into `target_id`: the merged bin's reserves join the
    /// target's tick, its holders become owners of freshly minted target LP
    /// shares, and the bin itself turns into a forwarding pointer.
    fn merge_and_decommission_bin(
        state: &mut PoolState,
        params: &PoolParams,
        merged_id: u128,
        target_id: u128,
    ) -> Result<(U256, U256), PoolError> {
        let (m_tick, m_kind, m_tick_balance) = {
            let bin = state.bin(merged_id).ok_or(PoolError::BinNotFound(merged_id))?;
            (bin.tick, bin.kind, bin.tick_balance)
        };
        let (t_tick, t_tick_balance, t_total_supply) = {
            let bin = state.bin(target_id).ok_or(PoolError::BinNotFound(target_id))?;
            (bin.tick, bin.tick_balance, bin.total_supply)
        };

        let (folded_a, folded_b) = Self::detach_from_tick(
            state, merged_id, m_tick, m_kind, m_tick_balance,
        )?;

        let (t_lower, _) = tick_math::tick_sqrt_prices(params.tick_spacing, t_tick)?;
        let contributed_value = liquidity::reserve_value(folded_a, folded_b, t_lower)?;

        let (minted_tick_balance, minted_lp) = {
            let dest = state.ticks.entry(t_tick).or_default();
            let (target_a, target_b) = liquidity::bin_reserves(t_tick_balance, dest)?;
            let target_value = liquidity::reserve_value(target_a, target_b, t_lower)?;
            let dest_value = liquidity::reserve_value(dest.reserve_a, dest.reserve_b, t_lower)?;

            let minted_tick_balance = if dest.total_supply.is_zero() || dest_value.is_zero() {
                contributed_value
            } else {
                math::mul_div_floor(dest.total_supply, contributed_value, dest_value)?
            };
            let minted_lp = if t_total_supply.is_zero() || target_value.is_zero() {
                minted_tick_balance
            } else {
                math::mul_div_floor(t_total_supply, contributed_value, target_value)?
            };

            dest.reserve_a = dest
                .reserve_a
                .checked_add(folded_a)
                .ok_or(MathError::Overflow)?;
            dest.reserve_b = dest
                .reserve_b
                .checked_add(folded_b)
                .ok_or(MathError::Overflow)?;
            dest.total_supply = dest
                .total_supply
                .checked_add(minted_tick_balance)
                .ok_or(MathError::Overflow)?;
            (minted_tick_balance, minted_lp)
        };

        {
            let target = state
                .bin_mut(target_id)
                .ok_or(PoolError::BinNotFound(target_id))?;
            target.tick_balance = target
                .tick_balance
                .checked_add(minted_tick_balance)
                .ok_or(MathError::Overflow)?;
            target.total_supply = target
                .total_supply
                .checked_add(minted_lp)
                .ok_or(MathError::Overflow)?;
        }
        {
            let merged = state
                .bin_mut(merged_id)
                .ok_or(PoolError::BinNotFound(merged_id))?;
            merged.merge_id = target_id;
            merged.merge_bin_balance = minted_lp;
            merged.tick_balance = U256::zero();
        }

        debug!(merged_id, target_id, tick = t_tick, "merged bin");
        Ok((folded_a, folded_b))
    }

    /// Relocates a consolidated bin onto `new_tick`, rebasing its tick
    /// balance against whatever already sits there.
    fn move_bin_to_new_tick(
        state: &mut PoolState,
        params: &PoolParams,
        bin_id: u128,
        new_tick: i32,
    ) -> Result<(), PoolError> {
        let (old_tick, kind, tick_balance) = {
            let bin = state.bin(bin_id).ok_or(PoolError::BinNotFound(bin_id))?;
            (bin.tick, bin.kind, bin.tick_balance)
        };
        if old_tick == new_tick {
            return Ok(());
        }

        let (moved_a, moved_b) =
            Self::detach_from_tick(state, bin_id, old_tick, kind, tick_balance)?;

        let (new_lower, _) = tick_math::tick_sqrt_prices(params.tick_spacing, new_tick)?;
        let contributed_value = liquidity::reserve_value(moved_a, moved_b, new_lower)?;

        let minted = {
            let dest = state.ticks.entry(new_tick).or_default();
            if dest.bin_ids_by_kind[kind.index()] != 0 {
                return Err(PoolError::InvalidState(format!(
                    "tick {new_tick} already hosts a bin of the same kind"
                )));
            }
            let dest_value = liquidity::reserve_value(dest.reserve_a, dest.reserve_b, new_lower)?;
            let minted = if dest.total_supply.is_zero() || dest_value.is_zero() {
                contributed_value
            } else {
                math::mul_div_floor(dest.total_supply, contributed_value, dest_value)?
            };
            dest.reserve_a = dest
                .reserve_a
                .checked_add(moved_a)
                .ok_or(MathError::Overflow)?;
            dest.reserve_b = dest
                .reserve_b
                .checked_add(moved_b)
                .ok_or(MathError::Overflow)?;
            dest.total_supply = dest
                .total_supply
                .checked_add(minted)
                .ok_or(MathError::Overflow)?;
            dest.bin_ids_by_kind[kind.index()] = bin_id;
            minted
        };

        let bin = state.bin_mut(bin_id).ok_or(PoolError::BinNotFound(bin_id))?;
        bin.tick = new_tick;
        bin.tick_balance = minted;
        debug!(bin_id, old_tick, new_tick, "relocated bin");
        Ok(())
    }

    /// Pulls a bin's proportional reserves out of its tick, clears its kind
    /// slot and drops the tick entry once nothing references it.
    fn detach_from_tick(
        state: &mut PoolState,
        bin_id: u128,
        tick_index: i32,
        kind: BinKind,
        tick_balance: U256,
    ) -> Result<(U256, U256), PoolError> {
        let entry = state.ticks.get_mut(&tick_index).ok_or_else(|| {
            PoolError::InvalidState(format!("bin {bin_id} references missing tick {tick_index}"))
        })?;
        let (share_a, share_b) = liquidity::bin_reserves(tick_balance, entry)?;
        entry.reserve_a = math::clip(entry.reserve_a, share_a);
        entry.reserve_b = math::clip(entry.reserve_b, share_b);
        entry.total_supply = math::clip(entry.total_supply, tick_balance);
        if entry.bin_ids_by_kind[kind.index()] == bin_id {
            entry.bin_ids_by_kind[kind.index()] = 0;
        }
        let removable = entry.total_supply.is_zero() && entry.bin_ids_by_kind == [0; 4];
        if removable {
            state.ticks.remove(&tick_index);
        }
        Ok((share_a, share_b))
    }

    /// Deposits into one or more bins. Returns the total amounts taken from
    /// the caller and a per-bin breakdown. All-or-nothing: any failing target
    /// rolls back the whole call.
    #[instrument(skip(self, targets), fields(target_count = targets.len()))]
    pub fn add_liquidity(
        &mut self,
        timestamp: u64,
        targets: &[AddLiquidityParams],
    ) -> Result<(U256, U256, Vec<BinDelta>), PoolError> {
        let mut working = self.state.clone();
        let result = Self::add_liquidity_inner(&mut working, &self.params, timestamp, targets)?;
        self.state = working;
        Ok(result)
    }

    fn add_liquidity_inner(
        state: &mut PoolState,
        params: &PoolParams,
        timestamp: u64,
        targets: &[AddLiquidityParams],
    ) -> Result<(U256, U256, Vec<BinDelta>), PoolError> {
        twa::update_value(state, state.last_log_price_d8, params.lookback, timestamp);

        let mut total_a = U256::zero();
        let mut total_b = U256::zero();
        let mut deltas = Vec::with_capacity(targets.len());

        for target in targets {
            let (sqrt_lower, _) = tick_math::tick_sqrt_prices(params.tick_spacing, target.tick)?;
            let snapshot = state.ticks.get(&target.tick).cloned().unwrap_or_default();

            // How much of the offer the tick takes, and the tick shares it
            // mints in exchange.
            let (taken_a, taken_b, minted_tick_balance) = if snapshot.total_supply.is_zero() {
                // An empty tick sits entirely on one side of the active
                // price: token A below it, token B at or above it.
                let (taken_a, taken_b) = if target.tick < state.active_tick {
                    (target.amount_a, U256::zero())
                } else {
                    (U256::zero(), target.amount_b)
                };
                let minted = liquidity::reserve_value(taken_a, taken_b, sqrt_lower)?;
                (taken_a, taken_b, minted)
            } else {
                let supply = snapshot.total_supply;
                let mut minted = U256::MAX;
                if !snapshot.reserve_a.is_zero() {
                    minted = minted.min(math::mul_div_floor(
                        target.amount_a,
                        supply,
                        snapshot.reserve_a,
                    )?);
                }
                if !snapshot.reserve_b.is_zero() {
                    minted = minted.min(math::mul_div_floor(
                        target.amount_b,
                        supply,
                        snapshot.reserve_b,
                    )?);
                }
                if minted == U256::MAX {
                    minted = U256::zero();
                }
                let taken_a = math::mul_div_ceil(minted, snapshot.reserve_a, supply)?;
                let taken_b = math::mul_div_ceil(minted, snapshot.reserve_b, supply)?;
                (taken_a, taken_b, minted)
            };
            if minted_tick_balance.is_zero() {
                return Err(PoolError::ZeroLiquidityAdded);
            }

            let existing_id = snapshot.bin_ids_by_kind[target.kind.index()];
            let (bin_id, minted_lp, first_deposit) = if existing_id != 0 {
                let bin = state
                    .bin(existing_id)
                    .ok_or(PoolError::BinNotFound(existing_id))?;
                let lp = if bin.total_supply.is_zero() || bin.tick_balance.is_zero() {
                    minted_tick_balance
                } else {
                    math::mul_div_floor(bin.total_supply, minted_tick_balance, bin.tick_balance)?
                };
                (existing_id, lp, bin.total_supply.is_zero())
            } else {
                state.bin_counter += 1;
                state.bins.push(Bin {
                    tick: target.tick,
                    kind: target.kind,
                    tick_balance: U256::zero(),
                    total_supply: U256::zero(),
                    merge_id: 0,
                    merge_bin_balance: U256::zero(),
                });
                (state.bin_counter, minted_tick_balance, true)
            };
            if first_deposit && minted_lp < minimum_liquidity() {
                return Err(PoolError::InsufficientLiquidity);
            }

            let entry = state.ticks.entry(target.tick).or_default();
            entry.reserve_a = entry
                .reserve_a
                .checked_add(taken_a)
                .ok_or(MathError::Overflow)?;
            entry.reserve_b = entry
                .reserve_b
                .checked_add(taken_b)
                .ok_or(MathError::Overflow)?;
            entry.total_supply = entry
                .total_supply
                .checked_add(minted_tick_balance)
                .ok_or(MathError::Overflow)?;
            entry.bin_ids_by_kind[target.kind.index()] = bin_id;

            let bin = state.bin_mut(bin_id).ok_or(PoolError::BinNotFound(bin_id))?;
            bin.tick_balance = bin
                .tick_balance
                .checked_add(minted_tick_balance)
                .ok_or(MathError::Overflow)?;
            bin.total_supply = bin
                .total_supply
                .checked_add(minted_lp)
                .ok_or(MathError::Overflow)?;

            state.reserve_a = state
                .reserve_a
                .checked_add(taken_a)
                .ok_or(MathError::Overflow)?;
            state.reserve_b = state
                .reserve_b
                .checked_add(taken_b)
                .ok_or(MathError::Overflow)?;
            total_a = total_a.checked_add(taken_a).ok_or(MathError::Overflow)?;
            total_b = total_b.checked_add(taken_b).ok_or(MathError::Overflow)?;
            deltas.push(BinDelta {
                bin_id,
                kind: target.kind,
                tick: target.tick,
                delta_a: taken_a,
                delta_b: taken_b,
                delta_lp_balance: minted_lp,
            });
        }
        Ok((total_a, total_b, deltas))
    }

    /// Burns LP shares from one or more bins and returns the freed reserves.
    ///
    /// Bins that were merged away are claimed through their (flattened) merge
    /// target; a chain deeper than the migrate pass can flatten in one go is
    /// reported as [`PoolError::MigrateFirst`].
    #[instrument(skip(self, targets), fields(target_count = targets.len()))]
    pub fn remove_liquidity(
        &mut self,
        timestamp: u64,
        targets: &[RemoveLiquidityParams],
    ) -> Result<(U256, U256, Vec<BinDelta>), PoolError> {
        let mut working = self.state.clone();
        let result = Self::remove_liquidity_inner(&mut working, &self.params, timestamp, targets)?;
        self.state = working;
        Ok(result)
    }

    fn remove_liquidity_inner(
        state: &mut PoolState,
        params: &PoolParams,
        timestamp: u64,
        targets: &[RemoveLiquidityParams],
    ) -> Result<(U256, U256, Vec<BinDelta>), PoolError> {
        twa::update_value(state, state.last_log_price_d8, params.lookback, timestamp);

        let mut total_a = U256::zero();
        let mut total_b = U256::zero();
        let mut deltas = Vec::with_capacity(targets.len());

        for target in targets {
            Self::migrate_bins_up_stack_inner(state, target.bin_id, MAX_MIGRATE_DEPTH)?;

            let (kind, tick, merge_id, merge_bin_balance, total_supply) = {
                let bin = state
                    .bin(target.bin_id)
                    .ok_or(PoolError::BinNotFound(target.bin_id))?;
                (
                    bin.kind,
                    bin.tick,
                    bin.merge_id,
                    bin.merge_bin_balance,
                    bin.total_supply,
                )
            };
            if total_supply.is_zero() || target.amount.is_zero() {
                continue;
            }
            let burn = target.amount.min(total_supply);

            let (out_a, out_b) = if merge_id == 0 {
                Self::burn_live_bin(state, target.bin_id, burn)?
            } else {
                let parent = state
                    .bin(merge_id)
                    .ok_or(PoolError::BinNotFound(merge_id))?;
                if parent.merge_id != 0 {
                    return Err(PoolError::MigrateFirst(target.bin_id));
                }
                // Convert the burned share of this bin into LP shares of the
                // merge target and burn those instead.
                let parent_lp = math::mul_div_floor(merge_bin_balance, burn, total_supply)?;
                let outputs = Self::burn_live_bin(state, merge_id, parent_lp)?;
                let bin = state
                    .bin_mut(target.bin_id)
                    .ok_or(PoolError::BinNotFound(target.bin_id))?;
                bin.merge_bin_balance = math::clip(bin.merge_bin_balance, parent_lp);
                bin.total_supply = math::clip(bin.total_supply, burn);
                outputs
            };

            state.reserve_a = math::clip(state.reserve_a, out_a);
            state.reserve_b = math::clip(state.reserve_b, out_b);
            total_a = total_a.checked_add(out_a).ok_or(MathError::Overflow)?;
            total_b = total_b.checked_add(out_b).ok_or(MathError::Overflow)?;
            deltas.push(BinDelta {
                bin_id: target.bin_id,
                kind,
                tick,
                delta_a: out_a,
                delta_b: out_b,
                delta_lp_balance: burn,
            });
        }
        Ok((total_a, total_b, deltas))
    }

    /// Burns `burn` LP shares of a live (non-merged) bin, releasing its
    /// proportional reserves from the tick.
    fn burn_live_bin(
        state: &mut PoolState,
        bin_id: u128,
        burn: U256,
    ) -> Result<(U256, U256), PoolError> {
        let (tick_index, kind, tick_balance, total_supply) = {
            let bin = state.bin(bin_id).ok_or(PoolError::BinNotFound(bin_id))?;
            (bin.tick, bin.kind, bin.tick_balance, bin.total_supply)
        };
        if total_supply.is_zero() || burn.is_zero() {
            return Ok((U256::zero(), U256::zero()));
        }
        let burn = burn.min(total_supply);
        let tick_balance_out = math::mul_div_floor(tick_balance, burn, total_supply)?;

        let fully_burned = burn == total_supply;
        let (out_a, out_b) = {
            let entry = state.ticks.get_mut(&tick_index).ok_or_else(|| {
                PoolError::InvalidState(format!(
                    "bin {bin_id} references missing tick {tick_index}"
                ))
            })?;
            let (out_a, out_b) = liquidity::bin_reserves(tick_balance_out, entry)?;
            entry.reserve_a = math::clip(entry.reserve_a, out_a);
            entry.reserve_b = math::clip(entry.reserve_b, out_b);
            entry.total_supply = math::clip(entry.total_supply, tick_balance_out);
            if fully_burned && entry.bin_ids_by_kind[kind.index()] == bin_id {
                entry.bin_ids_by_kind[kind.index()] = 0;
            }
            let removable = entry.total_supply.is_zero() && entry.bin_ids_by_kind == [0; 4];
            if removable {
                state.ticks.remove(&tick_index);
            }
            (out_a, out_b)
        };

        let bin = state.bin_mut(bin_id).ok_or(PoolError::BinNotFound(bin_id))?;
        bin.tick_balance = math::clip(bin.tick_balance, tick_balance_out);
        bin.total_supply = math::clip(bin.total_supply, burn);
        Ok((out_a, out_b))
    }

    /// Flattens a bin's merge chain so it points directly at a live bin.
    ///
    /// Bounded: follows at most `max_recursion` hops (at least one), so a
    /// pathological chain needs repeated calls rather than unbounded work.
    #[instrument(skip(self))]
    pub fn migrate_bins_up_stack(
        &mut self,
        bin_id: u128,
        max_recursion: u32,
    ) -> Result<(), PoolError> {
        let mut working = self.state.clone();
        Self::migrate_bins_up_stack_inner(&mut working, bin_id, max_recursion)?;
        self.state = working;
        Ok(())
    }

    fn migrate_bins_up_stack_inner(
        state: &mut PoolState,
        bin_id: u128,
        max_recursion: u32,
    ) -> Result<(), PoolError> {
        state.bin(bin_id).ok_or(PoolError::BinNotFound(bin_id))?;
        for _ in 0..max_recursion.max(1) {
            let (parent_id, our_balance) = {
                let bin = state.bin(bin_id).ok_or(PoolError::BinNotFound(bin_id))?;
                (bin.merge_id, bin.merge_bin_balance)
            };
            if parent_id == 0 {
                break;
            }
            let (grandparent_id, parent_merge_balance, parent_supply) = {
                let parent = state.bin(parent_id).ok_or(PoolError::BinNotFound(parent_id))?;
                (parent.merge_id, parent.merge_bin_balance, parent.total_supply)
            };
            if grandparent_id == 0 {
                break;
            }

            // Swap our LP shares of the parent for the grandparent shares
            // they represent, then hop over the parent.
            let converted = if parent_supply.is_zero() {
                U256::zero()
            } else {
                math::mul_div_floor(parent_merge_balance, our_balance, parent_supply)?
            };
            {
                let parent = state
                    .bin_mut(parent_id)
                    .ok_or(PoolError::BinNotFound(parent_id))?;
                parent.merge_bin_balance = math::clip(parent.merge_bin_balance, converted);
                parent.total_supply = math::clip(parent.total_supply, our_balance);
            }
            let bin = state.bin_mut(bin_id).ok_or(PoolError::BinNotFound(bin_id))?;
            bin.merge_id = grandparent_id;
            bin.merge_bin_balance = converted;
        }
        Ok(())
    }
}
