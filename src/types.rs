//! Shared data types for the bin-liquidity pricing engine.
//!
//! `PoolState` is the only persistent entity; it is owned by the caller
//! (usually a state provider replaying on-chain history) and mutated only
//! through the engine operations in [`crate::pool`]. Everything else here is
//! either immutable pool configuration or a transient carrier created and
//! discarded within one engine call.

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of liquidity-shape categories a tick can host.
pub const NUMBER_OF_KINDS: usize = 4;

/// Liquidity-shape category of a bin.
///
/// The kind decides how the bin participates in rebinning: `Static` bins
/// never move, `Right` bins trail a rising TWA, `Left` bins trail a falling
/// TWA, `Both` bins trail it in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinKind {
    Static,
    Right,
    Left,
    Both,
}

impl BinKind {
    /// Slot index inside [`Tick::bin_ids_by_kind`].
    pub fn index(self) -> usize {
        match self {
            BinKind::Static => 0,
            BinKind::Right => 1,
            BinKind::Left => 2,
            BinKind::Both => 3,
        }
    }

    /// Whether the kind participates in a positive-direction (rising TWA) move.
    pub fn moves_right(self) -> bool {
        matches!(self, BinKind::Right | BinKind::Both)
    }

    /// Whether the kind participates in a negative-direction (falling TWA) move.
    pub fn moves_left(self) -> bool {
        matches!(self, BinKind::Left | BinKind::Both)
    }
}

/// Immutable pool configuration, fixed at pool deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolParams {
    /// Swap fee as a 1e18-scaled fraction of the gross input.
    pub fee: U256,
    /// Width of one tick, in units of the base sub-tick.
    pub tick_spacing: u32,
    /// TWA lookback window in seconds.
    pub lookback: u64,
    /// Share of the fee carved out for the protocol, 1e3 scale (0..=1000).
    pub protocol_fee_ratio: u64,
}

/// Aggregate reserves and share supply of all bins anchored to one tick.
///
/// Entries are created lazily on first deposit and deleted when the supply
/// returns to zero. Invariant: `total_supply` equals the sum of
/// `tick_balance` over the bins listed in `bin_ids_by_kind`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tick {
    pub reserve_a: U256,
    pub reserve_b: U256,
    pub total_supply: U256,
    /// At most one bin id per kind; 0 is the "no bin" sentinel.
    pub bin_ids_by_kind: [u128; NUMBER_OF_KINDS],
}

impl Tick {
    /// The reserve a swap in the given direction can draw from.
    pub fn output_reserve(&self, token_a_in: bool) -> U256 {
        if token_a_in {
            self.reserve_b
        } else {
            self.reserve_a
        }
    }
}

/// A liquidity position anchored to one tick and one kind.
///
/// A bin with `merge_id != 0` is a decommissioned forwarding pointer: its
/// stake lives on as `merge_bin_balance` LP shares of the merge target, and
/// chains of such pointers are flattened by a bounded migrate pass before
/// removal logic reads them. `(tick_balance, total_supply)` change only
/// through add/remove/merge/relocate, never through swaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bin {
    pub tick: i32,
    pub kind: BinKind,
    /// This bin's share units of its tick's `total_supply`.
    pub tick_balance: U256,
    /// LP shares issued by this bin.
    pub total_supply: U256,
    /// 0, or the id of the bin this one has been folded into.
    pub merge_id: u128,
    /// LP shares of the merge target owned by this bin; valid only while
    /// `merge_id != 0`.
    pub merge_bin_balance: U256,
}

/// The persistent state of one bin-liquidity pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolState {
    /// The tick currently being traded against.
    pub active_tick: i32,
    /// Pool-level token balances at the internal 18-decimal scale.
    pub reserve_a: U256,
    pub reserve_b: U256,
    /// Smoothed and instantaneous log-price, 1e8 scale.
    pub last_twa_d8: i64,
    pub last_log_price_d8: i64,
    /// Timestamp of the last state update; 0 means uninitialized.
    pub last_timestamp: u64,
    /// Monotonic bin-id allocator; ids are 1-based and never reused.
    pub bin_counter: u128,
    /// Bin arena indexed by `id - 1`.
    pub bins: Vec<Bin>,
    /// Sparse tick table.
    pub ticks: HashMap<i32, Tick>,
}

impl PoolState {
    pub fn new(active_tick: i32) -> Self {
        Self {
            active_tick,
            reserve_a: U256::zero(),
            reserve_b: U256::zero(),
            last_twa_d8: 0,
            last_log_price_d8: 0,
            last_timestamp: 0,
            bin_counter: 0,
            bins: Vec::new(),
            ticks: HashMap::new(),
        }
    }

    pub fn bin(&self, bin_id: u128) -> Option<&Bin> {
        if bin_id == 0 {
            return None;
        }
        self.bins.get(bin_id as usize - 1)
    }

    pub fn bin_mut(&mut self, bin_id: u128) -> Option<&mut Bin> {
        if bin_id == 0 {
            return None;
        }
        self.bins.get_mut(bin_id as usize - 1)
    }
}

/// Transient swap accounting, created and discarded within one swap call.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    /// Gross input consumed from the caller.
    pub delta_in_erc: U256,
    /// Input credited to bins, net of the protocol fee.
    pub delta_in_bin_internal: U256,
    /// Output produced for the caller.
    pub delta_out_erc: U256,
    /// Amount still to fill; the swap loop runs until this reaches zero.
    pub excess: U256,
    pub token_a_in: bool,
    pub exact_output: bool,
    /// Square-root prices bounding the tick of the latest step.
    pub sqrt_lower_tick_price: U256,
    pub sqrt_upper_tick_price: U256,
    /// In-tick square-root price at the end of the step.
    pub end_sqrt_price: U256,
    /// Fractional position of the final price within the tick, 1e8 scale.
    pub fractional_part: U256,
}

impl Delta {
    pub fn new(amount: U256, token_a_in: bool, exact_output: bool) -> Self {
        Self {
            excess: amount,
            token_a_in,
            exact_output,
            ..Default::default()
        }
    }

    /// Folds a single-tick step into the running totals.
    pub fn combine(&mut self, step: &Delta) {
        self.delta_in_erc = self.delta_in_erc.saturating_add(step.delta_in_erc);
        self.delta_in_bin_internal = self
            .delta_in_bin_internal
            .saturating_add(step.delta_in_bin_internal);
        self.delta_out_erc = self.delta_out_erc.saturating_add(step.delta_out_erc);
        self.excess = step.excess;
        self.sqrt_lower_tick_price = step.sqrt_lower_tick_price;
        self.sqrt_upper_tick_price = step.sqrt_upper_tick_price;
        self.end_sqrt_price = step.end_sqrt_price;
        self.fractional_part = step.fractional_part;
    }
}

/// Transient bookkeeping for one rebinning direction.
#[derive(Debug, Clone, Default)]
pub struct MoveData {
    /// Inclusive tick range the move is allowed to scan.
    pub search_start: i32,
    pub search_end: i32,
    /// Boundary tick the consolidated bin relocates to.
    pub target_tick: i32,
    /// Destination (lowest-id) bin and its tick before relocation.
    pub first_bin_id: u128,
    pub first_bin_tick: i32,
    /// Reserves folded in so far.
    pub total_reserve_a: U256,
    pub total_reserve_b: U256,
    /// Merges performed; bounded per direction per swap.
    pub merge_counter: u32,
}

/// One add-liquidity target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLiquidityParams {
    pub kind: BinKind,
    pub tick: i32,
    /// Caller-offered amounts; the engine takes the proportional subset.
    pub amount_a: U256,
    pub amount_b: U256,
}

/// One remove-liquidity target: burn `amount` LP shares of `bin_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveLiquidityParams {
    pub bin_id: u128,
    pub amount: U256,
}

/// Per-bin result of a liquidity operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinDelta {
    pub bin_id: u128,
    pub kind: BinKind,
    pub tick: i32,
    pub delta_a: U256,
    pub delta_b: U256,
    pub delta_lp_balance: U256,
}
