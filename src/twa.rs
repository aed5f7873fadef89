//! Time-weighted average tracker for the pool's log-price.
//!
//! The TWA decays toward the instantaneous log price by the fraction of the
//! lookback window that has elapsed since the last update, and never
//! overshoots it. All values are signed, 1e8 scale.

use crate::types::PoolState;

/// Returns the TWA as of `timestamp` without mutating state.
///
/// The elapsed time is capped at the lookback window, so after a full quiet
/// window the TWA lands exactly on the last recorded log price.
pub fn get_twa(state: &PoolState, lookback: u64, timestamp: u64) -> i64 {
    let elapsed = timestamp.saturating_sub(state.last_timestamp);
    let time_diff = elapsed.min(lookback);
    if time_diff == 0 || lookback == 0 {
        return state.last_twa_d8;
    }

    let gap = state.last_log_price_d8 - state.last_twa_d8;
    let step = ((gap.unsigned_abs() as u128 * time_diff as u128) / lookback as u128) as i64;
    if gap >= 0 {
        state.last_twa_d8 + step
    } else {
        state.last_twa_d8 - step
    }
}

/// Records a new instantaneous log-price observation at `timestamp`.
///
/// A repeated timestamp is a no-op: the first observation in a block wins,
/// matching the mirrored contract. Otherwise the TWA is rolled forward to
/// `timestamp` before the new value replaces the stored log price.
pub fn update_value(state: &mut PoolState, new_value_d8: i64, lookback: u64, timestamp: u64) {
    if timestamp == state.last_timestamp {
        return;
    }
    state.last_twa_d8 = get_twa(state, lookback, timestamp);
    state.last_timestamp = timestamp;
    state.last_log_price_d8 = new_value_d8;
}
