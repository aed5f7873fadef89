//! Quoting layer over the pricing engines.
//!
//! Batch-quotes candidate trade sizes against a pool snapshot. A candidate
//! that cannot be priced (beyond the pool's range, insufficient liquidity,
//! arithmetic overflow) yields `None` rather than aborting the batch; callers
//! treat that as "no price at this size". Each quote carries a static gas
//! estimate for the engine that produced it.

use crate::pool::BinPool;
use ethers::types::U256;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Pricing engine families the quoting layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineKind {
    ConstantProduct,
    BinLiquidity,
}

/// Static per-engine gas estimates for a single swap.
/// Rough figures for typical swap transactions; the bin engine pays for the
/// tick walk and possible bin moves.
static GAS_ESTIMATES: Lazy<BTreeMap<EngineKind, u64>> = Lazy::new(|| {
    let mut m = BTreeMap::new();
    m.insert(EngineKind::ConstantProduct, 120_000);
    m.insert(EngineKind::BinLiquidity, 180_000);
    m
});

/// Returns the static gas estimate for one swap on the given engine.
pub fn estimate_gas(engine: EngineKind) -> u64 {
    GAS_ESTIMATES.get(&engine).copied().unwrap_or(200_000)
}

/// One priced candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub amount_in: U256,
    pub amount_out: U256,
    pub gas_estimate: u64,
}

/// Quotes each candidate amount against the pool snapshot.
///
/// Entries line up with `amounts`; a `None` means that candidate has no
/// price. The snapshot is never mutated.
#[instrument(skip(pool, amounts), fields(candidates = amounts.len()))]
pub fn quote_amounts(
    pool: &BinPool,
    amounts: &[U256],
    token_a_in: bool,
    exact_output: bool,
    tick_limit: i32,
) -> Vec<Option<Quote>> {
    amounts
        .iter()
        .map(|&amount| {
            match pool.estimate_swap(amount, token_a_in, exact_output, tick_limit) {
                Ok((amount_in, amount_out)) => Some(Quote {
                    amount_in,
                    amount_out,
                    gas_estimate: estimate_gas(EngineKind::BinLiquidity),
                }),
                Err(err) => {
                    debug!(%amount, %err, "candidate has no price");
                    None
                }
            }
        })
        .collect()
}

/// Convenience wrapper for a single exact-input quote; errors collapse to
/// `None` the same way the batch path does.
pub fn quote_exact_in(pool: &BinPool, amount_in: U256, token_a_in: bool) -> Option<Quote> {
    let tick_limit = if token_a_in { i32::MAX } else { i32::MIN };
    quote_amounts(pool, &[amount_in], token_a_in, false, tick_limit)
        .pop()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddLiquidityParams, BinKind, PoolParams, PoolState};

    fn pool() -> BinPool {
        let params = PoolParams {
            fee: U256::exp10(15),
            tick_spacing: 1,
            lookback: 3600,
            protocol_fee_ratio: 0,
        };
        let mut pool = BinPool::new(params, PoolState::new(0));
        pool.add_liquidity(
            1,
            &[AddLiquidityParams {
                kind: BinKind::Static,
                tick: 0,
                amount_a: U256::zero(),
                amount_b: U256::exp10(24),
            }],
        )
        .unwrap();
        pool
    }

    #[test]
    fn test_failed_candidate_does_not_abort_batch() {
        let pool = pool();
        // Second candidate asks for more output than the pool holds.
        let quotes = quote_amounts(
            &pool,
            &[U256::exp10(18), U256::exp10(27), U256::exp10(19)],
            true,
            true,
            i32::MAX,
        );
        assert_eq!(quotes.len(), 3);
        assert!(quotes[0].is_some());
        assert!(quotes[1].is_none());
        assert!(quotes[2].is_some());
    }

    #[test]
    fn test_quotes_do_not_mutate_the_snapshot() {
        let pool = pool();
        let before = serde_json::to_string(pool.state()).unwrap();
        let first = quote_exact_in(&pool, U256::exp10(20), true).unwrap();
        let second = quote_exact_in(&pool, U256::exp10(20), true).unwrap();
        assert_eq!(first, second);
        assert_eq!(serde_json::to_string(pool.state()).unwrap(), before);
    }

    #[test]
    fn test_gas_estimates_cover_known_engines() {
        assert_eq!(estimate_gas(EngineKind::ConstantProduct), 120_000);
        assert!(estimate_gas(EngineKind::BinLiquidity) > estimate_gas(EngineKind::ConstantProduct));
    }
}
