//! Add/remove liquidity and merge-chain bookkeeping.

use amm_pricer::types::{AddLiquidityParams, RemoveLiquidityParams};
use amm_pricer::{Bin, BinKind, BinPool, PoolError, PoolParams, PoolState};
use ethers::types::U256;

fn params() -> PoolParams {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    PoolParams {
        fee: U256::zero(),
        tick_spacing: 1,
        lookback: 3600,
        protocol_fee_ratio: 0,
    }
}

fn deposit(kind: BinKind, tick: i32, amount_a: U256, amount_b: U256) -> AddLiquidityParams {
    AddLiquidityParams {
        kind,
        tick,
        amount_a,
        amount_b,
    }
}

#[test]
fn test_add_remove_round_trip() {
    let mut pool = BinPool::new(params(), PoolState::new(0));
    let amount = U256::exp10(21) + U256::from(17u64);
    let (taken_a, taken_b, deltas) = pool
        .add_liquidity(1, &[deposit(BinKind::Static, 0, U256::zero(), amount)])
        .unwrap();
    assert!(taken_a.is_zero());
    assert_eq!(taken_b, amount);
    assert_eq!(deltas.len(), 1);
    let bin_id = deltas[0].bin_id;
    let lp = deltas[0].delta_lp_balance;

    let (out_a, out_b, _) = pool
        .remove_liquidity(
            2,
            &[RemoveLiquidityParams {
                bin_id,
                amount: lp,
            }],
        )
        .unwrap();
    assert!(out_a.is_zero());
    // Floor rounding keeps the payout at or just under the deposit.
    assert!(out_b <= amount);
    assert!(out_b >= amount - U256::from(2u64));
    assert!(pool.state().reserve_b <= U256::from(2u64));
    // The fully burned bin released its tick.
    assert!(pool.state().ticks.is_empty());
}

#[test]
fn test_second_deposit_is_proportional_and_pool_favored() {
    let mut pool = BinPool::new(params(), PoolState::new(0));
    let first = U256::exp10(20) + U256::from(7u64);
    pool.add_liquidity(1, &[deposit(BinKind::Static, 0, U256::zero(), first)])
        .unwrap();

    // Offer both tokens; a tick above the active price only takes B.
    let (taken_a, taken_b, deltas) = pool
        .add_liquidity(
            2,
            &[deposit(
                BinKind::Static,
                0,
                U256::exp10(20),
                U256::exp10(19) + U256::from(3u64),
            )],
        )
        .unwrap();
    assert!(taken_a.is_zero());
    assert!(taken_b <= U256::exp10(19) + U256::from(3u64));

    // Removing the freshly minted shares can never pay out more than the
    // deposit took.
    let (_, out_b, _) = pool
        .remove_liquidity(
            3,
            &[RemoveLiquidityParams {
                bin_id: deltas[0].bin_id,
                amount: deltas[0].delta_lp_balance,
            }],
        )
        .unwrap();
    assert!(out_b <= taken_b);
}

#[test]
fn test_empty_tick_takes_one_side_only() {
    let mut pool = BinPool::new(params(), PoolState::new(0));
    // Below the active tick: token A territory, so a B-only offer is rejected.
    let err = pool
        .add_liquidity(
            1,
            &[deposit(BinKind::Static, -5, U256::zero(), U256::exp10(20))],
        )
        .unwrap_err();
    assert_eq!(err, PoolError::ZeroLiquidityAdded);

    // Same offer with token A succeeds and ignores the B side.
    let (taken_a, taken_b, _) = pool
        .add_liquidity(
            1,
            &[deposit(
                BinKind::Static,
                -5,
                U256::exp10(20),
                U256::exp10(20),
            )],
        )
        .unwrap();
    assert_eq!(taken_a, U256::exp10(20));
    assert!(taken_b.is_zero());
}

#[test]
fn test_first_deposit_minimum_liquidity() {
    let mut pool = BinPool::new(params(), PoolState::new(0));
    let err = pool
        .add_liquidity(
            1,
            &[deposit(
                BinKind::Static,
                0,
                U256::zero(),
                U256::from(99_999_999u64),
            )],
        )
        .unwrap_err();
    assert_eq!(err, PoolError::InsufficientLiquidity);

    // Exactly at the floor is accepted.
    pool.add_liquidity(
        1,
        &[deposit(
            BinKind::Static,
            0,
            U256::zero(),
            U256::from(100_000_000u64),
        )],
    )
    .unwrap();
}

#[test]
fn test_remove_is_capped_at_bin_supply() {
    let mut pool = BinPool::new(params(), PoolState::new(0));
    let amount = U256::exp10(20);
    let (_, _, deltas) = pool
        .add_liquidity(1, &[deposit(BinKind::Static, 0, U256::zero(), amount)])
        .unwrap();

    let (_, out_b, deltas) = pool
        .remove_liquidity(
            2,
            &[RemoveLiquidityParams {
                bin_id: deltas[0].bin_id,
                amount: U256::MAX,
            }],
        )
        .unwrap();
    assert!(out_b <= amount);
    assert!(deltas[0].delta_lp_balance < U256::MAX);
}

#[test]
fn test_unknown_bin_is_rejected() {
    let mut pool = BinPool::new(params(), PoolState::new(0));
    let err = pool
        .remove_liquidity(
            1,
            &[RemoveLiquidityParams {
                bin_id: 42,
                amount: U256::one(),
            }],
        )
        .unwrap_err();
    assert_eq!(err, PoolError::BinNotFound(42));
}

/// Hand-builds a merge chain deeper than one migrate pass can flatten.
fn chained_state(depth: u128) -> PoolState {
    let mut state = PoolState::new(0);
    for i in 1..=depth {
        let live = i == depth;
        state.bins.push(Bin {
            tick: 0,
            kind: BinKind::Both,
            tick_balance: if live { U256::exp10(18) } else { U256::zero() },
            total_supply: U256::exp10(18),
            merge_id: if live { 0 } else { i + 1 },
            merge_bin_balance: if live { U256::zero() } else { U256::exp10(18) },
        });
    }
    state.bin_counter = depth;
    state.ticks.insert(
        0,
        amm_pricer::Tick {
            reserve_a: U256::zero(),
            reserve_b: U256::exp10(18),
            total_supply: U256::exp10(18),
            bin_ids_by_kind: [0, 0, 0, depth],
        },
    );
    state.reserve_b = U256::exp10(18);
    state
}

#[test]
fn test_removal_through_flattenable_chain() {
    // Depth 5: three hops flatten 1 -> 2 -> 3 -> 4 -> 5 completely.
    let mut pool = BinPool::new(params(), chained_state(5));
    let (_, out_b, _) = pool
        .remove_liquidity(
            1,
            &[RemoveLiquidityParams {
                bin_id: 1,
                amount: U256::exp10(18),
            }],
        )
        .unwrap();
    assert!(!out_b.is_zero());
    assert_eq!(pool.state().bin(1).unwrap().total_supply, U256::zero());
}

#[test]
fn test_migrate_first_past_the_flattening_bound() {
    // Depth 6 leaves one unflattened hop after the bounded pass.
    let mut pool = BinPool::new(params(), chained_state(6));
    let snapshot = serde_json::to_string(pool.state()).unwrap();
    let err = pool
        .remove_liquidity(
            1,
            &[RemoveLiquidityParams {
                bin_id: 1,
                amount: U256::exp10(18),
            }],
        )
        .unwrap_err();
    assert_eq!(err, PoolError::MigrateFirst(1));
    assert_eq!(serde_json::to_string(pool.state()).unwrap(), snapshot);

    // An explicit extra migrate pass unblocks the removal.
    pool.migrate_bins_up_stack(1, 3).unwrap();
    pool.remove_liquidity(
        2,
        &[RemoveLiquidityParams {
            bin_id: 1,
            amount: U256::exp10(18),
        }],
    )
    .unwrap();
}
