//! Off-chain AMM pricing engines.
//!
//! Bit-exact reimplementations of on-chain pool math, run against locally
//! maintained state snapshots so quoting never touches a node. The main
//! engine is the bin-liquidity pool ([`pool::BinPool`]): discrete liquidity
//! bins anchored to price ticks, with a time-weighted-average price driving
//! bin consolidation and relocation. A constant-product engine covers the
//! simpler pools, and the [`quote`] layer batch-prices candidate trade sizes
//! over either.
//!
//! All engine arithmetic is unsigned 256-bit fixed point at a 1e18 scale with
//! 512-bit intermediates, and every rounding decision favors the pool, so a
//! quote can be checked against the chain down to the last unit.

pub mod constant_product;
pub mod decimals;
pub mod errors;
pub mod liquidity;
pub mod math;
pub mod pool;
pub mod quote;
pub mod swap_step;
pub mod tick_math;
pub mod twa;
pub mod types;

pub use errors::{MathError, PoolError};
pub use pool::BinPool;
pub use quote::{quote_amounts, EngineKind, Quote};
pub use types::{
    AddLiquidityParams, Bin, BinDelta, BinKind, PoolParams, PoolState, RemoveLiquidityParams,
    Tick,
};
