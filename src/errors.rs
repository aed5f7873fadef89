//! Error types for the pricing engines.
//!
//! Every expected domain condition (range, liquidity, sequencing) is a
//! `Result` variant rather than a panic. Overflow of the working integer
//! width is its own variant and is treated as unrecoverable by callers.

use thiserror::Error;

/// Errors raised by the fixed-point primitives and tick geometry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("Calculation resulted in overflow")]
    Overflow,
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Tick {0} exceeds the supported price range")]
    TickOutOfBounds(i32),
}

/// Errors raised by the pool engines.
///
/// None of these are retried internally; a failed mutating call discards the
/// in-progress working copy of the state, a failed estimate leaves the
/// snapshot untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Math error: {0}")]
    Math(#[from] MathError),
    #[error("Insufficient liquidity to perform swap")]
    InsufficientLiquidity,
    #[error("Swap would cross the caller tick limit {tick_limit} with {excess} still unfilled")]
    BeyondSwapLimit { tick_limit: i32, excess: String },
    #[error("Bin {0} has an unflattened merge chain, migrate first")]
    MigrateFirst(u128),
    #[error("Bin {0} does not exist")]
    BinNotFound(u128),
    #[error("Added liquidity rounds to zero shares")]
    ZeroLiquidityAdded,
    #[error("Invalid pool state: {0}")]
    InvalidState(String),
}
