//! Domain error types.

use thiserror::Error;

/// Errors raised while folding fills into position state.
#[derive(Debug, Error)]
pub enum PositionError {
    /// More than one open position exists for the same account/symbol.
    /// Replaying further trades would corrupt the cost basis.
    #[error("invariant violation: {open_count} open positions for {account}/{symbol}")]
    InvariantViolation {
        account: String,
        symbol: String,
        open_count: usize,
    },

    /// The trade cannot be applied (non-positive quantity or price).
    #[error("invalid trade {trade_id}: {reason}")]
    InvalidTrade { trade_id: String, reason: String },

    /// The position store failed while loading or saving.
    #[error("position store error: {0}")]
    Store(#[source] anyhow::Error),
}
