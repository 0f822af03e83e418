//! Sync cycle outcomes shared by the reconciler, the scheduler and
//! telemetry observers.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use super::errors::PositionError;
use super::trade::{AccountId, Symbol};

/// Errors that abort a whole sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another cycle holds the account's cycle lock.
    #[error("sync already running for account {0}")]
    AlreadyRunning(AccountId),

    /// A fill/order store read or write failed. The cursor is not advanced.
    #[error("persistence failure for account {account}: {source}")]
    Persistence {
        account: AccountId,
        #[source]
        source: anyhow::Error,
    },

    /// Position state could not be updated (invariant violation, store).
    #[error(transparent)]
    Position(#[from] PositionError),
}

impl SyncError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadyRunning(_) => "already_running",
            Self::Persistence { .. } => "persistence",
            Self::Position(PositionError::InvariantViolation { .. }) => "invariant_violation",
            Self::Position(_) => "position",
        }
    }
}

/// Per-source symbol counts, for logs and reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryCounts {
    pub commission: usize,
    pub open_positions: usize,
    pub local_fills: usize,
    pub realized_pnl: usize,
    pub pending_retry: usize,
    /// Sources that failed this cycle.
    pub failed_sources: Vec<&'static str>,
    /// Candidates dropped because they are known delisted.
    pub excluded_delisted: usize,
}

/// A symbol that could not be fetched this cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolFailure {
    pub symbol: Symbol,
    pub kind: &'static str,
    pub error: String,
}

/// Outcome of one successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub account: AccountId,
    pub cursor_before_ms: i64,
    pub cursor_after_ms: i64,
    pub cursor_advanced: bool,
    pub symbols_discovered: usize,
    pub discovery: DiscoveryCounts,
    pub trades_fetched: usize,
    pub trades_ingested: usize,
    /// Already persisted, or duplicated within the batch.
    pub trades_skipped: usize,
    pub positions_touched: usize,
    /// Fills persisted but rejected by the position math.
    pub position_errors: usize,
    /// Realized PnL from the position math, this cycle.
    pub realized_pnl: Decimal,
    /// Reductions, closes and flips fed to the risk breaker.
    pub closed_trades: usize,
    pub failed_symbols: Vec<SymbolFailure>,
    pub delisted_symbols: Vec<Symbol>,
    /// Symbols that hit the page cap; picked up again next cycle.
    pub incomplete_symbols: Vec<Symbol>,
    pub duration_ms: u64,
}

impl SyncReport {
    /// No symbol failed, so the cursor was allowed to advance.
    pub fn is_clean(&self) -> bool {
        self.failed_symbols.is_empty()
    }
}
