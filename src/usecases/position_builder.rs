//! Position Builder - Replays Fills into Persisted Position State
//!
//! Loads the open position for (account, symbol), folds one fill into it
//! with the weighted-average math in `domain::position`, and persists every
//! touched position in one write. A flip persists two rows together: the
//! closed position and the freshly opened one.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::domain::errors::PositionError;
use crate::domain::position::{apply_trade, Position, PositionChange, PositionTrade};
use crate::ports::repository::PositionRepository;

/// Applies fills to positions through a `PositionRepository`.
pub struct PositionBuilder<R: PositionRepository> {
  repo: Arc<R>,
}

impl<R: PositionRepository> PositionBuilder<R> {
  pub fn new(repo: Arc<R>) -> Self {
    Self { repo }
  }

  /// Fold one fill into the account's position for its symbol.
  ///
  /// # Errors
  /// - `InvariantViolation` if more than one open position exists
  /// - `InvalidTrade` for non-positive quantity or price
  /// - `Store` if loading or saving fails
  #[instrument(
    skip(self, trade),
    fields(account = %trade.account, symbol = %trade.symbol, trade_id = %trade.trade_id)
  )]
  pub async fn process_trade(&self, trade: &PositionTrade) -> Result<PositionChange, PositionError> {
    let open = self.current(&trade.account, &trade.symbol).await?;

    let change = apply_trade(open.as_ref(), trade)?;

    let touched: Vec<Position> = change.touched().into_iter().cloned().collect();
    if !touched.is_empty() {
      self
        .repo
        .save_positions(&touched)
        .await
        .map_err(PositionError::Store)?;
    }

    match &change {
      PositionChange::Opened(p) => info!(
        side = ?p.side,
        qty = %p.quantity,
        entry = %p.entry_price,
        "Position opened"
      ),
      PositionChange::Increased(p) => debug!(
        qty = %p.quantity,
        entry = %p.entry_price,
        "Position increased"
      ),
      PositionChange::Reduced { position, realized } => debug!(
        qty = %position.quantity,
        realized = %realized,
        "Position reduced"
      ),
      PositionChange::Closed { position, realized } => info!(
        realized = %realized,
        total_realized = %position.realized_pnl,
        "Position closed"
      ),
      PositionChange::Flipped { opened, realized, .. } => info!(
        realized = %realized,
        new_side = ?opened.side,
        new_qty = %opened.quantity,
        "Position flipped"
      ),
      PositionChange::Ignored { reason } => warn!(
        action = %trade.action,
        reason = %reason,
        "Fill not applied to position"
      ),
    }

    Ok(change)
  }

  /// The single open position for (account, symbol), if any.
  pub async fn current(&self, account: &str, symbol: &str) -> Result<Option<Position>, PositionError> {
    let mut open = self
      .repo
      .open_positions(account, symbol)
      .await
      .map_err(PositionError::Store)?;

    if open.len() > 1 {
      return Err(PositionError::InvariantViolation {
        account: account.to_string(),
        symbol: symbol.to_string(),
        open_count: open.len(),
      });
    }

    Ok(open.pop())
  }
}
