//! Repository Ports - Fill and Position Persistence Interfaces
//!
//! The reconciliation core only knows these traits. Adapters decide the
//! storage format (in-memory, JSONL, database). Errors are opaque
//! `anyhow` errors: any failure here is fatal to the current sync cycle.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::position::Position;
use crate::domain::trade::{Fill, OrderRecord, Symbol, TradeId};

/// Persistence collaborator for orders and fills.
#[async_trait]
pub trait FillRepository: Send + Sync + 'static {
  /// Look up a fill by its natural key.
  async fn fill_by_exchange_trade_id(
    &self,
    account: &str,
    trade_id: &str,
  ) -> anyhow::Result<Option<Fill>>;

  /// Persist an order record.
  async fn create_order(&self, order: &OrderRecord) -> anyhow::Result<()>;

  /// Persist a fill.
  ///
  /// # Errors
  /// Must fail if a fill with the same (account, exchange trade ID)
  /// already exists.
  async fn create_fill(&self, fill: &Fill) -> anyhow::Result<()>;

  /// Execution time (UTC ms) of the newest fill for the account.
  async fn last_fill_time(&self, account: &str) -> anyhow::Result<Option<i64>>;

  /// Highest known exchange trade ID per symbol for the account.
  async fn max_trade_ids(&self, account: &str) -> anyhow::Result<HashMap<Symbol, TradeId>>;

  /// Symbols with fills executed at or after `since_ms`.
  async fn recent_fill_symbols(&self, account: &str, since_ms: i64)
    -> anyhow::Result<Vec<Symbol>>;

  /// Number of fills stored for the account.
  async fn fill_count(&self, account: &str) -> anyhow::Result<usize>;

  /// Check if the store is usable (disk space, permissions).
  async fn is_healthy(&self) -> bool;
}

/// Persistence collaborator for position state.
#[async_trait]
pub trait PositionRepository: Send + Sync + 'static {
  /// All open positions for (account, symbol). More than one is an
  /// invariant violation the caller must surface.
  async fn open_positions(&self, account: &str, symbol: &str) -> anyhow::Result<Vec<Position>>;

  /// Insert or replace a position by ID.
  async fn save_position(&self, position: &Position) -> anyhow::Result<()>;

  /// Insert or replace several positions as one write: either all of
  /// them are stored or none are. A flip saves its closed and opened
  /// rows together.
  async fn save_positions(&self, positions: &[Position]) -> anyhow::Result<()>;

  /// Every position (open and closed) for the account.
  async fn positions(&self, account: &str) -> anyhow::Result<Vec<Position>>;
}
