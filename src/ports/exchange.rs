//! Exchange Port - Capability Interface for Exchange Collaborators
//!
//! One trait covers everything the core needs from an exchange account:
//! trade history (by time and by ID), the symbol-discovery signals, and
//! order placement. Per-exchange adapters implement it; the
//! reconciliation core never sees a concrete exchange type and never
//! parses exchange JSON.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::trade::{OrderAction, TradeRecord, TradeSide};

/// Exchange error codes that mean "this symbol no longer exists".
const DELISTED_MARKERS: &[&str] = &["40309", "symbol has been removed", "delisted"];

/// Markers for exchange-side throttling.
const RATE_LIMIT_MARKERS: &[&str] = &["429", "too many requests", "rate limit"];

/// How the sync pipeline should treat an exchange failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Expected and non-retryable (delisted symbol).
  Permanent,
  /// Retry on the next cycle (rate limits, timeouts, unknown errors).
  Transient,
  /// A circuit breaker fast-failed; no remote call was made.
  BreakerOpen,
}

/// Errors surfaced by exchange collaborators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
  #[error("symbol {0} has been delisted")]
  SymbolDelisted(String),

  #[error("rate limited: {0}")]
  RateLimited(String),

  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("circuit breaker is open")]
  CircuitOpen,

  #[error("order rejected: {0}")]
  Rejected(String),

  #[error("exchange error: {0}")]
  Other(String),
}

impl ExchangeError {
  /// Classify a raw collaborator error message.
  pub fn from_message(symbol: &str, message: &str) -> Self {
    let lower = message.to_lowercase();
    if DELISTED_MARKERS.iter().any(|m| lower.contains(m)) {
      Self::SymbolDelisted(symbol.to_string())
    } else if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
      Self::RateLimited(message.to_string())
    } else {
      Self::Other(message.to_string())
    }
  }

  /// Retry classification.
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::SymbolDelisted(_) => ErrorKind::Permanent,
      Self::CircuitOpen => ErrorKind::BreakerOpen,
      Self::RateLimited(_) | Self::Timeout(_) | Self::Rejected(_) | Self::Other(_) => {
        ErrorKind::Transient
      }
    }
  }

  /// Short label for logs and metrics.
  pub fn label(&self) -> &'static str {
    match self {
      Self::SymbolDelisted(_) => "delisted",
      Self::RateLimited(_) => "rate_limited",
      Self::Timeout(_) => "timeout",
      Self::CircuitOpen => "circuit_open",
      Self::Rejected(_) => "rejected",
      Self::Other(_) => "other",
    }
  }
}

/// Canonical order accepted by exchange adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
  /// Canonical symbol.
  pub symbol: String,
  /// Buy or sell.
  pub side: TradeSide,
  /// Open/close classification.
  pub action: OrderAction,
  /// Quantity (already precision-formatted by the collaborator).
  pub quantity: Decimal,
  /// Limit price, or the reference price for market orders.
  pub price: Option<Decimal>,
}

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
  /// Exchange-assigned order ID.
  pub exchange_order_id: String,
  /// Whether the order was accepted.
  pub accepted: bool,
  /// Server timestamp (UTC ms).
  pub timestamp_ms: i64,
}

/// Capability interface implemented by per-exchange adapters.
///
/// Every method is a remote call; callers bound them with timeouts and
/// optionally a `ResilienceGate`.
#[async_trait]
pub trait ExchangeClient: Send + Sync + 'static {
  /// Trades for `symbol` executed at or after `since_ms`, oldest first.
  async fn fetch_trades_by_time(
    &self,
    symbol: &str,
    since_ms: i64,
    limit: usize,
  ) -> Result<Vec<TradeRecord>, ExchangeError>;

  /// Trades for `symbol` with an ID strictly greater than `after_id`.
  async fn fetch_trades_by_id(
    &self,
    symbol: &str,
    after_id: &str,
    limit: usize,
  ) -> Result<Vec<TradeRecord>, ExchangeError>;

  /// Symbols with a currently open position.
  async fn open_position_symbols(&self) -> Result<Vec<String>, ExchangeError>;

  /// Symbols with non-zero commission events since `since_ms`.
  async fn commission_symbols(&self, since_ms: i64) -> Result<Vec<String>, ExchangeError>;

  /// Symbols with realized-PnL events since `since_ms`.
  async fn pnl_symbols(&self, since_ms: i64) -> Result<Vec<String>, ExchangeError>;

  /// Place a canonical order.
  async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError>;

  /// Cancel an order. Returns whether anything was cancelled.
  async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool, ExchangeError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify_delisted_messages() {
    let err = ExchangeError::from_message("LUNAUSDT", "code 40309: The symbol has been removed");
    assert_eq!(err, ExchangeError::SymbolDelisted("LUNAUSDT".to_string()));
    assert_eq!(err.kind(), ErrorKind::Permanent);
  }

  #[test]
  fn test_classify_rate_limit_messages() {
    let err = ExchangeError::from_message("BTCUSDT", "HTTP 429 Too Many Requests");
    assert!(matches!(err, ExchangeError::RateLimited(_)));
    assert_eq!(err.kind(), ErrorKind::Transient);
  }

  #[test]
  fn test_classify_unknown_messages() {
    let err = ExchangeError::from_message("BTCUSDT", "connection reset by peer");
    assert!(matches!(err, ExchangeError::Other(_)));
    assert_eq!(err.label(), "other");
  }

  #[test]
  fn test_breaker_open_kind() {
    assert_eq!(ExchangeError::CircuitOpen.kind(), ErrorKind::BreakerOpen);
    assert_eq!(
      ExchangeError::Timeout(Duration::from_secs(1)).kind(),
      ErrorKind::Transient
    );
  }
}
