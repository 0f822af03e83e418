//! Trade Executor - Risk-Gated Order Placement
//!
//! Every order asks the `RiskBreaker` first. A tripped breaker denies the
//! order with `ExecutionError::TradingHalted` and an error-level
//! `trading halted: <reason>` log line. Allowed orders go to the exchange
//! through a `ResilienceGate`. Closed-trade results are fed back into the
//! breaker with `record_closed_trade`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::resilience_gate::{call_exchange, ResilienceGate};
use super::risk_breaker::RiskBreaker;
use crate::ports::exchange::{ExchangeClient, ExchangeError, OrderAck, OrderRequest};

/// Why an order was not placed.
#[derive(Debug, Error)]
pub enum ExecutionError {
  /// The loss breaker is tripped.
  #[error("trading halted: {0}")]
  TradingHalted(String),

  /// The exchange gate is open; nothing was sent.
  #[error("circuit breaker is open")]
  CircuitOpen,

  /// The exchange refused the order.
  #[error("order rejected: {0}")]
  Rejected(String),

  #[error(transparent)]
  Exchange(ExchangeError),
}

impl From<ExchangeError> for ExecutionError {
  fn from(e: ExchangeError) -> Self {
    match e {
      ExchangeError::CircuitOpen => Self::CircuitOpen,
      ExchangeError::Rejected(reason) => Self::Rejected(reason),
      other => Self::Exchange(other),
    }
  }
}

/// Places orders on one exchange account.
pub struct TradeExecutor<E: ExchangeClient> {
  exchange: Arc<E>,
  risk: Arc<RiskBreaker>,
  gate: Arc<ResilienceGate>,
  order_timeout: Duration,
  dry_run: bool,
}

impl<E: ExchangeClient> TradeExecutor<E> {
  pub fn new(
    exchange: Arc<E>,
    risk: Arc<RiskBreaker>,
    gate: Arc<ResilienceGate>,
    order_timeout: Duration,
    dry_run: bool,
  ) -> Self {
    Self {
      exchange,
      risk,
      gate,
      order_timeout,
      dry_run,
    }
  }

  /// Place an order if the risk breaker allows it.
  ///
  /// # Errors
  /// `TradingHalted` when the breaker is tripped, `CircuitOpen` when the
  /// exchange gate fast-fails, `Rejected`/`Exchange` otherwise.
  #[instrument(skip(self, order), fields(symbol = %order.symbol, action = %order.action, qty = %order.quantity))]
  pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExecutionError> {
    let (allowed, reason) = self.risk.can_trade().await;
    if !allowed {
      error!("trading halted: {reason}");
      return Err(ExecutionError::TradingHalted(reason));
    }

    if self.dry_run {
      info!(side = %order.side, price = ?order.price, "Dry run, order not sent");
      return Ok(OrderAck {
        exchange_order_id: format!("dry-run-{}", uuid::Uuid::new_v4()),
        accepted: true,
        timestamp_ms: Utc::now().timestamp_millis(),
      });
    }

    let ack = call_exchange(Some(self.gate.as_ref()), self.order_timeout, || {
      self.exchange.place_order(order)
    })
    .await?;

    if !ack.accepted {
      warn!(order_id = %ack.exchange_order_id, "Order not accepted");
      return Err(ExecutionError::Rejected(ack.exchange_order_id));
    }

    info!(order_id = %ack.exchange_order_id, "Order placed");
    Ok(ack)
  }

  /// Cancel an order. Cancels are never blocked by the risk breaker.
  #[instrument(skip(self))]
  pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool, ExecutionError> {
    if self.dry_run {
      return Ok(true);
    }
    let cancelled = call_exchange(Some(self.gate.as_ref()), self.order_timeout, || {
      self.exchange.cancel_order(symbol, order_id)
    })
    .await?;
    Ok(cancelled)
  }

  /// Feed one closed trade into the risk breaker. `account_value` is the
  /// value after the trade; the PnL percentage is taken against the value
  /// before it. A zero-PnL close counts as neither a win nor a loss.
  pub async fn record_closed_trade(&self, realized_pnl: Decimal, account_value: Decimal) {
    self
      .risk
      .record_realized_pnl(realized_pnl, Some(account_value), Utc::now())
      .await;
  }

  pub fn risk(&self) -> &Arc<RiskBreaker> {
    &self.risk
  }
}
