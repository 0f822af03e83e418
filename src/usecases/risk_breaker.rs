//! Risk Breaker - Sticky Loss Circuit Breaker
//!
//! Halts trading when any loss limit is breached:
//! - Consecutive losing trades
//! - Drawdown from the account's peak value
//! - Trailing 24h realized loss (% of account)
//! - Trailing 7d realized loss (% of account)
//!
//! Unlike `ResilienceGate`, a trip never recovers on its own. Every order
//! is denied until an operator calls `reset`. Limits are evaluated in the
//! order consecutive → drawdown → daily → weekly and the first breach wins.

use std::cmp::Ordering;
use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::RiskConfig;

/// Upper bound on remembered trade outcomes.
const MAX_OUTCOMES: usize = 10_000;

/// Loss limits. Percentages are of account value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
  pub max_consecutive_losses: u32,
  pub max_daily_loss_pct: f64,
  pub max_weekly_loss_pct: f64,
  pub max_drawdown_pct: f64,
}

impl Default for RiskLimits {
  fn default() -> Self {
    Self {
      max_consecutive_losses: 5,
      max_daily_loss_pct: 12.0,
      max_weekly_loss_pct: 20.0,
      max_drawdown_pct: 15.0,
    }
  }
}

impl From<&RiskConfig> for RiskLimits {
  fn from(config: &RiskConfig) -> Self {
    Self {
      max_consecutive_losses: config.max_consecutive_losses,
      max_daily_loss_pct: config.max_daily_loss_pct,
      max_weekly_loss_pct: config.max_weekly_loss_pct,
      max_drawdown_pct: config.max_drawdown_pct,
    }
  }
}

/// Which limit tripped the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachKind {
  ConsecutiveLoss,
  MaxDrawdown,
  DailyLoss,
  WeeklyLoss,
}

impl BreachKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::ConsecutiveLoss => "consecutive_loss",
      Self::MaxDrawdown => "max_drawdown",
      Self::DailyLoss => "daily_loss",
      Self::WeeklyLoss => "weekly_loss",
    }
  }
}

impl std::fmt::Display for BreachKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Point-in-time view of the breaker. Never use it to decide whether a
/// trade is allowed; only `can_trade` is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskStatus {
  pub tripped: bool,
  pub breach: Option<BreachKind>,
  pub reason: String,
  pub tripped_at: Option<DateTime<Utc>>,
  pub consecutive_losses: u32,
  pub daily_pnl_pct: f64,
  pub weekly_pnl_pct: f64,
  pub peak_account_value: f64,
  pub account_value: f64,
  pub drawdown_pct: f64,
  pub total_trades: u64,
  /// Number of operator resets since start.
  pub recovery_attempts: u32,
  pub limits: RiskLimits,
}

#[derive(Debug, Clone, Copy)]
enum TradeOutcome {
  Win,
  Loss,
  Breakeven,
}

#[derive(Debug)]
struct RiskState {
  limits: RiskLimits,
  consecutive_losses: u32,
  /// (closed at, pnl %) per trade, oldest first.
  outcomes: VecDeque<(DateTime<Utc>, f64)>,
  daily_pnl_pct: f64,
  weekly_pnl_pct: f64,
  peak: f64,
  last_value: f64,
  drawdown_pct: f64,
  tripped: bool,
  breach: Option<BreachKind>,
  reason: String,
  tripped_at: Option<DateTime<Utc>>,
  total_trades: u64,
  recovery_attempts: u32,
}

impl RiskState {
  /// No-op while tripped.
  fn record(
    &mut self,
    outcome: TradeOutcome,
    pnl_percent: f64,
    account_value: f64,
    closed_at: DateTime<Utc>,
  ) {
    if self.tripped {
      return;
    }

    self.total_trades += 1;

    match outcome {
      TradeOutcome::Win => self.consecutive_losses = 0,
      TradeOutcome::Loss => self.consecutive_losses += 1,
      TradeOutcome::Breakeven => {}
    }

    self.last_value = account_value;
    if account_value > self.peak {
      self.peak = account_value;
    }
    self.drawdown_pct = if self.peak > 0.0 {
      ((self.peak - account_value) / self.peak * 100.0).max(0.0)
    } else {
      0.0
    };

    if pnl_percent.is_finite() {
      self.outcomes.push_back((closed_at, pnl_percent));
    }
    self.roll_windows(closed_at);

    if let Some((kind, detail)) = self.first_breach() {
      self.tripped = true;
      self.breach = Some(kind);
      self.reason = format!("{kind}: {detail}");
      self.tripped_at = Some(closed_at);
      error!(
        breach = %kind,
        reason = %self.reason,
        consecutive_losses = self.consecutive_losses,
        drawdown_pct = self.drawdown_pct,
        daily_pnl_pct = self.daily_pnl_pct,
        weekly_pnl_pct = self.weekly_pnl_pct,
        "Risk breaker tripped, trading halted until manual reset"
      );
    }
  }

  fn roll_windows(&mut self, now: DateTime<Utc>) {
    let week_ago = now - Duration::days(7);
    while self.outcomes.front().is_some_and(|(at, _)| *at <= week_ago) {
      self.outcomes.pop_front();
    }
    while self.outcomes.len() > MAX_OUTCOMES {
      self.outcomes.pop_front();
    }

    let day_ago = now - Duration::hours(24);
    self.weekly_pnl_pct = self.outcomes.iter().map(|(_, pnl)| pnl).sum();
    self.daily_pnl_pct = self
      .outcomes
      .iter()
      .filter(|(at, _)| *at > day_ago)
      .map(|(_, pnl)| pnl)
      .sum();
  }

  /// First breached limit, in evaluation order.
  fn first_breach(&self) -> Option<(BreachKind, String)> {
    let limits = &self.limits;
    if self.consecutive_losses >= limits.max_consecutive_losses {
      return Some((
        BreachKind::ConsecutiveLoss,
        format!(
          "{} consecutive losses (limit {})",
          self.consecutive_losses, limits.max_consecutive_losses
        ),
      ));
    }
    if self.peak > 0.0 && self.drawdown_pct > limits.max_drawdown_pct {
      return Some((
        BreachKind::MaxDrawdown,
        format!(
          "drawdown {:.2}% exceeds {:.2}% (peak {:.2}, current {:.2})",
          self.drawdown_pct, limits.max_drawdown_pct, self.peak, self.last_value
        ),
      ));
    }
    if self.daily_pnl_pct < -limits.max_daily_loss_pct {
      return Some((
        BreachKind::DailyLoss,
        format!(
          "daily loss {:.2}% exceeds {:.2}%",
          -self.daily_pnl_pct, limits.max_daily_loss_pct
        ),
      ));
    }
    if self.weekly_pnl_pct < -limits.max_weekly_loss_pct {
      return Some((
        BreachKind::WeeklyLoss,
        format!(
          "weekly loss {:.2}% exceeds {:.2}%",
          -self.weekly_pnl_pct, limits.max_weekly_loss_pct
        ),
      ));
    }
    None
  }
}

/// Sticky loss breaker shared by the decision loop and operators.
#[derive(Debug)]
pub struct RiskBreaker {
  state: RwLock<RiskState>,
}

impl RiskBreaker {
  /// Create an untripped breaker. `initial_account_value` seeds the peak.
  pub fn new(limits: RiskLimits, initial_account_value: f64) -> Self {
    let initial = initial_account_value.max(0.0);
    Self {
      state: RwLock::new(RiskState {
        limits,
        consecutive_losses: 0,
        outcomes: VecDeque::new(),
        daily_pnl_pct: 0.0,
        weekly_pnl_pct: 0.0,
        peak: initial,
        last_value: initial,
        drawdown_pct: 0.0,
        tripped: false,
        breach: None,
        reason: String::new(),
        tripped_at: None,
        total_trades: 0,
        recovery_attempts: 0,
      }),
    }
  }

  pub fn from_config(config: &RiskConfig) -> Self {
    Self::new(RiskLimits::from(config), config.initial_account_value)
  }

  /// Whether a new order may be placed, and why not.
  pub async fn can_trade(&self) -> (bool, String) {
    let state = self.state.read().await;
    if state.tripped {
      (false, state.reason.clone())
    } else {
      (true, String::new())
    }
  }

  pub async fn is_tripped(&self) -> bool {
    self.state.read().await.tripped
  }

  /// Record one closed trade. No-op while tripped.
  pub async fn update_after_trade(&self, is_win: bool, pnl_percent: f64, account_value: f64) {
    self
      .update_after_trade_at(is_win, pnl_percent, account_value, Utc::now())
      .await;
  }

  /// `update_after_trade` with an explicit close time.
  pub async fn update_after_trade_at(
    &self,
    is_win: bool,
    pnl_percent: f64,
    account_value: f64,
    closed_at: DateTime<Utc>,
  ) {
    let outcome = if is_win {
      TradeOutcome::Win
    } else {
      TradeOutcome::Loss
    };
    self
      .state
      .write()
      .await
      .record(outcome, pnl_percent, account_value, closed_at);
  }

  /// Record one closed trade from its realized PnL. `account_value` is the
  /// value after the trade; `None` means the last known value plus
  /// `realized_pnl`. The percentage is taken against the value before the
  /// trade. A breakeven close is neither a win nor a loss: it leaves the
  /// loss streak where it was.
  pub async fn record_realized_pnl(
    &self,
    realized_pnl: Decimal,
    account_value: Option<Decimal>,
    closed_at: DateTime<Utc>,
  ) {
    let mut state = self.state.write().await;
    let pnl = realized_pnl.to_f64().unwrap_or(0.0);
    let after = account_value
      .and_then(|v| v.to_f64())
      .unwrap_or(state.last_value + pnl);
    let before = after - pnl;
    let pnl_percent = if before > 0.0 { pnl / before * 100.0 } else { 0.0 };

    let outcome = match realized_pnl.cmp(&Decimal::ZERO) {
      Ordering::Greater => TradeOutcome::Win,
      Ordering::Less => TradeOutcome::Loss,
      Ordering::Equal => TradeOutcome::Breakeven,
    };
    state.record(outcome, pnl_percent, after, closed_at);
  }

  /// Operator reset. Clears the trip, the loss streak and the outcome
  /// window, and rebases the peak to the last account value.
  pub async fn reset(&self, reason: &str) {
    let mut state = self.state.write().await;
    let previous = state.breach;
    state.tripped = false;
    state.breach = None;
    state.reason.clear();
    state.tripped_at = None;
    state.consecutive_losses = 0;
    state.outcomes.clear();
    state.daily_pnl_pct = 0.0;
    state.weekly_pnl_pct = 0.0;
    state.peak = state.last_value;
    state.drawdown_pct = 0.0;
    state.recovery_attempts += 1;
    warn!(
      reason = %reason,
      previous_breach = ?previous,
      recovery_attempts = state.recovery_attempts,
      "Risk breaker manually reset"
    );
  }

  /// Replace the limits. A tripped breaker stays tripped.
  pub async fn set_limits(&self, limits: RiskLimits) {
    let mut state = self.state.write().await;
    if state.limits != limits {
      info!(?limits, "Risk limits updated");
      state.limits = limits;
    }
  }

  pub async fn status(&self) -> RiskStatus {
    let state = self.state.read().await;
    RiskStatus {
      tripped: state.tripped,
      breach: state.breach,
      reason: state.reason.clone(),
      tripped_at: state.tripped_at,
      consecutive_losses: state.consecutive_losses,
      daily_pnl_pct: state.daily_pnl_pct,
      weekly_pnl_pct: state.weekly_pnl_pct,
      peak_account_value: state.peak,
      account_value: state.last_value,
      drawdown_pct: state.drawdown_pct,
      total_trades: state.total_trades,
      recovery_attempts: state.recovery_attempts,
      limits: state.limits,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn breaker() -> RiskBreaker {
    RiskBreaker::new(RiskLimits::default(), 100.0)
  }

  #[tokio::test]
  async fn test_can_trade_initially() {
    let b = breaker();
    assert_eq!(b.can_trade().await, (true, String::new()));
  }

  #[tokio::test]
  async fn test_trips_on_consecutive_losses_and_sticks() {
    let b = RiskBreaker::new(RiskLimits::default(), 10_000.0);
    for _ in 0..5 {
      b.update_after_trade(false, -0.1, 9_990.0).await;
    }
    let (allowed, reason) = b.can_trade().await;
    assert!(!allowed);
    assert!(reason.starts_with("consecutive_loss"));

    b.update_after_trade(true, 5.0, 11_000.0).await;
    assert!(!b.can_trade().await.0);
    assert_eq!(b.status().await.consecutive_losses, 5);

    b.reset("operator reviewed strategy").await;
    assert!(b.can_trade().await.0);
    let status = b.status().await;
    assert_eq!(status.consecutive_losses, 0);
    assert_eq!(status.recovery_attempts, 1);
  }

  #[tokio::test]
  async fn test_drawdown_checked_before_consecutive_streak() {
    let b = breaker();
    b.update_after_trade(false, -2.0, 98.0).await;
    b.update_after_trade(false, -4.0, 94.0).await;
    b.update_after_trade(false, -10.0, 84.0).await;

    let status = b.status().await;
    assert!(status.tripped);
    assert_eq!(status.breach, Some(BreachKind::MaxDrawdown));
    assert_eq!(status.consecutive_losses, 3);
    assert!((status.drawdown_pct - 16.0).abs() < 1e-9);
  }

  #[tokio::test]
  async fn test_drawdown_below_limit_does_not_trip() {
    let b = breaker();
    b.update_after_trade(false, -1.0, 86.0).await;
    assert!(b.can_trade().await.0);
  }

  #[tokio::test]
  async fn test_daily_loss_trips() {
    let b = RiskBreaker::new(RiskLimits::default(), 0.0);
    b.update_after_trade(false, -7.0, 0.0).await;
    b.update_after_trade(true, 0.5, 0.0).await;
    assert!(b.can_trade().await.0);
    b.update_after_trade(false, -6.0, 0.0).await;
    assert_eq!(b.status().await.breach, Some(BreachKind::DailyLoss));
  }

  #[tokio::test]
  async fn test_weekly_loss_uses_trailing_week() {
    let b = RiskBreaker::new(RiskLimits::default(), 0.0);
    let now = Utc::now();
    // each day below the daily limit, together above the weekly one
    for days_ago in [6, 4, 2] {
      b.update_after_trade_at(true, -7.0, 0.0, now - Duration::days(days_ago))
        .await;
    }
    let status = b.status().await;
    assert_eq!(status.breach, Some(BreachKind::WeeklyLoss));
    assert!((status.daily_pnl_pct + 7.0).abs() < 1e-9);
  }

  #[tokio::test]
  async fn test_outcomes_older_than_a_week_expire() {
    let b = RiskBreaker::new(RiskLimits::default(), 0.0);
    let now = Utc::now();
    b.update_after_trade_at(true, -11.0, 0.0, now - Duration::days(8))
      .await;
    b.update_after_trade_at(true, -11.0, 0.0, now).await;
    let status = b.status().await;
    assert!(!status.tripped);
    assert!((status.weekly_pnl_pct + 11.0).abs() < 1e-9);
  }

  #[tokio::test]
  async fn test_reset_rebases_peak() {
    let b = breaker();
    b.update_after_trade(false, -20.0, 80.0).await;
    assert!(b.is_tripped().await);
    b.reset("capital re-allocated").await;

    let status = b.status().await;
    assert_eq!(status.peak_account_value, 80.0);
    assert_eq!(status.drawdown_pct, 0.0);
    b.update_after_trade(true, 1.0, 81.0).await;
    assert!(b.can_trade().await.0);
  }

  #[tokio::test]
  async fn test_set_limits_applies_to_next_update() {
    let b = breaker();
    b.set_limits(RiskLimits {
      max_consecutive_losses: 2,
      ..RiskLimits::default()
    })
    .await;
    b.update_after_trade(false, -0.1, 99.9).await;
    assert!(b.can_trade().await.0);
    b.update_after_trade(false, -0.1, 99.8).await;
    assert_eq!(b.status().await.breach, Some(BreachKind::ConsecutiveLoss));
  }

  #[tokio::test]
  async fn test_realized_pnl_tracks_account_value() {
    let b = RiskBreaker::new(RiskLimits::default(), 1_000.0);
    b.record_realized_pnl(Decimal::new(-100, 0), None, Utc::now())
      .await;
    let status = b.status().await;
    assert_eq!(status.account_value, 900.0);
    assert_eq!(status.consecutive_losses, 1);
    assert!((status.daily_pnl_pct + 10.0).abs() < 1e-9);

    b.record_realized_pnl(Decimal::new(-80, 0), None, Utc::now())
      .await;
    let status = b.status().await;
    assert!(status.tripped);
    assert_eq!(status.breach, Some(BreachKind::MaxDrawdown));
  }

  #[tokio::test]
  async fn test_breakeven_close_keeps_loss_streak() {
    let b = RiskBreaker::new(
      RiskLimits {
        max_consecutive_losses: 2,
        ..RiskLimits::default()
      },
      10_000.0,
    );
    b.record_realized_pnl(Decimal::new(-1, 0), None, Utc::now())
      .await;
    b.record_realized_pnl(Decimal::ZERO, None, Utc::now()).await;
    let status = b.status().await;
    assert!(!status.tripped);
    assert_eq!(status.consecutive_losses, 1);
    assert_eq!(status.total_trades, 2);

    b.record_realized_pnl(Decimal::ZERO, None, Utc::now()).await;
    b.record_realized_pnl(Decimal::new(5, 0), None, Utc::now())
      .await;
    assert_eq!(b.status().await.consecutive_losses, 0);
  }

  #[test]
  fn test_breach_kind_serializes_snake_case() {
    let json = serde_json::to_string(&BreachKind::MaxDrawdown).unwrap();
    assert_eq!(json, "\"max_drawdown\"");
  }
}
