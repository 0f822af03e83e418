//! Resilience Gate - Generic Circuit Breaker for Remote Calls
//!
//! Wraps any fallible async operation with closed / open / half-open
//! semantics:
//! - Closed: every call runs; `failure_threshold` consecutive failures open
//!   the gate
//! - Open: calls fail fast with `GateError::CircuitOpen` until the cooldown
//!   since opening has elapsed
//! - Half-open: calls run; any failure reopens (restarting the cooldown),
//!   `success_threshold` successes close the gate
//!
//! The lock is held only for the pre-call decision and the post-call
//! bookkeeping, never across the wrapped future.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GateConfig;
use crate::ports::exchange::{ErrorKind, ExchangeError};

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Gate states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
  Closed,
  Open,
  HalfOpen,
}

impl GateState {
  /// Numeric encoding for gauges: 0 closed, 1 open, 2 half-open.
  pub fn as_gauge(self) -> f64 {
    match self {
      Self::Closed => 0.0,
      Self::Open => 1.0,
      Self::HalfOpen => 2.0,
    }
  }
}

impl std::fmt::Display for GateState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Closed => write!(f, "closed"),
      Self::Open => write!(f, "open"),
      Self::HalfOpen => write!(f, "half_open"),
    }
  }
}

/// Error returned by `ResilienceGate::call`.
#[derive(Debug, Error)]
pub enum GateError<E> {
  /// Fast-fail: the wrapped operation was not attempted.
  #[error("circuit breaker is open")]
  CircuitOpen,

  /// The wrapped operation ran and failed.
  #[error("{0}")]
  Operation(E),
}

impl<E> GateError<E> {
  pub fn is_circuit_open(&self) -> bool {
    matches!(self, Self::CircuitOpen)
  }
}

/// Gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
  pub failure_threshold: u32,
  pub success_threshold: u32,
  pub cooldown: Duration,
}

impl Default for GateSettings {
  fn default() -> Self {
    Self {
      failure_threshold: DEFAULT_FAILURE_THRESHOLD,
      success_threshold: DEFAULT_SUCCESS_THRESHOLD,
      cooldown: DEFAULT_COOLDOWN,
    }
  }
}

impl From<&GateConfig> for GateSettings {
  fn from(config: &GateConfig) -> Self {
    Self {
      failure_threshold: config.failure_threshold,
      success_threshold: config.success_threshold,
      cooldown: Duration::from_millis(config.cooldown_ms),
    }
  }
}

/// Read-only view for observability.
#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
  pub name: String,
  pub state: GateState,
  pub failure_count: u32,
  pub success_count: u32,
  pub failure_threshold: u32,
  pub success_threshold: u32,
  pub cooldown_ms: u64,
  /// Milliseconds since the last failure, if any.
  pub since_last_failure_ms: Option<u64>,
}

#[derive(Debug)]
struct GateInner {
  state: GateState,
  failure_count: u32,
  success_count: u32,
  last_failure: Option<Instant>,
  opened_at: Option<Instant>,
}

/// Generic circuit breaker. One instance per protected operation.
#[derive(Debug)]
pub struct ResilienceGate {
  name: String,
  settings: GateSettings,
  inner: Mutex<GateInner>,
}

impl ResilienceGate {
  /// Create a closed gate. Zero thresholds or cooldown fall back to the
  /// defaults (3 failures, 2 successes, 60s).
  pub fn new(name: impl Into<String>, settings: GateSettings) -> Self {
    let settings = GateSettings {
      failure_threshold: if settings.failure_threshold == 0 {
        DEFAULT_FAILURE_THRESHOLD
      } else {
        settings.failure_threshold
      },
      success_threshold: if settings.success_threshold == 0 {
        DEFAULT_SUCCESS_THRESHOLD
      } else {
        settings.success_threshold
      },
      cooldown: if settings.cooldown.is_zero() {
        DEFAULT_COOLDOWN
      } else {
        settings.cooldown
      },
    };

    Self {
      name: name.into(),
      settings,
      inner: Mutex::new(GateInner {
        state: GateState::Closed,
        failure_count: 0,
        success_count: 0,
        last_failure: None,
        opened_at: None,
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn settings(&self) -> GateSettings {
    self.settings
  }

  /// Run `op` under the gate.
  ///
  /// # Errors
  /// `GateError::CircuitOpen` when fast-failing, otherwise the
  /// operation's own error wrapped in `GateError::Operation`.
  pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, GateError<E>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    self.call_with(op, |_| false).await
  }

  /// `call`, except that errors matching `neutral` are returned without
  /// being recorded as either a success or a failure.
  pub async fn call_with<F, Fut, T, E, N>(&self, op: F, neutral: N) -> Result<T, GateError<E>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnOnce(&E) -> bool,
  {
    if !self.admit().await {
      debug!(gate = %self.name, "Gate open, failing fast");
      return Err(GateError::CircuitOpen);
    }

    let result = op().await;

    match &result {
      Ok(_) => self.record_success().await,
      Err(e) if neutral(e) => debug!(gate = %self.name, "Neutral error, gate state unchanged"),
      Err(_) => self.record_failure().await,
    }

    result.map_err(GateError::Operation)
  }

  /// Decide whether a call may proceed.
  async fn admit(&self) -> bool {
    let mut inner = self.inner.lock().await;
    match inner.state {
      GateState::Closed | GateState::HalfOpen => true,
      GateState::Open => {
        let cooled = inner
          .opened_at
          .is_none_or(|at| at.elapsed() > self.settings.cooldown);
        if cooled {
          inner.state = GateState::HalfOpen;
          inner.success_count = 0;
          info!(gate = %self.name, "Gate half-open, probing recovery");
        }
        cooled
      }
    }
  }

  async fn record_success(&self) {
    let mut inner = self.inner.lock().await;
    match inner.state {
      GateState::Closed => inner.failure_count = 0,
      GateState::HalfOpen => {
        inner.success_count += 1;
        debug!(
          gate = %self.name,
          successes = inner.success_count,
          threshold = self.settings.success_threshold,
          "Half-open probe succeeded"
        );
        if inner.success_count >= self.settings.success_threshold {
          inner.state = GateState::Closed;
          inner.failure_count = 0;
          inner.success_count = 0;
          inner.opened_at = None;
          info!(gate = %self.name, "Gate closed, downstream recovered");
        }
      }
      // A call admitted before another caller reopened the gate.
      GateState::Open => {}
    }
  }

  async fn record_failure(&self) {
    let mut inner = self.inner.lock().await;
    let now = Instant::now();
    inner.last_failure = Some(now);

    match inner.state {
      GateState::Closed => {
        inner.failure_count += 1;
        if inner.failure_count >= self.settings.failure_threshold {
          inner.state = GateState::Open;
          inner.opened_at = Some(now);
          warn!(
            gate = %self.name,
            failures = inner.failure_count,
            cooldown_ms = self.settings.cooldown.as_millis() as u64,
            "Gate opened"
          );
        }
      }
      GateState::HalfOpen => {
        inner.state = GateState::Open;
        inner.opened_at = Some(now);
        inner.success_count = 0;
        inner.failure_count += 1;
        warn!(gate = %self.name, "Half-open probe failed, gate reopened");
      }
      GateState::Open => {}
    }
  }

  /// Force the gate closed (operator override).
  pub async fn reset(&self) {
    let mut inner = self.inner.lock().await;
    inner.state = GateState::Closed;
    inner.failure_count = 0;
    inner.success_count = 0;
    inner.opened_at = None;
    info!(gate = %self.name, "Gate manually reset to closed");
  }

  /// Current state. Observability only, never a substitute for `call`.
  pub async fn state(&self) -> GateState {
    self.inner.lock().await.state
  }

  pub async fn failure_count(&self) -> u32 {
    self.inner.lock().await.failure_count
  }

  pub async fn success_count(&self) -> u32 {
    self.inner.lock().await.success_count
  }

  pub async fn last_failure(&self) -> Option<Instant> {
    self.inner.lock().await.last_failure
  }

  pub async fn snapshot(&self) -> GateSnapshot {
    let inner = self.inner.lock().await;
    GateSnapshot {
      name: self.name.clone(),
      state: inner.state,
      failure_count: inner.failure_count,
      success_count: inner.success_count,
      failure_threshold: self.settings.failure_threshold,
      success_threshold: self.settings.success_threshold,
      cooldown_ms: self.settings.cooldown.as_millis() as u64,
      since_last_failure_ms: inner.last_failure.map(|t| t.elapsed().as_millis() as u64),
    }
  }
}

/// Run one exchange call bounded by `timeout` and, when present, `gate`.
///
/// A timeout counts as a gate failure. Permanent errors (delisted symbols)
/// are returned to the caller without being recorded by the gate, so they
/// neither trip it nor close a half-open gate.
pub async fn call_exchange<T, F, Fut>(
  gate: Option<&ResilienceGate>,
  timeout: Duration,
  op: F,
) -> Result<T, ExchangeError>
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<T, ExchangeError>>,
{
  let bounded = || async move {
    match tokio::time::timeout(timeout, op()).await {
      Ok(result) => result,
      Err(_) => Err(ExchangeError::Timeout(timeout)),
    }
  };

  match gate {
    Some(gate) => gate
      .call_with(bounded, |e: &ExchangeError| e.kind() == ErrorKind::Permanent)
      .await
      .map_err(|e| match e {
        GateError::CircuitOpen => ExchangeError::CircuitOpen,
        GateError::Operation(e) => e,
      }),
    None => bounded().await,
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  use super::*;

  fn gate(cooldown_ms: u64) -> ResilienceGate {
    ResilienceGate::new(
      "test",
      GateSettings {
        failure_threshold: 3,
        success_threshold: 2,
        cooldown: Duration::from_millis(cooldown_ms),
      },
    )
  }

  async fn fail(gate: &ResilienceGate) -> Result<(), GateError<&'static str>> {
    gate.call(|| async { Err::<(), _>("boom") }).await
  }

  async fn succeed(gate: &ResilienceGate) -> Result<(), GateError<&'static str>> {
    gate.call(|| async { Ok::<(), &'static str>(()) }).await
  }

  #[tokio::test]
  async fn test_opens_after_threshold_and_fails_fast() {
    let gate = gate(10_000);
    for _ in 0..3 {
      assert!(matches!(fail(&gate).await, Err(GateError::Operation("boom"))));
    }
    assert_eq!(gate.state().await, GateState::Open);

    let invoked = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invoked);
    let started = Instant::now();
    let result = gate
      .call(|| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), &'static str>(())
      })
      .await;

    assert!(result.unwrap_err().is_circuit_open());
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert!(started.elapsed() < Duration::from_millis(10));
  }

  #[tokio::test]
  async fn test_success_while_closed_resets_failures() {
    let gate = gate(10_000);
    let _ = fail(&gate).await;
    let _ = fail(&gate).await;
    assert_eq!(gate.failure_count().await, 2);
    succeed(&gate).await.unwrap();
    assert_eq!(gate.failure_count().await, 0);
    let _ = fail(&gate).await;
    assert_eq!(gate.state().await, GateState::Closed);
  }

  #[tokio::test]
  async fn test_half_open_recovers_after_two_successes() {
    let gate = gate(30);
    for _ in 0..3 {
      let _ = fail(&gate).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    succeed(&gate).await.unwrap();
    assert_eq!(gate.state().await, GateState::HalfOpen);
    assert_eq!(gate.success_count().await, 1);

    succeed(&gate).await.unwrap();
    assert_eq!(gate.state().await, GateState::Closed);
    assert_eq!(gate.failure_count().await, 0);
    assert_eq!(gate.success_count().await, 0);
  }

  #[tokio::test]
  async fn test_half_open_failure_reopens_and_restarts_cooldown() {
    let gate = gate(40);
    for _ in 0..3 {
      let _ = fail(&gate).await;
    }
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(matches!(fail(&gate).await, Err(GateError::Operation(_))));
    assert_eq!(gate.state().await, GateState::Open);

    // cooldown restarted: still fast-failing right after the probe failure
    assert!(succeed(&gate).await.unwrap_err().is_circuit_open());

    tokio::time::sleep(Duration::from_millis(60)).await;
    succeed(&gate).await.unwrap();
    assert_eq!(gate.state().await, GateState::HalfOpen);
  }

  #[tokio::test]
  async fn test_reset_forces_closed() {
    let gate = gate(10_000);
    for _ in 0..3 {
      let _ = fail(&gate).await;
    }
    gate.reset().await;
    assert_eq!(gate.state().await, GateState::Closed);
    succeed(&gate).await.unwrap();
  }

  #[tokio::test]
  async fn test_zero_settings_fall_back_to_defaults() {
    let gate = ResilienceGate::new(
      "defaults",
      GateSettings {
        failure_threshold: 0,
        success_threshold: 0,
        cooldown: Duration::ZERO,
      },
    );
    assert_eq!(gate.settings(), GateSettings::default());
  }

  #[tokio::test]
  async fn test_lock_not_held_across_slow_call() {
    let gate = Arc::new(gate(10_000));
    let slow_gate = Arc::clone(&gate);
    let slow = tokio::spawn(async move {
      slow_gate
        .call(|| async {
          tokio::time::sleep(Duration::from_millis(200)).await;
          Ok::<(), &'static str>(())
        })
        .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let started = Instant::now();
    succeed(&gate).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    slow.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_snapshot_reports_state() {
    let gate = gate(10_000);
    let _ = fail(&gate).await;
    let snap = gate.snapshot().await;
    assert_eq!(snap.name, "test");
    assert_eq!(snap.state, GateState::Closed);
    assert_eq!(snap.failure_count, 1);
    assert!(snap.since_last_failure_ms.is_some());
    assert!(gate.last_failure().await.is_some());
  }

  #[tokio::test]
  async fn test_call_exchange_timeout_counts_as_failure() {
    let gate = ResilienceGate::new(
      "exchange",
      GateSettings {
        failure_threshold: 1,
        success_threshold: 1,
        cooldown: Duration::from_secs(60),
      },
    );
    let err = call_exchange(Some(&gate), Duration::from_millis(10), || async {
      tokio::time::sleep(Duration::from_millis(200)).await;
      Ok::<u32, ExchangeError>(1)
    })
    .await
    .unwrap_err();
    assert!(matches!(err, ExchangeError::Timeout(_)));
    assert_eq!(gate.state().await, GateState::Open);

    let err = call_exchange(Some(&gate), Duration::from_secs(1), || async {
      Ok::<u32, ExchangeError>(1)
    })
    .await
    .unwrap_err();
    assert_eq!(err, ExchangeError::CircuitOpen);
  }

  #[tokio::test]
  async fn test_call_exchange_delisted_does_not_trip_gate() {
    let gate = ResilienceGate::new(
      "exchange",
      GateSettings {
        failure_threshold: 1,
        success_threshold: 1,
        cooldown: Duration::from_secs(60),
      },
    );
    for _ in 0..3 {
      let err = call_exchange(Some(&gate), Duration::from_secs(1), || async {
        Err::<u32, _>(ExchangeError::SymbolDelisted("LUNAUSDT".to_string()))
      })
      .await
      .unwrap_err();
      assert_eq!(err.kind(), ErrorKind::Permanent);
    }
    assert_eq!(gate.state().await, GateState::Closed);
  }

  #[tokio::test]
  async fn test_delisted_error_does_not_close_half_open_gate() {
    let gate = ResilienceGate::new(
      "exchange",
      GateSettings {
        failure_threshold: 1,
        success_threshold: 1,
        cooldown: Duration::from_millis(20),
      },
    );
    let _ = call_exchange(Some(&gate), Duration::from_secs(1), || async {
      Err::<u32, _>(ExchangeError::RateLimited("429".to_string()))
    })
    .await;
    assert_eq!(gate.state().await, GateState::Open);

    tokio::time::sleep(Duration::from_millis(40)).await;
    let err = call_exchange(Some(&gate), Duration::from_secs(1), || async {
      Err::<u32, _>(ExchangeError::SymbolDelisted("LUNAUSDT".to_string()))
    })
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert_eq!(gate.state().await, GateState::HalfOpen);
    assert_eq!(gate.success_count().await, 0);

    let value = call_exchange(Some(&gate), Duration::from_secs(1), || async {
      Ok::<u32, ExchangeError>(7)
    })
    .await
    .unwrap();
    assert_eq!(value, 7);
    assert_eq!(gate.state().await, GateState::Closed);
  }

  #[tokio::test]
  async fn test_call_exchange_without_gate() {
    let value = call_exchange(None, Duration::from_secs(1), || async {
      Ok::<_, ExchangeError>("ok")
    })
    .await
    .unwrap();
    assert_eq!(value, "ok");
  }
}
