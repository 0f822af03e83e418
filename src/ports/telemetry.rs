//! Telemetry Port - Sync Cycle Observers
//!
//! Lets the scheduler report cycle outcomes without depending on a
//! concrete metrics backend.

use crate::domain::sync::{SyncError, SyncReport};

/// Receives the outcome of every sync cycle.
pub trait SyncObserver: Send + Sync + 'static {
  /// Called once per cycle, after the cycle lock is released.
  fn on_cycle(&self, account: &str, outcome: &Result<SyncReport, SyncError>);
}
