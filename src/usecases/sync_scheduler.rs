//! Sync Scheduler - One Worker Task per Exchange Account
//!
//! Each registered account gets its own task in a `JoinSet`. A worker runs
//! a cycle on every interval tick or on-demand trigger, and exits on the
//! broadcast shutdown signal. Cycles run under `catch_unwind`: a panicking
//! cycle is logged and the worker keeps going. Every outcome is handed to
//! the optional `SyncObserver`.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::sync_reconciler::{SyncError, SyncReconciler, SyncReport};
use crate::domain::trade::AccountId;
use crate::ports::exchange::ExchangeClient;
use crate::ports::repository::{FillRepository, PositionRepository};
use crate::ports::telemetry::SyncObserver;

/// Anything that can run a sync cycle for an account.
#[async_trait]
pub trait AccountSync: Send + Sync + 'static {
  async fn sync_account(&self, account: &str) -> Result<SyncReport, SyncError>;
}

#[async_trait]
impl<E, F, P> AccountSync for SyncReconciler<E, F, P>
where
  E: ExchangeClient,
  F: FillRepository,
  P: PositionRepository,
{
  async fn sync_account(&self, account: &str) -> Result<SyncReport, SyncError> {
    self.sync(account).await
  }
}

struct Worker {
  account: AccountId,
  sync: Arc<dyn AccountSync>,
  trigger: Arc<Notify>,
}

/// Periodic + on-demand sync driver.
pub struct SyncScheduler {
  interval: Duration,
  workers: Vec<Worker>,
  triggers: HashMap<AccountId, Arc<Notify>>,
  observer: Option<Arc<dyn SyncObserver>>,
  shutdown_tx: broadcast::Sender<()>,
}

impl SyncScheduler {
  pub fn new(interval: Duration, shutdown_tx: broadcast::Sender<()>) -> Self {
    Self {
      interval,
      workers: Vec::new(),
      triggers: HashMap::new(),
      observer: None,
      shutdown_tx,
    }
  }

  pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
    self.observer = Some(observer);
    self
  }

  /// Register an account. Registering the same account twice replaces the
  /// earlier sync driver.
  pub fn register(&mut self, account: impl Into<AccountId>, sync: Arc<dyn AccountSync>) {
    let account = account.into();
    self.workers.retain(|w| w.account != account);
    let trigger = Arc::new(Notify::new());
    self.triggers.insert(account.clone(), Arc::clone(&trigger));
    self.workers.push(Worker {
      account,
      sync,
      trigger,
    });
  }

  /// Request an immediate cycle. Returns false for unknown accounts.
  /// Triggers that arrive while a cycle runs coalesce into one.
  pub fn trigger(&self, account: &str) -> bool {
    match self.triggers.get(account) {
      Some(trigger) => {
        trigger.notify_one();
        true
      }
      None => false,
    }
  }

  /// Spawn one worker task per account.
  #[instrument(skip(self))]
  pub fn spawn(&self) -> JoinSet<()> {
    let mut set = JoinSet::new();

    for worker in &self.workers {
      let account = worker.account.clone();
      let sync = Arc::clone(&worker.sync);
      let trigger = Arc::clone(&worker.trigger);
      let observer = self.observer.clone();
      let shutdown_rx = self.shutdown_tx.subscribe();
      let interval = self.interval;

      set.spawn(async move {
        run_worker(account, sync, trigger, observer, interval, shutdown_rx).await;
      });
    }

    info!(workers = set.len(), interval_s = self.interval.as_secs(), "Sync workers spawned");
    set
  }

  /// Spawn the workers and wait for all of them to exit.
  pub async fn run(&self) {
    let mut set = self.spawn();
    while let Some(joined) = set.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "Sync worker task failed");
      }
    }
    info!("All sync workers stopped");
  }
}

async fn run_worker(
  account: AccountId,
  sync: Arc<dyn AccountSync>,
  trigger: Arc<Notify>,
  observer: Option<Arc<dyn SyncObserver>>,
  interval: Duration,
  mut shutdown_rx: broadcast::Receiver<()>,
) {
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      biased;
      _ = shutdown_rx.recv() => {
        info!(account = %account, "Sync worker shutting down");
        return;
      }
      _ = ticker.tick() => {}
      _ = trigger.notified() => {
        debug!(account = %account, "Manual sync trigger");
      }
    }

    run_cycle(&account, sync.as_ref(), observer.as_deref()).await;
  }
}

/// Run one cycle with panic containment and report the outcome.
async fn run_cycle(account: &str, sync: &dyn AccountSync, observer: Option<&dyn SyncObserver>) {
  let outcome = AssertUnwindSafe(sync.sync_account(account))
    .catch_unwind()
    .await;

  let result = match outcome {
    Ok(result) => result,
    Err(payload) => {
      error!(
        account = %account,
        panic = %panic_message(payload.as_ref()),
        "Sync cycle panicked"
      );
      return;
    }
  };

  match &result {
    Ok(report) if !report.is_clean() => warn!(
      account = %account,
      failed = report.failed_symbols.len(),
      "Sync cycle finished with failed symbols, cursor held"
    ),
    Ok(_) => {}
    Err(SyncError::AlreadyRunning(_)) => {
      debug!(account = %account, "Sync cycle skipped, previous still running")
    }
    Err(e) => error!(account = %account, error = %e, kind = e.label(), "Sync cycle failed"),
  }

  if let Some(observer) = observer {
    observer.on_cycle(account, &result);
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
