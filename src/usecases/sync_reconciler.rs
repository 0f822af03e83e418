//! Sync Reconciler - Incremental Fill and Position Synchronization
//!
//! One `sync` call is one cycle for one exchange account:
//! 1. Resolve the cursor (cached, else last persisted fill + buffer, else
//!    now - lookback; a future-dated recovery falls back to the lookback)
//! 2. Discover candidate symbols (see `symbol_discovery`)
//! 3. Fetch each symbol incrementally: by trade ID when one is known,
//!    else by time from the cursor. Failures are isolated per symbol
//! 4. Sort everything ascending by execution time and ingest idempotently:
//!    position update, then order record, then fill. The fill is written
//!    last, so a cycle that aborts mid-trade refetches that trade and the
//!    position math skips it if the position already holds it. Closed
//!    trades are fed to the optional `RiskBreaker`
//! 5. Advance the cursor to the newest ingested trade, only if no symbol
//!    failed
//!
//! Per-account state lives in an injected `SyncCoordinator`. A second
//! cycle for an account that is already syncing is rejected.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::position_builder::PositionBuilder;
use super::resilience_gate::{call_exchange, ResilienceGate};
use super::risk_breaker::RiskBreaker;
use super::symbol_discovery::SymbolDiscovery;
use crate::config::SyncConfig;
use crate::domain::errors::PositionError;
use crate::domain::position::{PositionChange, PositionTrade};
pub use crate::domain::sync::{SymbolFailure, SyncError, SyncReport};
use crate::domain::trade::{
  compare_trade_ids, AccountId, Fill, OrderRecord, Symbol, TradeId, TradeRecord,
};
use crate::ports::exchange::{ErrorKind, ExchangeClient, ExchangeError};
use crate::ports::repository::{FillRepository, PositionRepository};

const HOUR_MS: i64 = 3_600_000;

fn persistence(account: &str, source: anyhow::Error) -> SyncError {
  SyncError::Persistence {
    account: account.to_string(),
    source,
  }
}

/// Reconciler tuning.
#[derive(Debug, Clone)]
pub struct SyncSettings {
  /// Bound on every remote call.
  pub fetch_timeout: Duration,
  /// Trades requested per page.
  pub page_limit: usize,
  /// Page cap per symbol per cycle.
  pub max_pages: usize,
  /// Symbols fetched concurrently.
  pub fetch_concurrency: usize,
  /// Lookback for accounts with no usable cursor (ms).
  pub initial_lookback_ms: i64,
  /// Added to the last persisted fill time on recovery (ms).
  pub cursor_buffer_ms: i64,
  /// Commission asset recorded when the exchange omits it.
  pub default_commission_asset: String,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self::from(&SyncConfig::default())
  }
}

impl From<&SyncConfig> for SyncSettings {
  fn from(config: &SyncConfig) -> Self {
    Self {
      fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
      page_limit: config.page_limit.max(1),
      max_pages: config.max_pages.max(1),
      fetch_concurrency: config.fetch_concurrency.max(1),
      initial_lookback_ms: config.initial_lookback_hours as i64 * HOUR_MS,
      cursor_buffer_ms: config.cursor_buffer_ms,
      default_commission_asset: config.default_commission_asset.clone(),
    }
  }
}

// ────────────────────────────────────────────
// Coordinator
// ────────────────────────────────────────────

#[derive(Debug, Default)]
struct AccountState {
  cursor_ms: Option<i64>,
  pending_retry: BTreeSet<Symbol>,
  delisted: HashSet<Symbol>,
}

#[derive(Debug, Default)]
struct AccountSlot {
  /// Held for the duration of a cycle.
  cycle: Mutex<()>,
  state: RwLock<AccountState>,
}

/// Per-account sync state: cursor, retry queue, delisted set, and the
/// cycle lock. Shared by the scheduler, manual triggers and operators.
#[derive(Debug, Default)]
pub struct SyncCoordinator {
  slots: RwLock<HashMap<AccountId, Arc<AccountSlot>>>,
}

impl SyncCoordinator {
  pub fn new() -> Self {
    Self::default()
  }

  async fn slot(&self, account: &str) -> Arc<AccountSlot> {
    if let Some(slot) = self.slots.read().await.get(account) {
      return Arc::clone(slot);
    }
    let mut slots = self.slots.write().await;
    Arc::clone(slots.entry(account.to_string()).or_default())
  }

  /// Cached cursor, if one has been resolved.
  pub async fn cursor(&self, account: &str) -> Option<i64> {
    self.slot(account).await.state.read().await.cursor_ms
  }

  /// Symbols queued for retry by the last cycle.
  pub async fn pending_retry(&self, account: &str) -> BTreeSet<Symbol> {
    self.slot(account).await.state.read().await.pending_retry.clone()
  }

  /// Symbols known to be delisted.
  pub async fn delisted(&self, account: &str) -> HashSet<Symbol> {
    self.slot(account).await.state.read().await.delisted.clone()
  }

  pub async fn is_running(&self, account: &str) -> bool {
    self.slot(account).await.cycle.try_lock().is_err()
  }

  /// Accounts seen so far.
  pub async fn accounts(&self) -> Vec<AccountId> {
    let mut accounts: Vec<_> = self.slots.read().await.keys().cloned().collect();
    accounts.sort();
    accounts
  }

  /// Drop the cached cursor and retry queue so the next cycle re-resolves
  /// from the store.
  pub async fn reset(&self, account: &str) -> Result<(), SyncError> {
    let slot = self.slot(account).await;
    let Ok(_cycle) = slot.cycle.try_lock() else {
      return Err(SyncError::AlreadyRunning(account.to_string()));
    };
    let mut state = slot.state.write().await;
    state.cursor_ms = None;
    state.pending_retry.clear();
    info!(account = %account, "Sync state reset");
    Ok(())
  }
}

// ────────────────────────────────────────────
// Reconciler
// ────────────────────────────────────────────

struct SymbolFetch {
  trades: Vec<TradeRecord>,
  /// False when the page cap cut the fetch short.
  complete: bool,
}

/// Incremental reconciler for one exchange collaborator.
pub struct SyncReconciler<E, F, P>
where
  E: ExchangeClient,
  F: FillRepository,
  P: PositionRepository,
{
  exchange: Arc<E>,
  fills: Arc<F>,
  positions: PositionBuilder<P>,
  coordinator: Arc<SyncCoordinator>,
  gate: Option<Arc<ResilienceGate>>,
  risk: Option<Arc<RiskBreaker>>,
  settings: SyncSettings,
}

impl<E, F, P> SyncReconciler<E, F, P>
where
  E: ExchangeClient,
  F: FillRepository,
  P: PositionRepository,
{
  pub fn new(
    exchange: Arc<E>,
    fills: Arc<F>,
    positions: Arc<P>,
    coordinator: Arc<SyncCoordinator>,
    settings: SyncSettings,
  ) -> Self {
    Self {
      exchange,
      fills,
      positions: PositionBuilder::new(positions),
      coordinator,
      gate: None,
      risk: None,
      settings,
    }
  }

  /// Route every exchange call through `gate`.
  pub fn with_gate(mut self, gate: Arc<ResilienceGate>) -> Self {
    self.gate = Some(gate);
    self
  }

  /// Feed every realized close into `risk`.
  pub fn with_risk(mut self, risk: Arc<RiskBreaker>) -> Self {
    self.risk = Some(risk);
    self
  }

  pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
    &self.coordinator
  }

  pub fn gate(&self) -> Option<&Arc<ResilienceGate>> {
    self.gate.as_ref()
  }

  /// Operator re-sync: forget the cached cursor for `account`.
  pub async fn reset_cursor(&self, account: &str) -> Result<(), SyncError> {
    self.coordinator.reset(account).await
  }

  /// Run one sync cycle for `account`.
  ///
  /// # Errors
  /// - `AlreadyRunning` if a cycle for the account is in progress
  /// - `Persistence` / `Position` on store failures or invariant
  ///   violations; the cursor is left untouched
  ///
  /// Per-symbol fetch failures are not errors: they are reported in
  /// `SyncReport::failed_symbols` and hold the cursor.
  #[instrument(skip(self))]
  pub async fn sync(&self, account: &str) -> Result<SyncReport, SyncError> {
    let slot = self.coordinator.slot(account).await;
    let Ok(_cycle) = slot.cycle.try_lock() else {
      debug!("Cycle already in progress, rejecting");
      return Err(SyncError::AlreadyRunning(account.to_string()));
    };

    let started = Instant::now();
    let now_ms = Utc::now().timestamp_millis();

    // Step 1: cursor
    let cursor = self.resolve_cursor(account, &slot, now_ms).await?;
    let (pending, delisted) = {
      let state = slot.state.read().await;
      (state.pending_retry.clone(), state.delisted.clone())
    };

    // Step 2: discovery
    let discovery = SymbolDiscovery {
      exchange: self.exchange.as_ref(),
      fills: self.fills.as_ref(),
      gate: self.gate.as_deref(),
      timeout: self.settings.fetch_timeout,
    }
    .discover(account, cursor, &pending, &delisted)
    .await;

    let mut report = SyncReport {
      account: account.to_string(),
      cursor_before_ms: cursor,
      cursor_after_ms: cursor,
      symbols_discovered: discovery.symbols.len(),
      discovery: discovery.counts.clone(),
      ..SyncReport::default()
    };

    // Step 3: per-symbol fetch
    let last_ids = self
      .fills
      .max_trade_ids(account)
      .await
      .map_err(|e| persistence(account, e))?;

    let outcomes: Vec<(Symbol, Result<SymbolFetch, ExchangeError>)> =
      stream::iter(discovery.symbols.iter().cloned())
        .map(|symbol| {
          let last_id = last_ids.get(&symbol).cloned();
          async move {
            let result = self.fetch_symbol(&symbol, cursor, last_id).await;
            (symbol, result)
          }
        })
        .buffer_unordered(self.settings.fetch_concurrency)
        .collect()
        .await;

    let mut trades = Vec::new();
    for (symbol, outcome) in outcomes {
      match outcome {
        Ok(fetch) => {
          if !fetch.complete {
            warn!(symbol = %symbol, pages = self.settings.max_pages, "Page cap reached, continuing next cycle");
            report.incomplete_symbols.push(symbol);
          }
          trades.extend(fetch.trades);
        }
        Err(e) if e.kind() == ErrorKind::Permanent => {
          info!(symbol = %symbol, "Symbol delisted, excluding from future cycles");
          report.delisted_symbols.push(symbol);
        }
        Err(e) => {
          warn!(symbol = %symbol, kind = e.label(), error = %e, "Symbol fetch failed, queued for retry");
          report.failed_symbols.push(SymbolFailure {
            symbol,
            kind: e.label(),
            error: e.to_string(),
          });
        }
      }
    }
    report.trades_fetched = trades.len();

    // Step 4: global chronological ingestion
    trades.sort_by(|a, b| {
      a.executed_at_ms
        .cmp(&b.executed_at_ms)
        .then_with(|| compare_trade_ids(&a.trade_id, &b.trade_id))
    });
    let latest = self.ingest(account, trades, &mut report).await?;

    // Step 5: checkpoint
    {
      let mut state = slot.state.write().await;
      state.delisted.extend(report.delisted_symbols.iter().cloned());
      state.pending_retry = report
        .failed_symbols
        .iter()
        .map(|f| f.symbol.clone())
        .chain(report.incomplete_symbols.iter().cloned())
        .collect();

      if report.is_clean() {
        if let Some(latest) = latest.filter(|t| *t > cursor) {
          state.cursor_ms = Some(latest);
          report.cursor_after_ms = latest;
          report.cursor_advanced = true;
        }
      }
    }

    report.failed_symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    report.duration_ms = started.elapsed().as_millis() as u64;

    info!(
      symbols = report.symbols_discovered,
      fetched = report.trades_fetched,
      ingested = report.trades_ingested,
      skipped = report.trades_skipped,
      failed = report.failed_symbols.len(),
      delisted = report.delisted_symbols.len(),
      cursor_advanced = report.cursor_advanced,
      cursor_ms = report.cursor_after_ms,
      duration_ms = report.duration_ms,
      "Sync cycle complete"
    );

    Ok(report)
  }

  /// Cached cursor, else recovered from the store. Cached on first
  /// resolution so a held cursor stays at its pre-cycle value.
  async fn resolve_cursor(
    &self,
    account: &str,
    slot: &AccountSlot,
    now_ms: i64,
  ) -> Result<i64, SyncError> {
    if let Some(cursor) = slot.state.read().await.cursor_ms {
      return Ok(cursor);
    }

    let floor = now_ms - self.settings.initial_lookback_ms;
    let recovered = match self
      .fills
      .last_fill_time(account)
      .await
      .map_err(|e| persistence(account, e))?
    {
      Some(last) if last > now_ms => {
        warn!(last_fill_ms = last, "Last fill is in the future, using lookback");
        floor
      }
      Some(last) => last + self.settings.cursor_buffer_ms,
      None => floor,
    };

    let mut state = slot.state.write().await;
    let cursor = *state.cursor_ms.get_or_insert(recovered);
    info!(cursor_ms = cursor, "Cursor resolved");
    Ok(cursor)
  }

  /// Fetch one symbol, paging by trade ID while pages come back full.
  async fn fetch_symbol(
    &self,
    symbol: &str,
    cursor_ms: i64,
    last_id: Option<TradeId>,
  ) -> Result<SymbolFetch, ExchangeError> {
    let limit = self.settings.page_limit;
    let timeout = self.settings.fetch_timeout;
    let gate = self.gate.as_deref();
    let mut after_id = last_id;
    let mut trades = Vec::new();

    for _ in 0..self.settings.max_pages {
      let page = match after_id.as_deref() {
        Some(id) => {
          call_exchange(gate, timeout, || self.exchange.fetch_trades_by_id(symbol, id, limit))
            .await?
        }
        None => {
          call_exchange(gate, timeout, || {
            self.exchange.fetch_trades_by_time(symbol, cursor_ms, limit)
          })
          .await?
        }
      };

      let full = page.len() >= limit;
      if let Some(max_id) = page
        .iter()
        .map(|t| t.trade_id.as_str())
        .max_by(|a, b| compare_trade_ids(a, b))
      {
        after_id = Some(max_id.to_string());
      }
      trades.extend(page.into_iter().map(|mut t| {
        t.symbol = symbol.to_string();
        t
      }));

      if !full {
        return Ok(SymbolFetch {
          trades,
          complete: true,
        });
      }
    }

    Ok(SymbolFetch {
      trades,
      complete: false,
    })
  }

  /// Persist order, fill and position for every unseen trade, in order.
  /// Returns the newest ingested execution time.
  async fn ingest(
    &self,
    account: &str,
    trades: Vec<TradeRecord>,
    report: &mut SyncReport,
  ) -> Result<Option<i64>, SyncError> {
    let mut seen = HashSet::new();
    let mut latest = None;

    for trade in trades {
      if !seen.insert(trade.trade_id.clone()) {
        report.trades_skipped += 1;
        continue;
      }

      let existing = self
        .fills
        .fill_by_exchange_trade_id(account, &trade.trade_id)
        .await
        .map_err(|e| persistence(account, e))?;
      if existing.is_some() {
        report.trades_skipped += 1;
        continue;
      }

      let order = OrderRecord::from_trade(account, &trade, &trade.symbol);
      let fill = Fill::from_trade(
        &order,
        &trade,
        &self.settings.default_commission_asset,
        Utc::now().timestamp_millis(),
      );

      let position_trade = PositionTrade {
        account: account.to_string(),
        symbol: trade.symbol.clone(),
        action: fill.action,
        quantity: trade.quantity,
        price: trade.price,
        fee: trade.fee,
        reported_pnl: trade.realized_pnl,
        executed_at_ms: trade.executed_at_ms,
        trade_id: trade.trade_id.clone(),
      };

      match self.positions.process_trade(&position_trade).await {
        Ok(change) => {
          report.positions_touched += change.touched().len();
          report.realized_pnl += change.realized();
          self.feed_risk(&change, trade.executed_at_ms, report).await;
        }
        Err(PositionError::InvalidTrade { trade_id, reason }) => {
          warn!(trade_id = %trade_id, reason = %reason, "Fill recorded without position update");
          report.position_errors += 1;
        }
        Err(e) => return Err(e.into()),
      }

      self
        .fills
        .create_order(&order)
        .await
        .with_context(|| format!("create order for trade {}", trade.trade_id))
        .map_err(|e| persistence(account, e))?;
      self
        .fills
        .create_fill(&fill)
        .await
        .with_context(|| format!("create fill for trade {}", trade.trade_id))
        .map_err(|e| persistence(account, e))?;

      report.trades_ingested += 1;
      latest = latest.max(Some(trade.executed_at_ms));
    }

    Ok(latest)
  }

  async fn feed_risk(&self, change: &PositionChange, executed_at_ms: i64, report: &mut SyncReport) {
    let Some(risk) = &self.risk else {
      return;
    };
    if !matches!(
      change,
      PositionChange::Reduced { .. } | PositionChange::Closed { .. } | PositionChange::Flipped { .. }
    ) {
      return;
    }
    let closed_at = Utc
      .timestamp_millis_opt(executed_at_ms)
      .single()
      .unwrap_or_else(Utc::now);
    risk.record_realized_pnl(change.realized(), None, closed_at).await;
    report.closed_trades += 1;
  }
}
