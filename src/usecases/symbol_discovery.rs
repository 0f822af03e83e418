//! Symbol Discovery - Which Symbols Need a Sync This Cycle
//!
//! No single exchange endpoint reports "symbols that changed", so the
//! candidate set is the union of independent signals:
//! - commission events since the cursor
//! - currently open positions
//! - local fills newer than the cursor
//! - realized-PnL events since the cursor
//! - symbols left pending by a previous failed cycle
//!
//! Every source is best-effort. A failing source is logged and contributes
//! nothing; it never aborts the cycle. Delisted symbols are dropped.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use tracing::{debug, warn};

use super::resilience_gate::{call_exchange, ResilienceGate};
pub use crate::domain::sync::DiscoveryCounts;
use crate::domain::trade::{normalize_symbol, Symbol};
use crate::ports::exchange::ExchangeClient;
use crate::ports::repository::FillRepository;

/// Result of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
  /// Canonical symbols to sync, sorted.
  pub symbols: BTreeSet<Symbol>,
  pub counts: DiscoveryCounts,
}

/// Borrowed collaborators for one discovery pass.
pub struct SymbolDiscovery<'a, E: ExchangeClient, F: FillRepository> {
  pub exchange: &'a E,
  pub fills: &'a F,
  pub gate: Option<&'a ResilienceGate>,
  pub timeout: Duration,
}

impl<E: ExchangeClient, F: FillRepository> SymbolDiscovery<'_, E, F> {
  /// Union of all discovery sources since `since_ms`.
  pub async fn discover(
    &self,
    account: &str,
    since_ms: i64,
    pending_retry: &BTreeSet<Symbol>,
    delisted: &HashSet<Symbol>,
  ) -> Discovery {
    let mut counts = DiscoveryCounts::default();
    let mut candidates = BTreeSet::new();

    let commission = call_exchange(self.gate, self.timeout, || {
      self.exchange.commission_symbols(since_ms)
    })
    .await;
    let n = Self::absorb(&mut candidates, &mut counts, "commission", account, commission);
    counts.commission = n;

    let open =
      call_exchange(self.gate, self.timeout, || self.exchange.open_position_symbols()).await;
    let n = Self::absorb(&mut candidates, &mut counts, "open_positions", account, open);
    counts.open_positions = n;

    let local = self
      .fills
      .recent_fill_symbols(account, since_ms)
      .await
      .map_err(|e| format!("{e:#}"));
    let n = Self::absorb(&mut candidates, &mut counts, "local_fills", account, local);
    counts.local_fills = n;

    let pnl =
      call_exchange(self.gate, self.timeout, || self.exchange.pnl_symbols(since_ms)).await;
    let n = Self::absorb(&mut candidates, &mut counts, "realized_pnl", account, pnl);
    counts.realized_pnl = n;

    counts.pending_retry = pending_retry.len();
    candidates.extend(pending_retry.iter().cloned());

    let before = candidates.len();
    candidates.retain(|s| !delisted.contains(s));
    counts.excluded_delisted = before - candidates.len();

    debug!(
      account = %account,
      since_ms,
      symbols = candidates.len(),
      ?counts,
      "Symbol discovery complete"
    );

    Discovery {
      symbols: candidates,
      counts,
    }
  }

  /// Merge one source's symbols; returns how many it contributed.
  fn absorb<Err: std::fmt::Display>(
    candidates: &mut BTreeSet<Symbol>,
    counts: &mut DiscoveryCounts,
    source: &'static str,
    account: &str,
    result: Result<Vec<String>, Err>,
  ) -> usize {
    match result {
      Ok(symbols) => {
        let found: BTreeSet<Symbol> = symbols
          .iter()
          .map(|s| normalize_symbol(s))
          .filter(|s| !s.is_empty())
          .collect();
        let n = found.len();
        candidates.extend(found);
        n
      }
      Err(e) => {
        warn!(account = %account, source, error = %e, "Discovery source failed");
        counts.failed_sources.push(source);
        0
      }
    }
  }
}
