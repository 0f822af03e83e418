//! Paper Exchange - Simulated Exchange Account
//!
//! In-memory implementation of `ExchangeClient` used for dry runs, local
//! development and tests. Orders fill immediately at the requested price
//! with a flat fee rate; realized PnL comes from the same position math
//! the reconciler uses. Trade history can be seeded from a JSONL file of
//! `TradeRecord`s, and failures can be injected per symbol or per
//! discovery source.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::domain::position::{apply_trade, Position, PositionTrade};
use crate::domain::trade::{compare_trade_ids, normalize_symbol, Symbol, TradeRecord};
use crate::ports::exchange::{ExchangeClient, ExchangeError, OrderAck, OrderRequest};

/// Discovery endpoints that can be failed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperSource {
    OpenPositions,
    Commission,
    RealizedPnl,
}

#[derive(Debug, Default)]
struct PaperBook {
    /// Trade history per symbol, ordered by trade ID.
    trades: BTreeMap<Symbol, Vec<TradeRecord>>,
    /// Open exchange-side positions per symbol.
    positions: HashMap<Symbol, Position>,
    symbol_failures: HashMap<Symbol, ExchangeError>,
    source_failures: HashMap<PaperSource, ExchangeError>,
    next_trade_id: u64,
    next_order_id: u64,
}

impl PaperBook {
    fn record(&mut self, account: &str, mut trade: TradeRecord) {
        trade.symbol = normalize_symbol(&trade.symbol);
        if let Ok(id) = trade.trade_id.parse::<u64>() {
            self.next_trade_id = self.next_trade_id.max(id + 1);
        }

        let position_trade = PositionTrade {
            account: account.to_string(),
            symbol: trade.symbol.clone(),
            action: trade.resolved_action(),
            quantity: trade.quantity,
            price: trade.price,
            fee: trade.fee,
            reported_pnl: trade.realized_pnl,
            executed_at_ms: trade.executed_at_ms,
            trade_id: trade.trade_id.clone(),
        };
        match apply_trade(self.positions.get(&trade.symbol), &position_trade) {
            Ok(change) => {
                let open = change.touched().into_iter().find(|p| p.is_open()).cloned();
                match open {
                    Some(p) => {
                        self.positions.insert(trade.symbol.clone(), p);
                    }
                    None if !change.touched().is_empty() => {
                        self.positions.remove(&trade.symbol);
                    }
                    None => {}
                }
            }
            Err(e) => warn!(trade_id = %trade.trade_id, error = %e, "Paper position not updated"),
        }

        let history = self.trades.entry(trade.symbol.clone()).or_default();
        let at = history
            .partition_point(|t| compare_trade_ids(&t.trade_id, &trade.trade_id) == Ordering::Less);
        history.insert(at, trade);
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), ExchangeError> {
        match self.symbol_failures.get(symbol) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn check_source(&self, source: PaperSource) -> Result<(), ExchangeError> {
        match self.source_failures.get(&source) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn symbols_since(&self, since_ms: i64, pred: impl Fn(&TradeRecord) -> bool) -> Vec<String> {
        self.trades
            .iter()
            .filter(|(_, history)| {
                history
                    .iter()
                    .any(|t| t.executed_at_ms >= since_ms && pred(t))
            })
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }
}

/// Simulated exchange account.
pub struct PaperExchange {
    account: String,
    fee_rate: Decimal,
    book: RwLock<PaperBook>,
}

impl PaperExchange {
    pub fn new(account: &str, fee_rate: Decimal) -> Self {
        Self {
            account: account.to_string(),
            fee_rate,
            book: RwLock::new(PaperBook {
                next_trade_id: 1,
                next_order_id: 1,
                ..PaperBook::default()
            }),
        }
    }

    /// Seed trade history from a JSONL file of trade records.
    ///
    /// Returns the number of trades loaded. Malformed lines are skipped.
    #[instrument(skip(self))]
    pub async fn load_seed(&self, path: &Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;

        let mut loaded = 0usize;
        let mut book = self.book.write().await;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(line) {
                Ok(trade) => {
                    book.record(&self.account, trade);
                    loaded += 1;
                }
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed seed line"),
            }
        }

        info!(account = %self.account, loaded, "Paper exchange seeded");
        Ok(loaded)
    }

    /// Add one executed trade to the simulated history.
    pub async fn push_trade(&self, trade: TradeRecord) {
        self.book.write().await.record(&self.account, trade);
    }

    /// Fail every trade fetch for `symbol` with `error`.
    pub async fn inject_failure(&self, symbol: &str, error: ExchangeError) {
        self.book
            .write()
            .await
            .symbol_failures
            .insert(normalize_symbol(symbol), error);
    }

    /// Fail one discovery endpoint with `error`.
    pub async fn inject_source_failure(&self, source: PaperSource, error: ExchangeError) {
        self.book.write().await.source_failures.insert(source, error);
    }

    /// Remove all injected failures.
    pub async fn clear_failures(&self) {
        let mut book = self.book.write().await;
        book.symbol_failures.clear();
        book.source_failures.clear();
    }

    /// Number of simulated trades across all symbols.
    pub async fn trade_count(&self) -> usize {
        self.book.read().await.trades.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn fetch_trades_by_time(
        &self,
        symbol: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, ExchangeError> {
        let book = self.book.read().await;
        book.check_symbol(symbol)?;
        let mut trades: Vec<TradeRecord> = book
            .trades
            .get(symbol)
            .map(|history| {
                history
                    .iter()
                    .filter(|t| t.executed_at_ms >= since_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        trades.sort_by(|a, b| {
            a.executed_at_ms
                .cmp(&b.executed_at_ms)
                .then_with(|| compare_trade_ids(&a.trade_id, &b.trade_id))
        });
        trades.truncate(limit);
        Ok(trades)
    }

    async fn fetch_trades_by_id(
        &self,
        symbol: &str,
        after_id: &str,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, ExchangeError> {
        let book = self.book.read().await;
        book.check_symbol(symbol)?;
        Ok(book
            .trades
            .get(symbol)
            .map(|history| {
                history
                    .iter()
                    .filter(|t| compare_trade_ids(&t.trade_id, after_id) == Ordering::Greater)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn open_position_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let book = self.book.read().await;
        book.check_source(PaperSource::OpenPositions)?;
        Ok(book.positions.keys().cloned().collect())
    }

    async fn commission_symbols(&self, since_ms: i64) -> Result<Vec<String>, ExchangeError> {
        let book = self.book.read().await;
        book.check_source(PaperSource::Commission)?;
        Ok(book.symbols_since(since_ms, |t| !t.fee.is_zero()))
    }

    async fn pnl_symbols(&self, since_ms: i64) -> Result<Vec<String>, ExchangeError> {
        let book = self.book.read().await;
        book.check_source(PaperSource::RealizedPnl)?;
        Ok(book.symbols_since(since_ms, |t| !t.realized_pnl.is_zero()))
    }

    #[instrument(skip(self), fields(account = %self.account))]
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let symbol = normalize_symbol(&order.symbol);
        let Some(price) = order.price.filter(|p| *p > Decimal::ZERO) else {
            return Err(ExchangeError::Rejected(
                "paper orders need a positive reference price".to_string(),
            ));
        };
        if order.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "quantity must be positive, got {}",
                order.quantity
            )));
        }
        if order.action.side() != order.side {
            return Err(ExchangeError::Rejected(format!(
                "{} cannot be a {} order",
                order.action, order.side
            )));
        }

        let mut book = self.book.write().await;
        book.check_symbol(&symbol)?;

        let realized = match book.positions.get(&symbol) {
            Some(p) if order.action.is_close() => {
                (price - p.entry_price) * order.quantity.min(p.size()) * p.quantity.signum()
            }
            _ => Decimal::ZERO,
        };

        let now = Utc::now().timestamp_millis();
        let order_id = format!("P-{}", book.next_order_id);
        book.next_order_id += 1;
        let trade = TradeRecord {
            trade_id: book.next_trade_id.to_string(),
            order_id: Some(order_id.clone()),
            symbol: symbol.clone(),
            side: order.side,
            price,
            quantity: order.quantity,
            realized_pnl: realized,
            fee: price * order.quantity * self.fee_rate,
            fee_asset: None,
            executed_at_ms: now,
            action: Some(order.action),
        };
        debug!(symbol = %symbol, trade_id = %trade.trade_id, %realized, "Paper order filled");
        book.record(&self.account, trade);

        Ok(OrderAck {
            exchange_order_id: order_id,
            accepted: true,
            timestamp_ms: now,
        })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<bool, ExchangeError> {
        // Paper orders fill on placement; nothing is ever resting.
        Ok(false)
    }
}
