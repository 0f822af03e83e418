//! In-Memory Store - Fill and Position Repositories Behind RwLocks
//!
//! Used directly for tests and paper runs, and as the query index of the
//! JSONL store. Fills are keyed by (account, exchange trade ID) and a
//! duplicate key is rejected.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::position::Position;
use crate::domain::trade::{compare_trade_ids, AccountId, Fill, OrderRecord, Symbol, TradeId};
use crate::ports::repository::{FillRepository, PositionRepository};

#[derive(Debug, Default)]
struct FillTables {
    orders: HashMap<Uuid, OrderRecord>,
    fills: HashMap<(AccountId, TradeId), Fill>,
}

/// Thread-safe in-memory implementation of both repository ports.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<FillTables>,
    positions: RwLock<HashMap<Uuid, Position>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a previously persisted order without checks (log replay).
    pub(crate) async fn restore_order(&self, order: OrderRecord) {
        self.tables.write().await.orders.insert(order.id, order);
    }

    /// Insert a previously persisted fill (log replay). Returns false for
    /// a duplicate key, which is kept out of the index.
    pub(crate) async fn restore_fill(&self, fill: Fill) -> bool {
        let key = (fill.account.clone(), fill.exchange_trade_id.clone());
        let mut tables = self.tables.write().await;
        if tables.fills.contains_key(&key) {
            return false;
        }
        tables.fills.insert(key, fill);
        true
    }

    /// Replace all positions (snapshot load).
    pub(crate) async fn restore_positions(&self, positions: Vec<Position>) {
        let mut map = self.positions.write().await;
        map.clear();
        map.extend(positions.into_iter().map(|p| (p.id, p)));
    }

    /// Every position across accounts, ordered by open time.
    pub async fn all_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.read().await.values().cloned().collect();
        positions.sort_by(|a, b| a.opened_at_ms.cmp(&b.opened_at_ms).then(a.id.cmp(&b.id)));
        positions
    }

    /// All fills for an account, in execution order.
    pub async fn fills(&self, account: &str) -> Vec<Fill> {
        let tables = self.tables.read().await;
        let mut fills: Vec<Fill> = tables
            .fills
            .values()
            .filter(|f| f.account == account)
            .cloned()
            .collect();
        fills.sort_by(|a, b| {
            a.executed_at_ms
                .cmp(&b.executed_at_ms)
                .then_with(|| compare_trade_ids(&a.exchange_trade_id, &b.exchange_trade_id))
        });
        fills
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }
}

#[async_trait]
impl FillRepository for InMemoryStore {
    async fn fill_by_exchange_trade_id(&self, account: &str, trade_id: &str) -> Result<Option<Fill>> {
        let key = (account.to_string(), trade_id.to_string());
        Ok(self.tables.read().await.fills.get(&key).cloned())
    }

    async fn create_order(&self, order: &OrderRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order.id) {
            bail!("order {} already exists", order.id);
        }
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn create_fill(&self, fill: &Fill) -> Result<()> {
        let key = (fill.account.clone(), fill.exchange_trade_id.clone());
        let mut tables = self.tables.write().await;
        if tables.fills.contains_key(&key) {
            bail!(
                "fill for trade {} already exists for account {}",
                fill.exchange_trade_id,
                fill.account
            );
        }
        tables.fills.insert(key, fill.clone());
        Ok(())
    }

    async fn last_fill_time(&self, account: &str) -> Result<Option<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .fills
            .values()
            .filter(|f| f.account == account)
            .map(|f| f.executed_at_ms)
            .max())
    }

    async fn max_trade_ids(&self, account: &str) -> Result<HashMap<Symbol, TradeId>> {
        let tables = self.tables.read().await;
        let mut ids: HashMap<Symbol, TradeId> = HashMap::new();
        for fill in tables.fills.values().filter(|f| f.account == account) {
            match ids.get_mut(&fill.symbol) {
                Some(current) => {
                    if compare_trade_ids(&fill.exchange_trade_id, current).is_gt() {
                        *current = fill.exchange_trade_id.clone();
                    }
                }
                None => {
                    ids.insert(fill.symbol.clone(), fill.exchange_trade_id.clone());
                }
            }
        }
        Ok(ids)
    }

    async fn recent_fill_symbols(&self, account: &str, since_ms: i64) -> Result<Vec<Symbol>> {
        let tables = self.tables.read().await;
        let mut symbols: Vec<Symbol> = tables
            .fills
            .values()
            .filter(|f| f.account == account && f.executed_at_ms >= since_ms)
            .map(|f| f.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }

    async fn fill_count(&self, account: &str) -> Result<usize> {
        let tables = self.tables.read().await;
        Ok(tables.fills.keys().filter(|(a, _)| a == account).count())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[async_trait]
impl PositionRepository for InMemoryStore {
    async fn open_positions(&self, account: &str, symbol: &str) -> Result<Vec<Position>> {
        let positions = self.positions.read().await;
        Ok(positions
            .values()
            .filter(|p| p.account == account && p.symbol == symbol && p.is_open())
            .cloned()
            .collect())
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.id, position.clone());
        Ok(())
    }

    async fn save_positions(&self, positions: &[Position]) -> Result<()> {
        let mut map = self.positions.write().await;
        map.extend(positions.iter().map(|p| (p.id, p.clone())));
        Ok(())
    }

    async fn positions(&self, account: &str) -> Result<Vec<Position>> {
        let mut positions: Vec<Position> = self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.account == account)
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.opened_at_ms.cmp(&b.opened_at_ms).then(a.id.cmp(&b.id)));
        Ok(positions)
    }
}
