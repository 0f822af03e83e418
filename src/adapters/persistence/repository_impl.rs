//! JSONL Store - File-backed Adapter for the Repository Ports
//!
//! Combines `FillLog` (append-only JSONL orders and fills),
//! `PositionSnapshotStore` (atomic JSON positions) and an `InMemoryStore`
//! index that answers queries. The index is rebuilt from disk on `open`.
//!
//! Writes hit disk before the index, so a failed append or snapshot never
//! leaves the index ahead of what is on disk.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::fills::FillLog;
use super::memory::InMemoryStore;
use super::state::PositionSnapshotStore;
use crate::domain::position::Position;
use crate::domain::trade::{Fill, OrderRecord, Symbol, TradeId};
use crate::ports::repository::{FillRepository, PositionRepository};

/// File-backed fill and position repository.
pub struct JsonlStore {
    index: InMemoryStore,
    log: FillLog,
    snapshots: PositionSnapshotStore,
    /// Held from building a snapshot until the index commits it.
    position_lock: Mutex<()>,
}

impl JsonlStore {
    /// Open (or create) a store in `data_dir` and rebuild the index.
    #[instrument]
    pub async fn open(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir);
        let log = FillLog::new(dir).await?;
        let snapshots = PositionSnapshotStore::new(dir).await?;
        let index = InMemoryStore::new();

        for order in log.load_orders().await? {
            index.restore_order(order).await;
        }

        let mut duplicates = 0usize;
        for fill in log.load_fills().await? {
            if !index.restore_fill(fill).await {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(duplicates, "Duplicate fills in log ignored");
        }

        index.restore_positions(snapshots.load().await?).await;

        info!(data_dir, orders = index.order_count().await, "JSONL store opened");

        Ok(Self {
            index,
            log,
            snapshots,
            position_lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl FillRepository for JsonlStore {
    async fn fill_by_exchange_trade_id(&self, account: &str, trade_id: &str) -> Result<Option<Fill>> {
        self.index.fill_by_exchange_trade_id(account, trade_id).await
    }

    async fn create_order(&self, order: &OrderRecord) -> Result<()> {
        self.log.append_order(order).await?;
        self.index.create_order(order).await
    }

    async fn create_fill(&self, fill: &Fill) -> Result<()> {
        if self
            .index
            .fill_by_exchange_trade_id(&fill.account, &fill.exchange_trade_id)
            .await?
            .is_some()
        {
            bail!(
                "fill for trade {} already exists for account {}",
                fill.exchange_trade_id,
                fill.account
            );
        }
        self.log.append_fill(fill).await?;
        self.index.create_fill(fill).await
    }

    async fn last_fill_time(&self, account: &str) -> Result<Option<i64>> {
        self.index.last_fill_time(account).await
    }

    async fn max_trade_ids(&self, account: &str) -> Result<HashMap<Symbol, TradeId>> {
        self.index.max_trade_ids(account).await
    }

    async fn recent_fill_symbols(&self, account: &str, since_ms: i64) -> Result<Vec<Symbol>> {
        self.index.recent_fill_symbols(account, since_ms).await
    }

    async fn fill_count(&self, account: &str) -> Result<usize> {
        self.index.fill_count(account).await
    }

    async fn is_healthy(&self) -> bool {
        self.log.is_healthy().await && self.snapshots.is_healthy().await
    }
}

#[async_trait]
impl PositionRepository for JsonlStore {
    async fn open_positions(&self, account: &str, symbol: &str) -> Result<Vec<Position>> {
        self.index.open_positions(account, symbol).await
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        self.save_positions(std::slice::from_ref(position)).await
    }

    async fn save_positions(&self, positions: &[Position]) -> Result<()> {
        let _guard = self.position_lock.lock().await;

        let mut next = self.index.all_positions().await;
        for position in positions {
            match next.iter_mut().find(|p| p.id == position.id) {
                Some(slot) => *slot = position.clone(),
                None => next.push(position.clone()),
            }
        }

        self.snapshots.save(&next).await?;
        self.index.save_positions(positions).await
    }

    async fn positions(&self, account: &str) -> Result<Vec<Position>> {
        self.index.positions(account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{apply_trade, PositionChange, PositionTrade};
    use crate::domain::trade::{OrderAction, TradeRecord, TradeSide};
    use rust_decimal_macros::dec;

    fn temp_dir() -> String {
        std::env::temp_dir()
            .join(format!("sentinel-store-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned()
    }

    fn trade(id: &str) -> TradeRecord {
        TradeRecord {
            trade_id: id.to_string(),
            order_id: Some(format!("o-{id}")),
            symbol: "ETHUSDT".to_string(),
            side: TradeSide::Buy,
            price: dec!(2000),
            quantity: dec!(0.5),
            realized_pnl: dec!(0),
            fee: dec!(0.6),
            fee_asset: Some("USDT".to_string()),
            executed_at_ms: 1_700_000_000_000,
            action: Some(OrderAction::OpenLong),
        }
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index_and_positions() {
        let dir = temp_dir();
        {
            let store = JsonlStore::open(&dir).await.unwrap();
            let t = trade("100");
            let order = OrderRecord::from_trade("acct", &t, "ETHUSDT");
            store.create_order(&order).await.unwrap();
            let fill = Fill::from_trade(&order, &t, "USDT", 1_700_000_000_100);
            store.create_fill(&fill).await.unwrap();
            assert!(store.create_fill(&fill).await.is_err());

            let change = apply_trade(
                None,
                &PositionTrade {
                    account: "acct".to_string(),
                    symbol: "ETHUSDT".to_string(),
                    action: OrderAction::OpenLong,
                    quantity: dec!(0.5),
                    price: dec!(2000),
                    fee: dec!(0.6),
                    reported_pnl: dec!(0),
                    executed_at_ms: 1_700_000_000_000,
                    trade_id: "100".to_string(),
                },
            )
            .unwrap();
            for p in change.touched() {
                store.save_position(p).await.unwrap();
            }
        }

        let reopened = JsonlStore::open(&dir).await.unwrap();
        assert_eq!(reopened.fill_count("acct").await.unwrap(), 1);
        assert!(reopened
            .fill_by_exchange_trade_id("acct", "100")
            .await
            .unwrap()
            .is_some());
        let open = reopened.open_positions("acct", "ETHUSDT").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].entry_price, dec!(2000));
        assert!(reopened.is_healthy().await);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_failed_snapshot_leaves_index_unchanged() {
        let dir = temp_dir();
        let store = JsonlStore::open(&dir).await.unwrap();
        let position = |trade_id: &str, qty| {
            let change = apply_trade(
                None,
                &PositionTrade {
                    account: "acct".to_string(),
                    symbol: "ETHUSDT".to_string(),
                    action: OrderAction::OpenLong,
                    quantity: qty,
                    price: dec!(2000),
                    fee: dec!(0),
                    reported_pnl: dec!(0),
                    executed_at_ms: 1_700_000_000_000,
                    trade_id: trade_id.to_string(),
                },
            )
            .unwrap();
            match change {
                PositionChange::Opened(p) => p,
                other => panic!("expected Opened, got {other:?}"),
            }
        };

        let first = position("1", dec!(1));
        store.save_position(&first).await.unwrap();

        // A directory squatting on the tmp path makes the snapshot write fail.
        let tmp = Path::new(&dir).join("positions.json.tmp");
        std::fs::create_dir_all(&tmp).unwrap();

        let mut grown = first.clone();
        grown.quantity = dec!(3);
        assert!(store.save_position(&grown).await.is_err());
        assert!(store.save_position(&position("2", dec!(5))).await.is_err());

        let positions = store.positions("acct").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(1));

        // Once the disk recovers, only what was acknowledged is persisted.
        std::fs::remove_dir_all(&tmp).unwrap();
        let mut other = first.clone();
        other.symbol = "BTCUSDT".to_string();
        other.id = uuid::Uuid::new_v4();
        store.save_position(&other).await.unwrap();

        let reopened = JsonlStore::open(&dir).await.unwrap();
        let eth = reopened.open_positions("acct", "ETHUSDT").await.unwrap();
        assert_eq!(eth.len(), 1);
        assert_eq!(eth[0].quantity, dec!(1));
        assert_eq!(reopened.positions("acct").await.unwrap().len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
