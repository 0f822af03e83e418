//! Fill Log - Append-only JSONL Order and Fill Records
//!
//! Orders and fills are appended to daily files named by ingestion date:
//! `orders/YYYY-MM-DD.jsonl` and `fills/YYYY-MM-DD.jsonl`. Each line is a
//! self-contained JSON record. The log is the source of truth; the query
//! index is rebuilt from it on startup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::domain::trade::{Fill, OrderRecord};

/// Append-only JSONL log with daily file rotation.
pub struct FillLog {
    /// Directory for order records.
    orders_dir: PathBuf,
    /// Directory for fill records.
    fills_dir: PathBuf,
}

impl FillLog {
    /// Create the log directories under `data_dir`.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let orders_dir = data_dir.join("orders");
        let fills_dir = data_dir.join("fills");

        fs::create_dir_all(&orders_dir)
            .await
            .context("Failed to create orders directory")?;
        fs::create_dir_all(&fills_dir)
            .await
            .context("Failed to create fills directory")?;

        Ok(Self {
            orders_dir,
            fills_dir,
        })
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn append_order(&self, order: &OrderRecord) -> Result<()> {
        append_line(&self.orders_dir, order).await
    }

    #[instrument(skip(self, fill), fields(trade_id = %fill.exchange_trade_id))]
    pub async fn append_fill(&self, fill: &Fill) -> Result<()> {
        append_line(&self.fills_dir, fill).await
    }

    /// Every logged order.
    pub async fn load_orders(&self) -> Result<Vec<OrderRecord>> {
        let orders: Vec<OrderRecord> = load_lines(&self.orders_dir).await?;
        info!(count = orders.len(), "Loaded order records");
        Ok(orders)
    }

    /// Every logged fill, in execution order.
    pub async fn load_fills(&self) -> Result<Vec<Fill>> {
        let mut fills: Vec<Fill> = load_lines(&self.fills_dir).await?;
        fills.sort_by_key(|f| f.executed_at_ms);
        info!(count = fills.len(), "Loaded fill records");
        Ok(fills)
    }

    /// Check if the fills directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let test_path = self.fills_dir.join(".health_check");
        let result = fs::write(&test_path, b"ok").await;
        let _ = fs::remove_file(&test_path).await;
        result.is_ok()
    }
}

async fn append_line<T: Serialize>(dir: &Path, record: &T) -> Result<()> {
    let date = Utc::now().format("%Y-%m-%d").to_string();
    let path = dir.join(format!("{date}.jsonl"));

    let mut json = serde_json::to_string(record).context("Failed to serialize record")?;
    json.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    file.write_all(json.as_bytes())
        .await
        .context("Failed to write record")?;
    file.flush().await.context("Failed to flush log")?;

    Ok(())
}

async fn load_lines<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let content = fs::read_to_string(&path).await?;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    // a torn final line after a crash lands here
                    warn!(file = %path.display(), error = %e, "Skipping malformed record");
                }
            }
        }
    }

    Ok(records)
}
