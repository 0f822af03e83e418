//! Position Snapshot Store - Atomic JSON Position Persistence
//!
//! Saves every position to `positions.json` using atomic writes (write to
//! a tmp file, then rename), so the file is always either the old or the
//! new version, never a partial write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::domain::position::Position;

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk snapshot format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub version: u32,
    pub saved_at_ms: i64,
    pub positions: Vec<Position>,
}

/// Atomic JSON snapshot store for positions.
pub struct PositionSnapshotStore {
    /// Path to positions.json.
    state_path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
    /// Serializes writers so two saves never share the tmp file.
    write_lock: Mutex<()>,
}

impl PositionSnapshotStore {
    /// Create a store in `data_dir`, creating the directory if needed.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .context("Failed to create data directory")?;

        Ok(Self {
            state_path: data_dir.join("positions.json"),
            tmp_path: data_dir.join("positions.json.tmp"),
            write_lock: Mutex::new(()),
        })
    }

    /// Save a full snapshot atomically (tmp → rename).
    #[instrument(skip(self, positions), fields(count = positions.len()))]
    pub async fn save(&self, positions: &[Position]) -> Result<()> {
        let snapshot = PositionSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at_ms: Utc::now().timestamp_millis(),
            positions: positions.to_vec(),
        };
        let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize positions")?;

        let _guard = self.write_lock.lock().await;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp positions file")?;

        fs::rename(&self.tmp_path, &self.state_path)
            .await
            .context("Failed to rename positions file")?;

        debug!(path = %self.state_path.display(), "Position snapshot saved");
        Ok(())
    }

    /// Load the latest snapshot. Empty on first startup.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Vec<Position>> {
        if !fs::try_exists(&self.state_path).await.unwrap_or(false) {
            info!("No position snapshot found, starting fresh");
            return Ok(Vec::new());
        }

        let json = fs::read_to_string(&self.state_path)
            .await
            .context("Failed to read positions file")?;

        let snapshot: PositionSnapshot =
            serde_json::from_str(&json).context("Failed to parse positions JSON")?;

        info!(
            version = snapshot.version,
            positions = snapshot.positions.len(),
            "Position snapshot loaded"
        );

        Ok(snapshot.positions)
    }

    /// Check if the snapshot file is readable.
    pub async fn is_healthy(&self) -> bool {
        if !fs::try_exists(&self.state_path).await.unwrap_or(false) {
            return true; // First run is OK
        }
        fs::metadata(&self.state_path).await.is_ok()
    }
}
