//! Config Hot-Reload - Poll config.toml and Publish Changes
//!
//! Re-reads the config file on a fixed interval (60s by default). When the
//! contents change and the new file validates, the new `AppConfig` is
//! published on a `tokio::sync::watch` channel. The binary uses this to
//! apply new loss limits to the running `RiskBreaker` without a restart.
//! An invalid edit is logged and the current config stays in force.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use super::AppConfig;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Polls the config file and broadcasts validated updates.
pub struct ConfigWatcher {
    /// Path to config.toml.
    config_path: String,
    /// Watch channel sender for config updates.
    config_tx: watch::Sender<AppConfig>,
    /// Hash of the file contents last published.
    last_hash: Option<u64>,
    /// Time between polls.
    poll_interval: Duration,
}

impl ConfigWatcher {
    /// Create a watcher seeded with the config already loaded at startup.
    pub fn new(config_path: &str, initial_config: AppConfig) -> (Self, watch::Receiver<AppConfig>) {
        let (config_tx, config_rx) = watch::channel(initial_config);

        let watcher = Self {
            config_path: config_path.to_string(),
            config_tx,
            last_hash: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        };

        (watcher, config_rx)
    }

    /// Override the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll until shutdown.
    #[instrument(skip(self, shutdown_rx), fields(path = %self.config_path))]
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(
            interval_s = self.poll_interval.as_secs(),
            "Config watcher started"
        );

        self.last_hash = self.compute_hash().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Config watcher shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.check_and_reload().await;
                }
            }
        }
    }

    /// Reload and publish if the file changed. Returns whether a new config
    /// was published.
    pub async fn check_and_reload(&mut self) -> bool {
        let new_hash = self.compute_hash().await;

        if new_hash.is_none() || new_hash == self.last_hash {
            debug!("Config unchanged");
            return false;
        }

        info!("Config change detected, reloading");

        match super::loader::load_config(&self.config_path) {
            Ok(new_config) => {
                self.last_hash = new_hash;
                let changed = self.config_tx.send_if_modified(|current| {
                    if *current == new_config {
                        false
                    } else {
                        *current = new_config;
                        true
                    }
                });
                if changed {
                    info!("Config reloaded");
                }
                changed
            }
            Err(e) => {
                warn!(error = %e, "Failed to reload config, keeping current");
                false
            }
        }
    }

    async fn compute_hash(&self) -> Option<u64> {
        let content = tokio::fs::read_to_string(&self.config_path).await.ok()?;

        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Some(hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;

    const BASE: &str = "[bot]\nname = \"reload\"\n\n[[accounts]]\nid = \"acct-1\"\n";

    fn temp_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sentinel-reload-{tag}-{}.toml", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_publishes_changed_risk_limits() {
        let path = temp_path("change");
        std::fs::write(&path, BASE).unwrap();
        let initial = parse_config(BASE).unwrap();
        let (mut watcher, rx) = ConfigWatcher::new(path.to_str().unwrap(), initial);
        watcher.last_hash = watcher.compute_hash().await;

        assert!(!watcher.check_and_reload().await);

        let edited = format!("{BASE}\n[risk]\nmax_drawdown_pct = 10.0\n");
        std::fs::write(&path, edited).unwrap();
        assert!(watcher.check_and_reload().await);
        assert_eq!(rx.borrow().risk.max_drawdown_pct, 10.0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_invalid_edit_keeps_current_config() {
        let path = temp_path("invalid");
        std::fs::write(&path, BASE).unwrap();
        let initial = parse_config(BASE).unwrap();
        let (mut watcher, rx) = ConfigWatcher::new(path.to_str().unwrap(), initial.clone());
        watcher.last_hash = watcher.compute_hash().await;

        std::fs::write(&path, "[bot]\nname = \"reload\"\naccounts = []\n").unwrap();
        assert!(!watcher.check_and_reload().await);
        assert_eq!(*rx.borrow(), initial);

        let _ = std::fs::remove_file(&path);
    }
}
