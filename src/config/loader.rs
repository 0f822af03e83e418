//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{AppConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};

/// Resolve the config path from `TRADE_SENTINEL_CONFIG`, falling back to
/// `config.toml`.
pub fn config_path() -> String {
  std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    accounts = config.accounts.len(),
    sync_interval_s = config.sync.interval_seconds,
    gate_enabled = config.gate.enabled,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig =
    toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Non-empty, unique account definitions
/// - Positive thresholds and timeouts
/// - Loss limits in (0, 100]
fn validate_config(config: &AppConfig) -> Result<()> {
  // Account validation
  anyhow::ensure!(
    !config.accounts.is_empty(),
    "At least one account must be configured"
  );

  let mut seen = HashSet::new();
  for (i, account) in config.accounts.iter().enumerate() {
    anyhow::ensure!(!account.id.is_empty(), "Account {} has empty id", i);
    anyhow::ensure!(
      seen.insert(account.id.as_str()),
      "Account {} is configured more than once",
      account.id
    );
    anyhow::ensure!(
      account.fee_rate >= 0.0 && account.fee_rate < 1.0,
      "Account {} fee_rate must be in [0, 1), got {}",
      account.id,
      account.fee_rate
    );
  }

  // Gate validation
  anyhow::ensure!(
    config.gate.failure_threshold > 0,
    "gate.failure_threshold must be positive"
  );
  anyhow::ensure!(
    config.gate.success_threshold > 0,
    "gate.success_threshold must be positive"
  );
  anyhow::ensure!(
    config.gate.cooldown_ms > 0,
    "gate.cooldown_ms must be positive"
  );

  // Risk validation
  anyhow::ensure!(
    config.risk.max_consecutive_losses > 0,
    "risk.max_consecutive_losses must be positive"
  );
  for (name, value) in [
    ("max_daily_loss_pct", config.risk.max_daily_loss_pct),
    ("max_weekly_loss_pct", config.risk.max_weekly_loss_pct),
    ("max_drawdown_pct", config.risk.max_drawdown_pct),
  ] {
    anyhow::ensure!(
      value > 0.0 && value <= 100.0,
      "risk.{} must be in (0, 100], got {}",
      name,
      value
    );
  }
  anyhow::ensure!(
    config.risk.initial_account_value >= 0.0,
    "risk.initial_account_value must not be negative"
  );

  // Sync validation
  anyhow::ensure!(
    config.sync.interval_seconds > 0,
    "sync.interval_seconds must be positive"
  );
  anyhow::ensure!(
    config.sync.fetch_timeout_ms > 0,
    "sync.fetch_timeout_ms must be positive"
  );
  anyhow::ensure!(
    config.sync.page_limit > 0 && config.sync.max_pages > 0,
    "sync.page_limit and sync.max_pages must be positive"
  );
  anyhow::ensure!(
    config.sync.fetch_concurrency > 0,
    "sync.fetch_concurrency must be positive"
  );
  anyhow::ensure!(
    config.sync.cursor_buffer_ms >= 0,
    "sync.cursor_buffer_ms must not be negative"
  );

  Ok(())
}
