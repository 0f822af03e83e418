//! Configuration Module - TOML-based Sentinel Configuration
//!
//! Loads and validates configuration from `config.toml` (path override via
//! `TRADE_SENTINEL_CONFIG`). Breaker thresholds, loss limits, sync cadence
//! and exchange accounts are all externalized here - nothing is hardcoded
//! in the usecases layer.

pub mod hot_reload;
pub mod loader;

use serde::{Deserialize, Serialize};

/// Environment variable that overrides the config file path.
pub const CONFIG_PATH_ENV: &str = "TRADE_SENTINEL_CONFIG";

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any worker starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
  /// Process identity and runtime flags.
  pub bot: BotConfig,
  /// ResilienceGate thresholds for exchange calls.
  #[serde(default)]
  pub gate: GateConfig,
  /// RiskBreaker loss limits.
  #[serde(default)]
  pub risk: RiskConfig,
  /// Sync cycle tuning.
  #[serde(default)]
  pub sync: SyncConfig,
  /// Exchange accounts to reconcile.
  pub accounts: Vec<AccountConfig>,
  /// Metrics and health endpoints.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Persistence configuration.
  #[serde(default)]
  pub persistence: PersistenceConfig,
}

/// Process identity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
  /// Human-readable instance name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Heartbeat interval for breaker status publishing (seconds).
  #[serde(default = "default_heartbeat")]
  pub heartbeat_seconds: u64,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
  /// Wrap exchange calls in a ResilienceGate.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Consecutive failures that open the gate.
  #[serde(default = "default_failure_threshold")]
  pub failure_threshold: u32,
  /// Half-open successes that close the gate.
  #[serde(default = "default_success_threshold")]
  pub success_threshold: u32,
  /// Open-state cooldown (milliseconds).
  #[serde(default = "default_gate_cooldown")]
  pub cooldown_ms: u64,
}

impl Default for GateConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      failure_threshold: default_failure_threshold(),
      success_threshold: default_success_threshold(),
      cooldown_ms: default_gate_cooldown(),
    }
  }
}

/// Loss breaker limits. Percentages are of account value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
  /// Consecutive losing trades before the breaker trips.
  #[serde(default = "default_max_consecutive_losses")]
  pub max_consecutive_losses: u32,
  /// Maximum trailing 24h loss (%).
  #[serde(default = "default_max_daily_loss")]
  pub max_daily_loss_pct: f64,
  /// Maximum trailing 7d loss (%).
  #[serde(default = "default_max_weekly_loss")]
  pub max_weekly_loss_pct: f64,
  /// Maximum drawdown from peak (%).
  #[serde(default = "default_max_drawdown")]
  pub max_drawdown_pct: f64,
  /// Account value used to seed the peak.
  #[serde(default)]
  pub initial_account_value: f64,
}

impl Default for RiskConfig {
  fn default() -> Self {
    Self {
      max_consecutive_losses: default_max_consecutive_losses(),
      max_daily_loss_pct: default_max_daily_loss(),
      max_weekly_loss_pct: default_max_weekly_loss(),
      max_drawdown_pct: default_max_drawdown(),
      initial_account_value: 0.0,
    }
  }
}

/// Sync cycle tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
  /// Interval between scheduled cycles (seconds).
  #[serde(default = "default_sync_interval")]
  pub interval_seconds: u64,
  /// Timeout for each remote fetch (milliseconds).
  #[serde(default = "default_fetch_timeout")]
  pub fetch_timeout_ms: u64,
  /// Trades requested per page.
  #[serde(default = "default_page_limit")]
  pub page_limit: usize,
  /// Maximum pages fetched per symbol per cycle.
  #[serde(default = "default_max_pages")]
  pub max_pages: usize,
  /// Symbols fetched concurrently within one cycle.
  #[serde(default = "default_fetch_concurrency")]
  pub fetch_concurrency: usize,
  /// Lookback for accounts with no persisted fills (hours).
  #[serde(default = "default_lookback_hours")]
  pub initial_lookback_hours: u64,
  /// Buffer added to the last persisted fill time on recovery (milliseconds).
  #[serde(default = "default_cursor_buffer")]
  pub cursor_buffer_ms: i64,
  /// Commission asset recorded when the exchange omits it.
  #[serde(default = "default_commission_asset")]
  pub default_commission_asset: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_seconds: default_sync_interval(),
      fetch_timeout_ms: default_fetch_timeout(),
      page_limit: default_page_limit(),
      max_pages: default_max_pages(),
      fetch_concurrency: default_fetch_concurrency(),
      initial_lookback_hours: default_lookback_hours(),
      cursor_buffer_ms: default_cursor_buffer(),
      default_commission_asset: default_commission_asset(),
    }
  }
}

/// One exchange account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
  /// Account identifier (UUID string).
  pub id: String,
  /// Exchange name (`paper` is the built-in adapter).
  #[serde(default = "default_exchange")]
  pub exchange: String,
  /// Whether this account is synced.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Optional JSONL file of historical trades to seed the paper exchange.
  #[serde(default)]
  pub seed_file: Option<String>,
  /// Taker fee rate for the paper exchange (e.g. 0.0006).
  #[serde(default = "default_fee_rate")]
  pub fee_rate: f64,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
  Memory,
  Jsonl,
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
  /// Storage backend.
  #[serde(default = "default_backend")]
  pub backend: StoreBackend,
  /// Directory for JSONL logs and position snapshots.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      backend: default_backend(),
      data_dir: default_data_dir(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_heartbeat() -> u64 {
  30
}

fn default_failure_threshold() -> u32 {
  3
}

fn default_success_threshold() -> u32 {
  2
}

fn default_gate_cooldown() -> u64 {
  60_000
}

fn default_max_consecutive_losses() -> u32 {
  5
}

fn default_max_daily_loss() -> f64 {
  12.0
}

fn default_max_weekly_loss() -> f64 {
  20.0
}

fn default_max_drawdown() -> f64 {
  15.0
}

fn default_sync_interval() -> u64 {
  60
}

fn default_fetch_timeout() -> u64 {
  10_000
}

fn default_page_limit() -> usize {
  500
}

fn default_max_pages() -> usize {
  20
}

fn default_fetch_concurrency() -> usize {
  4
}

fn default_lookback_hours() -> u64 {
  24
}

fn default_cursor_buffer() -> i64 {
  1_000
}

fn default_commission_asset() -> String {
  "USDT".to_string()
}

fn default_exchange() -> String {
  "paper".to_string()
}

fn default_fee_rate() -> f64 {
  0.0006
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}

fn default_backend() -> StoreBackend {
  StoreBackend::Jsonl
}

fn default_data_dir() -> String {
  "data".to_string()
}
