//! Prometheus Metrics Registry - Sync and Breaker Observability
//!
//! Registers and exposes Prometheus metrics on :9090. Covers sync cycle
//! outcomes, ingestion counts, per-kind symbol failures, cursor position,
//! gate state and loss-breaker state. Receives cycle outcomes through the
//! `SyncObserver` port.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::ports::telemetry::SyncObserver;
use crate::usecases::resilience_gate::GateSnapshot;
use crate::usecases::risk_breaker::RiskStatus;
use crate::domain::sync::{SyncError, SyncReport};

/// Centralized Prometheus metrics.
///
/// All metrics follow the naming convention `trade_sentinel_*` and carry
/// an `account` or `gate` label where it applies.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Sync cycles by outcome (clean, partial, or an error label).
    pub sync_cycles: IntCounterVec,
    /// Trades newly ingested.
    pub trades_ingested: IntCounterVec,
    /// Trades skipped as already persisted.
    pub trades_skipped: IntCounterVec,
    /// Symbol fetch failures by kind.
    pub symbol_failures: IntCounterVec,
    /// Symbols found delisted.
    pub delisted_symbols: IntCounterVec,
    /// Current cursor (UTC ms).
    pub sync_cursor_ms: GaugeVec,
    /// Cycle duration histogram (milliseconds).
    pub sync_duration_ms: HistogramVec,
    /// Realized PnL folded into positions.
    pub realized_pnl: GaugeVec,
    /// Gate state (0 closed, 1 open, 2 half-open).
    pub gate_state: GaugeVec,
    /// Gate consecutive failure count.
    pub gate_failures: GaugeVec,
    /// Loss breaker status gauge (1 = tripped).
    pub risk_tripped: Gauge,
    /// Drawdown from peak (%).
    pub risk_drawdown_pct: Gauge,
    /// Current losing streak.
    pub risk_consecutive_losses: Gauge,
    /// Trailing 24h PnL (%).
    pub risk_daily_pnl_pct: Gauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let sync_cycles = IntCounterVec::new(
            Opts::new("trade_sentinel_sync_cycles_total", "Sync cycles by outcome"),
            &["account", "outcome"],
        )?;

        let trades_ingested = IntCounterVec::new(
            Opts::new(
                "trade_sentinel_trades_ingested_total",
                "Trades persisted as new fills",
            ),
            &["account"],
        )?;

        let trades_skipped = IntCounterVec::new(
            Opts::new(
                "trade_sentinel_trades_skipped_total",
                "Trades skipped because the fill already exists",
            ),
            &["account"],
        )?;

        let symbol_failures = IntCounterVec::new(
            Opts::new(
                "trade_sentinel_symbol_failures_total",
                "Per-symbol fetch failures by kind",
            ),
            &["account", "kind"],
        )?;

        let delisted_symbols = IntCounterVec::new(
            Opts::new(
                "trade_sentinel_delisted_symbols_total",
                "Symbols found delisted during sync",
            ),
            &["account"],
        )?;

        let sync_cursor_ms = GaugeVec::new(
            Opts::new("trade_sentinel_sync_cursor_ms", "Sync cursor in UTC milliseconds"),
            &["account"],
        )?;

        let sync_duration_ms = HistogramVec::new(
            HistogramOpts::new(
                "trade_sentinel_sync_duration_ms",
                "Sync cycle duration in milliseconds",
            )
            .buckets(vec![10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0]),
            &["account"],
        )?;

        let realized_pnl = GaugeVec::new(
            Opts::new(
                "trade_sentinel_realized_pnl",
                "Realized PnL from position replay since start",
            ),
            &["account"],
        )?;

        let gate_state = GaugeVec::new(
            Opts::new(
                "trade_sentinel_gate_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["gate"],
        )?;

        let gate_failures = GaugeVec::new(
            Opts::new(
                "trade_sentinel_gate_failures",
                "Circuit breaker consecutive failure count",
            ),
            &["gate"],
        )?;

        let risk_tripped = Gauge::new(
            "trade_sentinel_risk_tripped",
            "Whether the loss breaker is tripped (1=yes, 0=no)",
        )?;

        let risk_drawdown_pct = Gauge::new(
            "trade_sentinel_risk_drawdown_pct",
            "Drawdown from peak account value in percent",
        )?;

        let risk_consecutive_losses = Gauge::new(
            "trade_sentinel_risk_consecutive_losses",
            "Current consecutive losing trades",
        )?;

        let risk_daily_pnl_pct = Gauge::new(
            "trade_sentinel_risk_daily_pnl_pct",
            "Trailing 24h realized PnL in percent",
        )?;

        // Register all metrics
        registry.register(Box::new(sync_cycles.clone()))?;
        registry.register(Box::new(trades_ingested.clone()))?;
        registry.register(Box::new(trades_skipped.clone()))?;
        registry.register(Box::new(symbol_failures.clone()))?;
        registry.register(Box::new(delisted_symbols.clone()))?;
        registry.register(Box::new(sync_cursor_ms.clone()))?;
        registry.register(Box::new(sync_duration_ms.clone()))?;
        registry.register(Box::new(realized_pnl.clone()))?;
        registry.register(Box::new(gate_state.clone()))?;
        registry.register(Box::new(gate_failures.clone()))?;
        registry.register(Box::new(risk_tripped.clone()))?;
        registry.register(Box::new(risk_drawdown_pct.clone()))?;
        registry.register(Box::new(risk_consecutive_losses.clone()))?;
        registry.register(Box::new(risk_daily_pnl_pct.clone()))?;

        Ok(Self {
            registry,
            sync_cycles,
            trades_ingested,
            trades_skipped,
            symbol_failures,
            delisted_symbols,
            sync_cursor_ms,
            sync_duration_ms,
            realized_pnl,
            gate_state,
            gate_failures,
            risk_tripped,
            risk_drawdown_pct,
            risk_consecutive_losses,
            risk_daily_pnl_pct,
        })
    }

    /// Publish a gate snapshot.
    pub fn observe_gate(&self, snapshot: &GateSnapshot) {
        self.gate_state
            .with_label_values(&[snapshot.name.as_str()])
            .set(snapshot.state.as_gauge());
        self.gate_failures
            .with_label_values(&[snapshot.name.as_str()])
            .set(f64::from(snapshot.failure_count));
    }

    /// Publish the loss breaker status.
    pub fn observe_risk(&self, status: &RiskStatus) {
        self.risk_tripped.set(if status.tripped { 1.0 } else { 0.0 });
        self.risk_drawdown_pct.set(status.drawdown_pct);
        self.risk_consecutive_losses
            .set(f64::from(status.consecutive_losses));
        self.risk_daily_pnl_pct.set(status.daily_pnl_pct);
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

impl SyncObserver for MetricsRegistry {
    fn on_cycle(&self, account: &str, outcome: &Result<SyncReport, SyncError>) {
        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                self.sync_cycles
                    .with_label_values(&[account, e.label()])
                    .inc();
                return;
            }
        };

        let label = if report.is_clean() { "clean" } else { "partial" };
        self.sync_cycles.with_label_values(&[account, label]).inc();
        self.trades_ingested
            .with_label_values(&[account])
            .inc_by(report.trades_ingested as u64);
        self.trades_skipped
            .with_label_values(&[account])
            .inc_by(report.trades_skipped as u64);
        for failure in &report.failed_symbols {
            self.symbol_failures
                .with_label_values(&[account, failure.kind])
                .inc();
        }
        self.delisted_symbols
            .with_label_values(&[account])
            .inc_by(report.delisted_symbols.len() as u64);
        self.sync_cursor_ms
            .with_label_values(&[account])
            .set(report.cursor_after_ms as f64);
        self.sync_duration_ms
            .with_label_values(&[account])
            .observe(report.duration_ms as f64);
        self.realized_pnl
            .with_label_values(&[account])
            .add(report.realized_pnl.to_f64().unwrap_or(0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sync::SymbolFailure;

    #[test]
    fn test_observer_records_partial_cycle() {
        let metrics = MetricsRegistry::new().unwrap();
        let report = SyncReport {
            account: "acct".to_string(),
            trades_ingested: 3,
            cursor_after_ms: 1_700_000_000_000,
            failed_symbols: vec![SymbolFailure {
                symbol: "ETHUSDT".to_string(),
                kind: "rate_limited",
                error: "429".to_string(),
            }],
            ..SyncReport::default()
        };
        metrics.on_cycle("acct", &Ok(report));
        metrics.on_cycle("acct", &Err(SyncError::AlreadyRunning("acct".to_string())));

        assert_eq!(
            metrics
                .sync_cycles
                .with_label_values(&["acct", "partial"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .sync_cycles
                .with_label_values(&["acct", "already_running"])
                .get(),
            1
        );
        assert_eq!(metrics.trades_ingested.with_label_values(&["acct"]).get(), 3);

        let text = metrics.render().unwrap();
        assert!(text.contains("trade_sentinel_symbol_failures_total"));
    }
}
