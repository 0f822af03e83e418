//! Trade Sentinel - Entry Point
//!
//! Initializes configuration, logging, storage and one sync worker per
//! configured exchange account. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml (path from TRADE_SENTINEL_CONFIG) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Open the fill/position store (memory or JSONL)
//! 4. Per account: paper exchange, resilience gate, sync reconciler
//!    feeding ingested closes into the shared risk breaker
//! 5. Spawn metrics (:9090) and health (:8080) servers
//! 6. Spawn config hot-reload (risk limits) and the heartbeat
//! 7. Spawn sync workers
//! 8. Wait for SIGINT → broadcast shutdown → drain workers

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use trade_sentinel::adapters::exchange::PaperExchange;
use trade_sentinel::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use trade_sentinel::adapters::persistence::{InMemoryStore, JsonlStore};
use trade_sentinel::config::hot_reload::ConfigWatcher;
use trade_sentinel::config::loader::{config_path, load_config};
use trade_sentinel::config::{AppConfig, StoreBackend};
use trade_sentinel::ports::repository::{FillRepository, PositionRepository};
use trade_sentinel::ports::telemetry::SyncObserver;
use trade_sentinel::usecases::resilience_gate::{GateSettings, GateState, ResilienceGate};
use trade_sentinel::usecases::risk_breaker::{RiskBreaker, RiskLimits};
use trade_sentinel::usecases::sync_reconciler::{SyncCoordinator, SyncReconciler, SyncSettings};
use trade_sentinel::usecases::sync_scheduler::SyncScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let path = config_path();
    let config = load_config(&path).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.bot.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.bot.name,
        version = env!("CARGO_PKG_VERSION"),
        accounts = config.accounts.len(),
        backend = ?config.persistence.backend,
        "Starting Trade Sentinel"
    );

    // ── 3. Open the store ───────────────────────────────────
    match config.persistence.backend {
        StoreBackend::Jsonl => {
            let store = JsonlStore::open(&config.persistence.data_dir)
                .await
                .context("Failed to open JSONL store")?;
            run(config, path, Arc::new(store)).await
        }
        StoreBackend::Memory => {
            warn!("In-memory store: fills and positions are lost on exit");
            run(config, path, Arc::new(InMemoryStore::new())).await
        }
    }
}

/// Wire every component around `store` and run until SIGINT.
async fn run<S>(config: AppConfig, config_path: String, store: Arc<S>) -> Result<()>
where
    S: FillRepository + PositionRepository,
{
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    let metrics = Arc::new(MetricsRegistry::new().context("Failed to register metrics")?);
    let health = Arc::new(HealthState::new());
    let risk = Arc::new(RiskBreaker::from_config(&config.risk));

    // ── 4. Per-account reconcilers ──────────────────────────
    let coordinator = Arc::new(SyncCoordinator::new());
    let settings = SyncSettings::from(&config.sync);
    let gate_settings = GateSettings::from(&config.gate);
    let observer: Arc<dyn SyncObserver> = metrics.clone();
    let mut scheduler = SyncScheduler::new(
        Duration::from_secs(config.sync.interval_seconds),
        shutdown_tx.clone(),
    )
    .with_observer(observer);
    let mut gates: Vec<Arc<ResilienceGate>> = Vec::new();

    for account in config.accounts.iter().filter(|a| a.enabled) {
        if account.exchange != "paper" {
            warn!(
                account = %account.id,
                exchange = %account.exchange,
                "No adapter for exchange, account skipped"
            );
            continue;
        }

        let fee_rate = Decimal::from_f64(account.fee_rate).unwrap_or_default();
        let exchange = Arc::new(PaperExchange::new(&account.id, fee_rate));
        if let Some(seed) = &account.seed_file {
            if let Err(e) = exchange.load_seed(Path::new(seed)).await {
                warn!(account = %account.id, error = %e, "Seed file not loaded");
            }
        }

        let mut reconciler = SyncReconciler::new(
            exchange,
            Arc::clone(&store),
            Arc::clone(&store),
            Arc::clone(&coordinator),
            settings.clone(),
        )
        .with_risk(Arc::clone(&risk));
        if config.gate.enabled {
            let gate = Arc::new(ResilienceGate::new(
                format!("{}:{}", account.exchange, account.id),
                gate_settings,
            ));
            gates.push(Arc::clone(&gate));
            reconciler = reconciler.with_gate(gate);
        }

        scheduler.register(account.id.clone(), Arc::new(reconciler));
        info!(account = %account.id, exchange = %account.exchange, "Account registered");
    }

    // ── 5. Metrics + health servers ─────────────────────────
    let mut servers = Vec::new();
    if config.metrics.enabled {
        let metrics_ref = Arc::clone(&metrics);
        let bind = config.metrics.bind_address.clone();
        let rx = shutdown_tx.subscribe();
        servers.push(tokio::spawn(async move {
            if let Err(e) = metrics_ref.serve(bind, rx).await {
                error!(error = %e, "Metrics server failed");
            }
        }));
    }
    let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
    let health_rx = shutdown_tx.subscribe();
    servers.push(tokio::spawn(async move {
        if let Err(e) = health_server.run(health_rx).await {
            error!(error = %e, "Health server failed");
        }
    }));

    // ── 6. Hot reload + heartbeat ───────────────────────────
    let (mut watcher, mut config_rx) = ConfigWatcher::new(&config_path, config.clone());
    let watcher_rx = shutdown_tx.subscribe();
    servers.push(tokio::spawn(async move {
        if let Err(e) = watcher.run(watcher_rx).await {
            error!(error = %e, "Config watcher failed");
        }
    }));

    let reload_risk = Arc::clone(&risk);
    let mut reload_shutdown = shutdown_tx.subscribe();
    servers.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = reload_shutdown.recv() => return,
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let limits = RiskLimits::from(&config_rx.borrow_and_update().risk);
                    reload_risk.set_limits(limits).await;
                }
            }
        }
    }));

    servers.push(tokio::spawn(heartbeat(
        Duration::from_secs(config.bot.heartbeat_seconds),
        gates,
        Arc::clone(&risk),
        Arc::clone(&store),
        Arc::clone(&metrics),
        Arc::clone(&health),
        shutdown_tx.subscribe(),
    )));

    // ── 7. Sync workers ─────────────────────────────────────
    let mut workers = scheduler.spawn();
    info!("All tasks spawned, sentinel is running");

    // ── 8. Wait for SIGINT ──────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT");
    }
    info!("SIGINT received, initiating graceful shutdown");

    let _ = shutdown_tx.send(());
    health.workers_running.store(false, Ordering::Relaxed);

    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Sync worker task failed");
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("Sync workers did not stop within 30s, aborting");
        workers.abort_all();
    }

    for handle in servers {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Periodic status log and gauge refresh.
async fn heartbeat<S>(
    period: Duration,
    gates: Vec<Arc<ResilienceGate>>,
    risk: Arc<RiskBreaker>,
    store: Arc<S>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: FillRepository + PositionRepository,
{
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            _ = ticker.tick() => {}
        }

        for gate in &gates {
            let snapshot = gate.snapshot().await;
            if snapshot.state != GateState::Closed {
                warn!(
                    gate = %snapshot.name,
                    state = %snapshot.state,
                    failures = snapshot.failure_count,
                    "Exchange gate not closed"
                );
            }
            metrics.observe_gate(&snapshot);
        }

        let status = risk.status().await;
        metrics.observe_risk(&status);
        health
            .trading_allowed
            .store(!status.tripped, Ordering::Relaxed);
        if status.tripped {
            error!("trading halted: {}", status.reason);
        }

        let store_ok = store.is_healthy().await;
        health.store_healthy.store(store_ok, Ordering::Relaxed);

        info!(
            gates = gates.len(),
            risk_tripped = status.tripped,
            drawdown_pct = status.drawdown_pct,
            store_healthy = store_ok,
            "Heartbeat"
        );
    }
}
