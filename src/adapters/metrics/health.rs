//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready endpoints via axum 0.7 for container health
//! checks. Readiness requires a usable store and running sync workers.
//! A tripped loss breaker does not make the process unready; it is
//! reported in the readiness body instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Shared health flags, updated by the heartbeat.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Whether the fill/position store is usable.
    pub store_healthy: Arc<AtomicBool>,
    /// Whether sync workers are running.
    pub workers_running: Arc<AtomicBool>,
    /// Whether the loss breaker allows trading.
    pub trading_allowed: Arc<AtomicBool>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (all healthy by default).
    pub fn new() -> Self {
        Self {
            store_healthy: Arc::new(AtomicBool::new(true)),
            workers_running: Arc::new(AtomicBool::new(true)),
            trading_allowed: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.store_healthy.load(Ordering::Relaxed) && self.workers_running.load(Ordering::Relaxed)
    }

    fn readiness_body(&self) -> &'static str {
        match (self.is_ready(), self.trading_allowed.load(Ordering::Relaxed)) {
            (true, true) => "READY",
            (true, false) => "READY (trading halted)",
            (false, _) => "NOT READY",
        }
    }
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    /// Health state shared with all components.
    state: Arc<HealthState>,
    /// Bind port (default 8080 from config).
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(Arc::clone(&self.state));

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        let status = if state.is_ready() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, state.readiness_body())
    }
}
