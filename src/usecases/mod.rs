//! Use Cases Layer - Resilience and Reconciliation Workflows
//!
//! Orchestrates domain logic with port interfaces. Each use case is a
//! self-contained operation.
//!
//! Use cases:
//! - `ResilienceGate`: circuit breaker around remote calls
//! - `RiskBreaker`: sticky loss limits consulted before every order
//! - `PositionBuilder`: replays fills into persisted positions
//! - `SymbolDiscovery`: multi-signal candidate symbol set
//! - `SyncReconciler`: incremental fetch, idempotent ingestion, cursor
//! - `SyncScheduler`: one worker per account, triggers, panic containment
//! - `TradeExecutor`: risk-gated order placement

pub mod position_builder;
pub mod resilience_gate;
pub mod risk_breaker;
pub mod symbol_discovery;
pub mod sync_reconciler;
pub mod sync_scheduler;
pub mod trade_executor;
