//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires from
//! the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `ExchangeClient`: trade history, discovery signals, order placement
//! - `FillRepository` / `PositionRepository`: persistence collaborators
//! - `SyncObserver`: cycle telemetry

pub mod exchange;
pub mod repository;
pub mod telemetry;
