//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! infrastructure. Each sub-module groups adapters by concern.
//!
//! Adapter categories:
//! - `exchange`: simulated paper exchange account
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: in-memory and JSONL fill/position storage

pub mod exchange;
pub mod metrics;
pub mod persistence;
