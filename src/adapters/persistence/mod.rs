//! Persistence Adapters - In-Memory and JSONL File Storage
//!
//! Implements the fill and position repository ports. `InMemoryStore`
//! keeps everything behind locks; `JsonlStore` adds append-only JSONL
//! logs for orders and fills plus atomic JSON position snapshots.
//! No database dependency - lightweight and crash-recoverable.

pub mod fills;
pub mod memory;
pub mod repository_impl;
pub mod state;

pub use fills::FillLog;
pub use memory::InMemoryStore;
pub use repository_impl::JsonlStore;
pub use state::PositionSnapshotStore;
