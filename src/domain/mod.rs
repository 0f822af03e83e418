//! Domain layer - Core data model and position math.
//!
//! Pure types and functions for the reconciliation core. No I/O here
//! (hexagonal architecture inner ring). All types are serializable and
//! testable in isolation.

pub mod errors;
pub mod position;
pub mod sync;
pub mod trade;

// Re-export core types for convenience
pub use errors::PositionError;
pub use position::{
    apply_trade, Position, PositionChange, PositionSide, PositionStatus, PositionTrade,
};
pub use sync::{DiscoveryCounts, SymbolFailure, SyncError, SyncReport};
pub use trade::{
    AccountId, Fill, OrderAction, OrderRecord, OrderStatus, OrderType, Symbol, TradeId,
    TradeRecord, TradeSide,
};
