//! Exchange Adapters
//!
//! Concrete `ExchangeClient` implementations. Only the simulated paper
//! account ships here; live exchange adapters plug in behind the same
//! port.

pub mod paper;

pub use paper::{PaperExchange, PaperSource};
