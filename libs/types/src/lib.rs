//! Types library for the exchange matching core
//!
//! Core type definitions shared by the matching engine, the market-data
//! services and the gateway.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, TradeId, UserId, MarketId)
//! - `numeric`: Fixed-point decimal types (Price, Quantity)
//! - `order`: Order lifecycle types
//! - `trade`: Trade execution types
//! - `account`: Balance types
//! - `symbol`: Per-symbol trading rules
//! - `fee`: Fee apportioning
//! - `errors`: Error taxonomy

pub mod account;
pub mod errors;
pub mod fee;
pub mod ids;
pub mod numeric;
pub mod order;
pub mod symbol;
pub mod trade;

// Library version constant
pub const LIB_VERSION: &str = "1.1.0";

/// Current wall-clock time as Unix nanoseconds
pub fn unix_nanos() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX)
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::account::*;
    pub use crate::errors::*;
    pub use crate::fee::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::symbol::*;
    pub use crate::trade::*;
}
