//! Matching Engine Service
//!
//! Per-symbol price-time priority matching with balance reservation and
//! atomic per-fill settlement.
//!
//! **Key Invariants:**
//! - Price-time priority strictly enforced; trades execute at the maker price
//! - Every fill's order, trade and balance updates commit as one batch
//! - Locked funds always equal the open orders' outstanding reservations
//! - Same-user orders never trade with each other
//!
//! Each symbol is owned by a single worker thread (see [`registry`]); all
//! mutation happens there, readers get immutable [`MarketView`] snapshots.

pub mod book;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod matching;
pub mod recovery;
pub mod registry;
pub mod store;
pub mod ticker;

pub use book::{BookDelta, BookSnapshot, LevelView};
pub use config::{EngineConfig, SelfTradePolicy};
pub use engine::{MarketView, OrderReport, SymbolEngine};
pub use events::{EngineEvent, EventHook, NoopHook, TracingHook};
pub use ledger::BalanceLedger;
pub use recovery::{RecoveredState, RecoveryError};
pub use registry::{EngineHandle, EngineRegistry};
pub use store::{CommitBatch, EngineStore, JournalStore, MemoryStore, RetryPolicy, StoreError};
pub use ticker::Ticker;
