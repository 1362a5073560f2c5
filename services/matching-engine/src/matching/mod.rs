//! Matching logic module
//!
//! Implements the price-time priority crossing rules and fill planning

pub mod crossing;
pub mod executor;

pub use crossing::{can_match, incoming_can_match};
pub use executor::{FillPlan, MatchExecutor};
