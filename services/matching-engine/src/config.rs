//! Engine configuration

use serde::{Deserialize, Serialize};
use types::ids::UserId;

use crate::store::RetryPolicy;

/// What happens when a taker meets a resting order of the same user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfTradePolicy {
    /// Pass over the same-user order and keep matching
    #[default]
    Skip,
    /// Stop; reject the taker if nothing filled, else cancel its remainder
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub self_trade: SelfTradePolicy,
    pub retry: RetryPolicy,
    /// Ticker rolling window
    pub ticker_window_secs: u64,
    /// Levels per side kept in the published market view
    pub view_depth: usize,
    /// Bounded command queue per symbol worker
    pub command_buffer: usize,
    /// Capacity of the engine event broadcast channel
    pub event_buffer: usize,
    /// Terminal orders remembered for cancel replies
    pub closed_order_retention: usize,
    /// Account credited with trading fees
    pub fee_account: UserId,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            self_trade: SelfTradePolicy::Skip,
            retry: RetryPolicy::default(),
            ticker_window_secs: 24 * 60 * 60,
            view_depth: 100,
            command_buffer: 1024,
            event_buffer: 4096,
            closed_order_retention: 100_000,
            fee_account: UserId::nil(),
        }
    }
}
