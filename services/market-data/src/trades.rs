//! Public trade tape
//!
//! Keeps the most recent executed trades of a symbol in a bounded ring,
//! stripped of account information, for the `trades` stream.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{MarketId, TradeId};
use types::numeric::{Price, Quantity};
use types::order::Side;
use types::trade::Trade;

/// A trade as shown to the public (no user or order ids)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicTrade {
    pub trade_id: TradeId,
    /// Engine sequence, monotonic per symbol
    pub sequence: u64,
    pub symbol: MarketId,
    pub price: Price,
    pub quantity: Quantity,
    /// price × quantity
    pub value: Decimal,
    pub taker_side: Side,
    pub timestamp: i64,
}

impl From<&Trade> for PublicTrade {
    fn from(trade: &Trade) -> Self {
        Self {
            trade_id: trade.trade_id,
            sequence: trade.sequence,
            symbol: trade.symbol.clone(),
            price: trade.price,
            quantity: trade.quantity,
            value: trade.quote_amount(),
            taker_side: trade.taker_side,
            timestamp: trade.executed_at,
        }
    }
}

/// Bounded ring of recent public trades
#[derive(Debug)]
pub struct TradeBuffer {
    symbol: MarketId,
    history: VecDeque<PublicTrade>,
    max_history: usize,
    last_sequence: u64,
}

impl TradeBuffer {
    pub fn new(symbol: MarketId, max_history: usize) -> Self {
        Self {
            symbol,
            history: VecDeque::with_capacity(max_history.min(1024)),
            max_history,
            last_sequence: 0,
        }
    }

    /// Append a trade; returns false for one already seen
    ///
    /// Engine sequences only grow, so anything at or below the last
    /// recorded sequence is a replay.
    pub fn push(&mut self, trade: &Trade) -> bool {
        if trade.sequence <= self.last_sequence {
            return false;
        }
        self.last_sequence = trade.sequence;
        if self.history.len() >= self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(PublicTrade::from(trade));
        true
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<PublicTrade> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn symbol(&self) -> &MarketId {
        &self.symbol
    }
}
