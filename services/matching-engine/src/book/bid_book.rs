//! Bid (buy-side) order book
//!
//! Maintains buy orders sorted by price descending (best bid first).
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::{Price, Quantity};

use super::price_level::{LevelEntry, PriceLevel};
use super::LevelView;

/// Bid (buy) side order book
#[derive(Debug, Clone, Default)]
pub struct BidBook {
    /// Price levels, iterated in reverse for best-first order
    levels: BTreeMap<Price, PriceLevel>,
}

impl BidBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, price: Price, entry: LevelEntry) {
        self.levels.entry(price).or_default().insert(entry);
    }

    /// Remove an order, dropping its level when it empties
    pub fn remove(&mut self, order_id: &OrderId, price: Price) -> Option<Quantity> {
        let level = self.levels.get_mut(&price)?;
        let removed = level.remove(order_id)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(removed)
    }

    pub fn set_remaining(&mut self, order_id: &OrderId, price: Price, remaining: Quantity) -> bool {
        let Some(level) = self.levels.get_mut(&price) else {
            return false;
        };
        let found = level.set_remaining(order_id, remaining);
        if level.is_empty() {
            self.levels.remove(&price);
        }
        found
    }

    /// Get the best bid (highest price)
    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.levels
            .iter()
            .next_back()
            .map(|(price, level)| (*price, level.total_quantity()))
    }

    /// Resting orders in price/time priority
    pub fn iter_priority(&self) -> impl Iterator<Item = (Price, &LevelEntry)> {
        self.levels
            .iter()
            .rev()
            .flat_map(|(price, level)| level.iter().map(move |entry| (*price, entry)))
    }

    pub fn level(&self, price: Price) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    /// Get depth snapshot (top N price levels, highest first)
    pub fn depth_snapshot(&self, depth: usize) -> Vec<LevelView> {
        self.levels
            .iter()
            .rev()
            .take(depth)
            .map(|(price, level)| LevelView::of(*price, level))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}
