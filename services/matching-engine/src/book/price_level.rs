//! Price level implementation with FIFO queue
//!
//! A price level contains all resting orders at a specific price point,
//! kept in arrival order so that time priority is the queue order.

use std::collections::VecDeque;
use types::ids::{OrderId, UserId};
use types::numeric::Quantity;

/// Entry in the price level queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelEntry {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub remaining: Quantity,
    /// Per-symbol arrival sequence assigned on insert
    pub sequence: u64,
}

/// A price level containing orders at a specific price
#[derive(Debug, Clone, Default)]
pub struct PriceLevel {
    /// Queue of orders at this price level (FIFO order)
    orders: VecDeque<LevelEntry>,
    /// Total quantity available at this level
    total_quantity: Quantity,
}

impl PriceLevel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order at the back of the queue (time priority)
    pub fn insert(&mut self, entry: LevelEntry) {
        self.total_quantity += entry.remaining;
        self.orders.push_back(entry);
    }

    /// Remove an order from the queue by OrderId
    ///
    /// Returns the remaining quantity of the removed order, or None if not found
    pub fn remove(&mut self, order_id: &OrderId) -> Option<Quantity> {
        let position = self.orders.iter().position(|entry| &entry.order_id == order_id)?;
        let entry = self.orders.remove(position)?;
        self.total_quantity = self
            .total_quantity
            .checked_sub(entry.remaining)
            .unwrap_or_default();
        Some(entry.remaining)
    }

    /// Set an order's remaining quantity in place, keeping its queue position
    ///
    /// A zero quantity removes the order. Returns false if the order is absent.
    pub fn set_remaining(&mut self, order_id: &OrderId, remaining: Quantity) -> bool {
        if remaining.is_zero() {
            return self.remove(order_id).is_some();
        }
        match self.orders.iter_mut().find(|entry| &entry.order_id == order_id) {
            Some(entry) => {
                let old = entry.remaining;
                entry.remaining = remaining;
                self.total_quantity = self
                    .total_quantity
                    .checked_sub(old)
                    .unwrap_or_default()
                    + remaining;
                true
            }
            None => false,
        }
    }

    /// Peek at the front order without removing it
    pub fn peek_front(&self) -> Option<&LevelEntry> {
        self.orders.front()
    }

    /// Orders in time priority
    pub fn iter(&self) -> impl Iterator<Item = &LevelEntry> {
        self.orders.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn total_quantity(&self) -> Quantity {
        self.total_quantity
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(qty: &str, sequence: u64) -> LevelEntry {
        LevelEntry {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            remaining: Quantity::from_str(qty).unwrap(),
            sequence,
        }
    }

    #[test]
    fn test_price_level_insert() {
        let mut level = PriceLevel::new();
        let e = entry("1.5", 1);
        let qty = e.remaining;
        level.insert(e);

        assert_eq!(level.order_count(), 1);
        assert_eq!(level.total_quantity(), qty);
        assert!(!level.is_empty());
    }

    #[test]
    fn test_price_level_fifo_order() {
        let mut level = PriceLevel::new();
        let first = entry("1.0", 1);
        let first_id = first.order_id;
        level.insert(first);
        level.insert(entry("2.0", 2));
        level.insert(entry("3.0", 3));

        let front = level.peek_front().unwrap();
        assert_eq!(front.order_id, first_id);
        let sequences: Vec<u64> = level.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn test_price_level_remove() {
        let mut level = PriceLevel::new();
        let first = entry("1.0", 1);
        let first_id = first.order_id;
        level.insert(first);
        level.insert(entry("2.0", 2));

        let removed_qty = level.remove(&first_id);
        assert_eq!(removed_qty, Some(Quantity::from_str("1.0").unwrap()));
        assert_eq!(level.order_count(), 1);
        assert_eq!(level.total_quantity(), Quantity::from_str("2.0").unwrap());

        // idempotent
        assert_eq!(level.remove(&first_id), None);
    }

    #[test]
    fn test_price_level_set_remaining_keeps_position() {
        let mut level = PriceLevel::new();
        let first = entry("5.0", 1);
        let first_id = first.order_id;
        level.insert(first);
        level.insert(entry("1.0", 2));

        assert!(level.set_remaining(&first_id, Quantity::from_str("3.0").unwrap()));
        assert_eq!(level.total_quantity(), Quantity::from_str("4.0").unwrap());
        assert_eq!(level.peek_front().unwrap().order_id, first_id);

        assert!(level.set_remaining(&first_id, Quantity::zero()));
        assert_eq!(level.order_count(), 1);
        assert_eq!(level.total_quantity(), Quantity::from_str("1.0").unwrap());
    }

    #[test]
    fn test_price_level_total_quantity_invariant() {
        let mut level = PriceLevel::new();
        level.insert(entry("1.5", 1));
        level.insert(entry("2.5", 2));
        level.insert(entry("3.0", 3));

        assert_eq!(level.total_quantity(), Quantity::from_str("7.0").unwrap());
    }
}
