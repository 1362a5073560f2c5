//! Order book for a single symbol
//!
//! Bids and asks are kept in price-ordered maps of FIFO levels; the full
//! order records of resting orders are indexed by id alongside. Every order
//! in the book is OPEN or PARTIALLY_FILLED.

pub mod ask_book;
pub mod bid_book;
pub mod price_level;

pub use ask_book::AskBook;
pub use bid_book::BidBook;
pub use price_level::{LevelEntry, PriceLevel};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use types::errors::EngineError;
use types::ids::{MarketId, OrderId};
use types::numeric::{Price, Quantity};
use types::order::{Order, Side};

/// Aggregated view of one price level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelView {
    pub price: Price,
    pub quantity: Quantity,
    pub orders: usize,
}

impl LevelView {
    pub(crate) fn of(price: Price, level: &PriceLevel) -> Self {
        Self {
            price,
            quantity: level.total_quantity(),
            orders: level.order_count(),
        }
    }
}

/// Immutable copy of the top of the book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: MarketId,
    pub bids: Vec<LevelView>,
    pub asks: Vec<LevelView>,
}

impl BookSnapshot {
    pub fn empty(symbol: MarketId) -> Self {
        Self {
            symbol,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Same snapshot cut to `depth` levels per side
    pub fn truncated(&self, depth: usize) -> Self {
        Self {
            symbol: self.symbol.clone(),
            bids: self.bids.iter().take(depth).cloned().collect(),
            asks: self.asks.iter().take(depth).cloned().collect(),
        }
    }
}

/// New aggregate quantity at a price; zero means the level is gone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub price: Price,
    pub quantity: Quantity,
}

/// Levels changed by one engine command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDelta {
    pub symbol: MarketId,
    pub bids: Vec<LevelChange>,
    pub asks: Vec<LevelChange>,
}

/// Order book for a single symbol
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: MarketId,
    bids: BidBook,
    asks: AskBook,
    orders: HashMap<OrderId, Order>,
    next_sequence: u64,
    dirty_bids: BTreeSet<Price>,
    dirty_asks: BTreeSet<Price>,
}

impl OrderBook {
    pub fn new(symbol: MarketId) -> Self {
        Self {
            symbol,
            bids: BidBook::new(),
            asks: AskBook::new(),
            orders: HashMap::new(),
            next_sequence: 1,
            dirty_bids: BTreeSet::new(),
            dirty_asks: BTreeSet::new(),
        }
    }

    pub fn symbol(&self) -> &MarketId {
        &self.symbol
    }

    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.best_bid()
    }

    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.best_ask()
    }

    /// Add a resting order, returning its arrival sequence
    pub fn insert(&mut self, order: Order) -> Result<u64, EngineError> {
        let price = order.price.ok_or_else(|| {
            EngineError::InvariantViolation(format!("order {} rests without a price", order.order_id))
        })?;
        if !order.status.is_resting() || order.remaining.is_zero() {
            return Err(EngineError::InvariantViolation(format!(
                "order {} is {} and cannot rest",
                order.order_id,
                order.status.as_str()
            )));
        }
        if self.orders.contains_key(&order.order_id) {
            return Err(EngineError::InvariantViolation(format!(
                "order {} already in book",
                order.order_id
            )));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let entry = LevelEntry {
            order_id: order.order_id,
            user_id: order.user_id,
            remaining: order.remaining,
            sequence,
        };
        match order.side {
            Side::BUY => {
                self.bids.insert(price, entry);
                self.dirty_bids.insert(price);
            }
            Side::SELL => {
                self.asks.insert(price, entry);
                self.dirty_asks.insert(price);
            }
        }
        self.orders.insert(order.order_id, order);
        Ok(sequence)
    }

    /// Remove a resting order; removing an absent order is a no-op
    pub fn remove(&mut self, order_id: &OrderId) -> Option<Order> {
        let order = self.orders.remove(order_id)?;
        if let Some(price) = order.price {
            match order.side {
                Side::BUY => {
                    self.bids.remove(order_id, price);
                    self.dirty_bids.insert(price);
                }
                Side::SELL => {
                    self.asks.remove(order_id, price);
                    self.dirty_asks.insert(price);
                }
            }
        }
        Some(order)
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    /// Replace a resting order with its post-fill record
    ///
    /// The order keeps its queue position; a fully filled order leaves the
    /// book and is returned.
    pub fn apply_fill(&mut self, updated: Order) -> Result<Option<Order>, EngineError> {
        let current = self.orders.get(&updated.order_id).ok_or_else(|| EngineError::NotFound {
            order_id: updated.order_id.to_string(),
        })?;
        let price = current.price.ok_or_else(|| {
            EngineError::InvariantViolation(format!("resting order {} has no price", current.order_id))
        })?;
        let side = current.side;

        let found = match side {
            Side::BUY => {
                self.dirty_bids.insert(price);
                self.bids.set_remaining(&updated.order_id, price, updated.remaining)
            }
            Side::SELL => {
                self.dirty_asks.insert(price);
                self.asks.set_remaining(&updated.order_id, price, updated.remaining)
            }
        };
        if !found {
            return Err(EngineError::InvariantViolation(format!(
                "order {} indexed but missing from its level",
                updated.order_id
            )));
        }

        if updated.remaining.is_zero() {
            self.orders.remove(&updated.order_id);
            Ok(Some(updated))
        } else {
            self.orders.insert(updated.order_id, updated);
            Ok(None)
        }
    }

    /// Resting orders of one side in price/time priority
    pub fn priority_iter(&self, side: Side) -> Box<dyn Iterator<Item = (Price, &LevelEntry)> + '_> {
        match side {
            Side::BUY => Box::new(self.bids.iter_priority()),
            Side::SELL => Box::new(self.asks.iter_priority()),
        }
    }

    /// Aggregated top `depth` levels per side
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            symbol: self.symbol.clone(),
            bids: self.bids.depth_snapshot(depth),
            asks: self.asks.depth_snapshot(depth),
        }
    }

    /// Drain the levels touched since the last call
    pub fn take_delta(&mut self) -> Option<BookDelta> {
        if self.dirty_bids.is_empty() && self.dirty_asks.is_empty() {
            return None;
        }
        let bids = std::mem::take(&mut self.dirty_bids)
            .into_iter()
            .rev()
            .map(|price| LevelChange {
                price,
                quantity: self
                    .bids
                    .level(price)
                    .map(|l| l.total_quantity())
                    .unwrap_or_default(),
            })
            .collect();
        let asks = std::mem::take(&mut self.dirty_asks)
            .into_iter()
            .map(|price| LevelChange {
                price,
                quantity: self
                    .asks
                    .level(price)
                    .map(|l| l.total_quantity())
                    .unwrap_or_default(),
            })
            .collect();
        Some(BookDelta {
            symbol: self.symbol.clone(),
            bids,
            asks,
        })
    }

    /// Number of resting orders
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// All resting order records, in no particular order
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::ids::UserId;
    use types::order::{NewOrder, OrderType};

    fn limit(side: Side, price: u64, qty: &str) -> Order {
        Order::new(
            NewOrder {
                user_id: UserId::new(),
                symbol: MarketId::new("BTC/USDT"),
                side,
                order_type: OrderType::LIMIT,
                amount: Quantity::from_str(qty).unwrap(),
                price: Some(Price::from_u64(price)),
                fee: Decimal::ZERO,
                fee_currency: "USDT".to_string(),
            },
            1708123456789000000,
        )
    }

    #[test]
    fn test_insert_assigns_sequence() {
        let mut book = OrderBook::new(MarketId::new("BTC/USDT"));
        assert_eq!(book.insert(limit(Side::BUY, 100, "1")).unwrap(), 1);
        assert_eq!(book.insert(limit(Side::SELL, 101, "1")).unwrap(), 2);
        assert_eq!(book.best_bid().unwrap().0, Price::from_u64(100));
        assert_eq!(book.best_ask().unwrap().0, Price::from_u64(101));
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_insert_rejects_market_order() {
        let mut book = OrderBook::new(MarketId::new("BTC/USDT"));
        let mut order = limit(Side::BUY, 100, "1");
        order.price = None;
        assert!(matches!(
            book.insert(order),
            Err(EngineError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut book = OrderBook::new(MarketId::new("BTC/USDT"));
        let order = limit(Side::BUY, 100, "1");
        let id = order.order_id;
        book.insert(order).unwrap();

        assert!(book.remove(&id).is_some());
        assert!(book.remove(&id).is_none());
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn test_apply_fill_keeps_priority() {
        let mut book = OrderBook::new(MarketId::new("BTC/USDT"));
        let first = limit(Side::SELL, 100, "5");
        let second = limit(Side::SELL, 100, "1");
        let first_id = first.order_id;
        book.insert(first.clone()).unwrap();
        book.insert(second).unwrap();

        let mut updated = first;
        updated.locked_funds = Decimal::from(5);
        updated
            .apply_fill(Quantity::from_u64(2), Decimal::from(2), Decimal::ZERO, 1)
            .unwrap();
        assert!(book.apply_fill(updated).unwrap().is_none());

        let (_, front) = book.priority_iter(Side::SELL).next().unwrap();
        assert_eq!(front.order_id, first_id);
        assert_eq!(front.remaining, Quantity::from_u64(3));
        assert_eq!(book.best_ask().unwrap().1, Quantity::from_u64(4));
    }

    #[test]
    fn test_snapshot_and_delta() {
        let mut book = OrderBook::new(MarketId::new("BTC/USDT"));
        book.insert(limit(Side::BUY, 99, "1")).unwrap();
        book.insert(limit(Side::BUY, 98, "2")).unwrap();
        let ask = limit(Side::SELL, 101, "3");
        let ask_id = ask.order_id;
        book.insert(ask).unwrap();

        let snap = book.snapshot(1);
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.bids[0].price, Price::from_u64(99));
        assert_eq!(snap.asks[0].quantity, Quantity::from_u64(3));

        let delta = book.take_delta().unwrap();
        assert_eq!(delta.bids.len(), 2);
        assert_eq!(delta.bids[0].price, Price::from_u64(99));
        assert!(book.take_delta().is_none());

        book.remove(&ask_id);
        let delta = book.take_delta().unwrap();
        assert!(delta.bids.is_empty());
        assert_eq!(delta.asks[0].quantity, Quantity::zero());
    }
}
