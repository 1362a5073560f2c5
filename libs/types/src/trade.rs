//! Trade execution types
//!
//! A trade is created exactly once per match event and never changes after.

use crate::ids::{MarketId, OrderId, TradeId, UserId};
use crate::numeric::{Price, Quantity};
use crate::order::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable record of one fill between a taker and a resting maker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    /// Per-engine monotonic sequence
    pub sequence: u64,
    pub symbol: MarketId,

    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub taker_user_id: UserId,
    pub maker_user_id: UserId,

    /// Side of the incoming order
    pub taker_side: Side,
    /// Always the maker's price
    pub price: Price,
    pub quantity: Quantity,

    pub taker_fee: Decimal,
    pub taker_fee_currency: String,
    pub maker_fee: Decimal,
    pub maker_fee_currency: String,

    pub executed_at: i64, // Unix nanos
}

impl Trade {
    /// Quote currency value of the trade
    ///
    /// Saturates; a committed trade's value was already checked at execution.
    pub fn quote_amount(&self) -> Decimal {
        self.quantity.as_decimal().saturating_mul(self.price.as_decimal())
    }

    pub fn buyer(&self) -> UserId {
        match self.taker_side {
            Side::BUY => self.taker_user_id,
            Side::SELL => self.maker_user_id,
        }
    }

    pub fn seller(&self) -> UserId {
        match self.taker_side {
            Side::BUY => self.maker_user_id,
            Side::SELL => self.taker_user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Trade {
        Trade {
            trade_id: TradeId::new(),
            sequence: 1,
            symbol: MarketId::new("BTC/USDT"),
            taker_order_id: OrderId::new(),
            maker_order_id: OrderId::new(),
            taker_user_id: UserId::new(),
            maker_user_id: UserId::new(),
            taker_side: Side::SELL,
            price: Price::from_u64(50000),
            quantity: Quantity::from_str("0.5").unwrap(),
            taker_fee: Decimal::new(25, 1),
            taker_fee_currency: "USDT".to_string(),
            maker_fee: Decimal::ZERO,
            maker_fee_currency: "BTC".to_string(),
            executed_at: 1708123456789000000,
        }
    }

    #[test]
    fn test_quote_amount() {
        assert_eq!(sample().quote_amount(), Decimal::from(25000));
    }

    #[test]
    fn test_buyer_seller() {
        let trade = sample();
        assert_eq!(trade.buyer(), trade.maker_user_id);
        assert_eq!(trade.seller(), trade.taker_user_id);
    }

    #[test]
    fn test_trade_serialization() {
        let trade = sample();
        let json = serde_json::to_string(&trade).unwrap();
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trade);
    }
}
