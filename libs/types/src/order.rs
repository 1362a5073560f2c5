//! Order lifecycle types
//!
//! An order is created by intake, mutated only by matching transitions or an
//! explicit cancel, and is immutable once FILLED or CANCELLED.
//!
//! Quantities obey `filled + remaining = amount` at all times and the status
//! is FILLED exactly when nothing remains.

use crate::errors::EngineError;
use crate::fee::fee_share;
use crate::ids::{MarketId, OrderId, UserId};
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}

/// Order kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Rests at its price until filled or cancelled
    LIMIT,
    /// Takes whatever liquidity exists, the remainder is cancelled
    MARKET,
}

/// Order status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum OrderStatus {
    /// Resting, nothing filled yet
    #[serde(rename = "OPEN")]
    Open,

    /// Resting or matching with some quantity filled
    #[serde(rename = "PARTIALLY_FILLED")]
    PartiallyFilled,

    /// Completely matched (terminal)
    #[serde(rename = "FILLED")]
    Filled,

    /// Cancelled by the user or the engine (terminal)
    #[serde(rename = "CANCELLED")]
    Cancelled(CancelReason),

    /// A fill could not be persisted; parked for operator intervention
    #[serde(rename = "FAILED")]
    Failed,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled(_) | OrderStatus::Failed
        )
    }

    /// Statuses an order may rest in the book with
    pub fn is_resting(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled(_) => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

/// Why an order left the book without filling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    UserRequested,
    SelfTrade,
    /// Market order remainder with no more liquidity to take
    NoLiquidity,
}

/// Order intake request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: UserId,
    pub symbol: MarketId,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub amount: Quantity,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub fee: Decimal,
    pub fee_currency: String,
}

/// Complete order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: MarketId,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub amount: Quantity,
    pub filled: Quantity,
    pub remaining: Quantity,
    /// Absolute fee for the whole order
    pub fee: Decimal,
    pub fee_currency: String,
    /// Funds still reserved for the remainder, in the reservation currency
    pub locked_funds: Decimal,
    /// Part of the fee still reserved
    pub locked_fee: Decimal,
    pub status: OrderStatus,
    pub created_at: i64, // Unix nanos
    pub updated_at: i64, // Unix nanos
    pub version: u64,
}

impl Order {
    /// Create a new open order from an intake request
    pub fn new(request: NewOrder, timestamp: i64) -> Self {
        Self {
            order_id: OrderId::new(),
            user_id: request.user_id,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            amount: request.amount,
            filled: Quantity::zero(),
            remaining: request.amount,
            fee: request.fee,
            fee_currency: request.fee_currency,
            locked_funds: Decimal::ZERO,
            locked_fee: Decimal::ZERO,
            status: OrderStatus::Open,
            created_at: timestamp,
            updated_at: timestamp,
            version: 0,
        }
    }

    /// Currency the primary reservation is held in
    pub fn reservation_currency(&self) -> &str {
        match self.side {
            Side::BUY => self.symbol.quote(),
            Side::SELL => self.symbol.base(),
        }
    }

    /// Check quantity invariant: filled + remaining = amount
    pub fn check_invariant(&self) -> bool {
        self.filled.as_decimal() + self.remaining.as_decimal() == self.amount.as_decimal()
            && (self.status == OrderStatus::Filled) == self.remaining.is_zero()
    }

    pub fn is_filled(&self) -> bool {
        self.remaining.is_zero()
    }

    pub fn has_fills(&self) -> bool {
        !self.filled.is_zero()
    }

    /// Fee owed for filling `quantity` of this order
    pub fn fee_for_fill(&self, quantity: Quantity) -> Result<Decimal, EngineError> {
        fee_share(
            self.fee,
            self.amount,
            quantity,
            self.locked_fee,
            quantity == self.remaining,
        )
    }

    /// Record a fill of `quantity`
    ///
    /// `funds_used` and `fee_used` are what the fill consumed from this
    /// order's reservation.
    pub fn apply_fill(
        &mut self,
        quantity: Quantity,
        funds_used: Decimal,
        fee_used: Decimal,
        timestamp: i64,
    ) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::InvariantViolation(format!(
                "fill on {} order {}",
                self.status.as_str(),
                self.order_id
            )));
        }
        let remaining = self.remaining.checked_sub(quantity).ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "fill {} exceeds remaining {} of order {}",
                quantity, self.remaining, self.order_id
            ))
        })?;
        if funds_used > self.locked_funds || fee_used > self.locked_fee {
            return Err(EngineError::InvariantViolation(format!(
                "fill of order {} consumes more than its reservation",
                self.order_id
            )));
        }

        self.filled += quantity;
        self.remaining = remaining;
        self.locked_funds -= funds_used;
        self.locked_fee -= fee_used;
        self.status = if remaining.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.touch(timestamp);
        Ok(())
    }

    /// Cancel the order, returning the (funds, fee) reservation to release
    pub fn cancel(
        &mut self,
        reason: CancelReason,
        timestamp: i64,
    ) -> Result<(Decimal, Decimal), EngineError> {
        match self.status {
            OrderStatus::Filled => Err(EngineError::AlreadyFilled {
                order_id: self.order_id.to_string(),
            }),
            ref status if status.is_terminal() => Err(EngineError::NotFound {
                order_id: self.order_id.to_string(),
            }),
            _ => {
                let released = (self.locked_funds, self.locked_fee);
                self.locked_funds = Decimal::ZERO;
                self.locked_fee = Decimal::ZERO;
                self.status = OrderStatus::Cancelled(reason);
                self.touch(timestamp);
                Ok(released)
            }
        }
    }

    /// Park the order after a fill could not be persisted
    ///
    /// The reservation stays locked until an operator resolves it.
    pub fn mark_failed(&mut self, timestamp: i64) {
        self.status = OrderStatus::Failed;
        self.touch(timestamp);
    }

    fn touch(&mut self, timestamp: i64) {
        self.updated_at = timestamp;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit_buy(amount: &str, price: u64) -> Order {
        let mut order = Order::new(
            NewOrder {
                user_id: UserId::new(),
                symbol: MarketId::new("BTC/USDT"),
                side: Side::BUY,
                order_type: OrderType::LIMIT,
                amount: Quantity::from_str(amount).unwrap(),
                price: Some(Price::from_u64(price)),
                fee: Decimal::from(10),
                fee_currency: "USDT".to_string(),
            },
            1708123456789000000,
        );
        order.locked_funds = order.amount.notional(Price::from_u64(price)).unwrap();
        order.locked_fee = order.fee;
        order
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::BUY.opposite(), Side::SELL);
        assert_eq!(Side::SELL.opposite(), Side::BUY);
    }

    #[test]
    fn test_order_creation() {
        let order = limit_buy("1.0", 50000);
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.reservation_currency(), "USDT");
        assert!(order.check_invariant());
        assert!(!order.has_fills());
    }

    #[test]
    fn test_order_fill() {
        let mut order = limit_buy("1.0", 50000);
        let q = Quantity::from_str("0.3").unwrap();
        let fee = order.fee_for_fill(q).unwrap();
        assert_eq!(fee, Decimal::from(3));

        order
            .apply_fill(q, Decimal::from(15000), fee, 1708123456790000000)
            .unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.locked_funds, Decimal::from(35000));
        assert!(order.check_invariant());

        let rest = Quantity::from_str("0.7").unwrap();
        let fee = order.fee_for_fill(rest).unwrap();
        assert_eq!(fee, Decimal::from(7));
        order
            .apply_fill(rest, Decimal::from(35000), fee, 1708123456791000000)
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.locked_funds.is_zero());
        assert!(order.locked_fee.is_zero());
        assert!(order.check_invariant());
        assert_eq!(order.version, 2);
    }

    #[test]
    fn test_order_overfill_rejected() {
        let mut order = limit_buy("1.0", 50000);
        let err = order
            .apply_fill(
                Quantity::from_str("1.5").unwrap(),
                Decimal::ZERO,
                Decimal::ZERO,
                1708123456790000000,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
        assert_eq!(order.status, OrderStatus::Open);
    }

    #[test]
    fn test_order_cancel_releases_reservation() {
        let mut order = limit_buy("2", 100);
        let (funds, fee) = order
            .cancel(CancelReason::UserRequested, 1708123456790000000)
            .unwrap();
        assert_eq!(funds, Decimal::from(200));
        assert_eq!(fee, Decimal::from(10));
        assert_eq!(
            order.status,
            OrderStatus::Cancelled(CancelReason::UserRequested)
        );
        assert!(order.status.is_terminal());

        // second cancel is a miss
        let err = order
            .cancel(CancelReason::UserRequested, 1708123456791000000)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn test_cancel_filled_order() {
        let mut order = limit_buy("1", 100);
        let fee = order.fee_for_fill(order.remaining).unwrap();
        order
            .apply_fill(order.remaining, Decimal::from(100), fee, 1708123456790000000)
            .unwrap();
        let err = order
            .cancel(CancelReason::UserRequested, 1708123456791000000)
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyFilled { .. }));
    }

    #[test]
    fn test_order_serialization() {
        let order = limit_buy("2.5", 3000);
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["type"], "LIMIT");
        assert_eq!(json["side"], "BUY");
        assert_eq!(json["status"]["state"], "OPEN");
        assert_eq!(json["amount"], "2.5");

        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn test_new_order_deserialize_market() {
        let json = r#"{
            "user_id": "01890a5d-ac96-774b-bcce-b302099a8057",
            "symbol": "ETH/USDT",
            "side": "SELL",
            "type": "MARKET",
            "amount": "5",
            "fee": "0.01",
            "fee_currency": "USDT"
        }"#;
        let req: NewOrder = serde_json::from_str(json).unwrap();
        assert_eq!(req.order_type, OrderType::MARKET);
        assert!(req.price.is_none());
        assert_eq!(req.fee, Decimal::new(1, 2));
    }
}
