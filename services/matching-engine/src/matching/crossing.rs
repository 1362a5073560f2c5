//! Crossing detection logic
//!
//! Determines when an incoming order can trade against a resting one.

use types::numeric::Price;
use types::order::Side;

/// Check if a bid and ask can match at given prices
pub fn can_match(bid_price: Price, ask_price: Price) -> bool {
    bid_price >= ask_price
}

/// Check if an incoming order crosses a resting order's price
///
/// A `None` limit is a market order, which crosses any price.
pub fn incoming_can_match(incoming_side: Side, limit: Option<Price>, resting_price: Price) -> bool {
    match (incoming_side, limit) {
        (_, None) => true,
        (Side::BUY, Some(limit)) => can_match(limit, resting_price),
        (Side::SELL, Some(limit)) => can_match(resting_price, limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_match_crossing() {
        assert!(can_match(Price::from_u64(50000), Price::from_u64(49000)));
    }

    #[test]
    fn test_can_match_exact() {
        let price = Price::from_u64(50000);
        assert!(can_match(price, price), "Equal prices should match");
    }

    #[test]
    fn test_can_match_no_cross() {
        assert!(!can_match(Price::from_u64(49000), Price::from_u64(50000)));
    }

    #[test]
    fn test_incoming_limit() {
        let p100 = Price::from_u64(100);
        let p99 = Price::from_u64(99);
        assert!(incoming_can_match(Side::BUY, Some(p100), p99));
        assert!(!incoming_can_match(Side::BUY, Some(p99), p100));
        assert!(incoming_can_match(Side::SELL, Some(p99), p100));
        assert!(!incoming_can_match(Side::SELL, Some(p100), p99));
    }

    #[test]
    fn test_incoming_market_always_crosses() {
        assert!(incoming_can_match(Side::BUY, None, Price::from_u64(1_000_000)));
        assert!(incoming_can_match(Side::SELL, None, Price::from_u64(1)));
    }
}
