//! Trading symbol configuration and intake validation

use crate::errors::ValidationError;
use crate::ids::MarketId;
use crate::order::{NewOrder, OrderType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-symbol trading rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: MarketId,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub price_tick: Decimal,
    pub amount_step: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
}

fn default_enabled() -> bool {
    true
}

impl SymbolConfig {
    pub fn base(&self) -> &str {
        self.symbol.base()
    }

    pub fn quote(&self) -> &str {
        self.symbol.quote()
    }

    /// Reject configurations the validation rules cannot work with
    pub fn check(&self) -> Result<(), ValidationError> {
        let bad = |msg: &str| {
            Err(ValidationError::InvalidSymbolConfig(format!(
                "{}: {}",
                self.symbol, msg
            )))
        };
        if self.price_tick <= Decimal::ZERO || self.amount_step <= Decimal::ZERO {
            return bad("tick and step must be positive");
        }
        if self.min_amount <= Decimal::ZERO || self.min_amount > self.max_amount {
            return bad("amount bounds");
        }
        if self.min_price <= Decimal::ZERO || self.min_price > self.max_price {
            return bad("price bounds");
        }
        Ok(())
    }

    /// Validate an intake request against this symbol's rules
    ///
    /// Does not look at balances; that is the reservation step.
    pub fn validate(&self, request: &NewOrder) -> Result<(), ValidationError> {
        if request.symbol != self.symbol {
            return Err(ValidationError::SymbolMismatch {
                order: request.symbol.to_string(),
                engine: self.symbol.to_string(),
            });
        }
        if !self.enabled {
            return Err(ValidationError::SymbolDisabled(self.symbol.to_string()));
        }

        let amount = request.amount.as_decimal();
        if amount < self.min_amount || amount > self.max_amount {
            return Err(ValidationError::AmountOutOfRange {
                amount: amount.to_string(),
                min: self.min_amount.to_string(),
                max: self.max_amount.to_string(),
            });
        }
        if !is_multiple(amount, self.amount_step) {
            return Err(ValidationError::AmountStep {
                amount: amount.to_string(),
                step: self.amount_step.to_string(),
            });
        }

        match (request.order_type, request.price) {
            (OrderType::LIMIT, None) => return Err(ValidationError::PriceRequired),
            (OrderType::MARKET, Some(_)) => return Err(ValidationError::PriceNotAllowed),
            (OrderType::LIMIT, Some(price)) => {
                let price = price.as_decimal();
                if price < self.min_price || price > self.max_price {
                    return Err(ValidationError::PriceOutOfRange {
                        price: price.to_string(),
                        min: self.min_price.to_string(),
                        max: self.max_price.to_string(),
                    });
                }
                if !is_multiple(price, self.price_tick) {
                    return Err(ValidationError::PriceTick {
                        price: price.to_string(),
                        tick: self.price_tick.to_string(),
                    });
                }
            }
            (OrderType::MARKET, None) => {}
        }

        if request.fee < Decimal::ZERO {
            return Err(ValidationError::NegativeFee(request.fee.to_string()));
        }
        if request.fee_currency != self.base() && request.fee_currency != self.quote() {
            return Err(ValidationError::FeeCurrency {
                currency: request.fee_currency.clone(),
                symbol: self.symbol.to_string(),
            });
        }

        // fee may not exceed what the order is worth in the fee currency
        let max_fee = if request.fee_currency == self.base() {
            Some(amount)
        } else {
            let price = request.price.map_or(self.max_price, |p| p.as_decimal());
            amount.checked_mul(price)
        };
        match max_fee {
            Some(max) if request.fee <= max => Ok(()),
            max => Err(ValidationError::FeeTooLarge {
                fee: request.fee.to_string(),
                max: max.map_or_else(|| "an unrepresentable amount".to_string(), |m| m.to_string()),
            }),
        }
    }
}

fn is_multiple(value: Decimal, unit: Decimal) -> bool {
    (value % unit).is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;
    use crate::numeric::{Price, Quantity};
    use crate::order::Side;

    fn btc_usdt() -> SymbolConfig {
        SymbolConfig {
            symbol: MarketId::new("BTC/USDT"),
            enabled: true,
            price_tick: Decimal::new(1, 1),
            amount_step: Decimal::new(1, 3),
            min_amount: Decimal::new(1, 3),
            max_amount: Decimal::from(100),
            min_price: Decimal::ONE,
            max_price: Decimal::from(1_000_000),
        }
    }

    fn request(order_type: OrderType, amount: &str, price: Option<&str>) -> NewOrder {
        NewOrder {
            user_id: UserId::new(),
            symbol: MarketId::new("BTC/USDT"),
            side: Side::BUY,
            order_type,
            amount: Quantity::from_str(amount).unwrap(),
            price: price.map(|p| Price::from_str(p).unwrap()),
            fee: Decimal::ZERO,
            fee_currency: "USDT".to_string(),
        }
    }

    #[test]
    fn test_valid_limit_and_market() {
        let config = btc_usdt();
        assert!(config.check().is_ok());
        assert!(config
            .validate(&request(OrderType::LIMIT, "0.5", Some("50000.1")))
            .is_ok());
        assert!(config
            .validate(&request(OrderType::MARKET, "0.5", None))
            .is_ok());
    }

    #[test]
    fn test_price_rules() {
        let config = btc_usdt();
        assert_eq!(
            config.validate(&request(OrderType::LIMIT, "1", None)),
            Err(ValidationError::PriceRequired)
        );
        assert_eq!(
            config.validate(&request(OrderType::MARKET, "1", Some("100"))),
            Err(ValidationError::PriceNotAllowed)
        );
        assert!(matches!(
            config.validate(&request(OrderType::LIMIT, "1", Some("100.05"))),
            Err(ValidationError::PriceTick { .. })
        ));
        assert!(matches!(
            config.validate(&request(OrderType::LIMIT, "1", Some("2000000"))),
            Err(ValidationError::PriceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_amount_rules() {
        let config = btc_usdt();
        assert!(matches!(
            config.validate(&request(OrderType::MARKET, "0.0005", None)),
            Err(ValidationError::AmountOutOfRange { .. })
        ));
        assert!(matches!(
            config.validate(&request(OrderType::MARKET, "0.0015", None)),
            Err(ValidationError::AmountStep { .. })
        ));
    }

    #[test]
    fn test_fee_rules() {
        let config = btc_usdt();
        let mut req = request(OrderType::MARKET, "1", None);
        req.fee = Decimal::from(-1);
        assert!(matches!(
            config.validate(&req),
            Err(ValidationError::NegativeFee(_))
        ));

        req.fee = Decimal::ONE;
        req.fee_currency = "ETH".to_string();
        assert!(matches!(
            config.validate(&req),
            Err(ValidationError::FeeCurrency { .. })
        ));

        req.fee_currency = "BTC".to_string();
        assert!(config.validate(&req).is_ok());
    }

    #[test]
    fn test_fee_bounded_by_order_value() {
        let config = btc_usdt();
        let mut req = request(OrderType::LIMIT, "3", Some("100"));
        req.fee = Decimal::from(300);
        assert!(config.validate(&req).is_ok());

        req.fee = Decimal::from_str_exact("50000000000000000000000000000").unwrap();
        assert!(matches!(
            config.validate(&req),
            Err(ValidationError::FeeTooLarge { .. })
        ));

        // base-currency fee is capped by the amount; market orders by max price
        req.fee = Decimal::from(4);
        req.fee_currency = "BTC".to_string();
        assert!(matches!(
            config.validate(&req),
            Err(ValidationError::FeeTooLarge { .. })
        ));
        let mut market = request(OrderType::MARKET, "1", None);
        market.fee = Decimal::from(1_000_000);
        assert!(config.validate(&market).is_ok());
        market.fee = Decimal::from(1_000_001);
        assert!(config.validate(&market).is_err());
    }

    #[test]
    fn test_disabled_symbol() {
        let mut config = btc_usdt();
        config.enabled = false;
        assert!(matches!(
            config.validate(&request(OrderType::MARKET, "1", None)),
            Err(ValidationError::SymbolDisabled(_))
        ));
    }

    #[test]
    fn test_bad_config() {
        let mut config = btc_usdt();
        config.price_tick = Decimal::ZERO;
        assert!(config.check().is_err());
    }
}
