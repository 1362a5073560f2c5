//! Trade execution logic
//!
//! Turns one match between a taker and a resting maker into a `FillPlan`:
//! the trade record, both post-fill order records and every balance leg the
//! fill moves. Nothing is applied here; the engine commits the plan as one
//! unit and only then confirms it.

use rust_decimal::Decimal;
use types::account::BalanceChange;
use types::errors::EngineError;
use types::ids::{TradeId, UserId};
use types::numeric::Quantity;
use types::order::{Order, Side};
use types::trade::Trade;

/// Everything one fill changes
#[derive(Debug, Clone)]
pub struct FillPlan {
    pub trade: Trade,
    /// Taker after the fill
    pub taker: Order,
    /// Maker after the fill
    pub maker: Order,
    pub changes: Vec<BalanceChange>,
}

/// Match executor for handling trade generation
#[derive(Debug)]
pub struct MatchExecutor {
    sequence_counter: u64,
    fee_account: UserId,
}

impl MatchExecutor {
    /// Create a new match executor with starting sequence number
    pub fn new(starting_sequence: u64, fee_account: UserId) -> Self {
        Self {
            sequence_counter: starting_sequence,
            fee_account,
        }
    }

    /// Sequence the next committed trade will carry
    pub fn next_sequence(&self) -> u64 {
        self.sequence_counter
    }

    /// Consume the sequence of a committed plan
    pub fn confirm(&mut self, plan: &FillPlan) {
        self.sequence_counter = plan.trade.sequence + 1;
    }

    /// Plan a fill of `quantity` at the maker's price
    pub fn plan_fill(
        &self,
        taker: &Order,
        maker: &Order,
        quantity: Quantity,
        timestamp: i64,
    ) -> Result<FillPlan, EngineError> {
        let price = maker.price.ok_or_else(|| {
            EngineError::InvariantViolation(format!("maker {} has no price", maker.order_id))
        })?;
        if maker.side == taker.side {
            return Err(EngineError::InvariantViolation(format!(
                "orders {} and {} are on the same side",
                taker.order_id, maker.order_id
            )));
        }
        let notional = quantity.notional(price)?;

        let taker_fee = taker.fee_for_fill(quantity)?;
        let maker_fee = maker.fee_for_fill(quantity)?;
        let taker_funds = funds_used(taker, quantity, notional)?;
        let maker_funds = funds_used(maker, quantity, notional)?;

        let mut changes = Vec::with_capacity(10);
        self.order_legs(&mut changes, taker, quantity, notional, taker_funds, taker_fee);
        self.order_legs(&mut changes, maker, quantity, notional, maker_funds, maker_fee);

        let mut taker_after = taker.clone();
        taker_after.apply_fill(quantity, taker_funds, taker_fee, timestamp)?;
        let mut maker_after = maker.clone();
        maker_after.apply_fill(quantity, maker_funds, maker_fee, timestamp)?;

        let trade = Trade {
            trade_id: TradeId::new(),
            sequence: self.sequence_counter,
            symbol: taker.symbol.clone(),
            taker_order_id: taker.order_id,
            maker_order_id: maker.order_id,
            taker_user_id: taker.user_id,
            maker_user_id: maker.user_id,
            taker_side: taker.side,
            price,
            quantity,
            taker_fee,
            taker_fee_currency: taker.fee_currency.clone(),
            maker_fee,
            maker_fee_currency: maker.fee_currency.clone(),
            executed_at: timestamp,
        };

        Ok(FillPlan {
            trade,
            taker: taker_after,
            maker: maker_after,
            changes,
        })
    }

    /// Balance legs of one side of a fill
    ///
    /// `funds` is what leaves the order's reservation; for a limit buy that
    /// filled below its limit the difference to `notional` goes back to
    /// available.
    fn order_legs(
        &self,
        changes: &mut Vec<BalanceChange>,
        order: &Order,
        quantity: Quantity,
        notional: Decimal,
        funds: Decimal,
        fee: Decimal,
    ) {
        let base = order.symbol.base();
        let quote = order.symbol.quote();
        let user = order.user_id;

        match order.side {
            Side::BUY => {
                changes.push(BalanceChange::consume_locked(user, quote, notional));
                if funds > notional {
                    changes.push(BalanceChange::release(user, quote, funds - notional));
                }
                changes.push(BalanceChange::credit(user, base, quantity.as_decimal()));
            }
            Side::SELL => {
                changes.push(BalanceChange::consume_locked(user, base, funds));
                changes.push(BalanceChange::credit(user, quote, notional));
            }
        }

        if !fee.is_zero() {
            changes.push(BalanceChange::consume_locked(user, &order.fee_currency, fee));
            changes.push(BalanceChange::credit(self.fee_account, &order.fee_currency, fee));
        }
    }
}

/// Part of an order's reservation a fill consumes
fn funds_used(order: &Order, quantity: Quantity, notional: Decimal) -> Result<Decimal, EngineError> {
    match (order.side, order.price) {
        (Side::BUY, Some(limit)) => quantity.notional(limit),
        (Side::BUY, None) => Ok(notional),
        (Side::SELL, _) => Ok(quantity.as_decimal()),
    }
}
