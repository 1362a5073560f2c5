//! Fee apportioning
//!
//! An order carries one absolute fee for its whole amount, reserved up front
//! in the fee currency. Each fill consumes its pro-rata share; the fill that
//! exhausts the order takes whatever is still locked so the total charged is
//! exactly the order's fee.

use crate::errors::EngineError;
use crate::numeric::{round_down, Quantity};
use rust_decimal::Decimal;

/// Decimal places kept on a per-fill fee share
pub const FEE_SCALE: u32 = 12;

/// Share of `total_fee` owed for filling `fill` out of `amount`
///
/// `locked` is the fee still reserved; the result never exceeds it. When
/// `last_fill` is set the whole remaining `locked` fee is returned.
pub fn fee_share(
    total_fee: Decimal,
    amount: Quantity,
    fill: Quantity,
    locked: Decimal,
    last_fill: bool,
) -> Result<Decimal, EngineError> {
    if last_fill {
        return Ok(locked);
    }
    if amount.is_zero() || total_fee.is_zero() {
        return Ok(Decimal::ZERO);
    }
    // fee * fill can overflow where fee / amount * fill cannot
    let share = total_fee
        .checked_mul(fill.as_decimal())
        .and_then(|scaled| scaled.checked_div(amount.as_decimal()))
        .or_else(|| {
            total_fee
                .checked_div(amount.as_decimal())
                .and_then(|unit| unit.checked_mul(fill.as_decimal()))
        })
        .ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "fee share of {total_fee} for {fill} of {amount} overflows"
            ))
        })?;
    Ok(round_down(share, FEE_SCALE).min(locked))
}
