//! Balance types
//!
//! A balance is kept per (user, currency) as two buckets: `available` funds
//! the user can commit to new orders and `locked` funds reserved by open
//! orders. Both buckets are never negative.
//!
//! Mutations are expressed as signed `BalanceChange` deltas so that several
//! of them (one fill touches up to five cells) can be validated together and
//! applied as a unit by the ledger.

use crate::errors::BalanceError;
use crate::ids::UserId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ledger cell address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub user_id: UserId,
    pub currency: String,
}

impl BalanceKey {
    pub fn new(user_id: UserId, currency: impl Into<String>) -> Self {
        Self {
            user_id,
            currency: currency.into(),
        }
    }
}

/// Balance for a single (user, currency) cell
///
/// Invariant: available >= 0 and locked >= 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub available: Decimal,
    pub locked: Decimal,
}

impl Balance {
    /// Create a balance with everything available
    pub fn new(currency: impl Into<String>, available: Decimal) -> Self {
        Self {
            currency: currency.into(),
            available,
            locked: Decimal::ZERO,
        }
    }

    pub fn empty(currency: impl Into<String>) -> Self {
        Self::new(currency, Decimal::ZERO)
    }

    pub fn total(&self) -> Decimal {
        self.available.saturating_add(self.locked)
    }

    /// Check balance invariant: no bucket below zero
    pub fn check_invariant(&self) -> bool {
        self.available >= Decimal::ZERO && self.locked >= Decimal::ZERO
    }

    /// Compute the post-state of applying `change`, leaving `self` untouched
    ///
    /// Fails without partial effect when either bucket would go negative.
    pub fn after(&self, change: &BalanceChange) -> Result<Balance, BalanceError> {
        let overflow = || BalanceError::Overflow {
            currency: self.currency.clone(),
        };
        let available = self
            .available
            .checked_add(change.available)
            .ok_or_else(overflow)?;
        let locked = self.locked.checked_add(change.locked).ok_or_else(overflow)?;

        if available < Decimal::ZERO {
            return Err(BalanceError::InsufficientAvailable {
                currency: self.currency.clone(),
                required: (-change.available).to_string(),
                available: self.available.to_string(),
            });
        }
        if locked < Decimal::ZERO {
            return Err(BalanceError::InsufficientLocked {
                currency: self.currency.clone(),
                required: (-change.locked).to_string(),
                locked: self.locked.to_string(),
            });
        }

        Ok(Balance {
            currency: self.currency.clone(),
            available,
            locked,
        })
    }
}

/// Signed delta against one ledger cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub key: BalanceKey,
    /// Delta applied to the available bucket
    pub available: Decimal,
    /// Delta applied to the locked bucket
    pub locked: Decimal,
}

impl BalanceChange {
    /// available -> locked
    pub fn reserve(user_id: UserId, currency: &str, amount: Decimal) -> Self {
        Self {
            key: BalanceKey::new(user_id, currency),
            available: -amount,
            locked: amount,
        }
    }

    /// locked -> available
    pub fn release(user_id: UserId, currency: &str, amount: Decimal) -> Self {
        Self {
            key: BalanceKey::new(user_id, currency),
            available: amount,
            locked: -amount,
        }
    }

    /// Remove funds from the locked bucket (they leave this cell)
    pub fn consume_locked(user_id: UserId, currency: &str, amount: Decimal) -> Self {
        Self {
            key: BalanceKey::new(user_id, currency),
            available: Decimal::ZERO,
            locked: -amount,
        }
    }

    /// Add funds to the available bucket
    pub fn credit(user_id: UserId, currency: &str, amount: Decimal) -> Self {
        Self {
            key: BalanceKey::new(user_id, currency),
            available: amount,
            locked: Decimal::ZERO,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.available.is_zero() && self.locked.is_zero()
    }

    /// Net effect on the cell's total
    pub fn net(&self) -> Decimal {
        self.available + self.locked
    }
}

/// Fold changes addressing the same cell into one, dropping no-ops
///
/// Output is sorted by key, which is also the ledger's lock order.
pub fn merge_changes(changes: impl IntoIterator<Item = BalanceChange>) -> Vec<BalanceChange> {
    let mut merged: std::collections::BTreeMap<BalanceKey, (Decimal, Decimal)> =
        std::collections::BTreeMap::new();
    for change in changes {
        let entry = merged
            .entry(change.key)
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        // saturated sums are caught as overflow by `Balance::after`
        entry.0 = entry.0.saturating_add(change.available);
        entry.1 = entry.1.saturating_add(change.locked);
    }
    merged
        .into_iter()
        .map(|(key, (available, locked))| BalanceChange {
            key,
            available,
            locked,
        })
        .filter(|c| !c.is_noop())
        .collect()
}
