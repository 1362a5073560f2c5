//! Balance ledger
//!
//! Authoritative per-(user, currency) balances shared by every symbol
//! engine. Each cell sits behind its own mutex; an operation touching several
//! cells locks them in key order, so two engines settling overlapping users
//! never deadlock.
//!
//! Every mutation goes through [`BalanceLedger::transact`]: compute the
//! post-state of all touched cells, hand it to the caller's durable commit,
//! and publish it only if that commit succeeded. A journaled ledger commits
//! deposits to its own store; engines commit everything else.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};
use types::account::{merge_changes, Balance, BalanceChange, BalanceKey};
use types::errors::{EngineError, ValidationError};
use types::ids::UserId;

use crate::store::{commit_with_retry, CommitBatch, EngineStore, RetryPolicy};

type Cell = Arc<Mutex<Balance>>;

/// Shared balance store
#[derive(Default)]
pub struct BalanceLedger {
    cells: DashMap<BalanceKey, Cell>,
    journal: Option<(Arc<dyn EngineStore>, RetryPolicy)>,
}

impl fmt::Debug for BalanceLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalanceLedger")
            .field("cells", &self.cells.len())
            .field("journaled", &self.journal.is_some())
            .finish()
    }
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger whose deposits are committed to `store`
    pub fn journaled(store: Arc<dyn EngineStore>, retry: RetryPolicy) -> Self {
        Self {
            cells: DashMap::new(),
            journal: Some((store, retry)),
        }
    }

    /// Overwrite cells with recovered post-states
    ///
    /// Only meant for startup, before any engine runs.
    pub fn restore(&self, balances: impl IntoIterator<Item = (BalanceKey, Balance)>) {
        let mut restored = 0usize;
        for (key, balance) in balances {
            self.cells.insert(key, Arc::new(Mutex::new(balance)));
            restored += 1;
        }
        info!(cells = restored, "balances restored");
    }

    fn cell(&self, key: &BalanceKey) -> Cell {
        self.cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Balance::empty(key.currency.clone()))))
            .clone()
    }

    /// Apply `changes` as one all-or-nothing unit
    ///
    /// `commit` receives the post-state of every touched cell and runs while
    /// those cells are locked. If it fails nothing changes.
    pub fn transact<T, F>(&self, changes: Vec<BalanceChange>, commit: F) -> Result<T, EngineError>
    where
        F: FnOnce(&[(BalanceKey, Balance)]) -> Result<T, EngineError>,
    {
        let changes = merge_changes(changes);
        let cells: Vec<Cell> = changes.iter().map(|c| self.cell(&c.key)).collect();

        let mut guards: Vec<MutexGuard<'_, Balance>> = Vec::with_capacity(cells.len());
        for cell in &cells {
            guards.push(cell.lock().map_err(|_| {
                EngineError::InvariantViolation("balance cell lock poisoned".to_string())
            })?);
        }

        let mut post = Vec::with_capacity(changes.len());
        for (change, guard) in changes.iter().zip(guards.iter()) {
            post.push((change.key.clone(), guard.after(change)?));
        }

        let out = commit(&post)?;

        for (guard, (_, balance)) in guards.iter_mut().zip(post) {
            **guard = balance;
        }
        Ok(out)
    }

    /// Move `amount` from available to locked
    pub fn reserve(&self, user: UserId, currency: &str, amount: Decimal) -> Result<(), EngineError> {
        self.transact(vec![BalanceChange::reserve(user, currency, amount)], |_| Ok(()))
    }

    /// Move `amount` from locked back to available
    pub fn release(&self, user: UserId, currency: &str, amount: Decimal) -> Result<(), EngineError> {
        self.transact(vec![BalanceChange::release(user, currency, amount)], |_| Ok(()))
            .map_err(|err| {
                error!(%user, currency, %amount, error = %err, "release exceeded locked balance");
                err
            })
    }

    /// Apply a fill's settlement legs, committing through `commit`
    ///
    /// Settlement only ever draws on locked funds, so any shortfall is an
    /// invariant violation rather than a user error.
    pub fn settle<T, F>(&self, changes: Vec<BalanceChange>, commit: F) -> Result<T, EngineError>
    where
        F: FnOnce(&[(BalanceKey, Balance)]) -> Result<T, EngineError>,
    {
        self.transact(changes, commit).map_err(|err| match err {
            EngineError::InsufficientBalance {
                currency,
                required,
                available,
            } => {
                let err = EngineError::InvariantViolation(format!(
                    "settlement short of {currency}: required {required}, available {available}"
                ));
                error!(error = %err, "settlement rejected");
                err
            }
            EngineError::Validation(reason) => {
                let err = EngineError::InvariantViolation(format!("settlement out of range: {reason}"));
                error!(error = %err, "settlement rejected");
                err
            }
            EngineError::InvariantViolation(msg) => {
                error!(error = %msg, "settlement rejected");
                EngineError::InvariantViolation(msg)
            }
            other => other,
        })
    }

    /// Credit funds arriving from the wallet subsystem
    pub fn deposit(&self, user: UserId, currency: &str, amount: Decimal) -> Result<Balance, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveDeposit(amount.to_string()).into());
        }
        let balance = self.transact(vec![BalanceChange::credit(user, currency, amount)], |post| {
            if let Some((store, retry)) = &self.journal {
                commit_with_retry(store.as_ref(), &CommitBatch::orders(Vec::new(), post), retry)?;
            }
            Ok(post[0].1.clone())
        })?;
        debug!(%user, currency, %amount, "deposit credited");
        Ok(balance)
    }

    /// Current balance of one cell; an untouched cell is empty
    pub fn balance(&self, user: UserId, currency: &str) -> Balance {
        let key = BalanceKey::new(user, currency);
        match self.cells.get(&key).map(|c| c.value().clone()) {
            Some(cell) => match cell.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            },
            None => Balance::empty(currency),
        }
    }

    /// All balances held by `user`, sorted by currency
    pub fn balances(&self, user: UserId) -> Vec<Balance> {
        let currencies: Vec<String> = self
            .cells
            .iter()
            .filter(|entry| entry.key().user_id == user)
            .map(|entry| entry.key().currency.clone())
            .collect();
        let mut balances: Vec<Balance> = currencies
            .iter()
            .map(|currency| self.balance(user, currency))
            .collect();
        balances.sort_by(|a, b| a.currency.cmp(&b.currency));
        balances
    }

    /// Sum of available + locked over every user for one currency
    pub fn total(&self, currency: &str) -> Decimal {
        let keys: Vec<BalanceKey> = self
            .cells
            .iter()
            .filter(|entry| entry.key().currency == currency)
            .map(|entry| entry.key().clone())
            .collect();
        keys.iter()
            .map(|key| self.balance(key.user_id, &key.currency).total())
            .sum()
    }
}
