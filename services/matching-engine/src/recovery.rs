//! Startup recovery from the commit journal
//!
//! Replays every committed batch in journal order and keeps the newest
//! record of each balance cell and order, the trades per symbol and the last
//! trade sequence. The result seeds the ledger and the symbol engines before
//! any worker starts.
//!
//! Every batch carries the post-state of the cells it touched, so the last
//! record per cell is that cell's balance. Orders keep the journal position
//! of their first record, which is their arrival order.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use types::account::{Balance, BalanceKey};
use types::ids::{MarketId, OrderId};
use types::order::{Order, OrderStatus};
use types::trade::Trade;

use crate::store::{CommitBatch, JournalStore, StoreError};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Locked {currency} of user {user} is {locked}, open orders hold {held}")]
    LockDivergence {
        user: String,
        currency: String,
        locked: Decimal,
        held: Decimal,
    },
}

/// State rebuilt from committed batches
#[derive(Debug, Default)]
pub struct RecoveredState {
    batches: usize,
    balances: HashMap<BalanceKey, Balance>,
    orders: HashMap<OrderId, (usize, Order)>,
    trades: HashMap<MarketId, Vec<Trade>>,
}

impl RecoveredState {
    /// Replay the journal at `path`; a missing journal recovers nothing
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecoveryError> {
        let started = Instant::now();
        let batches = JournalStore::replay(path.as_ref())?;
        let state = Self::from_batches(batches);
        state.check_locks()?;
        info!(
            path = %path.as_ref().display(),
            batches = state.batches,
            balances = state.balances.len(),
            orders = state.orders.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "journal replayed"
        );
        Ok(state)
    }

    pub fn from_batches(batches: impl IntoIterator<Item = CommitBatch>) -> Self {
        let mut state = Self::default();
        for (position, batch) in batches.into_iter().enumerate() {
            state.batches += 1;
            for (key, balance) in batch.balances {
                state.balances.insert(key, balance);
            }
            for order in batch.orders {
                let first_seen = state
                    .orders
                    .get(&order.order_id)
                    .map_or(position, |(seen, _)| *seen);
                state.orders.insert(order.order_id, (first_seen, order));
            }
            if let Some(trade) = batch.trade {
                state.trades.entry(trade.symbol.clone()).or_default().push(trade);
            }
        }
        state
    }

    pub fn is_empty(&self) -> bool {
        self.batches == 0
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Newest post-state of every balance cell
    pub fn balances(&self) -> impl Iterator<Item = (BalanceKey, Balance)> + '_ {
        self.balances.iter().map(|(key, balance)| (key.clone(), balance.clone()))
    }

    /// Orders of `symbol` still holding a reservation, in arrival order
    ///
    /// Includes orders parked as FAILED and orders cut off mid-match.
    pub fn live_orders(&self, symbol: &MarketId) -> Vec<Order> {
        let mut live: Vec<&(usize, Order)> = self
            .orders
            .values()
            .filter(|(_, order)| &order.symbol == symbol && holds_reservation(order))
            .collect();
        live.sort_by_key(|(seen, _)| *seen);
        live.into_iter().map(|(_, order)| order.clone()).collect()
    }

    /// Filled or cancelled orders of `symbol`, oldest update first
    pub fn closed_orders(&self, symbol: &MarketId) -> Vec<Order> {
        let mut closed: Vec<&Order> = self
            .orders
            .values()
            .map(|(_, order)| order)
            .filter(|order| &order.symbol == symbol && !holds_reservation(order))
            .collect();
        closed.sort_by_key(|order| order.updated_at);
        closed.into_iter().cloned().collect()
    }

    /// Committed trades of `symbol` in sequence order
    pub fn trades(&self, symbol: &MarketId) -> &[Trade] {
        self.trades.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_sequence(&self, symbol: &MarketId) -> u64 {
        self.trades(symbol).iter().map(|t| t.sequence).max().unwrap_or(0)
    }

    /// Every locked balance must be exactly what live orders reserve
    pub fn check_locks(&self) -> Result<(), RecoveryError> {
        let mut held: HashMap<BalanceKey, Decimal> = HashMap::new();
        for (_, order) in self.orders.values().filter(|(_, o)| holds_reservation(o)) {
            *held
                .entry(BalanceKey::new(order.user_id, order.reservation_currency()))
                .or_default() += order.locked_funds;
            *held
                .entry(BalanceKey::new(order.user_id, &order.fee_currency))
                .or_default() += order.locked_fee;
        }

        for (key, balance) in &self.balances {
            let expected = held.remove(key).unwrap_or_default();
            if balance.locked != expected {
                return Err(divergence(key, balance.locked, expected));
            }
        }
        match held.into_iter().find(|(_, amount)| !amount.is_zero()) {
            Some((key, amount)) => Err(divergence(&key, Decimal::ZERO, amount)),
            None => Ok(()),
        }
    }
}

fn holds_reservation(order: &Order) -> bool {
    !order.status.is_terminal() || order.status == OrderStatus::Failed
}

fn divergence(key: &BalanceKey, locked: Decimal, held: Decimal) -> RecoveryError {
    RecoveryError::LockDivergence {
        user: key.user_id.to_string(),
        currency: key.currency.clone(),
        locked,
        held,
    }
}
