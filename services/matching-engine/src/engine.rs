//! Matching engine core
//!
//! `SymbolEngine` owns one symbol's order book and runs every command for
//! that symbol to completion on the caller's thread: validate, reserve,
//! match, rest or cancel the remainder, then publish market events. The
//! registry gives each engine its own worker thread.
//!
//! Each fill is committed (balances + trade + both order records) before the
//! in-memory book is touched. A committed fill is never rolled back; a fill
//! that cannot be committed parks the taker as FAILED.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::account::BalanceChange;
use types::errors::EngineError;
use types::ids::{MarketId, OrderId, UserId};
use types::numeric::{Price, Quantity};
use types::order::{CancelReason, NewOrder, Order, OrderStatus, OrderType, Side};
use types::symbol::SymbolConfig;
use types::trade::Trade;
use types::unix_nanos;

use crate::book::{BookSnapshot, OrderBook};
use crate::config::{EngineConfig, SelfTradePolicy};
use crate::events::EngineEvent;
use crate::ledger::BalanceLedger;
use crate::matching::{incoming_can_match, MatchExecutor};
use crate::recovery::RecoveredState;
use crate::store::{commit_with_retry, CommitBatch, EngineStore};
use crate::ticker::{RollingTicker, Ticker};

/// Outcome of an order submission
///
/// `error` is set when matching stopped because a fill could not be
/// persisted; `trades` then holds the fills committed before that.
#[derive(Debug, Clone)]
pub struct OrderReport {
    pub order: Order,
    pub trades: Vec<Trade>,
    pub error: Option<EngineError>,
}

/// Immutable market state published after every command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketView {
    pub symbol: MarketId,
    pub book: BookSnapshot,
    pub ticker: Ticker,
    pub last_trade_sequence: u64,
}

impl MarketView {
    pub fn empty(symbol: MarketId) -> Self {
        Self {
            book: BookSnapshot::empty(symbol.clone()),
            ticker: Ticker::empty(symbol.clone()),
            symbol,
            last_trade_sequence: 0,
        }
    }
}

enum MakerPick {
    None,
    SelfTrade,
    Maker(OrderId),
}

/// Single-symbol matching engine
pub struct SymbolEngine {
    config: SymbolConfig,
    settings: EngineConfig,
    book: OrderBook,
    ledger: Arc<BalanceLedger>,
    store: Arc<dyn EngineStore>,
    executor: MatchExecutor,
    ticker: RollingTicker,
    last_ticker: Ticker,
    events: Vec<EngineEvent>,
    closed: HashMap<OrderId, (UserId, OrderStatus)>,
    closed_order: VecDeque<OrderId>,
    parked: HashMap<OrderId, Order>,
}

impl SymbolEngine {
    pub fn new(
        config: SymbolConfig,
        settings: EngineConfig,
        ledger: Arc<BalanceLedger>,
        store: Arc<dyn EngineStore>,
    ) -> Result<Self, EngineError> {
        config.check()?;
        let symbol = config.symbol.clone();
        Ok(Self {
            book: OrderBook::new(symbol.clone()),
            executor: MatchExecutor::new(1, settings.fee_account),
            ticker: RollingTicker::new(symbol.clone(), settings.ticker_window_secs),
            last_ticker: Ticker::empty(symbol),
            config,
            settings,
            ledger,
            store,
            events: Vec::new(),
            closed: HashMap::new(),
            closed_order: VecDeque::new(),
            parked: HashMap::new(),
        })
    }

    /// Rebuild book, parked orders, ticker and trade sequence from the journal
    ///
    /// Runs before the first command. A live order that cannot rest, or
    /// that would trade against the restored book, is parked as FAILED and
    /// keeps its reservation.
    pub fn restore(&mut self, recovered: &RecoveredState) -> Result<(), EngineError> {
        let symbol = self.config.symbol.clone();
        let mut resting = 0usize;
        for mut order in recovered.live_orders(&symbol) {
            let restable = order.status.is_resting()
                && order.price.is_some()
                && !order.remaining.is_zero()
                && !matches!(self.next_maker(&order), MakerPick::Maker(_));
            if restable {
                self.book.insert(order)?;
                resting += 1;
                continue;
            }
            if order.status != OrderStatus::Failed {
                warn!(order_id = %order.order_id, %symbol, "order cut off mid-match, parked as failed");
                order.mark_failed(unix_nanos());
                if let Err(err) = self.persist(&CommitBatch::orders(vec![order.clone()], &[])) {
                    warn!(order_id = %order.order_id, error = %err, "could not persist failed status");
                }
            }
            self.parked.insert(order.order_id, order);
        }
        for order in recovered.closed_orders(&symbol) {
            self.remember_closed(&order);
        }
        for trade in recovered.trades(&symbol) {
            self.ticker.record(trade);
        }
        self.executor = MatchExecutor::new(recovered.last_sequence(&symbol) + 1, self.settings.fee_account);

        self.flush_market_events();
        self.events.clear();
        info!(
            %symbol,
            resting,
            parked = self.parked.len(),
            next_sequence = self.executor.next_sequence(),
            "engine state restored"
        );
        Ok(())
    }

    pub fn symbol(&self) -> &MarketId {
        &self.config.symbol
    }

    pub fn symbol_config(&self) -> &SymbolConfig {
        &self.config
    }

    /// Submit a new order
    pub fn submit(&mut self, request: NewOrder) -> Result<OrderReport, EngineError> {
        let result = self.process_order(request);
        self.flush_market_events();
        result
    }

    /// Cancel a resting order owned by `user_id`
    pub fn cancel(&mut self, user_id: UserId, order_id: OrderId) -> Result<Order, EngineError> {
        let result = self.cancel_resting(user_id, order_id);
        self.flush_market_events();
        result
    }

    /// Re-evaluate time-dependent market state (ticker window)
    pub fn refresh(&mut self) {
        self.flush_market_events();
    }

    /// Events produced since the last drain, in commit order
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.book.best_bid()
    }

    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.book.best_ask()
    }

    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        self.book.snapshot(depth)
    }

    pub fn ticker(&self) -> Ticker {
        self.last_ticker.clone()
    }

    pub fn market_view(&self) -> MarketView {
        MarketView {
            symbol: self.config.symbol.clone(),
            book: self.book.snapshot(self.settings.view_depth),
            ticker: self.last_ticker.clone(),
            last_trade_sequence: self.executor.next_sequence().saturating_sub(1),
        }
    }

    /// Resting or parked order by id
    pub fn order(&self, order_id: &OrderId) -> Option<&Order> {
        self.book.get(order_id).or_else(|| self.parked.get(order_id))
    }

    /// Orders parked as FAILED
    pub fn parked_orders(&self) -> impl Iterator<Item = &Order> {
        self.parked.values()
    }

    pub fn resting_orders(&self) -> usize {
        self.book.len()
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.book.orders()
    }

    fn process_order(&mut self, request: NewOrder) -> Result<OrderReport, EngineError> {
        self.config.validate(&request)?;
        let mut order = Order::new(request, unix_nanos());

        if self.settings.self_trade == SelfTradePolicy::Reject {
            if let MakerPick::SelfTrade = self.next_maker(&order) {
                debug!(user_id = %order.user_id, "rejecting self-trade before reservation");
                return Err(EngineError::SelfTrade);
            }
        }

        order.locked_funds = self.reservation_for(&order)?;
        order.locked_fee = order.fee;
        let changes = vec![
            BalanceChange::reserve(order.user_id, order.reservation_currency(), order.locked_funds),
            BalanceChange::reserve(order.user_id, &order.fee_currency, order.locked_fee),
        ];
        self.ledger.transact(changes, |post| {
            self.persist(&CommitBatch::orders(vec![order.clone()], post))
        })?;
        debug!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            side = ?order.side,
            amount = %order.amount,
            "order accepted"
        );
        self.events.push(EngineEvent::OrderAccepted {
            order: order.clone(),
        });

        let mut trades = Vec::new();
        let mut stopped_by_self_trade = false;
        while !order.remaining.is_zero() {
            let maker_id = match self.next_maker(&order) {
                MakerPick::None => break,
                MakerPick::SelfTrade => {
                    stopped_by_self_trade = true;
                    break;
                }
                MakerPick::Maker(id) => id,
            };
            match self.execute_fill(&order, &maker_id) {
                Ok((taker, trade)) => {
                    order = taker;
                    trades.push(trade);
                }
                Err(err) => return Ok(self.park(order, trades, err)),
            }
        }

        let finished = if order.remaining.is_zero() {
            self.release_leftover(&mut order)
        } else if stopped_by_self_trade || order.order_type == OrderType::MARKET {
            let reason = if stopped_by_self_trade {
                CancelReason::SelfTrade
            } else {
                CancelReason::NoLiquidity
            };
            self.cancel_remainder(&mut order, reason)
        } else {
            self.book.insert(order.clone()).map(|_| ())
        };
        if let Err(err) = finished {
            return Ok(self.park(order, trades, err));
        }

        if order.status.is_terminal() {
            self.remember_closed(&order);
        }
        Ok(OrderReport {
            order,
            trades,
            error: None,
        })
    }

    /// Quote or base amount to reserve for the whole order
    fn reservation_for(&self, order: &Order) -> Result<Decimal, EngineError> {
        match (order.side, order.price) {
            (Side::BUY, Some(limit)) => order.amount.notional(limit),
            (Side::SELL, _) => Ok(order.amount.as_decimal()),
            (Side::BUY, None) => {
                // cost of walking the asks exactly as the match loop will
                let mut left = order.amount;
                let mut cost = Decimal::ZERO;
                for (price, entry) in self.book.priority_iter(Side::SELL) {
                    if left.is_zero() {
                        break;
                    }
                    if entry.user_id == order.user_id {
                        match self.settings.self_trade {
                            SelfTradePolicy::Skip => continue,
                            SelfTradePolicy::Reject => break,
                        }
                    }
                    let quantity = left.min(entry.remaining);
                    cost = cost.checked_add(quantity.notional(price)?).ok_or_else(|| {
                        EngineError::InvariantViolation("market buy cost overflows".to_string())
                    })?;
                    left = left.checked_sub(quantity).unwrap_or_default();
                }
                Ok(cost)
            }
        }
    }

    fn next_maker(&self, order: &Order) -> MakerPick {
        for (price, entry) in self.book.priority_iter(order.side.opposite()) {
            if !incoming_can_match(order.side, order.price, price) {
                return MakerPick::None;
            }
            if entry.user_id == order.user_id {
                match self.settings.self_trade {
                    SelfTradePolicy::Skip => continue,
                    SelfTradePolicy::Reject => return MakerPick::SelfTrade,
                }
            }
            return MakerPick::Maker(entry.order_id);
        }
        MakerPick::None
    }

    /// Commit one fill, then apply it to the book
    fn execute_fill(&mut self, taker: &Order, maker_id: &OrderId) -> Result<(Order, Trade), EngineError> {
        let maker = self.book.get(maker_id).cloned().ok_or_else(|| {
            EngineError::InvariantViolation(format!("maker {maker_id} vanished from the book"))
        })?;
        let quantity = taker.remaining.min(maker.remaining);
        let plan = self
            .executor
            .plan_fill(taker, &maker, quantity, unix_nanos())?;

        self.ledger.settle(plan.changes.clone(), |post| {
            self.persist(&CommitBatch {
                orders: vec![plan.taker.clone(), plan.maker.clone()],
                trade: Some(plan.trade.clone()),
                balances: post.to_vec(),
            })
        })?;

        self.executor.confirm(&plan);
        if let Some(filled) = self.book.apply_fill(plan.maker.clone())? {
            self.remember_closed(&filled);
        }
        self.ticker.record(&plan.trade);
        debug!(
            symbol = %plan.trade.symbol,
            sequence = plan.trade.sequence,
            price = %plan.trade.price,
            quantity = %plan.trade.quantity,
            "fill committed"
        );
        self.events.push(EngineEvent::TradeExecuted {
            trade: plan.trade.clone(),
        });
        Ok((plan.taker, plan.trade))
    }

    fn cancel_remainder(&mut self, order: &mut Order, reason: CancelReason) -> Result<(), EngineError> {
        let mut cancelled = order.clone();
        let (funds, fee) = cancelled.cancel(reason, unix_nanos())?;
        self.commit_release(&cancelled, funds, fee)?;
        *order = cancelled;
        self.events.push(EngineEvent::OrderCancelled {
            order: order.clone(),
        });
        Ok(())
    }

    /// Release whatever a filled order still holds
    fn release_leftover(&mut self, order: &mut Order) -> Result<(), EngineError> {
        if order.locked_funds.is_zero() && order.locked_fee.is_zero() {
            return Ok(());
        }
        let mut released = order.clone();
        let (funds, fee) = (released.locked_funds, released.locked_fee);
        released.locked_funds = Decimal::ZERO;
        released.locked_fee = Decimal::ZERO;
        self.commit_release(&released, funds, fee)?;
        *order = released;
        Ok(())
    }

    /// Release `funds` and `fee` of `order` and persist its record, as one unit
    fn commit_release(&self, order: &Order, funds: Decimal, fee: Decimal) -> Result<(), EngineError> {
        let changes = vec![
            BalanceChange::release(order.user_id, order.reservation_currency(), funds),
            BalanceChange::release(order.user_id, &order.fee_currency, fee),
        ];
        self.ledger.transact(changes, |post| {
            self.persist(&CommitBatch::orders(vec![order.clone()], post))
        })
    }

    fn cancel_resting(&mut self, user_id: UserId, order_id: OrderId) -> Result<Order, EngineError> {
        let not_found = || EngineError::NotFound {
            order_id: order_id.to_string(),
        };
        let Some(resting) = self.book.get(&order_id) else {
            return match self.closed.get(&order_id) {
                Some((owner, OrderStatus::Filled)) if *owner == user_id => {
                    Err(EngineError::AlreadyFilled {
                        order_id: order_id.to_string(),
                    })
                }
                _ => Err(not_found()),
            };
        };
        if resting.user_id != user_id {
            return Err(not_found());
        }

        let mut order = resting.clone();
        let (funds, fee) = order.cancel(CancelReason::UserRequested, unix_nanos())?;
        self.commit_release(&order, funds, fee)?;
        self.book.remove(&order_id);
        info!(order_id = %order_id, symbol = %order.symbol, "order cancelled");
        self.events.push(EngineEvent::OrderCancelled {
            order: order.clone(),
        });
        self.remember_closed(&order);
        Ok(order)
    }

    /// Park the taker after a failed commit; its reservation stays locked
    fn park(&mut self, mut order: Order, trades: Vec<Trade>, err: EngineError) -> OrderReport {
        error!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            fills = trades.len(),
            error = %err,
            "matching halted, order parked as failed"
        );
        order.mark_failed(unix_nanos());
        if let Err(store_err) = self.store.commit(&CommitBatch::orders(vec![order.clone()], &[])) {
            warn!(order_id = %order.order_id, error = %store_err, "could not persist failed status");
        }
        self.events.push(EngineEvent::OrderFailed {
            order: order.clone(),
            reason: err.to_string(),
        });
        self.parked.insert(order.order_id, order.clone());
        OrderReport {
            order,
            trades,
            error: Some(err),
        }
    }

    fn remember_closed(&mut self, order: &Order) {
        if self
            .closed
            .insert(order.order_id, (order.user_id, order.status.clone()))
            .is_none()
        {
            self.closed_order.push_back(order.order_id);
        }
        while self.closed_order.len() > self.settings.closed_order_retention {
            if let Some(old) = self.closed_order.pop_front() {
                self.closed.remove(&old);
            }
        }
    }

    fn persist(&self, batch: &CommitBatch) -> Result<(), EngineError> {
        commit_with_retry(self.store.as_ref(), batch, &self.settings.retry)
    }

    fn flush_market_events(&mut self) {
        if let Some(delta) = self.book.take_delta() {
            self.events.push(EngineEvent::BookDelta { delta });
        }
        self.ticker.expire(unix_nanos());
        let ticker = self.ticker.ticker(
            self.book.best_bid().map(|(p, _)| p),
            self.book.best_ask().map(|(p, _)| p),
        );
        if ticker != self.last_ticker {
            self.last_ticker = ticker.clone();
            self.events.push(EngineEvent::Ticker { ticker });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RetryPolicy, StoreError};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Accepts a fixed number of commits, then fails every one after
    struct CountdownStore {
        successes_left: AtomicI64,
        inner: MemoryStore,
    }

    impl EngineStore for CountdownStore {
        fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
            if self.successes_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                return self.inner.commit(batch);
            }
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    fn countdown_engine() -> (SymbolEngine, Arc<BalanceLedger>, Arc<CountdownStore>) {
        let ledger = Arc::new(BalanceLedger::new());
        let store = Arc::new(CountdownStore {
            successes_left: AtomicI64::new(i64::MAX),
            inner: MemoryStore::new(),
        });
        let engine = SymbolEngine::new(
            symbol_config(),
            settings(),
            Arc::clone(&ledger),
            Arc::clone(&store) as Arc<dyn EngineStore>,
        )
        .unwrap();
        (engine, ledger, store)
    }

    fn symbol_config() -> SymbolConfig {
        SymbolConfig {
            symbol: MarketId::new("BTC/USDT"),
            enabled: true,
            price_tick: Decimal::ONE,
            amount_step: Decimal::ONE,
            min_amount: Decimal::ONE,
            max_amount: Decimal::from(1000),
            min_price: Decimal::ONE,
            max_price: Decimal::from(1_000_000),
        }
    }

    fn settings() -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff_ms: 0,
                max_backoff_ms: 0,
            },
            ..EngineConfig::default()
        }
    }

    fn engine_with(settings: EngineConfig) -> (SymbolEngine, Arc<BalanceLedger>) {
        let ledger = Arc::new(BalanceLedger::new());
        let engine = SymbolEngine::new(
            symbol_config(),
            settings,
            Arc::clone(&ledger),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        (engine, ledger)
    }

    fn funded_user(ledger: &BalanceLedger) -> UserId {
        let user = UserId::new();
        ledger.deposit(user, "BTC", Decimal::from(100)).unwrap();
        ledger.deposit(user, "USDT", Decimal::from(100_000)).unwrap();
        user
    }

    fn limit(user: UserId, side: Side, price: u64, amount: u64) -> NewOrder {
        NewOrder {
            user_id: user,
            symbol: MarketId::new("BTC/USDT"),
            side,
            order_type: OrderType::LIMIT,
            amount: Quantity::from_u64(amount),
            price: Some(Price::from_u64(price)),
            fee: Decimal::ZERO,
            fee_currency: "USDT".to_string(),
        }
    }

    fn market(user: UserId, side: Side, amount: u64) -> NewOrder {
        NewOrder {
            order_type: OrderType::MARKET,
            price: None,
            ..limit(user, side, 1, amount)
        }
    }

    #[test]
    fn test_resting_order_reserves_funds() {
        let (mut engine, ledger) = engine_with(settings());
        let user = funded_user(&ledger);

        let report = engine.submit(limit(user, Side::BUY, 100, 10)).unwrap();
        assert!(report.trades.is_empty());
        assert_eq!(report.order.status, OrderStatus::Open);
        assert_eq!(engine.best_bid(), Some((Price::from_u64(100), Quantity::from_u64(10))));

        let usdt = ledger.balance(user, "USDT");
        assert_eq!(usdt.locked, Decimal::from(1000));
        assert_eq!(usdt.available, Decimal::from(99_000));
    }

    #[test]
    fn test_validation_has_no_side_effects() {
        let (mut engine, ledger) = engine_with(settings());
        let user = funded_user(&ledger);
        let mut bad = limit(user, Side::BUY, 100, 10);
        bad.price = None;

        assert!(matches!(engine.submit(bad), Err(EngineError::Validation(_))));
        assert_eq!(ledger.balance(user, "USDT").locked, Decimal::ZERO);
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn test_insufficient_balance() {
        let (mut engine, ledger) = engine_with(settings());
        let user = funded_user(&ledger);
        let err = engine.submit(limit(user, Side::SELL, 100, 500)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        assert!(engine.best_ask().is_none());
    }

    #[test]
    fn test_limit_buy_price_improvement_released() {
        let (mut engine, ledger) = engine_with(settings());
        let buyer = funded_user(&ledger);
        let seller = funded_user(&ledger);

        engine.submit(limit(seller, Side::SELL, 99, 4)).unwrap();
        let report = engine.submit(limit(buyer, Side::BUY, 100, 4)).unwrap();

        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].price, Price::from_u64(99));
        assert_eq!(report.order.status, OrderStatus::Filled);

        let usdt = ledger.balance(buyer, "USDT");
        assert_eq!(usdt.locked, Decimal::ZERO);
        assert_eq!(usdt.available, Decimal::from(100_000 - 396));
        assert_eq!(ledger.balance(buyer, "BTC").available, Decimal::from(104));
        assert_eq!(ledger.balance(seller, "USDT").available, Decimal::from(100_396));
    }

    #[test]
    fn test_market_remainder_cancelled() {
        let (mut engine, ledger) = engine_with(settings());
        let buyer = funded_user(&ledger);
        let seller = funded_user(&ledger);

        engine.submit(limit(seller, Side::SELL, 100, 2)).unwrap();
        let report = engine.submit(market(buyer, Side::BUY, 5)).unwrap();

        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.order.filled, Quantity::from_u64(2));
        assert_eq!(
            report.order.status,
            OrderStatus::Cancelled(CancelReason::NoLiquidity)
        );
        // reserved exactly the walked cost, all of it consumed
        let usdt = ledger.balance(buyer, "USDT");
        assert_eq!(usdt.locked, Decimal::ZERO);
        assert_eq!(usdt.available, Decimal::from(100_000 - 200));
    }

    #[test]
    fn test_market_order_on_empty_book() {
        let (mut engine, ledger) = engine_with(settings());
        let seller = funded_user(&ledger);
        let report = engine.submit(market(seller, Side::SELL, 3)).unwrap();
        assert!(report.trades.is_empty());
        assert!(report.order.status.is_terminal());
        assert_eq!(ledger.balance(seller, "BTC").locked, Decimal::ZERO);
        assert_eq!(ledger.balance(seller, "BTC").available, Decimal::from(100));
    }

    #[test]
    fn test_self_trade_skip() {
        let (mut engine, ledger) = engine_with(settings());
        let user = funded_user(&ledger);
        let other = funded_user(&ledger);

        engine.submit(limit(user, Side::SELL, 100, 1)).unwrap();
        engine.submit(limit(other, Side::SELL, 100, 1)).unwrap();
        let report = engine.submit(limit(user, Side::BUY, 100, 1)).unwrap();

        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].maker_user_id, other);
        // own ask still resting
        assert_eq!(engine.best_ask(), Some((Price::from_u64(100), Quantity::from_u64(1))));
    }

    #[test]
    fn test_self_trade_reject_without_fills() {
        let mut config = settings();
        config.self_trade = SelfTradePolicy::Reject;
        let (mut engine, ledger) = engine_with(config);
        let user = funded_user(&ledger);

        engine.submit(limit(user, Side::SELL, 100, 1)).unwrap();
        let before = ledger.balance(user, "USDT");
        let err = engine.submit(limit(user, Side::BUY, 100, 1)).unwrap_err();

        assert_eq!(err, EngineError::SelfTrade);
        assert_eq!(ledger.balance(user, "USDT"), before);
        assert!(engine.best_bid().is_none());
    }

    #[test]
    fn test_self_trade_reject_after_fill_cancels_remainder() {
        let mut config = settings();
        config.self_trade = SelfTradePolicy::Reject;
        let (mut engine, ledger) = engine_with(config);
        let user = funded_user(&ledger);
        let other = funded_user(&ledger);

        engine.submit(limit(other, Side::SELL, 99, 1)).unwrap();
        engine.submit(limit(user, Side::SELL, 100, 1)).unwrap();
        let report = engine.submit(limit(user, Side::BUY, 100, 3)).unwrap();

        assert_eq!(report.trades.len(), 1);
        assert_eq!(
            report.order.status,
            OrderStatus::Cancelled(CancelReason::SelfTrade)
        );
        assert_eq!(ledger.balance(user, "USDT").locked, Decimal::ZERO);
    }

    #[test]
    fn test_cancel_flow() {
        let (mut engine, ledger) = engine_with(settings());
        let user = funded_user(&ledger);
        let stranger = funded_user(&ledger);

        let report = engine.submit(limit(user, Side::BUY, 100, 10)).unwrap();
        let id = report.order.order_id;

        assert!(matches!(
            engine.cancel(stranger, id),
            Err(EngineError::NotFound { .. })
        ));

        let cancelled = engine.cancel(user, id).unwrap();
        assert_eq!(
            cancelled.status,
            OrderStatus::Cancelled(CancelReason::UserRequested)
        );
        assert!(engine.best_bid().is_none());
        assert_eq!(ledger.balance(user, "USDT").locked, Decimal::ZERO);

        assert!(matches!(
            engine.cancel(user, id),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_cancel_after_fill_reports_already_filled() {
        let (mut engine, ledger) = engine_with(settings());
        let maker = funded_user(&ledger);
        let taker = funded_user(&ledger);

        let resting = engine.submit(limit(maker, Side::SELL, 100, 1)).unwrap();
        engine.submit(limit(taker, Side::BUY, 100, 1)).unwrap();

        assert!(matches!(
            engine.cancel(maker, resting.order.order_id),
            Err(EngineError::AlreadyFilled { .. })
        ));
    }

    #[test]
    fn test_failed_fill_parks_taker() {
        let (mut engine, ledger, store) = countdown_engine();
        let maker = funded_user(&ledger);
        let taker = funded_user(&ledger);

        engine.submit(limit(maker, Side::SELL, 100, 2)).unwrap();
        engine.submit(limit(maker, Side::SELL, 101, 2)).unwrap();

        // intake and the first fill commit, the second fill cannot
        store.successes_left.store(2, Ordering::SeqCst);
        let report = engine.submit(limit(taker, Side::BUY, 101, 3)).unwrap();

        assert_eq!(report.trades.len(), 1);
        assert!(matches!(
            report.error,
            Some(EngineError::TransientPersistence { attempts: 2, .. })
        ));
        assert_eq!(report.order.status, OrderStatus::Failed);
        assert_eq!(report.order.filled, Quantity::from_u64(2));
        assert_eq!(engine.parked_orders().count(), 1);

        // first fill fully applied, the rest of the reservation stays locked
        let usdt = ledger.balance(taker, "USDT");
        assert_eq!(usdt.locked, Decimal::from(101));
        assert_eq!(ledger.balance(taker, "BTC").available, Decimal::from(102));
        assert_eq!(engine.best_ask(), Some((Price::from_u64(101), Quantity::from_u64(2))));
        assert!(engine.best_bid().is_none());
    }

    #[test]
    fn test_failed_intake_commit_changes_nothing() {
        let (mut engine, ledger, store) = countdown_engine();
        let taker = funded_user(&ledger);

        store.successes_left.store(0, Ordering::SeqCst);
        let err = engine.submit(limit(taker, Side::BUY, 100, 3)).unwrap_err();

        assert!(matches!(
            err,
            EngineError::TransientPersistence { attempts: 2, .. }
        ));
        assert_eq!(ledger.balance(taker, "USDT").locked, Decimal::ZERO);
        assert!(engine.best_bid().is_none());
        assert!(store.inner.is_empty());
    }

    #[test]
    fn test_events_in_commit_order() {
        let (mut engine, ledger) = engine_with(settings());
        let maker = funded_user(&ledger);
        let taker = funded_user(&ledger);

        engine.submit(limit(maker, Side::SELL, 100, 1)).unwrap();
        engine.drain_events();
        engine.submit(limit(taker, Side::BUY, 100, 1)).unwrap();

        let names: Vec<&str> = engine.drain_events().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["order_accepted", "trade_executed", "book_delta", "ticker"]
        );
        let view = engine.market_view();
        assert_eq!(view.last_trade_sequence, 1);
        assert_eq!(view.ticker.last, Some(Price::from_u64(100)));
    }
}
