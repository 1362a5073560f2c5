//! Per-symbol engine registry
//!
//! Each symbol's `SymbolEngine` runs on its own named OS thread and is fed
//! through a bounded command queue; callers await one-shot replies. After
//! every command the worker forwards the engine's events (hook first, then
//! the broadcast channel) and publishes a fresh `MarketView` on a watch
//! channel, so readers never touch the live book.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use types::errors::{EngineError, ValidationError};
use types::ids::{MarketId, OrderId, UserId};
use types::order::{NewOrder, Order};
use types::symbol::SymbolConfig;
use types::trade::Trade;

use crate::config::EngineConfig;
use crate::engine::{MarketView, OrderReport, SymbolEngine};
use crate::events::{EngineEvent, EventHook};
use crate::ledger::BalanceLedger;
use crate::recovery::RecoveredState;
use crate::store::EngineStore;

enum Command {
    Submit {
        request: NewOrder,
        reply: oneshot::Sender<Result<OrderReport, EngineError>>,
    },
    Cancel {
        user_id: UserId,
        order_id: OrderId,
        reply: oneshot::Sender<Result<Order, EngineError>>,
    },
    Refresh,
    Shutdown,
}

/// Cloneable handle to one symbol's worker
#[derive(Clone)]
pub struct EngineHandle {
    config: Arc<SymbolConfig>,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<Arc<MarketView>>,
}

impl EngineHandle {
    pub fn symbol(&self) -> &MarketId {
        &self.config.symbol
    }

    pub fn config(&self) -> &SymbolConfig {
        &self.config
    }

    pub async fn submit(&self, request: NewOrder) -> Result<OrderReport, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { request, reply }).await?;
        rx.await.map_err(|_| self.unavailable())?
    }

    pub async fn cancel(&self, user_id: UserId, order_id: OrderId) -> Result<Order, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel {
            user_id,
            order_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Ask the worker to re-evaluate time-dependent state; dropped if busy
    pub fn refresh(&self) {
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.commands.try_send(Command::Refresh) {
            debug!(symbol = %self.symbol(), "refresh sent to stopped engine");
        }
    }

    /// Latest published market view
    pub fn view(&self) -> Arc<MarketView> {
        self.view.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<Arc<MarketView>> {
        self.view.clone()
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> EngineError {
        EngineError::EngineUnavailable(self.config.symbol.to_string())
    }
}

/// Registry of running symbol engines
pub struct EngineRegistry {
    settings: EngineConfig,
    ledger: Arc<BalanceLedger>,
    store: Arc<dyn EngineStore>,
    hook: Arc<dyn EventHook>,
    events: broadcast::Sender<EngineEvent>,
    engines: DashMap<String, EngineHandle>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    trade_sinks: Mutex<Vec<mpsc::Sender<Trade>>>,
}

impl EngineRegistry {
    pub fn new(
        settings: EngineConfig,
        ledger: Arc<BalanceLedger>,
        store: Arc<dyn EngineStore>,
        hook: Arc<dyn EventHook>,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        Self {
            settings,
            ledger,
            store,
            hook,
            events,
            engines: DashMap::new(),
            workers: Mutex::new(Vec::new()),
            trade_sinks: Mutex::new(Vec::new()),
        }
    }

    /// Lossless feed of every committed trade
    ///
    /// Unlike the event broadcast this never drops: a worker blocks while the
    /// feed is full. Only workers started after the call feed it.
    pub fn subscribe_trades(&self, capacity: usize) -> mpsc::Receiver<Trade> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        if let Ok(mut sinks) = self.trade_sinks.lock() {
            sinks.push(tx);
        }
        rx
    }

    /// Spawn the worker for a symbol
    pub fn start_symbol(&self, config: SymbolConfig) -> Result<EngineHandle, EngineError> {
        self.launch(config, None)
    }

    /// Spawn the worker for a symbol on top of journal-recovered state
    pub fn restore_symbol(
        &self,
        config: SymbolConfig,
        recovered: &RecoveredState,
    ) -> Result<EngineHandle, EngineError> {
        self.launch(config, Some(recovered))
    }

    fn launch(
        &self,
        config: SymbolConfig,
        recovered: Option<&RecoveredState>,
    ) -> Result<EngineHandle, EngineError> {
        let key = config.symbol.to_string();
        if self.engines.contains_key(&key) {
            return Err(ValidationError::InvalidSymbolConfig(format!("{key} already running")).into());
        }

        let mut engine = SymbolEngine::new(
            config.clone(),
            self.settings.clone(),
            Arc::clone(&self.ledger),
            Arc::clone(&self.store),
        )?;
        if let Some(recovered) = recovered {
            engine.restore(recovered)?;
        }
        let (commands_tx, commands_rx) = mpsc::channel(self.settings.command_buffer.max(1));
        let (view_tx, view_rx) = watch::channel(Arc::new(engine.market_view()));

        let worker = Worker {
            engine,
            commands: commands_rx,
            view: view_tx,
            events: self.events.clone(),
            trade_sinks: self
                .trade_sinks
                .lock()
                .map(|sinks| sinks.clone())
                .unwrap_or_default(),
            hook: Arc::clone(&self.hook),
        };
        let thread = thread::Builder::new()
            .name(format!("engine-{}", key.replace('/', "-")))
            .spawn(move || worker.run())
            .map_err(|err| EngineError::EngineUnavailable(format!("{key}: {err}")))?;

        if let Ok(mut workers) = self.workers.lock() {
            workers.push(thread);
        }

        let handle = EngineHandle {
            config: Arc::new(config),
            commands: commands_tx,
            view: view_rx,
        };
        self.engines.insert(key.clone(), handle.clone());
        info!(symbol = %key, "engine started");
        Ok(handle)
    }

    pub fn get(&self, symbol: &str) -> Result<EngineHandle, EngineError> {
        self.engines
            .get(symbol)
            .map(|h| h.value().clone())
            .ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))
    }

    pub fn symbol_config(&self, symbol: &str) -> Option<SymbolConfig> {
        self.engines.get(symbol).map(|h| h.config().clone())
    }

    /// Configured symbols, sorted
    pub fn symbols(&self) -> Vec<SymbolConfig> {
        let mut symbols: Vec<SymbolConfig> =
            self.engines.iter().map(|h| h.config().clone()).collect();
        symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        symbols
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &Arc<BalanceLedger> {
        &self.ledger
    }

    pub fn refresh_all(&self) {
        for handle in self.engines.iter() {
            handle.refresh();
        }
    }

    /// Stop every worker and wait for them to exit
    pub async fn shutdown(&self) {
        let handles: Vec<EngineHandle> = self.engines.iter().map(|h| h.value().clone()).collect();
        self.engines.clear();
        if let Ok(mut sinks) = self.trade_sinks.lock() {
            sinks.clear();
        }
        for handle in handles {
            if handle.commands.send(Command::Shutdown).await.is_err() {
                warn!(symbol = %handle.symbol(), "engine already stopped");
            }
        }

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        let joined = tokio::task::spawn_blocking(move || {
            for worker in workers {
                if worker.join().is_err() {
                    error!("engine worker panicked");
                }
            }
        })
        .await;
        if joined.is_err() {
            error!("failed to join engine workers");
        }
        info!("all engines stopped");
    }
}

struct Worker {
    engine: SymbolEngine,
    commands: mpsc::Receiver<Command>,
    view: watch::Sender<Arc<MarketView>>,
    events: broadcast::Sender<EngineEvent>,
    trade_sinks: Vec<mpsc::Sender<Trade>>,
    hook: Arc<dyn EventHook>,
}

impl Worker {
    fn run(mut self) {
        let symbol = self.engine.symbol().clone();
        debug!(%symbol, "engine worker running");

        while let Some(command) = self.commands.blocking_recv() {
            match command {
                Command::Submit { request, reply } => {
                    let result = self.engine.submit(request);
                    self.publish();
                    let _ = reply.send(result);
                }
                Command::Cancel {
                    user_id,
                    order_id,
                    reply,
                } => {
                    let result = self.engine.cancel(user_id, order_id);
                    self.publish();
                    let _ = reply.send(result);
                }
                Command::Refresh => {
                    self.engine.refresh();
                    self.publish();
                }
                Command::Shutdown => break,
            }
        }
        debug!(%symbol, "engine worker exiting");
    }

    fn publish(&mut self) {
        let events = self.engine.drain_events();
        if events.is_empty() {
            return;
        }
        for event in events {
            self.hook.on_event(&event);
            if let EngineEvent::TradeExecuted { trade } = &event {
                self.feed_trade(trade);
            }
            // no subscribers is fine
            let _ = self.events.send(event);
        }

        let view = self.engine.market_view();
        self.view.send_if_modified(|current| {
            if **current == view {
                false
            } else {
                *current = Arc::new(view);
                true
            }
        });
    }

    fn feed_trade(&mut self, trade: &Trade) {
        self.trade_sinks.retain(|sink| match sink.blocking_send(trade.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!(symbol = %trade.symbol, "trade feed closed, detaching");
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopHook;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;
    use types::numeric::{Price, Quantity};
    use types::order::{OrderType, Side};

    fn symbol_config() -> SymbolConfig {
        SymbolConfig {
            symbol: MarketId::new("ETH/USDT"),
            enabled: true,
            price_tick: Decimal::new(1, 2),
            amount_step: Decimal::new(1, 3),
            min_amount: Decimal::new(1, 3),
            max_amount: Decimal::from(10_000),
            min_price: Decimal::new(1, 2),
            max_price: Decimal::from(1_000_000),
        }
    }

    fn registry() -> EngineRegistry {
        EngineRegistry::new(
            EngineConfig::default(),
            Arc::new(BalanceLedger::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(NoopHook),
        )
    }

    fn order(user: UserId, side: Side, price: &str, amount: &str) -> NewOrder {
        NewOrder {
            user_id: user,
            symbol: MarketId::new("ETH/USDT"),
            side,
            order_type: OrderType::LIMIT,
            amount: Quantity::from_str(amount).unwrap(),
            price: Some(Price::from_str(price).unwrap()),
            fee: Decimal::ZERO,
            fee_currency: "USDT".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_through_worker() {
        let registry = registry();
        let handle = registry.start_symbol(symbol_config()).unwrap();
        let mut events = registry.subscribe_events();
        let mut view = handle.watch_view();

        let user = UserId::new();
        registry
            .ledger()
            .deposit(user, "USDT", Decimal::from(10_000))
            .unwrap();

        let report = handle
            .submit(order(user, Side::BUY, "2500.50", "1.5"))
            .await
            .unwrap();
        assert!(report.error.is_none());

        let first = events.recv().await.unwrap();
        assert_eq!(first.name(), "order_accepted");

        view.changed().await.unwrap();
        let current = handle.view();
        assert_eq!(current.book.bids.len(), 1);
        assert_eq!(current.book.bids[0].price, Price::from_str("2500.50").unwrap());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_symbol_and_duplicate_start() {
        let registry = registry();
        assert!(matches!(
            registry.get("DOGE/USDT"),
            Err(EngineError::UnknownSymbol(_))
        ));

        registry.start_symbol(symbol_config()).unwrap();
        assert!(registry.start_symbol(symbol_config()).is_err());
        assert_eq!(registry.symbols().len(), 1);
        assert!(registry.symbol_config("ETH/USDT").is_some());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_handle_after_shutdown_is_unavailable() {
        let registry = registry();
        let handle = registry.start_symbol(symbol_config()).unwrap();
        registry.shutdown().await;

        let err = handle
            .cancel(UserId::new(), OrderId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EngineUnavailable(_)));
    }
}
