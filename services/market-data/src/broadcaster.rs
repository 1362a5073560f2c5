//! Market data broadcaster
//!
//! Activation is reference counted per symbol: the first subscription on a
//! symbol spawns its polling task, removing the last one aborts the task
//! before `unsubscribe` returns. The task recomputes every subscribed stream
//! each `poll_interval_ms` through the [`MarketDataSource`] and pushes a value
//! only when it differs from the last one sent.
//!
//! A new subscription is primed through the symbol's own task, so pushes of
//! one stream are never reordered. Delivery uses each connection's bounded
//! queue with `try_send`; a slow consumer loses pushes, it never stalls the
//! task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use types::ids::MarketId;
use uuid::Uuid;

use crate::protocol::{MarketDataPush, StreamSpec};
use crate::source::{MarketDataSource, SourceError};

pub type ConnectionId = Uuid;

/// Bounded queue towards one connection
pub type Outbound = mpsc::Sender<MarketDataPush>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    pub poll_interval_ms: u64,
    pub fetch_timeout_ms: u64,
    /// Skip pushes whose value equals the previous one
    pub broadcast_on_change_only: bool,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            fetch_timeout_ms: 1000,
            broadcast_on_change_only: true,
        }
    }
}

#[derive(Default)]
struct StreamState {
    subscribers: HashMap<ConnectionId, Outbound>,
    last: Option<Value>,
}

type Streams = Arc<Mutex<HashMap<StreamSpec, StreamState>>>;

fn lock(streams: &Streams) -> MutexGuard<'_, HashMap<StreamSpec, StreamState>> {
    streams.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Immediate push for one new subscriber
struct Prime {
    stream: StreamSpec,
    connection: ConnectionId,
}

struct SymbolTask {
    streams: Streams,
    primes: mpsc::UnboundedSender<Prime>,
    handle: JoinHandle<()>,
}

impl SymbolTask {
    fn subscriptions(&self) -> usize {
        lock(&self.streams).values().map(|s| s.subscribers.len()).sum()
    }
}

pub struct Broadcaster {
    config: BroadcasterConfig,
    source: Arc<dyn MarketDataSource>,
    symbols: Mutex<HashMap<MarketId, SymbolTask>>,
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig, source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            config,
            source,
            symbols: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscription; returns false if it already existed
    ///
    /// Must be called inside a tokio runtime.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        symbol: &MarketId,
        stream: StreamSpec,
        outbound: Outbound,
    ) -> bool {
        let mut symbols = self.symbols();
        let task = symbols
            .entry(symbol.clone())
            .or_insert_with(|| self.spawn_symbol(symbol.clone()));

        let inserted = lock(&task.streams)
            .entry(stream.clone())
            .or_default()
            .subscribers
            .insert(connection, outbound)
            .is_none();
        if inserted {
            debug!(%connection, %symbol, stream = %stream.name(), "subscribed");
            if task.primes.send(Prime { stream, connection }).is_err() {
                warn!(%symbol, "symbol task gone, subscription not primed");
            }
        }
        inserted
    }

    /// Remove a subscription; the symbol's task stops with its last one
    pub fn unsubscribe(&self, connection: ConnectionId, symbol: &MarketId, stream: &StreamSpec) -> bool {
        let mut symbols = self.symbols();
        let Some(task) = symbols.get(symbol) else {
            return false;
        };

        let removed = {
            let mut streams = lock(&task.streams);
            let removed = streams
                .get_mut(stream)
                .is_some_and(|state| state.subscribers.remove(&connection).is_some());
            if streams.get(stream).is_some_and(|state| state.subscribers.is_empty()) {
                streams.remove(stream);
            }
            removed
        };
        if removed {
            debug!(%connection, %symbol, stream = %stream.name(), "unsubscribed");
        }

        if task.subscriptions() == 0 {
            Self::deactivate(&mut symbols, symbol);
        }
        removed
    }

    /// Drop every subscription of a connection; returns how many went
    pub fn unsubscribe_all(&self, connection: ConnectionId) -> usize {
        let mut symbols = self.symbols();
        let mut removed = 0;
        let mut idle = Vec::new();

        for (symbol, task) in symbols.iter() {
            let mut streams = lock(&task.streams);
            for state in streams.values_mut() {
                if state.subscribers.remove(&connection).is_some() {
                    removed += 1;
                }
            }
            streams.retain(|_, state| !state.subscribers.is_empty());
            if streams.is_empty() {
                idle.push(symbol.clone());
            }
        }
        for symbol in idle {
            Self::deactivate(&mut symbols, &symbol);
        }
        removed
    }

    /// Symbols with a running task
    pub fn active_symbols(&self) -> Vec<MarketId> {
        let mut active: Vec<MarketId> = self.symbols().keys().cloned().collect();
        active.sort();
        active
    }

    pub fn subscriber_count(&self, symbol: &MarketId) -> usize {
        self.symbols()
            .get(symbol)
            .map(SymbolTask::subscriptions)
            .unwrap_or(0)
    }

    fn symbols(&self) -> MutexGuard<'_, HashMap<MarketId, SymbolTask>> {
        self.symbols.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deactivate(symbols: &mut HashMap<MarketId, SymbolTask>, symbol: &MarketId) {
        if let Some(task) = symbols.remove(symbol) {
            task.handle.abort();
            info!(%symbol, "symbol broadcast stopped");
        }
    }

    fn spawn_symbol(&self, symbol: MarketId) -> SymbolTask {
        let streams: Streams = Arc::new(Mutex::new(HashMap::new()));
        let (primes_tx, primes_rx) = mpsc::unbounded_channel();
        let worker = SymbolWorker {
            symbol: symbol.clone(),
            streams: Arc::clone(&streams),
            source: Arc::clone(&self.source),
            config: self.config.clone(),
        };
        let handle = tokio::spawn(worker.run(primes_rx));
        info!(%symbol, "symbol broadcast started");
        SymbolTask {
            streams,
            primes: primes_tx,
            handle,
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        for (_, task) in self.symbols().drain() {
            task.handle.abort();
        }
    }
}

struct SymbolWorker {
    symbol: MarketId,
    streams: Streams,
    source: Arc<dyn MarketDataSource>,
    config: BroadcasterConfig,
}

impl SymbolWorker {
    async fn run(self, mut primes: mpsc::UnboundedReceiver<Prime>) {
        let period = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                prime = primes.recv() => match prime {
                    Some(prime) => self.prime(prime).await,
                    None => break,
                },
                _ = poll.tick() => self.poll_all().await,
            }
        }
    }

    /// Fetch for a new subscriber and push to it right away
    async fn prime(&self, prime: Prime) {
        let value = match self.fetch(&prime.stream).await {
            Ok(value) => value,
            Err(err) => {
                warn!(symbol = %self.symbol, stream = %prime.stream.name(), error = %err, "prime fetch failed");
                return;
            }
        };

        let mut streams = lock(&self.streams);
        let Some(state) = streams.get_mut(&prime.stream) else {
            return;
        };
        if state.last.as_ref() != Some(&value) {
            // a change: everyone gets it
            deliver(&self.symbol, &prime.stream, state.subscribers.iter(), &value);
            state.last = Some(value);
        } else if let Some(outbound) = state.subscribers.get(&prime.connection) {
            deliver(
                &self.symbol,
                &prime.stream,
                std::iter::once((&prime.connection, outbound)),
                &value,
            );
        }
    }

    async fn poll_all(&self) {
        let specs: Vec<StreamSpec> = lock(&self.streams).keys().cloned().collect();
        for spec in specs {
            let value = match self.fetch(&spec).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(symbol = %self.symbol, stream = %spec.name(), error = %err, "fetch failed");
                    continue;
                }
            };

            let mut streams = lock(&self.streams);
            let Some(state) = streams.get_mut(&spec) else {
                continue;
            };
            if self.config.broadcast_on_change_only && state.last.as_ref() == Some(&value) {
                continue;
            }
            deliver(&self.symbol, &spec, state.subscribers.iter(), &value);
            state.last = Some(value);
        }
    }

    async fn fetch(&self, stream: &StreamSpec) -> Result<Value, SourceError> {
        let timeout = Duration::from_millis(self.config.fetch_timeout_ms);
        tokio::time::timeout(timeout, self.source.fetch(&self.symbol, stream))
            .await
            .map_err(|_| SourceError::Timeout(self.config.fetch_timeout_ms))?
    }
}

fn deliver<'a>(
    symbol: &MarketId,
    stream: &StreamSpec,
    subscribers: impl Iterator<Item = (&'a ConnectionId, &'a Outbound)>,
    value: &Value,
) {
    let push = MarketDataPush::new(symbol.clone(), stream, value.clone());
    for (connection, outbound) in subscribers {
        match outbound.try_send(push.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%connection, %symbol, stream = %push.stream, "outbound queue full, push dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%connection, %symbol, "outbound queue closed");
            }
        }
    }
}
