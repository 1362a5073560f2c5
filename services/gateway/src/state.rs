use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_data::{Broadcaster, ExchangeFeed, MarketDataSource, SessionManager, TradeRecorder};
use matching_engine::{
    BalanceLedger, EngineRegistry, EngineStore, JournalStore, MemoryStore, RecoveredState, TracingHook,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::GatewayConfig;

/// Everything the handlers reach, wired once at startup
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EngineRegistry>,
    pub ledger: Arc<BalanceLedger>,
    pub recorder: Arc<TradeRecorder>,
    pub broadcaster: Arc<Broadcaster>,
    pub sessions: Arc<SessionManager>,
    background: Arc<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Start engines, recorder and broadcaster from configuration
    ///
    /// With a journal configured, balances and resting orders are rebuilt
    /// from it before any engine starts; seed balances only apply to an
    /// empty journal.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(config: &GatewayConfig) -> anyhow::Result<Self> {
        let (store, recovered): (Arc<dyn EngineStore>, RecoveredState) = match &config.journal_path {
            Some(path) => {
                let store = JournalStore::open(path)
                    .with_context(|| format!("opening journal {}", path.display()))?;
                let recovered = RecoveredState::load(path)
                    .with_context(|| format!("replaying journal {}", path.display()))?;
                (Arc::new(store), recovered)
            }
            None => (Arc::new(MemoryStore::new()), RecoveredState::default()),
        };

        let ledger = Arc::new(BalanceLedger::journaled(
            Arc::clone(&store),
            config.engine.retry.clone(),
        ));
        ledger.restore(recovered.balances());
        let registry = Arc::new(EngineRegistry::new(
            config.engine.clone(),
            Arc::clone(&ledger),
            store,
            Arc::new(TracingHook),
        ));

        let recorder = Arc::new(
            TradeRecorder::from_config(config.recorder.clone()).context("opening trade log")?,
        );
        let trade_feed = registry.subscribe_trades(recorder.feed_buffer());

        for symbol in &config.symbols {
            registry
                .restore_symbol(symbol.clone(), &recovered)
                .with_context(|| format!("starting engine for {}", symbol.symbol))?;
        }
        if recovered.is_empty() {
            for seed in &config.seed_balances {
                ledger
                    .deposit(seed.user_id, &seed.currency, seed.amount)
                    .with_context(|| format!("seeding {} for {}", seed.currency, seed.user_id))?;
            }
        } else {
            tracing::info!(batches = recovered.batches(), "state recovered from journal, seeding skipped");
        }

        let recording = Arc::clone(&recorder).spawn(trade_feed);

        let source: Arc<dyn MarketDataSource> = Arc::new(ExchangeFeed::new(
            Arc::clone(&registry),
            Arc::clone(&recorder),
        ));
        let broadcaster = Arc::new(Broadcaster::new(
            config.broadcaster.clone(),
            Arc::clone(&source),
        ));
        let sessions = Arc::new(SessionManager::new(
            config.session.clone(),
            Arc::clone(&broadcaster),
            source,
        ));

        let refresh = spawn_refresh(
            Arc::clone(&registry),
            Duration::from_millis(config.refresh_interval_ms().max(1)),
        );

        tracing::info!(
            symbols = config.symbols.len(),
            seeded = config.seed_balances.len(),
            "application state ready"
        );
        Ok(Self {
            registry,
            ledger,
            recorder,
            broadcaster,
            sessions,
            background: Arc::new(vec![recording, refresh]),
        })
    }

    /// Drain and stop every engine worker, then the background tasks
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        for task in self.background.iter() {
            task.abort();
        }
    }
}

/// Periodically let engines re-evaluate time-dependent state
fn spawn_refresh(registry: Arc<EngineRegistry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            registry.refresh_all();
        }
    })
}
