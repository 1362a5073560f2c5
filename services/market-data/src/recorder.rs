//! Trade/tick recorder
//!
//! Consumes the engines' lossless trade feed, appends each trade to a
//! durable trade log and rolls it into the public tape and OHLCV candles.
//! Every step is idempotent by trade id, so a trade delivered twice changes
//! nothing.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use types::ids::{MarketId, TradeId};
use types::trade::Trade;

use crate::candles::{Candle, Interval, SymbolCandles};
use crate::trades::{PublicTrade, TradeBuffer};

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Trade log unavailable: {0}")]
    Unavailable(String),
}

/// Append-only store of executed trades
pub trait TradeLog: Send + Sync {
    /// Append `trade`; returns false when its id is already in the log
    fn append(&self, trade: &Trade) -> Result<bool, RecorderError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct MemoryLogInner {
    trades: Vec<Trade>,
    ids: HashSet<TradeId>,
}

/// In-process trade log
#[derive(Debug, Default)]
pub struct MemoryTradeLog {
    inner: Mutex<MemoryLogInner>,
}

impl MemoryTradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.inner
            .lock()
            .map(|inner| inner.trades.clone())
            .unwrap_or_default()
    }
}

impl TradeLog for MemoryTradeLog {
    fn append(&self, trade: &Trade) -> Result<bool, RecorderError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| RecorderError::Unavailable("memory log poisoned".to_string()))?;
        if !inner.ids.insert(trade.trade_id) {
            return Ok(false);
        }
        inner.trades.push(trade.clone());
        Ok(true)
    }

    fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.trades.len()).unwrap_or(0)
    }
}

#[derive(Debug)]
struct FileLogInner {
    writer: BufWriter<File>,
    ids: HashSet<TradeId>,
}

/// JSON-lines trade log, one trade per line
#[derive(Debug)]
pub struct FileTradeLog {
    path: PathBuf,
    inner: Mutex<FileLogInner>,
}

impl FileTradeLog {
    /// Open (or create) the log, loading the ids it already holds
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let ids = if path.exists() {
            Self::read_all(&path)?.into_iter().map(|t| t.trade_id).collect()
        } else {
            HashSet::new()
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), trades = ids.len(), "trade log opened");
        Ok(Self {
            path,
            inner: Mutex::new(FileLogInner {
                writer: BufWriter::new(file),
                ids,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Trade>, RecorderError> {
        let reader = BufReader::new(File::open(path)?);
        let mut trades = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            trades.push(serde_json::from_str(&line)?);
        }
        Ok(trades)
    }
}

impl TradeLog for FileTradeLog {
    fn append(&self, trade: &Trade) -> Result<bool, RecorderError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| RecorderError::Unavailable("trade log writer poisoned".to_string()))?;
        if inner.ids.contains(&trade.trade_id) {
            return Ok(false);
        }
        let mut line = serde_json::to_string(trade)?;
        line.push('\n');
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.flush()?;
        inner.ids.insert(trade.trade_id);
        Ok(true)
    }

    fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.ids.len()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub intervals: Vec<Interval>,
    /// Sealed candles kept per interval
    pub candle_history: usize,
    /// Public trades kept per symbol
    pub trade_history: usize,
    /// File trade log; in-memory when unset
    pub trade_log_path: Option<PathBuf>,
    pub close_check_ms: u64,
    /// Trades buffered between the engines and the recorder
    pub feed_buffer: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            intervals: Interval::all().to_vec(),
            candle_history: 500,
            trade_history: 200,
            trade_log_path: None,
            close_check_ms: 1000,
            feed_buffer: 1024,
        }
    }
}

#[derive(Debug)]
struct SymbolTape {
    trades: TradeBuffer,
    candles: SymbolCandles,
}

/// Trade tape and candle aggregation for every symbol
pub struct TradeRecorder {
    config: RecorderConfig,
    log: Arc<dyn TradeLog>,
    tapes: DashMap<MarketId, SymbolTape>,
}

impl TradeRecorder {
    pub fn new(config: RecorderConfig, log: Arc<dyn TradeLog>) -> Self {
        Self {
            config,
            log,
            tapes: DashMap::new(),
        }
    }

    /// Build the recorder with the log `config` asks for
    pub fn from_config(config: RecorderConfig) -> Result<Self, RecorderError> {
        let log: Arc<dyn TradeLog> = match &config.trade_log_path {
            Some(path) => Arc::new(FileTradeLog::open(path)?),
            None => Arc::new(MemoryTradeLog::new()),
        };
        Ok(Self::new(config, log))
    }

    /// Append to the trade log and the public tape
    pub fn record(&self, trade: &Trade) -> Result<bool, RecorderError> {
        if !self.log.append(trade)? {
            debug!(trade_id = %trade.trade_id, "duplicate trade skipped");
            return Ok(false);
        }
        self.tape(&trade.symbol).trades.push(trade);
        Ok(true)
    }

    /// Fold the trade into every configured interval
    ///
    /// Returns the candles it sealed.
    pub fn rollup_candle(&self, trade: &Trade) -> Vec<Candle> {
        self.tape(&trade.symbol).candles.rollup(trade)
    }

    /// `record` then `rollup_candle`
    pub fn ingest(&self, trade: &Trade) -> Result<Vec<Candle>, RecorderError> {
        self.record(trade)?;
        Ok(self.rollup_candle(trade))
    }

    /// Seal every bucket whose end time has passed
    pub fn close_expired(&self, now: i64) -> Vec<Candle> {
        self.tapes
            .iter_mut()
            .flat_map(|mut tape| tape.candles.close_expired(now))
            .collect()
    }

    /// Newest first
    pub fn recent_trades(&self, symbol: &MarketId, limit: usize) -> Vec<PublicTrade> {
        self.tapes
            .get(symbol)
            .map(|tape| tape.trades.recent(limit))
            .unwrap_or_default()
    }

    /// Oldest first, the open bucket last
    pub fn candles(&self, symbol: &MarketId, interval: Interval, limit: usize) -> Vec<Candle> {
        self.tapes
            .get(symbol)
            .map(|tape| tape.candles.recent(interval, limit))
            .unwrap_or_default()
    }

    pub fn logged_trades(&self) -> usize {
        self.log.len()
    }

    pub fn feed_buffer(&self) -> usize {
        self.config.feed_buffer
    }

    /// Drain the trade feed until every sender is gone
    pub fn spawn(self: Arc<Self>, mut trades: mpsc::Receiver<Trade>) -> JoinHandle<()> {
        let period = Duration::from_millis(self.config.close_check_ms.max(1));
        tokio::spawn(async move {
            let mut close_timer = tokio::time::interval(period);
            close_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("trade recorder started");
            loop {
                tokio::select! {
                    trade = trades.recv() => match trade {
                        Some(trade) => {
                            if let Err(err) = self.ingest(&trade) {
                                error!(trade_id = %trade.trade_id, error = %err, "failed to record trade");
                            }
                        }
                        None => break,
                    },
                    _ = close_timer.tick() => {
                        let sealed = self.close_expired(types::unix_nanos());
                        if !sealed.is_empty() {
                            debug!(count = sealed.len(), "candles sealed");
                        }
                    }
                }
            }
            info!("trade recorder stopped");
        })
    }

    fn tape(&self, symbol: &MarketId) -> dashmap::mapref::one::RefMut<'_, MarketId, SymbolTape> {
        self.tapes.entry(symbol.clone()).or_insert_with(|| SymbolTape {
            trades: TradeBuffer::new(symbol.clone(), self.config.trade_history),
            candles: SymbolCandles::new(
                symbol.clone(),
                &self.config.intervals,
                self.config.candle_history,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::ids::{OrderId, UserId};
    use types::numeric::{Price, Quantity};
    use types::order::Side;

    fn trade(sequence: u64, price: u64, at: i64) -> Trade {
        Trade {
            trade_id: TradeId::new(),
            sequence,
            symbol: MarketId::new("BTC/USDT"),
            taker_order_id: OrderId::new(),
            maker_order_id: OrderId::new(),
            taker_user_id: UserId::new(),
            maker_user_id: UserId::new(),
            taker_side: Side::BUY,
            price: Price::from_u64(price),
            quantity: Quantity::from_u64(1),
            taker_fee: Decimal::ZERO,
            taker_fee_currency: "USDT".to_string(),
            maker_fee: Decimal::ZERO,
            maker_fee_currency: "USDT".to_string(),
            executed_at: at,
        }
    }

    #[test]
    fn test_ingest_twice_counts_once() {
        let recorder = TradeRecorder::from_config(RecorderConfig::default()).unwrap();
        let t = trade(1, 100, 0);
        recorder.ingest(&t).unwrap();
        recorder.ingest(&t).unwrap();

        let symbol = MarketId::new("BTC/USDT");
        assert_eq!(recorder.logged_trades(), 1);
        assert_eq!(recorder.recent_trades(&symbol, 10).len(), 1);
        for &interval in Interval::all() {
            let candles = recorder.candles(&symbol, interval, 10);
            assert_eq!(candles.len(), 1);
            assert_eq!(candles[0].trade_count, 1);
        }
    }

    #[test]
    fn test_file_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.jsonl");
        let t = trade(1, 100, 0);

        let log = FileTradeLog::open(&path).unwrap();
        assert!(log.append(&t).unwrap());
        assert!(log.append(&trade(2, 101, 1)).unwrap());
        drop(log);

        let reopened = FileTradeLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(!reopened.append(&t).unwrap());

        let stored = FileTradeLog::read_all(&path).unwrap();
        assert_eq!(stored[0], t);
    }

    #[tokio::test]
    async fn test_consumer_records_fed_trades() {
        let recorder = Arc::new(TradeRecorder::from_config(RecorderConfig::default()).unwrap());
        let (tx, rx) = mpsc::channel(16);
        let task = Arc::clone(&recorder).spawn(rx);

        tx.send(trade(1, 100, 0)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(recorder.logged_trades(), 1);
    }
}
