//! OHLCV Candle Builder
//!
//! Rolls executed trades into candles for several intervals at once.
//! Buckets are aligned to the epoch (1m candles open on minute boundaries).
//! A bucket is sealed, and never touched again, once its end time passes
//! or a trade for a later bucket arrives.
//!
//! Rollup is idempotent by trade id: replaying a trade into its open bucket
//! is a no-op, and a trade for an already sealed bucket is ignored.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use types::ids::{MarketId, TradeId};
use types::trade::Trade;

const NANOS_PER_MINUTE: i64 = 60 * 1_000_000_000;

/// Supported candle intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown candle interval: {0}")]
pub struct UnknownInterval(pub String);

impl Interval {
    pub fn duration_nanos(&self) -> i64 {
        match self {
            Interval::M1 => NANOS_PER_MINUTE,
            Interval::M5 => 5 * NANOS_PER_MINUTE,
            Interval::M15 => 15 * NANOS_PER_MINUTE,
            Interval::H1 => 60 * NANOS_PER_MINUTE,
            Interval::H4 => 240 * NANOS_PER_MINUTE,
            Interval::D1 => 1440 * NANOS_PER_MINUTE,
        }
    }

    pub fn all() -> &'static [Interval] {
        &[
            Interval::M1,
            Interval::M5,
            Interval::M15,
            Interval::H1,
            Interval::H4,
            Interval::D1,
        ]
    }

    /// Start of the bucket containing `timestamp_nanos`
    pub fn bucket_start(&self, timestamp_nanos: i64) -> i64 {
        timestamp_nanos.div_euclid(self.duration_nanos()) * self.duration_nanos()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::all()
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| UnknownInterval(s.to_string()))
    }
}

/// One OHLCV bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: MarketId,
    pub interval: Interval,
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
    pub closed: bool,
}

impl Candle {
    /// Open a bucket with its first trade; `open` is set only here
    fn open_with(trade: &Trade, interval: Interval, open_time: i64) -> Self {
        let price = trade.price.as_decimal();
        Self {
            symbol: trade.symbol.clone(),
            interval,
            open_time,
            close_time: open_time + interval.duration_nanos() - 1,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: trade.quantity.as_decimal(),
            trade_count: 1,
            closed: false,
        }
    }

    fn apply(&mut self, trade: &Trade) {
        let price = trade.price.as_decimal();
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += trade.quantity.as_decimal();
        self.trade_count += 1;
    }

    /// OHLC ordering holds and volume is non-negative
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= Decimal::ZERO
            && self.close_time > self.open_time
    }
}

/// Candles of one symbol for one interval
#[derive(Debug)]
pub struct CandleSeries {
    interval: Interval,
    current: Option<Candle>,
    /// Trades already folded into `current`
    current_trades: HashSet<TradeId>,
    /// Sealed candles, oldest first
    sealed: VecDeque<Candle>,
    max_history: usize,
}

impl CandleSeries {
    pub fn new(interval: Interval, max_history: usize) -> Self {
        Self {
            interval,
            current: None,
            current_trades: HashSet::new(),
            sealed: VecDeque::new(),
            max_history,
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Fold a trade into its bucket
    ///
    /// Returns the candle this trade sealed, if it opened a later bucket.
    pub fn rollup(&mut self, trade: &Trade) -> Option<Candle> {
        let bucket = self.interval.bucket_start(trade.executed_at);

        if self.last_sealed_start().is_some_and(|sealed| bucket <= sealed) {
            debug!(
                trade_id = %trade.trade_id,
                interval = %self.interval,
                "trade for sealed bucket ignored"
            );
            return None;
        }

        match self.current.as_mut() {
            Some(candle) if candle.open_time == bucket => {
                if self.current_trades.insert(trade.trade_id) {
                    candle.apply(trade);
                }
                None
            }
            Some(candle) if bucket < candle.open_time => {
                debug!(trade_id = %trade.trade_id, "trade older than open bucket ignored");
                None
            }
            _ => {
                let sealed = self.seal_current();
                self.current = Some(Candle::open_with(trade, self.interval, bucket));
                self.current_trades.insert(trade.trade_id);
                sealed
            }
        }
    }

    /// Seal the open bucket if its end time has passed
    pub fn close_expired(&mut self, now: i64) -> Option<Candle> {
        if self.current.as_ref().is_some_and(|c| c.close_time < now) {
            return self.seal_current();
        }
        None
    }

    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Up to `limit` most recent candles (sealed and open), oldest first
    pub fn recent(&self, limit: usize) -> Vec<Candle> {
        let mut candles: Vec<Candle> = self
            .sealed
            .iter()
            .chain(self.current.iter())
            .rev()
            .take(limit)
            .cloned()
            .collect();
        candles.reverse();
        candles
    }

    fn last_sealed_start(&self) -> Option<i64> {
        self.sealed.back().map(|c| c.open_time)
    }

    fn seal_current(&mut self) -> Option<Candle> {
        let mut candle = self.current.take()?;
        candle.closed = true;
        self.current_trades.clear();
        self.sealed.push_back(candle.clone());
        while self.sealed.len() > self.max_history {
            self.sealed.pop_front();
        }
        Some(candle)
    }
}

/// Candle series for every configured interval of one symbol
#[derive(Debug)]
pub struct SymbolCandles {
    symbol: MarketId,
    series: BTreeMap<Interval, CandleSeries>,
}

impl SymbolCandles {
    pub fn new(symbol: MarketId, intervals: &[Interval], max_history: usize) -> Self {
        let series = intervals
            .iter()
            .map(|&interval| (interval, CandleSeries::new(interval, max_history)))
            .collect();
        Self { symbol, series }
    }

    pub fn symbol(&self) -> &MarketId {
        &self.symbol
    }

    /// Roll a trade into every interval; returns candles it sealed
    pub fn rollup(&mut self, trade: &Trade) -> Vec<Candle> {
        self.series
            .values_mut()
            .filter_map(|series| series.rollup(trade))
            .collect()
    }

    pub fn close_expired(&mut self, now: i64) -> Vec<Candle> {
        self.series
            .values_mut()
            .filter_map(|series| series.close_expired(now))
            .collect()
    }

    pub fn series(&self, interval: Interval) -> Option<&CandleSeries> {
        self.series.get(&interval)
    }

    pub fn recent(&self, interval: Interval, limit: usize) -> Vec<Candle> {
        self.series
            .get(&interval)
            .map(|s| s.recent(limit))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{OrderId, UserId};
    use types::numeric::{Price, Quantity};
    use types::order::Side;

    fn minutes(m: i64) -> i64 {
        m * NANOS_PER_MINUTE
    }

    fn trade(price: u64, qty: u64, at: i64) -> Trade {
        Trade {
            trade_id: TradeId::new(),
            sequence: 1,
            symbol: MarketId::new("BTC/USDT"),
            taker_order_id: OrderId::new(),
            maker_order_id: OrderId::new(),
            taker_user_id: UserId::new(),
            maker_user_id: UserId::new(),
            taker_side: Side::BUY,
            price: Price::from_u64(price),
            quantity: Quantity::from_u64(qty),
            taker_fee: Decimal::ZERO,
            taker_fee_currency: "USDT".to_string(),
            maker_fee: Decimal::ZERO,
            maker_fee_currency: "USDT".to_string(),
            executed_at: at,
        }
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("15m".parse::<Interval>().unwrap(), Interval::M15);
        assert_eq!("1d".parse::<Interval>().unwrap(), Interval::D1);
        assert!("2m".parse::<Interval>().is_err());
        assert_eq!(serde_json::to_string(&Interval::H4).unwrap(), "\"4h\"");
    }

    #[test]
    fn test_bucket_alignment() {
        let ts = minutes(5) + 30_000_000_000;
        assert_eq!(Interval::M1.bucket_start(ts), minutes(5));
        assert_eq!(Interval::M5.bucket_start(ts), minutes(5));
        assert_eq!(Interval::M15.bucket_start(ts), 0);
    }

    #[test]
    fn test_ohlcv_within_bucket() {
        let mut series = CandleSeries::new(Interval::M1, 10);
        series.rollup(&trade(100, 1, minutes(0) + 1));
        series.rollup(&trade(110, 2, minutes(0) + 2));
        series.rollup(&trade(90, 3, minutes(0) + 3));
        series.rollup(&trade(105, 1, minutes(0) + 4));

        let candle = series.current().unwrap();
        assert_eq!(candle.open, Decimal::from(100));
        assert_eq!(candle.high, Decimal::from(110));
        assert_eq!(candle.low, Decimal::from(90));
        assert_eq!(candle.close, Decimal::from(105));
        assert_eq!(candle.volume, Decimal::from(7));
        assert_eq!(candle.trade_count, 4);
        assert!(candle.is_valid());
    }

    #[test]
    fn test_rollup_is_idempotent() {
        let mut series = CandleSeries::new(Interval::M1, 10);
        let t = trade(100, 2, minutes(0) + 5);
        series.rollup(&t);
        series.rollup(&t);

        let candle = series.current().unwrap();
        assert_eq!(candle.trade_count, 1);
        assert_eq!(candle.volume, Decimal::from(2));
    }

    #[test]
    fn test_later_bucket_seals_previous() {
        let mut series = CandleSeries::new(Interval::M1, 10);
        let first = trade(100, 1, minutes(0) + 5);
        series.rollup(&first);

        let sealed = series.rollup(&trade(101, 1, minutes(1) + 5)).unwrap();
        assert!(sealed.closed);
        assert_eq!(sealed.close, Decimal::from(100));

        // sealed candles are immutable, even for a replay
        assert!(series.rollup(&first).is_none());
        assert!(series.rollup(&trade(50, 9, minutes(0) + 30)).is_none());
        assert_eq!(series.recent(10)[0], sealed);
    }

    #[test]
    fn test_close_expired() {
        let mut series = CandleSeries::new(Interval::M1, 10);
        series.rollup(&trade(100, 1, minutes(0) + 5));
        assert!(series.close_expired(minutes(0) + 30_000_000_000).is_none());

        let sealed = series.close_expired(minutes(1) + 1).unwrap();
        assert!(sealed.closed);
        assert!(series.current().is_none());

        // the next trade opens a fresh bucket with its own open
        series.rollup(&trade(120, 1, minutes(1) + 10));
        assert_eq!(series.current().unwrap().open, Decimal::from(120));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut series = CandleSeries::new(Interval::M1, 3);
        for m in 0..6 {
            series.rollup(&trade(100, 1, minutes(m)));
        }
        let recent = series.recent(10);
        // 3 sealed plus the open one
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].open_time, minutes(2));
        assert!(!recent[3].closed);
    }

    #[test]
    fn test_symbol_candles_all_intervals() {
        let mut candles = SymbolCandles::new(MarketId::new("BTC/USDT"), Interval::all(), 10);
        candles.rollup(&trade(100, 1, minutes(0) + 1));
        let sealed = candles.rollup(&trade(101, 1, minutes(1) + 1));

        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].interval, Interval::M1);
        assert_eq!(candles.recent(Interval::D1, 5)[0].trade_count, 2);
    }
}
