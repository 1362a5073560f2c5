//! Rolling ticker
//!
//! Last price plus high/low/volume over a sliding time window (24h by
//! default), fed by the engine's own trades.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use types::ids::MarketId;
use types::numeric::{Price, Quantity};
use types::trade::Trade;

/// Ticker as published to readers
///
/// Carries no timestamp, so two tickers compare equal when nothing traded
/// and the book top did not move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: MarketId,
    pub last: Option<Price>,
    pub open: Option<Price>,
    pub high: Option<Price>,
    pub low: Option<Price>,
    pub volume: Quantity,
    pub quote_volume: Decimal,
    pub trade_count: u64,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
}

impl Ticker {
    pub fn empty(symbol: MarketId) -> Self {
        Self {
            symbol,
            last: None,
            open: None,
            high: None,
            low: None,
            volume: Quantity::zero(),
            quote_volume: Decimal::ZERO,
            trade_count: 0,
            best_bid: None,
            best_ask: None,
        }
    }

    /// Percent change of last over open, two decimal places
    pub fn change_percent(&self) -> Option<Decimal> {
        let open = self.open?.as_decimal();
        let last = self.last?.as_decimal();
        Some(((last - open) / open * Decimal::ONE_HUNDRED).round_dp(2))
    }
}

#[derive(Debug, Clone)]
struct Tick {
    executed_at: i64,
    price: Price,
    quantity: Quantity,
}

/// Sliding-window trade statistics for one symbol
#[derive(Debug, Clone)]
pub struct RollingTicker {
    symbol: MarketId,
    window_nanos: i64,
    ticks: VecDeque<Tick>,
    last: Option<Price>,
}

impl RollingTicker {
    pub fn new(symbol: MarketId, window_secs: u64) -> Self {
        Self {
            symbol,
            window_nanos: (window_secs as i64).saturating_mul(1_000_000_000),
            ticks: VecDeque::new(),
            last: None,
        }
    }

    pub fn record(&mut self, trade: &Trade) {
        self.ticks.push_back(Tick {
            executed_at: trade.executed_at,
            price: trade.price,
            quantity: trade.quantity,
        });
        self.last = Some(trade.price);
    }

    /// Drop trades that fell out of the window ending at `now`
    pub fn expire(&mut self, now: i64) {
        let cutoff = now.saturating_sub(self.window_nanos);
        while self.ticks.front().is_some_and(|t| t.executed_at < cutoff) {
            self.ticks.pop_front();
        }
    }

    pub fn ticker(&self, best_bid: Option<Price>, best_ask: Option<Price>) -> Ticker {
        let mut ticker = Ticker::empty(self.symbol.clone());
        ticker.last = self.last;
        ticker.best_bid = best_bid;
        ticker.best_ask = best_ask;
        ticker.open = self.ticks.front().map(|t| t.price);

        for tick in &self.ticks {
            ticker.high = Some(ticker.high.map_or(tick.price, |h| h.max(tick.price)));
            ticker.low = Some(ticker.low.map_or(tick.price, |l| l.min(tick.price)));
            ticker.volume += tick.quantity;
            ticker.quote_volume = ticker
                .quote_volume
                .saturating_add(tick.quantity.as_decimal().saturating_mul(tick.price.as_decimal()));
            ticker.trade_count += 1;
        }
        ticker
    }
}
