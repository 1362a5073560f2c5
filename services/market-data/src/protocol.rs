//! Subscription wire protocol
//!
//! Clients send JSON text frames:
//!
//! ```json
//! {"action": "SUBSCRIBE", "payload": {"type": "orderbook", "symbol": "BTC/USDT", "depth": 20}}
//! ```
//!
//! `type` is one of `orderbook`, `trades`, `ticker`, `ohlcv`; `depth`,
//! `limit` and `interval` are optional stream parameters. The server pushes
//! `{"stream", "symbol", "data"}` objects, where `stream` is the bare type
//! and the stream's parameters travel as sibling `depth`, `interval` and
//! `limit` fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use types::ids::MarketId;

use crate::candles::Interval;

pub const DEFAULT_DEPTH: usize = 20;
pub const MAX_DEPTH: usize = 500;
pub const DEFAULT_TRADE_LIMIT: usize = 50;
pub const DEFAULT_CANDLE_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Orderbook,
    Trades,
    Ticker,
    Ohlcv,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Orderbook => "orderbook",
            StreamType::Trades => "trades",
            StreamType::Ticker => "ticker",
            StreamType::Ohlcv => "ohlcv",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    #[serde(rename = "type")]
    pub stream: StreamType,
    pub symbol: String,
    #[serde(default)]
    pub depth: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub interval: Option<Interval>,
}

impl SubscriptionPayload {
    /// Stream with defaults filled in and parameters clamped
    pub fn stream_spec(&self) -> StreamSpec {
        let limit = |default: usize| self.limit.unwrap_or(default).clamp(1, MAX_LIMIT);
        match self.stream {
            StreamType::Orderbook => StreamSpec::OrderBook {
                depth: self.depth.unwrap_or(DEFAULT_DEPTH).clamp(1, MAX_DEPTH),
            },
            StreamType::Trades => StreamSpec::Trades {
                limit: limit(DEFAULT_TRADE_LIMIT),
            },
            StreamType::Ticker => StreamSpec::Ticker,
            StreamType::Ohlcv => StreamSpec::Ohlcv {
                interval: self.interval.unwrap_or(Interval::M1),
                limit: limit(DEFAULT_CANDLE_LIMIT),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: Action,
    pub payload: SubscriptionPayload,
}

/// A stream with its parameters; part of the subscription key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamSpec {
    #[serde(rename = "orderbook")]
    OrderBook { depth: usize },
    Trades { limit: usize },
    Ticker,
    Ohlcv { interval: Interval, limit: usize },
}

impl StreamSpec {
    pub fn stream_type(&self) -> StreamType {
        match self {
            StreamSpec::OrderBook { .. } => StreamType::Orderbook,
            StreamSpec::Trades { .. } => StreamType::Trades,
            StreamSpec::Ticker => StreamType::Ticker,
            StreamSpec::Ohlcv { .. } => StreamType::Ohlcv,
        }
    }

    /// Value of the `stream` field of pushes
    pub fn name(&self) -> &'static str {
        self.stream_type().as_str()
    }
}

/// One server push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataPush {
    pub stream: StreamType,
    pub symbol: MarketId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub data: serde_json::Value,
}

impl MarketDataPush {
    pub fn new(symbol: MarketId, stream: &StreamSpec, data: serde_json::Value) -> Self {
        let (depth, interval, limit) = match stream {
            StreamSpec::OrderBook { depth } => (Some(*depth), None, None),
            StreamSpec::Trades { limit } => (None, None, Some(*limit)),
            StreamSpec::Ticker => (None, None, None),
            StreamSpec::Ohlcv { interval, limit } => (None, Some(*interval), Some(*limit)),
        };
        Self {
            stream: stream.stream_type(),
            symbol,
            depth,
            interval,
            limit,
            data,
        }
    }
}
