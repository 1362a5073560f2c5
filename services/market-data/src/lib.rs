//! Market Data Service
//!
//! Turns matching-engine output into client-facing market data:
//! - Trade tape and OHLCV candles (1m to 1d), rolled up from trade events
//! - Polling broadcaster pushing order book, trades, ticker and candle
//!   streams to subscribed connections, only when a value changed
//! - Per-connection subscription sessions speaking a small JSON protocol
//!
//! # Architecture
//!
//! ```text
//!  EngineRegistry ──events──▶ TradeRecorder (log, tape, candles)
//!        │                         │
//!   MarketView                     │
//!        └──────▶ ExchangeFeed ◀───┘
//!                      │ fetch
//!                 Broadcaster (task per active symbol)
//!                      │ try_send
//!                 SessionManager ──▶ connections
//! ```

pub mod broadcaster;
pub mod candles;
pub mod protocol;
pub mod recorder;
pub mod session;
pub mod source;
pub mod trades;

pub use broadcaster::{Broadcaster, BroadcasterConfig, ConnectionId};
pub use candles::{Candle, Interval};
pub use protocol::{ClientMessage, MarketDataPush, StreamSpec};
pub use recorder::{RecorderConfig, TradeRecorder};
pub use session::{SessionConfig, SessionManager, SubscriptionError};
pub use source::{ExchangeFeed, MarketDataSource, SourceError};

// Library version
pub const SERVICE_VERSION: &str = "0.2.0";
