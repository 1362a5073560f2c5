//! Where pushed market data comes from
//!
//! The broadcaster only knows the [`MarketDataSource`] trait. The exchange
//! implementation reads order book and ticker from the engines' published
//! market views and trades/candles from the recorder.

use std::sync::Arc;

use async_trait::async_trait;
use matching_engine::{EngineRegistry, MarketView};
use serde_json::Value;
use thiserror::Error;
use types::ids::MarketId;
use types::symbol::SymbolConfig;

use crate::protocol::StreamSpec;
use crate::recorder::TradeRecorder;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Provider of the current value of a market data stream
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Current value of `stream` for `symbol`
    async fn fetch(&self, symbol: &MarketId, stream: &StreamSpec) -> Result<Value, SourceError>;

    /// Trading rules of `symbol`, if it is listed
    fn symbol_config(&self, symbol: &str) -> Option<SymbolConfig>;
}

/// Live exchange data: engine market views plus the trade recorder
pub struct ExchangeFeed {
    registry: Arc<EngineRegistry>,
    recorder: Arc<TradeRecorder>,
}

impl ExchangeFeed {
    pub fn new(registry: Arc<EngineRegistry>, recorder: Arc<TradeRecorder>) -> Self {
        Self { registry, recorder }
    }

    fn view(&self, symbol: &MarketId) -> Result<Arc<MarketView>, SourceError> {
        self.registry
            .get(symbol.as_str())
            .map(|handle| handle.view())
            .map_err(|_| SourceError::UnknownSymbol(symbol.to_string()))
    }
}

#[async_trait]
impl MarketDataSource for ExchangeFeed {
    async fn fetch(&self, symbol: &MarketId, stream: &StreamSpec) -> Result<Value, SourceError> {
        let value = match stream {
            StreamSpec::OrderBook { depth } => {
                let view = self.view(symbol)?;
                serde_json::to_value(view.book.truncated(*depth))?
            }
            StreamSpec::Ticker => serde_json::to_value(&self.view(symbol)?.ticker)?,
            StreamSpec::Trades { limit } => {
                serde_json::to_value(self.recorder.recent_trades(symbol, *limit))?
            }
            StreamSpec::Ohlcv { interval, limit } => {
                serde_json::to_value(self.recorder.candles(symbol, *interval, *limit))?
            }
        };
        Ok(value)
    }

    fn symbol_config(&self, symbol: &str) -> Option<SymbolConfig> {
        self.registry.symbol_config(symbol)
    }
}
