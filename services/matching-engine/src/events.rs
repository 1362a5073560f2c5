//! Events emitted by the matching engine
//!
//! Every state change a symbol engine commits is announced as an
//! `EngineEvent`, in commit order. Consumers (trade recorder, notification
//! hooks, reward or ledger writers) subscribe through the registry's
//! broadcast channel or plug in an [`EventHook`].

use serde::{Deserialize, Serialize};
use types::order::Order;
use types::trade::Trade;

use crate::book::BookDelta;
use crate::ticker::Ticker;

/// Engine event taxonomy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Order passed validation and its reservation is committed
    OrderAccepted { order: Order },
    /// One fill was committed
    TradeExecuted { trade: Trade },
    /// Order left the book without filling completely
    OrderCancelled { order: Order },
    /// A fill could not be persisted; the order is parked
    OrderFailed { order: Order, reason: String },
    BookDelta { delta: BookDelta },
    Ticker { ticker: Ticker },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::OrderAccepted { .. } => "order_accepted",
            EngineEvent::TradeExecuted { .. } => "trade_executed",
            EngineEvent::OrderCancelled { .. } => "order_cancelled",
            EngineEvent::OrderFailed { .. } => "order_failed",
            EngineEvent::BookDelta { .. } => "book_delta",
            EngineEvent::Ticker { .. } => "ticker",
        }
    }
}

/// Synchronous observer of engine events
///
/// Runs on the symbol's worker thread; implementations must not block.
pub trait EventHook: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Hook that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl EventHook for NoopHook {
    fn on_event(&self, _event: &EngineEvent) {}
}

/// Hook that logs every event at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

impl EventHook for TracingHook {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::TradeExecuted { trade } => tracing::debug!(
                symbol = %trade.symbol,
                sequence = trade.sequence,
                price = %trade.price,
                quantity = %trade.quantity,
                "trade executed"
            ),
            EngineEvent::OrderFailed { order, reason } => tracing::warn!(
                order_id = %order.order_id,
                reason = %reason,
                "order parked as failed"
            ),
            other => tracing::trace!(event = other.name(), "engine event"),
        }
    }
}
