//! Subscription sessions
//!
//! One session per client connection. Incoming text frames are parsed into
//! SUBSCRIBE/UNSUBSCRIBE requests and applied to the broadcaster; anything
//! invalid is logged and ignored, the connection stays up.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use types::ids::MarketId;
use uuid::Uuid;

use crate::broadcaster::{Broadcaster, ConnectionId};
use crate::protocol::{Action, ClientMessage, MarketDataPush, StreamSpec, SubscriptionPayload};
use crate::source::MarketDataSource;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Symbol disabled: {0}")]
    SymbolDisabled(String),

    #[error("Subscription limit of {limit} reached")]
    CapExceeded { limit: usize },

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_subscriptions_per_connection: usize,
    /// Capacity of each connection's outbound push queue
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_connection: 50,
            outbound_buffer: 256,
        }
    }
}

struct Session {
    outbound: mpsc::Sender<MarketDataPush>,
    subscriptions: HashSet<(MarketId, StreamSpec)>,
}

pub struct SessionManager {
    config: SessionConfig,
    broadcaster: Arc<Broadcaster>,
    source: Arc<dyn MarketDataSource>,
    sessions: DashMap<ConnectionId, Session>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        broadcaster: Arc<Broadcaster>,
        source: Arc<dyn MarketDataSource>,
    ) -> Self {
        Self {
            config,
            broadcaster,
            source,
            sessions: DashMap::new(),
        }
    }

    /// Register a connection; pushes for it arrive on the returned receiver
    pub fn open(&self) -> (ConnectionId, mpsc::Receiver<MarketDataPush>) {
        let connection = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        self.sessions.insert(
            connection,
            Session {
                outbound: tx,
                subscriptions: HashSet::new(),
            },
        );
        info!(%connection, "market data session opened");
        (connection, rx)
    }

    /// Apply one text frame; errors are logged and returned, never fatal
    pub fn handle_text(&self, connection: ConnectionId, text: &str) -> Result<(), SubscriptionError> {
        let result = serde_json::from_str::<ClientMessage>(text)
            .map_err(|err| SubscriptionError::Malformed(err.to_string()))
            .and_then(|msg| self.handle(connection, &msg));
        if let Err(err) = &result {
            warn!(%connection, error = %err, "subscription request ignored");
        }
        result
    }

    pub fn handle(&self, connection: ConnectionId, msg: &ClientMessage) -> Result<(), SubscriptionError> {
        match msg.action {
            Action::Subscribe => self.subscribe(connection, &msg.payload).map(|_| ()),
            Action::Unsubscribe => self.unsubscribe(connection, &msg.payload).map(|_| ()),
        }
    }

    /// Returns false if the subscription already existed
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        payload: &SubscriptionPayload,
    ) -> Result<bool, SubscriptionError> {
        let config = self
            .source
            .symbol_config(&payload.symbol)
            .ok_or_else(|| SubscriptionError::UnknownSymbol(payload.symbol.clone()))?;
        if !config.enabled {
            return Err(SubscriptionError::SymbolDisabled(payload.symbol.clone()));
        }
        let stream = payload.stream_spec();
        let key = (config.symbol, stream);

        let mut session = self
            .sessions
            .get_mut(&connection)
            .ok_or(SubscriptionError::UnknownConnection(connection))?;
        if session.subscriptions.contains(&key) {
            return Ok(false);
        }
        let limit = self.config.max_subscriptions_per_connection;
        if session.subscriptions.len() >= limit {
            return Err(SubscriptionError::CapExceeded { limit });
        }

        self.broadcaster
            .subscribe(connection, &key.0, key.1.clone(), session.outbound.clone());
        session.subscriptions.insert(key);
        Ok(true)
    }

    /// Returns false if there was no such subscription
    pub fn unsubscribe(
        &self,
        connection: ConnectionId,
        payload: &SubscriptionPayload,
    ) -> Result<bool, SubscriptionError> {
        let symbol = MarketId::try_new(payload.symbol.clone())
            .ok_or_else(|| SubscriptionError::UnknownSymbol(payload.symbol.clone()))?;
        let key = (symbol, payload.stream_spec());

        let mut session = self
            .sessions
            .get_mut(&connection)
            .ok_or(SubscriptionError::UnknownConnection(connection))?;
        if !session.subscriptions.remove(&key) {
            return Ok(false);
        }
        self.broadcaster.unsubscribe(connection, &key.0, &key.1);
        Ok(true)
    }

    /// Forget a connection and all its subscriptions
    pub fn close(&self, connection: ConnectionId) -> usize {
        let Some((_, session)) = self.sessions.remove(&connection) else {
            return 0;
        };
        let removed = self.broadcaster.unsubscribe_all(connection);
        debug!(%connection, subscriptions = session.subscriptions.len(), removed, "market data session closed");
        removed
    }

    pub fn subscription_count(&self, connection: ConnectionId) -> usize {
        self.sessions
            .get(&connection)
            .map(|s| s.subscriptions.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }
}
