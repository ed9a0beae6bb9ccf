//! Transaction notifications
//!
//! A [`PushTransport`] yields raw transaction events; the
//! [`EventNotifier`](notifier::EventNotifier) matches them against the
//! wallet's addresses, optionally re-validates them against the chain and
//! dispatches them to subscribers by category.

pub mod memory;
pub mod notifier;
pub mod poll;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bitcoin::Txid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use memory::{EventFeed, MemoryTransport};
pub use notifier::{EventNotifier, SubscriptionId};
pub use poll::EsploraPollTransport;

/// Event as delivered by a transport, before any validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransactionEvent {
    pub txid: String,
    #[serde(default)]
    pub hex: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Lazy, unbounded, non-restartable stream of raw events
pub type EventReceiver = mpsc::UnboundedReceiver<RawTransactionEvent>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport was already opened")]
    AlreadyOpened,

    #[error("Transport request failed: {0}")]
    Request(String),
}

/// Push-notification channel
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open the event stream; a transport can be opened once
    async fn open(&self) -> Result<EventReceiver, TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Tell the transport which delivery mode the client runs in
    async fn set_secure(&self, secure: bool) -> Result<(), TransportError>;
}

/// Which subscriptions an event is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventCategory {
    /// Any transaction touching the wallet
    NewTransaction,
    /// A wallet transaction that carries a colored payload
    NewColoredTransaction,
}

impl EventCategory {
    /// Transport topic for the category
    pub fn topic(self) -> &'static str {
        match self {
            EventCategory::NewTransaction => "newtransaction",
            EventCategory::NewColoredTransaction => "newcctransaction",
        }
    }
}

/// A delivered notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub txid: Txid,
    pub tx_hex: String,
    /// Wallet addresses the transaction touches
    pub addresses: Vec<String>,
    pub colored: bool,
    /// Re-validated against the chain before delivery
    pub secure: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifierError {
    #[error("Event transport disconnected")]
    TransportDisconnected,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Timed out waiting for transaction {0}")]
    Timeout(Txid),
}

/// Lifecycle of the notifier's subscription to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierState {
    Unsubscribed,
    Subscribing,
    Active,
    Error(NotifierError),
}

/// Address set events are matched against, shared with polling transports
#[derive(Debug, Clone, Default)]
pub struct WatchedAddresses(Arc<RwLock<HashSet<String>>>);

impl WatchedAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address; returns false if it was already watched
    pub fn insert(&self, address: &str) -> bool {
        self.0
            .write()
            .map(|mut set| set.insert(address.to_string()))
            .unwrap_or(false)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.0
            .read()
            .map(|set| set.contains(address))
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0
            .read()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.read().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
