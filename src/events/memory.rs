//! In-process event transport
//!
//! [`EventFeed`] fans raw events out to every attached receiver;
//! [`MemoryChain`](crate::chain::MemoryChain) publishes to one and
//! [`MemoryTransport`] exposes it as a [`PushTransport`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{EventReceiver, PushTransport, RawTransactionEvent, TransportError};

#[derive(Debug, Clone, Default)]
pub struct EventFeed {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<RawTransactionEvent>>>>,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Deliver to every attached receiver, dropping closed ones
    pub fn publish(&self, event: RawTransactionEvent) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Close every attached receiver
    pub fn disconnect(&self) {
        if let Ok(mut senders) = self.senders.lock() {
            log::debug!("Disconnecting {} event receivers", senders.len());
            senders.clear();
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Transport over an [`EventFeed`]
#[derive(Debug)]
pub struct MemoryTransport {
    feed: EventFeed,
    opened: AtomicBool,
    secure: AtomicBool,
    topics: Mutex<HashSet<String>>,
}

impl MemoryTransport {
    pub fn new(feed: EventFeed) -> Self {
        Self {
            feed,
            opened: AtomicBool::new(false),
            secure: AtomicBool::new(false),
            topics: Mutex::new(HashSet::new()),
        }
    }

    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    /// Topics currently subscribed
    pub fn topics(&self) -> Vec<String> {
        self.topics
            .lock()
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_secure(&self) -> bool {
        self.secure.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for MemoryTransport {
    async fn open(&self) -> Result<EventReceiver, TransportError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyOpened);
        }
        Ok(self.feed.attach())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.topics
            .lock()
            .map_err(|_| TransportError::Request("topics unavailable".to_string()))?
            .insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.topics
            .lock()
            .map_err(|_| TransportError::Request("topics unavailable".to_string()))?
            .remove(topic);
        Ok(())
    }

    async fn set_secure(&self, secure: bool) -> Result<(), TransportError> {
        self.secure.store(secure, Ordering::SeqCst);
        Ok(())
    }
}
