//! Polling transport
//!
//! Turns periodic Esplora address-history queries into a push stream for
//! deployments without a notification server. The first poll only records
//! what is already known; later polls emit each new transaction once.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Address, Network, Txid};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{EventReceiver, PushTransport, RawTransactionEvent, TransportError, WatchedAddresses};
use crate::chain::ChainSource;

pub struct EsploraPollTransport {
    chain: Arc<dyn ChainSource>,
    watched: WatchedAddresses,
    network: Network,
    interval: Duration,
    opened: AtomicBool,
    topics: Mutex<HashSet<String>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl EsploraPollTransport {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        watched: WatchedAddresses,
        network: Network,
        interval: Duration,
    ) -> Self {
        Self {
            chain,
            watched,
            network,
            interval,
            opened: AtomicBool::new(false),
            topics: Mutex::new(HashSet::new()),
            poller: Mutex::new(None),
        }
    }
}

impl Drop for EsploraPollTransport {
    fn drop(&mut self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(handle) = poller.take() {
                handle.abort();
            }
        }
    }
}

struct Poller {
    chain: Arc<dyn ChainSource>,
    watched: WatchedAddresses,
    network: Network,
    seen: HashSet<Txid>,
}

impl Poller {
    /// One pass over the watched addresses; `emit` false only seeds `seen`
    async fn poll(&mut self, emit: bool) -> Vec<RawTransactionEvent> {
        let mut events = Vec::new();

        for watched in self.watched.snapshot() {
            let address = match Address::from_str(&watched)
                .map_err(|e| e.to_string())
                .and_then(|a| a.require_network(self.network).map_err(|e| e.to_string()))
            {
                Ok(address) => address,
                Err(e) => {
                    log::warn!("Not polling {}: {}", watched, e);
                    continue;
                }
            };

            let history = match self.chain.address_transactions(&address).await {
                Ok(history) => history,
                Err(e) => {
                    log::warn!("Polling {} failed: {}", watched, e);
                    continue;
                }
            };

            for entry in history {
                let txid = entry.tx.compute_txid();
                if !self.seen.insert(txid) || !emit {
                    continue;
                }
                let mut addresses = vec![watched.clone()];
                for output in &entry.tx.output {
                    if let Ok(a) = Address::from_script(&output.script_pubkey, self.network) {
                        let a = a.to_string();
                        if !addresses.contains(&a) {
                            addresses.push(a);
                        }
                    }
                }
                events.push(RawTransactionEvent {
                    txid: txid.to_string(),
                    hex: Some(serialize_hex(&entry.tx)),
                    addresses,
                });
            }
        }
        events
    }
}

#[async_trait]
impl PushTransport for EsploraPollTransport {
    async fn open(&self) -> Result<EventReceiver, TransportError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyOpened);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut poller = Poller {
            chain: Arc::clone(&self.chain),
            watched: self.watched.clone(),
            network: self.network,
            seen: HashSet::new(),
        };
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            poller.poll(false).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for event in poller.poll(true).await {
                    log::debug!("Polled new transaction {}", event.txid);
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        *self
            .poller
            .lock()
            .map_err(|_| TransportError::Request("poller unavailable".to_string()))? =
            Some(handle);
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.topics
            .lock()
            .map_err(|_| TransportError::Request("topics unavailable".to_string()))?
            .insert(topic.to_string());
        Ok(())
    }

    /// Stops polling once no topic is left
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let empty = {
            let mut topics = self
                .topics
                .lock()
                .map_err(|_| TransportError::Request("topics unavailable".to_string()))?;
            topics.remove(topic);
            topics.is_empty()
        };
        if empty {
            if let Ok(mut poller) = self.poller.lock() {
                if let Some(handle) = poller.take() {
                    log::debug!("Stopping Esplora poller");
                    handle.abort();
                }
            }
        }
        Ok(())
    }

    /// Polled events always carry the transaction hex
    async fn set_secure(&self, _secure: bool) -> Result<(), TransportError> {
        Ok(())
    }
}
