//! Event notifier
//!
//! State machine: `Unsubscribed -> Subscribing -> Active -> (Error | Unsubscribed)`.
//!
//! The first subscription opens the transport and spawns a listener task.
//! The delivery mode is read once per event, when the event is received, so
//! a mode switch applies to every later event and never to one already being
//! processed. Malformed events are logged and skipped. When the transport
//! closes the notifier moves to `Error(TransportDisconnected)`, tells the
//! error callbacks and does not resubscribe.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bitcoin::consensus::encode::{deserialize_hex, serialize_hex};
use bitcoin::{Address, Network, Transaction, Txid};
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::{
    EventCategory, EventReceiver, NotifierError, NotifierState, PushTransport,
    RawTransactionEvent, TransactionEvent, WatchedAddresses,
};
use crate::chain::ChainSource;
use crate::coloring::Payload;

/// Delivered events kept for late `await_transaction` callers
const RECENT_EVENTS_CAPACITY: usize = 256;

pub type EventCallback = Arc<dyn Fn(&TransactionEvent) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&NotifierError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    category: EventCategory,
    callback: EventCallback,
}

/// Why a raw event was not delivered
#[derive(Debug, thiserror::Error)]
enum SkipReason {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("validation against the chain failed: {0}")]
    Unverifiable(String),
}

struct Inner {
    transport: Arc<dyn PushTransport>,
    chain: Arc<dyn ChainSource>,
    network: Network,
    watched: WatchedAddresses,
    secure: AtomicBool,
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
    error_callbacks: Mutex<Vec<ErrorCallback>>,
    state: watch::Sender<NotifierState>,
    recent: Mutex<VecDeque<(EventCategory, TransactionEvent)>>,
    delivered: broadcast::Sender<(EventCategory, TransactionEvent)>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Routes transport events to wallet subscribers
#[derive(Clone)]
pub struct EventNotifier {
    inner: Arc<Inner>,
}

impl EventNotifier {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        chain: Arc<dyn ChainSource>,
        network: Network,
        watched: WatchedAddresses,
        secure: bool,
    ) -> Self {
        let (state, _) = watch::channel(NotifierState::Unsubscribed);
        let (delivered, _) = broadcast::channel(RECENT_EVENTS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                chain,
                network,
                watched,
                secure: AtomicBool::new(secure),
                next_id: AtomicU64::new(1),
                subscriptions: Mutex::new(Vec::new()),
                error_callbacks: Mutex::new(Vec::new()),
                state,
                recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAPACITY)),
                delivered,
                listener: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> NotifierState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<NotifierState> {
        self.inner.state.subscribe()
    }

    pub fn is_secure(&self) -> bool {
        self.inner.secure.load(Ordering::SeqCst)
    }

    /// Switch delivery mode for events received from now on
    pub async fn set_secure(&self, secure: bool) {
        self.inner.secure.store(secure, Ordering::SeqCst);
        log::info!(
            "Event delivery mode set to {}",
            if secure { "secure" } else { "unsecure" }
        );
        if let Err(e) = self.inner.transport.set_secure(secure).await {
            log::warn!("Transport did not accept the mode switch: {}", e);
        }
    }

    /// Match events against `address` as well
    pub fn watch_address(&self, address: &Address) -> bool {
        self.inner.watched.insert(&address.to_string())
    }

    pub fn watched(&self) -> &WatchedAddresses {
        &self.inner.watched
    }

    /// Register a callback invoked when the notifier enters `Error`
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&NotifierError) + Send + Sync + 'static,
    {
        lock(&self.inner.error_callbacks).push(Arc::new(callback));
    }

    /// Register a subscription and make sure the listener is running
    ///
    /// # Example
    ///
    /// ```ignore
    /// let id = notifier
    ///     .subscribe(EventCategory::NewColoredTransaction, |event| {
    ///         println!("colored transaction {}", event.txid);
    ///     })
    ///     .await?;
    /// ```
    pub async fn subscribe<F>(
        &self,
        category: EventCategory,
        callback: F,
    ) -> Result<SubscriptionId, NotifierError>
    where
        F: Fn(&TransactionEvent) + Send + Sync + 'static,
    {
        self.start().await?;

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.inner.subscriptions).push(Subscription {
            id,
            category,
            callback: Arc::new(callback),
        });
        log::debug!("Registered {:?} subscription {:?}", category, id);
        Ok(id)
    }

    /// Remove a subscription; the listener keeps running
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = lock(&self.inner.subscriptions);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.subscriptions).len()
    }

    /// Open the transport and spawn the listener, once
    pub async fn start(&self) -> Result<(), NotifierError> {
        let mut listener = self.inner.listener.lock().await;

        match self.state() {
            NotifierState::Active | NotifierState::Subscribing => return Ok(()),
            NotifierState::Error(e) => return Err(e),
            NotifierState::Unsubscribed if listener.is_some() => {
                return Err(NotifierError::TransportDisconnected)
            }
            NotifierState::Unsubscribed => {}
        }

        self.inner.state.send_replace(NotifierState::Subscribing);
        let receiver = match self.open_transport().await {
            Ok(receiver) => receiver,
            Err(e) => {
                self.inner.state.send_replace(NotifierState::Error(e.clone()));
                return Err(e);
            }
        };

        let inner = Arc::clone(&self.inner);
        *listener = Some(tokio::spawn(listen(inner, receiver)));
        self.inner.state.send_replace(NotifierState::Active);
        log::info!("Event notifier active");
        Ok(())
    }

    async fn open_transport(&self) -> Result<EventReceiver, NotifierError> {
        let transport = &self.inner.transport;
        transport.set_secure(self.is_secure()).await?;
        let receiver = transport.open().await?;
        for category in [
            EventCategory::NewTransaction,
            EventCategory::NewColoredTransaction,
        ] {
            transport.subscribe(category.topic()).await?;
        }
        Ok(receiver)
    }

    /// Stop listening and release the transport topics
    ///
    /// The transport is not reopened afterwards; a later `start` fails.
    pub async fn shutdown(&self) {
        let listener = self.inner.listener.lock().await;
        if let Some(handle) = listener.as_ref() {
            // Listener must not report the closing channel as an error
            self.inner.state.send_replace(NotifierState::Unsubscribed);
            handle.abort();
            for category in [
                EventCategory::NewTransaction,
                EventCategory::NewColoredTransaction,
            ] {
                if let Err(e) = self.inner.transport.unsubscribe(category.topic()).await {
                    log::warn!("Failed to unsubscribe {}: {}", category.topic(), e);
                }
            }
        }
    }

    /// Wait for a delivered event for `txid` in `category`
    ///
    /// Events delivered before the call are found in a bounded buffer of
    /// recent events. Timing out leaves every subscription in place.
    pub async fn await_transaction(
        &self,
        txid: &Txid,
        category: EventCategory,
        timeout: Duration,
    ) -> Result<TransactionEvent, NotifierError> {
        self.start().await?;
        let mut delivered = self.inner.delivered.subscribe();

        if let Some(event) = self.recent(txid, category) {
            return Ok(event);
        }

        let wait = async {
            loop {
                match delivered.recv().await {
                    Ok((c, event)) if c == category && &event.txid == txid => return Some(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("Await for {} lagged by {} events", txid, skipped);
                        if let Some(event) = self.recent(txid, category) {
                            return Some(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(NotifierError::TransportDisconnected),
            Err(_) => Err(NotifierError::Timeout(*txid)),
        }
    }

    fn recent(&self, txid: &Txid, category: EventCategory) -> Option<TransactionEvent> {
        lock(&self.inner.recent)
            .iter()
            .find(|(c, event)| *c == category && &event.txid == txid)
            .map(|(_, event)| event.clone())
    }

    /// Events delivered so far, oldest first, bounded
    pub fn recent_events(&self) -> Vec<TransactionEvent> {
        let recent = lock(&self.inner.recent);
        let mut events: Vec<TransactionEvent> = Vec::new();
        for (_, event) in recent.iter() {
            if !events.iter().any(|e| e.txid == event.txid) {
                events.push(event.clone());
            }
        }
        events
    }
}

async fn listen(inner: Arc<Inner>, mut receiver: EventReceiver) {
    while let Some(raw) = receiver.recv().await {
        let secure = inner.secure.load(Ordering::SeqCst);
        let txid = raw.txid.clone();

        match inner.process(raw, secure).await {
            Ok(Some(event)) => inner.dispatch(event),
            Ok(None) => log::trace!("Event {} does not touch the wallet", txid),
            Err(e) => log::warn!("Skipping event {}: {}", txid, e),
        }
    }

    if *inner.state.borrow() == NotifierState::Active {
        log::warn!("Event transport disconnected");
        let error = NotifierError::TransportDisconnected;
        inner.state.send_replace(NotifierState::Error(error.clone()));
        let callbacks: Vec<ErrorCallback> = lock(&inner.error_callbacks).clone();
        for callback in callbacks {
            callback(&error);
        }
    }
}

impl Inner {
    /// Validate a raw event and match it against the watched addresses
    async fn process(
        &self,
        raw: RawTransactionEvent,
        secure: bool,
    ) -> Result<Option<TransactionEvent>, SkipReason> {
        let txid = Txid::from_str(&raw.txid)
            .map_err(|e| SkipReason::Malformed(format!("bad txid: {}", e)))?;

        let relayed = match &raw.hex {
            Some(hex) => {
                let tx: Transaction = deserialize_hex(hex)
                    .map_err(|e| SkipReason::Malformed(format!("bad transaction hex: {}", e)))?;
                if tx.compute_txid() != txid {
                    return Err(SkipReason::Malformed(format!(
                        "hex encodes {} not {}",
                        tx.compute_txid(),
                        txid
                    )));
                }
                Some(tx)
            }
            None => None,
        };

        let (tx, addresses) = if secure {
            let tx = self
                .chain
                .get_transaction(&txid)
                .await
                .map_err(|e| SkipReason::Unverifiable(e.to_string()))?;
            let addresses = self.derive_addresses(&tx).await?;
            (tx, addresses)
        } else {
            let tx = relayed.ok_or_else(|| {
                SkipReason::Malformed("unsecure delivery needs the transaction hex".to_string())
            })?;
            (tx, raw.addresses)
        };

        let touched: Vec<String> = addresses
            .into_iter()
            .filter(|a| self.watched.contains(a))
            .collect();
        if touched.is_empty() {
            return Ok(None);
        }

        Ok(Some(TransactionEvent {
            txid,
            tx_hex: serialize_hex(&tx),
            addresses: touched,
            colored: Payload::find_in(&tx).is_some_and(|p| p.is_ok()),
            secure,
            received_at: Utc::now(),
        }))
    }

    /// Addresses paid by the outputs and spent by the inputs of `tx`
    async fn derive_addresses(&self, tx: &Transaction) -> Result<Vec<String>, SkipReason> {
        let mut addresses: Vec<String> = Vec::new();
        let mut push = |script: &bitcoin::Script| {
            if let Ok(address) = Address::from_script(script, self.network) {
                let address = address.to_string();
                if !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
        };

        for output in &tx.output {
            push(&output.script_pubkey);
        }
        if !tx.is_coinbase() {
            for input in &tx.input {
                let prev = input.previous_output;
                let parent = self
                    .chain
                    .get_transaction(&prev.txid)
                    .await
                    .map_err(|e| SkipReason::Unverifiable(e.to_string()))?;
                if let Some(spent) = parent.output.get(prev.vout as usize) {
                    push(&spent.script_pubkey);
                }
            }
        }
        Ok(addresses)
    }

    fn dispatch(&self, event: TransactionEvent) {
        let mut categories = vec![EventCategory::NewTransaction];
        if event.colored {
            categories.push(EventCategory::NewColoredTransaction);
        }

        {
            let mut recent = lock(&self.recent);
            for category in &categories {
                if recent.len() >= RECENT_EVENTS_CAPACITY {
                    recent.pop_front();
                }
                recent.push_back((*category, event.clone()));
            }
        }

        let callbacks: Vec<EventCallback> = lock(&self.subscriptions)
            .iter()
            .filter(|s| categories.contains(&s.category))
            .map(|s| Arc::clone(&s.callback))
            .collect();

        log::debug!(
            "Delivering {} to {} subscribers ({})",
            event.txid,
            callbacks.len(),
            if event.secure { "secure" } else { "unsecure" }
        );
        for callback in callbacks {
            callback(&event);
        }
        for category in categories {
            let _ = self.delivered.send((category, event.clone()));
        }
    }
}
