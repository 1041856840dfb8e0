//! Realtime change feed.
//!
//! Record changes arrive per collection and are fanned out to registered
//! handlers through a [`Hub`]. Transports ([`client::RealtimeClient`] over
//! server-sent events, or the in-memory store) push events into the hub;
//! consumers only ever see the [`Realtime`] trait.

pub mod client;
pub mod connection;
pub mod sse;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

/// Kind of change carried by a record event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Create,
    Update,
    Delete,
    /// Anything the server sends that we do not act on.
    #[serde(other)]
    Unknown,
}

impl EventAction {
    /// Whether the event changes the contents of a listed collection.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, EventAction::Unknown)
    }
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent {
    pub action: EventAction,
    #[serde(default)]
    pub record: serde_json::Value,
}

impl RecordEvent {
    pub fn new(action: EventAction, record: serde_json::Value) -> Self {
        Self { action, record }
    }

    /// Id of the changed record, if present.
    pub fn record_id(&self) -> Option<&str> {
        self.record.get("id").and_then(|v| v.as_str())
    }

    /// Collection name stamped on the record by the server, if present.
    pub fn collection(&self) -> Option<&str> {
        self.record.get("collectionName").and_then(|v| v.as_str())
    }
}

/// Channel health for one collection, as reported by the transport.
///
/// `Dropped` is sent when the stream carrying `collection` is lost and
/// `Restored` once the server has accepted the subscription again. Events in
/// between are missed, so consumers reload on `Restored`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Dropped { collection: String },
    Restored { collection: String },
}

impl ChannelSignal {
    pub fn collection(&self) -> &str {
        match self {
            ChannelSignal::Dropped { collection } | ChannelSignal::Restored { collection } => {
                collection
            }
        }
    }
}

/// Callback invoked for every event on a watched collection.
pub type EventHandler = Arc<dyn Fn(&RecordEvent) + Send + Sync>;

/// A source of per-collection change events.
pub trait Realtime: Send + Sync {
    /// Register `handler` for `collection`. The registration lives until the
    /// returned handle is closed or dropped.
    fn watch(&self, collection: &str, handler: EventHandler) -> SubscriptionHandle;

    /// Loss and restoration of collection channels.
    fn signals(&self) -> broadcast::Receiver<ChannelSignal>;
}

struct Registration {
    id: u64,
    active: Arc<AtomicBool>,
    handler: EventHandler,
}

struct HubInner {
    handlers: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
    topics: watch::Sender<BTreeSet<String>>,
    signals: broadcast::Sender<ChannelSignal>,
}

impl HubInner {
    fn remove(&self, collection: &str, id: u64) {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(list) = handlers.get_mut(collection) else {
            return;
        };
        list.retain(|r| r.id != id);
        if list.is_empty() {
            handlers.remove(collection);
            self.topics.send_replace(handlers.keys().cloned().collect());
            tracing::debug!(collection, "last handler removed, topic released");
        }
    }
}

/// Fan-out point between a transport and its subscribers.
///
/// Cloning a hub yields another handle to the same registrations.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (topics, _) = watch::channel(BTreeSet::new());
        let (signals, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(HubInner {
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                topics,
                signals,
            }),
        }
    }

    /// Deliver an event to every live handler of `collection`.
    ///
    /// Handlers run outside the registry lock, so a handler may register or
    /// close subscriptions. Returns how many handlers were invoked.
    pub fn dispatch(&self, collection: &str, event: &RecordEvent) -> usize {
        let targets: Vec<(Arc<AtomicBool>, EventHandler)> = {
            let handlers = self.inner.handlers.lock().unwrap_or_else(|e| e.into_inner());
            match handlers.get(collection) {
                Some(list) => list
                    .iter()
                    .map(|r| (Arc::clone(&r.active), Arc::clone(&r.handler)))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (active, handler) in targets {
            // A handle closed after the snapshot must not see the event.
            if active.load(Ordering::SeqCst) {
                handler(event);
                delivered += 1;
            }
        }
        tracing::trace!(collection, action = ?event.action, delivered, "event dispatched");
        delivered
    }

    /// Collections that currently have at least one handler.
    pub fn topics(&self) -> watch::Receiver<BTreeSet<String>> {
        self.inner.topics.subscribe()
    }

    pub fn active_collections(&self) -> Vec<String> {
        self.inner.topics.borrow().iter().cloned().collect()
    }

    pub fn handler_count(&self, collection: &str) -> usize {
        let handlers = self.inner.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.get(collection).map(Vec::len).unwrap_or(0)
    }

    /// Tell subscribers that every active channel dropped.
    pub fn report_dropped(&self) {
        for collection in self.active_collections() {
            tracing::debug!(collection = %collection, "reporting dropped channel");
            self.signal(ChannelSignal::Dropped { collection });
        }
    }

    /// Tell subscribers that the server accepted `collections` again.
    pub fn report_restored<'a>(&self, collections: impl IntoIterator<Item = &'a String>) {
        for collection in collections {
            tracing::debug!(collection = %collection, "reporting restored channel");
            self.signal(ChannelSignal::Restored {
                collection: collection.clone(),
            });
        }
    }

    fn signal(&self, signal: ChannelSignal) {
        // No receivers simply means nobody is listening.
        let _ = self.inner.signals.send(signal);
    }
}

impl Realtime for Hub {
    fn watch(&self, collection: &str, handler: EventHandler) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let active = Arc::new(AtomicBool::new(true));
        {
            let mut handlers = self.inner.handlers.lock().unwrap_or_else(|e| e.into_inner());
            let list = handlers.entry(collection.to_string()).or_default();
            let first = list.is_empty();
            list.push(Registration {
                id,
                active: Arc::clone(&active),
                handler,
            });
            if first {
                self.inner
                    .topics
                    .send_replace(handlers.keys().cloned().collect());
            }
        }
        tracing::debug!(collection, id, "handler registered");
        SubscriptionHandle {
            id,
            collection: collection.to_string(),
            active,
            hub: Arc::downgrade(&self.inner),
        }
    }

    fn signals(&self) -> broadcast::Receiver<ChannelSignal> {
        self.inner.signals.subscribe()
    }
}

/// Live registration of one handler. Closing is idempotent and also
/// happens on drop.
pub struct SubscriptionHandle {
    id: u64,
    collection: String,
    active: Arc<AtomicBool>,
    hub: Weak<HubInner>,
}

impl SubscriptionHandle {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop delivery to this handler. Events already being dispatched when
    /// this returns are not delivered.
    pub fn close(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.collection, self.id);
        }
        tracing::debug!(collection = %self.collection, id = self.id, "handler closed");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("collection", &self.collection)
            .field("active", &self.is_active())
            .finish()
    }
}
