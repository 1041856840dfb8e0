//! Keeps at most one collection watched and refreshes on change.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::realtime::{ChannelSignal, EventHandler, Realtime, RecordEvent, SubscriptionHandle};

/// Callback asked to reload the current view. Must not block.
pub type RefreshFn = Arc<dyn Fn() + Send + Sync>;

enum WatchState {
    Idle,
    Watching {
        collection: String,
        handle: SubscriptionHandle,
    },
}

/// Owns the single realtime subscription of a view.
///
/// Switching collections closes the previous handle before opening the new
/// one, so there is never more than one live handle. Every create, update
/// or delete on the watched collection triggers the refresh callback.
pub struct SubscriptionManager {
    realtime: Arc<dyn Realtime>,
    refresh: RefreshFn,
    state: Mutex<WatchState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(realtime: Arc<dyn Realtime>, refresh: RefreshFn) -> Self {
        Self {
            realtime,
            refresh,
            state: Mutex::new(WatchState::Idle),
            listener: Mutex::new(None),
        }
    }

    /// Watch `collection`. A no-op when it is already watched.
    pub fn watch(&self, collection: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let WatchState::Watching { collection: current, .. } = &*state {
            if current == collection {
                return;
            }
        }
        if let WatchState::Watching { collection: old, handle } =
            std::mem::replace(&mut *state, WatchState::Idle)
        {
            handle.close();
            tracing::debug!(collection = %old, "unwatched");
        }
        let handle = self.open(collection);
        *state = WatchState::Watching {
            collection: collection.to_string(),
            handle,
        };
        tracing::debug!(collection, "watching");
    }

    /// Close the current subscription, if any.
    pub fn unwatch(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let WatchState::Watching { collection, handle } =
            std::mem::replace(&mut *state, WatchState::Idle)
        {
            handle.close();
            tracing::debug!(collection = %collection, "unwatched");
        }
    }

    /// The collection currently watched.
    pub fn watched(&self) -> Option<String> {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            WatchState::Watching { collection, .. } => Some(collection.clone()),
            WatchState::Idle => None,
        }
    }

    /// Re-establish the subscription after its channel dropped. The new
    /// handle is opened before the old one closes so the transport keeps the
    /// topic for its next connection. No refresh happens here: the transport
    /// reports [`ChannelSignal::Restored`] once events flow again. Returns
    /// whether `collection` was the one watched.
    pub fn handle_dropped(&self, collection: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let WatchState::Watching { collection: current, handle } = &mut *state else {
            return false;
        };
        if current.as_str() != collection {
            return false;
        }
        let stale = std::mem::replace(handle, self.open(collection));
        stale.close();
        tracing::info!(collection, "subscription re-established, waiting for channel");
        true
    }

    /// Refresh once after the channel for `collection` is back, covering
    /// events missed while it was down. Returns whether `collection` was the
    /// one watched.
    pub fn handle_restored(&self, collection: &str) -> bool {
        if self.watched().as_deref() != Some(collection) {
            return false;
        }
        tracing::info!(collection, "channel restored, refreshing");
        (self.refresh)();
        true
    }

    /// Follow the transport's channel signals on the current runtime.
    /// Replaces any earlier listener.
    pub fn listen_for_signals(self: &Arc<Self>) {
        let mut signals = self.realtime.signals();
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let signal = match signals.recv().await {
                    Ok(signal) => Some(signal),
                    // Missed signals: treat whatever is watched as restored.
                    Err(RecvError::Lagged(_)) => None,
                    Err(RecvError::Closed) => break,
                };
                let Some(manager) = weak.upgrade() else { break };
                match signal {
                    Some(ChannelSignal::Dropped { collection }) => {
                        manager.handle_dropped(&collection);
                    }
                    Some(ChannelSignal::Restored { collection }) => {
                        manager.handle_restored(&collection);
                    }
                    None => {
                        if let Some(collection) = manager.watched() {
                            manager.handle_restored(&collection);
                        }
                    }
                }
            }
        });
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn open(&self, collection: &str) -> SubscriptionHandle {
        let refresh = Arc::clone(&self.refresh);
        let watched = collection.to_string();
        let handler: EventHandler = Arc::new(move |event: &RecordEvent| {
            if event.collection().is_some_and(|c| c != watched) {
                return;
            }
            if event.action.is_mutation() {
                refresh();
            }
        });
        self.realtime.watch(collection, handler)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.unwatch();
        if let Some(task) = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}
