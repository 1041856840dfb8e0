//! Live table over one collection.
//!
//! Holds filter, sort and paging state, fetches pages through the query
//! translator, and reloads whenever the watched collection changes.
//! Responses that arrive after a newer request has already been applied are
//! discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::api::{self, COMMENT_EXPAND, COMMENT_PAGE_SIZE, TASK_EXPAND};
use crate::models::{COMMENT_COLLECTION, Comment, ListResult, TASK_COLLECTION, Task};
use crate::notify::Notifier;
use crate::query::{
    DEFAULT_PAGE_SIZE, FieldRegistry, FilterParams, ListQuery, SortParams, build_list_query,
};
use crate::realtime::Realtime;
use crate::store::RecordStore;
use crate::sync::subscription::{RefreshFn, SubscriptionManager};

/// Orders requests so only the newest response is applied.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl RequestSequencer {
    /// Number the next request.
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether the response to request `seq` may be applied. Accepting a
    /// sequence number rejects every older one from then on.
    pub fn accept(&self, seq: u64) -> bool {
        self.applied.fetch_max(seq, Ordering::SeqCst) < seq
    }
}

/// Filter, sort and paging state of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableState {
    pub filters: FilterParams,
    pub sort: SortParams,
    pub page: u32,
    pub page_size: u32,
}

impl Default for TableState {
    fn default() -> Self {
        Self {
            filters: FilterParams::new(),
            sort: SortParams::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// A live, paged view of one collection.
pub struct TableController<T> {
    store: Arc<dyn RecordStore>,
    collection: String,
    registry: &'static FieldRegistry,
    expand: Option<String>,
    notifier: Notifier,
    state: Mutex<TableState>,
    sequencer: RequestSequencer,
    rows: watch::Sender<ListResult<T>>,
    subscription: Arc<SubscriptionManager>,
}

impl<T> TableController<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<dyn RecordStore>,
        realtime: Arc<dyn Realtime>,
        collection: &str,
        registry: &'static FieldRegistry,
        expand: Option<&str>,
        notifier: Notifier,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let refresh: RefreshFn = Arc::new(move || spawn_reload(&weak));
            let (rows, _) = watch::channel(ListResult::default());
            Self {
                store,
                collection: collection.to_string(),
                registry,
                expand: expand.map(str::to_string),
                notifier,
                state: Mutex::new(TableState::default()),
                sequencer: RequestSequencer::default(),
                rows,
                subscription: Arc::new(SubscriptionManager::new(realtime, refresh)),
            }
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn state(&self) -> TableState {
        self.lock_state().clone()
    }

    /// Latest applied rows.
    pub fn rows(&self) -> ListResult<T> {
        self.rows.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListResult<T>> {
        self.rows.subscribe()
    }

    pub fn set_filters(&self, filters: FilterParams) {
        let mut state = self.lock_state();
        state.filters = filters;
        state.page = 1;
    }

    pub fn set_sort(&self, sort: SortParams) {
        self.lock_state().sort = sort;
    }

    pub fn set_page(&self, page: u32, page_size: u32) {
        let mut state = self.lock_state();
        state.page = page.max(1);
        state.page_size = page_size.max(1);
    }

    /// The request the current state translates to.
    pub fn query(&self) -> ListQuery {
        let state = self.lock_state();
        build_list_query(
            self.registry,
            state.page,
            state.page_size,
            &state.filters,
            &state.sort,
            self.expand.as_deref(),
        )
    }

    /// Fetch the current page and apply it unless a newer response already
    /// was. Failures yield an empty, unsuccessful result and an error notice.
    pub async fn reload(&self) -> ListResult<T> {
        let seq = self.sequencer.issue();
        let query = self.query();
        let result = match api::fetch_page::<T>(&*self.store, &self.collection, &query).await {
            Ok(page) => ListResult::from_page(page),
            Err(e) => {
                tracing::warn!(collection = %self.collection, error = %e, "reload failed");
                self.notifier
                    .error(format!("Failed to fetch {}", self.collection));
                ListResult::failed()
            }
        };
        if self.sequencer.accept(seq) {
            self.rows.send_replace(result.clone());
        } else {
            tracing::debug!(collection = %self.collection, seq, "discarding stale response");
        }
        result
    }

    /// Keep the rows live: watch the collection, recover from dropped
    /// channels, and load once.
    pub async fn start(self: &Arc<Self>) -> ListResult<T> {
        self.subscription.watch(&self.collection);
        self.subscription.listen_for_signals();
        self.reload().await
    }

    /// Stop live updates. Rows keep their last value.
    pub fn teardown(&self) {
        self.subscription.unwatch();
    }

    pub fn is_live(&self) -> bool {
        self.subscription.watched().is_some()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn spawn_reload<T>(weak: &Weak<TableController<T>>)
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let Some(table) = weak.upgrade() else { return };
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                table.reload().await;
            });
        }
        Err(_) => tracing::warn!(collection = %table.collection, "no runtime, refresh skipped"),
    }
}

/// Task table: assignee expanded.
pub fn task_table(
    store: Arc<dyn RecordStore>,
    realtime: Arc<dyn Realtime>,
    notifier: Notifier,
) -> Arc<TableController<Task>> {
    TableController::new(
        store,
        realtime,
        TASK_COLLECTION,
        FieldRegistry::tasks(),
        Some(TASK_EXPAND),
        notifier,
    )
}

/// Live comment feed of one task: authors expanded, one large page.
pub fn comment_feed(
    store: Arc<dyn RecordStore>,
    realtime: Arc<dyn Realtime>,
    notifier: Notifier,
    task_id: &str,
) -> Arc<TableController<Comment>> {
    let table = TableController::new(
        store,
        realtime,
        COMMENT_COLLECTION,
        FieldRegistry::comments(),
        Some(COMMENT_EXPAND),
        notifier,
    );
    table.set_filters(api::comments_filter(task_id));
    table.set_page(1, COMMENT_PAGE_SIZE);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::query::SortDirection;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_demo().unwrap();
        store
    }

    #[test]
    fn test_sequencer_rejects_older_responses() {
        let seq = RequestSequencer::default();
        let first = seq.issue();
        let second = seq.issue();
        assert!(seq.accept(second));
        assert!(!seq.accept(first));
        let third = seq.issue();
        assert!(seq.accept(third));
    }

    #[test]
    fn test_query_reflects_state() {
        let store = seeded();
        let table = task_table(store.clone(), store, Notifier::new());
        table.set_filters(FilterParams::new().with("status", "pending"));
        table.set_sort(SortParams::new().with("timer", SortDirection::Descending));
        table.set_page(2, 10);
        let query = table.query();
        assert_eq!(query.filter.as_deref(), Some("status='pending'"));
        assert_eq!(query.sort.as_deref(), Some("-timer"));
        assert_eq!(query.expand.as_deref(), Some("assignedTo"));
        assert_eq!((query.page, query.per_page), (2, 10));
    }

    #[test]
    fn test_new_filters_reset_page() {
        let store = seeded();
        let table = task_table(store.clone(), store, Notifier::new());
        table.set_page(3, 5);
        table.set_filters(FilterParams::new());
        assert_eq!(table.state().page, 1);
    }

    #[tokio::test]
    async fn test_reload_applies_rows() {
        let store = seeded();
        let table = task_table(store.clone(), store, Notifier::new());
        table.set_page(1, 2);
        let result = table.reload().await;
        assert!(result.success);
        assert_eq!(result.total, 4);
        assert_eq!(table.rows().data.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_yields_failed_result() {
        let store = seeded();
        store.fail_lists(true);
        let notifier = Notifier::new();
        let table: Arc<TableController<User>> = TableController::new(
            store.clone(),
            store,
            "users",
            FieldRegistry::users(),
            None,
            notifier.clone(),
        );
        let result = table.reload().await;
        assert_eq!(result, ListResult::failed());
        assert!(!table.rows().success);
        assert_eq!(notifier.latest().unwrap().message, "Failed to fetch users");
    }

    #[tokio::test]
    async fn test_stale_response_discarded() {
        let store = seeded();
        let table = task_table(store.clone(), store.clone(), Notifier::new());
        store.delay_lists([Duration::from_millis(150), Duration::ZERO]);

        let slow = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table.set_filters(FilterParams::new().with("status", "pending"));
                table.reload().await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        table.set_filters(FilterParams::new().with("status", "completed"));
        let fast = table.reload().await;
        let slow = slow.await.unwrap();

        assert_eq!(slow.total, 2);
        assert_eq!(fast.total, 1);
        assert_eq!(table.rows(), fast);
    }
}
