//! Typed requests over a [`RecordStore`].
//!
//! List fetches never fail outward: an error becomes an empty, unsuccessful
//! [`ListResult`] plus an error notice. Mutations return `Result` and report
//! both outcomes through the notifier.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{
    COMMENT_COLLECTION, Comment, ListResult, RecordPage, SelectOption, TASK_COLLECTION, Task,
    USER_COLLECTION, User, timefmt,
};
use crate::notify::Notifier;
use crate::query::{FieldRegistry, FilterParams, ListQuery, SortParams, build_list_query};
use crate::store::RecordStore;
use crate::{Error, Result};

/// Relation expanded on every task fetch.
pub const TASK_EXPAND: &str = "assignedTo";

/// Relation expanded on every comment fetch.
pub const COMMENT_EXPAND: &str = "user";

/// Comments are loaded as one page of this size.
pub const COMMENT_PAGE_SIZE: u32 = 500;

/// User list size when building select options.
const USER_OPTIONS_PAGE_SIZE: u32 = 500;

/// Fetch one page and decode every record.
pub async fn fetch_page<T: DeserializeOwned>(
    store: &dyn RecordStore,
    collection: &str,
    query: &ListQuery,
) -> Result<RecordPage<T>> {
    store
        .list(collection, query)
        .await?
        .try_map(|v| serde_json::from_value::<T>(v).map_err(Error::from))
}

async fn fetch_list<T: DeserializeOwned>(
    store: &dyn RecordStore,
    notifier: &Notifier,
    collection: &str,
    query: &ListQuery,
    what: &str,
) -> ListResult<T> {
    match fetch_page(store, collection, query).await {
        Ok(page) => ListResult::from_page(page),
        Err(e) => {
            tracing::warn!(collection, error = %e, "list fetch failed");
            notifier.error(format!("Failed to fetch {}", what));
            ListResult::failed()
        }
    }
}

/// One page of tasks with the assignee expanded.
pub async fn fetch_tasks(
    store: &dyn RecordStore,
    notifier: &Notifier,
    filters: &FilterParams,
    sort: &SortParams,
    page: u32,
    page_size: u32,
) -> ListResult<Task> {
    let query = build_list_query(
        FieldRegistry::tasks(),
        page,
        page_size,
        filters,
        sort,
        Some(TASK_EXPAND),
    );
    fetch_list(store, notifier, TASK_COLLECTION, &query, "tasks").await
}

pub async fn fetch_task(store: &dyn RecordStore, id: &str) -> Result<Task> {
    let value = store.get_one(TASK_COLLECTION, id, Some(TASK_EXPAND)).await?;
    Ok(serde_json::from_value(value)?)
}

/// Apply a partial update to a task.
pub async fn update_task(
    store: &dyn RecordStore,
    notifier: &Notifier,
    id: &str,
    patch: Value,
) -> Result<Task> {
    match store.update(TASK_COLLECTION, id, patch).await {
        Ok(value) => {
            let task: Task = serde_json::from_value(value)?;
            notifier.success("Task updated");
            Ok(task)
        }
        Err(e) => {
            notifier.error("Failed to update task");
            Err(e)
        }
    }
}

/// Delete several tasks concurrently. Every delete is attempted; the first
/// failure is returned after all have settled.
pub async fn delete_tasks(
    store: &dyn RecordStore,
    notifier: &Notifier,
    ids: &[String],
) -> Result<usize> {
    let results = join_all(ids.iter().map(|id| store.delete(TASK_COLLECTION, id))).await;

    let mut deleted = 0;
    let mut first_error = None;
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(()) => deleted += 1,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "delete failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        None => {
            notifier.success(format!("Deleted {} task(s)", deleted));
            Ok(deleted)
        }
        Some(e) => {
            notifier.error("Failed to delete tasks");
            Err(e)
        }
    }
}

/// Body of a timer persist.
///
/// Starting sends only `startTime`; stopping sends the new total and clears
/// `startTime` with an explicit null.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<u64>,
    #[serde(with = "timefmt::timestamp")]
    pub start_time: Option<DateTime<Utc>>,
}

impl TimerPatch {
    pub fn start(at: DateTime<Utc>) -> Self {
        Self {
            timer: None,
            start_time: Some(at),
        }
    }

    pub fn stop(total: u64) -> Self {
        Self {
            timer: Some(total),
            start_time: None,
        }
    }
}

/// Persist a timer transition. Returns the task as stored.
pub async fn update_task_timer(
    store: &dyn RecordStore,
    id: &str,
    patch: &TimerPatch,
) -> Result<Task> {
    let value = store
        .update(TASK_COLLECTION, id, serde_json::to_value(patch)?)
        .await?;
    Ok(serde_json::from_value(value)?)
}

/// All comments on a task, with authors expanded.
pub async fn fetch_comments(
    store: &dyn RecordStore,
    notifier: &Notifier,
    task_id: &str,
) -> ListResult<Comment> {
    let query = comments_query(task_id);
    fetch_list(store, notifier, COMMENT_COLLECTION, &query, "comments").await
}

pub(crate) fn comments_query(task_id: &str) -> ListQuery {
    build_list_query(
        FieldRegistry::comments(),
        1,
        COMMENT_PAGE_SIZE,
        &comments_filter(task_id),
        &SortParams::new(),
        Some(COMMENT_EXPAND),
    )
}

pub(crate) fn comments_filter(task_id: &str) -> FilterParams {
    FilterParams::new().with("todo", task_id)
}

/// Post a comment. Blank content is rejected before any request is made.
pub async fn create_comment(
    store: &dyn RecordStore,
    notifier: &Notifier,
    task_id: &str,
    user_id: &str,
    content: &str,
) -> Result<Comment> {
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::InvalidInput("comment content is empty".to_string()));
    }
    let comment = Comment {
        id: String::new(),
        todo: task_id.to_string(),
        user: user_id.to_string(),
        content: content.to_string(),
        created: None,
        expand: Default::default(),
    };
    match store
        .create(COMMENT_COLLECTION, serde_json::to_value(&comment)?)
        .await
    {
        Ok(value) => {
            notifier.success("Comment added");
            Ok(serde_json::from_value(value)?)
        }
        Err(e) => {
            notifier.error("Failed to add comment");
            Err(e)
        }
    }
}

/// One page of users.
pub async fn fetch_users(
    store: &dyn RecordStore,
    notifier: &Notifier,
    filters: &FilterParams,
    sort: &SortParams,
    page: u32,
    page_size: u32,
) -> ListResult<User> {
    let query = build_list_query(FieldRegistry::users(), page, page_size, filters, sort, None);
    fetch_list(store, notifier, USER_COLLECTION, &query, "users").await
}

/// Every user as a select option (name shown, id submitted). Empty on
/// failure.
pub async fn get_all_users(store: &dyn RecordStore) -> Vec<SelectOption> {
    let query = ListQuery::new(1, USER_OPTIONS_PAGE_SIZE).sort("+name");
    match fetch_page::<User>(store, USER_COLLECTION, &query).await {
        Ok(page) => page
            .items
            .into_iter()
            .map(|u| SelectOption {
                label: u.name,
                value: u.id,
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load user options");
            Vec::new()
        }
    }
}
