//! In-process record store.
//!
//! Understands the same filter and sort expressions the query translator
//! produces, publishes a realtime event for every mutation, and can be told
//! to fail or stall requests so controller behavior can be exercised.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::models::timefmt::{format_timestamp, parse_date, parse_timestamp};
use crate::models::{COMMENT_COLLECTION, RecordPage, TASK_COLLECTION, USER_COLLECTION};
use crate::query::ListQuery;
use crate::realtime::{
    ChannelSignal, EventAction, EventHandler, Hub, Realtime, RecordEvent, SubscriptionHandle,
};
use crate::store::RecordStore;
use crate::{Error, Result};

/// Relation fields and the collection they point into.
const RELATIONS: &[(&str, &str, &str)] = &[
    (TASK_COLLECTION, "assignedTo", USER_COLLECTION),
    (TASK_COLLECTION, "owner", USER_COLLECTION),
    (COMMENT_COLLECTION, "user", USER_COLLECTION),
    (COMMENT_COLLECTION, "todo", TASK_COLLECTION),
];

/// Length of generated record ids.
const ID_LEN: usize = 15;

pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Map<String, Value>>>>,
    hub: Hub,
    clock: Arc<dyn Clock>,
    failing_updates: AtomicU32,
    failing_lists: AtomicBool,
    list_delays: Mutex<VecDeque<Duration>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Stamp `created`/`updated` from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            hub: Hub::new(),
            clock,
            failing_updates: AtomicU32::new(0),
            failing_lists: AtomicBool::new(false),
            list_delays: Mutex::new(VecDeque::new()),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Make the next `n` updates fail with a server error.
    pub fn fail_updates(&self, n: u32) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    /// Make every list request fail until turned off.
    pub fn fail_lists(&self, on: bool) {
        self.failing_lists.store(on, Ordering::SeqCst);
    }

    /// Delay upcoming list requests, one entry per request in order.
    pub fn delay_lists(&self, delays: impl IntoIterator<Item = Duration>) {
        let mut queue = self.list_delays.lock().unwrap_or_else(|e| e.into_inner());
        queue.extend(delays);
    }

    /// Insert a record without going through the async API.
    ///
    /// Publishes a create event like [`RecordStore::create`].
    pub fn insert(&self, collection: &str, body: Value) -> Result<Value> {
        let Value::Object(mut record) = body else {
            return Err(Error::InvalidInput(format!(
                "record for {} must be a JSON object",
                collection
            )));
        };
        let now = self.stamp();
        let has_id = record
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        if !has_id {
            record.insert("id".to_string(), Value::String(new_id()));
        }
        record.insert(
            "collectionName".to_string(),
            Value::String(collection.to_string()),
        );
        record.insert("created".to_string(), Value::String(now.clone()));
        record.insert("updated".to_string(), Value::String(now));

        {
            let mut collections = self.lock();
            let rows = collections.entry(collection.to_string()).or_default();
            let id = record.get("id").cloned();
            if rows.iter().any(|r| r.get("id") == id.as_ref()) {
                return Err(Error::Store {
                    status: 400,
                    message: format!("duplicate id in {}", collection),
                });
            }
            rows.push(record.clone());
        }

        let stored = Value::Object(record);
        self.publish(collection, EventAction::Create, stored.clone());
        Ok(stored)
    }

    /// Number of records in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.lock().get(collection).map(Vec::len).unwrap_or(0)
    }

    /// Populate a small task board.
    pub fn seed_demo(&self) -> Result<()> {
        self.insert(
            USER_COLLECTION,
            json!({"id": "u_ada", "name": "Ada", "username": "ada", "email": "ada@example.com", "role": "admin"}),
        )?;
        self.insert(
            USER_COLLECTION,
            json!({"id": "u_lin", "name": "Lin", "username": "lin", "email": "lin@example.com", "role": "developer"}),
        )?;
        let tasks = [
            ("t_api", "Design API", "in-progress", "2024-01-02", "2024-01-20", 5400, "u_ada"),
            ("t_ui", "Build table view", "pending", "2024-01-10", "2024-02-01", 0, "u_lin"),
            ("t_docs", "Write docs", "completed", "2024-01-01", "2024-01-05", 75, "u_lin"),
            ("t_sync", "Realtime sync", "pending", "2024-02-01", "2024-02-15", 3720, "u_ada"),
        ];
        for (id, title, status, start, end, timer, assignee) in tasks {
            self.insert(
                TASK_COLLECTION,
                json!({
                    "id": id,
                    "title": title,
                    "description": "",
                    "status": status,
                    "startDate": start,
                    "endDate": end,
                    "timer": timer,
                    "startTime": "",
                    "assignedTo": assignee,
                    "owner": "u_ada",
                }),
            )?;
        }
        self.insert(
            COMMENT_COLLECTION,
            json!({"todo": "t_api", "user": "u_lin", "content": "Should list pages be 5 rows?"}),
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Map<String, Value>>>> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stamp(&self) -> String {
        format_timestamp(&self.clock.now())
    }

    fn publish(&self, collection: &str, action: EventAction, record: Value) {
        self.hub
            .dispatch(collection, &RecordEvent::new(action, record));
    }

    fn expand(&self, collection: &str, record: &mut Map<String, Value>, expand: Option<&str>) {
        let Some(expand) = expand else { return };
        let collections = self.lock();
        let mut expanded = Map::new();
        for field in expand.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let Some((_, _, target)) = RELATIONS
                .iter()
                .find(|(c, f, _)| *c == collection && *f == field)
            else {
                continue;
            };
            let Some(id) = record.get(field).and_then(Value::as_str) else {
                continue;
            };
            let related = collections
                .get(*target)
                .and_then(|rows| rows.iter().find(|r| r.get("id").and_then(Value::as_str) == Some(id)));
            if let Some(related) = related {
                expanded.insert(field.to_string(), Value::Object(related.clone()));
            }
        }
        if !expanded.is_empty() {
            record.insert("expand".to_string(), Value::Object(expanded));
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<RecordPage<Value>> {
        let delay = self
            .list_delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_lists.load(Ordering::SeqCst) {
            return Err(Error::Store {
                status: 500,
                message: "list failed".to_string(),
            });
        }

        let clauses = match query.filter.as_deref() {
            Some(filter) => parse_filter(filter)?,
            None => Vec::new(),
        };
        let keys = query.sort.as_deref().map(parse_sort).unwrap_or_default();

        let mut rows: Vec<Map<String, Value>> = self
            .lock()
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|r| clauses.iter().all(|c| c.matches(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            for (field, descending) in &keys {
                let ord = compare_values(a.get(field), b.get(field));
                let ord = if *descending { ord.reverse() } else { ord };
                if ord != CmpOrdering::Equal {
                    return ord;
                }
            }
            CmpOrdering::Equal
        });

        let per_page = query.per_page.max(1) as usize;
        let total_items = rows.len();
        let total_pages = total_items.div_ceil(per_page);
        let start = (query.page.max(1) as usize - 1) * per_page;
        let mut items = Vec::new();
        for mut row in rows.into_iter().skip(start).take(per_page) {
            self.expand(collection, &mut row, query.expand.as_deref());
            items.push(Value::Object(row));
        }

        Ok(RecordPage {
            page: query.page.max(1),
            per_page: per_page as u32,
            total_items: total_items as u64,
            total_pages: total_pages as u32,
            items,
        })
    }

    async fn get_one(&self, collection: &str, id: &str, expand: Option<&str>) -> Result<Value> {
        let mut record = self
            .lock()
            .get(collection)
            .and_then(|rows| rows.iter().find(|r| r.get("id").and_then(Value::as_str) == Some(id)))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{}/{}", collection, id)))?;
        self.expand(collection, &mut record, expand);
        Ok(Value::Object(record))
    }

    async fn create(&self, collection: &str, body: Value) -> Result<Value> {
        self.insert(collection, body)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value> {
        let failing = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Store {
                status: 500,
                message: "update failed".to_string(),
            });
        }
        let Value::Object(patch) = patch else {
            return Err(Error::InvalidInput("update body must be a JSON object".to_string()));
        };

        let now = self.stamp();
        let stored = {
            let mut collections = self.lock();
            let record = collections
                .get_mut(collection)
                .and_then(|rows| {
                    rows.iter_mut()
                        .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
                })
                .ok_or_else(|| Error::NotFound(format!("{}/{}", collection, id)))?;
            for (key, value) in patch {
                if matches!(key.as_str(), "id" | "collectionName" | "created" | "expand") {
                    continue;
                }
                record.insert(key, value);
            }
            record.insert("updated".to_string(), Value::String(now));
            Value::Object(record.clone())
        };

        self.publish(collection, EventAction::Update, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let removed = {
            let mut collections = self.lock();
            let rows = collections
                .get_mut(collection)
                .ok_or_else(|| Error::NotFound(format!("{}/{}", collection, id)))?;
            let pos = rows
                .iter()
                .position(|r| r.get("id").and_then(Value::as_str) == Some(id))
                .ok_or_else(|| Error::NotFound(format!("{}/{}", collection, id)))?;
            rows.remove(pos)
        };
        self.publish(collection, EventAction::Delete, Value::Object(removed));
        Ok(())
    }
}

impl Realtime for MemoryStore {
    fn watch(&self, collection: &str, handler: EventHandler) -> SubscriptionHandle {
        self.hub.watch(collection, handler)
    }

    fn signals(&self) -> broadcast::Receiver<ChannelSignal> {
        self.hub.signals()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..ID_LEN].to_string()
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Eq(String, String),
    AtLeast(String, DateTime<Utc>),
    AtMost(String, DateTime<Utc>),
}

impl Clause {
    fn matches(&self, record: &Map<String, Value>) -> bool {
        match self {
            Clause::Eq(field, value) => match record.get(field) {
                Some(Value::String(s)) => s == value,
                Some(Value::Null) | None => value.is_empty(),
                Some(other) => other.to_string() == *value,
            },
            Clause::AtLeast(field, bound) => {
                record_instant(record, field).is_some_and(|t| t >= *bound)
            }
            Clause::AtMost(field, bound) => {
                record_instant(record, field).is_some_and(|t| t <= *bound)
            }
        }
    }
}

fn parse_filter(filter: &str) -> Result<Vec<Clause>> {
    split_outside_quotes(filter, " && ")
        .into_iter()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(parse_clause)
        .collect()
}

fn parse_clause(clause: &str) -> Result<Clause> {
    let invalid = || Error::Store {
        status: 400,
        message: format!("invalid filter clause: {}", clause),
    };
    let (field, op, value) = split_operator(clause).ok_or_else(invalid)?;
    let field = field.trim().to_string();
    match op {
        ">=" => Ok(Clause::AtLeast(field, instant(&unquote(value)).ok_or_else(invalid)?)),
        "<=" => Ok(Clause::AtMost(field, instant(&unquote(value)).ok_or_else(invalid)?)),
        _ => Ok(Clause::Eq(field, unquote(value))),
    }
}

/// Split `text` on `separator`, ignoring separators inside quoted literals.
fn split_outside_quotes<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if i < start {
            continue;
        }
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => quote = Some(c),
            None if text[i..].starts_with(separator) => {
                parts.push(&text[start..i]);
                start = i + separator.len();
            }
            None => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// `field op value` split at the first `>=`, `<=` or `=` outside quotes.
fn split_operator(clause: &str) -> Option<(&str, &str, &str)> {
    let mut quote: Option<char> = None;
    for (i, c) in clause.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '>' | '<' if clause[i + 1..].starts_with('=') => {
                    return Some((&clause[..i], &clause[i..i + 2], &clause[i + 2..]));
                }
                '=' => return Some((&clause[..i], "=", &clause[i + 1..])),
                _ => {}
            },
        }
    }
    None
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
        .to_string()
}

fn instant(raw: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(raw).or_else(|| {
        parse_date(raw)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

fn record_instant(record: &Map<String, Value>, field: &str) -> Option<DateTime<Utc>> {
    record.get(field).and_then(Value::as_str).and_then(instant)
}

/// `+a-b` into `[("a", false), ("b", true)]`; the flag marks descending.
fn parse_sort(sort: &str) -> Vec<(String, bool)> {
    let mut keys: Vec<(String, bool)> = Vec::new();
    for c in sort.chars() {
        match c {
            '+' => keys.push((String::new(), false)),
            '-' => keys.push((String::new(), true)),
            c => match keys.last_mut() {
                Some((field, _)) => field.push(c),
                None => keys.push((c.to_string(), false)),
            },
        }
    }
    keys.retain(|(field, _)| !field.is_empty());
    keys
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => CmpOrdering::Equal,
        (None | Some(Value::Null), _) => CmpOrdering::Less,
        (_, None | Some(Value::Null)) => CmpOrdering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
