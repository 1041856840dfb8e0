//! Command implementations for the tasktide CLI.
//!
//! Each command returns a result type implementing [`CommandResult`], printed
//! as JSON by default or as text with `-H`. Commands are organized by entity:
//! - `task_*` - list, show, toggle, watch and delete tasks
//! - `comment_*` - list and add comments on a task
//! - `user_list` - list accounts
//! - `config_show` - resolved configuration with sources
//! - `demo` - timer and live table against an in-memory store

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::api;
use crate::cli::{TaskFilterArgs, TaskUpdateArgs};
use crate::clock::{Clock, SystemClock};
use crate::config::ResolvedConfig;
use crate::format::format_seconds;
use crate::models::{Comment, ListResult, Role, TASK_COLLECTION, Task, TaskStatus, User};
use crate::notify::{HistoryEntry, Notifier};
use crate::query::{FilterParams, SortDirection, SortParams};
use crate::realtime::Realtime;
use crate::realtime::connection::ConnectionState;
use crate::store::{MemoryStore, RecordStore};
use crate::sync::{TimerController, TimerView, live_elapsed, task_table};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait CommandResult {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn to_json_string<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string())
}

/// Shared handles every command runs against.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn RecordStore>,
    pub notifier: Notifier,
    pub clock: Arc<dyn Clock>,
    pub config: ResolvedConfig,
    /// The signed-in account, if any
    pub user: Option<User>,
}

impl Services {
    pub fn new(store: Arc<dyn RecordStore>, config: ResolvedConfig) -> Self {
        Self {
            store,
            notifier: Notifier::new(),
            clock: Arc::new(SystemClock),
            config,
            user: None,
        }
    }

    pub fn with_user(mut self, user: Option<User>) -> Self {
        self.user = user;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn timer_controller(&self, verify: bool) -> TimerController {
        TimerController::new(self.store.clone(), self.clock.clone(), self.notifier.clone())
            .verify_before_toggle(verify || self.config.verify_before_toggle())
    }

    /// Turn a failed list into an error carrying the notice the fetch raised.
    fn require_success<T>(&self, result: ListResult<T>, what: &str) -> Result<ListResult<T>> {
        if result.success {
            return Ok(result);
        }
        let message = self
            .notifier
            .latest()
            .map(|n| n.message)
            .unwrap_or_else(|| format!("Failed to fetch {}", what));
        Err(Error::Other(message))
    }
}

// === Tasks ===

/// A task with its live elapsed time.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRow {
    #[serde(flatten)]
    pub task: Task,
    pub running: bool,
    pub elapsed: u64,
}

impl TaskRow {
    pub fn new(task: Task, now: DateTime<Utc>) -> Self {
        Self {
            running: task.is_running(),
            elapsed: live_elapsed(&task, now),
            task,
        }
    }

    fn line(&self) -> String {
        let marker = if self.running { "▶" } else { " " };
        let mut line = format!(
            "{} {} [{}] {} ({})",
            marker,
            self.task.id,
            self.task.status,
            self.task.title,
            format_seconds(self.elapsed)
        );
        if let Some(name) = self.task.assignee_name() {
            line.push_str(&format!(" @{}", name));
        }
        line
    }
}

/// One page of tasks.
#[derive(Debug, Clone, Serialize)]
pub struct TaskList {
    pub tasks: Vec<TaskRow>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl TaskList {
    pub fn new(result: ListResult<Task>, now: DateTime<Utc>, page: u32, page_size: u32) -> Self {
        Self {
            tasks: result
                .data
                .into_iter()
                .map(|t| TaskRow::new(t, now))
                .collect(),
            total: result.total,
            page,
            page_size,
        }
    }
}

impl CommandResult for TaskList {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.tasks.is_empty() {
            return "No tasks found.".to_string();
        }
        let pages = self.total.div_ceil(self.page_size.max(1) as u64);
        let mut lines = vec![format!(
            "{} task(s), page {} of {}:",
            self.total,
            self.page,
            pages.max(1)
        )];
        lines.extend(self.tasks.iter().map(|row| format!("  {}", row.line())));
        lines.join("\n")
    }
}

pub async fn task_list(
    services: &Services,
    filter: &TaskFilterArgs,
    page: u32,
    page_size: Option<u32>,
) -> Result<TaskList> {
    let page_size = page_size.unwrap_or(services.config.page_size());
    let result = api::fetch_tasks(
        &*services.store,
        &services.notifier,
        &filter.filters(),
        &filter.sort(),
        page,
        page_size,
    )
    .await;
    let result = services.require_success(result, "tasks")?;
    Ok(TaskList::new(result, services.clock.now(), page, page_size))
}

/// A single task in detail.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub row: TaskRow,
}

impl CommandResult for TaskDetail {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let task = &self.row.task;
        let mut lines = vec![
            format!("{} {}", task.id, task.title),
            format!("  Status:   {}", task.status),
        ];
        if let Some(name) = task.assignee_name() {
            lines.push(format!("  Assignee: {}", name));
        } else if !task.assigned_to.is_empty() {
            lines.push(format!("  Assignee: {}", task.assigned_to));
        }
        if let (Some(start), Some(end)) = (task.start_date, task.end_date) {
            lines.push(format!("  Window:   {} .. {}", start, end));
        }
        let state = if self.row.running { "running" } else { "stopped" };
        lines.push(format!(
            "  Timer:    {} ({})",
            format_seconds(self.row.elapsed),
            state
        ));
        if !task.description.is_empty() {
            lines.push(format!("  {}", task.description));
        }
        lines.join("\n")
    }
}

pub async fn task_show(services: &Services, id: &str) -> Result<TaskDetail> {
    let task = api::fetch_task(&*services.store, id).await?;
    Ok(TaskDetail {
        row: TaskRow::new(task, services.clock.now()),
    })
}

/// Outcome of a timer toggle.
#[derive(Debug, Clone, Serialize)]
pub struct ToggleResult {
    pub started: bool,
    #[serde(flatten)]
    pub row: TaskRow,
}

impl CommandResult for ToggleResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let verb = if self.started { "Started" } else { "Stopped" };
        format!(
            "{} timer on {} \"{}\" (total {})",
            verb,
            self.row.task.id,
            self.row.task.title,
            format_seconds(self.row.elapsed)
        )
    }
}

pub async fn task_toggle(services: &Services, id: &str, verify: bool) -> Result<ToggleResult> {
    let task = api::fetch_task(&*services.store, id).await?;
    let controller = services.timer_controller(verify);
    let stored = controller.toggle(&task).await?;
    Ok(ToggleResult {
        started: stored.is_running(),
        row: TaskRow::new(stored, services.clock.now()),
    })
}

/// Patch a task. The assignee may be given by id or by name and must be a
/// known user; an empty assignee clears it.
pub async fn task_update(
    services: &Services,
    id: &str,
    fields: &TaskUpdateArgs,
) -> Result<TaskDetail> {
    if fields.is_empty() {
        return Err(Error::InvalidInput(
            "nothing to update: pass --title, --status or --assign-to".to_string(),
        ));
    }
    let mut patch = serde_json::Map::new();
    if let Some(title) = &fields.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }
        patch.insert("title".to_string(), json!(title));
    }
    if let Some(status) = &fields.status {
        let status = TaskStatus::parse(status)
            .ok_or_else(|| Error::InvalidInput(format!("unknown status: {}", status)))?;
        patch.insert("status".to_string(), json!(status.as_str()));
    }
    if let Some(user) = &fields.assign_to {
        let assignee = resolve_assignee(services, user).await?;
        patch.insert("assignedTo".to_string(), json!(assignee));
    }

    let task = api::update_task(
        &*services.store,
        &services.notifier,
        id,
        serde_json::Value::Object(patch),
    )
    .await?;
    Ok(TaskDetail {
        row: TaskRow::new(task, services.clock.now()),
    })
}

async fn resolve_assignee(services: &Services, user: &str) -> Result<String> {
    let user = user.trim();
    if user.is_empty() {
        return Ok(String::new());
    }
    let options = api::get_all_users(&*services.store).await;
    if options.is_empty() {
        return Err(Error::Other("Failed to load users".to_string()));
    }
    options
        .into_iter()
        .find(|o| o.value == user || o.label.eq_ignore_ascii_case(user))
        .map(|o| o.value)
        .ok_or_else(|| Error::InvalidInput(format!("unknown user: {}", user)))
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub deleted: usize,
    pub ids: Vec<String>,
}

impl CommandResult for DeleteResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Deleted {} task(s): {}", self.deleted, self.ids.join(", "))
    }
}

pub async fn task_delete(services: &Services, ids: &[String]) -> Result<DeleteResult> {
    let deleted = api::delete_tasks(&*services.store, &services.notifier, ids).await?;
    Ok(DeleteResult {
        deleted,
        ids: ids.to_vec(),
    })
}

/// Running timers at one display tick.
#[derive(Debug, Clone, Serialize)]
pub struct TimerTick {
    pub at: DateTime<Utc>,
    pub running: Vec<TaskRow>,
}

impl CommandResult for TimerTick {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        self.running
            .iter()
            .map(|row| format!("⏱ {} {}", row.task.title, format_seconds(row.elapsed)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Realtime connection change seen while watching.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connection: &'static str,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl From<&ConnectionState> for ConnectionStatus {
    fn from(state: &ConnectionState) -> Self {
        Self {
            connection: state.label(),
            connected: state.is_connected(),
            attempt: state.is_reconnecting().then(|| state.reconnect_attempt()),
        }
    }
}

impl CommandResult for ConnectionStatus {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        match self.attempt {
            Some(attempt) => format!("realtime {} (attempt {})", self.connection, attempt),
            None => format!("realtime {}", self.connection),
        }
    }
}

/// A notice raised while watching, such as a failed reload.
#[derive(Debug, Clone, Serialize)]
pub struct WatchNotice {
    pub notice: HistoryEntry,
}

impl CommandResult for WatchNotice {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        self.notice.line()
    }
}

/// Next connection state, or never once the transport is gone.
async fn next_connection_state(
    connection: &mut Option<watch::Receiver<ConnectionState>>,
) -> ConnectionState {
    if let Some(rx) = connection {
        if rx.changed().await.is_ok() {
            return rx.borrow_and_update().clone();
        }
    }
    *connection = None;
    std::future::pending().await
}

/// Keep a task table live and emit it on every change, plus the running
/// timers on every display tick, until `shutdown` resolves. Transport state
/// changes from `connection` and failed reloads are emitted as they happen.
pub async fn task_watch<F, S>(
    services: &Services,
    realtime: Arc<dyn Realtime>,
    mut connection: Option<watch::Receiver<ConnectionState>>,
    filter: &TaskFilterArgs,
    page_size: Option<u32>,
    shutdown: S,
    mut emit: F,
) -> Result<()>
where
    F: FnMut(&dyn CommandResult),
    S: Future<Output = ()>,
{
    let page_size = page_size.unwrap_or(services.config.page_size());
    let table = task_table(services.store.clone(), realtime, services.notifier.clone());
    table.set_filters(filter.filters());
    table.set_sort(filter.sort());
    table.set_page(1, page_size);

    let mut rows = table.subscribe();
    let first = table.start().await;
    rows.borrow_and_update();
    emit(&TaskList::new(first, services.clock.now(), 1, page_size));

    let mut ticker = tokio::time::interval(services.config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = rows.changed() => {
                if changed.is_err() {
                    break;
                }
                let result = rows.borrow_and_update().clone();
                if result.success {
                    emit(&TaskList::new(result, services.clock.now(), 1, page_size));
                } else if let Some(notice) = services.notifier.latest() {
                    emit(&WatchNotice { notice });
                }
            }
            state = next_connection_state(&mut connection) => {
                emit(&ConnectionStatus::from(&state));
            }
            _ = ticker.tick() => {
                let now = services.clock.now();
                let running: Vec<TaskRow> = rows
                    .borrow()
                    .data
                    .iter()
                    .filter(|t| t.is_running())
                    .map(|t| TaskRow::new(t.clone(), now))
                    .collect();
                if !running.is_empty() {
                    emit(&TimerTick { at: now, running });
                }
            }
        }
    }

    table.teardown();
    tracing::info!("watch stopped");
    Ok(())
}

// === Comments ===

#[derive(Debug, Clone, Serialize)]
pub struct CommentList {
    pub task_id: String,
    pub comments: Vec<Comment>,
}

impl CommandResult for CommentList {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.comments.is_empty() {
            return format!("No comments on {}.", self.task_id);
        }
        self.comments
            .iter()
            .map(|c| format!("{}: {}", c.author(), c.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub async fn comment_list(services: &Services, task_id: &str) -> Result<CommentList> {
    let result = api::fetch_comments(&*services.store, &services.notifier, task_id).await;
    let result = services.require_success(result, "comments")?;
    Ok(CommentList {
        task_id: task_id.to_string(),
        comments: result.data,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentAdded {
    pub comment: Comment,
}

impl CommandResult for CommentAdded {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Comment added to {}", self.comment.todo)
    }
}

pub async fn comment_add(services: &Services, task_id: &str, content: &str) -> Result<CommentAdded> {
    let Some(user) = services.user.as_ref() else {
        return Err(Error::InvalidInput(
            "adding a comment needs a signed-in user; pass --identity and --password".to_string(),
        ));
    };
    let comment =
        api::create_comment(&*services.store, &services.notifier, task_id, &user.id, content)
            .await?;
    Ok(CommentAdded { comment })
}

// === Users ===

#[derive(Debug, Clone, Serialize)]
pub struct UserList {
    pub users: Vec<User>,
    pub total: u64,
}

impl CommandResult for UserList {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.users.is_empty() {
            return "No users found.".to_string();
        }
        self.users
            .iter()
            .map(|u| format!("{} {} <{}> ({})", u.id, u.name, u.email, u.role))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub async fn user_list(services: &Services, role: Option<&str>) -> Result<UserList> {
    let mut filters = FilterParams::new();
    if let Some(role) = role {
        let role = Role::parse(role)
            .ok_or_else(|| Error::InvalidInput(format!("unknown role: {}", role)))?;
        filters.set("role", Some(role.as_str().to_string()));
    }
    let sort = SortParams::new().with("name", SortDirection::Ascending);
    let result = api::fetch_users(
        &*services.store,
        &services.notifier,
        &filters,
        &sort,
        1,
        crate::query::MAX_PAGE_SIZE,
    )
    .await;
    let result = services.require_success(result, "users")?;
    Ok(UserList {
        total: result.total,
        users: result.data,
    })
}

// === Config ===

#[derive(Debug, Clone, Serialize)]
pub struct ConfigShow {
    #[serde(flatten)]
    pub config: ResolvedConfig,
}

impl CommandResult for ConfigShow {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let c = &self.config;
        let mut lines = vec![
            format!("server-url {:?} ({})", c.server_url.value, c.server_url.source),
            format!("page-size {} ({})", c.page_size.value, c.page_size.source),
            format!(
                "tick-interval-ms {} ({})",
                c.tick_interval_ms.value, c.tick_interval_ms.source
            ),
            format!(
                "verify-before-toggle {} ({})",
                c.verify_before_toggle.value, c.verify_before_toggle.source
            ),
        ];
        if let Some(ref path) = c.config_path {
            lines.push(format!("config file: {}", path.display()));
        }
        lines.join("\n")
    }
}

pub fn config_show(config: &ResolvedConfig) -> ConfigShow {
    ConfigShow {
        config: config.clone(),
    }
}

// === Demo ===

#[derive(Debug, Clone, Serialize)]
pub struct DemoStep {
    pub label: String,
    pub detail: String,
}

/// What the demo did, step by step, and the notices it raised.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub steps: Vec<DemoStep>,
    pub notices: Vec<String>,
    pub final_tasks: Vec<TaskRow>,
}

impl DemoReport {
    fn step(&mut self, label: &str, detail: impl Into<String>) {
        self.steps.push(DemoStep {
            label: label.to_string(),
            detail: detail.into(),
        });
    }
}

impl CommandResult for DemoReport {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines: Vec<String> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}: {}", i + 1, s.label, s.detail))
            .collect();
        lines.push("Notices:".to_string());
        lines.extend(self.notices.iter().map(|n| format!("  {}", n)));
        lines.push("Tasks:".to_string());
        lines.extend(self.final_tasks.iter().map(|row| format!("  {}", row.line())));
        lines.join("\n")
    }
}

const DEMO_TASK: &str = "t_ui";

/// Run a timer toggle and a live table against a seeded in-memory store.
///
/// The timer runs for a little over one display tick.
pub async fn demo(tick: Duration) -> Result<DemoReport> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    store.seed_demo()?;
    let notifier = Notifier::new();
    let mut report = DemoReport {
        steps: Vec::new(),
        notices: Vec::new(),
        final_tasks: Vec::new(),
    };

    let table = task_table(store.clone(), store.clone(), notifier.clone());
    table.set_sort(SortParams::new().with("startDate", SortDirection::Ascending));
    let mut rows = table.subscribe();
    let loaded = table.start().await;
    rows.borrow_and_update();
    report.step("load", format!("{} tasks in the live table", loaded.total));

    let controller = Arc::new(TimerController::new(
        store.clone(),
        clock.clone(),
        notifier.clone(),
    ));
    let view = TimerView::new(controller, api::fetch_task(&*store, DEMO_TASK).await?);
    let ticker = view.ticker(tick);

    let started = view.toggle().await?;
    report.step("start", format!("timer running on \"{}\"", started.title));
    wait_for_reload(&mut rows, &mut report).await;

    tokio::time::sleep(tick + tick / 5).await;
    report.step(
        "tick",
        format!("ticker shows {}", format_seconds(ticker.elapsed())),
    );

    let stopped = view.toggle().await?;
    report.step(
        "stop",
        format!("timer total {}", format_seconds(stopped.timer)),
    );
    wait_for_reload(&mut rows, &mut report).await;

    store.insert(
        TASK_COLLECTION,
        json!({
            "title": "Remote task",
            "status": "pending",
            "startDate": "2024-03-01",
            "endDate": "2024-03-02",
            "timer": 0,
            "startTime": "",
        }),
    )?;
    report.step("remote", "another client created a task");
    wait_for_reload(&mut rows, &mut report).await;

    ticker.stop();
    table.teardown();
    let now = clock.now();
    report.final_tasks = table
        .rows()
        .data
        .into_iter()
        .map(|t| TaskRow::new(t, now))
        .collect();
    report.notices = notifier
        .history()
        .into_iter()
        .map(|n| n.line())
        .collect();
    Ok(report)
}

async fn wait_for_reload(
    rows: &mut tokio::sync::watch::Receiver<ListResult<Task>>,
    report: &mut DemoReport,
) {
    match tokio::time::timeout(Duration::from_secs(2), rows.changed()).await {
        Ok(Ok(())) => {
            let total = rows.borrow_and_update().total;
            report.step("refresh", format!("table reloaded, {} tasks", total));
        }
        _ => report.step("refresh", "no reload observed"),
    }
}
