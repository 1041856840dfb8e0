//! Data models for tasktide records.
//!
//! This module defines the core data structures:
//! - `Task` - Work items with status, a date window and an accumulated work timer
//! - `Comment` - Immutable discussion entries attached to a task
//! - `User` - Accounts that own and work on tasks
//! - `RecordPage` / `ListResult` - List responses as the store returns them and
//!   as the table renders them
//!
//! Records are decoded from the store's camelCase JSON.

pub mod timefmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection holding tasks.
pub const TASK_COLLECTION: &str = "todos";

/// Collection holding comments.
pub const COMMENT_COLLECTION: &str = "comments";

/// Collection holding users.
pub const USER_COLLECTION: &str = "users";

/// Task status in the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    /// Parse a status string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in-progress" | "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Developer,
}

impl Role {
    /// Parse a role string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "developer" => Some(Self::Developer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Developer => "developer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user account.
///
/// Expanded relations only carry a subset of the fields, so everything except
/// the id falls back to a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub role: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(default, with = "timefmt::timestamp", skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, with = "timefmt::timestamp", skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

/// Relations expanded alongside a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExpand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<User>,
}

impl TaskExpand {
    pub fn is_empty(&self) -> bool {
        self.assigned_to.is_none()
    }
}

/// A work item with a start/stop work timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Record identifier assigned by the store
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: TaskStatus,

    /// First day of the planned window
    #[serde(default, with = "timefmt::date")]
    pub start_date: Option<NaiveDate>,

    /// Last day of the planned window (not checked against `start_date`)
    #[serde(default, with = "timefmt::date")]
    pub end_date: Option<NaiveDate>,

    /// Seconds accumulated across closed timing sessions
    #[serde(default, deserialize_with = "timefmt::seconds")]
    pub timer: u64,

    /// Start of the open timing session, if one is running
    #[serde(default, with = "timefmt::timestamp")]
    pub start_time: Option<DateTime<Utc>>,

    /// Id of the assigned user
    #[serde(default)]
    pub assigned_to: String,

    /// Id of the creating user
    #[serde(default)]
    pub owner: String,

    #[serde(default, with = "timefmt::timestamp", skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, with = "timefmt::timestamp", skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "TaskExpand::is_empty")]
    pub expand: TaskExpand,
}

impl Task {
    /// Create a pending task with no timer history.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::default(),
            start_date: None,
            end_date: None,
            timer: 0,
            start_time: None,
            assigned_to: String::new(),
            owner: String::new(),
            created: None,
            updated: None,
            expand: TaskExpand::default(),
        }
    }

    /// Whether a timing session is currently open.
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    /// Display name of the assignee, when the relation was expanded.
    pub fn assignee_name(&self) -> Option<&str> {
        self.expand.assigned_to.as_ref().map(|u| u.name.as_str())
    }
}

/// Relations expanded alongside a comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentExpand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl CommentExpand {
    pub fn is_empty(&self) -> bool {
        self.user.is_none()
    }
}

/// A discussion entry on a task. There is no edit operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Id of the task this comment belongs to
    pub todo: String,

    /// Id of the author
    pub user: String,

    pub content: String,

    #[serde(default, with = "timefmt::timestamp", skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "CommentExpand::is_empty")]
    pub expand: CommentExpand,
}

impl Comment {
    /// Author display name, falling back to the raw user id.
    pub fn author(&self) -> &str {
        self.expand
            .user
            .as_ref()
            .map(|u| u.name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.user)
    }
}

/// One page of records as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage<T> {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub total_pages: u32,
    pub items: Vec<T>,
}

impl<T> RecordPage<T> {
    /// Convert every item, keeping the paging metadata.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<RecordPage<U>, E> {
        let items = self.items.into_iter().map(f).collect::<Result<Vec<_>, _>>()?;
        Ok(RecordPage {
            page: self.page,
            per_page: self.per_page,
            total_items: self.total_items,
            total_pages: self.total_pages,
            items,
        })
    }
}

/// Rows handed to a table view.
///
/// A failed fetch is represented as an empty, unsuccessful result rather than
/// an error so the render path never has to handle one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListResult<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub success: bool,
}

impl<T> ListResult<T> {
    pub fn failed() -> Self {
        Self {
            data: Vec::new(),
            total: 0,
            success: false,
        }
    }

    pub fn from_page(page: RecordPage<T>) -> Self {
        Self {
            total: page.total_items,
            data: page.items,
            success: true,
        }
    }
}

impl<T> Default for ListResult<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            total: 0,
            success: true,
        }
    }
}

/// A select option (label shown, value submitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}
