//! tasktide - a realtime-synchronized task tracker client.
//!
//! This library provides the core behind the `tt` CLI:
//! translating table filter/sort state into store queries, keeping a listed
//! collection live through realtime subscriptions, and tracking work time on
//! tasks with a start/stop timer.

pub mod api;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod format;
pub mod models;
pub mod notify;
pub mod query;
pub mod realtime;
pub mod store;
pub mod sync;

use models::Task;

/// Library-level error type for tasktide operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parse error: {0}")]
    Kdl(#[from] kdl::KdlError),

    /// The store answered with a non-success status.
    #[error("Store error ({status}): {message}")]
    Store { status: u16, message: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A persist failed; `rolled_back` is the state the caller should keep showing.
    #[error("Failed to persist {what}: {reason}")]
    Persist {
        what: String,
        reason: String,
        rolled_back: Box<Task>,
    },

    /// The stored timer state no longer matches the caller's copy.
    #[error("Task {id} changed since it was loaded; reload before toggling")]
    Conflict { id: String, current: Box<Task> },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for tasktide operations.
pub type Result<T> = std::result::Result<T, Error>;
