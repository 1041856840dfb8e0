//! CLI argument definitions for tasktide.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::query::{FilterParams, SortDirection, SortParams};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("TT_GIT_COMMIT"),
    "\nbuilt:  ",
    env!("TT_BUILD_TIMESTAMP"),
);

/// tasktide - A realtime task tracker with start/stop work timers.
///
/// Lists stay live against the server; `tt task watch` reprints on every
/// remote change.
#[derive(Parser, Debug)]
#[command(name = "tt")]
#[command(author, version, long_version = LONG_VERSION, about = "A realtime task tracker with start/stop work timers", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Config file to use instead of ~/.config/tasktide/config.kdl
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Server base URL (overrides TASKTIDE_URL and the config file)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Account identity (email or username) for password auth
    #[arg(long, global = true, env = "TASKTIDE_IDENTITY")]
    pub identity: Option<String>,

    /// Account password
    #[arg(long, global = true, env = "TASKTIDE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Task management commands
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Comment commands
    Comment {
        #[command(subcommand)]
        command: CommentCommands,
    },

    /// User commands
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Toggle a timer and watch a live table against an in-memory store
    Demo,
}

/// Task filter flags shared by `list` and `watch`.
#[derive(Args, Debug, Clone, Default)]
pub struct TaskFilterArgs {
    /// Filter by status (pending, in-progress, completed)
    #[arg(long)]
    pub status: Option<String>,

    /// Filter by exact title
    #[arg(long)]
    pub title: Option<String>,

    /// Filter by assignee user ID
    #[arg(long)]
    pub assigned_to: Option<String>,

    /// Only tasks starting on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,

    /// Only tasks ending on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<String>,

    /// Sort key as field[:asc|desc]; repeat for secondary keys
    #[arg(long = "sort", value_parser = parse_sort_key)]
    pub sort: Vec<(String, SortDirection)>,
}

impl TaskFilterArgs {
    pub fn filters(&self) -> FilterParams {
        let mut filters = FilterParams::new();
        filters.set("status", self.status.clone());
        filters.set("title", self.title.clone());
        filters.set("assignedTo", self.assigned_to.clone());
        filters.set("startDate", self.from.clone());
        filters.set("endDate", self.to.clone());
        filters
    }

    pub fn sort(&self) -> SortParams {
        let mut sort = SortParams::new();
        for (field, direction) in &self.sort {
            sort.push(field.clone(), *direction);
        }
        sort
    }
}

fn parse_sort_key(spec: &str) -> Result<(String, SortDirection), String> {
    SortParams::parse_spec(spec).ok_or_else(|| format!("invalid sort key: {:?}", spec))
}

/// Task fields `task update` can change.
#[derive(Args, Debug, Clone, Default)]
pub struct TaskUpdateArgs {
    /// New title
    #[arg(long)]
    pub title: Option<String>,

    /// New status (pending, in-progress, completed)
    #[arg(long)]
    pub status: Option<String>,

    /// Assignee by user ID or name; an empty value unassigns
    #[arg(long)]
    pub assign_to: Option<String>,
}

impl TaskUpdateArgs {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.status.is_none() && self.assign_to.is_none()
    }
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// List one page of tasks
    List {
        #[command(flatten)]
        filter: TaskFilterArgs,

        /// Page number (1-based)
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Rows per page (defaults to page-size from config)
        #[arg(long)]
        page_size: Option<u32>,
    },

    /// Show a task with its live elapsed time
    Show {
        /// Task ID
        id: String,
    },

    /// Start or stop the work timer of a task
    Toggle {
        /// Task ID
        id: String,

        /// Re-read the task first and refuse if its timer changed
        #[arg(long)]
        verify: bool,
    },

    /// Change the title, status or assignee of a task
    Update {
        /// Task ID
        id: String,

        #[command(flatten)]
        fields: TaskUpdateArgs,
    },

    /// Print the task list on every remote change until Ctrl-C
    Watch {
        #[command(flatten)]
        filter: TaskFilterArgs,

        /// Rows per page (defaults to page-size from config)
        #[arg(long)]
        page_size: Option<u32>,
    },

    /// Delete one or more tasks
    Delete {
        /// Task IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

/// Comment subcommands
#[derive(Subcommand, Debug)]
pub enum CommentCommands {
    /// List comments on a task
    List {
        /// Task ID
        task_id: String,
    },

    /// Add a comment to a task as the signed-in user
    Add {
        /// Task ID
        task_id: String,

        /// Comment text
        content: String,
    },
}

/// User subcommands
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// List users
    List {
        /// Filter by role (admin, developer)
        #[arg(long)]
        role: Option<String>,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration and where each value came from
    Show,
}
