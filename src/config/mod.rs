//! Configuration for tasktide.
//!
//! ## config.kdl - Client preferences
//!
//! Located at `~/.config/tasktide/config.kdl` unless `--config <path>` is
//! given.
//!
//! Contains:
//! - `server-url` - Base URL of the record server
//! - `page-size` - Rows per table page (1-500)
//! - `tick-interval-ms` - Live timer refresh interval (>= 100)
//! - `verify-before-toggle` - Re-read a task before toggling its timer
//!
//! Credentials are never stored; pass `--identity`/`--password` or set
//! `TASKTIDE_IDENTITY`/`TASKTIDE_PASSWORD`.
//!
//! ## Precedence
//!
//! CLI flag > environment > config file > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, DEFAULT_SERVER_URL, Resolved, ResolvedConfig, SERVER_URL_ENV, ValueSource,
    resolve_config, system_config_path,
};
pub use schema::TaskTideConfig;
