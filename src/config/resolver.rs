//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. `TASKTIDE_URL` environment variable (server URL only)
//! 3. config.kdl (`--config <path>` or `~/.config/tasktide/config.kdl`)
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use kdl::KdlDocument;
use serde::Serialize;

use crate::config::schema::TaskTideConfig;
use crate::query::DEFAULT_PAGE_SIZE;
use crate::{Error, Result};

/// Environment variable overriding the server URL.
pub const SERVER_URL_ENV: &str = "TASKTIDE_URL";

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8090";

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from a config.kdl file
    ConfigFile(String),
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile(path) => write!(f, "file:{}", path),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub server_url: Resolved<String>,
    pub page_size: Resolved<u32>,
    pub tick_interval_ms: Resolved<u64>,
    pub verify_before_toggle: Resolved<bool>,
    /// The config file consulted, whether or not it existed
    pub config_path: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            server_url: Resolved::new(DEFAULT_SERVER_URL.to_string(), ValueSource::Default),
            page_size: Resolved::new(DEFAULT_PAGE_SIZE, ValueSource::Default),
            tick_interval_ms: Resolved::new(DEFAULT_TICK_INTERVAL_MS, ValueSource::Default),
            verify_before_toggle: Resolved::new(false, ValueSource::Default),
            config_path: None,
        }
    }
}

impl ResolvedConfig {
    pub fn server_url(&self) -> &str {
        &self.server_url.value
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.value
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.value)
    }

    pub fn verify_before_toggle(&self) -> bool {
        self.verify_before_toggle.value
    }

    /// The effective values as a config document.
    pub fn to_kdl(&self) -> KdlDocument {
        TaskTideConfig {
            server_url: Some(self.server_url.value.clone()),
            page_size: Some(self.page_size.value),
            tick_interval_ms: Some(self.tick_interval_ms.value),
            verify_before_toggle: Some(self.verify_before_toggle.value),
        }
        .to_kdl()
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server_url: Option<String>,
    pub page_size: Option<u32>,
    pub verify_before_toggle: Option<bool>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn with_verify_before_toggle(mut self, on: bool) -> Self {
        self.verify_before_toggle = Some(on);
        self
    }
}

/// Default config file location (`~/.config/tasktide/config.kdl`).
pub fn system_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tasktide").join("config.kdl"))
}

/// Read and validate a config file. A missing file is an empty config.
pub fn read_config_file(path: &Path) -> Result<TaskTideConfig> {
    if !path.exists() {
        return Ok(TaskTideConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    let doc: KdlDocument = content.parse()?;
    let config = TaskTideConfig::from_kdl(&doc);
    config
        .validate()
        .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
    Ok(config)
}

/// Resolve configuration with full precedence chain.
///
/// `config_path` replaces the default file location when given.
pub fn resolve_config(
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    let env_url = std::env::var(SERVER_URL_ENV).ok().filter(|v| !v.is_empty());
    resolve_with_env(config_path, overrides, env_url)
}

fn resolve_with_env(
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
    env_url: Option<String>,
) -> Result<ResolvedConfig> {
    let mut result = ResolvedConfig {
        config_path: config_path.map(Path::to_path_buf).or_else(system_config_path),
        ..ResolvedConfig::default()
    };

    let file = match result.config_path {
        Some(ref path) => read_config_file(path)?,
        None => TaskTideConfig::default(),
    };
    let file_source = || {
        ValueSource::ConfigFile(
            result
                .config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        )
    };

    // Resolve server_url
    if let Some(ref url) = overrides.server_url {
        result.server_url = Resolved::new(url.clone(), ValueSource::CliFlag);
    } else if let Some(url) = env_url {
        result.server_url = Resolved::new(url, ValueSource::EnvVar(SERVER_URL_ENV.to_string()));
    } else if let Some(ref url) = file.server_url {
        result.server_url = Resolved::new(url.clone(), file_source());
    }

    // Resolve page_size
    if let Some(size) = overrides.page_size {
        result.page_size = Resolved::new(size, ValueSource::CliFlag);
    } else if let Some(size) = file.page_size {
        result.page_size = Resolved::new(size, file_source());
    }

    // Resolve tick_interval_ms
    if let Some(ms) = file.tick_interval_ms {
        result.tick_interval_ms = Resolved::new(ms, file_source());
    }

    // Resolve verify_before_toggle
    if let Some(on) = overrides.verify_before_toggle {
        result.verify_before_toggle = Resolved::new(on, ValueSource::CliFlag);
    } else if let Some(on) = file.verify_before_toggle {
        result.verify_before_toggle = Resolved::new(on, file_source());
    }

    // Flags and env bypass the file check, so validate the final values too.
    TaskTideConfig {
        server_url: Some(result.server_url.value.clone()),
        page_size: Some(result.page_size.value),
        tick_interval_ms: Some(result.tick_interval_ms.value),
        verify_before_toggle: None,
    }
    .validate()
    .map_err(Error::InvalidConfig)?;

    tracing::debug!(
        server_url = %result.server_url.value,
        source = %result.server_url.source,
        "configuration resolved"
    );
    Ok(result)
}
