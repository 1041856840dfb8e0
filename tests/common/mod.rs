//! Common test utilities for tasktide integration tests.
//!
//! Provides `TestEnv` so no test reads the user's
//! `~/.config/tasktide/config.kdl` or inherits their server settings.

#![allow(dead_code)]

use std::path::PathBuf;

use assert_cmd::Command;
pub use tempfile::TempDir;

/// Nothing listens on the discard port, so requests fail fast.
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:9";

/// A test environment with an isolated config file.
pub struct TestEnv {
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Create an environment whose config file holds `kdl`.
    pub fn with_config(kdl: &str) -> Self {
        let env = Self::new();
        std::fs::write(env.config_path(), kdl).unwrap();
        env
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.path().join("config.kdl")
    }

    /// Get a Command for the tt binary pointed at this environment's config.
    ///
    /// Inherited `TASKTIDE_*` variables are cleared per command.
    pub fn tt(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tt"));
        cmd.arg("--config").arg(self.config_path());
        cmd.env_remove("TASKTIDE_URL");
        cmd.env_remove("TASKTIDE_IDENTITY");
        cmd.env_remove("TASKTIDE_PASSWORD");
        cmd.env("TASKTIDE_LOG", "off");
        cmd
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
