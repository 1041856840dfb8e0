//! KDL schema for config.kdl.
//!
//! ```kdl
//! server-url "http://127.0.0.1:8090"
//! page-size 5
//! tick-interval-ms 1000
//! verify-before-toggle #true
//! ```

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

use crate::query::MAX_PAGE_SIZE;

/// Shortest accepted display tick.
pub const MIN_TICK_INTERVAL_MS: u64 = 100;

/// Client preferences stored in config.kdl. Unset values fall through to
/// the next source during resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTideConfig {
    /// Base URL of the record server
    pub server_url: Option<String>,

    /// Rows per table page
    pub page_size: Option<u32>,

    /// Live timer refresh interval in milliseconds
    pub tick_interval_ms: Option<u64>,

    /// Re-read a task before toggling its timer
    pub verify_before_toggle: Option<bool>,
}

impl TaskTideConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref url) = self.server_url {
            validate_url(url)?;
        }
        if let Some(size) = self.page_size {
            if size == 0 || size > MAX_PAGE_SIZE {
                return Err(format!(
                    "page-size must be 1-{}, got {}",
                    MAX_PAGE_SIZE, size
                ));
            }
        }
        if let Some(ms) = self.tick_interval_ms {
            if ms < MIN_TICK_INTERVAL_MS {
                return Err(format!(
                    "tick-interval-ms must be at least {}, got {}",
                    MIN_TICK_INTERVAL_MS, ms
                ));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Values of the wrong type are
    /// ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(value) = first_value(doc, "server-url") {
            if let Some(s) = value.as_string() {
                config.server_url = Some(s.to_string());
            }
        }

        if let Some(value) = first_value(doc, "page-size") {
            if let Some(i) = value.as_integer() {
                config.page_size = u32::try_from(i).ok();
            }
        }

        if let Some(value) = first_value(doc, "tick-interval-ms") {
            if let Some(i) = value.as_integer() {
                config.tick_interval_ms = u64::try_from(i).ok();
            }
        }

        if let Some(value) = first_value(doc, "verify-before-toggle") {
            config.verify_before_toggle = value.as_bool();
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref url) = self.server_url {
            push(&mut doc, "server-url", KdlValue::String(url.clone()));
        }
        if let Some(size) = self.page_size {
            push(&mut doc, "page-size", KdlValue::Integer(size as i128));
        }
        if let Some(ms) = self.tick_interval_ms {
            push(&mut doc, "tick-interval-ms", KdlValue::Integer(ms as i128));
        }
        if let Some(on) = self.verify_before_toggle {
            push(&mut doc, "verify-before-toggle", KdlValue::Bool(on));
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &TaskTideConfig) {
        if other.server_url.is_some() {
            self.server_url = other.server_url.clone();
        }
        if other.page_size.is_some() {
            self.page_size = other.page_size;
        }
        if other.tick_interval_ms.is_some() {
            self.tick_interval_ms = other.tick_interval_ms;
        }
        if other.verify_before_toggle.is_some() {
            self.verify_before_toggle = other.verify_before_toggle;
        }
    }
}

/// Server URLs must be absolute http(s) URLs.
pub fn validate_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(host) if !host.trim_matches('/').is_empty() => Ok(()),
        _ => Err(format!(
            "server-url must start with http:// or https://, got {:?}",
            url
        )),
    }
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn push(doc: &mut KdlDocument, name: &str, value: KdlValue) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    doc.nodes_mut().push(node);
}
