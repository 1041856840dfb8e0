//! Record store access.
//!
//! [`RecordStore`] is the seam between controllers and a backend:
//! [`pocketbase::PocketBase`] talks to a remote server over HTTP,
//! [`memory::MemoryStore`] keeps records in-process for demos and tests.

pub mod memory;
pub mod pocketbase;
pub mod session;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::models::RecordPage;
use crate::query::ListQuery;

pub use memory::MemoryStore;
pub use pocketbase::PocketBase;
pub use session::Session;

/// CRUD over named collections of JSON records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List one page of records.
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<RecordPage<Value>>;

    /// Fetch one record, optionally expanding relations.
    async fn get_one(&self, collection: &str, id: &str, expand: Option<&str>) -> Result<Value>;

    /// Create a record; returns it as stored.
    async fn create(&self, collection: &str, body: Value) -> Result<Value>;

    /// Apply a partial update; returns the record as stored.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;
}
