//! Resource store abstraction.
//!
//! The store is an external collaborator: it persists custom resources as
//! untyped JSON documents, assigns version tokens and enforces optimistic
//! concurrency. [`ResourceStore`] is the seam the rest of the crate talks to;
//! [`MemoryStore`] is the in-process implementation used by tests and the
//! soak harness.

pub mod error;
pub mod memory;
pub mod patch;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::{ResourceKey, VersionToken};

pub use error::{Result, StoreError};
pub use memory::{MemoryStore, StoreOp};

/// A resource as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: ResourceKey,
    pub spec: Value,
    pub status: Value,
    /// Required on every write except create.
    pub version: Option<VersionToken>,
    pub uid: Option<String>,
    pub generation: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Asynchronous CRUD + status operations of a resource store.
///
/// Writes other than `create` must carry the version token of the copy they
/// were derived from and fail with [`StoreError::VersionMismatch`] when the
/// stored token differs.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a resource. `None` if it does not exist.
    async fn get(&self, key: &ResourceKey) -> Result<Option<StoredObject>>;

    /// List resources of one kind in a namespace.
    async fn list(&self, kind: &str, namespace: &str) -> Result<Vec<StoredObject>>;

    /// Create a resource. Fails with `AlreadyExists` if the key is taken.
    async fn create(&self, object: StoredObject) -> Result<StoredObject>;

    /// Merge `object.spec` onto the stored spec. `status` is ignored.
    async fn patch(&self, object: StoredObject) -> Result<StoredObject>;

    /// Replace the stored status. Must not alter anything else.
    async fn update_status(&self, object: StoredObject) -> Result<StoredObject>;

    /// Delete a resource. Fails with `NotFound` if it does not exist.
    async fn delete(&self, key: &ResourceKey) -> Result<()>;
}
