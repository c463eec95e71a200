//! crdop: reconciliation core for custom resources.
//!
//! - [`ReconcileEngine`] converges a resource to a desired spec
//!   (create / update / delete / no-op).
//! - [`StatusGuard`] applies status updates under optimistic concurrency.
//! - [`KeySerializer`] keeps operations on one resource in order and apart.
//! - [`ResourceClient`] is the typed, timeout-bound view of a [`ResourceStore`].

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod resource;
pub mod serializer;
pub mod store;

pub use client::ResourceClient;
pub use config::EngineConfig;
pub use engine::ReconcileEngine;
pub use error::{Disposition, ReconcileError};
pub use guard::StatusGuard;
pub use resource::{
    Condition, ConditionStatus, ManagedResource, ReconcileResult, ResourceKey, ResourceKind,
    VersionToken, set_condition,
};
pub use serializer::KeySerializer;
pub use store::{MemoryStore, ResourceStore, StoreError, StoreOp, StoredObject};
