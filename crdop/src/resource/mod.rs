//! Resource model shared by the client, the guard and the engine.
//!
//! A resource kind is described once by implementing [`ResourceKind`]; every
//! other component is generic over that descriptor instead of having a
//! dedicated client per kind.

pub mod condition;

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use condition::{Condition, ConditionStatus, set_condition};

// =============================================================================
// Identity
// =============================================================================

/// Identifies one custom resource instance: (kind, namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a resource of kind `K`.
    pub fn of<K: ResourceKind>(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(K::KIND, namespace, name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Opaque marker of the last accepted write to a resource.
///
/// Assigned by the resource store. Two tokens are only ever compared for
/// equality; callers must not interpret their contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Kind descriptor
// =============================================================================

/// Describes one custom resource kind.
pub trait ResourceKind: Send + Sync + 'static {
    /// Kind name used in every [`ResourceKey`] of this kind.
    const KIND: &'static str;

    /// Desired state, owned by the caller.
    type Spec: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static;

    /// Observed state, written only through status updates.
    type Status: Serialize + DeserializeOwned + Clone + fmt::Debug + Default + Send + Sync + 'static;

    /// Whether `current` already satisfies `desired`.
    ///
    /// The default compares both specs field by field through their JSON
    /// form. Kinds whose store fills in defaults on write should override it.
    fn spec_matches(desired: &Self::Spec, current: &Self::Spec) -> bool {
        match (serde_json::to_value(desired), serde_json::to_value(current)) {
            (Ok(desired), Ok(current)) => desired == current,
            _ => false,
        }
    }

    /// Conditions reported in `status`, if the kind has any.
    fn conditions(_status: &Self::Status) -> &[Condition] {
        &[]
    }
}

// =============================================================================
// Managed resource
// =============================================================================

/// One custom resource instance as seen by the engine.
pub struct ManagedResource<K: ResourceKind> {
    pub key: ResourceKey,
    pub spec: K::Spec,
    pub status: K::Status,
    /// Token of the write this copy was read at. `None` until the store accepted it.
    pub version: Option<VersionToken>,
    /// Store-assigned unique id.
    pub uid: Option<String>,
    /// Advances on every accepted spec change.
    pub generation: u64,
    pub created_at: Option<DateTime<Utc>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> ManagedResource<K> {
    /// A resource that has never been written: empty status and no token.
    pub fn new(key: ResourceKey, spec: K::Spec) -> Self {
        Self {
            key,
            spec,
            status: K::Status::default(),
            version: None,
            uid: None,
            generation: 0,
            created_at: None,
            _kind: PhantomData,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        key: ResourceKey,
        spec: K::Spec,
        status: K::Status,
        version: Option<VersionToken>,
        uid: Option<String>,
        generation: u64,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key,
            spec,
            status,
            version,
            uid,
            generation,
            created_at,
            _kind: PhantomData,
        }
    }

    /// Same resource with `status` replaced. Identity, spec and token are kept.
    pub fn with_status(mut self, status: K::Status) -> Self {
        self.status = status;
        self
    }

    /// Same resource with `spec` replaced. Identity, status and token are kept.
    pub fn with_spec(mut self, spec: K::Spec) -> Self {
        self.spec = spec;
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        K::conditions(&self.status)
    }

    /// True when a `Ready` condition with status `True` is reported.
    pub fn is_ready(&self) -> bool {
        self.conditions()
            .iter()
            .any(|c| c.type_ == Condition::READY && c.status == ConditionStatus::True)
    }
}

impl<K: ResourceKind> Clone for ManagedResource<K> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            spec: self.spec.clone(),
            status: self.status.clone(),
            version: self.version.clone(),
            uid: self.uid.clone(),
            generation: self.generation,
            created_at: self.created_at,
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> fmt::Debug for ManagedResource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedResource")
            .field("key", &self.key)
            .field("spec", &self.spec)
            .field("status", &self.status)
            .field("version", &self.version)
            .field("uid", &self.uid)
            .field("generation", &self.generation)
            .field("created_at", &self.created_at)
            .finish()
    }
}

// =============================================================================
// Reconcile result
// =============================================================================

/// Outcome of a single reconcile call.
pub enum ReconcileResult<K: ResourceKind> {
    Created(ManagedResource<K>),
    Updated(ManagedResource<K>),
    Deleted,
    NoOp,
}

impl<K: ResourceKind> ReconcileResult<K> {
    /// The resource as written by this call, if it wrote one.
    pub fn resource(&self) -> Option<&ManagedResource<K>> {
        match self {
            ReconcileResult::Created(r) | ReconcileResult::Updated(r) => Some(r),
            ReconcileResult::Deleted | ReconcileResult::NoOp => None,
        }
    }

    pub fn into_resource(self) -> Option<ManagedResource<K>> {
        match self {
            ReconcileResult::Created(r) | ReconcileResult::Updated(r) => Some(r),
            ReconcileResult::Deleted | ReconcileResult::NoOp => None,
        }
    }

    /// Short name for logs.
    pub fn action(&self) -> &'static str {
        match self {
            ReconcileResult::Created(_) => "created",
            ReconcileResult::Updated(_) => "updated",
            ReconcileResult::Deleted => "deleted",
            ReconcileResult::NoOp => "noop",
        }
    }
}

impl<K: ResourceKind> fmt::Debug for ReconcileResult<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileResult::Created(r) => f.debug_tuple("Created").field(r).finish(),
            ReconcileResult::Updated(r) => f.debug_tuple("Updated").field(r).finish(),
            ReconcileResult::Deleted => f.write_str("Deleted"),
            ReconcileResult::NoOp => f.write_str("NoOp"),
        }
    }
}
