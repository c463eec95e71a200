//! In-memory resource store.
//!
//! Behaves like a real store from the engine's point of view: tokens come
//! from one counter shared by all keys, spec patches are JSON merge patches,
//! status updates may not touch the spec. Latency and failures can be
//! injected to exercise timeouts and races.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::{Result, StoreError};
use super::patch::{merge_patch, normalize};
use super::{ResourceStore, StoredObject};
use crate::resource::{ResourceKey, VersionToken};

/// Schema check for the spec of one kind.
pub type SpecValidator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    List,
    Create,
    Patch,
    UpdateStatus,
    Delete,
}

#[derive(Default)]
struct Faults {
    latency: Option<Duration>,
    key_latency: HashMap<ResourceKey, Duration>,
    pending: VecDeque<(StoreOp, StoreError)>,
    unavailable: bool,
}

/// Store backed by a `HashMap`, for tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ResourceKey, StoredObject>>,
    validators: RwLock<HashMap<String, SpecValidator>>,
    faults: Mutex<Faults>,
    last_version: AtomicU64,
    create_attempts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec validator for `kind`. Writes failing it are `Invalid`.
    pub async fn set_validator(&self, kind: &str, validator: SpecValidator) {
        self.validators
            .write()
            .await
            .insert(kind.to_string(), validator);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults().latency = latency;
    }

    /// Delay calls touching `key` by `latency` (replaces the global latency for that key).
    pub fn set_key_latency(&self, key: &ResourceKey, latency: Option<Duration>) {
        let mut faults = self.faults();
        match latency {
            Some(latency) => {
                faults.key_latency.insert(key.clone(), latency);
            }
            None => {
                faults.key_latency.remove(key);
            }
        }
    }

    /// Fail the next `op` call with `error`. Queued errors are consumed in order.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.faults().pending.push_back((op, error));
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults().unavailable = unavailable;
    }

    /// Number of `create` calls received, successful or not.
    pub fn create_attempts(&self) -> u64 {
        self.create_attempts.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_version(&self) -> VersionToken {
        let v = self.last_version.fetch_add(1, Ordering::SeqCst) + 1;
        VersionToken::new(v.to_string())
    }

    /// Apply injected latency and failures for an `op` call touching `key`.
    async fn enter(&self, op: StoreOp, key: Option<&ResourceKey>) -> Result<()> {
        let delay = {
            let faults = self.faults();
            key.and_then(|k| faults.key_latency.get(k).copied())
                .or(faults.latency)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut faults = self.faults();
        if faults.unavailable {
            return Err(StoreError::Unavailable("store is unavailable".into()));
        }
        match faults.pending.iter().position(|(target, _)| *target == op) {
            Some(i) => match faults.pending.remove(i) {
                Some((_, err)) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    async fn validate(&self, object: &StoredObject) -> Result<()> {
        validate_name(&object.key.name)?;
        if !object.spec.is_object() {
            return Err(StoreError::Invalid(format!(
                "{}: spec must be an object",
                object.key
            )));
        }
        if let Some(validator) = self.validators.read().await.get(&object.key.kind) {
            validator(&object.spec)
                .map_err(|reason| StoreError::Invalid(format!("{}: {}", object.key, reason)))?;
        }
        Ok(())
    }
}

/// Compare the caller's token with the stored one.
fn check_version(stored: &StoredObject, supplied: Option<&VersionToken>) -> Result<()> {
    let supplied = supplied.ok_or_else(|| {
        StoreError::Invalid(format!("{}: version token is required", stored.key))
    })?;
    let actual = stored.version.as_ref();
    if actual != Some(supplied) {
        return Err(StoreError::VersionMismatch {
            expected: supplied.to_string(),
            actual: actual.map(|v| v.to_string()).unwrap_or_default(),
        });
    }
    Ok(())
}

/// Lowercase RFC 1123 subdomain.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 253
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!("invalid resource name: {:?}", name)))
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<StoredObject>> {
        self.enter(StoreOp::Get, Some(key)).await?;
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list(&self, kind: &str, namespace: &str) -> Result<Vec<StoredObject>> {
        self.enter(StoreOp::List, None).await?;
        let objects = self.objects.read().await;
        let mut items: Vec<StoredObject> = objects
            .values()
            .filter(|o| o.key.kind == kind && o.key.namespace == namespace)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.key.name.cmp(&b.key.name));
        Ok(items)
    }

    async fn create(&self, mut object: StoredObject) -> Result<StoredObject> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        self.enter(StoreOp::Create, Some(&object.key)).await?;
        if object.version.is_some() {
            return Err(StoreError::Invalid(format!(
                "{}: version token must not be set on create",
                object.key
            )));
        }
        object.spec = normalize(&object.spec);
        self.validate(&object).await?;

        let mut objects = self.objects.write().await;
        if objects.contains_key(&object.key) {
            return Err(StoreError::AlreadyExists(object.key.to_string()));
        }

        object.version = Some(self.next_version());
        object.uid = Some(uuid::Uuid::new_v4().to_string());
        object.generation = 1;
        object.created_at = Some(Utc::now());
        debug!("Created {} at version {:?}", object.key, object.version);
        objects.insert(object.key.clone(), object.clone());
        Ok(object)
    }

    async fn patch(&self, object: StoredObject) -> Result<StoredObject> {
        self.enter(StoreOp::Patch, Some(&object.key)).await?;

        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&object.key)
            .ok_or_else(|| StoreError::NotFound(object.key.to_string()))?;
        check_version(stored, object.version.as_ref())?;

        let mut spec = stored.spec.clone();
        merge_patch(&mut spec, &object.spec);
        if spec == stored.spec {
            return Ok(stored.clone());
        }

        let mut updated = stored.clone();
        updated.spec = spec;
        self.validate(&updated).await?;
        updated.generation += 1;
        updated.version = Some(self.next_version());
        debug!("Patched {} to version {:?}", updated.key, updated.version);
        objects.insert(updated.key.clone(), updated.clone());
        Ok(updated)
    }

    async fn update_status(&self, object: StoredObject) -> Result<StoredObject> {
        self.enter(StoreOp::UpdateStatus, Some(&object.key)).await?;

        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&object.key)
            .ok_or_else(|| StoreError::NotFound(object.key.to_string()))?;
        check_version(stored, object.version.as_ref())?;
        if normalize(&object.spec) != stored.spec {
            return Err(StoreError::Invalid(format!(
                "{}: status update must not modify spec",
                object.key
            )));
        }

        let mut updated = stored.clone();
        updated.status = object.status;
        updated.version = Some(self.next_version());
        debug!(
            "Updated status of {} to version {:?}",
            updated.key, updated.version
        );
        objects.insert(updated.key.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        self.enter(StoreOp::Delete, Some(key)).await?;
        match self.objects.write().await.remove(key) {
            Some(_) => {
                debug!("Deleted {}", key);
                Ok(())
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }
}
