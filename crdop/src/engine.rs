//! Reconcile engine.
//!
//! Drives one resource kind toward caller-supplied desired specs. Every
//! reconcile and status update goes through the [`KeySerializer`], so the
//! non-atomic read-decide-write sequence never races another operation on the
//! same key inside this process. Races with other actors are caught by the
//! store's version token check and surfaced as `Conflict`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::ResourceClient;
use crate::config::EngineConfig;
use crate::error::{ReconcileError, Result};
use crate::guard::StatusGuard;
use crate::resource::{ManagedResource, ReconcileResult, ResourceKey, ResourceKind};
use crate::serializer::KeySerializer;
use crate::store::ResourceStore;

/// Reconciles resources of kind `K`.
pub struct ReconcileEngine<K: ResourceKind> {
    client: ResourceClient<K>,
    guard: StatusGuard<K>,
    serializer: KeySerializer,
    poll_interval: Duration,
}

impl<K: ResourceKind> ReconcileEngine<K> {
    pub fn new(store: Arc<dyn ResourceStore>, config: EngineConfig) -> Self {
        let client = ResourceClient::new(store, &config);
        Self {
            guard: StatusGuard::new(client.clone()),
            client,
            serializer: KeySerializer::new(config.max_concurrent_operations()),
            poll_interval: config.poll_interval(),
        }
    }

    /// The underlying client, for reads that need no serialization.
    pub fn client(&self) -> &ResourceClient<K> {
        &self.client
    }

    /// Key of the resource `name` in `namespace`.
    pub fn key(&self, namespace: &str, name: &str) -> ResourceKey {
        self.client.key(namespace, name)
    }

    /// Converge `key` to `desired`: create, update, delete or do nothing.
    ///
    /// `None` means the resource should not exist. The operation is queued
    /// behind earlier operations on the same key at call time.
    pub fn reconcile(
        &self,
        key: ResourceKey,
        desired: Option<K::Spec>,
    ) -> impl Future<Output = Result<ReconcileResult<K>>> + Send + use<K> {
        let client = self.client.clone();
        self.serializer.submit(key.clone(), async move {
            let result = reconcile_once(&client, &key, desired).await;
            match &result {
                Ok(outcome) => debug!("Reconciled {}: {}", key, outcome.action()),
                Err(err) => warn!("Reconcile of {} failed: {}", key, err),
            }
            result
        })
    }

    /// Write `resource.status`, provided nothing changed since it was read.
    ///
    /// Serialized with reconciles of the same key.
    pub fn update_status(
        &self,
        resource: ManagedResource<K>,
    ) -> impl Future<Output = Result<ManagedResource<K>>> + Send + use<K> {
        let guard = self.guard.clone();
        self.serializer
            .submit(resource.key.clone(), async move { guard.update_status(resource).await })
    }

    /// Current state of `key`, `None` if it does not exist.
    pub async fn get(&self, key: &ResourceKey) -> Result<Option<ManagedResource<K>>> {
        self.client.get(key).await
    }

    /// All resources of this kind in `namespace`.
    pub async fn list(&self, namespace: &str) -> Result<Vec<ManagedResource<K>>> {
        self.client.list(namespace).await
    }

    /// Poll `key` until `predicate` holds.
    ///
    /// Fails with `NotFound` if the resource disappears and with `Transient`
    /// if `timeout` expires first.
    pub async fn wait_for<P>(
        &self,
        key: &ResourceKey,
        timeout: Duration,
        predicate: P,
    ) -> Result<ManagedResource<K>>
    where
        P: Fn(&ManagedResource<K>) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self
                .client
                .get(key)
                .await?
                .ok_or_else(|| ReconcileError::NotFound(key.clone()))?;
            if predicate(&current) {
                return Ok(current);
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(ReconcileError::transient(
                    key,
                    format!("condition not met within {:?}", timeout),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll `key` until it reports `Ready=True`.
    pub async fn wait_for_ready(
        &self,
        key: &ResourceKey,
        timeout: Duration,
    ) -> Result<ManagedResource<K>> {
        debug!("Waiting up to {:?} for {} to become ready", timeout, key);
        self.wait_for(key, timeout, |r| r.is_ready()).await
    }
}

async fn reconcile_once<K: ResourceKind>(
    client: &ResourceClient<K>,
    key: &ResourceKey,
    desired: Option<K::Spec>,
) -> Result<ReconcileResult<K>> {
    let current = client.get(key).await?;

    match (desired, current) {
        (None, None) => {
            debug!("{} does not exist, nothing to delete", key);
            Ok(ReconcileResult::NoOp)
        }
        (None, Some(_)) => {
            client.delete(key).await?;
            info!("Deleted {}", key);
            Ok(ReconcileResult::Deleted)
        }
        (Some(spec), None) => {
            let created = client
                .create(ManagedResource::new(key.clone(), spec))
                .await?;
            info!(
                "Created {} at version {}",
                key,
                created.version.as_ref().map(|v| v.as_str()).unwrap_or_default()
            );
            Ok(ReconcileResult::Created(created))
        }
        (Some(spec), Some(current)) => {
            if K::spec_matches(&spec, &current.spec) {
                debug!("{} already matches desired spec", key);
                return Ok(ReconcileResult::NoOp);
            }
            let read_at = current.version.clone();
            let updated = client.patch_spec(current, spec).await?;
            info!(
                "Updated {} ({} -> {})",
                key,
                read_at.as_ref().map(|v| v.as_str()).unwrap_or_default(),
                updated.version.as_ref().map(|v| v.as_str()).unwrap_or_default()
            );
            Ok(ReconcileResult::Updated(updated))
        }
    }
}
