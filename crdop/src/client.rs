//! Typed client for one resource kind.
//!
//! Converts between [`ManagedResource`] and the store's JSON documents, bounds
//! every call by the configured timeout and translates store errors into
//! [`ReconcileError`]s.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{ReconcileError, Result};
use crate::resource::{ManagedResource, ResourceKey, ResourceKind};
use crate::store::patch::merge_diff;
use crate::store::{ResourceStore, StoreError, StoredObject};

/// Client bound to resource kind `K`.
pub struct ResourceClient<K: ResourceKind> {
    store: Arc<dyn ResourceStore>,
    timeout: Duration,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Clone for ResourceClient<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout: self.timeout,
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> ResourceClient<K> {
    pub fn new(store: Arc<dyn ResourceStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            timeout: config.request_timeout(),
            _kind: PhantomData,
        }
    }

    /// Key of the resource `name` in `namespace`.
    pub fn key(&self, namespace: &str, name: &str) -> ResourceKey {
        ResourceKey::of::<K>(namespace, name)
    }

    /// Get a resource. `None` if it does not exist.
    pub async fn get(&self, key: &ResourceKey) -> Result<Option<ManagedResource<K>>> {
        self.check_kind(key)?;
        let object = self.call("get", key, self.store.get(key)).await?;
        object.map(|o| self.decode(o)).transpose()
    }

    /// List resources of this kind in `namespace`.
    pub async fn list(&self, namespace: &str) -> Result<Vec<ManagedResource<K>>> {
        let scope = ResourceKey::new(K::KIND, namespace, "");
        let objects = self
            .call("list", &scope, self.store.list(K::KIND, namespace))
            .await?;
        objects.into_iter().map(|o| self.decode(o)).collect()
    }

    /// Create a resource. The returned copy carries the assigned token.
    pub async fn create(&self, resource: ManagedResource<K>) -> Result<ManagedResource<K>> {
        let object = self.encode(resource)?;
        let key = object.key.clone();
        let created = self.call("create", &key, self.store.create(object)).await?;
        self.decode(created)
    }

    /// Merge the resource's spec onto the stored one, guarded by its token.
    pub async fn patch(&self, resource: ManagedResource<K>) -> Result<ManagedResource<K>> {
        let object = self.encode(resource)?;
        let key = object.key.clone();
        let patched = self.call("patch", &key, self.store.patch(object)).await?;
        self.decode(patched)
    }

    /// Bring the stored spec of `current` to exactly `desired`.
    ///
    /// Sends the difference between the two specs as a merge patch guarded
    /// by `current`'s token, so fields missing from `desired` are removed.
    pub async fn patch_spec(
        &self,
        current: ManagedResource<K>,
        desired: K::Spec,
    ) -> Result<ManagedResource<K>> {
        let mut object = self.encode(current)?;
        let desired = serde_json::to_value(&desired)
            .map_err(|e| ReconcileError::invalid(&object.key, format!("spec: {}", e)))?;
        object.spec = merge_diff(&object.spec, &desired);
        let key = object.key.clone();
        let patched = self.call("patch", &key, self.store.patch(object)).await?;
        self.decode(patched)
    }

    /// Replace the stored status, guarded by the resource's token.
    pub async fn update_status(&self, resource: ManagedResource<K>) -> Result<ManagedResource<K>> {
        let object = self.encode(resource)?;
        let key = object.key.clone();
        let updated = self
            .call("update_status", &key, self.store.update_status(object))
            .await?;
        self.decode(updated)
    }

    /// Delete a resource. Deleting an absent resource succeeds.
    pub async fn delete(&self, key: &ResourceKey) -> Result<()> {
        self.check_kind(key)?;
        match self.call("delete", key, self.store.delete(key)).await {
            Err(ReconcileError::NotFound(_)) => {
                debug!("{} already absent", key);
                Ok(())
            }
            other => other,
        }
    }

    async fn call<T>(
        &self,
        op: &str,
        key: &ResourceKey,
        fut: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| ReconcileError::from_store(key, e)),
            Err(_) => Err(ReconcileError::transient(
                key,
                format!("{} timed out after {:?}", op, self.timeout),
            )),
        }
    }

    fn check_kind(&self, key: &ResourceKey) -> Result<()> {
        if key.kind == K::KIND {
            Ok(())
        } else {
            Err(ReconcileError::invalid(
                key,
                format!("client for kind {} cannot handle kind {}", K::KIND, key.kind),
            ))
        }
    }

    fn encode(&self, resource: ManagedResource<K>) -> Result<StoredObject> {
        self.check_kind(&resource.key)?;
        let spec = serde_json::to_value(&resource.spec)
            .map_err(|e| ReconcileError::invalid(&resource.key, format!("spec: {}", e)))?;
        let status = serde_json::to_value(&resource.status)
            .map_err(|e| ReconcileError::invalid(&resource.key, format!("status: {}", e)))?;
        Ok(StoredObject {
            key: resource.key,
            spec,
            status,
            version: resource.version,
            uid: resource.uid,
            generation: resource.generation,
            created_at: resource.created_at,
        })
    }

    fn decode(&self, object: StoredObject) -> Result<ManagedResource<K>> {
        let spec = serde_json::from_value(object.spec)
            .map_err(|e| ReconcileError::invalid(&object.key, format!("stored spec: {}", e)))?;
        let status = if object.status.is_null() {
            K::Status::default()
        } else {
            serde_json::from_value(object.status).map_err(|e| {
                ReconcileError::invalid(&object.key, format!("stored status: {}", e))
            })?
        };
        Ok(ManagedResource::from_parts(
            object.key,
            spec,
            status,
            object.version,
            object.uid,
            object.generation,
            object.created_at,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct WidgetSpec {
        replicas: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct WidgetStatus {
        phase: Option<String>,
    }

    struct Widget;

    impl ResourceKind for Widget {
        const KIND: &'static str = "Widget";
        type Spec = WidgetSpec;
        type Status = WidgetStatus;
    }

    fn client(store: Arc<MemoryStore>, timeout: Duration) -> ResourceClient<Widget> {
        let config = EngineConfig::default().with_request_timeout(timeout);
        ResourceClient::new(store, &config)
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store, Duration::from_secs(1));
        let key = client.key("ns", "w1");
        assert!(client.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store, Duration::from_secs(1));
        let key = client.key("ns", "w1");

        let created = client
            .create(ManagedResource::new(key.clone(), WidgetSpec { replicas: 2 }))
            .await
            .unwrap();
        assert!(created.version.is_some());

        let fetched = client.get(&key).await.unwrap().unwrap();
        assert_eq!(fetched.spec, WidgetSpec { replicas: 2 });
        assert_eq!(fetched.status, WidgetStatus::default());
        assert_eq!(fetched.version, created.version);
    }

    #[tokio::test]
    async fn test_patch_spec_then_update_status() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store, Duration::from_secs(1));
        let key = client.key("ns", "w1");
        let created = client
            .create(ManagedResource::new(key, WidgetSpec { replicas: 1 }))
            .await
            .unwrap();

        let patched = client
            .patch_spec(created.clone(), WidgetSpec { replicas: 3 })
            .await
            .unwrap();
        assert_eq!(patched.spec, WidgetSpec { replicas: 3 });
        assert_ne!(patched.version, created.version);

        let status = WidgetStatus {
            phase: Some("Running".into()),
        };
        let updated = client
            .update_status(patched.with_status(status.clone()))
            .await
            .unwrap();
        assert_eq!(updated.status, status);
    }

    #[tokio::test]
    async fn test_delete_absent_succeeds() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store, Duration::from_secs(1));
        let key = client.key("ns", "missing");
        client.delete(&key).await.unwrap();
        client.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_kind_is_invalid() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone(), Duration::from_secs(1));
        let key = ResourceKey::new("Gadget", "ns", "g1");

        let err = client.get(&key).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Invalid { .. }));

        let err = client
            .create(ManagedResource::new(key, WidgetSpec::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Invalid { .. }));
        assert_eq!(store.create_attempts(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let store = Arc::new(MemoryStore::new());
        store.set_latency(Some(Duration::from_secs(5)));
        let client = client(store, Duration::from_millis(20));
        let key = client.key("ns", "w1");

        let err = client.get(&key).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_store_unavailable_is_transient() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let client = client(store, Duration::from_secs(1));
        let key = client.key("ns", "w1");

        assert!(client.get(&key).await.unwrap_err().is_transient());
        assert!(client.delete(&key).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_list() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store, Duration::from_secs(1));
        for name in ["w2", "w1"] {
            client
                .create(ManagedResource::new(
                    client.key("ns", name),
                    WidgetSpec::default(),
                ))
                .await
                .unwrap();
        }

        let items = client.list("ns").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key.name, "w1");
        assert!(client.list("other").await.unwrap().is_empty());
    }
}
