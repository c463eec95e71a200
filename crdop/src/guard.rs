//! Optimistic-concurrency guard for status updates.
//!
//! A status update is only accepted if nothing was written to the resource
//! since the copy being updated was read. The guard never retries and never
//! merges: a stale caller gets `Conflict` (re-read and retry in the next
//! cycle) or `NotFound` (the resource is gone, abandon).

use tracing::{debug, info, warn};

use crate::client::ResourceClient;
use crate::error::{ReconcileError, Result};
use crate::resource::{ManagedResource, ResourceKind};

pub struct StatusGuard<K: ResourceKind> {
    client: ResourceClient<K>,
}

impl<K: ResourceKind> Clone for StatusGuard<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<K: ResourceKind> StatusGuard<K> {
    pub fn new(client: ResourceClient<K>) -> Self {
        Self { client }
    }

    /// Write `resource.status` if the resource is still at `resource.version`.
    pub async fn update_status(&self, resource: ManagedResource<K>) -> Result<ManagedResource<K>> {
        let key = resource.key.clone();
        let Some(read_at) = resource.version.clone() else {
            return Err(ReconcileError::invalid(
                &key,
                "status update requires a resource read from the store",
            ));
        };

        debug!("Updating status of {} read at version {}", key, read_at);
        match self.client.update_status(resource).await {
            Ok(updated) => {
                info!(
                    "Status of {} updated ({} -> {})",
                    key,
                    read_at,
                    updated
                        .version
                        .as_ref()
                        .map(|v| v.as_str())
                        .unwrap_or_default()
                );
                Ok(updated)
            }
            Err(err @ ReconcileError::Conflict { .. }) => {
                warn!(
                    "Status of {} is stale (read at version {}), not updated: {}",
                    key, read_at, err
                );
                Err(err)
            }
            Err(err @ ReconcileError::NotFound(_)) => {
                warn!("{} was deleted before its status could be updated", key);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
