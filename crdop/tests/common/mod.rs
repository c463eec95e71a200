//! Shared test utilities for crdop integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crdop::{
    Condition, EngineConfig, ManagedResource, MemoryStore, ReconcileEngine, ResourceKey,
    ResourceKind, set_condition,
};
use serde::{Deserialize, Serialize};

pub const NAMESPACE: &str = "custom-resource-operator-it";
pub const RESOURCE_NAME: &str = "my-test-resource";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub initial_delay_seconds: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSpec {
    pub replicas: u32,
    pub image: Option<String>,
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: u64,
}

/// A Kafka Connect-like custom resource.
pub struct Connect;

impl ResourceKind for Connect {
    const KIND: &'static str = "KafkaConnect";
    type Spec = ConnectSpec;
    type Status = ConnectStatus;

    fn conditions(status: &ConnectStatus) -> &[Condition] {
        &status.conditions
    }
}

/// Engine wired to a fresh in-memory store.
pub struct TestEngine {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<ReconcileEngine<Connect>>,
}

impl TestEngine {
    pub fn spawn() -> Self {
        Self::with_config(
            EngineConfig::default()
                .with_request_timeout(Duration::from_secs(2))
                .with_poll_interval(Duration::from_millis(10)),
        )
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(ReconcileEngine::new(store.clone(), config));
        Self { store, engine }
    }

    pub fn key(&self) -> ResourceKey {
        self.engine.key(NAMESPACE, RESOURCE_NAME)
    }

    pub fn named(&self, name: &str) -> ResourceKey {
        self.engine.key(NAMESPACE, name)
    }

    /// A second engine on the same store, standing in for another actor.
    pub fn other_actor(&self) -> ReconcileEngine<Connect> {
        ReconcileEngine::new(self.store.clone(), EngineConfig::default())
    }
}

pub fn spec() -> ConnectSpec {
    ConnectSpec {
        replicas: 1,
        image: Some("quay.io/strimzi/kafka:latest".to_string()),
        liveness_probe: None,
        labels: BTreeMap::new(),
    }
}

pub fn spec_with_modifications(spec: &ConnectSpec) -> ConnectSpec {
    ConnectSpec {
        liveness_probe: Some(Probe {
            initial_delay_seconds: 14,
        }),
        ..spec.clone()
    }
}

pub fn spec_with_labels(labels: &[(&str, &str)]) -> ConnectSpec {
    ConnectSpec {
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..spec()
    }
}

pub fn with_ready_status(resource: &ManagedResource<Connect>) -> ManagedResource<Connect> {
    let mut status = resource.status.clone();
    set_condition(&mut status.conditions, Condition::ready());
    status.observed_generation = resource.generation;
    resource.clone().with_status(status)
}

pub fn with_not_ready_status(
    resource: &ManagedResource<Connect>,
    reason: &str,
) -> ManagedResource<Connect> {
    let mut status = resource.status.clone();
    set_condition(
        &mut status.conditions,
        Condition::not_ready(reason, "scaling in progress"),
    );
    status.observed_generation = resource.generation;
    resource.clone().with_status(status)
}
