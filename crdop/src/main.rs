//! crdop-soak: exercises the reconcile engine against an in-memory store.
//!
//! Every round reconciles a set of resources toward a new desired spec and
//! then reports status from a copy read before a competing writer touched
//! some of them. Stale status reports must come back as conflicts, never as
//! silently merged writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crdop::{
    Condition, EngineConfig, MemoryStore, ReconcileEngine, ReconcileError, ReconcileResult,
    ResourceKind, set_condition,
};

#[derive(Parser)]
#[command(name = "crdop-soak")]
#[command(about = "Concurrent reconcile and status update soak test")]
struct Args {
    /// Number of resources
    #[arg(long, default_value = "32")]
    resources: usize,

    /// Number of reconcile rounds
    #[arg(long, default_value = "10")]
    rounds: u32,

    /// Maximum operations running at once
    #[arg(long, default_value = "16")]
    concurrency: usize,

    /// Simulated store latency in milliseconds
    #[arg(long, default_value = "2")]
    latency_ms: u64,

    /// Timeout for a single store call in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Every n-th resource gets a competing spec write each round
    #[arg(long, default_value = "3")]
    contend_every: usize,

    /// Namespace for the generated resources
    #[arg(long, default_value = "soak")]
    namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerSpec {
    replicas: u32,
    revision: u32,
    #[serde(default)]
    annotations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    observed_generation: u64,
}

struct Worker;

impl ResourceKind for Worker {
    const KIND: &'static str = "Worker";
    type Spec = WorkerSpec;
    type Status = WorkerStatus;

    fn conditions(status: &WorkerStatus) -> &[Condition] {
        &status.conditions
    }
}

#[derive(Default)]
struct Stats {
    created: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    noop: AtomicU64,
    status_written: AtomicU64,
    conflicts: AtomicU64,
    not_found: AtomicU64,
    failed: AtomicU64,
}

impl Stats {
    fn record(&self, result: &ReconcileResult<Worker>) {
        let counter = match result {
            ReconcileResult::Created(_) => &self.created,
            ReconcileResult::Updated(_) => &self.updated,
            ReconcileResult::Deleted => &self.deleted,
            ReconcileResult::NoOp => &self.noop,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, err: &ReconcileError) {
        let counter = match err {
            ReconcileError::Conflict { .. } => &self.conflicts,
            ReconcileError::NotFound(_) => &self.not_found,
            _ => {
                warn!("{}", err);
                &self.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

fn desired(round: u32) -> WorkerSpec {
    WorkerSpec {
        replicas: 1 + round % 3,
        revision: round,
        annotations: vec![],
    }
}

/// One round for one resource: reconcile, race a competing writer, report status.
async fn run_one(
    engine: Arc<ReconcileEngine<Worker>>,
    rival: Arc<ReconcileEngine<Worker>>,
    stats: Arc<Stats>,
    namespace: String,
    index: usize,
    round: u32,
    contend: bool,
) {
    let key = engine.key(&namespace, &format!("worker-{}", index));

    let reconciled = match engine.reconcile(key.clone(), Some(desired(round))).await {
        Ok(result) => {
            stats.record(&result);
            result.into_resource()
        }
        Err(err) => {
            stats.record_error(&err);
            return;
        }
    };
    let read = match reconciled {
        Some(resource) => resource,
        None => match engine.get(&key).await {
            Ok(Some(resource)) => resource,
            Ok(None) => return,
            Err(err) => {
                stats.record_error(&err);
                return;
            }
        },
    };

    if contend {
        let mut spec = read.spec.clone();
        spec.annotations = vec![format!("rival-{}", round)];
        match rival.reconcile(key.clone(), Some(spec)).await {
            Ok(result) => stats.record(&result),
            Err(err) => stats.record_error(&err),
        }
    }

    let mut status = read.status.clone();
    set_condition(&mut status.conditions, Condition::ready());
    status.observed_generation = read.generation;
    match engine.update_status(read.with_status(status)).await {
        Ok(_) => {
            stats.status_written.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => stats.record_error(&err),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("crdop=info".parse()?)
                .add_directive("crdop_soak=info".parse()?),
        )
        .init();

    let args = Args::parse();
    if args.resources == 0 {
        bail!("--resources must be at least 1");
    }

    let store = Arc::new(MemoryStore::new());
    if args.latency_ms > 0 {
        store.set_latency(Some(Duration::from_millis(args.latency_ms)));
    }

    let config = EngineConfig::default()
        .with_request_timeout(Duration::from_millis(args.timeout_ms))
        .with_max_concurrent_operations(args.concurrency);
    let engine = Arc::new(ReconcileEngine::<Worker>::new(store.clone(), config.clone()));
    let rival = Arc::new(ReconcileEngine::<Worker>::new(store.clone(), config));
    let stats = Arc::new(Stats::default());

    info!(
        "Soaking {} resources for {} rounds (concurrency {}, latency {}ms)",
        args.resources, args.rounds, args.concurrency, args.latency_ms
    );
    let started = Instant::now();

    for round in 0..args.rounds {
        let mut handles = Vec::with_capacity(args.resources);
        for index in 0..args.resources {
            let contend = args.contend_every > 0 && index % args.contend_every == 0;
            handles.push(tokio::spawn(run_one(
                Arc::clone(&engine),
                Arc::clone(&rival),
                Arc::clone(&stats),
                args.namespace.clone(),
                index,
                round,
                contend,
            )));
        }
        for handle in handles {
            handle.await?;
        }
        info!("Round {} done", round);
    }

    for index in 0..args.resources {
        let key = engine.key(&args.namespace, &format!("worker-{}", index));
        match engine.reconcile(key, None).await {
            Ok(result) => stats.record(&result),
            Err(err) => stats.record_error(&err),
        }
    }

    info!(
        "Finished in {:?}: created={} updated={} noop={} deleted={} status={} conflicts={} not_found={} failed={}",
        started.elapsed(),
        Stats::get(&stats.created),
        Stats::get(&stats.updated),
        Stats::get(&stats.noop),
        Stats::get(&stats.deleted),
        Stats::get(&stats.status_written),
        Stats::get(&stats.conflicts),
        Stats::get(&stats.not_found),
        Stats::get(&stats.failed),
    );

    if !store.is_empty().await {
        bail!("{} resources left behind", store.len().await);
    }
    if Stats::get(&stats.failed) > 0 {
        bail!("{} operations failed", Stats::get(&stats.failed));
    }
    Ok(())
}
