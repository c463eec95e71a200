//! Per-key serialization of operations.
//!
//! Operations submitted for the same [`ResourceKey`] run one at a time in
//! submission order. Operations on different keys run concurrently, up to a
//! global limit that is only consumed once an operation has its key's turn.
//!
//! Each key keeps the completion future of the last submitted operation. A
//! new operation waits on that future and installs its own, which completes
//! only after both its predecessor and itself are done. An operation that is
//! dropped (cancelled) before or while running therefore releases its turn
//! without letting its successor overtake its predecessor.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Semaphore, oneshot};
use tracing::trace;

use crate::error::{ReconcileError, Result};
use crate::resource::ResourceKey;

type Turn = Shared<BoxFuture<'static, ()>>;

struct Tail {
    seq: u64,
    done: Turn,
}

type Tails = Arc<Mutex<HashMap<ResourceKey, Tail>>>;

/// Runs at most one operation per key at a time, FIFO per key.
pub struct KeySerializer {
    tails: Tails,
    permits: Arc<Semaphore>,
    next_seq: AtomicU64,
}

impl KeySerializer {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tails: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Queue `op` behind every operation previously submitted for `key`.
    ///
    /// The position in the queue is taken when this method is called, not
    /// when the returned future is first polled.
    pub fn submit<T, F>(
        &self,
        key: ResourceKey,
        op: F,
    ) -> impl Future<Output = Result<T>> + Send + use<T, F>
    where
        F: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let (prev, turn) = {
            let mut tails = lock(&self.tails);
            let prev = tails.get(&key).map(|t| t.done.clone());
            let after_prev = prev.clone();
            let done = async move {
                if let Some(prev) = after_prev {
                    prev.await;
                }
                // Err means the operation finished or was dropped.
                let _ = done_rx.await;
            }
            .boxed()
            .shared();
            tails.insert(
                key.clone(),
                Tail {
                    seq,
                    done: done.clone(),
                },
            );
            (prev, done)
        };

        let release = Release {
            tails: Arc::clone(&self.tails),
            key,
            seq,
            admitted: false,
            turn,
            _done: done_tx,
        };
        let permits = Arc::clone(&self.permits);

        async move {
            let mut release = release;
            if let Some(prev) = prev {
                trace!("{} queued behind a running operation", release.key);
                prev.await;
            }
            release.admitted = true;
            let _permit = permits.acquire_owned().await.map_err(|_| {
                ReconcileError::transient(&release.key, "serializer has been shut down")
            })?;
            op.await
        }
    }

    /// Keys with a queued or running operation.
    pub fn busy_keys(&self) -> usize {
        lock(&self.tails).len()
    }
}

fn lock(tails: &Tails) -> MutexGuard<'_, HashMap<ResourceKey, Tail>> {
    tails.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ends an operation's turn when dropped, whether it completed or not.
struct Release {
    tails: Tails,
    key: ResourceKey,
    seq: u64,
    /// Set once every earlier operation on the key has finished.
    admitted: bool,
    /// Completes once this operation and every earlier one are done.
    turn: Turn,
    _done: oneshot::Sender<()>,
}

impl Drop for Release {
    fn drop(&mut self) {
        if self.admitted {
            remove_tail(&self.tails, &self.key, self.seq);
            return;
        }

        // A waiter dropped before its turn leaves its tail in place so later
        // submissions still wait for the operations ahead of it. If nothing
        // was queued behind it, the entry goes once those operations finish.
        if !lock(&self.tails)
            .get(&self.key)
            .is_some_and(|t| t.seq == self.seq)
        {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            trace!("{} dropped outside a runtime, tail kept", self.key);
            return;
        };
        let tails = Arc::clone(&self.tails);
        let key = self.key.clone();
        let seq = self.seq;
        let turn = self.turn.clone();
        runtime.spawn(async move {
            turn.await;
            remove_tail(&tails, &key, seq);
        });
    }
}

fn remove_tail(tails: &Tails, key: &ResourceKey, seq: u64) {
    let mut tails = lock(tails);
    if tails.get(key).is_some_and(|t| t.seq == seq) {
        tails.remove(key);
    }
}
