// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker pool: one OS thread per worker, driven by control messages.
//!
//! # Lifecycle
//!
//! 1. [`WorkerPool::spawn`] queues a `ShareSet` for every shared region,
//!    registers the worker, starts its thread and waits for it to report
//!    ready. It does not wait for the worker to run anything.
//! 2. Every `Tick` runs the initializer once (first tick only) and then the
//!    update function.
//! 3. The worker leaves the active set when the pool destroys it, when it
//!    asks to be destroyed, or when user code panics.
//!
//! Region installs on the table after spawn reach every live worker as
//! `ShareSet` messages; the control channel is FIFO, so they land before any
//! later tick.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::protocol::{Control, Outbound, WorkerMessage};
use crate::region::Region;
use crate::table::{RegionSink, SharedRegionTable};
use crate::worker::{self, WorkerContext, WorkerId};

/// Errors raised by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The OS refused to create the worker thread.
    #[error("failed to construct worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// The thread died before it reported ready.
    #[error("{0} exited before reporting ready")]
    NotReady(WorkerId),
    /// The worker has been destroyed.
    #[error("{0} has been destroyed")]
    WorkerGone(WorkerId),
    /// Spawn was awaited outside a tokio runtime.
    #[error("worker pool needs a tokio runtime: {0}")]
    NoRuntime(#[from] TryCurrentError),
}

type Listener = Arc<dyn Fn(&WorkerMessage) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    callbacks: Mutex<Vec<Listener>>,
}

impl Listeners {
    fn push(&self, listener: Listener) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, message: &WorkerMessage) {
        // Snapshot so a callback may register further listeners.
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(message);
        }
    }
}

/// Coordinator-side handle to one worker. Clones refer to the same worker.
#[derive(Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    control: UnboundedSender<Control>,
    alive: Arc<AtomicBool>,
    listeners: Arc<Listeners>,
    pool: Weak<PoolShared>,
}

impl WorkerHandle {
    /// The worker's ordinal.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// False once the worker has been destroyed or has died.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Ask the worker to run one update pass. Does not wait for it.
    pub fn tick(&self) -> Result<(), PoolError> {
        if !self.is_alive() {
            return Err(PoolError::WorkerGone(self.id));
        }
        self.control
            .send(Control::Tick)
            .map_err(|_| PoolError::WorkerGone(self.id))
    }

    /// Call `listener` for every message this worker posts. Listeners run in
    /// registration order.
    pub fn on_message(&self, listener: impl Fn(&WorkerMessage) + Send + Sync + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    /// Terminate the worker. Unconditional; later ticks fail with
    /// [`PoolError::WorkerGone`].
    pub fn destroy(&self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.retire(self.id);
        }
        self.stop();
    }

    fn stop(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            let _ = self.control.send(Control::Shutdown);
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

struct PoolShared {
    table: SharedRegionTable,
    workers: Mutex<BTreeMap<WorkerId, WorkerHandle>>,
    next_id: AtomicUsize,
}

impl PoolShared {
    fn lock_workers(&self) -> MutexGuard<'_, BTreeMap<WorkerId, WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `id` from the active set and stop its thread.
    fn retire(&self, id: WorkerId) -> bool {
        let removed = self.lock_workers().remove(&id);
        match removed {
            Some(handle) => {
                handle.stop();
                debug!(worker = %id, "worker retired");
                true
            }
            None => false,
        }
    }
}

impl RegionSink for PoolShared {
    fn share_set(&self, name: &str, region: &Region) {
        let workers = self.lock_workers();
        for handle in workers.values() {
            let sent = handle.control.send(Control::ShareSet {
                label: name.to_owned(),
                region: region.clone(),
            });
            if sent.is_err() {
                debug!(worker = %handle.id, region = name, "share set to a stopped worker");
            }
        }
        debug!(region = name, workers = workers.len(), "broadcast share set");
    }
}

async fn dispatch(
    pool: Weak<PoolShared>,
    id: WorkerId,
    mut outbound: UnboundedReceiver<Outbound>,
    listeners: Arc<Listeners>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Post(message) => listeners.notify(&message),
            Outbound::Terminate => {
                info!(worker = %id, "worker requested termination");
                break;
            }
            Outbound::Fatal(reason) => {
                warn!(worker = %id, %reason, "worker died");
                break;
            }
        }
    }
    if let Some(pool) = pool.upgrade() {
        pool.retire(id);
    }
}

/// Owns the worker registry and keeps every worker's region table current.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Create a pool distributing the regions of `table`.
    pub fn new(table: SharedRegionTable) -> Self {
        let shared = Arc::new(PoolShared {
            table,
            workers: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(0),
        });
        let sink: Weak<PoolShared> = Arc::downgrade(&shared);
        shared.table.subscribe(sink);
        Self { shared }
    }

    /// The table this pool distributes.
    pub fn regions(&self) -> &SharedRegionTable {
        &self.shared.table
    }

    /// Start a worker running `init` once and `update` on every tick.
    ///
    /// `init` builds the worker's private state, which `update` receives by
    /// mutable reference. Both run on the worker's own thread. Resolves once
    /// the thread is up, before anything has run.
    pub async fn spawn<S, I, U>(&self, init: I, update: U) -> Result<WorkerHandle, PoolError>
    where
        S: 'static,
        I: FnOnce(&mut WorkerContext) -> S + Send + 'static,
        U: FnMut(&mut WorkerContext, &mut S) + Send + 'static,
    {
        let runtime = Handle::try_current()?;
        let id = WorkerId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let listeners = Arc::new(Listeners::default());
        let handle = WorkerHandle {
            id,
            control: control_tx,
            alive: Arc::clone(&alive),
            listeners: Arc::clone(&listeners),
            pool: Arc::downgrade(&self.shared),
        };

        {
            // Holding the registry while snapshotting means a concurrent
            // install is either in the snapshot or broadcast to this worker.
            let mut workers = self.shared.lock_workers();
            for (label, region) in self.shared.table.shared_snapshot() {
                let _ = handle.control.send(Control::ShareSet { label, region });
            }
            workers.insert(id, handle.clone());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let ctx = WorkerContext::new(id, outbound_tx, alive);
        let spawned = std::thread::Builder::new()
            .name(format!("htman-{id}"))
            .spawn(move || {
                let _ = ready_tx.send(());
                worker::run(ctx, control_rx, init, update);
            });
        if let Err(err) = spawned {
            self.shared.retire(id);
            error!(worker = %id, %err, "worker construction failed");
            return Err(PoolError::Spawn(err));
        }
        if ready_rx.await.is_err() {
            self.shared.retire(id);
            return Err(PoolError::NotReady(id));
        }

        runtime.spawn(dispatch(
            Arc::downgrade(&self.shared),
            id,
            outbound_rx,
            listeners,
        ));
        debug!(worker = %id, "worker spawned");
        Ok(handle)
    }

    /// Tick one worker. Fails for destroyed workers.
    pub fn tick(&self, handle: &WorkerHandle) -> Result<(), PoolError> {
        handle.tick()
    }

    /// Tick every live worker; returns how many were ticked.
    pub fn tick_all(&self) -> usize {
        self.workers()
            .iter()
            .filter(|handle| handle.tick().is_ok())
            .count()
    }

    /// Handle for a live worker.
    pub fn get(&self, id: WorkerId) -> Option<WorkerHandle> {
        self.shared.lock_workers().get(&id).cloned()
    }

    /// Live workers in ordinal order.
    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.shared.lock_workers().values().cloned().collect()
    }

    /// Number of live workers.
    pub fn len(&self) -> usize {
        self.shared.lock_workers().len()
    }

    /// True when no worker is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every worker.
    pub fn shutdown(&self) {
        let workers = std::mem::take(&mut *self.shared.lock_workers());
        let count = workers.len();
        for handle in workers.values() {
            handle.stop();
        }
        if count > 0 {
            info!(workers = count, "worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.len())
            .field("regions", &self.shared.table.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::pin;
    use std::task::{Context, Poll, Waker};

    #[test]
    fn spawn_outside_a_runtime_is_an_error() {
        let pool = WorkerPool::new(SharedRegionTable::new());
        let mut spawn = pin!(pool.spawn(
            |_: &mut WorkerContext| {},
            |_: &mut WorkerContext, _: &mut ()| {}
        ));
        let mut cx = Context::from_waker(Waker::noop());
        let polled = spawn.as_mut().poll(&mut cx);
        assert!(matches!(polled, Poll::Ready(Err(PoolError::NoRuntime(_)))));
        assert!(pool.is_empty());
    }
}
