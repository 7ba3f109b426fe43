// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The worker side: what user code sees, and the thread's message loop.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, trace};

use crate::fields::{assign, FieldView, Record};
use crate::protocol::{Control, Outbound, WorkerMessage};
use crate::region::Region;
use crate::table::LocalShares;

/// Ordinal of a worker. Assigned at spawn, never reused within a pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// The ordinal as an index (into workload tables and the like).
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Everything a worker's initializer and update functions can reach.
pub struct WorkerContext {
    id: WorkerId,
    shares: LocalShares,
    outbox: UnboundedSender<Outbound>,
    alive: Arc<AtomicBool>,
}

impl WorkerContext {
    pub(crate) fn new(id: WorkerId, outbox: UnboundedSender<Outbound>, alive: Arc<AtomicBool>) -> Self {
        Self {
            id,
            shares: LocalShares::default(),
            outbox,
            alive,
        }
    }

    /// This worker's ordinal.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// This worker's ordinal as an index.
    pub fn index(&self) -> usize {
        self.id.index()
    }

    /// The worker's region table.
    pub fn shares(&self) -> &LocalShares {
        &self.shares
    }

    /// Current region under `name`.
    pub fn region(&self, name: &str) -> Option<Region> {
        self.shares.get(name)
    }

    /// Records over the region `name`; empty when the region is unknown.
    pub fn assign_keys<F: AsRef<str>>(&self, name: &str, fields: &[F]) -> Vec<Record> {
        assign(&self.shares, name, fields)
    }

    /// A reusable view over the region `name`.
    pub fn view<F: AsRef<str>>(&self, name: &str, fields: &[F]) -> Option<FieldView> {
        FieldView::bind(&self.shares, name, fields)
    }

    /// Deliver `message` to the coordinator's listeners.
    pub fn post(&self, message: WorkerMessage) {
        self.send(Outbound::Post(message));
    }

    /// Report that this worker finished its range.
    pub fn done(&self) {
        self.post(WorkerMessage::Done);
    }

    /// Ask the coordinator to terminate this worker.
    pub fn destroy(&self) {
        self.send(Outbound::Terminate);
    }

    /// True once the coordinator has destroyed this worker. Long updates may
    /// poll this to stop early.
    pub fn is_cancelled(&self) -> bool {
        !self.alive.load(Ordering::Acquire)
    }

    fn send(&self, message: Outbound) {
        // The coordinator may already be gone; nothing to tell it then.
        let _ = self.outbox.send(message);
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Thread body: apply control messages until shutdown, cancellation, or a
/// panic in user code.
pub(crate) fn run<S, I, U>(
    mut ctx: WorkerContext,
    mut control: UnboundedReceiver<Control>,
    init: I,
    mut update: U,
) where
    I: FnOnce(&mut WorkerContext) -> S,
    U: FnMut(&mut WorkerContext, &mut S),
{
    let mut init = Some(init);
    let mut state: Option<S> = None;

    while let Some(message) = control.blocking_recv() {
        if ctx.is_cancelled() {
            break;
        }
        match message {
            Control::Tick => {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    if let Some(init) = init.take() {
                        state = Some(init(&mut ctx));
                    }
                    if let Some(state) = state.as_mut() {
                        update(&mut ctx, state);
                    }
                }));
                if let Err(payload) = outcome {
                    let reason = panic_reason(payload.as_ref());
                    error!(worker = %ctx.id, %reason, "worker panicked");
                    ctx.send(Outbound::Fatal(reason));
                    break;
                }
            }
            Control::ShareSet { label, region } => {
                trace!(worker = %ctx.id, region = %label, len = region.len(), "share set");
                ctx.shares.install(&label, region);
            }
            Control::Shutdown => break,
        }
    }
    debug!(worker = %ctx.id, "worker stopped");
}
