// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker fixtures: call counters and message recorders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use htman_core::{WorkerContext, WorkerHandle, WorkerId, WorkerMessage};

/// Counts initializer and update calls across threads.
#[derive(Clone, Default)]
pub struct Tally {
    inits: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

impl Tally {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializer calls so far.
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// Update calls so far.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Initializer that only counts itself.
    pub fn init(&self) -> impl FnOnce(&mut WorkerContext) + Send + 'static {
        let inits = Arc::clone(&self.inits);
        move |_: &mut WorkerContext| {
            inits.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Update that counts itself and posts `Done`.
    pub fn update(&self) -> impl FnMut(&mut WorkerContext, &mut ()) + Send + 'static {
        let updates = Arc::clone(&self.updates);
        move |ctx: &mut WorkerContext, _: &mut ()| {
            updates.fetch_add(1, Ordering::SeqCst);
            ctx.done();
        }
    }
}

/// Records every message posted by the handles it is attached to.
#[derive(Clone, Default)]
pub struct MessageLog {
    seen: Arc<Mutex<Vec<(WorkerId, WorkerMessage)>>>,
}

impl MessageLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording messages from `handle`.
    pub fn attach(&self, handle: &WorkerHandle) {
        let seen = Arc::clone(&self.seen);
        let id = handle.id();
        handle.on_message(move |message| {
            seen.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((id, message.clone()));
        });
    }

    /// Everything recorded so far, in arrival order.
    pub fn messages(&self) -> Vec<(WorkerId, WorkerMessage)> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded messages.
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recorded `Done` messages.
    pub fn done_count(&self) -> usize {
        self.messages()
            .iter()
            .filter(|(_, message)| *message == WorkerMessage::Done)
            .count()
    }
}
