// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixed-rate tick loop over a set of registered workers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use htman_core::{WorkerHandle, WorkerId, WorkerMessage};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, trace};

use crate::barrier::{FrameBarrier, FrameReport};

/// Tick rate for a [`TickScheduler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    tick_hz: f64,
}

impl SchedulerConfig {
    /// Scheduler ticking `tick_hz` times per second.
    pub fn new(tick_hz: f64) -> Result<Self> {
        if !(tick_hz.is_finite() && tick_hz > 0.0) {
            bail!("tick rate must be a positive number of hertz, got {tick_hz}");
        }
        Ok(Self { tick_hz })
    }

    /// Ticks per second.
    pub fn tick_hz(&self) -> f64 {
        self.tick_hz
    }

    /// Time between ticks.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_hz: 60.0 }
    }
}

type FrameCallback = Arc<dyn Fn(&FrameReport) + Send + Sync>;
type StartCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct State {
    workers: BTreeMap<WorkerId, WorkerHandle>,
    barrier: FrameBarrier,
    /// Frame-complete callbacks for the finished frame have returned.
    presented: bool,
    total_ticks: u64,
}

impl State {
    fn live(&self) -> BTreeSet<WorkerId> {
        self.workers.keys().copied().collect()
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    on_complete: Mutex<Vec<FrameCallback>>,
    on_start: Mutex<Vec<StartCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn report(&self, worker: WorkerId) {
        let completed = {
            let mut state = lock(&self.state);
            let live = state.live();
            state.barrier.report(worker, &live)
        };
        if let Some(report) = completed {
            self.frame_complete(&report);
        }
    }

    /// Runs with the barrier already marked complete; the next frame cannot
    /// start until `presented` is set at the end.
    fn frame_complete(&self, report: &FrameReport) {
        debug!(
            frame = report.frame,
            ticks = report.ticks,
            workers = report.workers,
            elapsed_ms = report.elapsed.as_secs_f64() * 1000.0,
            "frame complete"
        );
        let callbacks = lock(&self.on_complete).clone();
        for callback in callbacks {
            callback(report);
        }
        lock(&self.state).presented = true;
    }

    fn frame_start(&self, frame: u64) {
        trace!(frame, "frame start");
        let callbacks = lock(&self.on_start).clone();
        for callback in callbacks {
            callback(frame);
        }
    }

    fn step(&self) -> usize {
        let (workers, completed, started) = {
            let mut state = lock(&self.state);
            state.workers.retain(|_, handle| handle.is_alive());
            let live = state.live();
            let completed = state.barrier.settle(&live);
            let started = if completed.is_none() && state.barrier.is_complete() && state.presented {
                state.barrier.reset();
                state.presented = false;
                Some(state.barrier.frame())
            } else {
                None
            };
            state.barrier.note_tick();
            state.total_ticks += 1;
            if state.total_ticks.is_multiple_of(600) {
                debug!(ticks = state.total_ticks, frame = state.barrier.frame(), "scheduler heartbeat");
            }
            let workers: Vec<WorkerHandle> = state.workers.values().cloned().collect();
            (workers, completed, started)
        };
        if let Some(report) = completed {
            self.frame_complete(&report);
        }
        if let Some(frame) = started {
            self.frame_start(frame);
        }

        let ticked = workers.iter().filter(|handle| handle.tick().is_ok()).count();
        if ticked < workers.len() {
            // Some workers died since the registry was pruned; they no
            // longer hold the frame open.
            let completed = {
                let mut state = lock(&self.state);
                state.workers.retain(|_, handle| handle.is_alive());
                let live = state.live();
                state.barrier.settle(&live)
            };
            if let Some(report) = completed {
                self.frame_complete(&report);
            }
        }
        trace!(ticked, "tick");
        ticked
    }
}

async fn run(shared: Arc<Shared>, period: Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        shared.step();
    }
}

/// Drives registered workers at a fixed rate and reports frame completion.
///
/// Every tick: if the last frame completed, reset the barrier and run the
/// frame-start callbacks, then tick every live worker without waiting. A
/// frame completes when every registered worker has posted
/// [`WorkerMessage::Done`]; frame-complete callbacks then fire exactly once.
pub struct TickScheduler {
    shared: Arc<Shared>,
    config: SchedulerConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TickScheduler {
    /// Scheduler with the given tick rate. Nothing runs until [`start`](Self::start).
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            config,
            task: Mutex::new(None),
        }
    }

    /// The configured tick rate.
    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Add `handle` to the tick set and count its `Done` messages.
    pub fn register(&self, handle: &WorkerHandle) {
        let id = handle.id();
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        handle.on_message(move |message| {
            if *message == WorkerMessage::Done {
                if let Some(shared) = shared.upgrade() {
                    shared.report(id);
                }
            }
        });
        lock(&self.shared.state).workers.insert(id, handle.clone());
        debug!(worker = %id, "registered with scheduler");
    }

    /// Call `callback` each time a frame completes.
    pub fn on_frame_complete(&self, callback: impl Fn(&FrameReport) + Send + Sync + 'static) {
        lock(&self.shared.on_complete).push(Arc::new(callback));
    }

    /// Call `callback` at the start of every frame after the first.
    pub fn on_frame_start(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        lock(&self.shared.on_start).push(Arc::new(callback));
    }

    /// Start the tick loop on the current tokio runtime.
    ///
    /// Returns `Ok(false)` when the loop is already running.
    #[instrument(skip(self), fields(tick_hz = self.config.tick_hz))]
    pub fn start(&self) -> Result<bool> {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(false);
        }
        let runtime = Handle::try_current().context("tick scheduler needs a tokio runtime")?;
        let period = self.config.period();
        *task = Some(runtime.spawn(run(Arc::clone(&self.shared), period)));
        info!(?period, workers = self.len(), "scheduler started");
        Ok(true)
    }

    /// Stop the tick loop. Returns `false` when it was not running.
    #[instrument(skip(self))]
    pub fn stop(&self) -> bool {
        let Some(task) = lock(&self.task).take() else {
            return false;
        };
        let was_running = !task.is_finished();
        task.abort();
        if was_running {
            info!(ticks = self.ticks(), frame = self.frame(), "scheduler stopped");
        }
        was_running
    }

    /// True while the tick loop is running.
    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Run one tick by hand. Returns how many workers were ticked.
    #[instrument(level = "trace", skip(self))]
    pub fn step(&self) -> usize {
        self.shared.step()
    }

    /// Current frame number.
    pub fn frame(&self) -> u64 {
        lock(&self.shared.state).barrier.frame()
    }

    /// Ticks issued since creation.
    pub fn ticks(&self) -> u64 {
        lock(&self.shared.state).total_ticks
    }

    /// Registered workers still alive at the last tick.
    pub fn len(&self) -> usize {
        lock(&self.shared.state).workers.len()
    }

    /// True when no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}
