// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Coordinator side of the particle simulation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use htman_app_core::RuntimePrefs;
use htman_core::{SharedRegionTable, WorkerPool, FRAME_BUDGET};
use htman_sched::{SchedulerConfig, TickScheduler};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::input::Pointer;
use crate::present::Presenter;
use crate::regions::{self, Grid, PIXELS, SCREEN};
use crate::worker;

/// Offset of the `clearing` flag in the screen region.
const CLEARING: usize = 2;

/// Sizes and rates for one simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    /// Worker threads.
    pub workers: usize,
    /// Particle count.
    pub particles: usize,
    /// Grid in cells.
    pub grid: Grid,
    /// Scheduler tick rate.
    pub tick_hz: f64,
    /// Per-pass worker budget.
    pub budget: Duration,
}

impl SimulationConfig {
    /// Derive a config from saved runtime preferences.
    pub fn from_prefs(prefs: &RuntimePrefs) -> Self {
        let (width, height) = prefs.grid_size();
        Self {
            workers: prefs.threads,
            particles: prefs.particles,
            grid: Grid::new(width, height),
            tick_hz: prefs.tick_hz,
            budget: prefs.frame_budget(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            budget: FRAME_BUDGET,
            ..Self::from_prefs(&RuntimePrefs::default())
        }
    }
}

/// A running particle simulation: regions, workers and the tick loop.
pub struct Simulation {
    table: SharedRegionTable,
    pool: WorkerPool,
    scheduler: TickScheduler,
    config: SimulationConfig,
    frames: Arc<watch::Sender<u64>>,
}

impl Simulation {
    /// Allocate and seed the regions, spawn the workers and wire the frame
    /// callbacks. The tick loop is not started.
    #[instrument(skip(presenter), fields(workers = config.workers, particles = config.particles))]
    pub async fn setup(config: SimulationConfig, presenter: Arc<dyn Presenter>) -> Result<Self> {
        ensure!(config.workers > 0, "simulation needs at least one worker");
        ensure!(
            config.grid.cells() > 0,
            "grid {}x{} has no cells",
            config.grid.width,
            config.grid.height
        );

        let table = SharedRegionTable::new();
        regions::create(&table, config.particles, config.grid, config.workers)
            .context("allocating particle regions")?;
        let seeded = regions::seed(&table, config.grid, &mut rand::thread_rng());
        debug!(seeded, "particles seeded");

        let pool = WorkerPool::new(table.clone());
        let scheduler = TickScheduler::new(SchedulerConfig::new(config.tick_hz)?);
        let (frames, _) = watch::channel(0_u64);
        let frames = Arc::new(frames);

        {
            let table = table.clone();
            let frames = Arc::clone(&frames);
            scheduler.on_frame_complete(move |report| {
                let grid = regions::current_grid(&table).unwrap_or(config.grid);
                if let Some(pixels) = table.get(PIXELS) {
                    presenter.present(report.frame, &pixels, grid.width, grid.height);
                }
                if let Some(screen) = table.get(SCREEN) {
                    screen.set(CLEARING, 1.0);
                }
                frames.send_replace(report.frame + 1);
            });
        }
        {
            let table = table.clone();
            scheduler.on_frame_start(move |_| {
                if let Some(pixels) = table.get(PIXELS) {
                    pixels.fill(0.0);
                }
                if let Some(screen) = table.get(SCREEN) {
                    screen.set(CLEARING, 0.0);
                }
            });
        }

        for _ in 0..config.workers {
            let handle = pool
                .spawn(worker::init(config.budget), worker::update)
                .await
                .context("spawning particle worker")?;
            scheduler.register(&handle);
        }
        info!(
            workers = config.workers,
            particles = config.particles,
            width = config.grid.width,
            height = config.grid.height,
            "simulation ready"
        );

        Ok(Self {
            table,
            pool,
            scheduler,
            config,
            frames,
        })
    }

    /// The config this simulation was built with.
    pub fn config(&self) -> SimulationConfig {
        self.config
    }

    /// Shared regions.
    pub fn table(&self) -> &SharedRegionTable {
        &self.table
    }

    /// Worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Tick loop.
    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    /// Writer for the shared pointer record.
    pub fn pointer(&self) -> Option<Pointer> {
        Pointer::attach(&self.table)
    }

    /// Frames completed so far.
    pub fn frames_completed(&self) -> u64 {
        *self.frames.borrow()
    }

    /// Switch to a `width` by `height` grid. Workers see the new pixel buffer
    /// before their next tick.
    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        let grid = Grid::new(width, height);
        ensure!(grid.cells() > 0, "grid {width}x{height} has no cells");
        regions::resize_surface(&self.table, grid).context("resizing pixel buffer")?;
        info!(width, height, "surface resized");
        Ok(())
    }

    /// Start the tick loop on the current runtime.
    pub fn start(&self) -> Result<bool> {
        self.scheduler.start()
    }

    /// Stop the tick loop.
    pub fn stop(&self) -> bool {
        self.scheduler.stop()
    }

    /// Run one tick by hand.
    pub fn step(&self) -> usize {
        self.scheduler.step()
    }

    /// Run the tick loop until `count` more frames have completed, then stop.
    ///
    /// Never resolves if every worker is gone; wrap it in a timeout.
    pub async fn run_frames(&self, count: u64) -> Result<u64> {
        let mut frames = self.frames.subscribe();
        let target = *frames.borrow() + count;
        self.start()?;
        let reached = frames
            .wait_for(|done| *done >= target)
            .await
            .map(|done| *done);
        self.stop();
        reached.context("frame counter closed")
    }

    /// Stop ticking and destroy every worker.
    pub fn shutdown(&self) {
        self.stop();
        self.pool.shutdown();
    }
}
