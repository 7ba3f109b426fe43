// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker-side particle updater.

use std::time::Duration;

use htman_core::{
    FieldView, Pass, RangeCursor, Record, WorkerContext, WorkloadRange, WORKLOAD_FIELDS,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::physics::{advance, Particle, PointerState, Slot, Surface};
use crate::regions::{
    PARTICLES, PARTICLE_FIELDS, PIXELS, PIXEL_FIELDS, POINTER, POINTER_FIELDS, SCREEN,
    SCREEN_FIELDS, WORKLOAD,
};

/// State one worker keeps between ticks.
pub struct ParticleWorker {
    particles: FieldView,
    pixels: FieldView,
    screen: Record,
    pointer: Record,
    cursor: RangeCursor,
    worker: usize,
    rng: StdRng,
}

impl ParticleWorker {
    /// Bind every view this worker needs. `None` when a region is missing.
    pub fn bind(ctx: &WorkerContext, budget: Duration) -> Option<Self> {
        let particles = ctx.view(PARTICLES, &PARTICLE_FIELDS)?;
        let pixels = ctx.view(PIXELS, &PIXEL_FIELDS)?;
        let screen = ctx.view(SCREEN, &SCREEN_FIELDS)?.record(0)?;
        let pointer = ctx.view(POINTER, &POINTER_FIELDS)?.record(0)?;
        let limits = ctx.view(WORKLOAD, &WORKLOAD_FIELDS)?.record(ctx.index())?;
        let range = WorkloadRange {
            start: limits.get_at(0)? as usize,
            end: limits.get_at(1)? as usize,
        };
        debug!(
            worker = ctx.index(),
            start = range.start,
            end = range.end,
            "particle worker bound"
        );
        Some(Self {
            particles,
            pixels,
            screen,
            pointer,
            cursor: RangeCursor::new(range, budget),
            worker: ctx.index(),
            rng: StdRng::from_entropy(),
        })
    }

    /// The particle range this worker owns.
    pub fn range(&self) -> WorkloadRange {
        self.cursor.range()
    }

    /// Advance particles from where the last pass stopped until the range
    /// ends or the budget runs out.
    pub fn pass(&mut self) -> Pass {
        let particles = self.particles.region();
        let pixels = self.pixels.region();
        let surface = Surface {
            width: self.screen.get_at(0).unwrap_or(0.0),
            height: self.screen.get_at(1).unwrap_or(0.0),
            pixels: &pixels,
        };
        let pointer = PointerState {
            x: self.pointer.get_at(0).unwrap_or(0.0),
            y: self.pointer.get_at(1).unwrap_or(0.0),
            active: self.pointer.get_at(2).unwrap_or(0.0),
        };
        let end = self.cursor.range().end;
        let worker = self.worker;
        let rng = &mut self.rng;
        self.cursor.pass(|index| {
            let Some(mut particle) = Particle::load(&particles, index) else {
                return;
            };
            let slot = Slot {
                worker,
                remaining: end - index,
            };
            advance(&mut particle, &surface, pointer, slot, rng);
            particle.store(&particles, index);
        })
    }
}

/// Initializer for [`WorkerPool::spawn`](htman_core::WorkerPool::spawn).
pub fn init(
    budget: Duration,
) -> impl FnOnce(&mut WorkerContext) -> Option<ParticleWorker> + Send + 'static {
    move |ctx: &mut WorkerContext| {
        let bound = ParticleWorker::bind(ctx, budget);
        if bound.is_none() {
            warn!(worker = ctx.index(), "particle regions missing; worker will stop");
        }
        bound
    }
}

/// Per-tick update: one budgeted pass, `Done` at the end of the range.
pub fn update(ctx: &mut WorkerContext, state: &mut Option<ParticleWorker>) {
    let Some(worker) = state.as_mut() else {
        ctx.destroy();
        return;
    };
    if worker.pass() == Pass::Finished {
        ctx.done();
    }
}
