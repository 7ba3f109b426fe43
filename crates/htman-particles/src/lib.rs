// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! htman Particles
//!
//! A falling-sand style particle simulation on top of `htman-core`. The
//! coordinator owns the regions and the tick loop; each worker advances its
//! own slice of the particle array and paints into the shared pixel buffer.
//! A frame is presented once every worker has finished its slice.
#![forbid(unsafe_code)]

pub mod input;
pub mod physics;
pub mod present;
pub mod regions;
pub mod sim;
pub mod worker;

pub use input::Pointer;
pub use physics::{Particle, PointerState};
pub use present::{CapturedFrame, Discard, FrameCapture, Presenter};
pub use regions::{Grid, SurfaceError};
pub use sim::{Simulation, SimulationConfig};
pub use worker::ParticleWorker;
