// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! htman Scheduler
//!
//! A fixed-rate tick loop that drives a worker pool one frame at a time.
//! Workers post `Done` when they finish their range; once every registered
//! worker has done so the frame is complete, the frame-complete callbacks run
//! (typically: present the pixel buffer), and the next tick starts a new frame.

pub mod barrier;
pub mod scheduler;

pub use barrier::{FrameBarrier, FrameReport};
pub use scheduler::{SchedulerConfig, TickScheduler};
