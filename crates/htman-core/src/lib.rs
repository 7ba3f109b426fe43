// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared-memory task distribution.
//!
//! A coordinator owns a [`SharedRegionTable`] of named numeric regions and a
//! [`WorkerPool`] of OS threads. Every worker holds a handle to the *same*
//! cells, so a write on one thread is visible on every other thread without
//! copying. Work is split by index ranges ([`workload`]) and driven by ticks.
//!
//! # Modules
//!
//! - [`region`] - flat atomic buffers and typed-array conversion
//! - [`table`] - named region tables and the broadcast hook
//! - [`fields`] - strided record views over a region
//! - [`workload`] - range partitioning and the per-pass budget
//! - [`protocol`] - coordinator/worker messages
//! - [`worker`] - worker-side context and loop
//! - [`pool`] - spawn, tick, destroy
#![forbid(unsafe_code)]

pub mod fields;
pub mod pool;
pub mod protocol;
pub mod region;
pub mod table;
pub mod worker;
pub mod workload;

pub use fields::{assign, FieldView, Record};
pub use pool::{PoolError, WorkerHandle, WorkerPool};
pub use protocol::{Control, WorkerMessage};
pub use region::{Backing, ElementKind, Region, RegionError};
pub use table::{LocalShares, RegionSink, RegionSlot, RegionSource, ResizeFill, SharedRegionTable};
pub use worker::{WorkerContext, WorkerId};
pub use workload::{partition, publish, Pass, RangeCursor, WorkloadRange, FRAME_BUDGET, WORKLOAD_FIELDS};
