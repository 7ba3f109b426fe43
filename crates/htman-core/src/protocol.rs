// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Control messages between the coordinator and its workers.
//!
//! Each worker owns one FIFO control channel, so a `ShareSet` queued ahead of
//! a `Tick` is always installed before that tick runs.

use serde::{Deserialize, Serialize};

use crate::region::Region;

/// Coordinator → worker.
#[derive(Debug, Clone)]
pub enum Control {
    /// Run one update pass (and the initializer, the first time).
    Tick,
    /// Install or replace the region known as `label`.
    ShareSet {
        /// Region name.
        label: String,
        /// The new buffer.
        region: Region,
    },
    /// Stop the worker thread.
    Shutdown,
}

/// Application-level payload a worker posts to its listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The worker finished its whole range; counted by the frame barrier.
    Done,
    /// Partial progress: next index to process.
    Progress(usize),
    /// Anything else the application wants to say.
    Custom(serde_json::Value),
}

/// Worker → coordinator.
#[derive(Debug, Clone)]
pub(crate) enum Outbound {
    /// Deliver to the handle's listeners.
    Post(WorkerMessage),
    /// The worker asked to be terminated.
    Terminate,
    /// User code panicked; the worker is gone.
    Fatal(String),
}
