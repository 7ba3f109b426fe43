// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-frame completion barrier.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use htman_core::WorkerId;

/// Summary handed to frame-complete callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Frame number, starting at 0.
    pub frame: u64,
    /// Scheduler ticks spent on this frame.
    pub ticks: u64,
    /// Workers that reported.
    pub workers: usize,
    /// Wall time from frame start to completion.
    pub elapsed: Duration,
}

/// Tracks which workers finished the current frame.
///
/// A frame completes once every live worker has reported at least once.
/// Reports after completion are dropped until [`reset`](Self::reset), and a
/// frame with no live workers never completes.
#[derive(Debug)]
pub struct FrameBarrier {
    reported: BTreeSet<WorkerId>,
    complete: bool,
    frame: u64,
    ticks: u64,
    started: Instant,
}

impl Default for FrameBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBarrier {
    /// Barrier for frame 0.
    pub fn new() -> Self {
        Self {
            reported: BTreeSet::new(),
            complete: false,
            frame: 0,
            ticks: 0,
            started: Instant::now(),
        }
    }

    /// Current frame number.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// True once the current frame completed.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Workers that reported in the current frame.
    pub fn reported(&self) -> usize {
        self.reported.len()
    }

    /// Count one scheduler tick against the current frame.
    pub fn note_tick(&mut self) {
        self.ticks += 1;
    }

    /// Record `worker` as done. Returns the report when this completes the frame.
    pub fn report(&mut self, worker: WorkerId, live: &BTreeSet<WorkerId>) -> Option<FrameReport> {
        if self.complete || !live.contains(&worker) {
            return None;
        }
        self.reported.insert(worker);
        self.settle(live)
    }

    /// Re-check completion after the live set shrank.
    pub fn settle(&mut self, live: &BTreeSet<WorkerId>) -> Option<FrameReport> {
        if self.complete || live.is_empty() || !live.is_subset(&self.reported) {
            return None;
        }
        self.complete = true;
        Some(FrameReport {
            frame: self.frame,
            ticks: self.ticks,
            workers: live.len(),
            elapsed: self.started.elapsed(),
        })
    }

    /// Start the next frame.
    pub fn reset(&mut self) {
        self.reported.clear();
        self.complete = false;
        self.frame += 1;
        self.ticks = 0;
        self.started = Instant::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn live(ids: &[usize]) -> BTreeSet<WorkerId> {
        ids.iter().copied().map(WorkerId).collect()
    }

    #[test]
    fn completes_once_every_live_worker_reported() {
        let live = live(&[0, 1, 2]);
        let mut barrier = FrameBarrier::new();
        barrier.note_tick();
        assert!(barrier.report(WorkerId(0), &live).is_none());
        assert!(barrier.report(WorkerId(0), &live).is_none(), "repeats do not count twice");
        assert!(barrier.report(WorkerId(2), &live).is_none());
        let report = barrier.report(WorkerId(1), &live).unwrap();
        assert_eq!(report.frame, 0);
        assert_eq!(report.ticks, 1);
        assert_eq!(report.workers, 3);
        assert!(barrier.is_complete());
    }

    #[test]
    fn late_reports_are_ignored_until_reset() {
        let live = live(&[0]);
        let mut barrier = FrameBarrier::new();
        assert!(barrier.report(WorkerId(0), &live).is_some());
        assert!(barrier.report(WorkerId(0), &live).is_none());

        barrier.reset();
        assert_eq!(barrier.frame(), 1);
        assert_eq!(barrier.reported(), 0);
        assert!(barrier.report(WorkerId(0), &live).is_some());
    }

    #[test]
    fn unknown_workers_do_not_count() {
        let live = live(&[0, 1]);
        let mut barrier = FrameBarrier::new();
        assert!(barrier.report(WorkerId(7), &live).is_none());
        assert_eq!(barrier.reported(), 0);
    }

    #[test]
    fn settle_completes_when_a_straggler_is_removed() {
        let mut barrier = FrameBarrier::new();
        assert!(barrier.report(WorkerId(0), &live(&[0, 1])).is_none());
        let report = barrier.settle(&live(&[0])).unwrap();
        assert_eq!(report.workers, 1);
    }

    #[test]
    fn no_workers_never_completes() {
        let mut barrier = FrameBarrier::new();
        assert!(barrier.settle(&BTreeSet::new()).is_none());
        assert!(!barrier.is_complete());
    }
}
