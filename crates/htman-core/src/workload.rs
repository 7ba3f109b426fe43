// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Workload partitioning and the worker-side frame budget.
//!
//! # Partition formula
//!
//! ```text
//! start(i) = floor(i * N / T)
//! end(i)   = floor((i + 1) * N / T)
//! ```
//!
//! Computed in `u128` so the product never overflows. Consecutive ranges
//! share endpoints, so the union over `0..T` is exactly `[0, N)`.

use std::ops::Range;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::fields::FieldView;
use crate::region::{ElementKind, RegionError};
use crate::table::SharedRegionTable;

/// Wall-clock budget for one worker pass (one 60 Hz frame).
pub const FRAME_BUDGET: Duration = Duration::from_micros(16_600);

/// Field names of the published workload table.
pub const WORKLOAD_FIELDS: [&str; 2] = ["start", "end"];

/// Half-open index interval owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRange {
    /// First index (inclusive).
    pub start: usize,
    /// One past the last index.
    pub end: usize,
}

impl WorkloadRange {
    /// Range of worker `index` when `total` records are split over `workers`.
    ///
    /// `workers == 0` yields an empty range.
    pub fn for_worker(index: usize, workers: usize, total: usize) -> Self {
        if workers == 0 {
            return Self { start: 0, end: 0 };
        }
        let bound = |i: usize| ((i as u128 * total as u128) / workers as u128) as usize;
        Self {
            start: bound(index.min(workers)),
            end: bound((index + 1).min(workers)),
        }
    }

    /// Number of indices in the range.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// True when the range holds no index.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// As a std range.
    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Split `[0, total)` over `workers` contiguous ranges.
pub fn partition(total: usize, workers: usize) -> Vec<WorkloadRange> {
    (0..workers)
        .map(|i| WorkloadRange::for_worker(i, workers, total))
        .collect()
}

/// Publish the partition as a `U32` region of `{start, end}` records so
/// workers can look up their own range by ordinal.
pub fn publish(
    table: &SharedRegionTable,
    name: &str,
    total: usize,
    workers: usize,
) -> Result<Vec<WorkloadRange>, RegionError> {
    table.create(name, workers * WORKLOAD_FIELDS.len(), ElementKind::U32)?;
    let ranges = partition(total, workers);
    if let Some(view) = FieldView::bind(table, name, &WORKLOAD_FIELDS) {
        for (record, range) in view.records().iter().zip(&ranges) {
            record.set_at(0, range.start as f64);
            record.set_at(1, range.end as f64);
        }
    }
    Ok(ranges)
}

/// Outcome of one budgeted pass over a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// The range was completed; the cursor rewound to its start.
    Finished,
    /// The budget ran out; the next pass resumes at the given index.
    Yielded(usize),
}

/// Resumable cursor over a worker's range, checked against a time budget.
///
/// Each pass processes indices from where the last pass stopped until either
/// the range ends or the budget is spent. The budget is checked after each
/// item, so a pass always makes progress.
#[derive(Debug, Clone)]
pub struct RangeCursor {
    range: WorkloadRange,
    next: usize,
    budget: Duration,
}

impl RangeCursor {
    /// Cursor at the start of `range` with the given per-pass budget.
    pub fn new(range: WorkloadRange, budget: Duration) -> Self {
        Self {
            range,
            next: range.start,
            budget,
        }
    }

    /// The range this cursor walks.
    pub fn range(&self) -> WorkloadRange {
        self.range
    }

    /// Next index to be processed.
    pub fn position(&self) -> usize {
        self.next
    }

    /// Run one pass, calling `step` for each index.
    pub fn pass(&mut self, mut step: impl FnMut(usize)) -> Pass {
        let started = Instant::now();
        while self.next < self.range.end {
            step(self.next);
            self.next += 1;
            if self.next < self.range.end && started.elapsed() > self.budget {
                return Pass::Yielded(self.next);
            }
        }
        self.next = self.range.start;
        Pass::Finished
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fields::assign;
    use proptest::prelude::*;

    #[test]
    fn ranges_serialize_as_start_end_objects() {
        let range = WorkloadRange { start: 3, end: 9 };
        let json = serde_json::to_value(range).unwrap();
        assert_eq!(json, serde_json::json!({ "start": 3, "end": 9 }));
        let back: WorkloadRange = serde_json::from_value(json).unwrap();
        assert_eq!(back, range);
    }

    #[test]
    fn ten_workers_over_the_demo_particle_count() {
        let ranges = partition(15_421, 10);
        assert_eq!(ranges[0], WorkloadRange { start: 0, end: 1542 });
        assert_eq!(ranges[9].end, 15_421);
        assert!(ranges.iter().all(|r| r.len() == 1542 || r.len() == 1543));
    }

    #[test]
    fn more_workers_than_items_leaves_some_empty() {
        let ranges = partition(3, 5);
        assert_eq!(ranges.iter().map(WorkloadRange::len).sum::<usize>(), 3);
        assert!(ranges.iter().any(WorkloadRange::is_empty));
    }

    #[test]
    fn zero_workers_is_empty() {
        assert!(partition(10, 0).is_empty());
        assert!(WorkloadRange::for_worker(0, 0, 10).is_empty());
    }

    #[test]
    fn publish_writes_start_end_records() {
        let table = SharedRegionTable::new();
        let ranges = publish(&table, "workload", 10, 3).unwrap();
        let records = assign(&table, "workload", &WORKLOAD_FIELDS);
        assert_eq!(records.len(), 3);
        for (record, range) in records.iter().zip(&ranges) {
            assert_eq!(record.get("start"), Some(range.start as f64));
            assert_eq!(record.get("end"), Some(range.end as f64));
        }
    }

    #[test]
    fn cursor_finishes_and_rewinds_with_generous_budget() {
        let mut cursor = RangeCursor::new(WorkloadRange { start: 4, end: 9 }, Duration::from_secs(60));
        let mut seen = Vec::new();
        assert_eq!(cursor.pass(|i| seen.push(i)), Pass::Finished);
        assert_eq!(seen, vec![4, 5, 6, 7, 8]);
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn cursor_resumes_where_budget_ran_out() {
        let mut cursor = RangeCursor::new(WorkloadRange { start: 0, end: 3 }, Duration::ZERO);
        let mut seen = Vec::new();
        let slow = |i: usize, seen: &mut Vec<usize>| {
            seen.push(i);
            std::thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(cursor.pass(|i| slow(i, &mut seen)), Pass::Yielded(1));
        assert_eq!(cursor.pass(|i| slow(i, &mut seen)), Pass::Yielded(2));
        assert_eq!(cursor.pass(|i| slow(i, &mut seen)), Pass::Finished);
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn empty_range_finishes_immediately() {
        let mut cursor = RangeCursor::new(WorkloadRange { start: 5, end: 5 }, FRAME_BUDGET);
        let mut calls = 0;
        assert_eq!(cursor.pass(|_| calls += 1), Pass::Finished);
        assert_eq!(calls, 0);
    }

    proptest! {
        #[test]
        fn ranges_partition_exactly(total in 0usize..50_000, workers in 1usize..64) {
            let ranges = partition(total, workers);
            prop_assert_eq!(ranges.len(), workers);
            prop_assert_eq!(ranges[0].start, 0);
            prop_assert_eq!(ranges[workers - 1].end, total);
            for pair in ranges.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            let min = ranges.iter().map(WorkloadRange::len).min().unwrap_or(0);
            let max = ranges.iter().map(WorkloadRange::len).max().unwrap_or(0);
            prop_assert!(max - min <= 1);
        }
    }
}
