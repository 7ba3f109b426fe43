// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Frame barrier behaviour against a real worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use htman_core::{SharedRegionTable, WorkerContext, WorkerHandle, WorkerPool};
use htman_dry_tests::{eventually, MessageLog, Tally};
use htman_sched::{FrameReport, SchedulerConfig, TickScheduler};

fn recorder(scheduler: &TickScheduler) -> (Arc<Mutex<Vec<FrameReport>>>, Arc<Mutex<Vec<u64>>>) {
    let completes = Arc::new(Mutex::new(Vec::new()));
    let starts = Arc::new(Mutex::new(Vec::new()));
    {
        let completes = Arc::clone(&completes);
        scheduler.on_frame_complete(move |report| completes.lock().unwrap().push(*report));
    }
    {
        let starts = Arc::clone(&starts);
        scheduler.on_frame_start(move |frame| starts.lock().unwrap().push(frame));
    }
    (completes, starts)
}

async fn gated_worker(pool: &WorkerPool, open: &Arc<AtomicBool>) -> WorkerHandle {
    let open = Arc::clone(open);
    pool.spawn(
        |_: &mut WorkerContext| {},
        move |ctx: &mut WorkerContext, _: &mut ()| {
            if open.load(Ordering::SeqCst) {
                ctx.done();
            }
        },
    )
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frame_completes_once_after_every_worker_reports() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let scheduler = TickScheduler::new(SchedulerConfig::default());
    let (completes, starts) = recorder(&scheduler);
    let tally = Tally::new();
    for _ in 0..3 {
        let handle = pool.spawn(tally.init(), tally.update()).await.unwrap();
        scheduler.register(&handle);
    }

    assert_eq!(scheduler.step(), 3);
    assert!(eventually(|| completes.lock().unwrap().len() == 1).await);
    let first = completes.lock().unwrap()[0];
    assert_eq!(first.frame, 0);
    assert_eq!(first.workers, 3);
    assert!(starts.lock().unwrap().is_empty());

    assert!(
        eventually(|| {
            scheduler.step();
            completes.lock().unwrap().len() >= 2
        })
        .await
    );
    assert_eq!(completes.lock().unwrap()[1].frame, 1);
    assert_eq!(starts.lock().unwrap()[0], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_silent_worker_holds_the_frame_open() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let scheduler = TickScheduler::new(SchedulerConfig::default());
    let (completes, _) = recorder(&scheduler);
    let tally = Tally::new();
    let eager = pool.spawn(tally.init(), tally.update()).await.unwrap();
    scheduler.register(&eager);
    let open = Arc::new(AtomicBool::new(false));
    let slow = gated_worker(&pool, &open).await;
    scheduler.register(&slow);

    for _ in 0..3 {
        scheduler.step();
    }
    assert!(eventually(|| tally.updates() == 3).await);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(completes.lock().unwrap().is_empty());

    open.store(true, Ordering::SeqCst);
    scheduler.step();
    assert!(eventually(|| completes.lock().unwrap().len() == 1).await);
    assert_eq!(completes.lock().unwrap()[0].ticks, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn destroying_the_straggler_releases_the_frame() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let scheduler = TickScheduler::new(SchedulerConfig::default());
    let (completes, _) = recorder(&scheduler);
    let tally = Tally::new();
    let eager = pool.spawn(tally.init(), tally.update()).await.unwrap();
    scheduler.register(&eager);
    let log = MessageLog::new();
    log.attach(&eager);
    let slow = gated_worker(&pool, &Arc::new(AtomicBool::new(false))).await;
    scheduler.register(&slow);

    scheduler.step();
    assert!(eventually(|| log.done_count() == 1).await);
    assert!(completes.lock().unwrap().is_empty());

    slow.destroy();
    scheduler.step();
    assert!(eventually(|| completes.lock().unwrap().len() == 1).await);
    assert_eq!(completes.lock().unwrap()[0].workers, 1);
    assert_eq!(scheduler.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_is_idempotent_and_stop_halts_ticking() {
    let scheduler = TickScheduler::new(SchedulerConfig::new(200.0).unwrap());
    assert!(scheduler.start().unwrap());
    assert!(!scheduler.start().unwrap());
    assert!(scheduler.is_running());
    assert!(eventually(|| scheduler.ticks() >= 3).await);

    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    tokio::time::sleep(Duration::from_millis(5)).await;
    let settled = scheduler.ticks();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(scheduler.ticks(), settled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_loop_drives_frames() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let scheduler = TickScheduler::new(SchedulerConfig::new(250.0).unwrap());
    let (completes, starts) = recorder(&scheduler);
    let tally = Tally::new();
    for _ in 0..2 {
        let handle = pool.spawn(tally.init(), tally.update()).await.unwrap();
        scheduler.register(&handle);
    }

    scheduler.start().unwrap();
    assert!(eventually(|| completes.lock().unwrap().len() >= 3).await);
    scheduler.stop();

    let frames: Vec<u64> = completes.lock().unwrap().iter().map(|r| r.frame).collect();
    assert_eq!(&frames[..3], &[0, 1, 2]);
    assert_eq!(&starts.lock().unwrap()[..2], &[1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_handles_are_pruned_on_step() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let scheduler = TickScheduler::new(SchedulerConfig::default());
    let tally = Tally::new();
    let handle = pool.spawn(tally.init(), tally.update()).await.unwrap();
    scheduler.register(&handle);
    assert_eq!(scheduler.len(), 1);

    handle.destroy();
    assert_eq!(scheduler.step(), 0);
    assert!(scheduler.is_empty());
}
