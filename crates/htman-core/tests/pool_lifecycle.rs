// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic, clippy::float_cmp)]
//! Worker pool lifecycle: spawn, tick, broadcast, destroy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use htman_core::{
    assign, ElementKind, PoolError, SharedRegionTable, WorkerContext, WorkerId, WorkerMessage,
    WorkerPool,
};
use htman_dry_tests::{eventually, MessageLog, Tally};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initializer_runs_once_across_many_ticks() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let tally = Tally::new();
    let worker = pool.spawn(tally.init(), tally.update()).await.unwrap();

    for _ in 0..5 {
        worker.tick().unwrap();
    }
    assert!(eventually(|| tally.updates() == 5).await);
    assert_eq!(tally.inits(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_does_not_run_anything_before_the_first_tick() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let tally = Tally::new();
    let _worker = pool.spawn(tally.init(), tally.update()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(tally.inits(), 0);
    assert_eq!(tally.updates(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ordinals_are_unique_and_increasing() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let tally = Tally::new();
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(pool.spawn(tally.init(), tally.update()).await.unwrap().id());
    }
    assert_eq!(ids, (0..4).map(WorkerId).collect::<Vec<_>>());
    assert_eq!(pool.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_writes_are_visible_to_the_coordinator() {
    let table = SharedRegionTable::new();
    let counters = table.create("counters", 4, ElementKind::U32).unwrap();
    let pool = WorkerPool::new(table);

    let worker = pool
        .spawn(
            |ctx: &mut WorkerContext| ctx.index(),
            |ctx: &mut WorkerContext, index: &mut usize| {
                let region = ctx.region("counters").expect("seeded at spawn");
                let current = region.get(*index).unwrap_or(0.0);
                region.set(*index, current + 1.0);
                ctx.done();
            },
        )
        .await
        .unwrap();

    worker.tick().unwrap();
    worker.tick().unwrap();
    assert!(eventually(|| counters.get(0) == Some(2.0)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn regions_created_after_spawn_arrive_before_the_next_tick() {
    let table = SharedRegionTable::new();
    let pool = WorkerPool::new(table.clone());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let worker = {
        let seen = Arc::clone(&seen);
        pool.spawn(
            |_: &mut WorkerContext| {},
            move |ctx: &mut WorkerContext, _: &mut ()| {
                let len = ctx.region("late").map(|r| r.len());
                seen.lock().unwrap().push(len);
            },
        )
        .await
        .unwrap()
    };

    worker.tick().unwrap();
    assert!(eventually(|| seen.lock().unwrap().len() == 1).await);

    table.create("late", 6, ElementKind::U8).unwrap();
    worker.tick().unwrap();
    table.resize("late", 9, ElementKind::U8).unwrap();
    worker.tick().unwrap();

    assert!(eventually(|| seen.lock().unwrap().len() == 3).await);
    assert_eq!(*seen.lock().unwrap(), vec![None, Some(6), Some(9)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_views_follow_a_resize() {
    let table = SharedRegionTable::new();
    table.create("workload", 2, ElementKind::U32).unwrap();
    let pool = WorkerPool::new(table.clone());
    let lens = Arc::new(Mutex::new(Vec::new()));

    let worker = {
        let lens = Arc::clone(&lens);
        pool.spawn(
            |ctx: &mut WorkerContext| ctx.view("workload", &["start", "end"]).expect("seeded"),
            move |_: &mut WorkerContext, view: &mut htman_core::FieldView| {
                lens.lock().unwrap().push(view.len());
            },
        )
        .await
        .unwrap()
    };

    worker.tick().unwrap();
    assert!(eventually(|| lens.lock().unwrap().len() == 1).await);
    table.resize("workload", 8, ElementKind::U32).unwrap();
    worker.tick().unwrap();
    assert!(eventually(|| lens.lock().unwrap().len() == 2).await);
    assert_eq!(*lens.lock().unwrap(), vec![1, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn destroyed_worker_cannot_be_ticked() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let tally = Tally::new();
    let worker = pool.spawn(tally.init(), tally.update()).await.unwrap();
    let id = worker.id();

    worker.destroy();
    assert!(!worker.is_alive());
    assert!(pool.get(id).is_none());
    assert!(pool.is_empty());
    assert!(matches!(worker.tick(), Err(PoolError::WorkerGone(gone)) if gone == id));
    assert!(matches!(pool.tick(&worker), Err(PoolError::WorkerGone(_))));
    assert_eq!(pool.tick_all(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_can_ask_to_be_destroyed() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let worker = pool
        .spawn(
            |_: &mut WorkerContext| {},
            |ctx: &mut WorkerContext, _: &mut ()| ctx.destroy(),
        )
        .await
        .unwrap();

    worker.tick().unwrap();
    assert!(eventually(|| !worker.is_alive()).await);
    assert!(pool.is_empty());
    assert!(worker.tick().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_worker_is_removed_and_others_keep_running() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let tally = Tally::new();
    let healthy = pool.spawn(tally.init(), tally.update()).await.unwrap();
    let doomed = pool
        .spawn(
            |_: &mut WorkerContext| {},
            |_: &mut WorkerContext, _: &mut ()| panic!("boom"),
        )
        .await
        .unwrap();

    assert_eq!(pool.tick_all(), 2);
    assert!(eventually(|| !doomed.is_alive()).await);
    assert!(eventually(|| pool.len() == 1).await);

    healthy.tick().unwrap();
    assert!(eventually(|| tally.updates() == 2).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listeners_fire_in_registration_order() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let worker = pool
        .spawn(
            |_: &mut WorkerContext| 0_usize,
            |ctx: &mut WorkerContext, n: &mut usize| {
                *n += 1;
                ctx.post(WorkerMessage::Progress(*n));
            },
        )
        .await
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let order = Arc::clone(&order);
        worker.on_message(move |message| {
            if let WorkerMessage::Progress(n) = message {
                order.lock().unwrap().push((tag, *n));
            }
        });
    }

    worker.tick().unwrap();
    worker.tick().unwrap();
    assert!(eventually(|| order.lock().unwrap().len() == 4).await);
    assert_eq!(
        *order.lock().unwrap(),
        vec![("first", 1), ("second", 1), ("first", 2), ("second", 2)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn independent_views_observe_each_others_writes() {
    let table = SharedRegionTable::new();
    table.create("particles", 8, ElementKind::F32).unwrap();
    let pool = WorkerPool::new(table.clone());
    let log = MessageLog::new();

    let worker = pool
        .spawn(
            |ctx: &mut WorkerContext| ctx.assign_keys("particles", &["x", "y", "xvel", "yvel"]),
            |ctx: &mut WorkerContext, particles: &mut Vec<htman_core::Record>| {
                particles[1].set("x", 2.5);
                ctx.done();
            },
        )
        .await
        .unwrap();
    log.attach(&worker);

    worker.tick().unwrap();
    assert!(eventually(|| log.done_count() == 1).await);
    let coordinator_view = assign(&table, "particles", &["x", "y", "xvel", "yvel"]);
    assert_eq!(coordinator_view[1].get("x"), Some(2.5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_every_worker() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let tally = Tally::new();
    let a = pool.spawn(tally.init(), tally.update()).await.unwrap();
    let b = pool.spawn(tally.init(), tally.update()).await.unwrap();

    pool.shutdown();
    assert!(pool.is_empty());
    assert!(!a.is_alive() && !b.is_alive());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_update_can_observe_cancellation() {
    let pool = WorkerPool::new(SharedRegionTable::new());
    let loops = Arc::new(AtomicUsize::new(0));
    let worker = {
        let loops = Arc::clone(&loops);
        pool.spawn(
            |_: &mut WorkerContext| {},
            move |ctx: &mut WorkerContext, _: &mut ()| {
                while !ctx.is_cancelled() {
                    loops.fetch_add(1, Ordering::Relaxed);
                    std::thread::yield_now();
                }
            },
        )
        .await
        .unwrap()
    };

    worker.tick().unwrap();
    assert!(eventually(|| loops.load(Ordering::Relaxed) > 0).await);
    worker.destroy();
    let settled = loops.load(Ordering::Relaxed);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    // At most one iteration can be in flight when the flag flips.
    assert!(loops.load(Ordering::Relaxed) <= settled + 1);
}
