// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Polling helpers for asserting on work that happens on other threads.

use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Generous upper bound for "eventually" assertions.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Poll `condition` until it holds or `timeout` elapses. Returns the last result.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// [`wait_until`] with [`SETTLE_TIMEOUT`].
pub async fn eventually(condition: impl FnMut() -> bool) -> bool {
    wait_until(SETTLE_TIMEOUT, condition).await
}
