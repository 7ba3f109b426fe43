// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for htman crates.
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`wait`] - Polling helpers for cross-thread assertions
//! - [`workers`] - Counting workers and message recorders
#![forbid(unsafe_code)]

pub mod config;
pub mod wait;
pub mod workers;

pub use config::InMemoryConfigStore;
pub use wait::{eventually, wait_until, SETTLE_TIMEOUT};
pub use workers::{MessageLog, Tally};
