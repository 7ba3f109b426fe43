// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for htman tools (config port, runtime prefs).
//! Keeps binaries thin and storage-agnostic.

pub mod config;
pub mod prefs;

pub use config::{ConfigError, ConfigService, ConfigStore};
pub use prefs::RuntimePrefs;
