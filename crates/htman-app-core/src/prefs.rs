// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Runtime preferences shared by htman tools.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Saved runtime preferences for a simulation run.
///
/// Missing fields decode to their defaults, so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimePrefs {
    /// Worker threads.
    pub threads: usize,
    /// Particle count.
    pub particles: usize,
    /// Surface width in device pixels.
    pub width: u32,
    /// Surface height in device pixels.
    pub height: u32,
    /// Coordinator tick rate.
    pub tick_hz: f64,
    /// Per-pass worker budget in milliseconds.
    pub frame_budget_ms: f64,
    /// Device pixels per simulation cell along each axis.
    pub resolution_divider: u32,
}

impl RuntimePrefs {
    /// Store key for these prefs.
    pub const KEY: &'static str = "runtime";

    /// Largest grid side the simulation's screen record can hold.
    pub const MAX_GRID_EXTENT: u32 = u16::MAX as u32;

    /// Reject values the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        if self.resolution_divider == 0 {
            return Err(ConfigError::Invalid("resolution_divider must be at least 1".into()));
        }
        let (width, height) = self.grid_size();
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}x{} / {} leaves an empty grid",
                self.width, self.height, self.resolution_divider
            )));
        }
        if width > Self::MAX_GRID_EXTENT || height > Self::MAX_GRID_EXTENT {
            return Err(ConfigError::Invalid(format!(
                "grid {width}x{height} exceeds {} cells per side",
                Self::MAX_GRID_EXTENT
            )));
        }
        if !(self.tick_hz.is_finite() && self.tick_hz > 0.0) {
            return Err(ConfigError::Invalid(format!("tick_hz {} is not positive", self.tick_hz)));
        }
        if !(self.frame_budget_ms.is_finite() && self.frame_budget_ms > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "frame_budget_ms {} is not positive",
                self.frame_budget_ms
            )));
        }
        Ok(())
    }

    /// Simulation grid after dividing the surface by the resolution divider.
    pub fn grid_size(&self) -> (u32, u32) {
        let divider = self.resolution_divider.max(1);
        (self.width / divider, self.height / divider)
    }

    /// Worker budget as a duration.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(self.frame_budget_ms.max(0.0) / 1000.0)
    }
}

impl Default for RuntimePrefs {
    fn default() -> Self {
        Self {
            threads: 10,
            particles: 15_421,
            width: 1280,
            height: 720,
            tick_hz: 60.0,
            frame_budget_ms: 16.6,
            resolution_divider: 8,
        }
    }
}
