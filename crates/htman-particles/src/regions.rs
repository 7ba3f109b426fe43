// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared regions used by the particle simulation.
//!
//! | Name        | Kind  | Records                          |
//! |-------------|-------|----------------------------------|
//! | `particles` | `F32` | `x, y, xvel, yvel` per particle  |
//! | `screen`    | `U16` | one `width, height, clearing`    |
//! | `pointer`   | `U16` | one `x, y, active`               |
//! | `pixels`    | `U8`  | `r, g, b, a` per grid cell       |
//! | `workload`  | `U32` | `start, end` per worker          |

use htman_core::{publish, ElementKind, FieldView, RegionError, SharedRegionTable, WorkloadRange};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, error};

/// Particle state, four `F32` fields per particle.
pub const PARTICLES: &str = "particles";
/// Fields of [`PARTICLES`].
pub const PARTICLE_FIELDS: [&str; 4] = ["x", "y", "xvel", "yvel"];
/// Grid size and the clearing flag.
pub const SCREEN: &str = "screen";
/// Fields of [`SCREEN`].
pub const SCREEN_FIELDS: [&str; 3] = ["width", "height", "clearing"];
/// Pointer position and button state.
pub const POINTER: &str = "pointer";
/// Fields of [`POINTER`].
pub const POINTER_FIELDS: [&str; 3] = ["x", "y", "active"];
/// RGBA pixel buffer, one record per grid cell.
pub const PIXELS: &str = "pixels";
/// Fields of [`PIXELS`].
pub const PIXEL_FIELDS: [&str; 4] = ["r", "g", "b", "a"];
/// Per-worker particle ranges.
pub const WORKLOAD: &str = "workload";

/// Largest width or height the `U16` screen record can hold.
pub const MAX_EXTENT: u32 = u16::MAX as u32;

/// Why a grid could not be installed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// A side is wider than the screen record can store.
    #[error("grid {width}x{height} exceeds {MAX_EXTENT} cells per side")]
    Extent {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// The table refused the allocation.
    #[error(transparent)]
    Region(#[from] RegionError),
}

/// Simulation grid in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Grid {
    /// Cells per row.
    pub width: u32,
    /// Rows.
    pub height: u32,
}

impl Grid {
    /// Grid of `width` by `height` cells.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of cells.
    pub fn cells(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Length of the RGBA pixel region, `None` when it overflows `usize`.
    pub fn pixel_len(&self) -> Option<usize> {
        usize::try_from(self.cells())
            .ok()?
            .checked_mul(PIXEL_FIELDS.len())
    }

    /// Pixel length of a grid the screen record can describe.
    pub fn checked_pixel_len(&self) -> Result<usize, SurfaceError> {
        if self.width > MAX_EXTENT || self.height > MAX_EXTENT {
            return Err(SurfaceError::Extent {
                width: self.width,
                height: self.height,
            });
        }
        self.pixel_len().ok_or(SurfaceError::Region(RegionError::TooLarge {
            len: usize::MAX,
            kind: ElementKind::U8,
        }))
    }
}

/// Allocate every region and publish the workload split.
pub fn create(
    table: &SharedRegionTable,
    particles: usize,
    grid: Grid,
    workers: usize,
) -> Result<Vec<WorkloadRange>, SurfaceError> {
    let pixel_len = grid.checked_pixel_len()?;
    let particle_len = particles
        .checked_mul(PARTICLE_FIELDS.len())
        .ok_or(RegionError::TooLarge {
            len: particles,
            kind: ElementKind::F32,
        })?;
    table.create(PARTICLES, particle_len, ElementKind::F32)?;
    table.create(SCREEN, SCREEN_FIELDS.len(), ElementKind::U16)?;
    table.create(POINTER, POINTER_FIELDS.len(), ElementKind::U16)?;
    table.create(PIXELS, pixel_len, ElementKind::U8)?;
    let ranges = publish(table, WORKLOAD, particles, workers)?;
    write_screen(table, grid);
    debug!(particles, workers, ?grid, "particle regions created");
    Ok(ranges)
}

/// Lay particles out row-major over the grid with velocities in `[-0.5, 0.5)`.
/// Returns how many particles were seeded.
pub fn seed<R: Rng + ?Sized>(table: &SharedRegionTable, grid: Grid, rng: &mut R) -> usize {
    let Some(view) = FieldView::bind(table, PARTICLES, &PARTICLE_FIELDS) else {
        return 0;
    };
    let width = grid.width.max(1) as usize;
    let height = grid.height.max(1) as usize;
    let region = view.region();
    let count = view.len();
    for i in 0..count {
        let base = i * PARTICLE_FIELDS.len();
        region.set(base, (i % width) as f64);
        region.set(base + 1, ((i / width) % height) as f64);
        region.set(base + 2, rng.gen::<f64>() - 0.5);
        region.set(base + 3, rng.gen::<f64>() - 0.5);
    }
    count
}

/// Reallocate the pixel buffer for `grid` and record the new size.
///
/// The new buffer starts zeroed; workers pick it up before their next tick.
/// On failure the screen record and the old buffer are left as they were.
pub fn resize_surface(table: &SharedRegionTable, grid: Grid) -> Result<(), SurfaceError> {
    let pixel_len = grid.checked_pixel_len().inspect_err(|err| {
        error!(width = grid.width, height = grid.height, %err, "surface resize rejected");
    })?;
    table.resize(PIXELS, pixel_len, ElementKind::U8)?;
    write_screen(table, grid);
    Ok(())
}

/// Grid size as currently recorded in the screen region.
pub fn current_grid(table: &SharedRegionTable) -> Option<Grid> {
    let screen = table.get(SCREEN)?;
    Some(Grid {
        width: screen.get(0)? as u32,
        height: screen.get(1)? as u32,
    })
}

fn write_screen(table: &SharedRegionTable, grid: Grid) {
    if let Some(screen) = table.get(SCREEN) {
        screen.set(0, f64::from(grid.width));
        screen.set(1, f64::from(grid.height));
    }
}
