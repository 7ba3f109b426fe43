// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-particle update rules.
//!
//! Collisions are pseudo-collisions: a particle "hits" whatever pixel is
//! already bright where it is about to move. Reads and writes of the pixel
//! buffer race with other workers; a stale alpha only changes the look.

use htman_core::Region;
use rand::Rng;

/// Added to `yvel` every step.
pub const GRAVITY: f64 = 0.09;
/// Horizontal speed limit (both directions).
pub const MAX_XVEL: f64 = 3.0;
/// Fastest fall per step.
pub const MAX_FALL: f64 = 1.8;
/// Fastest rise per step.
pub const MAX_RISE: f64 = 999.0;

/// Alpha above which a pixel blocks sideways motion.
const SIDE_HIT_ALPHA: f64 = 200.0;
/// Alpha above which a pixel blocks a fall.
const FLOOR_HIT_ALPHA: f64 = 144.0;

/// Position and velocity of one particle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    /// Column.
    pub x: f64,
    /// Row; grows downwards.
    pub y: f64,
    /// Horizontal velocity.
    pub xvel: f64,
    /// Vertical velocity.
    pub yvel: f64,
}

impl Particle {
    /// Read particle `index` from a flat `x, y, xvel, yvel` region.
    pub fn load(region: &Region, index: usize) -> Option<Self> {
        let base = index * 4;
        Some(Self {
            x: region.get(base)?,
            y: region.get(base + 1)?,
            xvel: region.get(base + 2)?,
            yvel: region.get(base + 3)?,
        })
    }

    /// Write particle `index` back.
    pub fn store(&self, region: &Region, index: usize) {
        let base = index * 4;
        region.set(base, self.x);
        region.set(base + 1, self.y);
        region.set(base + 2, self.xvel);
        region.set(base + 3, self.yvel);
    }
}

/// Pointer as seen by one pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerState {
    /// Column.
    pub x: f64,
    /// Row.
    pub y: f64,
    /// 0 when idle, 1 to attract, anything higher to repel.
    pub active: f64,
}

/// The grid a particle moves in and the pixels it paints.
#[derive(Debug, Clone, Copy)]
pub struct Surface<'a> {
    /// Cells per row.
    pub width: f64,
    /// Rows.
    pub height: f64,
    /// RGBA buffer, `width * height * 4` long.
    pub pixels: &'a Region,
}

impl Surface<'_> {
    /// Flat index of the red channel of the cell holding `(x, y)`.
    pub fn pixel_base(&self, x: f64, y: f64) -> Option<usize> {
        let cell = y.floor() * self.width + x.floor();
        (cell.is_finite() && cell >= 0.0).then(|| cell as usize * 4)
    }

    fn alpha_at(&self, base: Option<usize>) -> f64 {
        base.and_then(|b| self.pixels.get(b + 3)).unwrap_or(0.0)
    }
}

/// Where a particle sits in its worker's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Worker ordinal.
    pub worker: usize,
    /// Particles left in the range, this one included.
    pub remaining: usize,
}

/// Advance `p` one step: paint, gravity, pointer, limits, motion, collisions
/// and walls, in that order.
pub fn advance<R: Rng + ?Sized>(
    p: &mut Particle,
    surface: &Surface<'_>,
    pointer: PointerState,
    slot: Slot,
    rng: &mut R,
) {
    let side = surface.pixel_base(p.x + p.xvel, p.y);
    let below = surface.pixel_base(p.x, p.y + p.yvel);

    if p.y > 1.0 {
        paint(p, surface);
    }

    p.yvel += GRAVITY;
    steer(p, pointer, slot);

    p.xvel = p.xvel.clamp(-MAX_XVEL, MAX_XVEL);
    p.yvel = p.yvel.clamp(-MAX_RISE, MAX_FALL);
    p.x += p.xvel;
    p.y += p.yvel;

    if surface.alpha_at(side) > SIDE_HIT_ALPHA {
        let adjust = 0.45 * (rng.gen::<f64>() * p.xvel);
        if p.xvel.abs() > 1.0 {
            p.xvel /= 1.025;
        }
        p.yvel -= if p.yvel < 0.0 { adjust } else { -adjust };
    }

    if surface.alpha_at(below) > FLOOR_HIT_ALPHA && p.yvel > 0.0 {
        let adjust = p.yvel * 0.998;
        p.y -= adjust.abs().max(1.0);
        p.yvel -= adjust;
        if p.xvel.abs() > p.yvel.abs() {
            p.xvel += 0.5 * (rng.gen::<f64>() - 0.5);
            p.yvel *= 1.9;
        }
        if p.yvel < 0.1 {
            p.yvel *= 1.9;
        }
    }

    if p.x < 1.0 || p.x >= surface.width - 1.0 {
        p.xvel = -p.xvel / 1.05;
    }
    if p.y >= surface.height - 1.0 {
        p.yvel = -p.yvel / (1.0 + rng.gen::<f64>());
    }

    p.x = p.x.max(1.0).min(surface.width - 1.0);
    p.y = p.y.min(surface.height);
}

/// Colour the particle's cell by speed and build up its alpha.
fn paint(p: &Particle, surface: &Surface<'_>) {
    let Some(base) = surface.pixel_base(p.x, p.y) else {
        return;
    };
    let pixels = surface.pixels;
    let alpha = pixels.get(base + 3).unwrap_or(0.0);
    let red = ((p.yvel + p.xvel).abs() / 4.8 * 255.0 - alpha / 4.0).max(0.0);
    pixels.set(base, red);
    // Green follows the stored (wrapped) red, not the computed one.
    let stored_red = pixels.get(base).unwrap_or(0.0);
    pixels.set(base + 1, (1.5 * stored_red).clamp(48.0, 255.0));
    pixels.set(base + 2, 255.0);
    pixels.set(base + 3, alpha + (255.0 - alpha) * 0.25);
}

/// Pull towards (or push away from) an active pointer.
fn steer(p: &mut Particle, pointer: PointerState, slot: Slot) {
    if pointer.active == 0.0 {
        return;
    }
    let (mut dx, mut dy) = (pointer.x - p.x, pointer.y - p.y);
    if pointer.active > 1.0 {
        dx = -dx;
        dy = -dy;
    }
    let distance = dx.hypot(dy);
    if distance > slot.worker as f64 {
        let remaining = slot.remaining.max(1) as f64;
        let damping = 0.5 / (4.0 * distance) / (1.0 + (p.xvel / remaining).abs());
        p.xvel += (dx - p.xvel) * damping;
        p.yvel += (dy - p.yvel) * damping;
    }
}
