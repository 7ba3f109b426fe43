// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Frame presentation.
//!
//! The simulation hands the pixel region to a [`Presenter`] once per
//! completed frame, before the buffer is cleared for the next one.

use std::io::{self, Write};
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};

use htman_core::Region;

/// Receives each completed frame.
pub trait Presenter: Send + Sync {
    /// Show `pixels`, an RGBA buffer of `width * height` cells.
    fn present(&self, frame: u64, pixels: &Region, width: u32, height: u32);
}

/// Presenter that drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl Presenter for Discard {
    fn present(&self, _frame: u64, _pixels: &Region, _width: u32, _height: u32) {}
}

/// An owned copy of one presented frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    /// Frame number.
    pub frame: u64,
    /// Cells per row.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// RGBA bytes, row-major.
    pub rgba: Vec<u8>,
}

impl CapturedFrame {
    /// Cells with non-zero alpha.
    pub fn lit_pixels(&self) -> usize {
        self.rgba.chunks_exact(4).filter(|px| px[3] > 0).count()
    }

    /// Write the frame as a binary PPM, dropping alpha.
    pub fn write_ppm<W: Write>(&self, mut out: W) -> io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        let cells = self.width as usize * self.height as usize;
        for px in self.rgba.chunks_exact(4).take(cells) {
            out.write_all(&px[..3])?;
        }
        out.flush()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Presenter that keeps the most recent frame.
#[derive(Debug, Default)]
pub struct FrameCapture {
    last: Mutex<Option<CapturedFrame>>,
    presented: Mutex<u64>,
}

impl FrameCapture {
    /// Empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent frame, if any.
    pub fn last(&self) -> Option<CapturedFrame> {
        lock(&self.last).clone()
    }

    /// How many frames were presented.
    pub fn presented(&self) -> u64 {
        *lock(&self.presented)
    }
}

impl Presenter for FrameCapture {
    fn present(&self, frame: u64, pixels: &Region, width: u32, height: u32) {
        let rgba = pixels.as_u8().map_or_else(
            || pixels.to_vec().into_iter().map(|v| v as u8).collect(),
            |cells| cells.iter().map(|c| c.load(Ordering::Relaxed)).collect(),
        );
        *lock(&self.last) = Some(CapturedFrame {
            frame,
            width,
            height,
            rgba,
        });
        *lock(&self.presented) += 1;
    }
}
