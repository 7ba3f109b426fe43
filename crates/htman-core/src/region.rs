// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Flat numeric buffers shared by reference between the coordinator and workers.
//!
//! A [`Region`] is a cheap, clonable handle. Every clone points at the same
//! cells, so a store made on one thread is visible to every other holder
//! without copying or serialization.
//!
//! # Cell model
//!
//! Cells are atomics of the declared width and every access uses
//! `Ordering::Relaxed`. Workers only touch their own record ranges, so there
//! is nothing to order; the one buffer that many workers write (pixels) is a
//! tolerated last-write-wins race that stays defined behaviour.
//!
//! # Value conversion
//!
//! Values cross the API as `f64`. Stores follow typed-array rules:
//!
//! | Kind | Store |
//! |------|-------|
//! | `I8`..`U32` | non-finite → 0, truncate, wrap modulo 2^bits |
//! | `I64`, `U64` | saturating cast (NaN → 0) |
//! | `F32` | round to nearest `f32` |
//! | `F64` | exact |

use std::fmt;
use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering,
};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Element width and interpretation of a region's cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit signed integer.
    I16,
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit unsigned integer.
    U64,
    /// 32-bit IEEE float.
    F32,
    /// 64-bit IEEE float.
    F64,
}

impl ElementKind {
    /// Every kind, narrowest integers first.
    pub const ALL: [Self; 10] = [
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::F32,
        Self::F64,
    ];

    /// Bytes per element.
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// True for `F32` and `F64`.
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// Whether a region may be distributed to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Allocated for distribution; broadcast to workers and resizable.
    Shared,
    /// Coordinator-local; never broadcast and never resized.
    Private,
}

/// Errors raised by region allocation and table maintenance.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegionError {
    /// No region is registered under the name.
    #[error("no region named `{name}`")]
    Missing {
        /// The requested name.
        name: String,
    },
    /// The region exists but is private.
    #[error("region `{name}` is not backed by shared memory")]
    NotShared {
        /// The requested name.
        name: String,
    },
    /// `len * kind.size()` does not fit in memory.
    #[error("region of {len} {kind:?} elements exceeds addressable memory")]
    TooLarge {
        /// Requested element count.
        len: usize,
        /// Requested element kind.
        kind: ElementKind,
    },
}

enum Cells {
    I8(Box<[AtomicI8]>),
    U8(Box<[AtomicU8]>),
    I16(Box<[AtomicI16]>),
    U16(Box<[AtomicU16]>),
    I32(Box<[AtomicI32]>),
    U32(Box<[AtomicU32]>),
    I64(Box<[AtomicI64]>),
    U64(Box<[AtomicU64]>),
    // Floats are stored as their bit patterns.
    F32(Box<[AtomicU32]>),
    F64(Box<[AtomicU64]>),
}

fn zeroed<T: Default>(len: usize) -> Box<[T]> {
    (0..len).map(|_| T::default()).collect()
}

/// Typed-array integer conversion for widths up to 32 bits.
fn wrap_u32(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    value.trunc().rem_euclid(4_294_967_296.0) as u32
}

impl Cells {
    fn zeroed(len: usize, kind: ElementKind) -> Self {
        match kind {
            ElementKind::I8 => Self::I8(zeroed(len)),
            ElementKind::U8 => Self::U8(zeroed(len)),
            ElementKind::I16 => Self::I16(zeroed(len)),
            ElementKind::U16 => Self::U16(zeroed(len)),
            ElementKind::I32 => Self::I32(zeroed(len)),
            ElementKind::U32 => Self::U32(zeroed(len)),
            ElementKind::I64 => Self::I64(zeroed(len)),
            ElementKind::U64 => Self::U64(zeroed(len)),
            ElementKind::F32 => Self::F32(zeroed(len)),
            ElementKind::F64 => Self::F64(zeroed(len)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::I8(c) => c.len(),
            Self::U8(c) => c.len(),
            Self::I16(c) => c.len(),
            Self::U16(c) => c.len(),
            Self::I32(c) => c.len(),
            Self::U32(c) | Self::F32(c) => c.len(),
            Self::I64(c) => c.len(),
            Self::U64(c) | Self::F64(c) => c.len(),
        }
    }

    fn load(&self, index: usize) -> Option<f64> {
        const R: Ordering = Ordering::Relaxed;
        Some(match self {
            Self::I8(c) => f64::from(c.get(index)?.load(R)),
            Self::U8(c) => f64::from(c.get(index)?.load(R)),
            Self::I16(c) => f64::from(c.get(index)?.load(R)),
            Self::U16(c) => f64::from(c.get(index)?.load(R)),
            Self::I32(c) => f64::from(c.get(index)?.load(R)),
            Self::U32(c) => f64::from(c.get(index)?.load(R)),
            Self::I64(c) => c.get(index)?.load(R) as f64,
            Self::U64(c) => c.get(index)?.load(R) as f64,
            Self::F32(c) => f64::from(f32::from_bits(c.get(index)?.load(R))),
            Self::F64(c) => f64::from_bits(c.get(index)?.load(R)),
        })
    }

    fn store(&self, index: usize, value: f64) -> bool {
        macro_rules! put {
            ($cells:expr, $v:expr) => {
                match $cells.get(index) {
                    Some(cell) => {
                        cell.store($v, Ordering::Relaxed);
                        true
                    }
                    None => false,
                }
            };
        }
        match self {
            Self::I8(c) => put!(c, wrap_u32(value) as i8),
            Self::U8(c) => put!(c, wrap_u32(value) as u8),
            Self::I16(c) => put!(c, wrap_u32(value) as i16),
            Self::U16(c) => put!(c, wrap_u32(value) as u16),
            Self::I32(c) => put!(c, wrap_u32(value) as i32),
            Self::U32(c) => put!(c, wrap_u32(value)),
            Self::I64(c) => put!(c, value as i64),
            Self::U64(c) => put!(c, value as u64),
            Self::F32(c) => put!(c, (value as f32).to_bits()),
            Self::F64(c) => put!(c, value.to_bits()),
        }
    }
}

struct RegionBuf {
    kind: ElementKind,
    backing: Backing,
    cells: Cells,
}

/// Handle to a fixed-length flat numeric buffer.
///
/// Cloning a `Region` clones the handle, never the data.
#[derive(Clone)]
pub struct Region {
    inner: Arc<RegionBuf>,
}

impl Region {
    /// Allocate a zeroed region meant for distribution to workers.
    pub fn shared(len: usize, kind: ElementKind) -> Result<Self, RegionError> {
        Self::alloc(len, kind, Backing::Shared)
    }

    /// Allocate a zeroed coordinator-local region.
    pub fn private(len: usize, kind: ElementKind) -> Result<Self, RegionError> {
        Self::alloc(len, kind, Backing::Private)
    }

    fn alloc(len: usize, kind: ElementKind, backing: Backing) -> Result<Self, RegionError> {
        let fits = len
            .checked_mul(kind.size())
            .is_some_and(|bytes| isize::try_from(bytes).is_ok());
        if !fits {
            return Err(RegionError::TooLarge { len, kind });
        }
        Ok(Self {
            inner: Arc::new(RegionBuf {
                kind,
                backing,
                cells: Cells::zeroed(len, kind),
            }),
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.cells.len()
    }

    /// True when the region holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element kind.
    pub fn kind(&self) -> ElementKind {
        self.inner.kind
    }

    /// Backing of this region.
    pub fn backing(&self) -> Backing {
        self.inner.backing
    }

    /// True for regions that may be broadcast and resized.
    pub fn is_shared(&self) -> bool {
        self.inner.backing == Backing::Shared
    }

    /// Size of the buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * self.kind().size()
    }

    /// Read element `index`, or `None` past the end.
    #[inline]
    pub fn get(&self, index: usize) -> Option<f64> {
        self.inner.cells.load(index)
    }

    /// Write element `index`. Returns `false` (and writes nothing) past the end.
    #[inline]
    pub fn set(&self, index: usize, value: f64) -> bool {
        self.inner.cells.store(index, value)
    }

    /// Store `value` into every element.
    pub fn fill(&self, value: f64) {
        for index in 0..self.len() {
            self.set(index, value);
        }
    }

    /// Copy every element out as `f64`.
    pub fn to_vec(&self) -> Vec<f64> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// Copy the leading `min(self.len(), source.len())` elements of `source`
    /// into this region, converting through `f64`. Returns the count copied.
    pub fn copy_prefix_from(&self, source: &Region) -> usize {
        let count = self.len().min(source.len());
        for index in 0..count {
            if let Some(value) = source.get(index) {
                self.set(index, value);
            }
        }
        count
    }

    /// Byte cells of a `U8` region, for callers that hand pixels to a surface.
    pub fn as_u8(&self) -> Option<&[AtomicU8]> {
        match &self.inner.cells {
            Cells::U8(cells) => Some(&**cells),
            _ => None,
        }
    }

    /// True when both handles point at the same buffer.
    pub fn same_buffer(&self, other: &Region) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .field("backing", &self.backing())
            .finish()
    }
}
