// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pointer input written into the shared `pointer` region.

use htman_core::{FieldView, Record, SharedRegionTable};

use crate::physics::PointerState;
use crate::regions::{POINTER, POINTER_FIELDS};

/// Coordinator-side writer for the pointer record.
#[derive(Clone)]
pub struct Pointer {
    record: Record,
}

impl Pointer {
    /// Bind to the table's pointer region. `None` before the regions exist.
    pub fn attach(table: &SharedRegionTable) -> Option<Self> {
        let record = FieldView::bind(table, POINTER, &POINTER_FIELDS)?.record(0)?;
        Some(Self { record })
    }

    /// Move to grid cell `(x, y)`.
    pub fn move_to(&self, x: u16, y: u16) {
        self.record.set_at(0, f64::from(x));
        self.record.set_at(1, f64::from(y));
    }

    /// Press `button`: 0 attracts, anything else repels.
    pub fn press(&self, button: u8) {
        self.record.set_at(2, f64::from(button) + 1.0);
    }

    /// Release every button.
    pub fn release(&self) {
        self.record.set_at(2, 0.0);
    }

    /// Current position and button state.
    pub fn state(&self) -> PointerState {
        PointerState {
            x: self.record.get_at(0).unwrap_or(0.0),
            y: self.record.get_at(1).unwrap_or(0.0),
            active: self.record.get_at(2).unwrap_or(0.0),
        }
    }
}
