// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Named, strided record views over a flat region.
//!
//! A view with fields `[x, y, xvel, yvel]` reads record `i`, field `j` from
//! flat index `i * 4 + j`. Views and records hold the table *slot*, not the
//! region, so a resize or re-broadcast is picked up on the next access.

use std::sync::Arc;

use tracing::warn;

use crate::region::Region;
use crate::table::{RegionSlot, RegionSource};

struct FieldLayout {
    names: Box<[String]>,
}

impl FieldLayout {
    fn offset_of(&self, field: &str) -> Option<usize> {
        self.names.iter().position(|name| name == field)
    }

    fn width(&self) -> usize {
        self.names.len()
    }
}

/// A reusable record decomposition of one named region.
#[derive(Clone)]
pub struct FieldView {
    slot: Arc<RegionSlot>,
    layout: Arc<FieldLayout>,
}

impl FieldView {
    /// Bind `fields` to the region registered as `name` in `source`.
    ///
    /// Returns `None` (and logs a warning) when the region is unknown or no
    /// field names were given.
    pub fn bind<S, F>(source: &S, name: &str, fields: &[F]) -> Option<Self>
    where
        S: RegionSource + ?Sized,
        F: AsRef<str>,
    {
        if fields.is_empty() {
            warn!(region = name, "field view needs at least one field");
            return None;
        }
        let Some(slot) = source.slot(name) else {
            warn!(region = name, "data not found for region");
            return None;
        };
        let layout = FieldLayout {
            names: fields.iter().map(|f| f.as_ref().to_owned()).collect(),
        };
        let len = slot.with(Region::len);
        if len % layout.width() != 0 {
            warn!(
                region = name,
                len,
                width = layout.width(),
                "region length is not a multiple of the field count; trailing elements are unreachable"
            );
        }
        Some(Self {
            slot,
            layout: Arc::new(layout),
        })
    }

    /// Number of whole records in the region as it is right now.
    pub fn len(&self) -> usize {
        self.slot.with(Region::len) / self.layout.width()
    }

    /// True when the region holds no whole record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fields per record.
    pub fn width(&self) -> usize {
        self.layout.width()
    }

    /// Field names in offset order.
    pub fn fields(&self) -> &[String] {
        &self.layout.names
    }

    /// Offset of `field` within a record.
    pub fn offset_of(&self, field: &str) -> Option<usize> {
        self.layout.offset_of(field)
    }

    /// The region currently installed under this view's name.
    pub fn region(&self) -> Region {
        self.slot.load()
    }

    /// Record `index`, if it exists right now.
    pub fn record(&self, index: usize) -> Option<Record> {
        (index < self.len()).then(|| self.record_unchecked(index))
    }

    /// Every record currently in the region, in order.
    pub fn records(&self) -> Vec<Record> {
        (0..self.len()).map(|i| self.record_unchecked(i)).collect()
    }

    fn record_unchecked(&self, index: usize) -> Record {
        Record {
            slot: Arc::clone(&self.slot),
            layout: Arc::clone(&self.layout),
            base: index * self.layout.width(),
            index,
        }
    }
}

/// Decompose the region `name` into records with one accessor per field.
///
/// Yields an empty sequence, with a warning, when the region does not exist.
pub fn assign<S, F>(source: &S, name: &str, fields: &[F]) -> Vec<Record>
where
    S: RegionSource + ?Sized,
    F: AsRef<str>,
{
    FieldView::bind(source, name, fields)
        .map(|view| view.records())
        .unwrap_or_default()
}

/// One record: live get/set access to a fixed run of elements.
///
/// Offsets past the record width are not checked; they land in whatever
/// element sits at `base + offset`.
#[derive(Clone)]
pub struct Record {
    slot: Arc<RegionSlot>,
    layout: Arc<FieldLayout>,
    base: usize,
    index: usize,
}

impl Record {
    /// Record position within its view.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Flat index of field 0.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Field names in offset order.
    pub fn fields(&self) -> &[String] {
        &self.layout.names
    }

    /// Read `field`. `None` for an unknown field or a record past the end.
    pub fn get(&self, field: &str) -> Option<f64> {
        self.get_at(self.layout.offset_of(field)?)
    }

    /// Write `field`. Returns `false` when nothing was written.
    pub fn set(&self, field: &str, value: f64) -> bool {
        self.layout
            .offset_of(field)
            .is_some_and(|offset| self.set_at(offset, value))
    }

    /// Read the element at `offset` within this record.
    #[inline]
    pub fn get_at(&self, offset: usize) -> Option<f64> {
        self.slot.with(|region| region.get(self.base + offset))
    }

    /// Write the element at `offset` within this record.
    #[inline]
    pub fn set_at(&self, offset: usize, value: f64) -> bool {
        self.slot.with(|region| region.set(self.base + offset, value))
    }

    /// All field values, in offset order.
    pub fn values(&self) -> Vec<f64> {
        self.slot.with(|region| {
            (0..self.layout.width())
                .filter_map(|offset| region.get(self.base + offset))
                .collect()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::region::ElementKind;
    use crate::table::SharedRegionTable;
    use proptest::prelude::*;

    #[test]
    fn records_map_to_strided_flat_indices() {
        let table = SharedRegionTable::new();
        let region = table.create("particles", 8, ElementKind::F32).unwrap();
        let particles = assign(&table, "particles", &["x", "y", "xvel", "yvel"]);
        assert_eq!(particles.len(), 2);

        particles[1].set("y", 3.0);
        particles[0].set("yvel", 4.0);
        assert_eq!(region.get(5), Some(3.0));
        assert_eq!(region.get(3), Some(4.0));
        assert_eq!(particles[1].base(), 4);
    }

    #[test]
    fn unknown_region_yields_empty_sequence() {
        let table = SharedRegionTable::new();
        assert!(assign(&table, "ghost", &["a"]).is_empty());
        assert!(FieldView::bind(&table, "ghost", &["a"]).is_none());
    }

    #[test]
    fn empty_field_list_yields_nothing() {
        let table = SharedRegionTable::new();
        table.create("a", 4, ElementKind::U8).unwrap();
        let none: [&str; 0] = [];
        assert!(assign(&table, "a", &none).is_empty());
    }

    #[test]
    fn ragged_length_floors_record_count() {
        let table = SharedRegionTable::new();
        table.create("odd", 7, ElementKind::U16).unwrap();
        assert_eq!(assign(&table, "odd", &["a", "b", "c"]).len(), 2);
    }

    #[test]
    fn unknown_field_reads_none_and_ignores_writes() {
        let table = SharedRegionTable::new();
        let region = table.create("mouse", 3, ElementKind::U16).unwrap();
        let mouse = &assign(&table, "mouse", &["x", "y", "active"])[0];
        assert_eq!(mouse.get("z"), None);
        assert!(!mouse.set("z", 1.0));
        assert!(region.to_vec().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn view_follows_resize() {
        let table = SharedRegionTable::new();
        table.create("workload", 4, ElementKind::U32).unwrap();
        let view = FieldView::bind(&table, "workload", &["start", "end"]).unwrap();
        let first = view.record(0).unwrap();
        assert_eq!(view.len(), 2);

        let bigger = table.resize("workload", 10, ElementKind::U32).unwrap();
        bigger.set(1, 77.0);
        assert_eq!(view.len(), 5);
        assert_eq!(first.get("end"), Some(77.0));
        assert!(view.region().same_buffer(&bigger));
    }

    #[test]
    fn record_past_end_after_shrink_reads_none() {
        let table = SharedRegionTable::new();
        table.create("p", 6, ElementKind::F64).unwrap();
        let last = assign(&table, "p", &["a", "b"]).pop().unwrap();
        table.resize("p", 2, ElementKind::F64).unwrap();
        assert_eq!(last.get("a"), None);
        assert!(!last.set("b", 1.0));
    }

    #[test]
    fn values_reads_the_whole_record() {
        let table = SharedRegionTable::new();
        let region = table.create("screen", 3, ElementKind::U16).unwrap();
        region.set(0, 640.0);
        region.set(1, 480.0);
        let screen = FieldView::bind(&table, "screen", &["width", "height", "clearing"])
            .and_then(|v| v.record(0))
            .unwrap();
        assert_eq!(screen.values(), vec![640.0, 480.0, 0.0]);
        assert_eq!(screen.fields()[2], "clearing");
    }

    proptest! {
        #[test]
        fn field_j_of_record_i_is_flat_index_i_m_plus_j(len in 0usize..512, width in 1usize..16) {
            let table = SharedRegionTable::new();
            let region = table.create("data", len, ElementKind::F64).unwrap();
            let fields: Vec<String> = (0..width).map(|j| format!("f{j}")).collect();
            let records = assign(&table, "data", &fields);
            prop_assert_eq!(records.len(), len / width);

            for (i, record) in records.iter().enumerate() {
                prop_assert_eq!(record.base(), i * width);
                for j in 0..width {
                    prop_assert!(record.set_at(j, (i * width + j) as f64 + 1.0));
                }
            }
            let covered = records.len() * width;
            for flat in 0..len {
                let expected = if flat < covered { flat as f64 + 1.0 } else { 0.0 };
                prop_assert_eq!(region.get(flat), Some(expected));
            }
            if let Some(last) = records.last() {
                prop_assert_eq!(last.get(&fields[width - 1]), Some(covered as f64));
            }
        }
    }
}
