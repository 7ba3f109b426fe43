// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Named region tables.
//!
//! Each name owns a [`RegionSlot`]. Replacing a region (create-over, resize,
//! or a worker-side `ShareSet`) swaps the slot's contents instead of the slot,
//! so views bound to the slot follow the new buffer on their next access.
//!
//! The coordinator's [`SharedRegionTable`] additionally notifies every
//! subscribed [`RegionSink`] whenever a shared region is installed; the worker
//! pool is the sink that forwards those notifications to live workers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tracing::{debug, error, warn};

use crate::region::{ElementKind, Region, RegionError};

/// Replace-in-place holder for the current region under one name.
pub struct RegionSlot {
    current: RwLock<Region>,
}

impl RegionSlot {
    fn new(region: Region) -> Self {
        Self {
            current: RwLock::new(region),
        }
    }

    /// Clone the handle to the region currently installed.
    pub fn load(&self) -> Region {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `f` against the current region without cloning the handle.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&Region) -> R) -> R {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn replace(&self, region: Region) -> Region {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, region)
    }
}

/// Anything that can resolve a region name to its live slot.
pub trait RegionSource {
    /// Slot for `name`, or `None` when nothing is registered.
    fn slot(&self, name: &str) -> Option<Arc<RegionSlot>>;
}

/// Receives shared regions as the coordinator installs them.
pub trait RegionSink: Send + Sync {
    /// `region` now lives under `name`.
    fn share_set(&self, name: &str, region: &Region);
}

#[derive(Default)]
struct RegionMap {
    slots: RwLock<BTreeMap<String, Arc<RegionSlot>>>,
}

impl RegionMap {
    /// Install `region` under `name`, returning the region it displaced.
    fn install(&self, name: &str, region: Region) -> Option<Region> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.get(name) {
            Some(slot) => Some(slot.replace(region)),
            None => {
                slots.insert(name.to_owned(), Arc::new(RegionSlot::new(region)));
                None
            }
        }
    }

    fn slot(&self, name: &str) -> Option<Arc<RegionSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn get(&self, name: &str) -> Option<Region> {
        self.slot(name).map(|slot| slot.load())
    }

    fn names(&self) -> Vec<String> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn snapshot(&self) -> Vec<(String, Region)> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, slot)| (name.clone(), slot.load()))
            .collect()
    }
}

/// How [`SharedRegionTable::resize_with`] seeds the replacement buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFill {
    /// Start from zeros; callers re-seed.
    #[default]
    Zeroed,
    /// Copy the leading `min(old, new)` elements, converting through `f64`.
    CopyPrefix,
}

struct TableInner {
    map: RegionMap,
    sinks: Mutex<Vec<Weak<dyn RegionSink>>>,
}

/// The coordinator's table of named shared regions.
///
/// Clones share the same table.
#[derive(Clone)]
pub struct SharedRegionTable {
    inner: Arc<TableInner>,
}

impl Default for SharedRegionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedRegionTable {
    /// Create an empty table with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TableInner {
                map: RegionMap::default(),
                sinks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a sink for future installs. Held weakly; dropped sinks are pruned.
    pub fn subscribe(&self, sink: Weak<dyn RegionSink>) {
        self.inner
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Allocate a zeroed shared region under `name` and broadcast it.
    ///
    /// An existing region under the same name is replaced (last writer wins).
    /// Workers keep using the old buffer until the broadcast reaches them.
    pub fn create(&self, name: &str, len: usize, kind: ElementKind) -> Result<Region, RegionError> {
        let region = Region::shared(len, kind)?;
        if let Some(old) = self.inner.map.install(name, region.clone()) {
            warn!(region = name, old_len = old.len(), new_len = len, "replacing existing region");
        }
        debug!(region = name, len, ?kind, bytes = region.byte_len(), "created shared region");
        self.broadcast(name, &region);
        Ok(region)
    }

    /// Replace the shared region under `name` with a new zeroed buffer.
    ///
    /// Contents are not carried over. Fails, leaving the old region in place,
    /// when the name is unknown or the region is private.
    pub fn resize(
        &self,
        name: &str,
        new_len: usize,
        kind: ElementKind,
    ) -> Result<Region, RegionError> {
        self.resize_with(name, new_len, kind, ResizeFill::Zeroed)
    }

    /// [`resize`](Self::resize) with an explicit fill policy.
    pub fn resize_with(
        &self,
        name: &str,
        new_len: usize,
        kind: ElementKind,
        fill: ResizeFill,
    ) -> Result<Region, RegionError> {
        let old = match self.inner.map.get(name) {
            Some(old) if old.is_shared() => old,
            Some(_) => {
                let err = RegionError::NotShared { name: name.to_owned() };
                error!(region = name, %err, "resize aborted");
                return Err(err);
            }
            None => {
                let err = RegionError::Missing { name: name.to_owned() };
                error!(region = name, %err, "resize aborted");
                return Err(err);
            }
        };
        let region = Region::shared(new_len, kind).inspect_err(|err| {
            error!(region = name, %err, "resize aborted");
        })?;
        if fill == ResizeFill::CopyPrefix {
            region.copy_prefix_from(&old);
        }
        self.inner.map.install(name, region.clone());
        debug!(region = name, old_len = old.len(), new_len, ?kind, "resized shared region");
        self.broadcast(name, &region);
        Ok(region)
    }

    /// Register a region built elsewhere. Shared regions are broadcast;
    /// private ones stay on the coordinator. Returns the displaced region.
    pub fn adopt(&self, name: &str, region: Region) -> Option<Region> {
        let old = self.inner.map.install(name, region.clone());
        if region.is_shared() {
            self.broadcast(name, &region);
        }
        old
    }

    /// Current region under `name`.
    pub fn get(&self, name: &str) -> Option<Region> {
        self.inner.map.get(name)
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.map.slot(name).is_some()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.inner.map.names()
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    /// True when no region is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every `(name, region)` pair, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, Region)> {
        self.inner.map.snapshot()
    }

    /// Shared regions only; this is what a newly spawned worker receives.
    pub fn shared_snapshot(&self) -> Vec<(String, Region)> {
        let mut all = self.snapshot();
        all.retain(|(_, region)| region.is_shared());
        all
    }

    fn broadcast(&self, name: &str, region: &Region) {
        let live: Vec<Arc<dyn RegionSink>> = {
            let mut sinks = self
                .inner
                .sinks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            sinks.retain(|sink| sink.strong_count() > 0);
            sinks.iter().filter_map(Weak::upgrade).collect()
        };
        for sink in live {
            sink.share_set(name, region);
        }
    }
}

impl RegionSource for SharedRegionTable {
    fn slot(&self, name: &str) -> Option<Arc<RegionSlot>> {
        self.inner.map.slot(name)
    }
}

/// A worker's own view of the region table, kept current by `ShareSet`.
#[derive(Default)]
pub struct LocalShares {
    map: RegionMap,
}

impl LocalShares {
    pub(crate) fn install(&self, name: &str, region: Region) -> Option<Region> {
        self.map.install(name, region)
    }

    /// Current region under `name`.
    pub fn get(&self, name: &str) -> Option<Region> {
        self.map.get(name)
    }

    /// Names this worker knows about.
    pub fn names(&self) -> Vec<String> {
        self.map.names()
    }
}

impl RegionSource for LocalShares {
    fn slot(&self, name: &str) -> Option<Arc<RegionSlot>> {
        self.map.slot(name)
    }
}
