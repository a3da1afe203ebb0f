// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Write-dirty tracking for guest memory ranges
//!
//! A tracked range is rounded out to whole pages and registered in a
//! [`RegionTable`], where every page maps to at most one region. Each region
//! moves through a small state machine:
//!
//! ```text
//!   track ──► dirty, unarmed ──reset_dirty──► clean, armed
//!                  ▲                               │
//!                  └────────── guest write ────────┘
//! ```
//!
//! While armed, the dirty flag is authoritative. Two backends implement the
//! [`AccessTracker`] capability:
//!
//! - [`PageTracker`]: arms a region by write-protecting its pages; the write
//!   fault marks it dirty and lifts protection
//! - [`HashTracker`]: arms a region by snapshotting an xxh3 hash of its bytes;
//!   dirtiness is a hash mismatch
//!
//! Write faults arrive on whichever thread performed the write, so region
//! tables always sit behind a real [`Mutex`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};

use xxhash_rust::xxh3::xxh3_64;

use super::{fault, GuestMemory, MemoryError};
use crate::core::config::TrackingBackend;

/// Identifier of a tracked region
pub type RegionId = u64;

/// Page-aligned range returned by [`AccessTracker::track`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRange {
    pub id: RegionId,
    /// First byte (page aligned)
    pub start: u64,
    /// One past the last byte (page aligned)
    pub end: u64,
    /// The region was created or grown by this call
    pub created: bool,
}

impl TrackedRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Whether `[addr, addr + len)` lies inside this range
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        addr >= self.start && addr.saturating_add(len) <= self.end
    }
}

/// Region state shared by both backends
#[derive(Debug, Clone)]
pub struct Region {
    pub start: u64,
    pub end: u64,
    pub dirty: bool,
    pub armed: bool,
    snapshot: Option<u64>,
}

/// Page → region map
///
/// Inserting a range that overlaps existing regions absorbs them into one
/// region spanning the union, so each page belongs to at most one region.
pub struct RegionTable {
    page_size: u64,
    regions: HashMap<RegionId, Region>,
    pages: HashMap<u64, RegionId>,
    next_id: RegionId,
}

impl RegionTable {
    pub fn new(page_size: u64) -> Self {
        debug_assert!(page_size.is_power_of_two());
        Self {
            page_size,
            regions: HashMap::new(),
            pages: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Round `[addr, addr + len)` out to page boundaries
    pub fn page_span(&self, addr: u64, len: u64) -> (u64, u64) {
        let mask = self.page_size - 1;
        let start = addr & !mask;
        let end = (addr.saturating_add(len.max(1)) + mask) & !mask;
        (start, end)
    }

    /// Register a range, returning it and any regions it absorbed
    pub fn insert(&mut self, addr: u64, len: u64) -> (TrackedRange, Vec<Region>) {
        let (mut start, mut end) = self.page_span(addr, len);

        let mut overlapping: Vec<RegionId> = Vec::new();
        let mut page = start;
        while page < end {
            if let Some(&id) = self.pages.get(&(page / self.page_size)) {
                if !overlapping.contains(&id) {
                    overlapping.push(id);
                }
            }
            page += self.page_size;
        }

        if let [id] = *overlapping.as_slice() {
            if let Some(region) = self.regions.get(&id) {
                if region.start <= start && region.end >= end {
                    return (
                        TrackedRange {
                            id,
                            start: region.start,
                            end: region.end,
                            created: false,
                        },
                        Vec::new(),
                    );
                }
            }
        }

        let mut absorbed = Vec::with_capacity(overlapping.len());
        for id in overlapping {
            if let Some(region) = self.remove(id) {
                start = start.min(region.start);
                end = end.max(region.end);
                absorbed.push(region);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let mut page = start;
        while page < end {
            self.pages.insert(page / self.page_size, id);
            page += self.page_size;
        }
        self.regions.insert(
            id,
            Region {
                start,
                end,
                dirty: true,
                armed: false,
                snapshot: None,
            },
        );

        (
            TrackedRange {
                id,
                start,
                end,
                created: true,
            },
            absorbed,
        )
    }

    /// Region covering `addr`, if any
    pub fn region_at(&self, addr: u64) -> Option<RegionId> {
        self.pages.get(&(addr / self.page_size)).copied()
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    pub fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(&id)
    }

    pub fn remove(&mut self, id: RegionId) -> Option<Region> {
        let region = self.regions.remove(&id)?;
        let mut page = region.start;
        while page < region.end {
            self.pages.remove(&(page / self.page_size));
            page += self.page_size;
        }
        Some(region)
    }

    /// Number of live regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Number of registered pages
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Memory-access tracking capability
pub trait AccessTracker: Send + Sync {
    /// Start tracking a range; overlapping regions are merged
    ///
    /// New and grown regions start dirty and unarmed.
    fn track(&self, addr: u64, len: u64) -> Result<TrackedRange, MemoryError>;

    /// Whether the region changed since it was last armed
    fn is_dirty(&self, id: RegionId) -> Result<bool, MemoryError>;

    /// Mark the region clean and re-arm detection
    fn reset_dirty(&self, id: RegionId) -> Result<(), MemoryError>;

    /// Stop tracking a region
    fn untrack(&self, id: RegionId) -> Result<(), MemoryError>;

    /// Write notification for `addr`
    ///
    /// Returns `true` when the address belongs to a tracked region, meaning a
    /// hardware fault at this address was caused by tracking and the faulting
    /// write may be retried.
    fn on_write(&self, addr: u64) -> bool;
}

/// Page-protection primitive used by [`PageTracker`]
pub trait PageProtect: Send + Sync {
    /// Make `[start, start + len)` read-only
    fn protect(&self, start: u64, len: u64) -> Result<(), MemoryError>;

    /// Make `[start, start + len)` writable again
    fn unprotect(&self, start: u64, len: u64) -> Result<(), MemoryError>;

    /// Protection is enforced by the host MMU
    fn is_hardware(&self) -> bool {
        false
    }
}

/// Protection stand-in for memories that report writes themselves
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProtect;

impl PageProtect for NoProtect {
    fn protect(&self, _start: u64, _len: u64) -> Result<(), MemoryError> {
        Ok(())
    }

    fn unprotect(&self, _start: u64, _len: u64) -> Result<(), MemoryError> {
        Ok(())
    }
}

fn lock_table(table: &Mutex<RegionTable>) -> MutexGuard<'_, RegionTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fault-driven tracker
pub struct PageTracker {
    table: Mutex<RegionTable>,
    protect: Box<dyn PageProtect>,
}

impl PageTracker {
    pub fn new(page_size: u64, protect: Box<dyn PageProtect>) -> Self {
        Self {
            table: Mutex::new(RegionTable::new(page_size)),
            protect,
        }
    }

    /// Number of live regions
    pub fn region_count(&self) -> usize {
        lock_table(&self.table).len()
    }
}

impl AccessTracker for PageTracker {
    fn track(&self, addr: u64, len: u64) -> Result<TrackedRange, MemoryError> {
        let mut table = lock_table(&self.table);
        let (range, absorbed) = table.insert(addr, len);
        for region in absorbed.iter().filter(|r| r.armed) {
            self.protect.unprotect(region.start, region.end - region.start)?;
        }
        if range.created {
            log::trace!(
                "Tracking pages 0x{:X}..0x{:X} (absorbed {})",
                range.start,
                range.end,
                absorbed.len()
            );
        }
        Ok(range)
    }

    fn is_dirty(&self, id: RegionId) -> Result<bool, MemoryError> {
        lock_table(&self.table)
            .get(id)
            .map(|r| r.dirty)
            .ok_or(MemoryError::UnknownRegion(id))
    }

    fn reset_dirty(&self, id: RegionId) -> Result<(), MemoryError> {
        let mut table = lock_table(&self.table);
        let region = table.get_mut(id).ok_or(MemoryError::UnknownRegion(id))?;
        region.dirty = false;
        region.armed = true;
        let (start, len) = (region.start, region.end - region.start);
        self.protect.protect(start, len)
    }

    fn untrack(&self, id: RegionId) -> Result<(), MemoryError> {
        let mut table = lock_table(&self.table);
        let region = table.remove(id).ok_or(MemoryError::UnknownRegion(id))?;
        if region.armed {
            self.protect.unprotect(region.start, region.end - region.start)?;
        }
        Ok(())
    }

    fn on_write(&self, addr: u64) -> bool {
        let mut table = lock_table(&self.table);
        let Some(id) = table.region_at(addr) else {
            return false;
        };
        if let Some(region) = table.get_mut(id) {
            if region.armed {
                region.dirty = true;
                region.armed = false;
                let (start, len) = (region.start, region.end - region.start);
                // A failure here leaves the page read-only and the write faults again
                let _ = self.protect.unprotect(start, len);
            }
        }
        true
    }
}

/// Content-hash tracker
///
/// Portable fallback that never touches page protections. Writes are not
/// observed directly; `is_dirty` rehashes the region.
pub struct HashTracker {
    table: Mutex<RegionTable>,
    memory: Arc<dyn GuestMemory>,
}

impl HashTracker {
    pub fn new(page_size: u64, memory: Arc<dyn GuestMemory>) -> Self {
        Self {
            table: Mutex::new(RegionTable::new(page_size)),
            memory,
        }
    }

    fn hash_region(&self, start: u64, end: u64) -> Result<u64, MemoryError> {
        let bytes = self.memory.read_vec(start, (end - start) as usize)?;
        Ok(xxh3_64(&bytes))
    }
}

impl AccessTracker for HashTracker {
    fn track(&self, addr: u64, len: u64) -> Result<TrackedRange, MemoryError> {
        let (range, _) = lock_table(&self.table).insert(addr, len);
        Ok(range)
    }

    fn is_dirty(&self, id: RegionId) -> Result<bool, MemoryError> {
        let table = lock_table(&self.table);
        let region = table.get(id).ok_or(MemoryError::UnknownRegion(id))?;
        if region.dirty {
            return Ok(true);
        }
        let current = self.hash_region(region.start, region.end)?;
        Ok(region.snapshot != Some(current))
    }

    fn reset_dirty(&self, id: RegionId) -> Result<(), MemoryError> {
        let mut table = lock_table(&self.table);
        let (start, end) = {
            let region = table.get(id).ok_or(MemoryError::UnknownRegion(id))?;
            (region.start, region.end)
        };
        let hash = self.hash_region(start, end)?;
        if let Some(region) = table.get_mut(id) {
            region.snapshot = Some(hash);
            region.dirty = false;
            region.armed = true;
        }
        Ok(())
    }

    fn untrack(&self, id: RegionId) -> Result<(), MemoryError> {
        lock_table(&self.table)
            .remove(id)
            .map(|_| ())
            .ok_or(MemoryError::UnknownRegion(id))
    }

    fn on_write(&self, _addr: u64) -> bool {
        false
    }
}

/// Registry delivering write notifications to trackers
///
/// Holds weak references so dropping a cache unregisters its tracker.
pub struct FaultRouter {
    trackers: RwLock<Vec<Weak<dyn AccessTracker>>>,
}

impl FaultRouter {
    pub fn new() -> Self {
        Self {
            trackers: RwLock::new(Vec::new()),
        }
    }

    /// Process-wide router fed by the host write-fault handler
    pub fn global() -> Arc<FaultRouter> {
        static GLOBAL: OnceLock<Arc<FaultRouter>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(FaultRouter::new())))
    }

    pub fn register<T: AccessTracker + 'static>(&self, tracker: &Arc<T>) {
        let weak: Weak<dyn AccessTracker> = Arc::downgrade(tracker) as Weak<dyn AccessTracker>;
        let mut trackers = self.trackers.write().unwrap_or_else(PoisonError::into_inner);
        trackers.retain(|t| t.strong_count() > 0);
        trackers.push(weak);
    }

    /// Route a write at `addr`; returns whether any tracker claimed it
    pub fn dispatch(&self, addr: u64) -> bool {
        let trackers = self.trackers.read().unwrap_or_else(PoisonError::into_inner);
        let mut handled = false;
        for tracker in trackers.iter().filter_map(Weak::upgrade) {
            handled |= tracker.on_write(addr);
        }
        handled
    }

    /// Number of live registered trackers
    pub fn tracker_count(&self) -> usize {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| t.strong_count() > 0)
            .count()
    }
}

impl Default for FaultRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a tracker for `memory` using the configured backend
///
/// The fault backend installs the host write-fault handler when `memory`
/// relies on MMU protection. If the handler cannot be installed the hash
/// backend is used instead.
pub fn create_tracker(
    backend: TrackingBackend,
    memory: &Arc<dyn GuestMemory>,
    page_size: u64,
) -> Arc<dyn AccessTracker> {
    if backend == TrackingBackend::Fault {
        let protect = memory.page_protection();
        let usable = if protect.is_hardware() {
            match fault::install_fault_handler() {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Write-fault tracking unavailable ({}), falling back to hashing", e);
                    false
                }
            }
        } else {
            true
        };

        if usable {
            let tracker = Arc::new(PageTracker::new(page_size, protect));
            memory.fault_router().register(&tracker);
            return tracker;
        }
    }

    Arc::new(HashTracker::new(page_size, Arc::clone(memory)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::FlatMemory;

    const PAGE: u64 = 0x1000;

    #[test]
    fn test_page_span_rounds_out() {
        let table = RegionTable::new(PAGE);
        assert_eq!(table.page_span(0x1234, 0x10), (0x1000, 0x2000));
        assert_eq!(table.page_span(0x1000, 0x1000), (0x1000, 0x2000));
        assert_eq!(table.page_span(0x1FFF, 2), (0x1000, 0x3000));
    }

    #[test]
    fn test_insert_inside_existing_region_reuses_it() {
        let mut table = RegionTable::new(PAGE);
        let (outer, _) = table.insert(0x1000, 0x3000);
        let (inner, absorbed) = table.insert(0x2000, 0x100);
        assert_eq!(inner.id, outer.id);
        assert!(!inner.created);
        assert!(absorbed.is_empty());
    }

    #[test]
    fn test_growth_absorbs_overlapping_regions() {
        let mut table = RegionTable::new(PAGE);
        let (a, _) = table.insert(0x1000, 0x1000);
        let (b, _) = table.insert(0x4000, 0x1000);
        let (merged, absorbed) = table.insert(0x1800, 0x3000);

        assert_eq!(absorbed.len(), 2);
        assert_eq!((merged.start, merged.end), (0x1000, 0x5000));
        assert_eq!(table.len(), 1);
        assert_eq!(table.page_count(), 4);
        assert!(table.get(a.id).is_none());
        assert!(table.get(b.id).is_none());
        for page in [0x1000, 0x2000, 0x3000, 0x4000] {
            assert_eq!(table.region_at(page), Some(merged.id));
        }
    }

    #[test]
    fn test_page_tracker_state_machine() {
        let tracker = PageTracker::new(PAGE, Box::new(NoProtect));
        let range = tracker.track(0x8000, 0x2000).unwrap();
        assert!(tracker.is_dirty(range.id).unwrap());

        tracker.reset_dirty(range.id).unwrap();
        assert!(!tracker.is_dirty(range.id).unwrap());

        assert!(tracker.on_write(0x9004));
        assert!(tracker.is_dirty(range.id).unwrap());

        // Unarmed: further writes keep it dirty without re-triggering
        assert!(tracker.on_write(0x8000));
        assert!(tracker.is_dirty(range.id).unwrap());

        assert!(!tracker.on_write(0xA000));
    }

    #[test]
    fn test_router_delivers_flat_memory_writes() {
        let memory = Arc::new(FlatMemory::new(0x10_0000, 0x4000));
        let tracker = Arc::new(PageTracker::new(PAGE, Box::new(NoProtect)));
        memory.fault_router().register(&tracker);

        let range = tracker.track(0x10_1000, 0x1000).unwrap();
        tracker.reset_dirty(range.id).unwrap();

        memory.write_u32(0x10_0000, 7).unwrap();
        assert!(!tracker.is_dirty(range.id).unwrap());

        memory.write_u32(0x10_1FFC, 7).unwrap();
        assert!(tracker.is_dirty(range.id).unwrap());
    }

    #[test]
    fn test_router_drops_dead_trackers() {
        let router = FaultRouter::new();
        {
            let tracker = Arc::new(PageTracker::new(PAGE, Box::new(NoProtect)));
            router.register(&tracker);
            assert_eq!(router.tracker_count(), 1);
        }
        assert_eq!(router.tracker_count(), 0);
        assert!(!router.dispatch(0x1000));
    }

    #[test]
    fn test_hash_tracker_detects_content_change() {
        let flat = Arc::new(FlatMemory::new(0x2000, 0x2000));
        let memory: Arc<dyn GuestMemory> = flat.clone();
        let tracker = HashTracker::new(PAGE, memory);

        let range = tracker.track(0x2000, 0x20).unwrap();
        tracker.reset_dirty(range.id).unwrap();
        assert!(!tracker.is_dirty(range.id).unwrap());

        flat.write_u32(0x2010, 1).unwrap();
        assert!(tracker.is_dirty(range.id).unwrap());

        // Writing the old value back makes the content identical again
        flat.write_u32(0x2010, 0).unwrap();
        assert!(!tracker.is_dirty(range.id).unwrap());
    }

    #[test]
    fn test_unknown_region() {
        let tracker = PageTracker::new(PAGE, Box::new(NoProtect));
        assert_eq!(tracker.is_dirty(42), Err(MemoryError::UnknownRegion(42)));
    }

    #[test]
    fn test_create_tracker_for_flat_memory_uses_router() {
        let flat = Arc::new(FlatMemory::new(0x3000, 0x1000));
        let memory: Arc<dyn GuestMemory> = flat.clone();
        let tracker = create_tracker(TrackingBackend::Fault, &memory, PAGE);
        assert_eq!(flat.fault_router().tracker_count(), 1);

        let range = tracker.track(0x3000, 0x1000).unwrap();
        tracker.reset_dirty(range.id).unwrap();
        flat.write_u32(0x3004, 1).unwrap();
        assert!(tracker.is_dirty(range.id).unwrap());
    }
}
