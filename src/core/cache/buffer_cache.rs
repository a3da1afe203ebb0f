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

//! Buffer cache
//!
//! Guest buffers are mirrored into host allocations. Ranges of at least one
//! page are page-tracked: the covering pages are registered with an
//! [`AccessTracker`] and re-uploaded only after a write lands in them.
//! Smaller ranges are keyed by `(address, size)` and compared by content
//! hash on every lookup, which avoids protecting pages that are shared with
//! unrelated hot data such as stacks.
//!
//! Host allocations only live for one frame: [`BufferCache::begin_frame`]
//! frees them in bulk so no buffer is released while a submitted frame may
//! still reference it.
//!
//! A second tracker serves [`BufferCache::track`] and friends, letting other
//! caches observe writes without creating host buffers.

use std::collections::HashMap;
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use super::CacheStats;
use crate::core::config::TrackingBackend;
use crate::core::error::Result;
use crate::core::memory::{create_tracker, AccessTracker, GuestMemory, MemoryError, RegionId};

/// Host buffer allocation backend
pub trait BufferAllocator {
    type Buffer: Send + Sync;

    /// Allocate a buffer of at least `size` bytes
    fn create_buffer(&mut self, size: u64) -> Result<Self::Buffer>;

    /// Copy `data` into `buffer` at `offset`
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;
}

/// Host view of a guest range
#[derive(Debug)]
pub struct BufferRef<B> {
    pub buffer: Arc<B>,
    /// Byte offset of the requested address within `buffer`
    pub offset: u64,
    pub size: u64,
    /// Contents were (re)uploaded by this lookup
    pub was_dirty: bool,
}

struct TrackedEntry<B> {
    start: u64,
    end: u64,
    buffer: Arc<B>,
}

struct HashedEntry<B> {
    buffer: Arc<B>,
    hash: u64,
}

/// Guest → host buffer cache
pub struct BufferCache<A: BufferAllocator> {
    allocator: A,
    memory: Arc<dyn GuestMemory>,
    tracker: Arc<dyn AccessTracker>,
    observer: Arc<dyn AccessTracker>,
    page_size: u64,
    tracked: HashMap<RegionId, TrackedEntry<A::Buffer>>,
    hashed: HashMap<(u64, u64), HashedEntry<A::Buffer>>,
    /// Buffers replaced this frame, kept alive until the next frame starts
    retired: Vec<Arc<A::Buffer>>,
    frame: u64,
    stats: CacheStats,
}

impl<A: BufferAllocator> BufferCache<A> {
    /// Create a cache tracking pages of `page_size` bytes with `backend`
    pub fn new(
        allocator: A,
        memory: Arc<dyn GuestMemory>,
        backend: TrackingBackend,
        page_size: u64,
    ) -> Self {
        let tracker = create_tracker(backend, &memory, page_size);
        let observer = create_tracker(backend, &memory, page_size);
        Self {
            allocator,
            memory,
            tracker,
            observer,
            page_size,
            tracked: HashMap::new(),
            hashed: HashMap::new(),
            retired: Vec::new(),
            frame: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    /// Host buffer holding `[addr, addr + size)`
    ///
    /// # Errors
    ///
    /// Null or unreadable guest ranges, and allocator failures.
    pub fn get_buffer(&mut self, addr: u64, size: u64) -> Result<BufferRef<A::Buffer>> {
        if addr == 0 {
            return Err(MemoryError::NullPointer.into());
        }
        let size = size.max(1);
        let result = if size >= self.page_size {
            self.get_tracked(addr, size)
        } else {
            self.get_hashed(addr, size)
        };
        self.stats.entries = self.tracked.len() + self.hashed.len();
        result
    }

    fn get_tracked(&mut self, addr: u64, size: u64) -> Result<BufferRef<A::Buffer>> {
        let range = self.tracker.track(addr, size)?;

        if !range.created {
            if let Some(entry) = self.tracked.get(&range.id) {
                let was_dirty = self.tracker.is_dirty(range.id)?;
                if was_dirty {
                    // Re-arm before reading so a concurrent write marks it again
                    self.tracker.reset_dirty(range.id)?;
                    let data = self.memory.read_vec(entry.start, (entry.end - entry.start) as usize)?;
                    self.allocator.write_buffer(&entry.buffer, 0, &data)?;
                    self.stats.misses += 1;
                    log::trace!("Re-uploaded buffer 0x{:X}..0x{:X}", entry.start, entry.end);
                } else {
                    self.stats.hits += 1;
                }
                return Ok(BufferRef {
                    buffer: Arc::clone(&entry.buffer),
                    offset: addr - entry.start,
                    size,
                    was_dirty,
                });
            }
        }

        // New or grown region; anything it swallowed is retired
        let absorbed: Vec<RegionId> = self
            .tracked
            .iter()
            .filter(|(_, e)| e.start >= range.start && e.end <= range.end)
            .map(|(id, _)| *id)
            .collect();
        for id in absorbed {
            if let Some(entry) = self.tracked.remove(&id) {
                self.retired.push(entry.buffer);
            }
        }

        let buffer = Arc::new(self.allocator.create_buffer(range.len())?);
        self.tracker.reset_dirty(range.id)?;
        let data = self.memory.read_vec(range.start, range.len() as usize)?;
        self.allocator.write_buffer(&buffer, 0, &data)?;
        self.stats.misses += 1;
        log::trace!(
            "Created tracked buffer 0x{:X}..0x{:X} for 0x{:X}+0x{:X}",
            range.start,
            range.end,
            addr,
            size
        );

        self.tracked.insert(
            range.id,
            TrackedEntry {
                start: range.start,
                end: range.end,
                buffer: Arc::clone(&buffer),
            },
        );
        Ok(BufferRef {
            buffer,
            offset: addr - range.start,
            size,
            was_dirty: true,
        })
    }

    fn get_hashed(&mut self, addr: u64, size: u64) -> Result<BufferRef<A::Buffer>> {
        let data = self.memory.read_vec(addr, size as usize)?;
        let hash = xxh3_64(&data);

        if let Some(entry) = self.hashed.get_mut(&(addr, size)) {
            let was_dirty = entry.hash != hash;
            if was_dirty {
                self.allocator.write_buffer(&entry.buffer, 0, &data)?;
                entry.hash = hash;
                self.stats.misses += 1;
            } else {
                self.stats.hits += 1;
            }
            return Ok(BufferRef {
                buffer: Arc::clone(&entry.buffer),
                offset: 0,
                size,
                was_dirty,
            });
        }

        let buffer = Arc::new(self.allocator.create_buffer(size)?);
        self.allocator.write_buffer(&buffer, 0, &data)?;
        self.stats.misses += 1;
        self.hashed.insert(
            (addr, size),
            HashedEntry {
                buffer: Arc::clone(&buffer),
                hash,
            },
        );
        Ok(BufferRef {
            buffer,
            offset: 0,
            size,
            was_dirty: true,
        })
    }

    /// Release per-frame allocations
    ///
    /// Every host buffer handed out during the previous frame is freed here
    /// and recreated by the next lookup. Tracked regions are untracked so
    /// their pages stop faulting until they are requested again.
    pub fn begin_frame(&mut self) {
        self.frame += 1;
        let tracked = self.tracked.len();
        for (id, _) in self.tracked.drain() {
            if let Err(e) = self.tracker.untrack(id) {
                log::warn!("Failed to untrack buffer region {}: {}", id, e);
            }
        }
        let hashed = self.hashed.len();
        self.hashed.clear();
        let retired = self.retired.len();
        self.retired.clear();
        self.stats.entries = 0;
        if tracked + hashed + retired > 0 {
            log::trace!(
                "Frame {}: freed {} tracked, {} hashed and {} retired buffers",
                self.frame,
                tracked,
                hashed,
                retired
            );
        }
    }

    /// Start observing writes to a range without mirroring it
    ///
    /// The returned region starts clean.
    pub fn track(&self, addr: u64, len: u64) -> Result<RegionId> {
        let range = self.observer.track(addr, len)?;
        if range.created {
            self.observer.reset_dirty(range.id)?;
        }
        Ok(range.id)
    }

    /// Whether an observed region was written since its last reset
    pub fn is_dirty(&self, id: RegionId) -> Result<bool> {
        Ok(self.observer.is_dirty(id)?)
    }

    /// Mark an observed region clean and re-arm it
    pub fn reset_dirty(&self, id: RegionId) -> Result<()> {
        Ok(self.observer.reset_dirty(id)?)
    }

    /// Stop observing a region
    pub fn untrack(&self, id: RegionId) -> Result<()> {
        Ok(self.observer.untrack(id)?)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}
