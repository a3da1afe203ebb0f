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

//! Guest memory access
//!
//! Guest addresses are host-process addresses (1:1 mapping). The graphics core
//! never translates pointers; it reads descriptors, command buffers and vertex
//! data directly through the [`GuestMemory`] trait.
//!
//! Two backends are provided:
//!
//! - [`HostMemory`]: raw host pointers, used when running inside the emulator
//! - [`FlatMemory`]: a bounds-checked arena starting at a chosen base address,
//!   used by tests, benches and the replay tool
//!
//! # Write tracking
//!
//! Caches detect guest writes through an [`AccessTracker`](tracking::AccessTracker)
//! registered with the memory's [`FaultRouter`](tracking::FaultRouter). With
//! [`HostMemory`] the router is fed by the process-wide write-fault handler
//! (see [`fault`]); [`FlatMemory`] feeds it directly from every write, which is
//! how a write fault is simulated without touching page protections.
//!
//! # Example
//!
//! ```
//! use liverpool::core::memory::{FlatMemory, GuestMemory};
//!
//! let memory = FlatMemory::new(0x1000_0000, 0x1000);
//! memory.write_u32(0x1000_0010, 0xCAFE_BABE).unwrap();
//! assert_eq!(memory.read_u32(0x1000_0010).unwrap(), 0xCAFE_BABE);
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

pub mod fault;
pub mod tracking;

pub use tracking::{
    create_tracker, AccessTracker, FaultRouter, HashTracker, NoProtect, PageProtect, PageTracker,
    RegionId, RegionTable, TrackedRange,
};

/// Errors produced by guest memory access and page tracking
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("guest access out of range: 0x{addr:016X} (+{len} bytes)")]
    OutOfRange { addr: u64, len: u64 },

    #[error("null guest pointer")]
    NullPointer,

    #[error("unknown tracked region {0}")]
    UnknownRegion(RegionId),

    #[error("page protection failed: {0}")]
    Protect(String),
}

/// Access to guest memory
///
/// All accessors take `&self`: guest memory is shared with producer threads
/// that keep writing while the GPU thread reads.
pub trait GuestMemory: Send + Sync {
    /// Copy `out.len()` bytes starting at `addr`
    fn read_bytes(&self, addr: u64, out: &mut [u8]) -> Result<(), MemoryError>;

    /// Copy `data` to `addr`
    fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<(), MemoryError>;

    /// Router delivering write notifications for this memory
    fn fault_router(&self) -> Arc<FaultRouter>;

    /// Page protection used by fault-based trackers over this memory
    ///
    /// Defaults to [`NoProtect`], which suits memories that report writes
    /// through their router directly.
    fn page_protection(&self) -> Box<dyn PageProtect> {
        Box::new(NoProtect)
    }

    /// Read a u32 that another thread may be modifying
    ///
    /// Used by polling waits (`WAIT_REG_MEM`, semaphores), which must observe
    /// every external store.
    fn read_u32_volatile(&self, addr: u64) -> Result<u32, MemoryError> {
        self.read_u32(addr)
    }

    fn read_u32(&self, addr: u64) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, addr: u64) -> Result<u64, MemoryError> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u32(&self, addr: u64, value: u32) -> Result<(), MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    fn write_u64(&self, addr: u64, value: u64) -> Result<(), MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Read `count` little-endian dwords starting at `addr`
    fn read_dwords(&self, addr: u64, count: usize) -> Result<Vec<u32>, MemoryError> {
        let mut bytes = vec![0u8; count * 4];
        self.read_bytes(addr, &mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Read `len` bytes into a freshly allocated vector
    fn read_vec(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut bytes = vec![0u8; len];
        self.read_bytes(addr, &mut bytes)?;
        Ok(bytes)
    }
}

/// Guest memory backed directly by host-process addresses
///
/// Writes go through the raw pointer; a write into a write-protected tracked
/// page raises a fault that the installed handler routes to the global
/// [`FaultRouter`].
pub struct HostMemory {
    router: Arc<FaultRouter>,
}

impl HostMemory {
    /// Create a host memory view
    ///
    /// # Safety
    ///
    /// Every address later passed to this object must be valid for the access
    /// length for as long as the access runs. Guest pointers come from the
    /// emulated program and are trusted as-is.
    pub unsafe fn new() -> Self {
        Self {
            router: FaultRouter::global(),
        }
    }
}

impl GuestMemory for HostMemory {
    fn read_bytes(&self, addr: u64, out: &mut [u8]) -> Result<(), MemoryError> {
        if addr == 0 {
            return Err(MemoryError::NullPointer);
        }
        // SAFETY: validity of guest pointers is the contract of `HostMemory::new`
        unsafe {
            std::ptr::copy_nonoverlapping(addr as usize as *const u8, out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<(), MemoryError> {
        if addr == 0 {
            return Err(MemoryError::NullPointer);
        }
        // SAFETY: see `read_bytes`
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), addr as usize as *mut u8, data.len());
        }
        Ok(())
    }

    fn fault_router(&self) -> Arc<FaultRouter> {
        Arc::clone(&self.router)
    }

    fn page_protection(&self) -> Box<dyn PageProtect> {
        fault::host_page_protection()
    }

    fn read_u32_volatile(&self, addr: u64) -> Result<u32, MemoryError> {
        if addr == 0 {
            return Err(MemoryError::NullPointer);
        }
        // SAFETY: see `read_bytes`; guest fences are naturally aligned
        Ok(unsafe { std::ptr::read_volatile(addr as usize as *const u32) })
    }
}

/// Bounds-checked guest memory arena
///
/// Covers `[base, base + size)`. Every write notifies the arena's
/// [`FaultRouter`] of each page it touches, standing in for the write fault a
/// protected host page would raise.
pub struct FlatMemory {
    base: u64,
    data: RwLock<Vec<u8>>,
    router: Arc<FaultRouter>,
    page_size: u64,
}

impl FlatMemory {
    /// Create a zero-filled arena with 4KB pages
    pub fn new(base: u64, size: usize) -> Self {
        Self::with_page_size(base, size, 4096)
    }

    /// Create a zero-filled arena with a specific tracking page size
    pub fn with_page_size(base: u64, size: usize, page_size: u64) -> Self {
        Self {
            base,
            data: RwLock::new(vec![0; size]),
            router: Arc::new(FaultRouter::new()),
            page_size,
        }
    }

    /// First valid address
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Arena length in bytes
    pub fn size(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Write a slice of dwords starting at `addr`
    pub fn write_dwords(&self, addr: u64, words: &[u32]) -> Result<(), MemoryError> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write_bytes(addr, &bytes)
    }

    fn offset(&self, addr: u64, len: usize, limit: usize) -> Result<usize, MemoryError> {
        let out_of_range = MemoryError::OutOfRange {
            addr,
            len: len as u64,
        };
        let start = addr.checked_sub(self.base).ok_or(out_of_range.clone())? as usize;
        match start.checked_add(len) {
            Some(end) if end <= limit => Ok(start),
            _ => Err(out_of_range),
        }
    }
}

impl GuestMemory for FlatMemory {
    fn read_bytes(&self, addr: u64, out: &mut [u8]) -> Result<(), MemoryError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let start = self.offset(addr, out.len(), data.len())?;
        out.copy_from_slice(&data[start..start + out.len()]);
        Ok(())
    }

    fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<(), MemoryError> {
        {
            let mut arena = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let start = self.offset(addr, data.len(), arena.len())?;
            arena[start..start + data.len()].copy_from_slice(data);
        }

        if !data.is_empty() {
            let first = addr & !(self.page_size - 1);
            let last = addr + data.len() as u64 - 1;
            let mut page = first;
            while page <= last {
                self.router.dispatch(page.max(addr));
                page += self.page_size;
            }
        }
        Ok(())
    }

    fn fault_router(&self) -> Arc<FaultRouter> {
        Arc::clone(&self.router)
    }
}
