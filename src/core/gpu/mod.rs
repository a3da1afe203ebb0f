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

//! GPU subsystem context
//!
//! [`GpuContext`] owns every piece of graphics front-end state that the PM4
//! interpreter mutates and the renderer reads: the register file, render-target
//! size hints, latched draw parameters, GDS, the CE/DE counters and the guest
//! event sources. It is owned by the GPU thread and passed by reference into
//! the command processor and renderer, which makes the single-writer rule
//! explicit: nothing else can reach the register file.

use std::sync::Arc;

use crate::core::config::GpuConfig;
use crate::core::memory::GuestMemory;

pub mod descriptors;
pub mod events;
pub mod registers;
pub mod sync;

pub use descriptors::{DstSel, SSharp, TSharp, VSharp};
pub use events::{EventKind, EventSources};
pub use registers::{RegisterFile, ShaderStage};
pub use sync::{Counters, EngineSync};

/// Global data share size in bytes
pub const GDS_SIZE: usize = 64 * 1024;

/// Index element width
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexType {
    #[default]
    U16,
    U32,
}

impl IndexType {
    pub fn from_raw(value: u32) -> Self {
        if value & 0x3 == 1 {
            IndexType::U32
        } else {
            IndexType::U16
        }
    }

    pub fn size(self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Draw parameters latched by `INDEX_*`, `SET_BASE` and `NUM_INSTANCES`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawState {
    /// Index buffer address (`INDEX_BASE`)
    pub index_base: u64,
    /// Index buffer size in indices (`INDEX_BUFFER_SIZE`)
    pub index_count: u32,
    pub index_type: IndexType,
    /// Indirect-args base (`SET_BASE` index 1)
    pub indirect_base: u64,
    pub num_instances: u32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            index_base: 0,
            index_count: 0,
            index_type: IndexType::U16,
            indirect_base: 0,
            num_instances: 1,
        }
    }
}

/// Graphics front-end state
pub struct GpuContext {
    /// Hardware register file
    pub regs: RegisterFile,

    /// True render-target sizes recovered from driver hints
    ///
    /// Pitch/slice registers round dimensions up to tile granularity; the
    /// hint carries the size the application asked for.
    pub target_hints: [Option<(u32, u32)>; registers::MAX_COLOR_TARGETS],

    /// Latched draw parameters
    pub draw: DrawState,

    /// Global data share
    pub gds: Box<[u8]>,

    memory: Arc<dyn GuestMemory>,
    sync: Arc<EngineSync>,
    events: Arc<EventSources>,
    config: GpuConfig,
}

impl GpuContext {
    pub fn new(config: GpuConfig, memory: Arc<dyn GuestMemory>) -> Self {
        Self {
            regs: RegisterFile::new(),
            target_hints: [None; registers::MAX_COLOR_TARGETS],
            draw: DrawState::default(),
            gds: vec![0u8; GDS_SIZE].into_boxed_slice(),
            memory,
            sync: Arc::new(EngineSync::new()),
            events: Arc::new(EventSources::new()),
            config,
        }
    }

    /// Guest memory
    #[inline(always)]
    pub fn memory(&self) -> &dyn GuestMemory {
        self.memory.as_ref()
    }

    /// Shared guest memory handle
    pub fn memory_arc(&self) -> Arc<dyn GuestMemory> {
        Arc::clone(&self.memory)
    }

    /// CE/DE counters
    pub fn sync(&self) -> &Arc<EngineSync> {
        &self.sync
    }

    /// Guest event sources
    pub fn events(&self) -> &Arc<EventSources> {
        &self.events
    }

    pub fn config(&self) -> &GpuConfig {
        &self.config
    }

    /// Dimensions of color target `n`, preferring the driver hint
    pub fn color_target_dimensions(&self, n: usize) -> (u32, u32) {
        match self.target_hints.get(n).copied().flatten() {
            Some(dims) => dims,
            None => self.regs.color_buffer(n).dimensions(),
        }
    }
}
