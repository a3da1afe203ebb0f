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

//! Host resource caches
//!
//! Every cache here is owned by the GPU thread. The only state touched from
//! other threads is the access tracker behind [`BufferCache`], which the
//! write-fault handler updates under its own mutex.

pub mod buffer_cache;
pub mod pipeline_cache;
pub mod shader_cache;
pub mod texture_cache;

#[cfg(test)]
mod tests;

use serde::Serialize;

pub use buffer_cache::{BufferAllocator, BufferCache, BufferRef};
pub use pipeline_cache::{PipelineCache, PipelineKey};
pub use shader_cache::{CachedShader, ShaderCache};
pub use texture_cache::{ImageLayout, TextureAllocator, TextureCache, TextureDesc, TextureRef};

/// Lookup counters reported by every cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Live entries
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
