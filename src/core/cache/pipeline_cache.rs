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

//! Pipeline cache
//!
//! Pipelines are found by a linear scan over their keys. The key identifies
//! the shader pair, the vertex fetch layout and the attachment formats the
//! pipeline was built against. Blend, depth and stencil state are not part
//! of it: pipelines that differ only in that state share one entry built from
//! whichever register snapshot came first.

use std::sync::Arc;

use super::CacheStats;
use crate::core::error::Result;
use crate::core::renderer::tessellation::PatchKind;
use crate::core::shader::FetchShaderVertexBinding;

/// Identity of a host pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub vs_hash: u64,
    pub ps_hash: u64,
    pub fetch: Vec<FetchShaderVertexBinding>,
    /// `(stride, format)` of each vertex buffer, in attribute order
    pub vertex_layout: Vec<(u32, wgpu::VertexFormat)>,
    /// Patch expansion compiled into the vertex stage
    pub patch: Option<PatchKind>,
    pub color_formats: Vec<Option<wgpu::TextureFormat>>,
    pub depth_format: Option<wgpu::TextureFormat>,
}

/// Linear-scan pipeline cache
pub struct PipelineCache<P> {
    entries: Vec<(PipelineKey, Arc<P>)>,
    stats: CacheStats,
}

impl<P> PipelineCache<P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// Find the pipeline for `key`, building it on a miss
    pub fn get_or_create<F>(&mut self, key: &PipelineKey, build: F) -> Result<Arc<P>>
    where
        F: FnOnce() -> Result<P>,
    {
        if let Some((_, pipeline)) = self.entries.iter().find(|(k, _)| k == key) {
            self.stats.hits += 1;
            return Ok(Arc::clone(pipeline));
        }
        self.stats.misses += 1;

        let pipeline = Arc::new(build()?);
        log::debug!(
            "Created pipeline VS {:016X} / PS {:016X} ({} attributes, patch {:?})",
            key.vs_hash,
            key.ps_hash,
            key.fetch.len(),
            key.patch
        );
        self.entries.push((key.clone(), Arc::clone(&pipeline)));
        self.stats.entries = self.entries.len();
        Ok(pipeline)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P> Default for PipelineCache<P> {
    fn default() -> Self {
        Self::new()
    }
}
