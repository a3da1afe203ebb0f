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

//! Shader cache
//!
//! Translated shaders are keyed by the hash in their binary header and
//! compiled into a host module at most once. Fetch-shader parses are cached
//! separately by address and content.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use super::CacheStats;
use crate::core::error::Result;
use crate::core::gpu::registers::ShaderStage;
use crate::core::memory::GuestMemory;
use crate::core::shader::fetch::{parse_fetch_shader, read_fetch_shader};
use crate::core::shader::{translate, FetchShaderVertexBinding, ShaderBinary, ShaderData, VertexInput};

/// Compiled module together with its translation
#[derive(Debug)]
pub struct CachedShader<M> {
    pub module: Arc<M>,
    pub data: Arc<ShaderData>,
}

impl<M> Clone for CachedShader<M> {
    fn clone(&self) -> Self {
        Self {
            module: Arc::clone(&self.module),
            data: Arc::clone(&self.data),
        }
    }
}

/// Hash → compiled shader map
pub struct ShaderCache<M> {
    shaders: HashMap<u64, CachedShader<M>>,
    fetch: HashMap<(u64, u64), Arc<Vec<FetchShaderVertexBinding>>>,
    dump_dir: Option<PathBuf>,
    stats: CacheStats,
}

impl<M> ShaderCache<M> {
    /// Create an empty cache, optionally dumping WGSL into `dump_dir`
    pub fn new(dump_dir: Option<PathBuf>) -> Self {
        Self {
            shaders: HashMap::new(),
            fetch: HashMap::new(),
            dump_dir,
            stats: CacheStats::default(),
        }
    }

    /// Identity of a shader binary
    ///
    /// Binaries built without a header hash fall back to hashing the code.
    pub fn shader_key(binary: &ShaderBinary) -> u64 {
        if binary.header.hash != 0 {
            binary.header.hash
        } else {
            xxh3_64(bytemuck::cast_slice(&binary.code))
        }
    }

    /// Look up a shader, translating and compiling it on first use
    ///
    /// Vertex-stage swizzles are captured from `vertex_inputs` at first
    /// translation; later calls with the same hash reuse that result.
    ///
    /// # Errors
    ///
    /// Translation errors are returned after the partial WGSL (if any) has
    /// been written to the dump directory. Errors from `compile` are passed
    /// through and nothing is cached.
    pub fn get_or_compile<F>(
        &mut self,
        binary: &ShaderBinary,
        stage: ShaderStage,
        vertex_inputs: &[VertexInput],
        compile: F,
    ) -> Result<CachedShader<M>>
    where
        F: FnOnce(&ShaderData) -> Result<M>,
    {
        let key = Self::shader_key(binary);
        if let Some(cached) = self.shaders.get(&key) {
            self.stats.hits += 1;
            return Ok(cached.clone());
        }
        self.stats.misses += 1;

        let data = match translate(&binary.code, stage, key, vertex_inputs) {
            Ok(data) => data,
            Err(e) => {
                log::error!(
                    "Failed to translate {:?} shader {:016X} at 0x{:X}: {}",
                    stage,
                    key,
                    binary.address,
                    e
                );
                if let Some(partial) = e.partial() {
                    self.dump(key, stage, "partial.wgsl", partial);
                }
                return Err(e.into());
            }
        };
        self.dump(key, stage, "wgsl", &data.wgsl);
        log::debug!(
            "Translated {:?} shader {:016X}: {} descriptors, {} exports",
            stage,
            key,
            data.descriptors.len(),
            data.exports.len()
        );

        let module = compile(&data)?;
        let cached = CachedShader {
            module: Arc::new(module),
            data: Arc::new(data),
        };
        self.shaders.insert(key, cached.clone());
        self.stats.entries = self.shaders.len();
        Ok(cached)
    }

    /// Cached shader by key
    pub fn get(&self, key: u64) -> Option<CachedShader<M>> {
        self.shaders.get(&key).cloned()
    }

    /// Attribute bindings of the fetch shader at `address`
    pub fn fetch_bindings(
        &mut self,
        memory: &dyn GuestMemory,
        address: u64,
    ) -> Result<Arc<Vec<FetchShaderVertexBinding>>> {
        let code = read_fetch_shader(memory, address)?;
        let key = (address, xxh3_64(bytemuck::cast_slice(&code)));
        if let Some(bindings) = self.fetch.get(&key) {
            return Ok(Arc::clone(bindings));
        }
        let bindings = Arc::new(parse_fetch_shader(&code)?);
        log::debug!(
            "Parsed fetch shader at 0x{:X}: {} attributes",
            address,
            bindings.len()
        );
        self.fetch.insert(key, Arc::clone(&bindings));
        Ok(bindings)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    fn dump(&self, key: u64, stage: ShaderStage, extension: &str, source: &str) {
        let Some(dir) = &self.dump_dir else {
            return;
        };
        let path = dump_path(dir, key, stage, extension);
        let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, source));
        match written {
            Ok(()) => log::debug!("Dumped shader to {}", path.display()),
            Err(e) => log::warn!("Failed to dump shader to {}: {}", path.display(), e),
        }
    }
}

/// File name used for dumped shaders
pub fn dump_path(dir: &Path, key: u64, stage: ShaderStage, extension: &str) -> PathBuf {
    let stage = match stage {
        ShaderStage::Vertex => "vs",
        ShaderStage::Pixel => "ps",
    };
    dir.join(format!("{:016x}.{}.{}", key, stage, extension))
}
