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

//! Texture cache
//!
//! Sampled textures are keyed by the content hash of their guest bytes plus
//! the shape that interprets them. A side map from guest address to the key
//! last seen there evicts the previous texture when content at that address
//! changes, so software-rendered surfaces do not accumulate one texture per
//! frame.
//!
//! Render targets are keyed by address alone and live in a separate table.

use std::collections::HashMap;
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use super::CacheStats;
use crate::core::detile::{DetileParams, Detiler};
use crate::core::error::{GpuError, Result};
use crate::core::gpu::descriptors::{img_type, TSharp};
use crate::core::memory::{GuestMemory, MemoryError};

/// Layout a host image is in
///
/// wgpu tracks real layouts itself; this mirrors the guest-visible
/// lifecycle so illegal sequences are caught where they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    TransferDst,
    ShaderReadOnly,
    ColorAttachment,
    DepthAttachment,
    /// Sampled and rendered to within the same pass
    FeedbackLoop,
}

impl ImageLayout {
    /// Whether `self → to` is a legal transition
    pub fn can_transition(self, to: ImageLayout) -> bool {
        use ImageLayout::*;
        if self == to {
            return true;
        }
        match (self, to) {
            (_, Undefined) => false,
            (Undefined, _) => true,
            (TransferDst, ShaderReadOnly) => true,
            (ShaderReadOnly, TransferDst | ColorAttachment | DepthAttachment) => true,
            (ColorAttachment | DepthAttachment, ShaderReadOnly | FeedbackLoop) => true,
            (FeedbackLoop, ShaderReadOnly | ColorAttachment | DepthAttachment) => true,
            _ => false,
        }
    }

    /// Transition to `to`
    ///
    /// # Errors
    ///
    /// [`GpuError::Resource`] for transitions that can't happen.
    pub fn transition(self, to: ImageLayout) -> Result<ImageLayout> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(GpuError::Resource(format!(
                "illegal image layout transition {:?} -> {:?}",
                self, to
            )))
        }
    }
}

/// Host image shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Guest address the image mirrors
    pub address: u64,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mip_levels: u32,
    pub format: wgpu::TextureFormat,
    /// Usable as a color or depth attachment
    pub render_target: bool,
}

impl TextureDesc {
    /// Shape of a sampled texture described by a T#
    ///
    /// # Errors
    ///
    /// Formats with no host equivalent.
    pub fn from_tsharp(tsharp: &TSharp) -> Result<Self> {
        Ok(Self {
            address: tsharp.base,
            width: tsharp.width,
            height: tsharp.height,
            layers: layer_count(tsharp),
            mip_levels: 1,
            format: tsharp.texture_format()?,
            render_target: false,
        })
    }

    pub fn is_depth(&self) -> bool {
        self.format.is_depth_stencil_format()
    }
}

/// Host image allocation backend
pub trait TextureAllocator {
    type Texture: Send + Sync;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Self::Texture>;

    /// Upload tightly packed mip 0 data for every layer
    fn write_texture(&mut self, texture: &Self::Texture, desc: &TextureDesc, data: &[u8]) -> Result<()>;

    /// Record a layout change; backends with implicit layouts ignore it
    fn transition(
        &mut self,
        _texture: &Self::Texture,
        _from: ImageLayout,
        _to: ImageLayout,
    ) -> Result<()> {
        Ok(())
    }
}

/// Cached host image
#[derive(Debug)]
pub struct TextureRef<T> {
    pub texture: Arc<T>,
    pub desc: TextureDesc,
    pub layout: ImageLayout,
}

impl<T> Clone for TextureRef<T> {
    fn clone(&self) -> Self {
        Self {
            texture: Arc::clone(&self.texture),
            desc: self.desc.clone(),
            layout: self.layout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TextureKey {
    hash: u64,
    width: u32,
    height: u32,
    data_format: u32,
    num_format: u32,
}

/// Number of array layers a T# spans
fn layer_count(tsharp: &TSharp) -> u32 {
    match tsharp.resource_type {
        img_type::CUBE => 6,
        img_type::TEX_3D => tsharp.depth,
        _ => 1,
    }
}

/// Detiler parameters for mip 0 of a T#
pub fn detile_params(tsharp: &TSharp) -> DetileParams {
    let block_compressed = tsharp.is_block_compressed();
    DetileParams {
        width: tsharp.width,
        height: tsharp.height,
        pitch: tsharp.pitch,
        tile_mode: tsharp.tiling_index,
        element_bytes: if block_compressed {
            tsharp.block_bytes()
        } else {
            tsharp.bytes_per_pixel()
        },
        block_compressed,
        mip_levels: 1,
        array_layers: layer_count(tsharp),
        fragments: 1,
    }
}

/// Guest bytes backing mip 0 of every layer
///
/// Block-compressed surfaces are sized per 4x4 block, linear ones as
/// pitch × height × bytes per pixel.
pub fn expected_size(tsharp: &TSharp) -> u64 {
    detile_params(tsharp).input_size() as u64 * layer_count(tsharp) as u64
}

/// Guest texture → host image cache
pub struct TextureCache<A: TextureAllocator> {
    allocator: A,
    memory: Arc<dyn GuestMemory>,
    textures: HashMap<TextureKey, TextureRef<A::Texture>>,
    by_address: HashMap<u64, TextureKey>,
    targets: HashMap<u64, TextureRef<A::Texture>>,
    stats: CacheStats,
}

impl<A: TextureAllocator> TextureCache<A> {
    pub fn new(allocator: A, memory: Arc<dyn GuestMemory>) -> Self {
        Self {
            allocator,
            memory,
            textures: HashMap::new(),
            by_address: HashMap::new(),
            targets: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    /// Host image holding the texture a T# describes
    ///
    /// # Arguments
    ///
    /// * `tsharp` - Decoded texture descriptor
    /// * `detiler` - Converts the guest surface to linear rows
    ///
    /// # Returns
    ///
    /// The cached image in [`ImageLayout::ShaderReadOnly`].
    pub fn get_texture(&mut self, tsharp: &TSharp, detiler: &dyn Detiler) -> Result<TextureRef<A::Texture>> {
        if tsharp.base == 0 {
            return Err(MemoryError::NullPointer.into());
        }

        let size = expected_size(tsharp);
        let bytes = self.memory.read_vec(tsharp.base, size as usize)?;
        let key = TextureKey {
            hash: xxh3_64(&bytes),
            width: tsharp.width,
            height: tsharp.height,
            data_format: tsharp.data_format,
            num_format: tsharp.num_format,
        };

        if let Some(entry) = self.textures.get(&key) {
            self.stats.hits += 1;
            return Ok(entry.clone());
        }
        self.stats.misses += 1;

        if let Some(stale) = self.by_address.insert(tsharp.base, key) {
            if stale != key && self.textures.remove(&stale).is_some() {
                log::trace!("Evicted stale texture at 0x{:X}", tsharp.base);
            }
        }

        let desc = TextureDesc::from_tsharp(tsharp)?;
        let params = detile_params(tsharp);
        let layer_size = params.input_size();
        let mut linear = Vec::with_capacity(params.output_size() * desc.layers as usize);
        for layer in bytes.chunks(layer_size.max(1)) {
            linear.extend(detiler.detile(layer, &params)?);
        }

        let texture = self.allocator.create_texture(&desc)?;
        let mut layout = ImageLayout::Undefined;
        self.set_layout(&texture, &mut layout, ImageLayout::TransferDst)?;
        self.allocator.write_texture(&texture, &desc, &linear)?;
        self.set_layout(&texture, &mut layout, ImageLayout::ShaderReadOnly)?;

        log::debug!(
            "Created texture {}x{} {:?} at 0x{:X} ({} bytes)",
            desc.width,
            desc.height,
            desc.format,
            desc.address,
            size
        );

        let entry = TextureRef {
            texture: Arc::new(texture),
            desc,
            layout,
        };
        self.textures.insert(key, entry.clone());
        self.stats.entries = self.textures.len() + self.targets.len();
        Ok(entry)
    }

    /// Render target image at `desc.address`
    ///
    /// Reuses the existing image when its shape still matches and recreates
    /// it otherwise. New images start in the attachment layout for their
    /// format.
    pub fn get_render_target(&mut self, desc: &TextureDesc) -> Result<TextureRef<A::Texture>> {
        if let Some(entry) = self.targets.get(&desc.address) {
            if entry.desc == *desc {
                self.stats.hits += 1;
                return Ok(entry.clone());
            }
            log::debug!("Render target at 0x{:X} changed shape, recreating", desc.address);
        }
        self.stats.misses += 1;

        let texture = self.allocator.create_texture(desc)?;
        let mut layout = ImageLayout::Undefined;
        let attachment = if desc.is_depth() {
            ImageLayout::DepthAttachment
        } else {
            ImageLayout::ColorAttachment
        };
        self.set_layout(&texture, &mut layout, attachment)?;

        let entry = TextureRef {
            texture: Arc::new(texture),
            desc: desc.clone(),
            layout,
        };
        self.targets.insert(desc.address, entry.clone());
        self.stats.entries = self.textures.len() + self.targets.len();
        Ok(entry)
    }

    /// Move a render target into a new layout
    pub fn transition_target(&mut self, address: u64, to: ImageLayout) -> Result<()> {
        let Some(entry) = self.targets.get_mut(&address) else {
            return Err(GpuError::Resource(format!("no render target at 0x{:X}", address)));
        };
        let from = entry.layout;
        entry.layout = from.transition(to)?;
        if from != to {
            self.allocator.transition(&entry.texture, from, to)?;
        }
        Ok(())
    }

    /// Render target previously created at `address`
    pub fn render_target(&self, address: u64) -> Option<&TextureRef<A::Texture>> {
        self.targets.get(&address)
    }

    fn set_layout(&mut self, texture: &A::Texture, layout: &mut ImageLayout, to: ImageLayout) -> Result<()> {
        let from = *layout;
        *layout = from.transition(to)?;
        self.allocator.transition(texture, from, to)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}
