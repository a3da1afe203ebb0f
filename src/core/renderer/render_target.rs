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

//! Render target resolution
//!
//! Color and depth targets are described from the CB/DB registers so they
//! can be created through the texture cache next to sampled images.
//! [`FrameTargets`] decides per frame whether a target starts cleared or
//! keeps its contents, and spots targets that are also sampled.

use std::collections::HashSet;

use crate::core::cache::TextureDesc;
use crate::core::error::{invalid_enum, Result};
use crate::core::gpu::registers::{ColorBufferRegs, MAX_COLOR_TARGETS};
use crate::core::gpu::GpuContext;

/// `CB_COLOR_INFO.FORMAT` values
pub mod color_fmt {
    pub const COLOR_8: u32 = 1;
    pub const COLOR_16: u32 = 2;
    pub const COLOR_8_8: u32 = 3;
    pub const COLOR_32: u32 = 4;
    pub const COLOR_16_16: u32 = 5;
    pub const COLOR_11_11_10: u32 = 7;
    pub const COLOR_2_10_10_10: u32 = 9;
    pub const COLOR_8_8_8_8: u32 = 10;
    pub const COLOR_32_32: u32 = 11;
    pub const COLOR_16_16_16_16: u32 = 12;
    pub const COLOR_32_32_32_32: u32 = 14;
}

/// `CB_COLOR_INFO.NUMBER_TYPE` values
pub mod number_type {
    pub const UNORM: u32 = 0;
    pub const SNORM: u32 = 1;
    pub const UINT: u32 = 4;
    pub const SINT: u32 = 5;
    pub const SRGB: u32 = 6;
    pub const FLOAT: u32 = 7;
}

/// Host format of a color target
///
/// `swap` is `CB_COLOR_INFO.COMP_SWAP`; the alternate swap of an 8888
/// target is BGRA.
pub fn color_format(format: u32, number: u32, swap: u32) -> Result<wgpu::TextureFormat> {
    use color_fmt::*;
    use number_type::*;
    use wgpu::TextureFormat as T;
    let mapped = match (format, number) {
        (COLOR_8_8_8_8, UNORM) if swap == 1 => T::Bgra8Unorm,
        (COLOR_8_8_8_8, SRGB) if swap == 1 => T::Bgra8UnormSrgb,
        (COLOR_8_8_8_8, UNORM) => T::Rgba8Unorm,
        (COLOR_8_8_8_8, SRGB) => T::Rgba8UnormSrgb,
        (COLOR_8_8_8_8, UINT) => T::Rgba8Uint,
        (COLOR_8_8_8_8, SINT) => T::Rgba8Sint,
        (COLOR_8, UNORM) => T::R8Unorm,
        (COLOR_8, UINT) => T::R8Uint,
        (COLOR_8_8, UNORM) => T::Rg8Unorm,
        (COLOR_16, FLOAT) => T::R16Float,
        (COLOR_16_16, FLOAT) => T::Rg16Float,
        (COLOR_32, FLOAT) => T::R32Float,
        (COLOR_32, UINT) => T::R32Uint,
        (COLOR_32_32, FLOAT) => T::Rg32Float,
        (COLOR_11_11_10, FLOAT) => T::Rg11b10Ufloat,
        (COLOR_2_10_10_10, UNORM) => T::Rgb10a2Unorm,
        (COLOR_16_16_16_16, FLOAT) => T::Rgba16Float,
        (COLOR_16_16_16_16, UINT) => T::Rgba16Uint,
        (COLOR_32_32_32_32, FLOAT) => T::Rgba32Float,
        (format, number) => return Err(invalid_enum("color target format", format << 4 | number)),
    };
    Ok(mapped)
}

/// Host format of the depth target
///
/// Any stencil plane forces a combined 24-bit depth format, which every
/// backend supports.
pub fn depth_format(z_format: u32, stencil: bool) -> Result<wgpu::TextureFormat> {
    match (z_format, stencil) {
        (_, true) => Ok(wgpu::TextureFormat::Depth24PlusStencil8),
        (1, false) => Ok(wgpu::TextureFormat::Depth16Unorm),
        (3, false) => Ok(wgpu::TextureFormat::Depth32Float),
        (other, _) => Err(invalid_enum("depth format", other)),
    }
}

/// Color target bound to slot `index`
#[derive(Debug, Clone, PartialEq)]
pub struct ColorTargetDesc {
    pub index: usize,
    pub address: u64,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub tile_mode: u32,
}

impl ColorTargetDesc {
    /// Describe slot `n`, or `None` when it is unbound
    pub fn from_registers(ctx: &GpuContext, n: usize) -> Result<Option<Self>> {
        let regs: ColorBufferRegs = ctx.regs.color_buffer(n);
        if !regs.is_enabled() {
            return Ok(None);
        }
        let (width, height) = ctx.color_target_dimensions(n);
        let swap = (regs.info >> 11) & 0x3;
        Ok(Some(Self {
            index: n,
            address: regs.base,
            width,
            height,
            format: color_format(regs.format(), regs.number_type(), swap)?,
            tile_mode: regs.tile_mode_index(),
        }))
    }

    pub fn texture_desc(&self) -> TextureDesc {
        TextureDesc {
            address: self.address,
            width: self.width,
            height: self.height,
            layers: 1,
            mip_levels: 1,
            format: self.format,
            render_target: true,
        }
    }
}

/// Depth (and stencil) target
#[derive(Debug, Clone, PartialEq)]
pub struct DepthTargetDesc {
    pub address: u64,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    /// `DB_DEPTH_CLEAR`
    pub clear_depth: f32,
}

impl DepthTargetDesc {
    pub fn from_registers(ctx: &GpuContext) -> Result<Option<Self>> {
        let regs = ctx.regs.depth_buffer();
        if !regs.is_enabled() {
            return Ok(None);
        }
        let (width, height) = regs.dimensions();
        Ok(Some(Self {
            address: regs.z_write_base,
            width,
            height,
            format: depth_format(regs.z_format(), regs.stencil_format() != 0)?,
            clear_depth: regs.depth_clear.clamp(0.0, 1.0),
        }))
    }

    pub fn texture_desc(&self) -> TextureDesc {
        TextureDesc {
            address: self.address,
            width: self.width,
            height: self.height,
            layers: 1,
            mip_levels: 1,
            format: self.format,
            render_target: true,
        }
    }
}

/// Every bound color target, in slot order
pub fn color_targets(ctx: &GpuContext) -> Result<Vec<ColorTargetDesc>> {
    let mut targets = Vec::new();
    for n in 0..MAX_COLOR_TARGETS {
        if let Some(target) = ColorTargetDesc::from_registers(ctx, n)? {
            targets.push(target);
        }
    }
    Ok(targets)
}

/// How a target's previous contents are treated at the start of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    Clear,
    Load,
}

/// Per-frame render target bookkeeping
#[derive(Debug, Default)]
pub struct FrameTargets {
    targeted: HashSet<u64>,
    sampled: HashSet<u64>,
    feedback: HashSet<u64>,
}

impl FrameTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_frame(&mut self) {
        self.targeted.clear();
        self.sampled.clear();
        self.feedback.clear();
    }

    /// Record a render into `address`
    ///
    /// The first use in a frame clears, later uses load.
    pub fn use_target(&mut self, address: u64) -> LoadAction {
        if self.sampled.contains(&address) {
            self.feedback.insert(address);
        }
        if self.targeted.insert(address) {
            LoadAction::Clear
        } else {
            LoadAction::Load
        }
    }

    /// Record a texture read from `address`; returns whether it is a feedback loop
    pub fn note_sampled(&mut self, address: u64) -> bool {
        self.sampled.insert(address);
        if self.targeted.contains(&address) {
            if self.feedback.insert(address) {
                log::debug!("Render target 0x{:X} is sampled in the frame it is drawn", address);
            }
            return true;
        }
        false
    }

    pub fn was_targeted(&self, address: u64) -> bool {
        self.targeted.contains(&address)
    }

    pub fn is_feedback(&self, address: u64) -> bool {
        self.feedback.contains(&address)
    }
}
