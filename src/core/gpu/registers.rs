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

//! Hardware register file
//!
//! The graphics front-end exposes one flat space of 0xD000 32-bit registers.
//! `SET_*_REG` packets address it relative to a per-class base:
//!
//! | Class    | Base   | Packet             |
//! |----------|--------|--------------------|
//! | Config   | 0x2000 | `SET_CONFIG_REG`   |
//! | SH       | 0x2C00 | `SET_SH_REG`       |
//! | Context  | 0xA000 | `SET_CONTEXT_REG`  |
//! | UConfig  | 0xC000 | `SET_UCONFIG_REG`  |
//!
//! The register file has a single writer (the GPU thread), so it is plain
//! owned data with no interior locking.

use crate::core::error::{GpuError, Result};

/// Number of 32-bit registers
pub const REGISTER_COUNT: usize = 0xD000;

pub const CONFIG_REG_BASE: u32 = 0x2000;
pub const SH_REG_BASE: u32 = 0x2C00;
pub const CONTEXT_REG_BASE: u32 = 0xA000;
pub const UCONFIG_REG_BASE: u32 = 0xC000;

// Shader program registers (SH)
pub const SPI_SHADER_PGM_LO_PS: u32 = 0x2C08;
pub const SPI_SHADER_PGM_HI_PS: u32 = 0x2C09;
pub const SPI_SHADER_USER_DATA_PS_0: u32 = 0x2C0C;
pub const SPI_SHADER_PGM_LO_VS: u32 = 0x2C48;
pub const SPI_SHADER_PGM_HI_VS: u32 = 0x2C49;
pub const SPI_SHADER_USER_DATA_VS_0: u32 = 0x2C4C;

/// User-data SGPRs per stage
pub const USER_DATA_COUNT: usize = 16;

// Depth buffer (context)
pub const DB_DEPTH_CLEAR: u32 = 0xA00B;
pub const DB_Z_INFO: u32 = 0xA010;
pub const DB_STENCIL_INFO: u32 = 0xA011;
pub const DB_Z_READ_BASE: u32 = 0xA012;
pub const DB_Z_WRITE_BASE: u32 = 0xA014;
pub const DB_DEPTH_SIZE: u32 = 0xA016;
pub const DB_DEPTH_SLICE: u32 = 0xA017;
pub const DB_STENCIL_CONTROL: u32 = 0xA10B;
pub const DB_STENCILREFMASK: u32 = 0xA10C;
pub const DB_STENCILREFMASK_BF: u32 = 0xA10D;
pub const DB_DEPTH_CONTROL: u32 = 0xA200;

// Color target output (context)
pub const CB_TARGET_MASK: u32 = 0xA08E;
/// Blend constant color, `CB_BLEND_RED..CB_BLEND_ALPHA`
pub const CB_BLEND_RED: u32 = 0xA105;
pub const CB_BLEND0_CONTROL: u32 = 0xA1E0;
pub const CB_COLOR_CONTROL: u32 = 0xA202;

pub const CB_COLOR0_BASE: u32 = 0xA318;
pub const CB_COLOR0_PITCH: u32 = 0xA319;
pub const CB_COLOR0_SLICE: u32 = 0xA31A;
pub const CB_COLOR0_VIEW: u32 = 0xA31B;
pub const CB_COLOR0_INFO: u32 = 0xA31C;
pub const CB_COLOR0_ATTRIB: u32 = 0xA31D;

/// Register stride between consecutive CB_COLORn blocks
pub const CB_COLOR_STRIDE: u32 = 0xF;

/// Number of color render targets
pub const MAX_COLOR_TARGETS: usize = 8;

// Rasterizer and interpolation (context)
pub const PA_CL_VPORT_XSCALE: u32 = 0xA10F;
pub const PA_CL_VPORT_XOFFSET: u32 = 0xA110;
pub const PA_CL_VPORT_YSCALE: u32 = 0xA111;
pub const PA_CL_VPORT_YOFFSET: u32 = 0xA112;
pub const PA_CL_VPORT_ZSCALE: u32 = 0xA113;
pub const PA_CL_VPORT_ZOFFSET: u32 = 0xA114;
pub const SPI_PS_INPUT_CNTL_0: u32 = 0xA191;
pub const PA_CL_CLIP_CNTL: u32 = 0xA204;
pub const PA_SU_SC_MODE_CNTL: u32 = 0xA205;

// Primitive setup (uconfig)
pub const VGT_PRIMITIVE_TYPE: u32 = 0xC242;

/// Shader stage whose registers are being addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl ShaderStage {
    fn program_lo(self) -> u32 {
        match self {
            ShaderStage::Vertex => SPI_SHADER_PGM_LO_VS,
            ShaderStage::Pixel => SPI_SHADER_PGM_LO_PS,
        }
    }

    fn user_data_base(self) -> u32 {
        match self {
            ShaderStage::Vertex => SPI_SHADER_USER_DATA_VS_0,
            ShaderStage::Pixel => SPI_SHADER_USER_DATA_PS_0,
        }
    }
}

/// Flat register file
pub struct RegisterFile {
    regs: Box<[u32]>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            regs: vec![0u32; REGISTER_COUNT].into_boxed_slice(),
        }
    }

    /// Read a register; indices past the end read as zero
    #[inline(always)]
    pub fn read(&self, index: u32) -> u32 {
        self.regs.get(index as usize).copied().unwrap_or(0)
    }

    /// Read a register as an IEEE-754 float
    #[inline]
    pub fn read_f32(&self, index: u32) -> f32 {
        f32::from_bits(self.read(index))
    }

    /// Write one register
    pub fn write(&mut self, index: u32, value: u32) -> Result<()> {
        self.write_range(index, &[value])
    }

    /// Copy `values` into `[index, index + values.len())`
    ///
    /// # Errors
    ///
    /// [`GpuError::RegisterOutOfRange`] if the range leaves the register file;
    /// nothing is written in that case.
    pub fn write_range(&mut self, index: u32, values: &[u32]) -> Result<()> {
        let start = index as usize;
        let end = start.checked_add(values.len());
        match end {
            Some(end) if end <= REGISTER_COUNT => {
                self.regs[start..end].copy_from_slice(values);
                Ok(())
            }
            _ => Err(GpuError::RegisterOutOfRange {
                index,
                count: values.len() as u32,
            }),
        }
    }

    /// Borrow `[index, index + count)`
    pub fn slice(&self, index: u32, count: usize) -> &[u32] {
        let start = (index as usize).min(REGISTER_COUNT);
        let end = start.saturating_add(count).min(REGISTER_COUNT);
        &self.regs[start..end]
    }

    /// Shader program address for `stage` (`PGM_HI:PGM_LO` in 256-byte units)
    pub fn shader_address(&self, stage: ShaderStage) -> u64 {
        let lo = self.read(stage.program_lo()) as u64;
        let hi = self.read(stage.program_lo() + 1) as u64;
        ((hi << 32) | lo) << 8
    }

    /// The 16 user-data SGPR values preloaded for `stage`
    pub fn user_data(&self, stage: ShaderStage) -> [u32; USER_DATA_COUNT] {
        let mut out = [0u32; USER_DATA_COUNT];
        out.copy_from_slice(self.slice(stage.user_data_base(), USER_DATA_COUNT));
        out
    }

    /// Registers of color target `n`
    pub fn color_buffer(&self, n: usize) -> ColorBufferRegs {
        let base = CB_COLOR0_BASE + CB_COLOR_STRIDE * n as u32;
        ColorBufferRegs {
            base: (self.read(base) as u64) << 8,
            pitch: self.read(base + 1),
            slice: self.read(base + 2),
            view: self.read(base + 3),
            info: self.read(base + 4),
            attrib: self.read(base + 5),
        }
    }

    /// Depth buffer registers
    pub fn depth_buffer(&self) -> DepthBufferRegs {
        DepthBufferRegs {
            z_info: self.read(DB_Z_INFO),
            stencil_info: self.read(DB_STENCIL_INFO),
            z_read_base: (self.read(DB_Z_READ_BASE) as u64) << 8,
            z_write_base: (self.read(DB_Z_WRITE_BASE) as u64) << 8,
            depth_size: self.read(DB_DEPTH_SIZE),
            depth_slice: self.read(DB_DEPTH_SLICE),
            depth_clear: self.read_f32(DB_DEPTH_CLEAR),
        }
    }

    /// Guest primitive type (`VGT_PRIMITIVE_TYPE`)
    pub fn primitive_type(&self) -> u32 {
        self.read(VGT_PRIMITIVE_TYPE) & 0x3F
    }

    /// Non-zero registers in index order
    pub fn non_zero(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.regs
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(|(i, v)| (i as u32, *v))
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Which `SET_*_REG` packet class a register index belongs to
pub fn register_class(index: u32) -> &'static str {
    match index {
        i if (CONFIG_REG_BASE..SH_REG_BASE).contains(&i) => "config",
        i if (SH_REG_BASE..0x3000).contains(&i) => "sh",
        i if (CONTEXT_REG_BASE..UCONFIG_REG_BASE).contains(&i) => "context",
        i if (UCONFIG_REG_BASE..REGISTER_COUNT as u32).contains(&i) => "uconfig",
        _ => "unknown",
    }
}

/// Snapshot of one CB_COLORn register block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorBufferRegs {
    /// Target address in bytes
    pub base: u64,
    pub pitch: u32,
    pub slice: u32,
    pub view: u32,
    pub info: u32,
    pub attrib: u32,
}

impl ColorBufferRegs {
    /// Target is bound
    pub fn is_enabled(&self) -> bool {
        self.base != 0 && self.format() != 0
    }

    /// `CB_COLOR_INFO.FORMAT`
    pub fn format(&self) -> u32 {
        (self.info >> 2) & 0x1F
    }

    /// `CB_COLOR_INFO.NUMBER_TYPE`
    pub fn number_type(&self) -> u32 {
        (self.info >> 8) & 0x7
    }

    /// `CB_COLOR_ATTRIB.TILE_MODE_INDEX`
    pub fn tile_mode_index(&self) -> u32 {
        self.attrib & 0x1F
    }

    /// Pitch in pixels (8-pixel tile granularity)
    pub fn pitch_pixels(&self) -> u32 {
        ((self.pitch & 0x7FF) + 1) * 8
    }

    /// Dimensions implied by the pitch and slice registers
    ///
    /// Height is rounded up to the hardware tile granularity; the driver's
    /// size hint gives the true value.
    pub fn dimensions(&self) -> (u32, u32) {
        let width = self.pitch_pixels();
        let slice_pixels = ((self.slice & 0x3F_FFFF) as u64 + 1) * 64;
        let height = (slice_pixels / width as u64) as u32;
        (width, height)
    }
}

/// Snapshot of the DB register block
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DepthBufferRegs {
    pub z_info: u32,
    pub stencil_info: u32,
    pub z_read_base: u64,
    pub z_write_base: u64,
    pub depth_size: u32,
    pub depth_slice: u32,
    pub depth_clear: f32,
}

impl DepthBufferRegs {
    /// `DB_Z_INFO.FORMAT` (0 invalid, 1 Z16, 3 Z32_FLOAT)
    pub fn z_format(&self) -> u32 {
        self.z_info & 0x3
    }

    /// `DB_STENCIL_INFO.FORMAT` (0 invalid, 1 S8)
    pub fn stencil_format(&self) -> u32 {
        self.stencil_info & 0x1
    }

    pub fn is_enabled(&self) -> bool {
        self.z_format() != 0 && self.z_write_base != 0
    }

    /// Dimensions from `DB_DEPTH_SIZE` tile counts
    pub fn dimensions(&self) -> (u32, u32) {
        let width = ((self.depth_size & 0x7FF) + 1) * 8;
        let height = (((self.depth_size >> 11) & 0x7FF) + 1) * 8;
        (width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_range_bounds() {
        let mut regs = RegisterFile::new();
        assert!(regs.write_range(0xCFFE, &[1, 2]).is_ok());
        assert!(matches!(
            regs.write_range(0xCFFF, &[1, 2]),
            Err(GpuError::RegisterOutOfRange { index: 0xCFFF, count: 2 })
        ));
        assert_eq!(regs.read(0xCFFF), 2);
        assert_eq!(regs.read(0xD000), 0);
    }

    #[test]
    fn test_shader_address() {
        let mut regs = RegisterFile::new();
        regs.write(SPI_SHADER_PGM_LO_VS, 0x0012_3456).unwrap();
        regs.write(SPI_SHADER_PGM_HI_VS, 0x01).unwrap();
        assert_eq!(regs.shader_address(ShaderStage::Vertex), 0x0100_1234_5600);
        assert_eq!(regs.shader_address(ShaderStage::Pixel), 0);
    }

    #[test]
    fn test_user_data() {
        let mut regs = RegisterFile::new();
        regs.write_range(SPI_SHADER_USER_DATA_PS_0, &[7, 8, 9]).unwrap();
        let data = regs.user_data(ShaderStage::Pixel);
        assert_eq!(&data[..4], &[7, 8, 9, 0]);
    }

    #[test]
    fn test_color_buffer_dimensions_round_to_tiles() {
        let mut regs = RegisterFile::new();
        let base = CB_COLOR0_BASE + CB_COLOR_STRIDE;
        regs.write(base, 0x1000).unwrap();
        regs.write(base + 1, 1920 / 8 - 1).unwrap();
        regs.write(base + 2, 1920 * 1152 / 64 - 1).unwrap();

        let cb = regs.color_buffer(1);
        assert_eq!(cb.base, 0x10_0000);
        assert_eq!(cb.dimensions(), (1920, 1152));
    }

    #[test]
    fn test_register_class() {
        assert_eq!(register_class(0x2010), "config");
        assert_eq!(register_class(SPI_SHADER_PGM_LO_PS), "sh");
        assert_eq!(register_class(CB_COLOR0_BASE), "context");
        assert_eq!(register_class(VGT_PRIMITIVE_TYPE), "uconfig");
    }
}
