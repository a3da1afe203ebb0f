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

//! Resource descriptors (V#, T#, S#)
//!
//! Descriptors are bit-packed hardware structures living either in user-data
//! SGPRs or in guest memory. Shaders name them by SGPR; the translator records
//! where each one comes from and the pipeline decodes them per draw.
//!
//! ## V# (buffer, 4 dwords)
//!
//! | Dword | Bits   | Field                      |
//! |-------|--------|----------------------------|
//! | 0     | 0-31   | base address low           |
//! | 1     | 0-11   | base address high          |
//! | 1     | 16-29  | stride                     |
//! | 2     | 0-31   | num_records                |
//! | 3     | 0-11   | dst_sel_x/y/z/w (3 bits)   |
//! | 3     | 12-14  | num format                 |
//! | 3     | 15-18  | data format                |
//!
//! ## T# (image, 8 dwords)
//!
//! | Dword | Bits   | Field                      |
//! |-------|--------|----------------------------|
//! | 0     | 0-31   | base address >> 8 (low)    |
//! | 1     | 0-5    | base address >> 8 (high)   |
//! | 1     | 20-25  | data format                |
//! | 1     | 26-29  | num format                 |
//! | 2     | 0-13   | width - 1                  |
//! | 2     | 14-27  | height - 1                 |
//! | 3     | 0-11   | dst_sel                    |
//! | 3     | 12-15  | base level                 |
//! | 3     | 16-19  | last level                 |
//! | 3     | 20-24  | tiling index               |
//! | 3     | 28-31  | resource type              |
//! | 4     | 0-12   | depth - 1                  |
//! | 4     | 13-26  | pitch - 1                  |

use serde::{Deserialize, Serialize};

use crate::core::error::{invalid_enum, Result};
use crate::core::memory::GuestMemory;

/// Destination channel selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DstSel {
    Zero,
    One,
    X,
    Y,
    Z,
    W,
}

impl DstSel {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x7 {
            1 => DstSel::One,
            4 => DstSel::X,
            5 => DstSel::Y,
            6 => DstSel::Z,
            7 => DstSel::W,
            _ => DstSel::Zero,
        }
    }

    fn unpack(word: u32) -> [DstSel; 4] {
        [
            DstSel::from_bits(word),
            DstSel::from_bits(word >> 3),
            DstSel::from_bits(word >> 6),
            DstSel::from_bits(word >> 9),
        ]
    }
}

/// Buffer data formats (`BUF_DATA_FORMAT_*`)
pub mod buf_fmt {
    pub const INVALID: u32 = 0;
    pub const F8: u32 = 1;
    pub const F16: u32 = 2;
    pub const F8_8: u32 = 3;
    pub const F32: u32 = 4;
    pub const F16_16: u32 = 5;
    pub const F8_8_8_8: u32 = 10;
    pub const F32_32: u32 = 11;
    pub const F16_16_16_16: u32 = 12;
    pub const F32_32_32: u32 = 13;
    pub const F32_32_32_32: u32 = 14;
}

/// Buffer/image numeric formats (`*_NUM_FORMAT_*`)
pub mod num_fmt {
    pub const UNORM: u32 = 0;
    pub const SNORM: u32 = 1;
    pub const UINT: u32 = 4;
    pub const SINT: u32 = 5;
    pub const FLOAT: u32 = 7;
    pub const SRGB: u32 = 9;
}

/// Buffer resource descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VSharp {
    pub base: u64,
    pub stride: u32,
    pub num_records: u32,
    pub dst_sel: [DstSel; 4],
    pub num_format: u32,
    pub data_format: u32,
}

impl VSharp {
    pub fn from_dwords(d: [u32; 4]) -> Self {
        Self {
            base: d[0] as u64 | ((d[1] as u64 & 0xFFF) << 32),
            stride: (d[1] >> 16) & 0x3FFF,
            num_records: d[2],
            dst_sel: DstSel::unpack(d[3]),
            num_format: (d[3] >> 12) & 0x7,
            data_format: (d[3] >> 15) & 0xF,
        }
    }

    /// Read a V# from guest memory
    pub fn read(memory: &dyn GuestMemory, addr: u64) -> Result<Self> {
        let d = memory.read_dwords(addr, 4)?;
        Ok(Self::from_dwords([d[0], d[1], d[2], d[3]]))
    }

    /// Byte size of the described buffer
    ///
    /// `num_records` counts elements when a stride is set and bytes otherwise.
    pub fn size(&self) -> u64 {
        if self.stride != 0 {
            self.stride as u64 * self.num_records as u64
        } else {
            self.num_records as u64
        }
    }

    /// Components per element
    pub fn component_count(&self) -> u32 {
        match self.data_format {
            buf_fmt::F8 | buf_fmt::F16 | buf_fmt::F32 => 1,
            buf_fmt::F8_8 | buf_fmt::F16_16 | buf_fmt::F32_32 => 2,
            buf_fmt::F32_32_32 => 3,
            buf_fmt::F8_8_8_8 | buf_fmt::F16_16_16_16 | buf_fmt::F32_32_32_32 => 4,
            _ => 0,
        }
    }

    /// Host vertex attribute format
    ///
    /// # Errors
    ///
    /// [`GpuError::InvalidEnum`](crate::core::error::GpuError::InvalidEnum) for
    /// format pairs with no host equivalent.
    pub fn vertex_format(&self) -> Result<wgpu::VertexFormat> {
        use wgpu::VertexFormat as F;
        let format = match (self.data_format, self.num_format) {
            (buf_fmt::F32, num_fmt::FLOAT) => F::Float32,
            (buf_fmt::F32_32, num_fmt::FLOAT) => F::Float32x2,
            (buf_fmt::F32_32_32, num_fmt::FLOAT) => F::Float32x3,
            (buf_fmt::F32_32_32_32, num_fmt::FLOAT) => F::Float32x4,
            (buf_fmt::F32, num_fmt::UINT) => F::Uint32,
            (buf_fmt::F32_32, num_fmt::UINT) => F::Uint32x2,
            (buf_fmt::F32_32_32, num_fmt::UINT) => F::Uint32x3,
            (buf_fmt::F32_32_32_32, num_fmt::UINT) => F::Uint32x4,
            (buf_fmt::F32, num_fmt::SINT) => F::Sint32,
            (buf_fmt::F32_32_32_32, num_fmt::SINT) => F::Sint32x4,
            (buf_fmt::F8_8_8_8, num_fmt::UNORM) => F::Unorm8x4,
            (buf_fmt::F8_8_8_8, num_fmt::SNORM) => F::Snorm8x4,
            (buf_fmt::F8_8_8_8, num_fmt::UINT) => F::Uint8x4,
            (buf_fmt::F16_16, num_fmt::FLOAT) => F::Float16x2,
            (buf_fmt::F16_16, num_fmt::UNORM) => F::Unorm16x2,
            (buf_fmt::F16_16, num_fmt::SNORM) => F::Snorm16x2,
            (buf_fmt::F16_16_16_16, num_fmt::FLOAT) => F::Float16x4,
            (buf_fmt::F16_16_16_16, num_fmt::UNORM) => F::Unorm16x4,
            (buf_fmt::F16_16_16_16, num_fmt::SNORM) => F::Snorm16x4,
            (dfmt, nfmt) => return Err(invalid_enum("buffer format", dfmt << 4 | nfmt)),
        };
        Ok(format)
    }
}

/// Image data formats (`IMG_DATA_FORMAT_*`)
pub mod img_fmt {
    pub const F8: u32 = 1;
    pub const F32: u32 = 4;
    pub const F8_8_8_8: u32 = 10;
    pub const F16_16_16_16: u32 = 12;
    pub const F32_32_32_32: u32 = 14;
    pub const BC1: u32 = 35;
    pub const BC2: u32 = 36;
    pub const BC3: u32 = 37;
    pub const BC4: u32 = 38;
    pub const BC5: u32 = 39;
    pub const BC6: u32 = 40;
    pub const BC7: u32 = 41;
}

/// Image resource types (`SQ_RSRC_IMG_*`)
pub mod img_type {
    pub const TEX_1D: u32 = 8;
    pub const TEX_2D: u32 = 9;
    pub const TEX_3D: u32 = 10;
    pub const CUBE: u32 = 11;
}

/// Image resource descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TSharp {
    pub base: u64,
    pub data_format: u32,
    pub num_format: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub pitch: u32,
    pub dst_sel: [DstSel; 4],
    pub base_level: u32,
    pub last_level: u32,
    pub tiling_index: u32,
    pub resource_type: u32,
}

impl TSharp {
    pub fn from_dwords(d: [u32; 8]) -> Self {
        Self {
            base: ((d[0] as u64) | ((d[1] as u64 & 0x3F) << 32)) << 8,
            data_format: (d[1] >> 20) & 0x3F,
            num_format: (d[1] >> 26) & 0xF,
            width: (d[2] & 0x3FFF) + 1,
            height: ((d[2] >> 14) & 0x3FFF) + 1,
            dst_sel: DstSel::unpack(d[3]),
            base_level: (d[3] >> 12) & 0xF,
            last_level: (d[3] >> 16) & 0xF,
            tiling_index: (d[3] >> 20) & 0x1F,
            resource_type: (d[3] >> 28) & 0xF,
            depth: (d[4] & 0x1FFF) + 1,
            pitch: ((d[4] >> 13) & 0x3FFF) + 1,
        }
    }

    /// Read a T# from guest memory
    pub fn read(memory: &dyn GuestMemory, addr: u64) -> Result<Self> {
        let d = memory.read_dwords(addr, 8)?;
        let mut words = [0u32; 8];
        words.copy_from_slice(&d);
        Ok(Self::from_dwords(words))
    }

    /// Pack back into dwords (inverse of [`TSharp::from_dwords`])
    pub fn to_dwords(&self) -> [u32; 8] {
        let addr = self.base >> 8;
        let sel = self
            .dst_sel
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, s)| acc | (dst_sel_bits(*s) << (3 * i)));
        [
            addr as u32,
            ((addr >> 32) as u32 & 0x3F) | (self.data_format << 20) | (self.num_format << 26),
            (self.width - 1) | ((self.height - 1) << 14),
            sel | (self.base_level << 12)
                | (self.last_level << 16)
                | (self.tiling_index << 20)
                | (self.resource_type << 28),
            (self.depth - 1) | ((self.pitch - 1) << 13),
            0,
            0,
            0,
        ]
    }

    pub fn is_block_compressed(&self) -> bool {
        (img_fmt::BC1..=img_fmt::BC7).contains(&self.data_format)
    }

    /// Bytes per 4x4 block for compressed formats
    pub fn block_bytes(&self) -> u32 {
        match self.data_format {
            img_fmt::BC1 | img_fmt::BC4 => 8,
            _ => 16,
        }
    }

    /// Bytes per pixel for uncompressed formats
    pub fn bytes_per_pixel(&self) -> u32 {
        match self.data_format {
            img_fmt::F8 => 1,
            img_fmt::F32 | img_fmt::F8_8_8_8 => 4,
            img_fmt::F16_16_16_16 => 8,
            img_fmt::F32_32_32_32 => 16,
            _ => 4,
        }
    }

    /// Host texture format
    pub fn texture_format(&self) -> Result<wgpu::TextureFormat> {
        use wgpu::TextureFormat as T;
        let srgb = self.num_format == num_fmt::SRGB;
        let format = match (self.data_format, self.num_format) {
            (img_fmt::F8_8_8_8, num_fmt::UNORM) => T::Rgba8Unorm,
            (img_fmt::F8_8_8_8, num_fmt::SRGB) => T::Rgba8UnormSrgb,
            (img_fmt::F8_8_8_8, num_fmt::UINT) => T::Rgba8Uint,
            (img_fmt::F8, num_fmt::UNORM) => T::R8Unorm,
            (img_fmt::F32, num_fmt::FLOAT) => T::R32Float,
            (img_fmt::F16_16_16_16, num_fmt::FLOAT) => T::Rgba16Float,
            (img_fmt::F32_32_32_32, num_fmt::FLOAT) => T::Rgba32Float,
            (img_fmt::BC1, _) if srgb => T::Bc1RgbaUnormSrgb,
            (img_fmt::BC1, _) => T::Bc1RgbaUnorm,
            (img_fmt::BC2, _) if srgb => T::Bc2RgbaUnormSrgb,
            (img_fmt::BC2, _) => T::Bc2RgbaUnorm,
            (img_fmt::BC3, _) if srgb => T::Bc3RgbaUnormSrgb,
            (img_fmt::BC3, _) => T::Bc3RgbaUnorm,
            (img_fmt::BC4, _) => T::Bc4RUnorm,
            (img_fmt::BC5, _) => T::Bc5RgUnorm,
            (img_fmt::BC6, _) => T::Bc6hRgbUfloat,
            (img_fmt::BC7, _) if srgb => T::Bc7RgbaUnormSrgb,
            (img_fmt::BC7, _) => T::Bc7RgbaUnorm,
            (dfmt, nfmt) => return Err(invalid_enum("image format", dfmt << 4 | nfmt)),
        };
        Ok(format)
    }
}

fn dst_sel_bits(sel: DstSel) -> u32 {
    match sel {
        DstSel::Zero => 0,
        DstSel::One => 1,
        DstSel::X => 4,
        DstSel::Y => 5,
        DstSel::Z => 6,
        DstSel::W => 7,
    }
}

/// Sampler descriptor (4 dwords)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SSharp {
    pub clamp_x: u32,
    pub clamp_y: u32,
    pub clamp_z: u32,
    pub mag_filter: u32,
    pub min_filter: u32,
    pub mip_filter: u32,
}

impl SSharp {
    pub fn from_dwords(d: [u32; 4]) -> Self {
        Self {
            clamp_x: d[0] & 0x7,
            clamp_y: (d[0] >> 3) & 0x7,
            clamp_z: (d[0] >> 6) & 0x7,
            mag_filter: (d[2] >> 20) & 0x3,
            min_filter: (d[2] >> 22) & 0x3,
            mip_filter: (d[2] >> 26) & 0x3,
        }
    }

    pub fn read(memory: &dyn GuestMemory, addr: u64) -> Result<Self> {
        let d = memory.read_dwords(addr, 4)?;
        Ok(Self::from_dwords([d[0], d[1], d[2], d[3]]))
    }

    fn address_mode(clamp: u32) -> wgpu::AddressMode {
        match clamp {
            0 => wgpu::AddressMode::Repeat,
            1 => wgpu::AddressMode::MirrorRepeat,
            _ => wgpu::AddressMode::ClampToEdge,
        }
    }

    fn filter(filter: u32) -> wgpu::FilterMode {
        if filter == 0 {
            wgpu::FilterMode::Nearest
        } else {
            wgpu::FilterMode::Linear
        }
    }

    /// Host sampler description
    pub fn descriptor(&self) -> wgpu::SamplerDescriptor<'static> {
        wgpu::SamplerDescriptor {
            label: Some("guest sampler"),
            address_mode_u: Self::address_mode(self.clamp_x),
            address_mode_v: Self::address_mode(self.clamp_y),
            address_mode_w: Self::address_mode(self.clamp_z),
            mag_filter: Self::filter(self.mag_filter),
            min_filter: Self::filter(self.min_filter),
            mipmap_filter: Self::filter(self.mip_filter),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GpuError;

    #[test]
    fn test_vsharp_decode() {
        // base 0x1_2345_6780, stride 16, 100 records, xyzw, float 32_32_32_32
        let sel = 4 | (5 << 3) | (6 << 6) | (7 << 9);
        let v = VSharp::from_dwords([0x2345_6780, 0x1 | (16 << 16), 100, sel | (7 << 12) | (14 << 15)]);
        assert_eq!(v.base, 0x1_2345_6780);
        assert_eq!(v.stride, 16);
        assert_eq!(v.size(), 1600);
        assert_eq!(v.dst_sel, [DstSel::X, DstSel::Y, DstSel::Z, DstSel::W]);
        assert_eq!(v.vertex_format().unwrap(), wgpu::VertexFormat::Float32x4);
        assert_eq!(v.component_count(), 4);
    }

    #[test]
    fn test_vsharp_raw_buffer_size() {
        let v = VSharp::from_dwords([0x1000, 0, 256, 0]);
        assert_eq!(v.size(), 256);
        assert!(matches!(v.vertex_format(), Err(GpuError::InvalidEnum { .. })));
    }

    #[test]
    fn test_tsharp_decode_roundtrip() {
        let t = TSharp {
            base: 0x0000_0012_3456_7800,
            data_format: img_fmt::F8_8_8_8,
            num_format: num_fmt::UNORM,
            width: 1920,
            height: 1080,
            depth: 1,
            pitch: 1920,
            dst_sel: [DstSel::Z, DstSel::Y, DstSel::X, DstSel::One],
            base_level: 0,
            last_level: 0,
            tiling_index: 8,
            resource_type: img_type::TEX_2D,
        };
        assert_eq!(TSharp::from_dwords(t.to_dwords()), t);
        assert_eq!(t.texture_format().unwrap(), wgpu::TextureFormat::Rgba8Unorm);
    }

    #[test]
    fn test_tsharp_block_sizes() {
        let mut t = TSharp::from_dwords([0; 8]);
        t.data_format = img_fmt::BC1;
        assert!(t.is_block_compressed());
        assert_eq!(t.block_bytes(), 8);
        t.data_format = img_fmt::BC7;
        assert_eq!(t.block_bytes(), 16);
        t.data_format = img_fmt::F32_32_32_32;
        assert!(!t.is_block_compressed());
        assert_eq!(t.bytes_per_pixel(), 16);
    }

    #[test]
    fn test_ssharp_modes() {
        let s = SSharp::from_dwords([0 | (1 << 3) | (2 << 6), 0, 1 << 20, 0]);
        let desc = s.descriptor();
        assert_eq!(desc.address_mode_u, wgpu::AddressMode::Repeat);
        assert_eq!(desc.address_mode_v, wgpu::AddressMode::MirrorRepeat);
        assert_eq!(desc.address_mode_w, wgpu::AddressMode::ClampToEdge);
        assert_eq!(desc.mag_filter, wgpu::FilterMode::Linear);
        assert_eq!(desc.min_filter, wgpu::FilterMode::Nearest);
    }
}
