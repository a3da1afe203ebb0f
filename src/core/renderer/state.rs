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

//! Fixed-function state mapping
//!
//! Pure functions from register values to wgpu state. A pipeline captures
//! the [`FixedFunctionState`] of the draw that built it.

use crate::core::error::{invalid_enum, GpuError, Result};
use crate::core::gpu::registers::{
    RegisterFile, CB_BLEND0_CONTROL, CB_BLEND_RED, CB_TARGET_MASK, DB_DEPTH_CONTROL,
    DB_STENCILREFMASK, DB_STENCILREFMASK_BF, DB_STENCIL_CONTROL, MAX_COLOR_TARGETS,
    PA_CL_CLIP_CNTL, PA_CL_VPORT_XOFFSET, PA_CL_VPORT_XSCALE, PA_CL_VPORT_YOFFSET,
    PA_CL_VPORT_YSCALE, PA_CL_VPORT_ZOFFSET, PA_CL_VPORT_ZSCALE, PA_SU_SC_MODE_CNTL,
};
use crate::core::renderer::tessellation::PatchKind;

/// Guest primitive types (`VGT_PRIMITIVE_TYPE`)
pub mod prim_type {
    pub const POINT_LIST: u32 = 0x01;
    pub const LINE_LIST: u32 = 0x02;
    pub const LINE_STRIP: u32 = 0x03;
    pub const TRI_LIST: u32 = 0x04;
    pub const TRI_FAN: u32 = 0x05;
    pub const TRI_STRIP: u32 = 0x06;
    pub const RECT_LIST: u32 = 0x11;
    pub const LINE_LOOP: u32 = 0x12;
    pub const QUAD_LIST: u32 = 0x13;
}

/// `PA_CL_CLIP_CNTL.DX_CLIP_SPACE_DEF`: clip-space z is [0, 1]
const DX_CLIP_SPACE_DEF: u32 = 1 << 19;

/// Host topology for a guest primitive type
///
/// Rect and quad lists draw as triangle lists through patch expansion.
pub fn topology(prim: u32) -> Result<(wgpu::PrimitiveTopology, Option<PatchKind>)> {
    use wgpu::PrimitiveTopology as T;
    let mapped = match prim {
        prim_type::POINT_LIST => (T::PointList, None),
        prim_type::LINE_LIST => (T::LineList, None),
        prim_type::LINE_STRIP => (T::LineStrip, None),
        prim_type::TRI_LIST => (T::TriangleList, None),
        prim_type::TRI_STRIP => (T::TriangleStrip, None),
        prim_type::RECT_LIST => (T::TriangleList, Some(PatchKind::Rect)),
        prim_type::QUAD_LIST => (T::TriangleList, Some(PatchKind::Quad)),
        prim_type::TRI_FAN | prim_type::LINE_LOOP => {
            return Err(GpuError::Unimplemented(format!("primitive type 0x{:X}", prim)))
        }
        other => return Err(invalid_enum("primitive type", other)),
    };
    Ok(mapped)
}

/// `ZFUNC` / `STENCILFUNC` encoding
pub fn compare_function(func: u32) -> wgpu::CompareFunction {
    use wgpu::CompareFunction as C;
    match func & 0x7 {
        0 => C::Never,
        1 => C::Less,
        2 => C::Equal,
        3 => C::LessEqual,
        4 => C::Greater,
        5 => C::NotEqual,
        6 => C::GreaterEqual,
        _ => C::Always,
    }
}

/// `STENCILFAIL` / `STENCILZPASS` / `STENCILZFAIL` encoding
pub fn stencil_operation(op: u32) -> Result<wgpu::StencilOperation> {
    use wgpu::StencilOperation as S;
    let mapped = match op {
        0 => S::Keep,
        1 => S::Zero,
        // REPLACE_TEST and REPLACE_OP both write the reference value
        3 | 4 => S::Replace,
        5 => S::IncrementClamp,
        6 => S::DecrementClamp,
        7 => S::Invert,
        8 => S::IncrementWrap,
        9 => S::DecrementWrap,
        other => return Err(invalid_enum("stencil op", other)),
    };
    Ok(mapped)
}

/// `BLEND_*` factor encoding
pub fn blend_factor(factor: u32) -> Result<wgpu::BlendFactor> {
    use wgpu::BlendFactor as B;
    let mapped = match factor {
        0 => B::Zero,
        1 => B::One,
        2 => B::Src,
        3 => B::OneMinusSrc,
        4 => B::SrcAlpha,
        5 => B::OneMinusSrcAlpha,
        6 => B::DstAlpha,
        7 => B::OneMinusDstAlpha,
        8 => B::Dst,
        9 => B::OneMinusDst,
        10 => B::SrcAlphaSaturated,
        13 => B::Constant,
        14 => B::OneMinusConstant,
        other => return Err(invalid_enum("blend factor", other)),
    };
    Ok(mapped)
}

/// `COMB_FCN` encoding
pub fn blend_operation(op: u32) -> Result<wgpu::BlendOperation> {
    use wgpu::BlendOperation as O;
    let mapped = match op {
        0 => O::Add,
        1 => O::Subtract,
        2 => O::Min,
        3 => O::Max,
        4 => O::ReverseSubtract,
        other => return Err(invalid_enum("blend op", other)),
    };
    Ok(mapped)
}

fn blend_component(src: u32, op: u32, dst: u32) -> Result<wgpu::BlendComponent> {
    let operation = blend_operation(op)?;
    // Min and max ignore the factors and wgpu requires them to be one
    let (src_factor, dst_factor) = match operation {
        wgpu::BlendOperation::Min | wgpu::BlendOperation::Max => {
            (wgpu::BlendFactor::One, wgpu::BlendFactor::One)
        }
        _ => (blend_factor(src)?, blend_factor(dst)?),
    };
    Ok(wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation,
    })
}

/// Blend state from one `CB_BLENDn_CONTROL`; `None` when disabled
pub fn blend_state(control: u32) -> Result<Option<wgpu::BlendState>> {
    if control & (1 << 30) == 0 {
        return Ok(None);
    }
    let color = blend_component(control & 0x1F, (control >> 5) & 0x7, (control >> 8) & 0x1F)?;
    let alpha = if control & (1 << 29) != 0 {
        blend_component(
            (control >> 16) & 0x1F,
            (control >> 21) & 0x7,
            (control >> 24) & 0x1F,
        )?
    } else {
        color
    };
    Ok(Some(wgpu::BlendState { color, alpha }))
}

/// Channel write mask of target `n` from `CB_TARGET_MASK`
pub fn write_mask(target_mask: u32, n: usize) -> wgpu::ColorWrites {
    wgpu::ColorWrites::from_bits_truncate((target_mask >> (4 * n)) & 0xF)
}

/// Depth range covered by the viewport transform
///
/// With D3D clip space z spans [0, 1] before the transform, otherwise
/// [-1, 1]. The result is clamped to what wgpu accepts.
pub fn depth_range(zscale: f32, zoffset: f32, dx_clip_space: bool) -> (f32, f32) {
    let (a, b) = if dx_clip_space {
        (zoffset, zoffset + zscale)
    } else {
        (zoffset - zscale, zoffset + zscale)
    };
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    (min.clamp(0.0, 1.0), max.clamp(0.0, 1.0))
}

/// Host viewport in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: wgpu::CompareFunction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StencilConfig {
    pub front: wgpu::StencilFaceState,
    pub back: wgpu::StencilFaceState,
    pub read_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

/// Fixed-function state of one draw
#[derive(Debug, Clone, PartialEq)]
pub struct FixedFunctionState {
    pub topology: wgpu::PrimitiveTopology,
    pub patch: Option<PatchKind>,
    pub front_face: wgpu::FrontFace,
    pub cull_mode: Option<wgpu::Face>,
    /// Both faces culled; the draw produces nothing
    pub cull_all: bool,
    pub depth: DepthState,
    pub stencil: Option<StencilConfig>,
    pub blend: [Option<wgpu::BlendState>; MAX_COLOR_TARGETS],
    pub write_mask: [wgpu::ColorWrites; MAX_COLOR_TARGETS],
    pub blend_constant: wgpu::Color,
    /// `None` when the viewport registers are unset
    pub viewport: Option<Viewport>,
}

impl FixedFunctionState {
    /// Read the state from the register snapshot of a draw
    ///
    /// # Errors
    ///
    /// Primitive types, blend and stencil encodings with no host equivalent.
    pub fn from_registers(regs: &RegisterFile) -> Result<Self> {
        let (topology, patch) = topology(regs.primitive_type())?;

        let mode = regs.read(PA_SU_SC_MODE_CNTL);
        let front_face = if mode & 0x4 != 0 {
            wgpu::FrontFace::Cw
        } else {
            wgpu::FrontFace::Ccw
        };
        let cull_mode = match mode & 0x3 {
            1 => Some(wgpu::Face::Front),
            2 => Some(wgpu::Face::Back),
            _ => None,
        };

        let depth_control = regs.read(DB_DEPTH_CONTROL);
        let depth = DepthState {
            test: depth_control & 0x2 != 0,
            write: depth_control & 0x4 != 0,
            compare: compare_function(depth_control >> 4),
        };
        let stencil = if depth_control & 0x1 != 0 {
            Some(stencil_config(regs, depth_control)?)
        } else {
            None
        };

        let mut blend = [None; MAX_COLOR_TARGETS];
        for (n, slot) in blend.iter_mut().enumerate() {
            *slot = blend_state(regs.read(CB_BLEND0_CONTROL + n as u32))?;
        }
        let target_mask = regs.read(CB_TARGET_MASK);
        let write_mask = std::array::from_fn(|n| write_mask(target_mask, n));

        let blend_constant = wgpu::Color {
            r: regs.read_f32(CB_BLEND_RED) as f64,
            g: regs.read_f32(CB_BLEND_RED + 1) as f64,
            b: regs.read_f32(CB_BLEND_RED + 2) as f64,
            a: regs.read_f32(CB_BLEND_RED + 3) as f64,
        };

        Ok(Self {
            topology,
            patch,
            front_face,
            cull_mode,
            cull_all: mode & 0x3 == 0x3,
            depth,
            stencil,
            blend,
            write_mask,
            blend_constant,
            viewport: viewport(regs),
        })
    }

    pub fn primitive_state(&self) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: self.topology,
            strip_index_format: None,
            front_face: self.front_face,
            cull_mode: self.cull_mode,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        }
    }

    /// Depth-stencil state for an attachment of `format`
    pub fn depth_stencil_state(&self, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
        let stencil = match (&self.stencil, format.has_stencil_aspect()) {
            (Some(s), true) => wgpu::StencilState {
                front: s.front,
                back: s.back,
                read_mask: s.read_mask,
                write_mask: s.write_mask,
            },
            _ => wgpu::StencilState::default(),
        };
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth.test && self.depth.write,
            depth_compare: if self.depth.test {
                self.depth.compare
            } else {
                wgpu::CompareFunction::Always
            },
            stencil,
            bias: wgpu::DepthBiasState::default(),
        }
    }

    /// Color target states for attachments of `formats`
    ///
    /// Blending is dropped for formats that can't blend.
    pub fn color_target_states(
        &self,
        formats: &[Option<wgpu::TextureFormat>],
    ) -> Vec<Option<wgpu::ColorTargetState>> {
        formats
            .iter()
            .enumerate()
            .map(|(n, format)| {
                format.map(|format| {
                    let blendable = format
                        .guaranteed_format_features(wgpu::Features::empty())
                        .flags
                        .contains(wgpu::TextureFormatFeatureFlags::BLENDABLE);
                    wgpu::ColorTargetState {
                        format,
                        blend: if blendable { self.blend.get(n).copied().flatten() } else { None },
                        write_mask: self.write_mask.get(n).copied().unwrap_or(wgpu::ColorWrites::ALL),
                    }
                })
            })
            .collect()
    }

    /// Vertices the host draws for `count` guest vertices
    pub fn host_vertex_count(&self, count: u32) -> u32 {
        match self.patch {
            Some(kind) => kind.host_vertex_count(count),
            None => count,
        }
    }
}

fn stencil_config(regs: &RegisterFile, depth_control: u32) -> Result<StencilConfig> {
    let control = regs.read(DB_STENCIL_CONTROL);
    let front_ref = regs.read(DB_STENCILREFMASK);
    let face = |func: u32, shift: u32| -> Result<wgpu::StencilFaceState> {
        Ok(wgpu::StencilFaceState {
            compare: compare_function(func),
            fail_op: stencil_operation((control >> shift) & 0xF)?,
            pass_op: stencil_operation((control >> (shift + 4)) & 0xF)?,
            depth_fail_op: stencil_operation((control >> (shift + 8)) & 0xF)?,
        })
    };

    let front = face(depth_control >> 8, 0)?;
    let back = if depth_control & (1 << 7) != 0 {
        face(depth_control >> 20, 12)?
    } else {
        front
    };
    if back != front && regs.read(DB_STENCILREFMASK_BF) & 0xFF != front_ref & 0xFF {
        log::warn!("Separate back-face stencil reference is not supported, using the front value");
    }

    Ok(StencilConfig {
        front,
        back,
        read_mask: (front_ref >> 8) & 0xFF,
        write_mask: (front_ref >> 16) & 0xFF,
        reference: front_ref & 0xFF,
    })
}

fn viewport(regs: &RegisterFile) -> Option<Viewport> {
    let xscale = regs.read_f32(PA_CL_VPORT_XSCALE);
    let yscale = regs.read_f32(PA_CL_VPORT_YSCALE);
    if xscale == 0.0 || yscale == 0.0 {
        return None;
    }
    let xoffset = regs.read_f32(PA_CL_VPORT_XOFFSET);
    let yoffset = regs.read_f32(PA_CL_VPORT_YOFFSET);
    let dx_clip_space = regs.read(PA_CL_CLIP_CNTL) & DX_CLIP_SPACE_DEF != 0;
    let (min_depth, max_depth) = depth_range(
        regs.read_f32(PA_CL_VPORT_ZSCALE),
        regs.read_f32(PA_CL_VPORT_ZOFFSET),
        dx_clip_space,
    );
    Some(Viewport {
        x: xoffset - xscale.abs(),
        y: yoffset - yscale.abs(),
        width: 2.0 * xscale.abs(),
        height: 2.0 * yscale.abs(),
        min_depth,
        max_depth,
    })
}
