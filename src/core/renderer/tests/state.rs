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

use crate::core::error::GpuError;
use crate::core::gpu::registers::*;
use crate::core::renderer::state::*;
use crate::core::renderer::tessellation::PatchKind;

fn write_f32(regs: &mut RegisterFile, index: u32, value: f32) {
    regs.write(index, value.to_bits()).unwrap();
}

#[test]
fn test_topology_mapping() {
    assert_eq!(
        topology(prim_type::TRI_LIST).unwrap(),
        (wgpu::PrimitiveTopology::TriangleList, None)
    );
    assert_eq!(
        topology(prim_type::TRI_STRIP).unwrap(),
        (wgpu::PrimitiveTopology::TriangleStrip, None)
    );
    assert_eq!(
        topology(prim_type::RECT_LIST).unwrap(),
        (wgpu::PrimitiveTopology::TriangleList, Some(PatchKind::Rect))
    );
    assert_eq!(
        topology(prim_type::QUAD_LIST).unwrap(),
        (wgpu::PrimitiveTopology::TriangleList, Some(PatchKind::Quad))
    );
    assert!(matches!(topology(prim_type::TRI_FAN), Err(GpuError::Unimplemented(_))));
    assert!(matches!(topology(0x3F), Err(GpuError::InvalidEnum { .. })));
}

#[test]
fn test_stencil_replace_variants() {
    assert_eq!(stencil_operation(3).unwrap(), wgpu::StencilOperation::Replace);
    assert_eq!(stencil_operation(4).unwrap(), wgpu::StencilOperation::Replace);
    assert_eq!(stencil_operation(0).unwrap(), wgpu::StencilOperation::Keep);
    assert!(stencil_operation(10).is_err());
}

#[test]
fn test_blend_state_decoding() {
    assert_eq!(blend_state(0x0000_0504).unwrap(), None);

    // SRC_ALPHA, ADD, ONE_MINUS_SRC_ALPHA
    let blend = blend_state(1 << 30 | 5 << 8 | 4).unwrap().unwrap();
    assert_eq!(blend.color.src_factor, wgpu::BlendFactor::SrcAlpha);
    assert_eq!(blend.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
    assert_eq!(blend.color.operation, wgpu::BlendOperation::Add);
    assert_eq!(blend.alpha, blend.color);

    // Separate alpha: ONE, MAX, ZERO
    let blend = blend_state(1 << 30 | 1 << 29 | 5 << 8 | 4 | 3 << 21 | 1 << 16).unwrap().unwrap();
    assert_eq!(blend.alpha.operation, wgpu::BlendOperation::Max);
    assert_eq!(blend.alpha.src_factor, wgpu::BlendFactor::One);
    assert_eq!(blend.alpha.dst_factor, wgpu::BlendFactor::One);

    assert!(blend_state(1 << 30 | 12).is_err());
}

#[test]
fn test_write_mask_per_target() {
    assert_eq!(write_mask(0x0000_00F0, 0), wgpu::ColorWrites::empty());
    assert_eq!(write_mask(0x0000_00F0, 1), wgpu::ColorWrites::ALL);
    assert_eq!(
        write_mask(0x0000_0003, 0),
        wgpu::ColorWrites::RED | wgpu::ColorWrites::GREEN
    );
}

#[test]
fn test_depth_range_by_clip_space() {
    assert_eq!(depth_range(1.0, 0.0, true), (0.0, 1.0));
    assert_eq!(depth_range(0.5, 0.5, false), (0.0, 1.0));
    assert_eq!(depth_range(-1.0, 1.0, true), (0.0, 1.0));
    assert_eq!(depth_range(2.0, 0.0, false), (0.0, 1.0));
    assert_eq!(depth_range(0.25, 0.5, true), (0.5, 0.75));
}

#[test]
fn test_state_from_registers() {
    let mut regs = RegisterFile::new();
    regs.write(VGT_PRIMITIVE_TYPE, prim_type::TRI_LIST).unwrap();
    regs.write(PA_SU_SC_MODE_CNTL, 0x2 | 0x4).unwrap();
    regs.write(DB_DEPTH_CONTROL, 0x2 | 0x4 | 1 << 4).unwrap();
    regs.write(PA_CL_CLIP_CNTL, 1 << 19).unwrap();
    write_f32(&mut regs, PA_CL_VPORT_XSCALE, 960.0);
    write_f32(&mut regs, PA_CL_VPORT_XOFFSET, 960.0);
    write_f32(&mut regs, PA_CL_VPORT_YSCALE, -540.0);
    write_f32(&mut regs, PA_CL_VPORT_YOFFSET, 540.0);
    write_f32(&mut regs, PA_CL_VPORT_ZSCALE, 1.0);
    write_f32(&mut regs, PA_CL_VPORT_ZOFFSET, 0.0);
    write_f32(&mut regs, CB_BLEND_RED + 3, 0.5);

    let state = FixedFunctionState::from_registers(&regs).unwrap();
    assert_eq!(state.topology, wgpu::PrimitiveTopology::TriangleList);
    assert_eq!(state.cull_mode, Some(wgpu::Face::Back));
    assert_eq!(state.front_face, wgpu::FrontFace::Cw);
    assert!(!state.cull_all);
    assert!(state.depth.test && state.depth.write);
    assert_eq!(state.depth.compare, wgpu::CompareFunction::Less);
    assert!(state.stencil.is_none());
    assert_eq!(state.blend_constant.a, 0.5);

    let viewport = state.viewport.unwrap();
    assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
    assert_eq!((viewport.width, viewport.height), (1920.0, 1080.0));
    assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));

    let ds = state.depth_stencil_state(wgpu::TextureFormat::Depth32Float);
    assert!(ds.depth_write_enabled);
    assert_eq!(ds.depth_compare, wgpu::CompareFunction::Less);
}

#[test]
fn test_unset_viewport_and_disabled_depth() {
    let mut regs = RegisterFile::new();
    regs.write(VGT_PRIMITIVE_TYPE, prim_type::TRI_STRIP).unwrap();
    regs.write(DB_DEPTH_CONTROL, 0x4).unwrap();

    let state = FixedFunctionState::from_registers(&regs).unwrap();
    assert!(state.viewport.is_none());

    let ds = state.depth_stencil_state(wgpu::TextureFormat::Depth32Float);
    assert!(!ds.depth_write_enabled);
    assert_eq!(ds.depth_compare, wgpu::CompareFunction::Always);
}

#[test]
fn test_both_faces_culled() {
    let mut regs = RegisterFile::new();
    regs.write(VGT_PRIMITIVE_TYPE, prim_type::TRI_LIST).unwrap();
    regs.write(PA_SU_SC_MODE_CNTL, 0x3).unwrap();

    assert!(FixedFunctionState::from_registers(&regs).unwrap().cull_all);
}

#[test]
fn test_stencil_state() {
    let mut regs = RegisterFile::new();
    regs.write(VGT_PRIMITIVE_TYPE, prim_type::TRI_LIST).unwrap();
    // Stencil enabled, ALWAYS
    regs.write(DB_DEPTH_CONTROL, 0x1 | 7 << 8).unwrap();
    // Front: fail KEEP, zpass REPLACE, zfail ZERO
    regs.write(DB_STENCIL_CONTROL, 3 << 4 | 1 << 8).unwrap();
    regs.write(DB_STENCILREFMASK, 0x80 | 0xFF << 8 | 0x0F << 16).unwrap();

    let state = FixedFunctionState::from_registers(&regs).unwrap();
    let stencil = state.stencil.unwrap();
    assert_eq!(stencil.front.compare, wgpu::CompareFunction::Always);
    assert_eq!(stencil.front.fail_op, wgpu::StencilOperation::Keep);
    assert_eq!(stencil.front.pass_op, wgpu::StencilOperation::Replace);
    assert_eq!(stencil.front.depth_fail_op, wgpu::StencilOperation::Zero);
    assert_eq!(stencil.back, stencil.front);
    assert_eq!(stencil.reference, 0x80);
    assert_eq!(stencil.read_mask, 0xFF);
    assert_eq!(stencil.write_mask, 0x0F);

    let ds = state.depth_stencil_state(wgpu::TextureFormat::Depth24PlusStencil8);
    assert_eq!(ds.stencil.front.pass_op, wgpu::StencilOperation::Replace);
    assert_eq!(ds.stencil.write_mask, 0x0F);

    // No stencil aspect, no stencil state
    let ds = state.depth_stencil_state(wgpu::TextureFormat::Depth32Float);
    assert!(!ds.stencil.is_enabled());
}

#[test]
fn test_color_targets_drop_blend_on_integer_formats() {
    let mut regs = RegisterFile::new();
    regs.write(VGT_PRIMITIVE_TYPE, prim_type::TRI_LIST).unwrap();
    regs.write(CB_BLEND0_CONTROL, 1 << 30 | 5 << 8 | 4).unwrap();
    regs.write(CB_BLEND0_CONTROL + 1, 1 << 30 | 5 << 8 | 4).unwrap();
    regs.write(CB_TARGET_MASK, 0xFF).unwrap();

    let state = FixedFunctionState::from_registers(&regs).unwrap();
    let targets = state.color_target_states(&[
        Some(wgpu::TextureFormat::Rgba8Unorm),
        Some(wgpu::TextureFormat::Rgba8Uint),
        None,
    ]);
    assert_eq!(targets.len(), 3);
    let first = targets[0].as_ref().unwrap();
    assert!(first.blend.is_some());
    assert_eq!(first.write_mask, wgpu::ColorWrites::ALL);
    assert!(targets[1].as_ref().unwrap().blend.is_none());
    assert!(targets[2].is_none());
}

#[test]
fn test_patch_vertex_count() {
    let mut regs = RegisterFile::new();
    regs.write(VGT_PRIMITIVE_TYPE, prim_type::QUAD_LIST).unwrap();
    let state = FixedFunctionState::from_registers(&regs).unwrap();
    assert_eq!(state.host_vertex_count(8), 12);

    regs.write(VGT_PRIMITIVE_TYPE, prim_type::TRI_LIST).unwrap();
    let state = FixedFunctionState::from_registers(&regs).unwrap();
    assert_eq!(state.host_vertex_count(8), 8);
}
