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

use super::validate_wgsl;
use crate::core::error::GpuError;
use crate::core::gpu::descriptors::DstSel;
use crate::core::gpu::registers::ShaderStage;
use crate::core::renderer::tessellation::*;
use crate::core::shader::fetch::{FetchShaderVertexBinding, VsharpLocation};
use crate::core::shader::gcn::op;
use crate::core::shader::{translate, ShaderData, VertexInput};

fn input(index: u32, dest_vgpr: u8) -> VertexInput {
    VertexInput {
        binding: FetchShaderVertexBinding {
            index,
            location: VsharpLocation {
                sgpr: 4,
                ptr_sgpr: 2,
                dword_offset: 4 * index,
            },
            dest_vgpr,
            n_elements: 4,
            attr_offset: 0,
            format: None,
        },
        dst_sel: [DstSel::X, DstSel::Y, DstSel::Z, DstSel::W],
    }
}

fn exp(target: u32, vsrc: u32) -> [u32; 2] {
    [
        0xF800_0000 | 1 << 11 | target << 4 | 0xF,
        vsrc | (vsrc + 1) << 8 | (vsrc + 2) << 16 | (vsrc + 3) << 24,
    ]
}

/// Vertex shader exporting attr0 as position and attr1 as param 0
fn vertex_shader() -> ShaderData {
    let mut code = Vec::new();
    code.extend(exp(12, 4));
    code.extend(exp(32, 8));
    code.push(0xBF80_0000 | (op::S_ENDPGM as u32) << 16);
    translate(&code, ShaderStage::Vertex, 0xABCD, &[input(0, 4), input(1, 8)]).unwrap()
}

fn attributes(formats: [wgpu::VertexFormat; 2]) -> Vec<PatchAttribute> {
    formats
        .iter()
        .enumerate()
        .map(|(n, format)| PatchAttribute {
            location: n as u32,
            format: *format,
        })
        .collect()
}

#[test]
fn test_host_vertex_counts() {
    assert_eq!(PatchKind::Rect.host_vertex_count(6), 12);
    assert_eq!(PatchKind::Quad.host_vertex_count(8), 12);
    // A trailing partial patch is dropped
    assert_eq!(PatchKind::Rect.host_vertex_count(4), 6);
    assert_eq!(PatchKind::Quad.host_vertex_count(3), 0);
    assert_eq!(PatchKind::Rect.host_vertex_count(u32::MAX), u32::MAX);
}

#[test]
fn test_corner_sources() {
    assert_eq!(PatchKind::Rect.corner_source(2), Some(2));
    assert_eq!(PatchKind::Rect.corner_source(3), None);
    let quad: Vec<_> = (0..4).map(|c| PatchKind::Quad.corner_source(c)).collect();
    assert_eq!(quad, vec![Some(0), Some(1), Some(3), Some(2)]);
}

#[test]
fn test_rect_expansion_extrapolates_fourth_corner() {
    let vs = vertex_shader();
    let source = patch_source(
        PatchKind::Rect,
        &vs,
        &attributes([wgpu::VertexFormat::Float32x4, wgpu::VertexFormat::Unorm8x4]),
    )
    .unwrap();

    assert!(source.starts_with(&vs.wgsl));
    assert!(source.contains(&format!("fn {}(", PATCH_ENTRY)));
    assert!(source.contains("out.position = v1.position + v2.position - v0.position;"));
    assert!(source.contains("out.param0 = v1.param0 + v2.param0 - v0.param0;"));
    assert!(source.contains("unpack4x8unorm(pbuf1[w + 0u])"));
    assert!(source.contains("pc.patch_strides[0].y"));
    validate_wgsl(&source);
}

#[test]
fn test_quad_expansion_reorders_corners() {
    let vs = vertex_shader();
    let source = patch_source(
        PatchKind::Quad,
        &vs,
        &attributes([wgpu::VertexFormat::Float32x3, wgpu::VertexFormat::Float16x4]),
    )
    .unwrap();

    assert!(source.contains("array<u32, 4>(0u, 1u, 3u, 2u)"));
    assert!(source.contains("let first = (vertex_index / 6u) * 4u;"));
    assert!(!source.contains("v0.position"));
    validate_wgsl(&source);
}

#[test]
fn test_unsupported_patch_format() {
    let vs = vertex_shader();
    let result = patch_source(
        PatchKind::Rect,
        &vs,
        &attributes([wgpu::VertexFormat::Float32x4, wgpu::VertexFormat::Float64]),
    );
    assert!(matches!(result, Err(GpuError::Unimplemented(_))));
}
