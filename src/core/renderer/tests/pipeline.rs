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

use std::sync::Arc;

use crate::core::cache::{BufferAllocator, BufferCache};
use crate::core::config::TrackingBackend;
use crate::core::error::{GpuError, Result};
use crate::core::gpu::descriptors::DstSel;
use crate::core::gpu::registers::ShaderStage;
use crate::core::memory::{FlatMemory, GuestMemory};
use crate::core::renderer::pipeline::*;
use crate::core::shader::fetch::{FetchShaderVertexBinding, VsharpLocation};
use crate::core::shader::{DescriptorBinding, DescriptorKind, SgprValue, ShaderData, CONSTANTS_BINDING};

const BASE: u64 = 0x10_0000;
const TABLE: u64 = BASE + 0x100;
const VERTICES: u64 = BASE + 0x2000;

/// Allocator recording buffer sizes only
#[derive(Default)]
struct SizeAllocator {
    created: Vec<u64>,
}

impl BufferAllocator for SizeAllocator {
    type Buffer = u64;

    fn create_buffer(&mut self, size: u64) -> Result<u64> {
        self.created.push(size);
        Ok(size)
    }

    fn write_buffer(&mut self, _buffer: &u64, _offset: u64, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

fn binding(index: u32, ptr_sgpr: u8, attr_offset: u16, format: Option<(u8, u8)>) -> FetchShaderVertexBinding {
    FetchShaderVertexBinding {
        index,
        location: VsharpLocation {
            sgpr: 8,
            ptr_sgpr,
            dword_offset: 4 * index,
        },
        dest_vgpr: 4 + 4 * index as u8,
        n_elements: 4,
        attr_offset,
        format,
    }
}

/// V# over `records` elements of `stride` bytes at `base`
fn vsharp_words(base: u64, stride: u32, records: u32, dfmt: u32, nfmt: u32) -> [u32; 4] {
    // X Y Z W destination select
    let dst_sel = 4 | 5 << 3 | 6 << 6 | 7 << 9;
    [
        base as u32,
        (base >> 32) as u32 | stride << 16,
        records,
        dst_sel | nfmt << 12 | dfmt << 15,
    ]
}

fn memory_with_table(vsharps: &[[u32; 4]]) -> (Arc<FlatMemory>, [u32; 16]) {
    let memory = Arc::new(FlatMemory::new(BASE, 0x1_0000));
    for (n, words) in vsharps.iter().enumerate() {
        memory.write_dwords(TABLE + 16 * n as u64, words).unwrap();
    }
    let mut user_data = [0u32; 16];
    user_data[2] = TABLE as u32;
    user_data[3] = (TABLE >> 32) as u32;
    (memory, user_data)
}

fn shader_data(stage: ShaderStage) -> ShaderData {
    ShaderData {
        hash: 1,
        stage,
        wgsl: String::new(),
        descriptors: Vec::new(),
        resolved: Vec::new(),
        vertex_inputs: Vec::new(),
        ps_inputs: Vec::new(),
        exports: Vec::new(),
    }
}

#[test]
fn test_streams_take_format_from_typed_load() {
    let (memory, user_data) = memory_with_table(&[vsharp_words(VERTICES, 16, 3, 14, 7)]);
    let fetch = [binding(0, 2, 0, Some((14, 7)))];

    let streams = resolve_vertex_streams(memory.as_ref(), &user_data, &fetch).unwrap();
    assert_eq!(streams.len(), 1);
    let stream = &streams[0];
    assert_eq!(stream.location, 0);
    assert_eq!(stream.address, VERTICES);
    assert_eq!(stream.size, 48);
    assert_eq!(stream.stride, 16);
    assert_eq!(stream.format, wgpu::VertexFormat::Float32x4);
    assert_eq!(stream.dst_sel, [DstSel::X, DstSel::Y, DstSel::Z, DstSel::W]);
}

#[test]
fn test_interleaved_attribute_offset() {
    // Two attributes in one 20-byte vertex: float4 position, unorm8x4 color
    let (memory, user_data) = memory_with_table(&[
        vsharp_words(VERTICES, 20, 4, 14, 7),
        vsharp_words(VERTICES, 20, 4, 10, 0),
    ]);
    let fetch = [binding(0, 2, 0, None), binding(1, 2, 16, Some((10, 0)))];

    let streams = resolve_vertex_streams(memory.as_ref(), &user_data, &fetch).unwrap();
    assert_eq!(streams[1].address, VERTICES + 16);
    assert_eq!(streams[1].format, wgpu::VertexFormat::Unorm8x4);
    assert_eq!(streams[0].format, wgpu::VertexFormat::Float32x4);

    let inputs = vertex_inputs(&fetch, &streams);
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[1].location(), 1);
    assert_eq!(inputs[1].dst_sel, streams[1].dst_sel);
}

#[test]
fn test_stream_errors() {
    let (memory, user_data) = memory_with_table(&[vsharp_words(VERTICES, 16, 3, 14, 7)]);

    let out_of_range = [binding(0, 15, 0, None)];
    assert!(matches!(
        resolve_vertex_streams(memory.as_ref(), &user_data, &out_of_range),
        Err(GpuError::Unimplemented(_))
    ));

    let too_many: Vec<_> = (0..9).map(|n| binding(n, 2, 0, None)).collect();
    assert!(matches!(
        resolve_vertex_streams(memory.as_ref(), &user_data, &too_many),
        Err(GpuError::Unimplemented(_))
    ));

    // 8_8 UINT has no host vertex format
    let bad_format = [binding(0, 2, 0, Some((3, 4)))];
    assert!(matches!(
        resolve_vertex_streams(memory.as_ref(), &user_data, &bad_format),
        Err(GpuError::InvalidEnum { .. })
    ));
}

#[test]
fn test_host_vertex_format_keeps_bits() {
    use wgpu::VertexFormat as F;
    assert_eq!(host_vertex_format(F::Uint32x4), F::Float32x4);
    assert_eq!(host_vertex_format(F::Sint32), F::Float32);
    assert_eq!(host_vertex_format(F::Uint8x4), F::Unorm8x4);
    assert_eq!(host_vertex_format(F::Snorm16x2), F::Snorm16x2);
}

#[test]
fn test_gather_vertices_uses_buffer_cache() {
    let (memory, user_data) = memory_with_table(&[
        vsharp_words(VERTICES, 16, 3, 14, 7),
        vsharp_words(VERTICES + 0x100, 8, 3, 11, 7),
    ]);
    let fetch = [binding(0, 2, 0, None), binding(1, 2, 0, None)];
    let streams = resolve_vertex_streams(memory.as_ref(), &user_data, &fetch).unwrap();

    let guest: Arc<dyn GuestMemory> = memory;
    let mut cache = BufferCache::new(SizeAllocator::default(), guest, TrackingBackend::Hash, 0x1000);
    let refs = gather_vertices(&mut cache, &streams).unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(*refs[0].buffer, 48);
    assert_eq!(*refs[1].buffer, 24);
    assert!(refs.iter().all(|r| r.offset == 0 && r.was_dirty));

    let again = gather_vertices(&mut cache, &streams).unwrap();
    assert!(again.iter().all(|r| !r.was_dirty));
    assert_eq!(cache.allocator().created.len(), 2);
}

#[test]
fn test_stage_constants_resolve_forwarded_loads() {
    let memory = FlatMemory::new(BASE, 0x1000);
    memory.write_dwords(BASE + 0x80, &[0, 0, 0xCAFE]).unwrap();
    let mut user_data = [0u32; 16];
    user_data[0] = (BASE + 0x80) as u32;
    user_data[3] = 0x1234;

    let mut data = shader_data(ShaderStage::Vertex);
    data.resolved = vec![
        SgprValue::UserData(3),
        SgprValue::Const(7),
        SgprValue::Memory {
            lo: Box::new(SgprValue::UserData(0)),
            hi: Box::new(SgprValue::UserData(1)),
            dword_offset: 2,
        },
    ];

    let consts = stage_constants(&data, &user_data, &memory).unwrap();
    assert_eq!(consts.user_data, user_data);
    assert_eq!(&consts.resolved[..4], &[0x1234, 7, 0xCAFE, 0]);
    assert_eq!(consts.buffer_base, [0; 8]);
    assert_eq!(
        bytemuck::bytes_of(&consts).len() as u64,
        crate::core::shader::wgsl::STAGE_CONSTANTS_SIZE
    );
}

#[test]
fn test_layout_entries_follow_descriptor_slots() {
    let mut data = shader_data(ShaderStage::Pixel);
    let descriptor = |kind, slot| DescriptorBinding {
        kind,
        sgpr: 0,
        dwords: Vec::new(),
        slot,
    };
    data.descriptors = vec![
        descriptor(DescriptorKind::VSharp, 0),
        descriptor(DescriptorKind::TSharp, 1),
        descriptor(DescriptorKind::SSharp, 0),
    ];

    let entries = layout_entries(&data);
    let bindings: Vec<u32> = entries.iter().map(|e| e.binding).collect();
    assert_eq!(bindings, vec![0, 9, 16, CONSTANTS_BINDING]);
    assert!(entries
        .iter()
        .all(|e| e.visibility == wgpu::ShaderStages::FRAGMENT));
    assert!(matches!(
        entries[0].ty,
        wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            ..
        }
    ));
    assert!(matches!(entries[2].ty, wgpu::BindingType::Sampler(_)));
}
