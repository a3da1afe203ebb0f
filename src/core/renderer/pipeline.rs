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

//! Host pipelines
//!
//! A [`Pipeline`] is built once per [`PipelineKey`] and reused by every draw
//! with the same shaders, fetch layout and attachments. Descriptor contents
//! are per-draw state, so [`gather_vertices`] and
//! [`Pipeline::upload_buffers_and_textures`] run on every draw.

use std::borrow::Cow;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::state::FixedFunctionState;
use super::tessellation::{patch_source, PatchAttribute, PATCH_ENTRY};
use super::wgpu_backend::Resources;
use crate::core::cache::{BufferAllocator, BufferCache, BufferRef, CachedShader, PipelineKey};
use crate::core::error::{GpuError, Result};
use crate::core::gpu::descriptors::{buf_fmt, DstSel, SSharp, TSharp, VSharp};
use crate::core::gpu::registers::{ShaderStage, USER_DATA_COUNT};
use crate::core::memory::GuestMemory;
use crate::core::shader::wgsl::{bind_group, PS_ENTRY, PUSH_CONSTANT_SIZE, STAGE_CONSTANTS_SIZE, VS_ENTRY};
use crate::core::shader::{
    DescriptorKind, FetchShaderVertexBinding, ShaderData, VertexInput, CONSTANTS_BINDING,
    MAX_RESOLVED, MAX_SLOTS,
};

/// Vertex buffers a draw may bind
pub const MAX_VERTEX_STREAMS: usize = 8;

/// Uniform block bound at `consts` in every stage
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct StageConstants {
    pub user_data: [u32; USER_DATA_COUNT],
    pub resolved: [u32; MAX_RESOLVED],
    /// Byte offset of each V# base within its bound buffer
    pub buffer_base: [u32; MAX_SLOTS as usize],
}

/// Push-constant block shared by both stages
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PushConstants {
    pub vs_strides: [u32; MAX_SLOTS as usize],
    pub ps_strides: [u32; MAX_SLOTS as usize],
    pub patch_strides: [u32; MAX_VERTEX_STREAMS],
    pub patch_offsets: [u32; MAX_VERTEX_STREAMS],
}

const _: () = assert!(std::mem::size_of::<StageConstants>() as u64 == STAGE_CONSTANTS_SIZE);
const _: () = assert!(std::mem::size_of::<PushConstants>() as u32 == PUSH_CONSTANT_SIZE);

/// One vertex attribute stream of a draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexStream {
    pub location: u32,
    /// First byte of attribute 0
    pub address: u64,
    pub size: u64,
    pub stride: u32,
    pub format: wgpu::VertexFormat,
    pub dst_sel: [DstSel; 4],
}

/// Resolve the V# behind each fetch-shader binding
///
/// # Errors
///
/// Descriptor pointers outside the user-data registers, unreadable
/// descriptors and formats with no host equivalent.
pub fn resolve_vertex_streams(
    memory: &dyn GuestMemory,
    user_data: &[u32; USER_DATA_COUNT],
    fetch: &[FetchShaderVertexBinding],
) -> Result<Vec<VertexStream>> {
    if fetch.len() > MAX_VERTEX_STREAMS {
        return Err(GpuError::Unimplemented(format!(
            "{} vertex attributes (at most {})",
            fetch.len(),
            MAX_VERTEX_STREAMS
        )));
    }

    fetch
        .iter()
        .map(|binding| {
            let ptr_sgpr = binding.location.ptr_sgpr as usize;
            if ptr_sgpr + 1 >= USER_DATA_COUNT {
                return Err(GpuError::Unimplemented(format!(
                    "vertex descriptor table in s[{}:{}]",
                    ptr_sgpr,
                    ptr_sgpr + 1
                )));
            }
            let table = (user_data[ptr_sgpr] as u64 | (user_data[ptr_sgpr + 1] as u64) << 32)
                & 0xFFFF_FFFF_FFFF;
            let mut vsharp = VSharp::read(memory, table + binding.location.dword_offset as u64 * 4)?;
            if let Some((dfmt, nfmt)) = binding.format {
                vsharp.data_format = dfmt as u32;
                vsharp.num_format = nfmt as u32;
            }
            let format = if vsharp.data_format == buf_fmt::INVALID {
                wgpu::VertexFormat::Float32x4
            } else {
                vsharp.vertex_format()?
            };
            Ok(VertexStream {
                location: binding.index,
                address: vsharp.base + binding.attr_offset as u64,
                size: vsharp.size().max(format.size()),
                stride: vsharp.stride,
                format,
                dst_sel: vsharp.dst_sel,
            })
        })
        .collect()
}

/// Translator inputs for a draw's vertex streams
pub fn vertex_inputs(fetch: &[FetchShaderVertexBinding], streams: &[VertexStream]) -> Vec<VertexInput> {
    fetch
        .iter()
        .zip(streams)
        .map(|(binding, stream)| VertexInput {
            binding: *binding,
            dst_sel: stream.dst_sel,
        })
        .collect()
}

/// Format the host vertex fetch uses for a guest format
///
/// Translated shaders declare every attribute as `vec4<f32>`. 32-bit integer
/// formats are fetched as floats, which carries their bits through to the
/// guest registers unchanged; 8-bit unsigned formats are normalized.
pub fn host_vertex_format(format: wgpu::VertexFormat) -> wgpu::VertexFormat {
    use wgpu::VertexFormat as F;
    match format {
        F::Uint32 | F::Sint32 => F::Float32,
        F::Uint32x2 | F::Sint32x2 => F::Float32x2,
        F::Uint32x3 | F::Sint32x3 => F::Float32x3,
        F::Uint32x4 | F::Sint32x4 => F::Float32x4,
        F::Uint8x4 => F::Unorm8x4,
        other => other,
    }
}

/// Look up the cached buffer behind each vertex stream
pub fn gather_vertices<A: BufferAllocator>(
    buffers: &mut BufferCache<A>,
    streams: &[VertexStream],
) -> Result<Vec<BufferRef<A::Buffer>>> {
    streams
        .iter()
        .map(|stream| buffers.get_buffer(stream.address, stream.size))
        .collect()
}

/// Stage constants with user data and forwarded scalar loads filled in
pub fn stage_constants(
    data: &ShaderData,
    user_data: &[u32; USER_DATA_COUNT],
    memory: &dyn GuestMemory,
) -> Result<StageConstants> {
    let mut consts = StageConstants::zeroed();
    consts.user_data = *user_data;
    for (slot, value) in consts.resolved.iter_mut().zip(&data.resolved) {
        *slot = value.resolve(user_data, memory)?;
    }
    Ok(consts)
}

/// Bind group layout entries for a translated stage
pub fn layout_entries(data: &ShaderData) -> Vec<wgpu::BindGroupLayoutEntry> {
    let visibility = match data.stage {
        ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
        ShaderStage::Pixel => wgpu::ShaderStages::FRAGMENT,
    };
    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = data
        .descriptors
        .iter()
        .map(|d| wgpu::BindGroupLayoutEntry {
            binding: d.binding(),
            visibility,
            ty: match d.kind {
                DescriptorKind::VSharp => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                DescriptorKind::TSharp => wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                DescriptorKind::SSharp => {
                    wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                }
            },
            count: None,
        })
        .collect();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: CONSTANTS_BINDING,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(STAGE_CONSTANTS_SIZE),
        },
        count: None,
    });
    entries
}

/// Per-draw bindings of one stage
pub struct StageBindings {
    pub bind_group: wgpu::BindGroup,
    pub strides: [u32; MAX_SLOTS as usize],
}

/// Per-draw bindings of the patch vertex-pulling buffers
pub struct PatchBindings {
    pub bind_group: wgpu::BindGroup,
    pub strides: [u32; MAX_VERTEX_STREAMS],
    pub offsets: [u32; MAX_VERTEX_STREAMS],
}

/// Compile translated WGSL into a module, surfacing validation errors
pub fn compile_module(device: &wgpu::Device, label: &str, source: &str) -> Result<wgpu::ShaderModule> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(e) => Err(GpuError::Resource(format!("{} failed to compile: {}", label, e))),
        None => Ok(module),
    }
}

/// Host pipeline with the layouts its draws bind against
pub struct Pipeline {
    pub render: wgpu::RenderPipeline,
    pub vs: Arc<ShaderData>,
    pub ps: Arc<ShaderData>,
    /// Vertex and pixel bind group layouts, by group index
    pub layouts: [wgpu::BindGroupLayout; 2],
    pub patch_layout: Option<wgpu::BindGroupLayout>,
    /// Fixed-function state of the draw that built the pipeline
    pub state: FixedFunctionState,
}

impl Pipeline {
    /// Build the pipeline for `key`
    ///
    /// # Arguments
    ///
    /// * `device` - Device creating the pipeline
    /// * `key` - Shader pair, fetch layout and attachment formats
    /// * `vs` / `ps` - Translated and compiled stages
    /// * `state` - Fixed-function state captured into the pipeline
    ///
    /// # Errors
    ///
    /// Pixel inputs the vertex stage does not write, patch attributes that
    /// can't be pulled and wgpu validation failures.
    pub fn build(
        device: &wgpu::Device,
        key: &PipelineKey,
        vs: &CachedShader<wgpu::ShaderModule>,
        ps: &CachedShader<wgpu::ShaderModule>,
        state: FixedFunctionState,
    ) -> Result<Self> {
        let params: Vec<u8> = vs.data.param_exports().collect();
        if let Some(missing) = ps.data.ps_inputs.iter().find(|n| !params.contains(n)) {
            return Err(GpuError::Resource(format!(
                "pixel shader {:016X} reads parameter {} that vertex shader {:016X} does not write",
                ps.data.hash, missing, vs.data.hash
            )));
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vs_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vertex stage"),
            entries: &layout_entries(&vs.data),
        });
        let ps_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pixel stage"),
            entries: &layout_entries(&ps.data),
        });
        let patch_layout = key.patch.map(|_| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = vs
                .data
                .vertex_inputs
                .iter()
                .map(|input| wgpu::BindGroupLayoutEntry {
                    binding: input.location(),
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("patch streams"),
                entries: &entries,
            })
        });

        let mut group_layouts = vec![&vs_layout, &ps_layout];
        if let Some(layout) = &patch_layout {
            group_layouts.push(layout);
        }
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("guest pipeline layout"),
            bind_group_layouts: &group_layouts,
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::VERTEX_FRAGMENT,
                range: 0..PUSH_CONSTANT_SIZE,
            }],
        });

        // Patch draws pull attributes themselves and need a module with the
        // expansion entry point appended
        let patch_module = match key.patch {
            Some(kind) => {
                let attributes: Vec<PatchAttribute> = vs
                    .data
                    .vertex_inputs
                    .iter()
                    .zip(&key.vertex_layout)
                    .map(|(input, (_, format))| PatchAttribute {
                        location: input.location(),
                        format: *format,
                    })
                    .collect();
                let source = patch_source(kind, &vs.data, &attributes)?;
                Some(compile_module(
                    device,
                    &format!("vs {:016X} {:?} patch", vs.data.hash, kind),
                    &source,
                )?)
            }
            None => None,
        };

        let attributes: Vec<[wgpu::VertexAttribute; 1]> = vs
            .data
            .vertex_inputs
            .iter()
            .zip(&key.vertex_layout)
            .map(|(input, (_, format))| {
                [wgpu::VertexAttribute {
                    format: host_vertex_format(*format),
                    offset: 0,
                    shader_location: input.location(),
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = match patch_module {
            Some(_) => Vec::new(),
            None => key
                .vertex_layout
                .iter()
                .zip(&attributes)
                .map(|((stride, _), attribute)| wgpu::VertexBufferLayout {
                    array_stride: *stride as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: attribute,
                })
                .collect(),
        };
        let (vertex_module, vertex_entry) = match &patch_module {
            Some(module) => (module, PATCH_ENTRY),
            None => (vs.module.as_ref(), VS_ENTRY),
        };

        let targets = state.color_target_states(&key.color_formats);
        let render = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("guest pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: vertex_module,
                entry_point: Some(vertex_entry),
                compilation_options: Default::default(),
                buffers: &buffers,
            },
            primitive: state.primitive_state(),
            depth_stencil: key.depth_format.map(|f| state.depth_stencil_state(f)),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: ps.module.as_ref(),
                entry_point: Some(PS_ENTRY),
                compilation_options: Default::default(),
                targets: &targets,
            }),
            multiview: None,
            cache: None,
        });

        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::Resource(format!(
                "pipeline VS {:016X} / PS {:016X} failed to build: {}",
                vs.data.hash, ps.data.hash, e
            )));
        }

        Ok(Self {
            render,
            vs: Arc::clone(&vs.data),
            ps: Arc::clone(&ps.data),
            layouts: [vs_layout, ps_layout],
            patch_layout,
            state,
        })
    }

    /// Resolve every descriptor of `stage` and build its bind group
    ///
    /// Buffers are bound whole; the offset of each V# base inside its cached
    /// buffer goes into `consts.buffer_base`, its stride into the returned
    /// push-constant strides. Null descriptors bind placeholders.
    pub fn upload_buffers_and_textures(
        &self,
        stage: ShaderStage,
        user_data: &[u32; USER_DATA_COUNT],
        memory: &dyn GuestMemory,
        res: &mut Resources,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<StageBindings> {
        let data = match stage {
            ShaderStage::Vertex => &self.vs,
            ShaderStage::Pixel => &self.ps,
        };
        let mut consts = stage_constants(data, user_data, memory)?;
        let mut strides = [0u32; MAX_SLOTS as usize];

        let mut buffers: Vec<(u32, Arc<wgpu::Buffer>)> = Vec::new();
        let mut views: Vec<(u32, wgpu::TextureView)> = Vec::new();
        let mut samplers: Vec<(u32, Arc<wgpu::Sampler>)> = Vec::new();

        for descriptor in &data.descriptors {
            let dwords = descriptor.resolve(user_data, memory)?;
            let slot = descriptor.slot as usize;
            match descriptor.kind {
                DescriptorKind::VSharp => {
                    let vsharp = VSharp::from_dwords(dwords4(&dwords));
                    if vsharp.base == 0 || vsharp.size() == 0 {
                        buffers.push((descriptor.binding(), Arc::clone(&res.null_buffer)));
                        continue;
                    }
                    let buffer = res.buffers.get_buffer(vsharp.base, vsharp.size())?;
                    consts.buffer_base[slot] = buffer.offset as u32;
                    strides[slot] = vsharp.stride;
                    buffers.push((descriptor.binding(), buffer.buffer));
                }
                DescriptorKind::TSharp => {
                    let mut words = [0u32; 8];
                    for (w, d) in words.iter_mut().zip(&dwords) {
                        *w = *d;
                    }
                    let view = res.texture_view(&TSharp::from_dwords(words), encoder)?;
                    views.push((descriptor.binding(), view));
                }
                DescriptorKind::SSharp => {
                    let sampler = res.sampler(&SSharp::from_dwords(dwords4(&dwords)));
                    samplers.push((descriptor.binding(), sampler));
                }
            }
        }

        let uniform = res.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("stage constants"),
            contents: bytemuck::bytes_of(&consts),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = Vec::new();
        for (binding, buffer) in &buffers {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            });
        }
        for (binding, view) in &views {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        for (binding, sampler) in &samplers {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: CONSTANTS_BINDING,
            resource: uniform.as_entire_binding(),
        });

        let bind_group = res.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stage resources"),
            layout: &self.layouts[bind_group(stage) as usize],
            entries: &entries,
        });
        Ok(StageBindings { bind_group, strides })
    }

    /// Bind the vertex streams as storage buffers for patch expansion
    pub fn upload_patch_streams(
        &self,
        device: &wgpu::Device,
        streams: &[VertexStream],
        refs: &[BufferRef<wgpu::Buffer>],
    ) -> Result<PatchBindings> {
        let Some(layout) = &self.patch_layout else {
            return Err(GpuError::Resource("pipeline has no patch stage".into()));
        };
        let mut strides = [0u32; MAX_VERTEX_STREAMS];
        let mut offsets = [0u32; MAX_VERTEX_STREAMS];
        let mut entries = Vec::with_capacity(streams.len());
        for (stream, buffer) in streams.iter().zip(refs) {
            let n = stream.location as usize;
            if n >= MAX_VERTEX_STREAMS {
                return Err(GpuError::Unimplemented(format!("patch attribute location {}", n)));
            }
            strides[n] = stream.stride;
            offsets[n] = buffer.offset as u32;
            entries.push(wgpu::BindGroupEntry {
                binding: stream.location,
                resource: buffer.buffer.as_entire_binding(),
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("patch streams"),
            layout,
            entries: &entries,
        });
        Ok(PatchBindings {
            bind_group,
            strides,
            offsets,
        })
    }
}

fn dwords4(dwords: &[u32]) -> [u32; 4] {
    let mut out = [0u32; 4];
    for (o, d) in out.iter_mut().zip(dwords) {
        *o = *d;
    }
    out
}
