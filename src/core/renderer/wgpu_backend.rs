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

//! wgpu renderer
//!
//! Every draw re-reads the shader pointers, user data and fixed-function
//! registers, looks up cached shaders, pipelines, buffers and textures, and
//! records one render pass into its own command encoder. Queue writes made
//! by the caches land before the submit that consumes them.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use super::context::RenderContext;
use super::pipeline::{
    compile_module, gather_vertices, resolve_vertex_streams, vertex_inputs, Pipeline, PushConstants,
    VertexStream,
};
use super::render_target::{color_targets, ColorTargetDesc, DepthTargetDesc, FrameTargets, LoadAction};
use super::state::FixedFunctionState;
use super::{DisplayBuffer, Renderer};
use crate::core::cache::{
    BufferAllocator, BufferCache, ImageLayout, PipelineCache, PipelineKey, ShaderCache, TextureAllocator,
    TextureCache, TextureDesc,
};
use crate::core::config::GpuConfig;
use crate::core::detile::LinearDetiler;
use crate::core::error::{GpuError, Result};
use crate::core::gpu::descriptors::{SSharp, TSharp};
use crate::core::gpu::registers::{ShaderStage, USER_DATA_COUNT};
use crate::core::gpu::GpuContext;
use crate::core::memory::GuestMemory;
use crate::core::shader::fetch::fetch_shader_address;
use crate::core::shader::read_shader;

/// Size of the non-indexed indirect argument record
const DRAW_ARGS_SIZE: u64 = 16;

/// Size of the indexed indirect argument record
const DRAW_INDEXED_ARGS_SIZE: u64 = 20;

/// Allocates guest buffer mirrors on the device
pub struct WgpuBufferAllocator {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl BufferAllocator for WgpuBufferAllocator {
    type Buffer = wgpu::Buffer;

    fn create_buffer(&mut self, size: u64) -> Result<wgpu::Buffer> {
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("guest buffer"),
            size: align4(size.max(4)),
            usage: wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::INDEX
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn write_buffer(&mut self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        if data.len() % 4 == 0 {
            self.queue.write_buffer(buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(align4(data.len() as u64) as usize, 0);
            self.queue.write_buffer(buffer, offset, &padded);
        }
        Ok(())
    }
}

/// Allocates guest images on the device
pub struct WgpuTextureAllocator {
    device: wgpu::Device,
    queue: wgpu::Queue,
    supports_bc: bool,
}

impl WgpuTextureAllocator {
    fn extent(desc: &TextureDesc) -> wgpu::Extent3d {
        let (bw, bh) = desc.format.block_dimensions();
        wgpu::Extent3d {
            width: desc.width.max(1).div_ceil(bw) * bw,
            height: desc.height.max(1).div_ceil(bh) * bh,
            depth_or_array_layers: desc.layers.max(1),
        }
    }
}

impl TextureAllocator for WgpuTextureAllocator {
    type Texture = wgpu::Texture;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<wgpu::Texture> {
        if desc.format.is_bcn() && !self.supports_bc {
            return Err(GpuError::Unimplemented(format!(
                "{:?} textures without device BC support",
                desc.format
            )));
        }
        let usage = if desc.render_target {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
        } else {
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
        };
        Ok(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(if desc.render_target { "guest render target" } else { "guest texture" }),
            size: Self::extent(desc),
            mip_level_count: desc.mip_levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage,
            view_formats: &[],
        }))
    }

    fn write_texture(&mut self, texture: &wgpu::Texture, desc: &TextureDesc, data: &[u8]) -> Result<()> {
        let extent = Self::extent(desc);
        let (bw, bh) = desc.format.block_dimensions();
        let block_size = desc.format.block_copy_size(None).ok_or_else(|| {
            GpuError::Resource(format!("{:?} has no single copy aspect", desc.format))
        })?;
        let bytes_per_row = desc.width.max(1).div_ceil(bw) * block_size;
        let rows = desc.height.max(1).div_ceil(bh);
        let needed = bytes_per_row as usize * rows as usize * extent.depth_or_array_layers as usize;
        if data.len() < needed {
            return Err(GpuError::Resource(format!(
                "texture upload at 0x{:X} has {} bytes, needs {}",
                desc.address,
                data.len(),
                needed
            )));
        }
        self.queue.write_texture(
            texture.as_image_copy(),
            &data[..needed],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(rows),
            },
            extent,
        );
        Ok(())
    }
}

/// Host resources shared by every draw
pub struct Resources {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub buffers: BufferCache<WgpuBufferAllocator>,
    pub textures: TextureCache<WgpuTextureAllocator>,
    pub targets: FrameTargets,
    /// Bound in place of a null V#
    pub null_buffer: Arc<wgpu::Buffer>,
    samplers: HashMap<SSharp, Arc<wgpu::Sampler>>,
    null_texture: wgpu::Texture,
    detiler: LinearDetiler,
}

impl Resources {
    fn new(context: &RenderContext, memory: Arc<dyn GuestMemory>, config: &GpuConfig) -> Self {
        let device = context.device.clone();
        let queue = context.queue.clone();
        let buffers = BufferCache::new(
            WgpuBufferAllocator {
                device: device.clone(),
                queue: queue.clone(),
            },
            Arc::clone(&memory),
            config.tracking,
            config.page_size,
        );
        let textures = TextureCache::new(
            WgpuTextureAllocator {
                device: device.clone(),
                queue: queue.clone(),
                supports_bc: context.supports_bc(),
            },
            memory,
        );
        let null_buffer = Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("null buffer"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        }));
        let null_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("null texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        Self {
            device,
            queue,
            buffers,
            textures,
            targets: FrameTargets::new(),
            null_buffer,
            samplers: HashMap::new(),
            null_texture,
            detiler: LinearDetiler::new(),
        }
    }

    /// View of the image a T# describes
    ///
    /// Reads of a color target rendered this frame go through a copy taken
    /// at this point in `encoder`; targets from earlier frames are sampled in
    /// place. Everything else comes from the texture cache.
    pub fn texture_view(&mut self, tsharp: &TSharp, encoder: &mut wgpu::CommandEncoder) -> Result<wgpu::TextureView> {
        if tsharp.base == 0 {
            return Ok(self.null_texture.create_view(&wgpu::TextureViewDescriptor::default()));
        }
        let single_layer = wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: 0,
            array_layer_count: Some(1),
            ..Default::default()
        };

        let target = self
            .textures
            .render_target(tsharp.base)
            .filter(|t| !t.desc.is_depth())
            .cloned();
        if let Some(target) = target {
            self.check_sampleable(target.desc.format)?;
            if !self.targets.note_sampled(tsharp.base) {
                self.textures.transition_target(tsharp.base, ImageLayout::ShaderReadOnly)?;
                return Ok(target.texture.create_view(&single_layer));
            }

            self.textures.transition_target(tsharp.base, ImageLayout::FeedbackLoop)?;
            let size = WgpuTextureAllocator::extent(&target.desc);
            let scratch = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("feedback copy"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: target.desc.format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            encoder.copy_texture_to_texture(target.texture.as_image_copy(), scratch.as_image_copy(), size);
            return Ok(scratch.create_view(&single_layer));
        }

        self.check_sampleable(tsharp.texture_format()?)?;
        let texture = self.textures.get_texture(tsharp, &self.detiler)?;
        Ok(texture.texture.create_view(&single_layer))
    }

    /// Sampler for an S#, created once per distinct descriptor
    pub fn sampler(&mut self, ssharp: &SSharp) -> Arc<wgpu::Sampler> {
        let device = &self.device;
        Arc::clone(
            self.samplers
                .entry(*ssharp)
                .or_insert_with(|| Arc::new(device.create_sampler(&ssharp.descriptor()))),
        )
    }

    fn check_sampleable(&self, format: wgpu::TextureFormat) -> Result<()> {
        match format.sample_type(None, Some(self.device.features())) {
            Some(wgpu::TextureSampleType::Float { filterable: true }) => Ok(()),
            other => Err(GpuError::Unimplemented(format!(
                "sampling {:?} textures ({:?})",
                format, other
            ))),
        }
    }

    fn begin_frame(&mut self) {
        self.targets.begin_frame();
        self.buffers.begin_frame();
    }
}

/// One host draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DrawCall {
    vertex_count: u32,
    instance_count: u32,
    first_vertex: u32,
    first_instance: u32,
    index: Option<IndexRange>,
}

impl DrawCall {
    /// Vertex (or index) and instance ranges
    ///
    /// Indirect draws take these from guest memory, so the ends are checked.
    fn ranges(&self) -> Result<(Range<u32>, Range<u32>)> {
        let first = match self.index {
            Some(range) => range.first_index,
            None => self.first_vertex,
        };
        let end = first.checked_add(self.vertex_count);
        let instance_end = self.first_instance.checked_add(self.instance_count);
        match (end, instance_end) {
            (Some(end), Some(instance_end)) => Ok((first..end, self.first_instance..instance_end)),
            _ => Err(GpuError::Resource(format!(
                "draw range overflows: first {} count {}, first instance {} instances {}",
                first, self.vertex_count, self.first_instance, self.instance_count
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexRange {
    address: u64,
    /// Bytes of index data the draw may touch
    size: u64,
    first_index: u32,
    base_vertex: i32,
}

/// Per-draw inputs resolved before encoding
struct DrawPlan {
    state: FixedFunctionState,
    pipeline: Arc<Pipeline>,
    streams: Vec<VertexStream>,
    colors: Vec<ColorTargetDesc>,
    depth: Option<DepthTargetDesc>,
    slots: usize,
    viewport: Option<(f32, f32, f32, f32, f32, f32)>,
    vs_user_data: [u32; USER_DATA_COUNT],
    ps_user_data: [u32; USER_DATA_COUNT],
}

/// Renderer drawing through a wgpu device
pub struct WgpuRenderer {
    res: Resources,
    shaders: ShaderCache<wgpu::ShaderModule>,
    pipelines: PipelineCache<Pipeline>,
    adapter: String,
    presented: Option<TextureDesc>,
    frames: u64,
    draws: u64,
}

impl WgpuRenderer {
    /// Create a renderer over `context`
    ///
    /// # Arguments
    ///
    /// * `context` - Device and queue to draw with
    /// * `memory` - Guest memory the caches mirror
    /// * `config` - Tracking backend, page size and shader dump directory
    pub fn new(context: RenderContext, memory: Arc<dyn GuestMemory>, config: &GpuConfig) -> Self {
        let res = Resources::new(&context, memory, config);
        Self {
            res,
            shaders: ShaderCache::new(config.shader_dump_dir.clone()),
            pipelines: PipelineCache::new(),
            adapter: context.adapter_info.name,
            presented: None,
            frames: 0,
            draws: 0,
        }
    }

    /// Render target shown by the last flip
    pub fn presented(&self) -> Option<&TextureDesc> {
        self.presented.as_ref()
    }

    /// Flips presented so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn shader_cache(&self) -> &ShaderCache<wgpu::ShaderModule> {
        &self.shaders
    }

    pub fn pipeline_cache(&self) -> &PipelineCache<Pipeline> {
        &self.pipelines
    }

    fn execute(&mut self, ctx: &GpuContext, call: DrawCall) -> Result<()> {
        let state = FixedFunctionState::from_registers(&ctx.regs)?;
        if state.cull_all {
            log::trace!("Skipping draw with both faces culled");
            return Ok(());
        }
        if state.patch.is_some() && call.index.is_some() {
            return Err(GpuError::Unimplemented("indexed rect/quad lists".into()));
        }
        call.ranges()?;

        let memory = ctx.memory();
        let vs_user_data = ctx.regs.user_data(ShaderStage::Vertex);
        let ps_user_data = ctx.regs.user_data(ShaderStage::Pixel);
        let vs_binary = read_shader(memory, ctx.regs.shader_address(ShaderStage::Vertex))?;
        let ps_binary = read_shader(memory, ctx.regs.shader_address(ShaderStage::Pixel))?;

        let fetch = match fetch_shader_address(&vs_binary.code, &vs_user_data) {
            Some(address) => self.shaders.fetch_bindings(memory, address)?,
            None => Arc::new(Vec::new()),
        };
        let streams = resolve_vertex_streams(memory, &vs_user_data, &fetch)?;
        let inputs = vertex_inputs(&fetch, &streams);

        let device = self.res.device.clone();
        let vs = self.shaders.get_or_compile(&vs_binary, ShaderStage::Vertex, &inputs, |data| {
            compile_module(&device, &format!("vs {:016X}", data.hash), &data.wgsl)
        })?;
        let ps = self.shaders.get_or_compile(&ps_binary, ShaderStage::Pixel, &[], |data| {
            compile_module(&device, &format!("ps {:016X}", data.hash), &data.wgsl)
        })?;

        let colors = color_targets(ctx)?;
        let depth = DepthTargetDesc::from_registers(ctx)?;
        if colors.is_empty() && depth.is_none() {
            log::trace!("Skipping draw without render targets");
            return Ok(());
        }
        let slots = colors.iter().map(|c| c.index + 1).max().unwrap_or(0);
        let mut color_formats = vec![None; slots];
        for c in &colors {
            color_formats[c.index] = Some(c.format);
        }

        let key = PipelineKey {
            vs_hash: vs.data.hash,
            ps_hash: ps.data.hash,
            fetch: fetch.to_vec(),
            vertex_layout: streams.iter().map(|s| (s.stride, s.format)).collect(),
            patch: state.patch,
            color_formats,
            depth_format: depth.as_ref().map(|d| d.format),
        };
        let pipeline = self
            .pipelines
            .get_or_create(&key, || Pipeline::build(&device, &key, &vs, &ps, state.clone()))?;

        let (target_w, target_h) = colors
            .first()
            .map(|c| (c.width, c.height))
            .or(depth.as_ref().map(|d| (d.width, d.height)))
            .unwrap_or((1, 1));
        let viewport = match state.viewport {
            Some(vp) => {
                let x = vp.x.clamp(0.0, target_w as f32);
                let y = vp.y.clamp(0.0, target_h as f32);
                let w = vp.width.min(target_w as f32 - x);
                let h = vp.height.min(target_h as f32 - y);
                if w <= 0.0 || h <= 0.0 {
                    log::trace!("Skipping draw with empty viewport");
                    return Ok(());
                }
                Some((x, y, w, h, vp.min_depth, vp.max_depth))
            }
            None => None,
        };

        let plan = DrawPlan {
            state,
            pipeline,
            streams,
            colors,
            depth,
            slots,
            viewport,
            vs_user_data,
            ps_user_data,
        };
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let submitted = self
            .record(ctx, call, &plan)
            .map(|commands| self.res.queue.submit(Some(commands)));
        let validation = pollster::block_on(device.pop_error_scope());
        submitted?;
        if let Some(e) = validation {
            return Err(GpuError::Resource(format!(
                "draw with VS {:016X} / PS {:016X} failed validation: {}",
                key.vs_hash, key.ps_hash, e
            )));
        }
        self.draws += 1;
        Ok(())
    }

    /// Encode the render pass of one draw
    fn record(&mut self, ctx: &GpuContext, call: DrawCall, plan: &DrawPlan) -> Result<wgpu::CommandBuffer> {
        let DrawPlan {
            state,
            pipeline,
            streams,
            colors,
            depth,
            ..
        } = plan;
        let memory = ctx.memory();

        let mut encoder = self.res.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("guest draw"),
        });

        // Targets first, so textures sampled from them see this draw
        let mut color_views: Vec<Option<(wgpu::TextureView, LoadAction)>> = vec![];
        color_views.resize_with(plan.slots, || None);
        for c in colors {
            let target = self.res.textures.get_render_target(&c.texture_desc())?;
            let load = self.res.targets.use_target(c.address);
            self.res.textures.transition_target(c.address, ImageLayout::ColorAttachment)?;
            color_views[c.index] = Some((target.texture.create_view(&Default::default()), load));
        }
        let depth_view = match depth {
            Some(d) => {
                let target = self.res.textures.get_render_target(&d.texture_desc())?;
                let load = self.res.targets.use_target(d.address);
                Some((target.texture.create_view(&Default::default()), load, d))
            }
            None => None,
        };

        let vs_bindings = pipeline.upload_buffers_and_textures(
            ShaderStage::Vertex,
            &plan.vs_user_data,
            memory,
            &mut self.res,
            &mut encoder,
        )?;
        let ps_bindings = pipeline.upload_buffers_and_textures(
            ShaderStage::Pixel,
            &plan.ps_user_data,
            memory,
            &mut self.res,
            &mut encoder,
        )?;
        for c in colors {
            self.res.textures.transition_target(c.address, ImageLayout::ColorAttachment)?;
        }

        let vertex_buffers = gather_vertices(&mut self.res.buffers, streams)?;
        let mut push = PushConstants {
            vs_strides: vs_bindings.strides,
            ps_strides: ps_bindings.strides,
            ..Default::default()
        };
        let patch_bindings = match state.patch {
            Some(_) => {
                let bindings = pipeline.upload_patch_streams(&self.res.device, streams, &vertex_buffers)?;
                push.patch_strides = bindings.strides;
                push.patch_offsets = bindings.offsets;
                Some(bindings)
            }
            None => None,
        };
        let (vertices, instances) = call.ranges()?;
        let index_buffer = match call.index {
            Some(range) => Some(self.res.buffers.get_buffer(range.address, range.size)?),
            None => None,
        };

        let attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_views
            .iter()
            .map(|slot| {
                slot.as_ref().map(|(view, load)| wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match load {
                            LoadAction::Clear => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            LoadAction::Load => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment = depth_view.as_ref().map(|(view, load, d)| {
            let clear = *load == LoadAction::Clear;
            wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(d.clear_depth)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: d.format.has_stencil_aspect().then(|| wgpu::Operations {
                    load: if clear { wgpu::LoadOp::Clear(0) } else { wgpu::LoadOp::Load },
                    store: wgpu::StoreOp::Store,
                }),
            }
        });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("guest pass"),
                color_attachments: &attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline.render);
            pass.set_bind_group(0, &vs_bindings.bind_group, &[]);
            pass.set_bind_group(1, &ps_bindings.bind_group, &[]);
            if let Some(bindings) = &patch_bindings {
                pass.set_bind_group(2, &bindings.bind_group, &[]);
            }
            pass.set_push_constants(wgpu::ShaderStages::VERTEX_FRAGMENT, 0, bytemuck::bytes_of(&push));

            if let Some((x, y, w, h, min_depth, max_depth)) = plan.viewport {
                pass.set_viewport(x, y, w, h, min_depth, max_depth);
            }
            if let Some(stencil) = &state.stencil {
                pass.set_stencil_reference(stencil.reference);
            }
            pass.set_blend_constant(state.blend_constant);

            match (&index_buffer, call.index) {
                (Some(buffer), Some(range)) => {
                    let format = match ctx.draw.index_type.size() {
                        2 => wgpu::IndexFormat::Uint16,
                        _ => wgpu::IndexFormat::Uint32,
                    };
                    pass.set_index_buffer(
                        buffer.buffer.slice(buffer.offset..buffer.offset + range.size),
                        format,
                    );
                    for (slot, vb) in vertex_buffers.iter().enumerate() {
                        pass.set_vertex_buffer(slot as u32, vb.buffer.slice(vb.offset..));
                    }
                    pass.draw_indexed(vertices, range.base_vertex, instances);
                }
                _ => match state.patch {
                    Some(_) => {
                        let count = state.host_vertex_count(call.vertex_count);
                        pass.draw(0..count, instances);
                    }
                    None => {
                        for (slot, vb) in vertex_buffers.iter().enumerate() {
                            pass.set_vertex_buffer(slot as u32, vb.buffer.slice(vb.offset..));
                        }
                        pass.draw(vertices, instances);
                    }
                },
            }
        }

        Ok(encoder.finish())
    }
}

impl Renderer for WgpuRenderer {
    fn init(&mut self, _ctx: &GpuContext) -> Result<()> {
        log::info!("wgpu renderer ready on {}", self.adapter);
        Ok(())
    }

    fn draw(&mut self, ctx: &GpuContext, count: u32, index_ptr: u64) -> Result<()> {
        let index = (index_ptr != 0).then(|| IndexRange {
            address: index_ptr,
            size: count as u64 * ctx.draw.index_type.size() as u64,
            first_index: 0,
            base_vertex: 0,
        });
        self.execute(
            ctx,
            DrawCall {
                vertex_count: count,
                instance_count: ctx.draw.num_instances.max(1),
                first_vertex: 0,
                first_instance: 0,
                index,
            },
        )
    }

    fn draw_indirect(
        &mut self,
        ctx: &GpuContext,
        count: u32,
        is_indexed: bool,
        args_ptr: u64,
        index_ptr: u64,
        max_size: u32,
    ) -> Result<()> {
        let memory = ctx.memory();
        let stride = if is_indexed { DRAW_INDEXED_ARGS_SIZE } else { DRAW_ARGS_SIZE };
        let index_size = ctx.draw.index_type.size() as u64;

        for n in 0..count.max(1) as u64 {
            let args = memory.read_dwords(args_ptr + n * stride, (stride / 4) as usize)?;
            let call = if is_indexed {
                let (index_count, first_index) = (args[0], args[2]);
                let indices = if max_size != 0 {
                    max_size as u64
                } else {
                    first_index as u64 + index_count as u64
                };
                DrawCall {
                    vertex_count: index_count,
                    instance_count: args[1],
                    first_vertex: 0,
                    first_instance: args[4],
                    index: Some(IndexRange {
                        address: index_ptr,
                        size: indices * index_size,
                        first_index,
                        base_vertex: args[3] as i32,
                    }),
                }
            } else {
                DrawCall {
                    vertex_count: args[0],
                    instance_count: args[1],
                    first_vertex: args[2],
                    first_instance: args[3],
                    index: None,
                }
            };
            if call.vertex_count == 0 || call.instance_count == 0 {
                continue;
            }
            self.execute(ctx, call)?;
        }
        Ok(())
    }

    fn flip(&mut self, _ctx: &GpuContext, buffer: &DisplayBuffer) -> Result<()> {
        self.frames += 1;
        self.presented = self
            .res
            .textures
            .render_target(buffer.address)
            .map(|target| target.desc.clone());
        match &self.presented {
            Some(desc) => log::debug!(
                "Flip {}: presenting {}x{} {:?} from 0x{:X} after {} draws",
                self.frames,
                desc.width,
                desc.height,
                desc.format,
                buffer.address,
                self.draws
            ),
            None => log::debug!(
                "Flip {}: display buffer 0x{:X} was never rendered",
                self.frames,
                buffer.address
            ),
        }
        if let Err(e) = self.res.device.poll(wgpu::PollType::Poll) {
            log::warn!("Device poll failed: {}", e);
        }
        Ok(())
    }

    fn begin_frame(&mut self) {
        self.res.begin_frame();
        self.draws = 0;
    }
}

fn align4(size: u64) -> u64 {
    (size + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(first_vertex: u32, first_instance: u32) -> DrawCall {
        DrawCall {
            vertex_count: 3,
            instance_count: 1,
            first_vertex,
            first_instance,
            index: None,
        }
    }

    #[test]
    fn test_draw_ranges() {
        assert_eq!(direct(6, 2).ranges().unwrap(), (6..9, 2..3));

        let indexed = DrawCall {
            index: Some(IndexRange {
                address: 0x1000,
                size: 64,
                first_index: 10,
                base_vertex: -4,
            }),
            ..direct(0, 0)
        };
        assert_eq!(indexed.ranges().unwrap(), (10..13, 0..1));
    }

    #[test]
    fn test_guest_draw_ranges_that_overflow_are_rejected() {
        assert!(matches!(direct(0, u32::MAX).ranges(), Err(GpuError::Resource(_))));
        assert!(matches!(direct(u32::MAX - 1, 0).ranges(), Err(GpuError::Resource(_))));

        let indexed = DrawCall {
            index: Some(IndexRange {
                address: 0x1000,
                size: 64,
                first_index: u32::MAX,
                base_vertex: 0,
            }),
            ..direct(0, 0)
        };
        assert!(indexed.ranges().is_err());
    }
}
