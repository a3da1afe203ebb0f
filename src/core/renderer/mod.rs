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

//! Renderer interface
//!
//! The command processor hands every draw to a [`Renderer`] together with the
//! GPU context, so the renderer reads the register file exactly as it stands
//! at the draw packet. Flips arrive separately from the queue.

pub mod context;
pub mod pipeline;
pub mod render_target;
pub mod state;
pub mod tessellation;
pub mod wgpu_backend;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::gpu::GpuContext;

pub use context::RenderContext;
pub use state::FixedFunctionState;
pub use wgpu_backend::WgpuRenderer;

/// Display buffer registered with video out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBuffer {
    pub address: u64,
    pub width: u32,
    pub height: u32,
    /// Row pitch in pixels
    pub pitch: u32,
    /// Video-out pixel format code
    pub format: u32,
}

/// Consumer of draws and flips
pub trait Renderer: Send {
    /// Prepare host resources; called once on the GPU thread
    fn init(&mut self, _ctx: &GpuContext) -> Result<()> {
        Ok(())
    }

    /// Draw `count` vertices, indexed when `index_ptr` is non-zero
    fn draw(&mut self, ctx: &GpuContext, count: u32, index_ptr: u64) -> Result<()>;

    /// Draw with arguments stored in guest memory at `args_ptr`
    fn draw_indirect(
        &mut self,
        ctx: &GpuContext,
        count: u32,
        is_indexed: bool,
        args_ptr: u64,
        index_ptr: u64,
        max_size: u32,
    ) -> Result<()>;

    /// Present `buffer`
    fn flip(&mut self, ctx: &GpuContext, buffer: &DisplayBuffer) -> Result<()>;

    /// Start a new frame, releasing per-frame allocations
    fn begin_frame(&mut self) {}
}

/// Renderer that discards everything
#[derive(Debug, Default)]
pub struct NullRenderer {
    pub draws: u64,
    pub flips: u64,
}

impl Renderer for NullRenderer {
    fn draw(&mut self, _ctx: &GpuContext, _count: u32, _index_ptr: u64) -> Result<()> {
        self.draws += 1;
        Ok(())
    }

    fn draw_indirect(
        &mut self,
        _ctx: &GpuContext,
        _count: u32,
        _is_indexed: bool,
        _args_ptr: u64,
        _index_ptr: u64,
        _max_size: u32,
    ) -> Result<()> {
        self.draws += 1;
        Ok(())
    }

    fn flip(&mut self, _ctx: &GpuContext, _buffer: &DisplayBuffer) -> Result<()> {
        self.flips += 1;
        Ok(())
    }
}

/// Call observed by [`RecordingRenderer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCall {
    Init,
    Draw {
        count: u32,
        index_ptr: u64,
    },
    DrawIndirect {
        count: u32,
        is_indexed: bool,
        args_ptr: u64,
        index_ptr: u64,
        max_size: u32,
    },
    Flip {
        address: u64,
    },
    BeginFrame,
}

/// Renderer that records its calls
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub calls: Vec<RenderCall>,
    /// `VGT_PRIMITIVE_TYPE` seen by each draw
    pub primitive_types: Vec<u32>,
}

impl RecordingRenderer {
    /// `(count, index_ptr)` of each direct draw
    pub fn draws(&self) -> Vec<(u32, u64)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                RenderCall::Draw { count, index_ptr } => Some((*count, *index_ptr)),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn init(&mut self, _ctx: &GpuContext) -> Result<()> {
        self.calls.push(RenderCall::Init);
        Ok(())
    }

    fn draw(&mut self, ctx: &GpuContext, count: u32, index_ptr: u64) -> Result<()> {
        self.primitive_types.push(ctx.regs.primitive_type());
        self.calls.push(RenderCall::Draw { count, index_ptr });
        Ok(())
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
        self.primitive_types.push(ctx.regs.primitive_type());
        self.calls.push(RenderCall::DrawIndirect {
            count,
            is_indexed,
            args_ptr,
            index_ptr,
            max_size,
        });
        Ok(())
    }

    fn flip(&mut self, _ctx: &GpuContext, buffer: &DisplayBuffer) -> Result<()> {
        self.calls.push(RenderCall::Flip {
            address: buffer.address,
        });
        Ok(())
    }

    fn begin_frame(&mut self) {
        self.calls.push(RenderCall::BeginFrame);
    }
}
