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

//! Renderer tests

mod pipeline;
mod state;
mod target;
mod tessellation;

use super::{DisplayBuffer, NullRenderer, RecordingRenderer, RenderCall, Renderer};
use crate::core::gpu::registers::VGT_PRIMITIVE_TYPE;
use crate::core::test_support::context;

/// Parse and validate generated WGSL, panicking with the source on failure
pub(super) fn validate_wgsl(source: &str) {
    let module = naga::front::wgsl::parse_str(source)
        .unwrap_or_else(|e| panic!("{}\n{}", e.emit_to_string(source), source));
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .unwrap_or_else(|e| panic!("{:?}\n{}", e, source));
}

fn display(address: u64) -> DisplayBuffer {
    DisplayBuffer {
        address,
        width: 1920,
        height: 1080,
        pitch: 1920,
        format: 0,
    }
}

#[test]
fn test_null_renderer_counts() {
    let (ctx, _) = context();
    let mut renderer = NullRenderer::default();
    renderer.init(&ctx).unwrap();
    renderer.draw(&ctx, 3, 0).unwrap();
    renderer.draw_indirect(&ctx, 1, true, 0x1000, 0x2000, 6).unwrap();
    renderer.flip(&ctx, &display(0x8000)).unwrap();
    renderer.begin_frame();

    assert_eq!(renderer.draws, 2);
    assert_eq!(renderer.flips, 1);
}

#[test]
fn test_recording_renderer_sees_register_state() {
    let (mut ctx, _) = context();
    let mut renderer = RecordingRenderer::default();

    ctx.regs.write(VGT_PRIMITIVE_TYPE, 0x4).unwrap();
    renderer.draw(&ctx, 3, 0).unwrap();
    ctx.regs.write(VGT_PRIMITIVE_TYPE, 0x11).unwrap();
    renderer.draw(&ctx, 6, 0x4000).unwrap();
    renderer.flip(&ctx, &display(0x8000)).unwrap();
    renderer.begin_frame();

    assert_eq!(renderer.draws(), vec![(3, 0), (6, 0x4000)]);
    assert_eq!(renderer.primitive_types, vec![0x4, 0x11]);
    assert_eq!(
        &renderer.calls[2..],
        &[RenderCall::Flip { address: 0x8000 }, RenderCall::BeginFrame]
    );
}
