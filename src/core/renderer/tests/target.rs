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
use crate::core::renderer::render_target::*;
use crate::core::test_support::context;

#[test]
fn test_color_format_mapping() {
    use color_fmt::*;
    use number_type::*;
    assert_eq!(
        color_format(COLOR_8_8_8_8, UNORM, 0).unwrap(),
        wgpu::TextureFormat::Rgba8Unorm
    );
    assert_eq!(
        color_format(COLOR_8_8_8_8, UNORM, 1).unwrap(),
        wgpu::TextureFormat::Bgra8Unorm
    );
    assert_eq!(
        color_format(COLOR_8_8_8_8, SRGB, 1).unwrap(),
        wgpu::TextureFormat::Bgra8UnormSrgb
    );
    assert_eq!(
        color_format(COLOR_16_16_16_16, FLOAT, 0).unwrap(),
        wgpu::TextureFormat::Rgba16Float
    );
    assert!(matches!(
        color_format(COLOR_11_11_10, SINT, 0),
        Err(GpuError::InvalidEnum { .. })
    ));
}

#[test]
fn test_depth_format_mapping() {
    assert_eq!(depth_format(1, false).unwrap(), wgpu::TextureFormat::Depth16Unorm);
    assert_eq!(depth_format(3, false).unwrap(), wgpu::TextureFormat::Depth32Float);
    assert_eq!(
        depth_format(1, true).unwrap(),
        wgpu::TextureFormat::Depth24PlusStencil8
    );
    assert!(depth_format(2, false).is_err());
}

#[test]
fn test_color_target_prefers_size_hint() {
    let (mut ctx, _) = context();
    ctx.regs.write(CB_COLOR0_BASE, 0x1000).unwrap();
    ctx.regs.write(CB_COLOR0_PITCH, 1920 / 8 - 1).unwrap();
    ctx.regs.write(CB_COLOR0_SLICE, 1920 * 1152 / 64 - 1).unwrap();
    ctx.regs.write(CB_COLOR0_INFO, color_fmt::COLOR_8_8_8_8 << 2).unwrap();

    let target = ColorTargetDesc::from_registers(&ctx, 0).unwrap().unwrap();
    assert_eq!(target.address, 0x10_0000);
    assert_eq!((target.width, target.height), (1920, 1152));
    assert_eq!(target.format, wgpu::TextureFormat::Rgba8Unorm);

    ctx.target_hints[0] = Some((1920, 1080));
    let target = ColorTargetDesc::from_registers(&ctx, 0).unwrap().unwrap();
    assert_eq!((target.width, target.height), (1920, 1080));

    let desc = target.texture_desc();
    assert!(desc.render_target);
    assert_eq!(desc.address, 0x10_0000);

    assert!(ColorTargetDesc::from_registers(&ctx, 1).unwrap().is_none());
    let all = color_targets(&ctx).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].index, 0);
}

#[test]
fn test_depth_target_from_registers() {
    let (mut ctx, _) = context();
    assert!(DepthTargetDesc::from_registers(&ctx).unwrap().is_none());

    ctx.regs.write(DB_Z_INFO, 3).unwrap();
    ctx.regs.write(DB_Z_WRITE_BASE, 0x2000).unwrap();
    ctx.regs
        .write(DB_DEPTH_SIZE, (1280 / 8 - 1) | (720 / 8 - 1) << 11)
        .unwrap();
    ctx.regs.write(DB_DEPTH_CLEAR, 1.0f32.to_bits()).unwrap();

    let depth = DepthTargetDesc::from_registers(&ctx).unwrap().unwrap();
    assert_eq!(depth.address, 0x20_0000);
    assert_eq!((depth.width, depth.height), (1280, 720));
    assert_eq!(depth.format, wgpu::TextureFormat::Depth32Float);
    assert_eq!(depth.clear_depth, 1.0);
    assert!(depth.texture_desc().is_depth());
}

#[test]
fn test_first_use_clears_then_loads() {
    let mut targets = FrameTargets::new();
    assert_eq!(targets.use_target(0x1000), LoadAction::Clear);
    assert_eq!(targets.use_target(0x1000), LoadAction::Load);
    assert_eq!(targets.use_target(0x2000), LoadAction::Clear);

    targets.begin_frame();
    assert!(!targets.was_targeted(0x1000));
    assert_eq!(targets.use_target(0x1000), LoadAction::Clear);
}

#[test]
fn test_feedback_loop_detection() {
    let mut targets = FrameTargets::new();
    assert!(!targets.note_sampled(0x1000));
    assert!(!targets.is_feedback(0x1000));

    // Sampled earlier in the frame, then drawn into
    targets.use_target(0x1000);
    assert!(targets.is_feedback(0x1000));

    targets.begin_frame();
    targets.use_target(0x1000);
    assert!(!targets.is_feedback(0x1000));
    assert!(targets.note_sampled(0x1000));
    assert!(targets.is_feedback(0x1000));
}
