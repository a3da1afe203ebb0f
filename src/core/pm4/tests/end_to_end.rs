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

//! Register programming through to renderer draws

use crate::core::gpu::registers::{
    CB_COLOR0_BASE, CB_COLOR_STRIDE, SPI_SHADER_PGM_LO_VS, VGT_PRIMITIVE_TYPE,
};
use crate::core::pm4::{CommandProcessor, PacketWriter};
use crate::core::renderer::{RecordingRenderer, RenderCall};
use crate::core::test_support::context;

/// CB_COLORn block for a `width`x`height` RGBA8 target
///
/// Height is padded to the 128-row macro tile the driver allocates, so a
/// 1080-row target decodes as 1152 rows.
fn color_block(base: u64, width: u32, height: u32) -> [u32; 6] {
    let padded_height = height.div_ceil(128) * 128;
    [
        (base >> 8) as u32,
        width / 8 - 1,
        width * padded_height / 64 - 1,
        0,
        0xA << 2,
        0,
    ]
}

#[test]
fn test_target_hint_overrides_tile_rounded_size() {
    let (mut ctx, _) = context();

    let mut pw = PacketWriter::new();
    pw.set_context_reg(CB_COLOR0_BASE, &color_block(0x20_0000, 1920, 1080))
        .render_target_hint(1920, 1080)
        .draw_index_auto(3);

    let mut renderer = RecordingRenderer::default();
    let stats = CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();

    assert_eq!(ctx.regs.color_buffer(0).dimensions(), (1920, 1152));
    assert_eq!(ctx.color_target_dimensions(0), (1920, 1080));
    assert_eq!(
        renderer.calls,
        vec![RenderCall::Draw {
            count: 3,
            index_ptr: 0
        }]
    );
    assert_eq!(stats.draws, 1);
}

#[test]
fn test_hint_lands_on_the_written_target() {
    let (mut ctx, _) = context();
    let cb2 = CB_COLOR0_BASE + 2 * CB_COLOR_STRIDE;

    let mut pw = PacketWriter::new();
    pw.set_context_reg(cb2, &color_block(0x30_0000, 1280, 720))
        .render_target_hint(1280, 720);

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();

    assert_eq!(ctx.target_hints[0], None);
    assert_eq!(ctx.target_hints[2], Some((1280, 720)));
}

#[test]
fn test_hint_requires_adjacent_marker() {
    let (mut ctx, _) = context();

    let mut pw = PacketWriter::new();
    pw.set_context_reg(CB_COLOR0_BASE, &color_block(0x20_0000, 1920, 1080))
        .filler()
        .render_target_hint(1920, 1080);

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();
    assert_eq!(ctx.color_target_dimensions(0), (1920, 1152));
}

#[test]
fn test_non_target_context_writes_ignore_hint() {
    let (mut ctx, _) = context();

    let mut pw = PacketWriter::new();
    pw.set_context_reg(0xA08E, &[0xF]).render_target_hint(640, 480);

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();
    assert!(ctx.target_hints.iter().all(Option::is_none));
}

#[test]
fn test_draw_observes_registers_written_before_it() {
    let (mut ctx, _) = context();

    let mut pw = PacketWriter::new();
    pw.set_sh_reg(SPI_SHADER_PGM_LO_VS, &[0x1234, 0])
        .set_uconfig_reg(VGT_PRIMITIVE_TYPE, &[4])
        .draw_index_auto(6)
        .set_uconfig_reg(VGT_PRIMITIVE_TYPE, &[0x11])
        .draw_index_auto(4);

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();

    assert_eq!(renderer.primitive_types, vec![4, 0x11]);
    assert_eq!(ctx.regs.read(SPI_SHADER_PGM_LO_VS), 0x1234);
}
