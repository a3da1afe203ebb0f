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

//! Memory, synchronization and draw packet tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::core::error::GpuError;
use crate::core::gpu::events::EventKind;
use crate::core::gpu::IndexType;
use crate::core::memory::GuestMemory;
use crate::core::pm4::builder::{DmaDest, DmaSource, EopData};
use crate::core::pm4::{
    CommandProcessor, ConstantEngineHost, PacketIter, PacketWriter, WaitFunction, CONST_RAM_SIZE,
};
use crate::core::renderer::{RecordingRenderer, RenderCall};
use crate::core::test_support::{context, MEM_BASE};

fn run(pw: &PacketWriter) -> (RecordingRenderer, Arc<crate::core::memory::FlatMemory>) {
    let (mut ctx, flat) = context();
    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();
    (renderer, flat)
}

#[test]
fn test_flip_label_nop_writes_value() {
    let mut pw = PacketWriter::new();
    pw.flip_with_label(MEM_BASE + 0x40, 0x1234);
    let (_, flat) = run(&pw);
    assert_eq!(flat.read_u32(MEM_BASE + 0x40).unwrap(), 0x1234);
}

#[test]
fn test_plain_nop_writes_nothing() {
    let mut pw = PacketWriter::new();
    pw.packet(crate::core::pm4::Opcode::Nop, &[0x1111, (MEM_BASE + 0x40) as u32, 0, 5]);
    let (_, flat) = run(&pw);
    assert_eq!(flat.read_u32(MEM_BASE + 0x40).unwrap(), 0);
}

#[test]
fn test_write_data_to_memory_and_registers() {
    let mut pw = PacketWriter::new();
    pw.write_data_mem(MEM_BASE + 0x100, &[1, 2, 3])
        .write_data_reg(0xA08E, &[0xF]);

    let (mut ctx, flat) = context();
    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();

    assert_eq!(flat.read_dwords(MEM_BASE + 0x100, 3).unwrap(), vec![1, 2, 3]);
    assert_eq!(ctx.regs.read(0xA08E), 0xF);
}

#[test]
fn test_mem_semaphore_signal() {
    let mut pw = PacketWriter::new();
    pw.mem_semaphore_signal(MEM_BASE + 0x8, true)
        .mem_semaphore_signal(MEM_BASE + 0x8, true)
        .mem_semaphore_signal(MEM_BASE + 0x10, false);
    let (_, flat) = run(&pw);
    assert_eq!(flat.read_u64(MEM_BASE + 0x8).unwrap(), 2);
    assert_eq!(flat.read_u64(MEM_BASE + 0x10).unwrap(), 1);
}

#[test]
fn test_mem_semaphore_wait_passes_when_set() {
    let (mut ctx, flat) = context();
    flat.write_u64(MEM_BASE + 0x8, 1).unwrap();
    let mut pw = PacketWriter::new();
    pw.mem_semaphore_wait(MEM_BASE + 0x8);
    let mut renderer = RecordingRenderer::default();
    assert!(CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .is_ok());
}

#[test]
fn test_wait_reg_mem_blocks_until_memory_matches() {
    let (mut ctx, flat) = context();
    let fence = MEM_BASE + 0x200;

    let writer = {
        let flat = Arc::clone(&flat);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            flat.write_u32(fence, 0x0000_0107).unwrap();
        })
    };

    let mut pw = PacketWriter::new();
    pw.wait_reg_mem(WaitFunction::Equal, true, fence, 0x7, 0xFF, 100)
        .write_data_mem(MEM_BASE + 0x204, &[0xDEAD]);

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();
    writer.join().unwrap();

    // The write after the wait only happens once the fence matched
    assert_eq!(flat.read_u32(fence).unwrap(), 0x107);
    assert_eq!(flat.read_u32(MEM_BASE + 0x204).unwrap(), 0xDEAD);
}

#[test]
fn test_event_write_eop_writes_fence_and_signals() {
    let (mut ctx, flat) = context();
    let seen = Arc::new(AtomicU64::new(0));
    {
        let seen = Arc::clone(&seen);
        ctx.events().register(
            EventKind::EndOfPipe,
            Arc::new(move |v| seen.store(v, Ordering::SeqCst)),
        );
    }

    let mut pw = PacketWriter::new();
    pw.event_write_eop(MEM_BASE + 0x20, EopData::Data64(0x1_0000_0002), true)
        .event_write_eop(MEM_BASE + 0x30, EopData::Data32(9), false);

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();

    assert_eq!(flat.read_u64(MEM_BASE + 0x20).unwrap(), 0x1_0000_0002);
    assert_eq!(flat.read_u32(MEM_BASE + 0x30).unwrap(), 9);
    assert_eq!(seen.load(Ordering::SeqCst), 0x1_0000_0002);
}

#[test]
fn test_event_write_eos_from_gds() {
    let (mut ctx, flat) = context();
    ctx.gds[8..12].copy_from_slice(&0xABCDu32.to_le_bytes());

    let mut pw = PacketWriter::new();
    pw.event_write_eos_gds(MEM_BASE + 0x60, 2, 1)
        .event_write_eos(MEM_BASE + 0x64, 77);

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();
    assert_eq!(flat.read_u32(MEM_BASE + 0x60).unwrap(), 0xABCD);
    assert_eq!(flat.read_u32(MEM_BASE + 0x64).unwrap(), 77);
}

#[test]
fn test_dma_data_fill_copy_and_gds() {
    let (mut ctx, flat) = context();
    let mut pw = PacketWriter::new();
    pw.dma_data(DmaSource::Data(0x5A5A_5A5A), DmaDest::Memory(MEM_BASE + 0x400), 16)
        .dma_data(DmaSource::Memory(MEM_BASE + 0x400), DmaDest::Gds(0x10), 8)
        .dma_data(DmaSource::Gds(0x10), DmaDest::MemoryL2(MEM_BASE + 0x500), 8);

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();

    assert_eq!(flat.read_dwords(MEM_BASE + 0x400, 4).unwrap(), vec![0x5A5A_5A5A; 4]);
    assert_eq!(&ctx.gds[0x10..0x18], &[0x5A; 8]);
    assert_eq!(flat.read_dwords(MEM_BASE + 0x500, 3).unwrap(), vec![0x5A5A_5A5A, 0x5A5A_5A5A, 0]);
}

#[test]
fn test_dma_data_gds_out_of_range() {
    let mut pw = PacketWriter::new();
    pw.dma_data(DmaSource::Data(0), DmaDest::Gds(0xFFF0), 0x20);
    let (mut ctx, _) = context();
    let mut renderer = RecordingRenderer::default();
    let result = CommandProcessor::new().process(&mut ctx, &mut renderer, pw.as_slice());
    assert!(matches!(result, Err(GpuError::Memory(_))));
}

#[test]
fn test_indirect_buffer_runs_in_place() {
    let (mut ctx, flat) = context();

    let mut inner = PacketWriter::new();
    inner.write_data_mem(MEM_BASE + 0x700, &[1]).draw_index_auto(6);
    let inner_addr = MEM_BASE + 0x1000;
    flat.write_dwords(inner_addr, inner.as_slice()).unwrap();

    let mut pw = PacketWriter::new();
    pw.draw_index_auto(3)
        .indirect_buffer(inner_addr, inner.len() as u32)
        .draw_index_auto(9);

    let mut renderer = RecordingRenderer::default();
    let stats = CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();

    let counts: Vec<u32> = renderer.draws().iter().map(|d| d.0).collect();
    assert_eq!(counts, vec![3, 6, 9]);
    assert_eq!(stats.draws, 3);
    assert_eq!(flat.read_u32(MEM_BASE + 0x700).unwrap(), 1);
}

#[test]
fn test_indirect_buffer_recursion_limit() {
    let (mut ctx, flat) = context();
    let addr = MEM_BASE + 0x2000;
    let mut pw = PacketWriter::new();
    pw.indirect_buffer(addr, 4);
    flat.write_dwords(addr, pw.as_slice()).unwrap();

    let mut renderer = RecordingRenderer::default();
    let result = CommandProcessor::new().process(&mut ctx, &mut renderer, pw.as_slice());
    assert!(matches!(result, Err(GpuError::Unimplemented(_))));
}

#[test]
fn test_indexed_draw_state_latches() {
    let (mut ctx, _) = context();
    let mut pw = PacketWriter::new();
    pw.index_type(1)
        .index_base(MEM_BASE + 0x800)
        .index_buffer_size(36)
        .num_instances(2)
        .set_indirect_base(MEM_BASE + 0x900)
        .draw_index_2(36, MEM_BASE + 0x800, 36)
        .draw_index_indirect(0x10);

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .process(&mut ctx, &mut renderer, pw.as_slice())
        .unwrap();

    assert_eq!(ctx.draw.index_type, IndexType::U32);
    assert_eq!(ctx.draw.num_instances, 2);
    assert_eq!(
        renderer.calls,
        vec![
            RenderCall::Draw {
                count: 36,
                index_ptr: MEM_BASE + 0x800
            },
            RenderCall::DrawIndirect {
                count: 1,
                is_indexed: true,
                args_ptr: MEM_BASE + 0x910,
                index_ptr: MEM_BASE + 0x800,
                max_size: 36,
            },
        ]
    );
}

#[test]
fn test_submit_orders_de_after_ce() {
    let (mut ctx, flat) = context();
    let mut ce = ConstantEngineHost::new(ctx.memory_arc(), Arc::clone(ctx.sync()));

    let mut ccb = PacketWriter::new();
    ccb.write_const_ram(0, &[99])
        .dump_const_ram(0, 1, MEM_BASE + 0x300)
        .increment_ce_counter();

    let mut dcb = PacketWriter::new();
    dcb.wait_on_ce_counter()
        .dma_data(DmaSource::Memory(MEM_BASE + 0x300), DmaDest::Memory(MEM_BASE + 0x304), 4)
        .increment_de_counter();

    let mut renderer = RecordingRenderer::default();
    CommandProcessor::new()
        .submit(&mut ctx, &mut renderer, &mut ce, dcb.as_slice(), Some(ccb.finish()))
        .unwrap();

    assert_eq!(flat.read_u32(MEM_BASE + 0x304).unwrap(), 99);
    let counters = ctx.sync().snapshot();
    assert_eq!((counters.ce, counters.de), (1, 1));
    assert!(!ce.is_running());
}

#[test]
fn test_submit_ce_failure_releases_waiting_de() {
    let (mut ctx, _flat) = context();
    let mut ce = ConstantEngineHost::new(ctx.memory_arc(), Arc::clone(ctx.sync()));

    // Overruns constant RAM before the counter is ever incremented
    let mut ccb = PacketWriter::new();
    ccb.write_const_ram(CONST_RAM_SIZE as u32 - 4, &[1, 2])
        .increment_ce_counter();

    let mut dcb = PacketWriter::new();
    dcb.wait_on_ce_counter().increment_de_counter();

    let mut renderer = RecordingRenderer::default();
    let mut cp = CommandProcessor::new();
    let err = cp
        .submit(&mut ctx, &mut renderer, &mut ce, dcb.as_slice(), Some(ccb.finish()))
        .unwrap_err();
    assert!(matches!(err, GpuError::EngineAborted { .. }), "{err}");
    assert_eq!(ctx.sync().snapshot().de, 0);
    assert!(!ce.is_running());

    // The next submission starts from a clean handshake
    let mut ccb = PacketWriter::new();
    ccb.increment_ce_counter();
    cp.submit(&mut ctx, &mut renderer, &mut ce, dcb.as_slice(), Some(ccb.finish()))
        .unwrap();
    let counters = ctx.sync().snapshot();
    assert_eq!((counters.ce, counters.de), (1, 1));
}

#[test]
fn test_submit_de_failure_releases_waiting_ce() {
    let (mut ctx, _flat) = context();
    let mut ce = ConstantEngineHost::new(ctx.memory_arc(), Arc::clone(ctx.sync()));

    // Blocks until the DE falls behind, which never happens
    let mut ccb = PacketWriter::new();
    ccb.increment_ce_counter().wait_on_de_counter_diff(0);

    let mut dcb = PacketWriter::new();
    dcb.increment_de_counter();
    let mut words = dcb.finish();
    words.push(0xC000_1000);

    let mut renderer = RecordingRenderer::default();
    let err = CommandProcessor::new()
        .submit(&mut ctx, &mut renderer, &mut ce, &words, Some(ccb.finish()))
        .unwrap_err();
    assert!(matches!(err, GpuError::TruncatedPacket { offset: 2, .. }), "{err}");
    assert!(!ce.is_running());
}

#[test]
fn test_truncated_type0_packet_is_an_error() {
    let mut pw = PacketWriter::new();
    pw.nop(1).type0(0x100, 3);
    let mut words = pw.finish();
    // Header at dword 2 claims 4 payload dwords; keep two
    words.truncate(5);

    let mut iter = PacketIter::new(&words);
    assert!(iter.next().unwrap().is_ok());
    let err = iter.next().unwrap().unwrap_err();
    assert!(matches!(
        err,
        GpuError::TruncatedPacket {
            offset: 2,
            needed: 5,
            available: 3
        }
    ));
    assert!(iter.next().is_none());

    let (mut ctx, _) = context();
    let mut renderer = RecordingRenderer::default();
    let err = CommandProcessor::new()
        .process(&mut ctx, &mut renderer, &words)
        .unwrap_err();
    assert!(matches!(err, GpuError::TruncatedPacket { offset: 2, .. }));
}

#[test]
fn test_truncated_type3_packet_is_an_error() {
    let mut pw = PacketWriter::new();
    pw.nop(4);
    let mut words = pw.finish();
    words.truncate(3);

    let mut iter = PacketIter::new(&words);
    let err = iter.next().unwrap().unwrap_err();
    assert!(matches!(
        err,
        GpuError::TruncatedPacket {
            offset: 0,
            needed: 5,
            available: 3
        }
    ));
    assert!(iter.next().is_none());
}
