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

//! Draw-engine command processor
//!
//! Walks a PM4 command buffer packet by packet, mutating the register file and
//! guest memory and driving the [`Renderer`] on draw packets. Shader and
//! buffer resolution happen lazily inside the renderer, against the register
//! state current at the draw.
//!
//! Failure policy: malformed packets, out-of-range register writes and
//! sub-modes that cannot be emulated faithfully abort the buffer with a
//! [`GpuError`]. Unknown opcodes and unhandled-but-harmless sub-cases are
//! logged and skipped.

use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::{ConstantEngineHost, Opcode, Packet, PacketIter, WaitFunction};
use super::{NOP_FLIP_MAGIC, TARGET_HINT_MARKER};
use crate::core::error::{invalid_enum, GpuError, Result};
use crate::core::gpu::events::EventKind;
use crate::core::gpu::registers::{
    CB_COLOR0_BASE, CB_COLOR_STRIDE, CONFIG_REG_BASE, CONTEXT_REG_BASE, MAX_COLOR_TARGETS,
    SH_REG_BASE, UCONFIG_REG_BASE,
};
use crate::core::gpu::{GpuContext, IndexType, GDS_SIZE};
use crate::core::memory::{GuestMemory, MemoryError};
use crate::core::renderer::Renderer;

/// Maximum `INDIRECT_BUFFER` nesting depth
pub const MAX_IB_DEPTH: u32 = 8;

/// Counters collected while processing a buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessStats {
    /// Packets executed (nested buffers included)
    pub packets: u64,
    /// Draw packets forwarded to the renderer
    pub draws: u64,
    /// Packets skipped as unknown or unhandled
    pub skipped: u64,
}

impl ProcessStats {
    fn merge(&mut self, other: ProcessStats) {
        self.packets += other.packets;
        self.draws += other.draws;
        self.skipped += other.skipped;
    }
}

/// Draw-engine PM4 interpreter
#[derive(Debug, Default)]
pub struct CommandProcessor {
    stats: ProcessStats,
}

fn gpu_clock() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

fn write_words(memory: &dyn GuestMemory, addr: u64, words: &[u32]) -> Result<()> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    memory.write_bytes(addr, &bytes)?;
    Ok(())
}

impl CommandProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals accumulated across every call on this processor
    pub fn stats(&self) -> ProcessStats {
        self.stats
    }

    /// Run one submission: the draw buffer plus an optional constant-engine buffer
    ///
    /// Counters are reset, the CE pass (if any) starts on its own thread, the
    /// draw buffer is interpreted here, and the CE pass is joined before
    /// returning. Either engine failing aborts the counters so the other
    /// cannot stay blocked on it. A draw-buffer error takes precedence over a
    /// CE error.
    pub fn submit(
        &mut self,
        ctx: &mut GpuContext,
        renderer: &mut dyn Renderer,
        ce: &mut ConstantEngineHost,
        dcb: &[u32],
        ccb: Option<Vec<u32>>,
    ) -> Result<ProcessStats> {
        ce.join()?;
        ctx.sync().reset();

        if let Some(ccb) = ccb {
            ce.start(ccb)?;
        }

        let result = self.process(ctx, renderer, dcb);
        if result.is_err() {
            ctx.sync().abort();
        }
        let ce_result = ce.join();
        let stats = result?;
        ce_result?;
        Ok(stats)
    }

    /// Interpret a draw command buffer
    pub fn process(
        &mut self,
        ctx: &mut GpuContext,
        renderer: &mut dyn Renderer,
        words: &[u32],
    ) -> Result<ProcessStats> {
        let mut stats = ProcessStats::default();
        let result = self.execute(ctx, renderer, words, 0, &mut stats);
        self.stats.merge(stats);
        if let Err(ref e) = result {
            log::error!("PM4 processing aborted: {}", e);
        }
        result.map(|_| stats)
    }

    /// Interpret a command buffer located in guest memory
    pub fn process_at(
        &mut self,
        ctx: &mut GpuContext,
        renderer: &mut dyn Renderer,
        addr: u64,
        size_dwords: usize,
    ) -> Result<ProcessStats> {
        let words = ctx.memory().read_dwords(addr, size_dwords)?;
        self.process(ctx, renderer, &words)
    }

    fn execute(
        &mut self,
        ctx: &mut GpuContext,
        renderer: &mut dyn Renderer,
        words: &[u32],
        depth: u32,
        stats: &mut ProcessStats,
    ) -> Result<()> {
        for packet in PacketIter::new(words) {
            let packet = packet?;
            stats.packets += 1;

            if packet.header.packet_type == 0 {
                log::trace!(
                    "Skipping type-0 packet at dword {} ({} dwords)",
                    packet.offset,
                    packet.header.size()
                );
                continue;
            }

            match packet.opcode() {
                Some(op) => self.dispatch(ctx, renderer, op, &packet, depth, stats)?,
                None => {
                    log::warn!(
                        "Unknown PM4 opcode 0x{:02X} at dword {}, skipping {} dwords",
                        packet.header.opcode,
                        packet.offset,
                        packet.header.size()
                    );
                    stats.skipped += 1;
                }
            }
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        ctx: &mut GpuContext,
        renderer: &mut dyn Renderer,
        op: Opcode,
        p: &Packet<'_>,
        depth: u32,
        stats: &mut ProcessStats,
    ) -> Result<()> {
        log::trace!("PM4 {:?} ({} dwords) at {}", op, p.payload.len(), p.offset);

        match op {
            Opcode::Nop => self.nop(ctx, p)?,

            Opcode::SetBase => {
                let index = p.arg(0) & 0xF;
                if index == 1 {
                    ctx.draw.indirect_base = p.addr(1);
                } else {
                    log::debug!("SET_BASE index {} ignored", index);
                    stats.skipped += 1;
                }
            }
            Opcode::IndexBufferSize => ctx.draw.index_count = p.arg(0),
            Opcode::IndexBase => ctx.draw.index_base = p.addr(0) & !1,
            Opcode::IndexType => ctx.draw.index_type = IndexType::from_raw(p.arg(0)),
            Opcode::NumInstances => ctx.draw.num_instances = p.arg(0).max(1),
            Opcode::ClearState | Opcode::ContextControl | Opcode::EventWrite => {}

            Opcode::WriteData => self.write_data(ctx, p, stats)?,
            Opcode::MemSemaphore => self.mem_semaphore(ctx, p)?,
            Opcode::WaitRegMem => self.wait_reg_mem(ctx, p)?,

            Opcode::IndirectBuffer => {
                if depth + 1 > MAX_IB_DEPTH {
                    return Err(GpuError::Unimplemented(format!(
                        "indirect buffer nesting deeper than {}",
                        MAX_IB_DEPTH
                    )));
                }
                let addr = (p.arg(0) & !3) as u64 | ((p.arg(1) as u64 & 0xFFFF) << 32);
                let size = (p.arg(2) & 0xF_FFFF) as usize;
                log::debug!("Indirect buffer 0x{:X} ({} dwords)", addr, size);
                let words = ctx.memory().read_dwords(addr, size)?;
                self.execute(ctx, renderer, &words, depth + 1, stats)?;
            }

            Opcode::EventWriteEop => self.event_write_eop(ctx, p, stats)?,
            Opcode::EventWriteEos => self.event_write_eos(ctx, p, stats)?,
            Opcode::DmaData => self.dma_data(ctx, p, stats)?,

            Opcode::SetConfigReg => {
                self.set_reg(ctx, CONFIG_REG_BASE, p)?;
            }
            Opcode::SetShReg => {
                self.set_reg(ctx, SH_REG_BASE, p)?;
            }
            Opcode::SetUconfigReg => {
                self.set_reg(ctx, UCONFIG_REG_BASE, p)?;
            }
            Opcode::SetContextReg => {
                let (start, end) = self.set_reg(ctx, CONTEXT_REG_BASE, p)?;
                self.capture_target_hint(ctx, start, end, p.rest);
            }

            Opcode::DrawIndexAuto => {
                let count = p.arg(0);
                log::debug!("DRAW_INDEX_AUTO count={}", count);
                renderer.draw(ctx, count, 0)?;
                stats.draws += 1;
            }
            Opcode::DrawIndex2 => {
                let max_size = p.arg(0);
                let index_ptr = p.addr(1);
                let count = p.arg(3);
                ctx.draw.index_count = max_size;
                log::debug!("DRAW_INDEX_2 count={} index=0x{:X}", count, index_ptr);
                renderer.draw(ctx, count, index_ptr)?;
                stats.draws += 1;
            }
            Opcode::DrawIndirect => {
                let args = ctx.draw.indirect_base + p.arg(0) as u64;
                renderer.draw_indirect(ctx, 1, false, args, 0, 0)?;
                stats.draws += 1;
            }
            Opcode::DrawIndexIndirect => {
                let args = ctx.draw.indirect_base + p.arg(0) as u64;
                let (index_ptr, max_size) = (ctx.draw.index_base, ctx.draw.index_count);
                renderer.draw_indirect(ctx, 1, true, args, index_ptr, max_size)?;
                stats.draws += 1;
            }

            Opcode::IncrementDeCounter => ctx.sync().increment_de(),
            Opcode::WaitOnCeCounter => ctx.sync().wait_ce_counter()?,

            Opcode::LoadConstRam
            | Opcode::WriteConstRam
            | Opcode::DumpConstRam
            | Opcode::IncrementCeCounter
            | Opcode::WaitOnDeCounterDiff => {
                log::debug!("Constant-engine packet {:?} in draw buffer, skipping", op);
                stats.skipped += 1;
            }
        }
        Ok(())
    }

    fn nop(&mut self, ctx: &mut GpuContext, p: &Packet<'_>) -> Result<()> {
        if p.arg(0) == NOP_FLIP_MAGIC && p.payload.len() >= 4 {
            let label = p.addr(1);
            let value = p.arg(3);
            log::debug!("Flip label 0x{:X} <- {}", label, value);
            ctx.memory().write_u32(label, value)?;
        }
        Ok(())
    }

    /// Copy the payload into the register file; returns the written range
    fn set_reg(&mut self, ctx: &mut GpuContext, base: u32, p: &Packet<'_>) -> Result<(u32, u32)> {
        let start = base + (p.arg(0) & 0xFFFF);
        let values = p.payload.get(1..).unwrap_or(&[]);
        ctx.regs.write_range(start, values)?;
        Ok((start, start + values.len() as u32))
    }

    /// Record the driver's true size for a color target written by `[start, end)`
    ///
    /// Pitch/slice registers round to tile granularity, so the driver follows
    /// CB_COLORn writes with a one-dword NOP holding `width | height << 16`.
    fn capture_target_hint(&mut self, ctx: &mut GpuContext, start: u32, end: u32, rest: &[u32]) {
        let [TARGET_HINT_MARKER, packed, ..] = *rest else {
            return;
        };
        let touched = (0..MAX_COLOR_TARGETS).find(|&n| {
            let block = CB_COLOR0_BASE + CB_COLOR_STRIDE * n as u32;
            start < block + CB_COLOR_STRIDE && end > block
        });
        if let Some(n) = touched {
            let dims = (packed & 0xFFFF, packed >> 16);
            log::debug!("Render target {} hint {}x{}", n, dims.0, dims.1);
            ctx.target_hints[n] = Some(dims);
        }
    }

    fn write_data(
        &mut self,
        ctx: &mut GpuContext,
        p: &Packet<'_>,
        stats: &mut ProcessStats,
    ) -> Result<()> {
        let control = p.arg(0);
        let dst_sel = (control >> 8) & 0xF;
        if control & (1 << 16) != 0 {
            return Err(GpuError::Unimplemented(
                "WRITE_DATA with wr_one_addr".to_string(),
            ));
        }

        let data = p.payload.get(3..).unwrap_or(&[]);
        match dst_sel {
            0 => ctx.regs.write_range(p.arg(1) & 0xFFFF, data)?,
            1 | 2 | 5 => write_words(ctx.memory(), p.addr(1), data)?,
            other => {
                log::warn!("WRITE_DATA dst_sel {} unhandled", other);
                stats.skipped += 1;
            }
        }
        Ok(())
    }

    fn poll_interval(ctx: &GpuContext, packet_interval: u32) -> Duration {
        let micros = if packet_interval != 0 {
            packet_interval as u64
        } else {
            ctx.config().poll_interval_us
        };
        Duration::from_micros(micros.max(1))
    }

    fn mem_semaphore(&mut self, ctx: &mut GpuContext, p: &Packet<'_>) -> Result<()> {
        let addr = p.addr(0);
        let flags = p.arg(1);
        let sem_sel = flags >> 29;
        let memory = ctx.memory();

        match sem_sel {
            6 => {
                let value = if flags & (1 << 20) == 0 {
                    memory.read_u64(addr)?.wrapping_add(1)
                } else {
                    1
                };
                memory.write_u64(addr, value)?;
            }
            7 => {
                let interval = Self::poll_interval(ctx, 0);
                loop {
                    let lo = memory.read_u32_volatile(addr)?;
                    let hi = memory.read_u32_volatile(addr + 4)?;
                    if lo != 0 || hi != 0 {
                        break;
                    }
                    thread::sleep(interval);
                }
            }
            other => log::warn!("MEM_SEMAPHORE sem_sel {} unhandled", other),
        }
        Ok(())
    }

    fn wait_reg_mem(&mut self, ctx: &mut GpuContext, p: &Packet<'_>) -> Result<()> {
        let control = p.arg(0);
        let function = WaitFunction::from_raw(control & 0x7)
            .ok_or_else(|| invalid_enum("wait function", control & 0x7))?;
        let in_memory = control & (1 << 4) != 0;
        let reference = p.arg(3);
        let mask = p.arg(4);

        if !in_memory {
            // Registers only change on this thread; the value is final
            let value = ctx.regs.read(p.arg(1) & 0xFFFF) & mask;
            if !function.passes(value, reference) {
                log::warn!(
                    "WAIT_REG_MEM on register 0x{:X} can never pass ({:?} {} vs {})",
                    p.arg(1),
                    function,
                    value,
                    reference
                );
            }
            return Ok(());
        }

        let addr = p.addr(1) & !3;
        let interval = Self::poll_interval(ctx, p.arg(5));
        loop {
            let value = ctx.memory().read_u32_volatile(addr)? & mask;
            if function.passes(value, reference) {
                return Ok(());
            }
            thread::sleep(interval);
        }
    }

    fn event_write_eop(
        &mut self,
        ctx: &mut GpuContext,
        p: &Packet<'_>,
        stats: &mut ProcessStats,
    ) -> Result<()> {
        let addr = p.addr(1);
        let hi = p.arg(2);
        let int_sel = (hi >> 24) & 0x3;
        let data_sel = hi >> 29;
        let memory = ctx.memory();

        let value = match data_sel {
            0 => None,
            1 => {
                memory.write_u32(addr, p.arg(3))?;
                Some(p.arg(3) as u64)
            }
            2 => {
                let v = p.arg(3) as u64 | ((p.arg(4) as u64) << 32);
                memory.write_u64(addr, v)?;
                Some(v)
            }
            3 | 4 => {
                let v = gpu_clock();
                memory.write_u64(addr, v)?;
                Some(v)
            }
            other => {
                log::warn!("EVENT_WRITE_EOP data_sel {} unhandled", other);
                stats.skipped += 1;
                None
            }
        };

        if int_sel != 0 {
            ctx.events()
                .trigger(EventKind::EndOfPipe, value.unwrap_or_default());
        }
        Ok(())
    }

    fn event_write_eos(
        &mut self,
        ctx: &mut GpuContext,
        p: &Packet<'_>,
        stats: &mut ProcessStats,
    ) -> Result<()> {
        let addr = p.addr(1);
        let command = p.arg(2) >> 29;
        match command {
            1 => {
                let index = (p.arg(3) & 0xFFFF) as usize * 4;
                let len = (p.arg(3) >> 16) as usize * 4;
                let data = ctx
                    .gds
                    .get(index..index + len)
                    .ok_or(MemoryError::OutOfRange {
                        addr: index as u64,
                        len: len as u64,
                    })?;
                ctx.memory().write_bytes(addr, data)?;
            }
            2 => ctx.memory().write_u32(addr, p.arg(3))?,
            other => {
                log::warn!("EVENT_WRITE_EOS command {} unhandled", other);
                stats.skipped += 1;
            }
        }
        Ok(())
    }

    fn dma_data(
        &mut self,
        ctx: &mut GpuContext,
        p: &Packet<'_>,
        stats: &mut ProcessStats,
    ) -> Result<()> {
        let control = p.arg(0);
        let src_sel = (control >> 29) & 0x3;
        let dst_sel = (control >> 20) & 0x3;
        let src = p.arg(1) as u64 | ((p.arg(2) as u64) << 32);
        let dst = p.arg(3) as u64 | ((p.arg(4) as u64) << 32);
        let bytes = (p.arg(5) & 0x1F_FFFF) as usize;

        let gds_range = |offset: u64| -> Result<std::ops::Range<usize>> {
            let start = offset as usize;
            match start.checked_add(bytes) {
                Some(end) if end <= GDS_SIZE => Ok(start..end),
                _ => Err(MemoryError::OutOfRange {
                    addr: offset,
                    len: bytes as u64,
                }
                .into()),
            }
        };

        let data: Vec<u8> = match src_sel {
            0 | 3 => ctx.memory().read_vec(src, bytes)?,
            1 => ctx.gds[gds_range(src)?].to_vec(),
            _ => (p.arg(1).to_le_bytes())
                .into_iter()
                .cycle()
                .take(bytes)
                .collect(),
        };

        match dst_sel {
            0 | 3 => ctx.memory().write_bytes(dst, &data)?,
            1 => {
                let range = gds_range(dst)?;
                ctx.gds[range].copy_from_slice(&data);
            }
            other => {
                log::warn!("DMA_DATA dst_sel {} unhandled", other);
                stats.skipped += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pm4::PacketWriter;
    use crate::core::renderer::RecordingRenderer;
    use crate::core::test_support::context;

    #[test]
    fn test_unknown_opcode_is_skipped() {
        let (mut ctx, _) = context();
        let mut renderer = RecordingRenderer::default();
        let words = [0xC001_EE00, 1, 2, 0xC000_1000, 0];
        let stats = CommandProcessor::new()
            .process(&mut ctx, &mut renderer, &words)
            .unwrap();
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_type1_is_fatal() {
        let (mut ctx, _) = context();
        let mut renderer = RecordingRenderer::default();
        let result = CommandProcessor::new().process(&mut ctx, &mut renderer, &[0x4000_0000, 0]);
        assert!(matches!(
            result,
            Err(GpuError::UnsupportedPacketType { packet_type: 1, .. })
        ));
    }

    #[test]
    fn test_wr_one_addr_fails_loudly() {
        let (mut ctx, _) = context();
        let mut renderer = RecordingRenderer::default();
        let mut pw = PacketWriter::new();
        pw.packet(Opcode::WriteData, &[(1 << 16) | (5 << 8), 0x1000, 0, 7]);
        let result = CommandProcessor::new().process(&mut ctx, &mut renderer, pw.as_slice());
        assert!(matches!(result, Err(GpuError::Unimplemented(_))));
    }

    #[test]
    fn test_register_wait_reg_mem_does_not_block() {
        let (mut ctx, _) = context();
        let mut renderer = RecordingRenderer::default();
        let mut pw = PacketWriter::new();
        pw.wait_reg_mem(WaitFunction::Equal, false, 0x2000, 1, 0xFFFF_FFFF, 10);
        assert!(CommandProcessor::new()
            .process(&mut ctx, &mut renderer, pw.as_slice())
            .is_ok());
    }

    #[test]
    fn test_invalid_wait_function_is_fatal() {
        let (mut ctx, _) = context();
        let mut renderer = RecordingRenderer::default();
        let mut pw = PacketWriter::new();
        pw.packet(Opcode::WaitRegMem, &[7 | (1 << 4), 0x1000, 0, 0, 0, 0]);
        let result = CommandProcessor::new().process(&mut ctx, &mut renderer, pw.as_slice());
        assert!(matches!(result, Err(GpuError::InvalidEnum { .. })));
    }
}
