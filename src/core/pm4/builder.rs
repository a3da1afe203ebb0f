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

//! PM4 packet encoders
//!
//! The HLE driver layer builds command buffers with these helpers; the
//! interpreter decodes exactly what they encode.
//!
//! # Example
//!
//! ```
//! use liverpool::core::gpu::registers::CB_COLOR0_BASE;
//! use liverpool::core::pm4::PacketWriter;
//!
//! let mut pw = PacketWriter::new();
//! pw.set_context_reg(CB_COLOR0_BASE, &[0x1000])
//!     .render_target_hint(1920, 1080)
//!     .draw_index_auto(3);
//! let words = pw.finish();
//! assert_eq!(words.len(), 3 + 2 + 3);
//! ```

use super::{Opcode, WaitFunction, FILLER, NOP_FLIP_MAGIC, TARGET_HINT_MARKER};
use crate::core::gpu::registers::{
    CONFIG_REG_BASE, CONTEXT_REG_BASE, SH_REG_BASE, UCONFIG_REG_BASE,
};

/// Type-3 header for `opcode` with `payload_len` payload dwords
pub const fn type3_header(opcode: Opcode, payload_len: usize) -> u32 {
    0xC000_0000 | (((payload_len as u32 - 1) & 0x3FFF) << 16) | ((opcode as u32) << 8)
}

/// Fence payload written by `EVENT_WRITE_EOP`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EopData {
    None,
    Data32(u32),
    Data64(u64),
    GpuClock,
}

/// `DMA_DATA` source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaSource {
    Memory(u64),
    Gds(u32),
    Data(u32),
    MemoryL2(u64),
}

/// `DMA_DATA` destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDest {
    Memory(u64),
    Gds(u32),
    MemoryL2(u64),
}

/// Command buffer under construction
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    words: Vec<u32>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded dwords so far
    pub fn as_slice(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn finish(self) -> Vec<u32> {
        self.words
    }

    /// Little-endian bytes of the buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Append a raw type-3 packet
    pub fn packet(&mut self, opcode: Opcode, payload: &[u32]) -> &mut Self {
        debug_assert!(!payload.is_empty(), "type-3 packets carry at least one dword");
        self.words.push(type3_header(opcode, payload.len()));
        self.words.extend_from_slice(payload);
        self
    }

    /// Append a type-0 packet with `count + 1` zero payload dwords
    pub fn type0(&mut self, base_index: u32, count: u32) -> &mut Self {
        self.words.push(((count & 0x3FFF) << 16) | (base_index & 0xFFFF));
        self.words.extend(std::iter::repeat(0).take(count as usize + 1));
        self
    }

    pub fn filler(&mut self) -> &mut Self {
        self.words.push(FILLER);
        self
    }

    /// NOP with `payload_len` zero dwords
    pub fn nop(&mut self, payload_len: usize) -> &mut Self {
        self.words.push(type3_header(Opcode::Nop, payload_len.max(1)));
        self.words.extend(std::iter::repeat(0).take(payload_len.max(1)));
        self
    }

    /// NOP asking the GPU to write `value` at `label` (flip with label)
    pub fn flip_with_label(&mut self, label: u64, value: u32) -> &mut Self {
        self.packet(
            Opcode::Nop,
            &[NOP_FLIP_MAGIC, label as u32, (label >> 32) as u32, value],
        )
    }

    /// True render-target size, placed right after the CB_COLORn register writes
    pub fn render_target_hint(&mut self, width: u32, height: u32) -> &mut Self {
        self.words.push(TARGET_HINT_MARKER);
        self.words.push((width & 0xFFFF) | (height << 16));
        self
    }

    fn set_reg(&mut self, opcode: Opcode, base: u32, reg: u32, values: &[u32]) -> &mut Self {
        let mut payload = Vec::with_capacity(values.len() + 1);
        payload.push(reg.wrapping_sub(base));
        payload.extend_from_slice(values);
        self.packet(opcode, &payload)
    }

    /// `SET_CONFIG_REG` starting at absolute register `reg`
    pub fn set_config_reg(&mut self, reg: u32, values: &[u32]) -> &mut Self {
        self.set_reg(Opcode::SetConfigReg, CONFIG_REG_BASE, reg, values)
    }

    /// `SET_CONTEXT_REG` starting at absolute register `reg`
    pub fn set_context_reg(&mut self, reg: u32, values: &[u32]) -> &mut Self {
        self.set_reg(Opcode::SetContextReg, CONTEXT_REG_BASE, reg, values)
    }

    /// `SET_SH_REG` starting at absolute register `reg`
    pub fn set_sh_reg(&mut self, reg: u32, values: &[u32]) -> &mut Self {
        self.set_reg(Opcode::SetShReg, SH_REG_BASE, reg, values)
    }

    /// `SET_UCONFIG_REG` starting at absolute register `reg`
    pub fn set_uconfig_reg(&mut self, reg: u32, values: &[u32]) -> &mut Self {
        self.set_reg(Opcode::SetUconfigReg, UCONFIG_REG_BASE, reg, values)
    }

    /// `SET_BASE` of the indirect-draw-args pointer
    pub fn set_indirect_base(&mut self, addr: u64) -> &mut Self {
        self.packet(Opcode::SetBase, &[1, addr as u32, (addr >> 32) as u32])
    }

    pub fn index_base(&mut self, addr: u64) -> &mut Self {
        self.packet(Opcode::IndexBase, &[addr as u32, (addr >> 32) as u32])
    }

    pub fn index_buffer_size(&mut self, count: u32) -> &mut Self {
        self.packet(Opcode::IndexBufferSize, &[count])
    }

    /// `INDEX_TYPE`: 0 for 16-bit indices, 1 for 32-bit
    pub fn index_type(&mut self, index_type: u32) -> &mut Self {
        self.packet(Opcode::IndexType, &[index_type])
    }

    pub fn num_instances(&mut self, count: u32) -> &mut Self {
        self.packet(Opcode::NumInstances, &[count])
    }

    pub fn draw_index_auto(&mut self, count: u32) -> &mut Self {
        self.packet(Opcode::DrawIndexAuto, &[count, 2])
    }

    pub fn draw_index_2(&mut self, max_size: u32, index_addr: u64, count: u32) -> &mut Self {
        self.packet(
            Opcode::DrawIndex2,
            &[max_size, index_addr as u32, (index_addr >> 32) as u32, count, 0],
        )
    }

    /// Non-indexed indirect draw reading args at `indirect base + data_offset`
    pub fn draw_indirect(&mut self, data_offset: u32) -> &mut Self {
        self.packet(Opcode::DrawIndirect, &[data_offset, 0, 0, 2])
    }

    /// Indexed indirect draw reading args at `indirect base + data_offset`
    pub fn draw_index_indirect(&mut self, data_offset: u32) -> &mut Self {
        self.packet(Opcode::DrawIndexIndirect, &[data_offset, 0, 0, 0])
    }

    /// `WRITE_DATA` of `data` to guest memory
    pub fn write_data_mem(&mut self, addr: u64, data: &[u32]) -> &mut Self {
        let mut payload = vec![5 << 8, addr as u32, (addr >> 32) as u32];
        payload.extend_from_slice(data);
        self.packet(Opcode::WriteData, &payload)
    }

    /// `WRITE_DATA` of `data` to registers starting at `reg`
    pub fn write_data_reg(&mut self, reg: u32, data: &[u32]) -> &mut Self {
        let mut payload = vec![0, reg, 0];
        payload.extend_from_slice(data);
        self.packet(Opcode::WriteData, &payload)
    }

    /// `WAIT_REG_MEM` on a memory dword (`memory = true`) or a register
    pub fn wait_reg_mem(
        &mut self,
        function: WaitFunction,
        memory: bool,
        addr: u64,
        reference: u32,
        mask: u32,
        poll_interval: u32,
    ) -> &mut Self {
        let control = function.to_raw() | ((memory as u32) << 4);
        self.packet(
            Opcode::WaitRegMem,
            &[
                control,
                addr as u32,
                (addr >> 32) as u32,
                reference,
                mask,
                poll_interval,
            ],
        )
    }

    /// `MEM_SEMAPHORE` signal; `increment` selects add-one over write-one
    pub fn mem_semaphore_signal(&mut self, addr: u64, increment: bool) -> &mut Self {
        let flags = (6 << 29) | ((!increment as u32) << 20);
        self.packet(
            Opcode::MemSemaphore,
            &[addr as u32, ((addr >> 32) as u32 & 0xFFFF) | flags],
        )
    }

    /// `MEM_SEMAPHORE` wait until the u64 at `addr` is non-zero
    pub fn mem_semaphore_wait(&mut self, addr: u64) -> &mut Self {
        self.packet(
            Opcode::MemSemaphore,
            &[addr as u32, ((addr >> 32) as u32 & 0xFFFF) | (7 << 29)],
        )
    }

    /// `EVENT_WRITE_EOP`, optionally raising an end-of-pipe event
    pub fn event_write_eop(&mut self, addr: u64, data: EopData, interrupt: bool) -> &mut Self {
        let (data_sel, lo, hi) = match data {
            EopData::None => (0, 0, 0),
            EopData::Data32(v) => (1, v, 0),
            EopData::Data64(v) => (2, v as u32, (v >> 32) as u32),
            EopData::GpuClock => (3, 0, 0),
        };
        let int_sel = if interrupt { 2 } else { 0 };
        let hi_word = ((addr >> 32) as u32 & 0xFFFF) | (int_sel << 24) | (data_sel << 29);
        self.packet(
            Opcode::EventWriteEop,
            &[0x0000_0504, addr as u32, hi_word, lo, hi],
        )
    }

    /// `EVENT_WRITE_EOS` storing a 32-bit value
    pub fn event_write_eos(&mut self, addr: u64, value: u32) -> &mut Self {
        let hi_word = ((addr >> 32) as u32 & 0xFFFF) | (2 << 29);
        self.packet(
            Opcode::EventWriteEos,
            &[0x0000_0506, addr as u32, hi_word, value],
        )
    }

    /// `EVENT_WRITE_EOS` storing `count` GDS dwords from dword index `gds_index`
    pub fn event_write_eos_gds(&mut self, addr: u64, gds_index: u16, count: u16) -> &mut Self {
        let hi_word = ((addr >> 32) as u32 & 0xFFFF) | (1 << 29);
        self.packet(
            Opcode::EventWriteEos,
            &[
                0x0000_0506,
                addr as u32,
                hi_word,
                gds_index as u32 | ((count as u32) << 16),
            ],
        )
    }

    /// `DMA_DATA` moving `bytes` bytes
    pub fn dma_data(&mut self, src: DmaSource, dst: DmaDest, bytes: u32) -> &mut Self {
        let (src_sel, src_addr) = match src {
            DmaSource::Memory(a) => (0, a),
            DmaSource::Gds(o) => (1, o as u64),
            DmaSource::Data(v) => (2, v as u64),
            DmaSource::MemoryL2(a) => (3, a),
        };
        let (dst_sel, dst_addr) = match dst {
            DmaDest::Memory(a) => (0, a),
            DmaDest::Gds(o) => (1, o as u64),
            DmaDest::MemoryL2(a) => (3, a),
        };
        self.packet(
            Opcode::DmaData,
            &[
                (src_sel << 29) | (dst_sel << 20),
                src_addr as u32,
                (src_addr >> 32) as u32,
                dst_addr as u32,
                (dst_addr >> 32) as u32,
                bytes & 0x1F_FFFF,
            ],
        )
    }

    /// `INDIRECT_BUFFER` of `size_dwords` dwords at `addr`
    pub fn indirect_buffer(&mut self, addr: u64, size_dwords: u32) -> &mut Self {
        self.packet(
            Opcode::IndirectBuffer,
            &[
                addr as u32 & !3,
                (addr >> 32) as u32 & 0xFFFF,
                size_dwords & 0xF_FFFF,
            ],
        )
    }

    /// `WRITE_CONST_RAM` of `data` at byte offset `offset`
    pub fn write_const_ram(&mut self, offset: u32, data: &[u32]) -> &mut Self {
        let mut payload = vec![offset];
        payload.extend_from_slice(data);
        self.packet(Opcode::WriteConstRam, &payload)
    }

    /// `DUMP_CONST_RAM` of `dwords` dwords at byte offset `offset` to `addr`
    pub fn dump_const_ram(&mut self, offset: u32, dwords: u32, addr: u64) -> &mut Self {
        self.packet(
            Opcode::DumpConstRam,
            &[offset, dwords, addr as u32, (addr >> 32) as u32],
        )
    }

    /// `LOAD_CONST_RAM` of `dwords` dwords from `addr` to byte offset `offset`
    pub fn load_const_ram(&mut self, addr: u64, dwords: u32, offset: u32) -> &mut Self {
        self.packet(
            Opcode::LoadConstRam,
            &[addr as u32, (addr >> 32) as u32, dwords, offset],
        )
    }

    pub fn increment_ce_counter(&mut self) -> &mut Self {
        self.packet(Opcode::IncrementCeCounter, &[1])
    }

    pub fn increment_de_counter(&mut self) -> &mut Self {
        self.packet(Opcode::IncrementDeCounter, &[0])
    }

    pub fn wait_on_ce_counter(&mut self) -> &mut Self {
        self.packet(Opcode::WaitOnCeCounter, &[0])
    }

    pub fn wait_on_de_counter_diff(&mut self, diff: u32) -> &mut Self {
        self.packet(Opcode::WaitOnDeCounterDiff, &[diff])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pm4::{PacketHeader, PacketIter};

    #[test]
    fn test_type3_header() {
        assert_eq!(type3_header(Opcode::Nop, 1), TARGET_HINT_MARKER);
        let h = PacketHeader::decode(type3_header(Opcode::SetContextReg, 7));
        assert_eq!(h.packet_type, 3);
        assert_eq!(h.count, 6);
        assert_eq!(h.opcode, Opcode::SetContextReg as u8);
        assert_eq!(h.size(), 8);
    }

    #[test]
    fn test_set_reg_offsets_are_relative() {
        let mut pw = PacketWriter::new();
        pw.set_sh_reg(0x2C4C, &[1, 2]).set_uconfig_reg(0xC242, &[4]);
        let words = pw.finish();
        assert_eq!(words[1], 0x4C);
        assert_eq!(words[5], 0x242);
    }

    #[test]
    fn test_iterates_back_packet_by_packet() {
        let mut pw = PacketWriter::new();
        pw.flip_with_label(0x1_0000_2000, 7)
            .filler()
            .dma_data(DmaSource::Data(0xAB), DmaDest::Memory(0x4000), 16)
            .increment_ce_counter();

        let packets: Vec<_> = PacketIter::new(pw.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].opcode(), Some(Opcode::Nop));
        assert_eq!(packets[0].addr(1), 0x1_0000_2000);
        assert_eq!(packets[1].opcode(), Some(Opcode::DmaData));
        assert_eq!(packets[1].arg(5), 16);
        assert_eq!(packets[2].opcode(), Some(Opcode::IncrementCeCounter));
    }
}
