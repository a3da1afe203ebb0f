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

//! PM4 command streams
//!
//! Command buffers are sequences of PM4 packets. Every packet starts with a
//! header dword:
//!
//! | Bits  | Field                                          |
//! |-------|------------------------------------------------|
//! | 31-30 | packet type                                    |
//! | 29-16 | count (payload is `count + 1` dwords)          |
//! | 15-8  | opcode (type 3 only)                           |
//! | 0     | predicate (type 3 only)                        |
//!
//! Type 0 packets are skipped, type 2 is only valid as the single-dword
//! filler `0x80000000`, and type 1 is never emitted by the driver. Both of
//! the latter are fatal. Type 3 packets are dispatched on their opcode.
//!
//! - [`processor`]: the draw-engine interpreter
//! - [`constant_engine`]: the constant-engine coprocessor
//! - [`builder`]: packet encoders used by the HLE driver layer

use serde::Serialize;

use crate::core::error::{GpuError, Result};

pub mod builder;
pub mod constant_engine;
pub mod processor;
#[cfg(test)]
mod tests;

pub use builder::PacketWriter;
pub use constant_engine::{ConstantEngine, ConstantEngineHost, CONST_RAM_SIZE};
pub use processor::{CommandProcessor, ProcessStats};

/// Type-2 filler packet
pub const FILLER: u32 = 0x8000_0000;

/// First payload dword of a NOP carrying a flip-with-label request
pub const NOP_FLIP_MAGIC: u32 = 0x6875_0778;

/// Header of the driver-inserted render-target size hint (a NOP with one payload dword)
pub const TARGET_HINT_MARKER: u32 = 0xC000_1000;

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketHeader {
    pub packet_type: u32,
    pub count: u32,
    pub opcode: u8,
    pub predicate: bool,
}

impl PacketHeader {
    #[inline(always)]
    pub fn decode(word: u32) -> Self {
        Self {
            packet_type: word >> 30,
            count: (word >> 16) & 0x3FFF,
            opcode: (word >> 8) as u8,
            predicate: word & 1 != 0,
        }
    }

    pub fn encode(&self) -> u32 {
        (self.packet_type << 30)
            | ((self.count & 0x3FFF) << 16)
            | ((self.opcode as u32) << 8)
            | self.predicate as u32
    }

    /// Payload length in dwords
    #[inline(always)]
    pub fn payload_len(&self) -> usize {
        self.count as usize + 1
    }

    /// Packet length in dwords including the header
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.count as usize + 2
    }
}

/// Type-3 opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x10,
    SetBase = 0x11,
    ClearState = 0x12,
    IndexBufferSize = 0x13,
    DrawIndirect = 0x24,
    DrawIndexIndirect = 0x25,
    IndexBase = 0x26,
    DrawIndex2 = 0x27,
    ContextControl = 0x28,
    IndexType = 0x2A,
    DrawIndexAuto = 0x2D,
    NumInstances = 0x2F,
    WriteData = 0x37,
    MemSemaphore = 0x39,
    WaitRegMem = 0x3C,
    IndirectBuffer = 0x3F,
    EventWrite = 0x46,
    EventWriteEop = 0x47,
    EventWriteEos = 0x48,
    DmaData = 0x50,
    SetConfigReg = 0x68,
    SetContextReg = 0x69,
    SetShReg = 0x76,
    SetUconfigReg = 0x79,
    LoadConstRam = 0x80,
    WriteConstRam = 0x81,
    DumpConstRam = 0x83,
    IncrementCeCounter = 0x84,
    IncrementDeCounter = 0x85,
    WaitOnCeCounter = 0x86,
    WaitOnDeCounterDiff = 0x88,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        use Opcode::*;
        let op = match value {
            0x10 => Nop,
            0x11 => SetBase,
            0x12 => ClearState,
            0x13 => IndexBufferSize,
            0x24 => DrawIndirect,
            0x25 => DrawIndexIndirect,
            0x26 => IndexBase,
            0x27 => DrawIndex2,
            0x28 => ContextControl,
            0x2A => IndexType,
            0x2D => DrawIndexAuto,
            0x2F => NumInstances,
            0x37 => WriteData,
            0x39 => MemSemaphore,
            0x3C => WaitRegMem,
            0x3F => IndirectBuffer,
            0x46 => EventWrite,
            0x47 => EventWriteEop,
            0x48 => EventWriteEos,
            0x50 => DmaData,
            0x68 => SetConfigReg,
            0x69 => SetContextReg,
            0x76 => SetShReg,
            0x79 => SetUconfigReg,
            0x80 => LoadConstRam,
            0x81 => WriteConstRam,
            0x83 => DumpConstRam,
            0x84 => IncrementCeCounter,
            0x85 => IncrementDeCounter,
            0x86 => WaitOnCeCounter,
            0x88 => WaitOnDeCounterDiff,
            _ => return None,
        };
        Some(op)
    }
}

/// Compare function of `WAIT_REG_MEM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitFunction {
    Always,
    Less,
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
}

impl WaitFunction {
    pub fn from_raw(value: u32) -> Option<Self> {
        use WaitFunction::*;
        [Always, Less, LessEqual, Equal, NotEqual, GreaterEqual, Greater]
            .get(value as usize)
            .copied()
    }

    pub fn to_raw(self) -> u32 {
        self as u32
    }

    /// Evaluate `value <op> reference`
    pub fn passes(self, value: u32, reference: u32) -> bool {
        match self {
            WaitFunction::Always => true,
            WaitFunction::Less => value < reference,
            WaitFunction::LessEqual => value <= reference,
            WaitFunction::Equal => value == reference,
            WaitFunction::NotEqual => value != reference,
            WaitFunction::GreaterEqual => value >= reference,
            WaitFunction::Greater => value > reference,
        }
    }
}

/// One packet located in a command buffer
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    /// Dword offset of the header
    pub offset: usize,
    pub header: PacketHeader,
    pub payload: &'a [u32],
    /// Dwords following this packet
    pub rest: &'a [u32],
}

impl Packet<'_> {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.header.opcode)
    }

    /// Payload dword `i`, or zero if the packet is shorter
    #[inline(always)]
    pub fn arg(&self, i: usize) -> u32 {
        self.payload.get(i).copied().unwrap_or(0)
    }

    /// 64-bit address from payload dwords `lo` and `lo + 1`, high half masked to 16 bits
    #[inline]
    pub fn addr(&self, lo: usize) -> u64 {
        self.arg(lo) as u64 | ((self.arg(lo + 1) as u64 & 0xFFFF) << 32)
    }
}

/// Iterator over the packets of a command buffer
///
/// Yields type-0 and type-3 packets; fillers are consumed silently. Structural
/// errors end the iteration after being yielded once.
pub struct PacketIter<'a> {
    words: &'a [u32],
    pos: usize,
    failed: bool,
}

impl<'a> PacketIter<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self {
            words,
            pos: 0,
            failed: false,
        }
    }

    /// Current dword position
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for PacketIter<'a> {
    type Item = Result<Packet<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed || self.pos >= self.words.len() {
                return None;
            }

            let offset = self.pos;
            let word = self.words[offset];
            let header = PacketHeader::decode(word);

            match header.packet_type {
                2 if word == FILLER => {
                    self.pos += 1;
                    continue;
                }
                0 | 3 => {
                    let end = offset + header.size();
                    if end > self.words.len() {
                        self.failed = true;
                        return Some(Err(GpuError::TruncatedPacket {
                            offset,
                            needed: header.size(),
                            available: self.words.len() - offset,
                        }));
                    }
                    self.pos = end;
                    return Some(Ok(Packet {
                        offset,
                        header,
                        payload: &self.words[offset + 1..end],
                        rest: &self.words[end..],
                    }));
                }
                packet_type => {
                    self.failed = true;
                    return Some(Err(GpuError::UnsupportedPacketType {
                        packet_type,
                        header: word,
                        offset,
                    }));
                }
            }
        }
    }
}

/// Human-readable packet listing entry
#[derive(Debug, Clone, Serialize)]
pub struct DecodedPacket {
    pub offset: usize,
    pub header: PacketHeader,
    pub opcode: Option<Opcode>,
    pub payload: Vec<u32>,
}

/// Decode a whole buffer for listing
pub fn decode_stream(words: &[u32]) -> Result<Vec<DecodedPacket>> {
    PacketIter::new(words)
        .map(|packet| {
            packet.map(|p| DecodedPacket {
                offset: p.offset,
                header: p.header,
                opcode: if p.header.packet_type == 3 {
                    p.opcode()
                } else {
                    None
                },
                payload: p.payload.to_vec(),
            })
        })
        .collect()
}

/// Convert a little-endian byte buffer into dwords (trailing bytes dropped)
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
