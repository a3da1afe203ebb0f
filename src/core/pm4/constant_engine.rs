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

//! Constant-engine coprocessor
//!
//! The constant engine runs the CCB (constant command buffer) alongside the
//! draw engine. It understands only constant-RAM traffic and its side of the
//! CE/DE counter handshake; every other opcode is skipped.
//!
//! Each submission runs the CE on a short-lived thread. The 48KB constant RAM
//! is moved into the thread and handed back on join, so its contents persist
//! from one submission to the next.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{Opcode, Packet, PacketIter};
use crate::core::error::{GpuError, Result};
use crate::core::gpu::EngineSync;
use crate::core::memory::{GuestMemory, MemoryError};

/// Constant RAM size in bytes
pub const CONST_RAM_SIZE: usize = 48 * 1024;

/// Constant-engine interpreter
pub struct ConstantEngine {
    ram: Box<[u8]>,
    memory: Arc<dyn GuestMemory>,
    sync: Arc<EngineSync>,
}

impl ConstantEngine {
    pub fn new(memory: Arc<dyn GuestMemory>, sync: Arc<EngineSync>) -> Self {
        Self {
            ram: vec![0u8; CONST_RAM_SIZE].into_boxed_slice(),
            memory,
            sync,
        }
    }

    /// Constant RAM contents
    pub fn const_ram(&self) -> &[u8] {
        &self.ram
    }

    fn ram_range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.ram.len() => Ok(start..end),
            _ => Err(MemoryError::OutOfRange {
                addr: offset as u64,
                len: len as u64,
            }
            .into()),
        }
    }

    /// Interpret a constant command buffer, returning the packet count
    pub fn process(&mut self, words: &[u32]) -> Result<u64> {
        let mut packets = 0;
        for packet in PacketIter::new(words) {
            let packet = packet?;
            packets += 1;
            if packet.header.packet_type != 3 {
                continue;
            }
            match packet.opcode() {
                Some(op) => self.dispatch(op, &packet)?,
                None => log::debug!(
                    "CE: unknown opcode 0x{:02X}, skipping",
                    packet.header.opcode
                ),
            }
        }
        Ok(packets)
    }

    fn dispatch(&mut self, op: Opcode, p: &Packet<'_>) -> Result<()> {
        match op {
            Opcode::Nop => {}
            Opcode::WriteConstRam => {
                let data = p.payload.get(1..).unwrap_or(&[]);
                let range = self.ram_range(p.arg(0), data.len() * 4)?;
                for (dst, word) in self.ram[range].chunks_exact_mut(4).zip(data) {
                    dst.copy_from_slice(&word.to_le_bytes());
                }
            }
            Opcode::DumpConstRam => {
                let range = self.ram_range(p.arg(0), p.arg(1) as usize * 4)?;
                let addr = p.arg(2) as u64 | ((p.arg(3) as u64) << 32);
                self.memory.write_bytes(addr, &self.ram[range])?;
            }
            Opcode::LoadConstRam => {
                let addr = p.arg(0) as u64 | ((p.arg(1) as u64) << 32);
                let range = self.ram_range(p.arg(3), p.arg(2) as usize * 4)?;
                self.memory.read_bytes(addr, &mut self.ram[range])?;
            }
            Opcode::IncrementCeCounter => self.sync.increment_ce(),
            Opcode::WaitOnDeCounterDiff => self.sync.wait_de_counter_diff(p.arg(0))?,
            other => log::debug!("CE: {:?} not handled by the constant engine", other),
        }
        Ok(())
    }
}

type CeJoin = JoinHandle<(ConstantEngine, Result<u64>)>;

/// Owner of the constant engine across submissions
///
/// Guarantees at most one CE thread at a time: starting a pass first joins the
/// previous one.
pub struct ConstantEngineHost {
    engine: Option<ConstantEngine>,
    running: Option<CeJoin>,
    memory: Arc<dyn GuestMemory>,
    sync: Arc<EngineSync>,
}

impl ConstantEngineHost {
    pub fn new(memory: Arc<dyn GuestMemory>, sync: Arc<EngineSync>) -> Self {
        Self {
            engine: Some(ConstantEngine::new(Arc::clone(&memory), Arc::clone(&sync))),
            running: None,
            memory,
            sync,
        }
    }

    /// Whether a CE pass is in flight
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start a CE pass over `words` on a new thread
    pub fn start(&mut self, words: Vec<u32>) -> Result<()> {
        self.join()?;
        let mut engine = match self.engine.take() {
            Some(engine) => engine,
            None => ConstantEngine::new(Arc::clone(&self.memory), Arc::clone(&self.sync)),
        };

        let handle = thread::Builder::new()
            .name("gpu-ce".to_string())
            .spawn(move || {
                let result = engine.process(&words);
                if result.is_err() {
                    engine.sync.abort();
                }
                (engine, result)
            })?;
        self.running = Some(handle);
        Ok(())
    }

    /// Wait for the in-flight pass; returns its packet count (0 if none ran)
    pub fn join(&mut self) -> Result<u64> {
        let Some(handle) = self.running.take() else {
            return Ok(0);
        };
        match handle.join() {
            Ok((engine, result)) => {
                self.engine = Some(engine);
                if let Err(ref e) = result {
                    log::error!("Constant engine aborted: {}", e);
                }
                result
            }
            Err(_) => Err(GpuError::Resource(
                "constant engine thread panicked".to_string(),
            )),
        }
    }

    /// Constant RAM of the idle engine
    pub fn const_ram(&self) -> Option<&[u8]> {
        self.engine.as_ref().map(ConstantEngine::const_ram)
    }
}

impl Drop for ConstantEngineHost {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            log::warn!("Constant engine failed during shutdown: {}", e);
        }
    }
}
