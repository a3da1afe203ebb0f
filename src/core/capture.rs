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

//! Submission captures
//!
//! A capture freezes one graphics submission: the draw and constant command
//! buffers plus every non-zero register at submission time. Captures are
//! stored as bincode and can be dumped to JSON for inspection; `pm4-replay`
//! runs them against a flat arena and the null renderer.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::GpuConfig;
use crate::core::error::{GpuError, Result};
use crate::core::gpu::{GpuContext, RegisterFile};
use crate::core::memory::{FlatMemory, GuestMemory};
use crate::core::pm4::{CommandProcessor, ConstantEngineHost, ProcessStats};
use crate::core::renderer::Renderer;

/// On-disk format revision
pub const CAPTURE_VERSION: u32 = 1;

/// Base of the arena a capture is replayed on
pub const REPLAY_BASE: u64 = 0x1000_0000;

/// Size of the replay arena
pub const REPLAY_SIZE: usize = 0x0100_0000;

/// One frozen graphics submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionCapture {
    pub version: u32,
    pub created: DateTime<Utc>,
    /// Draw command buffer
    pub dcb: Vec<u32>,
    /// Constant command buffer, empty when the submission had none
    pub ccb: Vec<u32>,
    /// Non-zero registers as `(index, value)`
    pub registers: Vec<(u32, u32)>,
}

impl SubmissionCapture {
    /// Capture a submission against the current register state
    pub fn new(dcb: Vec<u32>, ccb: Vec<u32>, regs: &RegisterFile) -> Self {
        Self {
            version: CAPTURE_VERSION,
            created: Utc::now(),
            dcb,
            ccb,
            registers: regs.non_zero().collect(),
        }
    }

    /// Capture the submission at `dcb`/`ccb` (sizes in bytes) from guest memory
    pub fn from_memory(
        memory: &dyn GuestMemory,
        regs: &RegisterFile,
        (dcb, dcb_size): (u64, u32),
        (ccb, ccb_size): (u64, u32),
    ) -> Result<Self> {
        let dcb = memory.read_dwords(dcb, dcb_size as usize / 4)?;
        let ccb = if ccb != 0 && ccb_size != 0 {
            memory.read_dwords(ccb, ccb_size as usize / 4)?
        } else {
            Vec::new()
        };
        Ok(Self::new(dcb, ccb, regs))
    }

    /// Serialize to bincode
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| GpuError::Capture(format!("encode failed: {}", e)))
    }

    /// Deserialize from bincode
    ///
    /// # Errors
    ///
    /// [`GpuError::Capture`] for malformed data or a version mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (capture, _): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| GpuError::Capture(format!("decode failed: {}", e)))?;
        if capture.version != CAPTURE_VERSION {
            return Err(GpuError::Capture(format!(
                "unsupported capture version {} (expected {})",
                capture.version, CAPTURE_VERSION
            )));
        }
        Ok(capture)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        log::info!(
            "Saved capture to {} ({} DCB dwords, {} registers)",
            path.display(),
            self.dcb.len(),
            self.registers.len()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GpuError::Capture(format!("JSON encode failed: {}", e)))
    }

    /// Load the captured registers into `regs`
    pub fn restore_registers(&self, regs: &mut RegisterFile) -> Result<()> {
        for &(index, value) in &self.registers {
            regs.write(index, value)?;
        }
        Ok(())
    }

    /// Run the capture on a fresh context over a flat arena
    ///
    /// Packets that reference guest memory outside
    /// [`REPLAY_BASE`]..`REPLAY_BASE + REPLAY_SIZE` fail the replay.
    pub fn replay(&self, config: GpuConfig, renderer: &mut dyn Renderer) -> Result<ProcessStats> {
        let memory: std::sync::Arc<dyn GuestMemory> =
            std::sync::Arc::new(FlatMemory::new(REPLAY_BASE, REPLAY_SIZE));
        let mut ctx = GpuContext::new(config, memory);
        self.restore_registers(&mut ctx.regs)?;
        renderer.init(&ctx)?;

        let mut ce = ConstantEngineHost::new(ctx.memory_arc(), std::sync::Arc::clone(ctx.sync()));
        let ccb = (!self.ccb.is_empty()).then(|| self.ccb.clone());
        CommandProcessor::new().submit(&mut ctx, renderer, &mut ce, &self.dcb, ccb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gpu::registers::CB_BLEND_RED;
    use crate::core::pm4::PacketWriter;
    use crate::core::renderer::{NullRenderer, RecordingRenderer, RenderCall};

    fn sample() -> SubmissionCapture {
        let mut regs = RegisterFile::new();
        regs.write(CB_BLEND_RED, 0x3F00_0000).unwrap();
        let mut pw = PacketWriter::new();
        pw.draw_index_auto(3).nop(1);
        SubmissionCapture::new(pw.finish(), Vec::new(), &regs)
    }

    #[test]
    fn test_capture_records_non_zero_registers() {
        let capture = sample();
        assert_eq!(capture.registers, vec![(CB_BLEND_RED, 0x3F00_0000)]);
        assert_eq!(capture.version, CAPTURE_VERSION);
    }

    #[test]
    fn test_capture_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.cap");
        let capture = sample();

        capture.save(&path).unwrap();
        assert_eq!(SubmissionCapture::load(&path).unwrap(), capture);
    }

    #[test]
    fn test_capture_rejects_other_versions() {
        let mut capture = sample();
        capture.version = CAPTURE_VERSION + 1;
        let bytes = capture.to_bytes().unwrap();

        assert!(matches!(
            SubmissionCapture::from_bytes(&bytes),
            Err(GpuError::Capture(_))
        ));
        assert!(SubmissionCapture::from_bytes(&[0xFF; 3]).is_err());
    }

    #[test]
    fn test_capture_json_lists_buffers() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["dcb"].as_array().unwrap().len(), sample().dcb.len());
        assert_eq!(value["registers"][0][0], CB_BLEND_RED);
    }

    #[test]
    fn test_replay_restores_registers_before_draw() {
        let capture = sample();
        let mut renderer = RecordingRenderer::default();

        let stats = capture.replay(GpuConfig::default(), &mut renderer).unwrap();

        assert_eq!(stats.draws, 1);
        assert_eq!(stats.packets, 2);
        assert_eq!(renderer.calls[0], RenderCall::Init);
        assert_eq!(renderer.draws(), vec![(3, 0)]);
    }

    #[test]
    fn test_replay_with_constant_buffer() {
        let mut ce = PacketWriter::new();
        ce.write_const_ram(0, &[1, 2, 3])
            .dump_const_ram(0, 3, REPLAY_BASE + 0x100);
        let mut capture = sample();
        capture.ccb = ce.finish();

        let stats = capture
            .replay(GpuConfig::default(), &mut NullRenderer::default())
            .unwrap();
        assert_eq!(stats.draws, 1);
    }

    #[test]
    fn test_from_memory_reads_byte_sizes() {
        let memory = FlatMemory::new(REPLAY_BASE, 0x1000);
        memory.write_dwords(REPLAY_BASE, &[0xC000_1000, 0, 0]).unwrap();
        let regs = RegisterFile::new();

        let capture =
            SubmissionCapture::from_memory(&memory, &regs, (REPLAY_BASE, 12), (0, 0)).unwrap();
        assert_eq!(capture.dcb, vec![0xC000_1000, 0, 0]);
        assert!(capture.ccb.is_empty());
        assert!(capture.registers.is_empty());
    }
}
