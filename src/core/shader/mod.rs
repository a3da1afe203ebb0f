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

//! GCN shader handling
//!
//! Shader binaries are located through the `OrbShdr` header that trails the
//! code, decoded with [`gcn`], and translated into WGSL by [`translate`]. The
//! fetch-shader subroutine that vertex shaders call to load their attributes
//! is parsed separately by [`fetch`] and never translated.

pub mod fetch;
pub mod gcn;
pub mod ir;
pub mod translate;
pub mod wgsl;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::gpu::registers::{ShaderStage, USER_DATA_COUNT};
use crate::core::memory::{GuestMemory, MemoryError};

pub use fetch::{parse_fetch_shader, FetchShaderVertexBinding, VsharpLocation};
pub use ir::ExportTarget;
pub use translate::{translate, VertexInput};

/// Magic bytes opening the trailing shader header
pub const HEADER_MAGIC: &[u8; 7] = b"OrbShdr";

/// Size of the trailing header in bytes
pub const HEADER_SIZE: usize = 28;

/// Largest shader binary the locator will scan through
pub const MAX_SHADER_SIZE: usize = 1 << 20;

/// Chunk size used when scanning guest memory for a header
const SCAN_CHUNK: usize = 256;

/// Shader decode and translation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShaderError {
    #[error("shader truncated at byte offset {offset:#x}")]
    Truncated { offset: usize },

    #[error("unknown instruction encoding 0x{word:08X} at byte offset {offset:#x}")]
    UnknownEncoding { offset: usize, word: u32 },

    /// Instruction outside the translatable subset
    ///
    /// `partial` holds the WGSL produced up to the failing instruction so it
    /// can be dumped for inspection.
    #[error("unsupported instruction {instruction} at byte offset {offset:#x}")]
    Unsupported {
        offset: usize,
        instruction: String,
        partial: String,
    },

    #[error("invalid export target {target} at byte offset {offset:#x}")]
    InvalidExport {
        target: u8,
        offset: usize,
        partial: String,
    },

    #[error("no shader header found within {scanned} bytes of {address:#x}")]
    MissingHeader { address: u64, scanned: usize },

    #[error("fetch shader: {0}")]
    FetchShader(String),

    #[error("resource limit exceeded: {0}")]
    Limit(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl ShaderError {
    /// Partially translated WGSL carried by a translation failure
    pub fn partial(&self) -> Option<&str> {
        match self {
            ShaderError::Unsupported { partial, .. } | ShaderError::InvalidExport { partial, .. } => {
                Some(partial)
            }
            _ => None,
        }
    }
}

/// Trailing header of a shader binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderHeader {
    pub version: u8,
    /// Code length in bytes as recorded by the shader compiler
    pub length: u32,
    pub hash: u64,
    pub crc: u32,
}

impl ShaderHeader {
    /// Find the first header in `bytes`
    ///
    /// Returns the byte offset of the magic together with the parsed header.
    /// A magic without enough trailing bytes for a full header is ignored.
    pub fn find(bytes: &[u8]) -> Option<(usize, ShaderHeader)> {
        let pos = bytes
            .windows(HEADER_MAGIC.len())
            .position(|w| w == HEADER_MAGIC)?;
        let raw = bytes.get(pos..pos + HEADER_SIZE)?;
        let u32_at = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        Some((
            pos,
            ShaderHeader {
                version: raw[7],
                length: u32_at(8) >> 8,
                hash: u32_at(16) as u64 | (u32_at(20) as u64) << 32,
                crc: u32_at(24),
            },
        ))
    }

    /// Serialize into the on-disk layout
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..7].copy_from_slice(HEADER_MAGIC);
        out[7] = self.version;
        out[8..12].copy_from_slice(&(self.length << 8).to_le_bytes());
        out[16..20].copy_from_slice(&(self.hash as u32).to_le_bytes());
        out[20..24].copy_from_slice(&((self.hash >> 32) as u32).to_le_bytes());
        out[24..28].copy_from_slice(&self.crc.to_le_bytes());
        out
    }
}

/// Shader code located in guest memory
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderBinary {
    pub address: u64,
    pub header: ShaderHeader,
    /// Code dwords preceding the header
    pub code: Vec<u32>,
}

/// Read the shader at `address`, scanning forward for its header
pub fn read_shader(memory: &dyn GuestMemory, address: u64) -> Result<ShaderBinary, ShaderError> {
    if address == 0 {
        return Err(MemoryError::NullPointer.into());
    }
    let mut bytes = Vec::with_capacity(SCAN_CHUNK * 4);
    while bytes.len() < MAX_SHADER_SIZE {
        let chunk = memory.read_vec(address + bytes.len() as u64, SCAN_CHUNK)?;
        bytes.extend_from_slice(&chunk);
        if let Some((pos, header)) = ShaderHeader::find(&bytes) {
            let code = bytes[..pos & !3]
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            return Ok(ShaderBinary {
                address,
                header,
                code,
            });
        }
    }
    Err(ShaderError::MissingHeader {
        address,
        scanned: bytes.len(),
    })
}

/// Kind of resource descriptor a binding consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptorKind {
    /// Buffer resource (4 dwords), bound as a read-only storage buffer
    VSharp,
    /// Image resource (8 dwords), bound as a sampled texture
    TSharp,
    /// Sampler (4 dwords)
    SSharp,
}

impl DescriptorKind {
    /// Descriptor size in dwords
    pub fn dwords(self) -> usize {
        match self {
            DescriptorKind::TSharp => 8,
            DescriptorKind::VSharp | DescriptorKind::SSharp => 4,
        }
    }

    /// First binding number of this kind within a stage's bind group
    pub fn binding_base(self) -> u32 {
        match self {
            DescriptorKind::VSharp => BUFFER_BINDING_BASE,
            DescriptorKind::TSharp => TEXTURE_BINDING_BASE,
            DescriptorKind::SSharp => SAMPLER_BINDING_BASE,
        }
    }
}

/// Binding numbers within a stage bind group
pub const BUFFER_BINDING_BASE: u32 = 0;
pub const TEXTURE_BINDING_BASE: u32 = 8;
pub const SAMPLER_BINDING_BASE: u32 = 16;
pub const CONSTANTS_BINDING: u32 = 24;

/// Per-kind slot limit
pub const MAX_SLOTS: u32 = 8;

/// Number of scalar-load results forwarded through the stage constants
pub const MAX_RESOLVED: usize = 64;

/// Where a scalar register's value comes from
///
/// Descriptors and scalar loads are resolved on the host at draw time by
/// evaluating these against the current user data and guest memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SgprValue {
    /// User-data register `n` of the stage
    UserData(u8),
    /// Immediate written by a scalar move
    Const(u32),
    /// Dword loaded through a 64-bit pointer held in a register pair
    Memory {
        lo: Box<SgprValue>,
        hi: Box<SgprValue>,
        dword_offset: u32,
    },
}

impl SgprValue {
    /// Evaluate against user data and guest memory
    pub fn resolve(
        &self,
        user_data: &[u32; USER_DATA_COUNT],
        memory: &dyn GuestMemory,
    ) -> Result<u32, MemoryError> {
        match self {
            SgprValue::UserData(n) => Ok(user_data[*n as usize % USER_DATA_COUNT]),
            SgprValue::Const(v) => Ok(*v),
            SgprValue::Memory {
                lo,
                hi,
                dword_offset,
            } => {
                let base = (lo.resolve(user_data, memory)? as u64
                    | (hi.resolve(user_data, memory)? as u64) << 32)
                    & 0xFFFF_FFFF_FFFF;
                memory.read_u32(base + *dword_offset as u64 * 4)
            }
        }
    }
}

/// Resource descriptor consumed by a translated shader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorBinding {
    pub kind: DescriptorKind,
    /// First SGPR the descriptor occupied in the guest program
    pub sgpr: u8,
    /// Provenance of each descriptor dword
    pub dwords: Vec<SgprValue>,
    /// Slot within the kind's binding range
    pub slot: u32,
}

impl DescriptorBinding {
    /// Binding number within the stage bind group
    pub fn binding(&self) -> u32 {
        self.kind.binding_base() + self.slot
    }

    /// Resolve the descriptor dwords
    pub fn resolve(
        &self,
        user_data: &[u32; USER_DATA_COUNT],
        memory: &dyn GuestMemory,
    ) -> Result<Vec<u32>, MemoryError> {
        self.dwords
            .iter()
            .map(|d| d.resolve(user_data, memory))
            .collect()
    }
}

/// Result of translating one guest shader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderData {
    pub hash: u64,
    pub stage: ShaderStage,
    pub wgsl: String,
    /// Descriptors in binding order
    pub descriptors: Vec<DescriptorBinding>,
    /// Scalar-load results forwarded through the stage constants
    pub resolved: Vec<SgprValue>,
    /// Vertex attributes consumed (vertex stage)
    pub vertex_inputs: Vec<VertexInput>,
    /// Interpolant locations read (pixel stage)
    pub ps_inputs: Vec<u8>,
    pub exports: Vec<ExportTarget>,
}

impl ShaderData {
    /// Descriptors of one kind
    pub fn descriptors_of(&self, kind: DescriptorKind) -> impl Iterator<Item = &DescriptorBinding> {
        self.descriptors.iter().filter(move |d| d.kind == kind)
    }

    /// Color targets written by a pixel shader
    pub fn color_exports(&self) -> impl Iterator<Item = u8> + '_ {
        self.exports.iter().filter_map(|e| match e {
            ExportTarget::Color(n) => Some(*n),
            _ => None,
        })
    }

    /// Parameter locations written by a vertex shader
    pub fn param_exports(&self) -> impl Iterator<Item = u8> + '_ {
        self.exports.iter().filter_map(|e| match e {
            ExportTarget::Param(n) => Some(*n),
            _ => None,
        })
    }
}
