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

//! Error types for the graphics core
//!
//! Failures fall into two classes. Fatal decode errors (malformed packets,
//! unresolvable hardware enum values, unsupported shader instructions) and
//! host resource errors are returned as [`GpuError`] and halt the buffer
//! being processed. Unimplemented-but-safe cases never reach this type: they
//! are logged and skipped where they occur.

use thiserror::Error;

use super::memory::MemoryError;
use super::shader::ShaderError;

/// Graphics core error type
#[derive(Error, Debug)]
pub enum GpuError {
    /// PM4 packet of a type the interpreter refuses to process
    #[error("unsupported PM4 packet type {packet_type} (header 0x{header:08X}) at dword {offset}")]
    UnsupportedPacketType {
        packet_type: u32,
        header: u32,
        offset: usize,
    },

    /// Packet whose payload runs past the end of its buffer
    #[error("truncated PM4 packet at dword {offset}: needs {needed} dwords, {available} available")]
    TruncatedPacket {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Set*Reg packet addressing outside the register file
    #[error("register write out of range: index 0x{index:X}, count {count}")]
    RegisterOutOfRange { index: u32, count: u32 },

    /// Hardware enum value with no host mapping
    #[error("unsupported {kind} value {value}")]
    InvalidEnum { kind: &'static str, value: u32 },

    /// Packet sub-mode that must fail loudly instead of being approximated
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Guest memory access failure
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Shader decode or translation failure
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// Counter wait released because the other engine failed
    #[error("{wait} released: the other engine aborted")]
    EngineAborted { wait: &'static str },

    /// Host graphics API resource failure
    #[error("host resource error: {0}")]
    Resource(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Submission capture encode/decode failure
    #[error("capture error: {0}")]
    Capture(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for graphics core operations
pub type Result<T> = std::result::Result<T, GpuError>;

/// Shorthand for [`GpuError::InvalidEnum`]
pub(crate) fn invalid_enum(kind: &'static str, value: u32) -> GpuError {
    GpuError::InvalidEnum { kind, value }
}
