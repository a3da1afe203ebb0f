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

//! Fetch-shader parsing
//!
//! A vertex shader's attribute loads live in a small subroutine (the fetch
//! shader) that the main program calls with `S_SWAPPC_B64`. Its shape is
//! fixed: scalar loads bring V# descriptors into SGPRs, buffer loads pull each
//! attribute into a VGPR range, and `S_SETPC_B64` returns. The parser records
//! which descriptor feeds which registers so the host can bind the attribute
//! streams as vertex buffers and the translator can seed the registers from
//! vertex inputs instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::gcn::{op, Decoder, Inst};
use super::ShaderError;
use crate::core::gpu::registers::USER_DATA_COUNT;
use crate::core::memory::GuestMemory;

/// Longest fetch shader accepted, in dwords
pub const MAX_FETCH_SHADER_DWORDS: usize = 1024;

/// Where a vertex buffer's V# lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VsharpLocation {
    /// SGPR the descriptor is loaded into
    pub sgpr: u8,
    /// SGPR pair holding the descriptor table pointer
    pub ptr_sgpr: u8,
    /// Dword offset of the descriptor from the pointer
    pub dword_offset: u32,
}

/// One attribute load performed by the fetch shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchShaderVertexBinding {
    /// Attribute index in program order
    pub index: u32,
    pub location: VsharpLocation,
    /// First VGPR written
    pub dest_vgpr: u8,
    /// Number of consecutive VGPRs written
    pub n_elements: u8,
    /// Byte offset of the attribute within a vertex
    pub attr_offset: u16,
    /// Format override carried by `TBUFFER_LOAD_FORMAT_*` as `(dfmt, nfmt)`
    pub format: Option<(u8, u8)>,
}

/// Parse a fetch shader into its attribute bindings
///
/// Only scalar loads, buffer loads and the terminating `S_SETPC_B64` are
/// interpreted; waits and anything else are skipped.
pub fn parse_fetch_shader(code: &[u32]) -> Result<Vec<FetchShaderVertexBinding>, ShaderError> {
    let mut loaded: HashMap<u8, VsharpLocation> = HashMap::new();
    let mut bindings = Vec::new();
    let mut terminated = false;

    for inst in Decoder::new(code) {
        let inst = inst?;
        match inst.inst {
            Inst::Smrd {
                op: op_code @ 1..=4,
                sdst,
                sbase,
                imm: true,
                offset,
            } => {
                // Each V# is 4 dwords; wider loads bring in consecutive descriptors
                let count = (1u32 << op_code) / 4;
                for i in 0..count.max(1) {
                    let sgpr = sdst + (i * 4) as u8;
                    loaded.insert(
                        sgpr,
                        VsharpLocation {
                            sgpr,
                            ptr_sgpr: sbase,
                            dword_offset: offset as u32 + i * 4,
                        },
                    );
                }
            }
            Inst::Mtbuf { inst: b, dfmt, nfmt } if b.op <= op::TBUFFER_LOAD_FORMAT_XYZW => {
                let location = *loaded.get(&b.srsrc).ok_or_else(|| {
                    ShaderError::FetchShader(format!(
                        "buffer load at {:#x} uses s{} which holds no descriptor",
                        inst.offset, b.srsrc
                    ))
                })?;
                bindings.push(FetchShaderVertexBinding {
                    index: bindings.len() as u32,
                    location,
                    dest_vgpr: b.vdata,
                    n_elements: b.op + 1,
                    attr_offset: b.offset,
                    format: Some((dfmt, nfmt)),
                });
            }
            Inst::Mubuf(b) if b.op <= op::BUFFER_LOAD_FORMAT_XYZW => {
                let location = *loaded.get(&b.srsrc).ok_or_else(|| {
                    ShaderError::FetchShader(format!(
                        "buffer load at {:#x} uses s{} which holds no descriptor",
                        inst.offset, b.srsrc
                    ))
                })?;
                bindings.push(FetchShaderVertexBinding {
                    index: bindings.len() as u32,
                    location,
                    dest_vgpr: b.vdata,
                    n_elements: b.op + 1,
                    attr_offset: b.offset,
                    format: None,
                });
            }
            Inst::Sop1 {
                op: op::S_SETPC_B64,
                ..
            } => {
                terminated = true;
                break;
            }
            _ => {}
        }
    }

    if !terminated {
        return Err(ShaderError::FetchShader(
            "no S_SETPC_B64 before end of code".into(),
        ));
    }
    Ok(bindings)
}

/// Address of the fetch shader a vertex shader calls, if any
///
/// The call is an `S_SWAPPC_B64` whose target pair was filled from user data
/// before the first non-scalar instruction.
pub fn fetch_shader_address(vs_code: &[u32], user_data: &[u32; USER_DATA_COUNT]) -> Option<u64> {
    for inst in Decoder::new(vs_code) {
        match inst.ok()?.inst {
            Inst::Sop1 {
                op: op::S_SWAPPC_B64,
                ssrc0: super::gcn::Operand::Sgpr(pair),
                ..
            } if (pair as usize) + 1 < USER_DATA_COUNT => {
                let pair = pair as usize;
                return Some(user_data[pair] as u64 | (user_data[pair + 1] as u64) << 32);
            }
            Inst::Sopp { op: op::S_ENDPGM, .. } => return None,
            _ => {}
        }
    }
    None
}

/// Read a fetch shader from guest memory
///
/// The code carries no header, so memory is read in growing windows until
/// the decoder reaches the return.
pub fn read_fetch_shader(memory: &dyn GuestMemory, address: u64) -> Result<Vec<u32>, ShaderError> {
    let mut words = Vec::new();
    while words.len() < MAX_FETCH_SHADER_DWORDS {
        words.extend(memory.read_dwords(address + words.len() as u64 * 4, 64)?);
        let mut ended = false;
        for inst in Decoder::new(&words) {
            match inst {
                Ok(inst) => {
                    if matches!(inst.inst, Inst::Sop1 { op: op::S_SETPC_B64, .. }) {
                        ended = true;
                        break;
                    }
                }
                // The window may cut a two-dword instruction in half
                Err(ShaderError::Truncated { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        if ended {
            return Ok(words);
        }
    }
    Err(ShaderError::FetchShader(format!(
        "no return within {} dwords of {:#x}",
        MAX_FETCH_SHADER_DWORDS, address
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FETCH: [u32; 4] = [0xC082_0304, 0xEBF3_2000, 0x8001_0400, 0xBE80_2000];

    #[test]
    fn test_single_attribute_fetch_shader() {
        let bindings = parse_fetch_shader(&FETCH).unwrap();
        assert_eq!(bindings.len(), 1);
        let b = bindings[0];
        assert_eq!(b.dest_vgpr, 4);
        assert_eq!(b.n_elements, 4);
        assert_eq!(
            b.location,
            VsharpLocation {
                sgpr: 4,
                ptr_sgpr: 2,
                dword_offset: 4
            }
        );
        assert_eq!(b.format, Some((14, 7)));
    }

    #[test]
    fn test_missing_return_is_rejected() {
        assert!(matches!(
            parse_fetch_shader(&FETCH[..3]),
            Err(ShaderError::FetchShader(_))
        ));
    }

    #[test]
    fn test_load_without_descriptor_is_rejected() {
        assert!(parse_fetch_shader(&FETCH[1..]).is_err());
    }

    #[test]
    fn test_fetch_shader_address_from_user_data() {
        // s_swappc_b64 s[0:1], s[2:3]
        let vs = [0xBE80_2102, 0xBF81_0000];
        let mut user_data = [0u32; USER_DATA_COUNT];
        user_data[2] = 0x2000;
        user_data[3] = 0x1;
        assert_eq!(fetch_shader_address(&vs, &user_data), Some(0x1_0000_2000));
        assert_eq!(fetch_shader_address(&[0xBF81_0000], &user_data), None);
    }
}
