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

//! Shader subsystem tests


/// Instruction encoders for building test programs
pub(super) mod enc {
    pub fn vgpr(n: u32) -> u32 {
        256 + n
    }

    pub fn sop1(op: u8, sdst: u32, ssrc0: u32) -> u32 {
        0xBE80_0000 | sdst << 16 | (op as u32) << 8 | ssrc0
    }

    pub fn sopp(op: u8, simm16: u16) -> u32 {
        0xBF80_0000 | (op as u32) << 16 | simm16 as u32
    }

    pub fn endpgm() -> u32 {
        sopp(super::super::gcn::op::S_ENDPGM, 0)
    }

    pub fn smrd(op: u8, sdst: u32, sbase: u32, offset: u8) -> u32 {
        0xC000_0000 | (op as u32) << 22 | sdst << 15 | (sbase / 2) << 9 | 1 << 8 | offset as u32
    }

    pub fn vop1(op: u8, vdst: u32, src0: u32) -> u32 {
        0x7E00_0000 | vdst << 17 | (op as u32) << 9 | src0
    }

    pub fn vop2(op: u8, vdst: u32, src0: u32, vsrc1: u32) -> u32 {
        (op as u32) << 25 | vdst << 17 | vsrc1 << 9 | src0
    }

    pub fn vopc(op: u8, src0: u32, vsrc1: u32) -> u32 {
        0x7C00_0000 | (op as u32) << 17 | vsrc1 << 9 | src0
    }

    pub fn vintrp(op: u8, vdst: u32, vsrc: u32, attr: u32, chan: u32) -> u32 {
        0xC800_0000 | vdst << 18 | (op as u32) << 16 | attr << 10 | chan << 8 | vsrc
    }

    pub fn exp(target: u32, en: u32, compr: bool, vsrc: [u32; 4]) -> [u32; 2] {
        [
            0xF800_0000 | 1 << 11 | (compr as u32) << 10 | target << 4 | en,
            vsrc[0] | vsrc[1] << 8 | vsrc[2] << 16 | vsrc[3] << 24,
        ]
    }

    pub fn mimg(op: u8, dmask: u32, vdata: u32, vaddr: u32, srsrc: u32, ssamp: u32) -> [u32; 2] {
        [
            0xF000_0000 | (op as u32) << 18 | dmask << 8,
            vaddr | vdata << 8 | (srsrc / 4) << 16 | (ssamp / 4) << 21,
        ]
    }

    pub fn mubuf(op: u8, vdata: u32, vaddr: u32, srsrc: u32, idxen: bool) -> [u32; 2] {
        [
            0xE000_0000 | (op as u32) << 18 | (idxen as u32) << 13,
            vaddr | vdata << 8 | (srsrc / 4) << 16 | 0x80 << 24,
        ]
    }
}

/// Parse and validate a generated module, panicking with the source on failure
pub(super) fn validate_wgsl(source: &str) {
    let module = naga::front::wgsl::parse_str(source)
        .unwrap_or_else(|e| panic!("{}\n{}", e.emit_to_string(source), source));
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .unwrap_or_else(|e| panic!("{:?}\n{}", e, source));
}
