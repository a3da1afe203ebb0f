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

//! GCN instruction decoder
//!
//! Decodes the Sea Islands encodings the translator and fetch-shader parser
//! care about into typed [`Inst`] values. Every encoding's length is known so
//! unsupported instructions can still be skipped over or reported with their
//! offset.
//!
//! | Encoding | Identifying bits        | Dwords |
//! |----------|-------------------------|--------|
//! | SOP2     | `10` (31:30)            | 1 (+literal) |
//! | SOPK     | `1011` (31:28)          | 1      |
//! | SOP1     | `101111101` (31:23)     | 1 (+literal) |
//! | SOPC     | `101111110` (31:23)     | 1 (+literal) |
//! | SOPP     | `101111111` (31:23)     | 1      |
//! | SMRD     | `11000` (31:27)         | 1      |
//! | VOP2     | `0` (31)                | 1 (+literal) |
//! | VOP1     | `0111111` (31:25)       | 1 (+literal) |
//! | VOPC     | `0111110` (31:25)       | 1 (+literal) |
//! | VOP3     | `110100` (31:26)        | 2      |
//! | VINTRP   | `110010` (31:26)        | 1      |
//! | DS       | `110110` (31:26)        | 2      |
//! | MUBUF    | `111000` (31:26)        | 2      |
//! | MTBUF    | `111010` (31:26)        | 2      |
//! | MIMG     | `111100` (31:26)        | 2      |
//! | EXP      | `111110` (31:26)        | 2      |

use std::fmt;

use super::ShaderError;

/// Opcode numbers used by the translator
pub mod op {
    // SOPP
    pub const S_NOP: u8 = 0x00;
    pub const S_ENDPGM: u8 = 0x01;
    pub const S_WAITCNT: u8 = 0x0C;

    // SOP1
    pub const S_MOV_B32: u8 = 0x03;
    pub const S_MOV_B64: u8 = 0x04;
    pub const S_WQM_B64: u8 = 0x0A;
    pub const S_SETPC_B64: u8 = 0x20;
    pub const S_SWAPPC_B64: u8 = 0x21;

    // SOPK
    pub const S_MOVK_I32: u8 = 0x00;

    // SMRD
    pub const S_LOAD_DWORD: u8 = 0x00;
    pub const S_LOAD_DWORDX16: u8 = 0x04;
    pub const S_BUFFER_LOAD_DWORD: u8 = 0x08;
    pub const S_BUFFER_LOAD_DWORDX16: u8 = 0x0C;

    // VOP1
    pub const V_NOP: u8 = 0x00;
    pub const V_MOV_B32: u8 = 0x01;
    pub const V_CVT_F32_I32: u8 = 0x05;
    pub const V_CVT_F32_U32: u8 = 0x06;
    pub const V_CVT_U32_F32: u8 = 0x07;
    pub const V_CVT_I32_F32: u8 = 0x08;
    pub const V_CVT_F16_F32: u8 = 0x0A;
    pub const V_CVT_F32_F16: u8 = 0x0B;
    pub const V_FRACT_F32: u8 = 0x20;
    pub const V_TRUNC_F32: u8 = 0x21;
    pub const V_CEIL_F32: u8 = 0x22;
    pub const V_RNDNE_F32: u8 = 0x23;
    pub const V_FLOOR_F32: u8 = 0x24;
    pub const V_EXP_F32: u8 = 0x25;
    pub const V_LOG_F32: u8 = 0x27;
    pub const V_RCP_F32: u8 = 0x2A;
    pub const V_RSQ_F32: u8 = 0x2E;
    pub const V_SQRT_F32: u8 = 0x33;
    pub const V_SIN_F32: u8 = 0x35;
    pub const V_COS_F32: u8 = 0x36;
    pub const V_NOT_B32: u8 = 0x37;

    // VOP2
    pub const V_ADD_F32: u8 = 0x03;
    pub const V_SUB_F32: u8 = 0x04;
    pub const V_SUBREV_F32: u8 = 0x05;
    pub const V_MUL_F32: u8 = 0x08;
    pub const V_MIN_F32: u8 = 0x0F;
    pub const V_MAX_F32: u8 = 0x10;
    pub const V_LSHRREV_B32: u8 = 0x16;
    pub const V_LSHLREV_B32: u8 = 0x1A;
    pub const V_AND_B32: u8 = 0x1B;
    pub const V_OR_B32: u8 = 0x1C;
    pub const V_XOR_B32: u8 = 0x1D;
    pub const V_MAC_F32: u8 = 0x1F;
    pub const V_MADMK_F32: u8 = 0x20;
    pub const V_MADAK_F32: u8 = 0x21;
    pub const V_ADD_I32: u8 = 0x25;
    pub const V_CVT_PKRTZ_F16_F32: u8 = 0x2F;

    // VOP3-only
    pub const V_MAD_F32: u16 = 0x141;
    pub const V_FMA_F32: u16 = 0x14B;
    /// VOP3 opcode of a VOP2 instruction
    pub const VOP3_FROM_VOP2: u16 = 0x100;
    /// VOP3 opcode of a VOP1 instruction
    pub const VOP3_FROM_VOP1: u16 = 0x180;

    // VINTRP
    pub const V_INTERP_P1_F32: u8 = 0x00;
    pub const V_INTERP_P2_F32: u8 = 0x01;
    pub const V_INTERP_MOV_F32: u8 = 0x02;

    // MUBUF
    pub const BUFFER_LOAD_FORMAT_X: u8 = 0x00;
    pub const BUFFER_LOAD_FORMAT_XYZW: u8 = 0x03;
    pub const BUFFER_LOAD_DWORD: u8 = 0x0C;
    pub const BUFFER_LOAD_DWORDX3: u8 = 0x0F;
    pub const BUFFER_LOAD_DWORDX2: u8 = 0x0D;
    pub const BUFFER_LOAD_DWORDX4: u8 = 0x0E;

    // MTBUF
    pub const TBUFFER_LOAD_FORMAT_X: u8 = 0x00;
    pub const TBUFFER_LOAD_FORMAT_XYZW: u8 = 0x03;

    // MIMG
    pub const IMAGE_SAMPLE: u8 = 0x20;
    pub const IMAGE_SAMPLE_L: u8 = 0x24;
    pub const IMAGE_SAMPLE_LZ: u8 = 0x27;
}

/// Scalar or vector source operand
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Sgpr(u8),
    Vgpr(u8),
    VccLo,
    VccHi,
    M0,
    ExecLo,
    ExecHi,
    /// Inline integer constant (128-208)
    Int(i32),
    /// Inline float constant (240-247)
    Float(f32),
    /// Trailing 32-bit literal (255)
    ///
    /// For `V_MADMK_F32`/`V_MADAK_F32` the constant lives in
    /// the `literal` field of [`Inst::Vop2`] instead.
    Literal(u32),
    /// Any other encoding
    Other(u16),
}

impl Operand {
    /// Decode a 9-bit source field (VGPRs at 256+)
    pub fn decode(code: u16, literal: Option<u32>) -> Self {
        match code {
            0..=103 => Operand::Sgpr(code as u8),
            106 => Operand::VccLo,
            107 => Operand::VccHi,
            124 => Operand::M0,
            126 => Operand::ExecLo,
            127 => Operand::ExecHi,
            128..=192 => Operand::Int(code as i32 - 128),
            193..=208 => Operand::Int(192 - code as i32),
            240 => Operand::Float(0.5),
            241 => Operand::Float(-0.5),
            242 => Operand::Float(1.0),
            243 => Operand::Float(-1.0),
            244 => Operand::Float(2.0),
            245 => Operand::Float(-2.0),
            246 => Operand::Float(4.0),
            247 => Operand::Float(-4.0),
            255 => Operand::Literal(literal.unwrap_or(0)),
            256..=511 => Operand::Vgpr((code - 256) as u8),
            other => Operand::Other(other),
        }
    }

    /// Bit pattern of a constant operand
    pub fn constant_bits(&self) -> Option<u32> {
        match *self {
            Operand::Int(i) => Some(i as u32),
            Operand::Float(f) => Some(f.to_bits()),
            Operand::Literal(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Sgpr(n) => write!(f, "s{}", n),
            Operand::Vgpr(n) => write!(f, "v{}", n),
            Operand::VccLo => write!(f, "vcc_lo"),
            Operand::VccHi => write!(f, "vcc_hi"),
            Operand::M0 => write!(f, "m0"),
            Operand::ExecLo => write!(f, "exec_lo"),
            Operand::ExecHi => write!(f, "exec_hi"),
            Operand::Int(i) => write!(f, "{}", i),
            Operand::Float(v) => write!(f, "{:?}", v),
            Operand::Literal(l) => write!(f, "0x{:08X}", l),
            Operand::Other(c) => write!(f, "src{}", c),
        }
    }
}

/// Decoded instruction fields
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Sop2 { op: u8, sdst: u8, ssrc0: Operand, ssrc1: Operand },
    Sopk { op: u8, sdst: u8, simm16: u16 },
    Sop1 { op: u8, sdst: u8, ssrc0: Operand },
    Sopc { op: u8, ssrc0: Operand, ssrc1: Operand },
    Sopp { op: u8, simm16: u16 },
    Smrd { op: u8, sdst: u8, sbase: u8, imm: bool, offset: u8 },
    Vop2 { op: u8, vdst: u8, src0: Operand, vsrc1: u8, literal: Option<u32> },
    Vop1 { op: u8, vdst: u8, src0: Operand },
    Vopc { op: u8, src0: Operand, vsrc1: u8 },
    Vop3 {
        op: u16,
        vdst: u8,
        src: [Operand; 3],
        abs: u8,
        neg: u8,
        clamp: bool,
        omod: u8,
    },
    Vintrp { op: u8, vdst: u8, vsrc: u8, attr: u8, chan: u8 },
    Ds { op: u8 },
    Mubuf(BufferInst),
    Mtbuf { inst: BufferInst, dfmt: u8, nfmt: u8 },
    Mimg { op: u8, vdata: u8, vaddr: u8, srsrc: u8, ssamp: u8, dmask: u8 },
    Exp { target: u8, en: u8, compr: bool, done: bool, vsrc: [u8; 4] },
}

/// Fields shared by MUBUF and MTBUF
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferInst {
    pub op: u8,
    pub vdata: u8,
    pub vaddr: u8,
    /// First SGPR of the V# (multiple of 4)
    pub srsrc: u8,
    pub soffset: Operand,
    pub offset: u16,
    pub offen: bool,
    pub idxen: bool,
}

/// Instruction with its location
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset from the start of the program
    pub offset: usize,
    /// Length in dwords
    pub len: usize,
    pub inst: Inst,
}

fn bits(word: u32, lo: u32, width: u32) -> u32 {
    (word >> lo) & ((1 << width) - 1)
}

/// Decode the instruction at dword `pos`
pub fn decode(code: &[u32], pos: usize) -> Result<Instruction, ShaderError> {
    let word = *code.get(pos).ok_or(ShaderError::Truncated { offset: pos * 4 })?;
    let next = code.get(pos + 1).copied();
    let second = || next.ok_or(ShaderError::Truncated { offset: pos * 4 + 4 });

    let literal_for = |fields: &[u32]| -> Result<Option<u32>, ShaderError> {
        if fields.contains(&255) {
            second().map(Some)
        } else {
            Ok(None)
        }
    };

    let inst = if word >> 23 == 0x17D {
        let ssrc0 = bits(word, 0, 8);
        let lit = literal_for(&[ssrc0])?;
        Inst::Sop1 {
            op: bits(word, 8, 8) as u8,
            sdst: bits(word, 16, 7) as u8,
            ssrc0: Operand::decode(ssrc0 as u16, lit),
        }
    } else if word >> 23 == 0x17E {
        let (s0, s1) = (bits(word, 0, 8), bits(word, 8, 8));
        let lit = literal_for(&[s0, s1])?;
        Inst::Sopc {
            op: bits(word, 16, 7) as u8,
            ssrc0: Operand::decode(s0 as u16, lit),
            ssrc1: Operand::decode(s1 as u16, lit),
        }
    } else if word >> 23 == 0x17F {
        Inst::Sopp {
            op: bits(word, 16, 7) as u8,
            simm16: bits(word, 0, 16) as u16,
        }
    } else if word >> 28 == 0xB {
        Inst::Sopk {
            op: bits(word, 23, 5) as u8,
            sdst: bits(word, 16, 7) as u8,
            simm16: bits(word, 0, 16) as u16,
        }
    } else if word >> 30 == 0x2 {
        let (s0, s1) = (bits(word, 0, 8), bits(word, 8, 8));
        let lit = literal_for(&[s0, s1])?;
        Inst::Sop2 {
            op: bits(word, 23, 7) as u8,
            sdst: bits(word, 16, 7) as u8,
            ssrc0: Operand::decode(s0 as u16, lit),
            ssrc1: Operand::decode(s1 as u16, lit),
        }
    } else if word >> 27 == 0x18 {
        Inst::Smrd {
            op: bits(word, 22, 5) as u8,
            sdst: bits(word, 15, 7) as u8,
            sbase: (bits(word, 9, 6) * 2) as u8,
            imm: bits(word, 8, 1) != 0,
            offset: bits(word, 0, 8) as u8,
        }
    } else if word >> 31 == 0 {
        let src0 = bits(word, 0, 9);
        match word >> 25 {
            0x3F => {
                let lit = literal_for(&[src0])?;
                Inst::Vop1 {
                    op: bits(word, 9, 8) as u8,
                    vdst: bits(word, 17, 8) as u8,
                    src0: Operand::decode(src0 as u16, lit),
                }
            }
            0x3E => {
                let lit = literal_for(&[src0])?;
                Inst::Vopc {
                    op: bits(word, 17, 8) as u8,
                    src0: Operand::decode(src0 as u16, lit),
                    vsrc1: bits(word, 9, 8) as u8,
                }
            }
            _ => {
                let op = bits(word, 25, 6) as u8;
                let has_k = op == op::V_MADMK_F32 || op == op::V_MADAK_F32;
                let lit = if has_k {
                    Some(second()?)
                } else {
                    literal_for(&[src0])?
                };
                Inst::Vop2 {
                    op,
                    vdst: bits(word, 17, 8) as u8,
                    src0: Operand::decode(src0 as u16, if has_k { None } else { lit }),
                    vsrc1: bits(word, 9, 8) as u8,
                    literal: if has_k { lit } else { None },
                }
            }
        }
    } else {
        match word >> 26 {
            0x34 => {
                let w1 = second()?;
                Inst::Vop3 {
                    op: bits(word, 17, 9) as u16,
                    vdst: bits(word, 0, 8) as u8,
                    src: [
                        Operand::decode(bits(w1, 0, 9) as u16, None),
                        Operand::decode(bits(w1, 9, 9) as u16, None),
                        Operand::decode(bits(w1, 18, 9) as u16, None),
                    ],
                    abs: bits(word, 8, 3) as u8,
                    neg: bits(w1, 29, 3) as u8,
                    clamp: bits(word, 11, 1) != 0,
                    omod: bits(w1, 27, 2) as u8,
                }
            }
            0x32 => Inst::Vintrp {
                op: bits(word, 16, 2) as u8,
                vdst: bits(word, 18, 8) as u8,
                vsrc: bits(word, 0, 8) as u8,
                attr: bits(word, 10, 6) as u8,
                chan: bits(word, 8, 2) as u8,
            },
            0x36 => {
                second()?;
                Inst::Ds {
                    op: bits(word, 18, 8) as u8,
                }
            }
            0x38 | 0x3A => {
                let w1 = second()?;
                let is_tbuffer = word >> 26 == 0x3A;
                let inst = BufferInst {
                    op: if is_tbuffer {
                        bits(word, 16, 3) as u8
                    } else {
                        bits(word, 18, 7) as u8
                    },
                    vdata: bits(w1, 8, 8) as u8,
                    vaddr: bits(w1, 0, 8) as u8,
                    srsrc: (bits(w1, 16, 5) * 4) as u8,
                    soffset: Operand::decode(bits(w1, 24, 8) as u16, None),
                    offset: bits(word, 0, 12) as u16,
                    offen: bits(word, 12, 1) != 0,
                    idxen: bits(word, 13, 1) != 0,
                };
                if is_tbuffer {
                    Inst::Mtbuf {
                        inst,
                        dfmt: bits(word, 19, 4) as u8,
                        nfmt: bits(word, 23, 3) as u8,
                    }
                } else {
                    Inst::Mubuf(inst)
                }
            }
            0x3C => {
                let w1 = second()?;
                Inst::Mimg {
                    op: bits(word, 18, 7) as u8,
                    vdata: bits(w1, 8, 8) as u8,
                    vaddr: bits(w1, 0, 8) as u8,
                    srsrc: (bits(w1, 16, 5) * 4) as u8,
                    ssamp: (bits(w1, 21, 5) * 4) as u8,
                    dmask: bits(word, 8, 4) as u8,
                }
            }
            0x3E => {
                let w1 = second()?;
                Inst::Exp {
                    target: bits(word, 4, 6) as u8,
                    en: bits(word, 0, 4) as u8,
                    compr: bits(word, 10, 1) != 0,
                    done: bits(word, 11, 1) != 0,
                    vsrc: [
                        bits(w1, 0, 8) as u8,
                        bits(w1, 8, 8) as u8,
                        bits(w1, 16, 8) as u8,
                        bits(w1, 24, 8) as u8,
                    ],
                }
            }
            _ => {
                return Err(ShaderError::UnknownEncoding {
                    offset: pos * 4,
                    word,
                })
            }
        }
    };

    let len = match &inst {
        Inst::Sop1 { ssrc0: a, .. } | Inst::Vop1 { src0: a, .. } | Inst::Vopc { src0: a, .. } => {
            1 + matches!(a, Operand::Literal(_)) as usize
        }
        Inst::Sop2 { ssrc0, ssrc1, .. } | Inst::Sopc { ssrc0, ssrc1, .. } => {
            1 + (matches!(ssrc0, Operand::Literal(_)) || matches!(ssrc1, Operand::Literal(_))) as usize
        }
        Inst::Vop2 { literal, src0, .. } => {
            1 + (literal.is_some() || matches!(src0, Operand::Literal(_))) as usize
        }
        Inst::Vop3 { .. }
        | Inst::Ds { .. }
        | Inst::Mubuf(_)
        | Inst::Mtbuf { .. }
        | Inst::Mimg { .. }
        | Inst::Exp { .. } => 2,
        Inst::Sopk { .. } | Inst::Sopp { .. } | Inst::Smrd { .. } | Inst::Vintrp { .. } => 1,
    };

    Ok(Instruction {
        offset: pos * 4,
        len,
        inst,
    })
}

/// Sequential decoder over a program
pub struct Decoder<'a> {
    code: &'a [u32],
    pos: usize,
    failed: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(code: &'a [u32]) -> Self {
        Self {
            code,
            pos: 0,
            failed: false,
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<Instruction, ShaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.code.len() {
            return None;
        }
        match decode(self.code, self.pos) {
            Ok(inst) => {
                self.pos += inst.len;
                Some(Ok(inst))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl Instruction {
    /// Whether this instruction ends the program
    pub fn is_end(&self) -> bool {
        matches!(self.inst, Inst::Sopp { op: op::S_ENDPGM, .. })
    }

    /// Short mnemonic-style name used in diagnostics
    pub fn name(&self) -> String {
        match &self.inst {
            Inst::Sop2 { op, .. } => format!("sop2.{:#x}", op),
            Inst::Sopk { op, .. } => match *op {
                op::S_MOVK_I32 => "s_movk_i32".into(),
                other => format!("sopk.{:#x}", other),
            },
            Inst::Sop1 { op, .. } => match *op {
                op::S_MOV_B32 => "s_mov_b32".into(),
                op::S_MOV_B64 => "s_mov_b64".into(),
                op::S_WQM_B64 => "s_wqm_b64".into(),
                op::S_SETPC_B64 => "s_setpc_b64".into(),
                op::S_SWAPPC_B64 => "s_swappc_b64".into(),
                other => format!("sop1.{:#x}", other),
            },
            Inst::Sopc { op, .. } => format!("sopc.{:#x}", op),
            Inst::Sopp { op, .. } => match *op {
                op::S_NOP => "s_nop".into(),
                op::S_ENDPGM => "s_endpgm".into(),
                op::S_WAITCNT => "s_waitcnt".into(),
                other => format!("sopp.{:#x}", other),
            },
            Inst::Smrd { op, .. } => match *op {
                0..=4 => format!("s_load_dwordx{}", 1 << op),
                8..=12 => format!("s_buffer_load_dwordx{}", 1 << (op - 8)),
                other => format!("smrd.{:#x}", other),
            },
            Inst::Vop2 { op, .. } => format!("vop2.{:#x}", op),
            Inst::Vop1 { op, .. } => format!("vop1.{:#x}", op),
            Inst::Vopc { op, .. } => format!("vopc.{:#x}", op),
            Inst::Vop3 { op, .. } => format!("vop3.{:#x}", op),
            Inst::Vintrp { op, .. } => match *op {
                op::V_INTERP_P1_F32 => "v_interp_p1_f32".into(),
                op::V_INTERP_P2_F32 => "v_interp_p2_f32".into(),
                _ => "v_interp_mov_f32".into(),
            },
            Inst::Ds { op } => format!("ds.{:#x}", op),
            Inst::Mubuf(b) => format!("mubuf.{:#x}", b.op),
            Inst::Mtbuf { inst, .. } => match inst.op {
                0..=3 => format!("tbuffer_load_format_{}", ["x", "xy", "xyz", "xyzw"][inst.op as usize]),
                other => format!("mtbuf.{:#x}", other),
            },
            Inst::Mimg { op, .. } => match *op {
                op::IMAGE_SAMPLE => "image_sample".into(),
                op::IMAGE_SAMPLE_L => "image_sample_l".into(),
                op::IMAGE_SAMPLE_LZ => "image_sample_lz".into(),
                other => format!("mimg.{:#x}", other),
            },
            Inst::Exp { .. } => "exp".into(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}: {}", self.offset, self.name())?;
        match &self.inst {
            Inst::Sop1 { sdst, ssrc0, .. } => write!(f, " s{}, {}", sdst, ssrc0),
            Inst::Sop2 { sdst, ssrc0, ssrc1, .. } => write!(f, " s{}, {}, {}", sdst, ssrc0, ssrc1),
            Inst::Sopk { sdst, simm16, .. } => write!(f, " s{}, {:#x}", sdst, simm16),
            Inst::Sopc { ssrc0, ssrc1, .. } => write!(f, " {}, {}", ssrc0, ssrc1),
            Inst::Sopp { simm16, .. } => write!(f, " {:#x}", simm16),
            Inst::Smrd { sdst, sbase, imm, offset, .. } => {
                if *imm {
                    write!(f, " s{}, s[{}:{}], {:#x}", sdst, sbase, sbase + 1, offset)
                } else {
                    write!(f, " s{}, s[{}:{}], s{}", sdst, sbase, sbase + 1, offset)
                }
            }
            Inst::Vop1 { vdst, src0, .. } => write!(f, " v{}, {}", vdst, src0),
            Inst::Vop2 { vdst, src0, vsrc1, literal, .. } => {
                write!(f, " v{}, {}, v{}", vdst, src0, vsrc1)?;
                match literal {
                    Some(k) => write!(f, ", 0x{:08X}", k),
                    None => Ok(()),
                }
            }
            Inst::Vopc { src0, vsrc1, .. } => write!(f, " vcc, {}, v{}", src0, vsrc1),
            Inst::Vop3 { vdst, src, .. } => write!(f, " v{}, {}, {}, {}", vdst, src[0], src[1], src[2]),
            Inst::Vintrp { vdst, vsrc, attr, chan, .. } => {
                write!(f, " v{}, v{}, attr{}.{}", vdst, vsrc, attr, ['x', 'y', 'z', 'w'][*chan as usize & 3])
            }
            Inst::Ds { .. } => Ok(()),
            Inst::Mubuf(b) | Inst::Mtbuf { inst: b, .. } => write!(
                f,
                " v{}, v{}, s[{}:{}], {} offset:{}{}{}",
                b.vdata,
                b.vaddr,
                b.srsrc,
                b.srsrc + 3,
                b.soffset,
                b.offset,
                if b.idxen { " idxen" } else { "" },
                if b.offen { " offen" } else { "" }
            ),
            Inst::Mimg { vdata, vaddr, srsrc, ssamp, dmask, .. } => write!(
                f,
                " v{}, v{}, s[{}:{}], s[{}:{}] dmask:{:#x}",
                vdata,
                vaddr,
                srsrc,
                srsrc + 7,
                ssamp,
                ssamp + 3,
                dmask
            ),
            Inst::Exp { target, en, compr, done, vsrc } => write!(
                f,
                " tgt{} v{}, v{}, v{}, v{} en:{:#x}{}{}",
                target,
                vsrc[0],
                vsrc[1],
                vsrc[2],
                vsrc[3],
                en,
                if *compr { " compr" } else { "" },
                if *done { " done" } else { "" }
            ),
        }
    }
}

/// Disassemble until `S_ENDPGM`, `S_SETPC_B64` or the end of `code`
pub fn disassemble(code: &[u32]) -> Result<Vec<String>, ShaderError> {
    let mut lines = Vec::new();
    for inst in Decoder::new(code) {
        let inst = inst?;
        lines.push(inst.to_string());
        if inst.is_end() || matches!(inst.inst, Inst::Sop1 { op: op::S_SETPC_B64, .. }) {
            break;
        }
    }
    Ok(lines)
}
