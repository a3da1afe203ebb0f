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

//! GCN → WGSL translation
//!
//! A single forward pass over the decoded program. Each instruction is
//! lowered to IR statements while the scalar registers are annotated with
//! their provenance ([`SgprValue`]), so descriptor uses can be traced back to
//! user data and pointer loads and turned into host bindings on the spot.
//!
//! Scalar loads emit nothing by themselves. Their results only reach the
//! generated code when an ALU instruction reads them, at which point the
//! value is forwarded through a resolved-constant slot the host fills at
//! draw time.

use serde::{Deserialize, Serialize};

use super::fetch::FetchShaderVertexBinding;
use super::gcn::{op, BufferInst, Decoder, Inst, Instruction, Operand};
use super::ir::{BinOp, ExportTarget, Expr, Program, Stmt, UnOp};
use super::wgsl;
use super::{
    DescriptorBinding, DescriptorKind, SgprValue, ShaderData, ShaderError, MAX_RESOLVED, MAX_SLOTS,
};
use crate::core::gpu::descriptors::{buf_fmt, DstSel};
use crate::core::gpu::registers::{ShaderStage, USER_DATA_COUNT};

const SGPR_COUNT: usize = 104;
const M0: u8 = 124;
const EXEC_LO: u8 = 126;

/// Vertex attribute feeding a vertex shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexInput {
    pub binding: FetchShaderVertexBinding,
    /// Channel swizzle from the attribute's V#
    pub dst_sel: [DstSel; 4],
}

impl VertexInput {
    /// Shader location of the attribute
    pub fn location(&self) -> u32 {
        self.binding.index
    }
}

/// Translate a vertex or pixel shader
///
/// `vertex_inputs` are the attributes the fetch shader would have loaded;
/// they seed the destination VGPRs at entry and must be empty for pixel
/// shaders.
pub fn translate(
    code: &[u32],
    stage: ShaderStage,
    hash: u64,
    vertex_inputs: &[VertexInput],
) -> Result<ShaderData, ShaderError> {
    let mut t = Translator::new(stage);
    if stage == ShaderStage::Vertex {
        t.vertex_prologue(vertex_inputs);
    }

    for inst in Decoder::new(code) {
        let inst = inst?;
        match t.step(&inst) {
            Ok(Flow::Continue) => {}
            Ok(Flow::End) => break,
            Err(fault) => return Err(t.fail(fault, &inst)),
        }
    }
    t.program.validate()?;

    let ps_inputs = t.program.interpolants.iter().copied().collect();
    Ok(ShaderData {
        hash,
        stage,
        wgsl: wgsl::emit(&t.program),
        exports: t.program.exports(),
        descriptors: t.descriptors,
        resolved: t.resolved,
        vertex_inputs: vertex_inputs.to_vec(),
        ps_inputs,
    })
}

enum Flow {
    Continue,
    End,
}

enum Fault {
    Unsupported(String),
    Export(u8),
    Limit(String),
}

type Step<T = Flow> = std::result::Result<T, Fault>;

struct Translator {
    program: Program,
    sgprs: Vec<Option<SgprValue>>,
    /// Loaded but not yet materialized in the generated code
    pending: Vec<bool>,
    descriptors: Vec<DescriptorBinding>,
    resolved: Vec<SgprValue>,
    locals: u32,
}

impl Translator {
    fn new(stage: ShaderStage) -> Self {
        let mut sgprs = vec![None; SGPR_COUNT];
        for (n, slot) in sgprs.iter_mut().enumerate().take(USER_DATA_COUNT) {
            *slot = Some(SgprValue::UserData(n as u8));
        }
        Self {
            program: Program::new(stage),
            sgprs,
            pending: vec![false; SGPR_COUNT],
            descriptors: Vec::new(),
            resolved: Vec::new(),
            locals: 0,
        }
    }

    fn fail(&self, fault: Fault, inst: &Instruction) -> ShaderError {
        let partial = wgsl::emit(&self.program);
        match fault {
            Fault::Unsupported(detail) => ShaderError::Unsupported {
                offset: inst.offset,
                instruction: if detail.is_empty() {
                    inst.to_string()
                } else {
                    format!("{} ({})", inst, detail)
                },
                partial,
            },
            Fault::Export(target) => ShaderError::InvalidExport {
                target,
                offset: inst.offset,
                partial,
            },
            Fault::Limit(what) => ShaderError::Limit(what),
        }
    }

    fn vertex_prologue(&mut self, inputs: &[VertexInput]) {
        self.program.stmts.push(Stmt::SetVgpr(0, Expr::VertexIndex));
        for input in inputs {
            let location = input.location();
            self.program.attributes.insert(location);
            for k in 0..input.binding.n_elements.min(4) {
                let value = match input.dst_sel[k as usize] {
                    DstSel::Zero => Expr::ConstF32(0.0),
                    DstSel::One => Expr::ConstF32(1.0),
                    DstSel::X => Expr::Attribute { location, component: 0 },
                    DstSel::Y => Expr::Attribute { location, component: 1 },
                    DstSel::Z => Expr::Attribute { location, component: 2 },
                    DstSel::W => Expr::Attribute { location, component: 3 },
                };
                self.program
                    .stmts
                    .push(Stmt::SetVgpr(input.binding.dest_vgpr.wrapping_add(k), value.bits()));
            }
        }
    }

    fn emit(&mut self, stmt: Stmt) {
        self.program.stmts.push(stmt);
    }

    fn set_sgpr(&mut self, n: u8, value: Expr, provenance: Option<SgprValue>) {
        let i = n as usize;
        if i < SGPR_COUNT {
            self.sgprs[i] = provenance;
            self.pending[i] = false;
            self.emit(Stmt::SetSgpr(n, value));
        }
    }

    fn step(&mut self, inst: &Instruction) -> Step {
        match &inst.inst {
            Inst::Sopp { op, .. } => match *op {
                op::S_ENDPGM => return Ok(Flow::End),
                op::S_NOP | op::S_WAITCNT => {}
                _ => return Err(Fault::Unsupported(String::new())),
            },
            Inst::Sop1 { op, sdst, ssrc0 } => self.sop1(*op, *sdst, *ssrc0)?,
            Inst::Sopk {
                op: op::S_MOVK_I32,
                sdst,
                simm16,
            } => {
                let value = *simm16 as i16 as i32 as u32;
                self.set_sgpr(*sdst, Expr::Const(value), Some(SgprValue::Const(value)));
            }
            Inst::Smrd {
                op,
                sdst,
                sbase,
                imm,
                offset,
            } => self.smrd(*op, *sdst, *sbase, *imm, *offset)?,
            Inst::Vop1 { op, vdst, src0 } => {
                if *op != op::V_NOP {
                    let src = [self.operand(*src0)?, Expr::Const(0), Expr::Const(0)];
                    let value = self.valu(op::VOP3_FROM_VOP1 + *op as u16, src, *vdst, None)?;
                    self.emit(Stmt::SetVgpr(*vdst, value));
                }
            }
            Inst::Vop2 {
                op,
                vdst,
                src0,
                vsrc1,
                literal,
            } => {
                let src = [self.operand(*src0)?, Expr::Vgpr(*vsrc1), Expr::Const(0)];
                let value = self.valu(op::VOP3_FROM_VOP2 + *op as u16, src, *vdst, *literal)?;
                self.emit(Stmt::SetVgpr(*vdst, value));
            }
            Inst::Vop3 {
                op,
                vdst,
                src,
                abs,
                neg,
                clamp,
                omod,
            } => {
                let mut operands = [self.operand(src[0])?, self.operand(src[1])?, self.operand(src[2])?];
                let float = is_float_op(*op);
                if float {
                    for (i, operand) in operands.iter_mut().enumerate() {
                        let mut e = std::mem::replace(operand, Expr::Const(0));
                        if abs & (1 << i) != 0 {
                            e = Expr::unary(UnOp::Abs, e.f32());
                        }
                        if neg & (1 << i) != 0 {
                            e = Expr::unary(UnOp::Neg, e.f32());
                        }
                        *operand = e;
                    }
                }
                let mut value = self.valu(*op, operands, *vdst, None)?;
                if float {
                    value = match omod {
                        1 => Expr::binary(BinOp::FMul, value.f32(), Expr::ConstF32(2.0)),
                        2 => Expr::binary(BinOp::FMul, value.f32(), Expr::ConstF32(4.0)),
                        3 => Expr::binary(BinOp::FMul, value.f32(), Expr::ConstF32(0.5)),
                        _ => value,
                    };
                    if *clamp {
                        value = Expr::unary(UnOp::Saturate, value.f32());
                    }
                    value = value.bits();
                }
                self.emit(Stmt::SetVgpr(*vdst, value));
            }
            Inst::Vintrp {
                vdst, attr, chan, ..
            } => {
                if self.program.stage != ShaderStage::Pixel {
                    return Err(Fault::Unsupported("interpolation outside a pixel shader".into()));
                }
                self.program.interpolants.insert(*attr);
                let value = Expr::Interpolant {
                    location: *attr,
                    component: *chan,
                };
                self.emit(Stmt::SetVgpr(*vdst, value.bits()));
            }
            Inst::Mubuf(b) => {
                let count = match b.op {
                    op::BUFFER_LOAD_FORMAT_X..=op::BUFFER_LOAD_FORMAT_XYZW => b.op + 1,
                    op::BUFFER_LOAD_DWORD => 1,
                    op::BUFFER_LOAD_DWORDX2 => 2,
                    op::BUFFER_LOAD_DWORDX3 => 3,
                    op::BUFFER_LOAD_DWORDX4 => 4,
                    _ => return Err(Fault::Unsupported(String::new())),
                };
                self.buffer_load(b, count)?;
            }
            Inst::Mtbuf { inst: b, dfmt, .. } => {
                if b.op > op::TBUFFER_LOAD_FORMAT_XYZW {
                    return Err(Fault::Unsupported(String::new()));
                }
                let raw = matches!(
                    *dfmt as u32,
                    buf_fmt::F32 | buf_fmt::F32_32 | buf_fmt::F32_32_32 | buf_fmt::F32_32_32_32
                );
                if !raw {
                    return Err(Fault::Unsupported(format!("data format {}", dfmt)));
                }
                self.buffer_load(b, b.op + 1)?;
            }
            Inst::Mimg {
                op,
                vdata,
                vaddr,
                srsrc,
                ssamp,
                dmask,
            } => self.image_sample(*op, *vdata, *vaddr, *srsrc, *ssamp, *dmask)?,
            Inst::Exp {
                target,
                en,
                compr,
                vsrc,
                ..
            } => self.export(*target, *en, *compr, *vsrc)?,
            Inst::Sop2 { .. } | Inst::Sopc { .. } | Inst::Sopk { .. } | Inst::Vopc { .. } | Inst::Ds { .. } => {
                return Err(Fault::Unsupported(String::new()))
            }
        }
        Ok(Flow::Continue)
    }

    fn sop1(&mut self, op_code: u8, sdst: u8, ssrc0: Operand) -> Step<()> {
        match op_code {
            op::S_MOV_B32 => match sdst {
                M0 => {}
                d if (d as usize) < SGPR_COUNT => {
                    let provenance = self.provenance(ssrc0);
                    let value = self.operand(ssrc0)?;
                    self.set_sgpr(d, value, provenance);
                }
                _ => return Err(Fault::Unsupported("scalar move to special register".into())),
            },
            op::S_MOV_B64 => match (sdst, ssrc0) {
                (EXEC_LO, _) => {}
                (d, Operand::Sgpr(s)) if (d as usize) + 1 < SGPR_COUNT => {
                    if (s as usize) + 1 >= SGPR_COUNT {
                        return Err(Fault::Unsupported(format!("64-bit move from s{}", s)));
                    }
                    for i in 0..2 {
                        let src = Operand::Sgpr(s + i);
                        let provenance = self.provenance(src);
                        let value = self.operand(src)?;
                        self.set_sgpr(d + i, value, provenance);
                    }
                }
                (d, src) if (d as usize) + 1 < SGPR_COUNT => {
                    // Inline constants sign-extend to 64 bits
                    let lo = src
                        .constant_bits()
                        .ok_or_else(|| Fault::Unsupported(format!("64-bit move from {}", src)))?;
                    let hi = if (lo as i32) < 0 && !matches!(src, Operand::Literal(_)) {
                        u32::MAX
                    } else {
                        0
                    };
                    self.set_sgpr(d, Expr::Const(lo), Some(SgprValue::Const(lo)));
                    self.set_sgpr(d + 1, Expr::Const(hi), Some(SgprValue::Const(hi)));
                }
                _ => return Err(Fault::Unsupported("scalar move to special register".into())),
            },
            op::S_WQM_B64 if sdst == EXEC_LO => {}
            // Fetch-shader call: the prologue already seeded its VGPRs
            op::S_SWAPPC_B64 if self.program.stage == ShaderStage::Vertex => {}
            _ => return Err(Fault::Unsupported(String::new())),
        }
        Ok(())
    }

    fn smrd(&mut self, op_code: u8, sdst: u8, sbase: u8, imm: bool, offset: u8) -> Step<()> {
        match op_code {
            op::S_LOAD_DWORD..=op::S_LOAD_DWORDX16 => {
                if !imm {
                    return Err(Fault::Unsupported("register-offset scalar load".into()));
                }
                let (lo, hi) = match (
                    self.sgprs.get(sbase as usize).cloned().flatten(),
                    self.sgprs.get(sbase as usize + 1).cloned().flatten(),
                ) {
                    (Some(lo), Some(hi)) => (lo, hi),
                    _ => {
                        return Err(Fault::Unsupported(format!(
                            "pointer in s[{}:{}] has unknown origin",
                            sbase,
                            sbase + 1
                        )))
                    }
                };
                let count = 1u32 << op_code;
                for i in 0..count {
                    let d = sdst as usize + i as usize;
                    if d >= SGPR_COUNT {
                        break;
                    }
                    self.sgprs[d] = Some(SgprValue::Memory {
                        lo: Box::new(lo.clone()),
                        hi: Box::new(hi.clone()),
                        dword_offset: offset as u32 + i,
                    });
                    self.pending[d] = true;
                }
            }
            op::S_BUFFER_LOAD_DWORD..=op::S_BUFFER_LOAD_DWORDX16 => {
                let slot = self.descriptor(DescriptorKind::VSharp, sbase)?;
                let byte_offset = if imm {
                    Expr::Const(offset as u32 * 4)
                } else {
                    self.operand(Operand::Sgpr(offset))?
                };
                let base = Expr::binary(BinOp::IAdd, Expr::BufferBase(slot), byte_offset);
                let count = 1u32 << (op_code - op::S_BUFFER_LOAD_DWORD);
                for i in 0..count {
                    let d = sdst as usize + i as usize;
                    if d >= SGPR_COUNT {
                        break;
                    }
                    let index = Expr::binary(
                        BinOp::Shr,
                        Expr::binary(BinOp::IAdd, base.clone(), Expr::Const(i * 4)),
                        Expr::Const(2),
                    );
                    self.set_sgpr(
                        d as u8,
                        Expr::BufferLoad {
                            slot,
                            index: Box::new(index),
                        },
                        None,
                    );
                }
            }
            _ => return Err(Fault::Unsupported(String::new())),
        }
        Ok(())
    }

    /// Provenance carried by a scalar move source
    fn provenance(&self, src: Operand) -> Option<SgprValue> {
        match src {
            Operand::Sgpr(n) => self.sgprs.get(n as usize).cloned().flatten(),
            other => other.constant_bits().map(SgprValue::Const),
        }
    }

    fn operand(&mut self, src: Operand) -> Step<Expr> {
        match src {
            Operand::Sgpr(n) => {
                let i = n as usize;
                if i >= SGPR_COUNT {
                    return Err(Fault::Unsupported(format!("read of s{}", n)));
                }
                if self.pending[i] {
                    let value = self.sgprs[i].clone().ok_or_else(|| {
                        Fault::Unsupported(format!("s{} has unknown origin", n))
                    })?;
                    let slot = self.resolve_slot(value)?;
                    self.pending[i] = false;
                    self.emit(Stmt::SetSgpr(n, Expr::Resolved(slot)));
                }
                Ok(Expr::Sgpr(n))
            }
            Operand::Vgpr(n) => Ok(Expr::Vgpr(n)),
            other => other
                .constant_bits()
                .map(Expr::Const)
                .ok_or_else(|| Fault::Unsupported(format!("operand {}", other))),
        }
    }

    fn resolve_slot(&mut self, value: SgprValue) -> Step<u32> {
        if let Some(pos) = self.resolved.iter().position(|v| *v == value) {
            return Ok(pos as u32);
        }
        if self.resolved.len() >= MAX_RESOLVED {
            return Err(Fault::Limit(format!("more than {} scalar loads", MAX_RESOLVED)));
        }
        self.resolved.push(value);
        self.program.resolved = self.resolved.len() as u32;
        Ok(self.resolved.len() as u32 - 1)
    }

    /// Binding slot for the descriptor held in `sgpr`
    fn descriptor(&mut self, kind: DescriptorKind, sgpr: u8) -> Step<u32> {
        let start = sgpr as usize;
        let dwords = self
            .sgprs
            .get(start..start + kind.dwords())
            .and_then(|regs| regs.iter().cloned().collect::<Option<Vec<_>>>())
            .ok_or_else(|| {
                Fault::Unsupported(format!("descriptor in s{} has unknown origin", sgpr))
            })?;

        if let Some(existing) = self
            .descriptors
            .iter()
            .find(|d| d.kind == kind && d.dwords == dwords)
        {
            return Ok(existing.slot);
        }

        let used = self.descriptors.iter().filter(|d| d.kind == kind).count() as u32;
        if used >= MAX_SLOTS {
            return Err(Fault::Limit(format!("more than {} {:?} bindings", MAX_SLOTS, kind)));
        }
        self.descriptors.push(DescriptorBinding {
            kind,
            sgpr,
            dwords,
            slot: used,
        });
        match kind {
            DescriptorKind::VSharp => self.program.buffers = used + 1,
            DescriptorKind::TSharp => self.program.textures = used + 1,
            DescriptorKind::SSharp => self.program.samplers = used + 1,
        }
        Ok(used)
    }

    fn buffer_load(&mut self, b: &BufferInst, count: u8) -> Step<()> {
        let slot = self.descriptor(DescriptorKind::VSharp, b.srsrc)?;

        let mut addr = Expr::binary(BinOp::IAdd, Expr::BufferBase(slot), Expr::Const(b.offset as u32));
        if b.soffset != Operand::Int(0) {
            let soffset = self.operand(b.soffset)?;
            addr = Expr::binary(BinOp::IAdd, addr, soffset);
        }
        if b.idxen {
            let stride = Expr::binary(BinOp::IMul, Expr::Vgpr(b.vaddr), Expr::BufferStride(slot));
            addr = Expr::binary(BinOp::IAdd, addr, stride);
        }
        if b.offen {
            let voffset = Expr::Vgpr(b.vaddr.wrapping_add(b.idxen as u8));
            addr = Expr::binary(BinOp::IAdd, addr, voffset);
        }

        // Destination registers may overlap the address registers
        let local = self.locals;
        self.locals += 1;
        self.emit(Stmt::Let(local, Expr::binary(BinOp::Shr, addr, Expr::Const(2))));
        for i in 0..count {
            let index = Expr::binary(BinOp::IAdd, Expr::Local(local), Expr::Const(i as u32));
            self.emit(Stmt::SetVgpr(
                b.vdata.wrapping_add(i),
                Expr::BufferLoad {
                    slot,
                    index: Box::new(index),
                },
            ));
        }
        Ok(())
    }

    fn image_sample(&mut self, op_code: u8, vdata: u8, vaddr: u8, srsrc: u8, ssamp: u8, dmask: u8) -> Step<()> {
        let lod = match op_code {
            op::IMAGE_SAMPLE => None,
            op::IMAGE_SAMPLE_L => Some(Expr::Vgpr(vaddr.wrapping_add(2)).f32()),
            op::IMAGE_SAMPLE_LZ => Some(Expr::ConstF32(0.0)),
            _ => return Err(Fault::Unsupported(String::new())),
        };
        let texture = self.descriptor(DescriptorKind::TSharp, srsrc)?;
        let sampler = self.descriptor(DescriptorKind::SSharp, ssamp)?;

        let temp = self.program.temps;
        self.program.temps += 1;
        self.emit(Stmt::Sample {
            temp,
            texture,
            sampler,
            coord: [Expr::Vgpr(vaddr).f32(), Expr::Vgpr(vaddr.wrapping_add(1)).f32()],
            lod,
        });

        let mut dest = vdata;
        for component in 0..4u8 {
            if dmask & (1 << component) != 0 {
                self.emit(Stmt::SetVgpr(dest, Expr::Sampled { temp, component }.bits()));
                dest = dest.wrapping_add(1);
            }
        }
        Ok(())
    }

    fn export(&mut self, target: u8, en: u8, compr: bool, vsrc: [u8; 4]) -> Step<()> {
        let mapped = ExportTarget::from_hw(target).ok_or(Fault::Export(target))?;
        if mapped.stage() != self.program.stage {
            return Err(Fault::Export(target));
        }

        let component = |i: usize| -> Expr {
            if en & (1 << i) == 0 {
                return Expr::ConstF32(0.0);
            }
            if compr {
                Expr::UnpackHalf(Box::new(Expr::Vgpr(vsrc[i / 2])), (i % 2) as u8)
            } else {
                Expr::Vgpr(vsrc[i]).f32()
            }
        };
        let values = Box::new([component(0), component(1), component(2), component(3)]);
        self.emit(Stmt::Export {
            target: mapped,
            values,
        });
        Ok(())
    }

    /// Lower a VALU operation using VOP3 opcode numbering
    fn valu(&mut self, op3: u16, src: [Expr; 3], vdst: u8, literal: Option<u32>) -> Step<Expr> {
        let [a, b, c] = src;
        let f = |e: Expr| e.f32();
        let fbin = |op, a: Expr, b: Expr| Expr::binary(op, a.f32(), b.f32());
        let v1 = |op: u8| op::VOP3_FROM_VOP1 + op as u16;
        let v2 = |op: u8| op::VOP3_FROM_VOP2 + op as u16;

        let value = match op3 {
            x if x == v1(op::V_MOV_B32) => a,
            x if x == v1(op::V_CVT_F32_I32) => Expr::unary(UnOp::I32ToF32, Expr::AsI32(Box::new(a))),
            x if x == v1(op::V_CVT_F32_U32) => Expr::unary(UnOp::U32ToF32, a),
            x if x == v1(op::V_CVT_U32_F32) => Expr::unary(UnOp::F32ToU32, f(a)),
            x if x == v1(op::V_CVT_I32_F32) => Expr::unary(UnOp::F32ToI32, f(a)),
            x if x == v1(op::V_CVT_F16_F32) => Expr::unary(UnOp::F32ToHalf, f(a)),
            x if x == v1(op::V_CVT_F32_F16) => Expr::UnpackHalf(Box::new(a), 0),
            x if x == v1(op::V_FRACT_F32) => Expr::unary(UnOp::Fract, f(a)),
            x if x == v1(op::V_TRUNC_F32) => Expr::unary(UnOp::Trunc, f(a)),
            x if x == v1(op::V_CEIL_F32) => Expr::unary(UnOp::Ceil, f(a)),
            x if x == v1(op::V_RNDNE_F32) => Expr::unary(UnOp::Round, f(a)),
            x if x == v1(op::V_FLOOR_F32) => Expr::unary(UnOp::Floor, f(a)),
            x if x == v1(op::V_EXP_F32) => Expr::unary(UnOp::Exp2, f(a)),
            x if x == v1(op::V_LOG_F32) => Expr::unary(UnOp::Log2, f(a)),
            x if x == v1(op::V_RCP_F32) => Expr::unary(UnOp::Rcp, f(a)),
            x if x == v1(op::V_RSQ_F32) => Expr::unary(UnOp::Rsq, f(a)),
            x if x == v1(op::V_SQRT_F32) => Expr::unary(UnOp::Sqrt, f(a)),
            x if x == v1(op::V_SIN_F32) => Expr::unary(UnOp::SinRev, f(a)),
            x if x == v1(op::V_COS_F32) => Expr::unary(UnOp::CosRev, f(a)),
            x if x == v1(op::V_NOT_B32) => Expr::unary(UnOp::Not, a),

            x if x == v2(op::V_ADD_F32) => fbin(BinOp::FAdd, a, b),
            x if x == v2(op::V_SUB_F32) => fbin(BinOp::FSub, a, b),
            x if x == v2(op::V_SUBREV_F32) => fbin(BinOp::FSub, b, a),
            x if x == v2(op::V_MUL_F32) => fbin(BinOp::FMul, a, b),
            x if x == v2(op::V_MIN_F32) => fbin(BinOp::FMin, a, b),
            x if x == v2(op::V_MAX_F32) => fbin(BinOp::FMax, a, b),
            x if x == v2(op::V_LSHRREV_B32) => Expr::binary(BinOp::Shr, b, a),
            x if x == v2(op::V_LSHLREV_B32) => Expr::binary(BinOp::Shl, b, a),
            x if x == v2(op::V_AND_B32) => Expr::binary(BinOp::And, a, b),
            x if x == v2(op::V_OR_B32) => Expr::binary(BinOp::Or, a, b),
            x if x == v2(op::V_XOR_B32) => Expr::binary(BinOp::Xor, a, b),
            x if x == v2(op::V_ADD_I32) => Expr::binary(BinOp::IAdd, a, b),
            x if x == v2(op::V_MAC_F32) => Expr::Fma(Box::new(f(a)), Box::new(f(b)), Box::new(Expr::Vgpr(vdst).f32())),
            x if x == v2(op::V_MADMK_F32) => {
                let k = Expr::Const(literal.unwrap_or(0));
                Expr::Fma(Box::new(f(a)), Box::new(f(k)), Box::new(f(b)))
            }
            x if x == v2(op::V_MADAK_F32) => {
                let k = Expr::Const(literal.unwrap_or(0));
                Expr::Fma(Box::new(f(a)), Box::new(f(b)), Box::new(f(k)))
            }
            x if x == v2(op::V_CVT_PKRTZ_F16_F32) => Expr::PackHalf(Box::new(f(a)), Box::new(f(b))),

            op::V_MAD_F32 | op::V_FMA_F32 => Expr::Fma(Box::new(f(a)), Box::new(f(b)), Box::new(f(c))),

            _ => return Err(Fault::Unsupported(String::new())),
        };
        Ok(value.bits())
    }
}

/// Whether a VOP3-numbered opcode takes float operands
fn is_float_op(op3: u16) -> bool {
    let v1 = |op: u8| op::VOP3_FROM_VOP1 + op as u16;
    let v2 = |op: u8| op::VOP3_FROM_VOP2 + op as u16;
    (v1(op::V_CVT_U32_F32)..=v1(op::V_CVT_F16_F32)).contains(&op3)
        || (v1(op::V_FRACT_F32)..=v1(op::V_COS_F32)).contains(&op3)
        || [
            v2(op::V_ADD_F32),
            v2(op::V_SUB_F32),
            v2(op::V_SUBREV_F32),
            v2(op::V_MUL_F32),
            v2(op::V_MIN_F32),
            v2(op::V_MAX_F32),
            v2(op::V_MAC_F32),
            v2(op::V_CVT_PKRTZ_F16_F32),
            op::V_MAD_F32,
            op::V_FMA_F32,
        ]
        .contains(&op3)
}
