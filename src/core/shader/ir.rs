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

//! Expression IR produced by the translator
//!
//! Registers hold raw 32-bit patterns, so every [`Expr`] evaluates to a `u32`
//! unless it is explicitly typed through [`Expr::ty`]. Float arithmetic is
//! wrapped in bit casts at the register boundary, mirroring how the hardware
//! reinterprets VGPR contents per instruction.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ShaderError;
use crate::core::gpu::registers::ShaderStage;

/// Number of parameter export slots (targets 32..63)
pub const MAX_PARAMS: u8 = 32;

/// Color export slots (EXP targets 0..=8)
pub const MAX_COLOR_EXPORTS: u8 = 9;

/// Scalar type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    U32,
    I32,
    F32,
}

/// Operations on one operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    // f32 -> f32
    Neg,
    Abs,
    Saturate,
    Fract,
    Trunc,
    Ceil,
    Floor,
    Round,
    Exp2,
    Log2,
    Rcp,
    Rsq,
    Sqrt,
    /// Sine of a value in revolutions
    SinRev,
    /// Cosine of a value in revolutions
    CosRev,
    // u32 -> u32
    Not,
    // conversions
    F32ToU32,
    F32ToI32,
    U32ToF32,
    I32ToF32,
    /// f32 to half bits in the low 16 bits
    F32ToHalf,
}

/// Operations on two operands of the same type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    FAdd,
    FSub,
    FMul,
    FMin,
    FMax,
    IAdd,
    IMul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Where an export writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExportTarget {
    /// Color output `n` (0..8)
    Color(u8),
    /// Clip-space position
    Position,
    /// Interpolated parameter `n` (0..31)
    Param(u8),
}

impl ExportTarget {
    /// Map a hardware EXP target
    pub fn from_hw(target: u8) -> Option<Self> {
        match target {
            0..=8 => Some(ExportTarget::Color(target)),
            12 => Some(ExportTarget::Position),
            32..=63 => Some(ExportTarget::Param(target - 32)),
            _ => None,
        }
    }

    /// Stage allowed to write this target
    pub fn stage(self) -> ShaderStage {
        match self {
            ExportTarget::Color(_) => ShaderStage::Pixel,
            ExportTarget::Position | ExportTarget::Param(_) => ShaderStage::Vertex,
        }
    }
}

/// Value expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Sgpr(u8),
    Vgpr(u8),
    Const(u32),
    /// Reinterpret a u32 as f32
    AsF32(Box<Expr>),
    /// Reinterpret an f32 as u32
    AsU32(Box<Expr>),
    /// Reinterpret a u32 as i32
    AsI32(Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `a * b + c` on f32
    Fma(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Two f32 packed into half-float bits
    PackHalf(Box<Expr>, Box<Expr>),
    /// One half-float component (0 = low) of a u32 as f32
    UnpackHalf(Box<Expr>, u8),
    /// User-data register of the current stage
    UserData(u8),
    /// Host-resolved scalar load
    Resolved(u32),
    /// Dword of a storage buffer slot
    BufferLoad { slot: u32, index: Box<Expr> },
    /// Byte offset of a buffer slot's base within its first dword
    BufferBase(u32),
    /// Record stride of a buffer slot
    BufferStride(u32),
    /// Vertex attribute component (f32)
    Attribute { location: u32, component: u8 },
    /// Constant 0.0 or 1.0 for swizzled attribute components
    ConstF32(f32),
    VertexIndex,
    InstanceIndex,
    /// Pixel-stage interpolant component (f32)
    Interpolant { location: u8, component: u8 },
    /// Component of a sample result (f32)
    Sampled { temp: u32, component: u8 },
    /// Value bound by [`Stmt::Let`]
    Local(u32),
}

impl Expr {
    pub fn f32(self) -> Expr {
        match self {
            Expr::AsU32(inner) => *inner,
            other => Expr::AsF32(Box::new(other)),
        }
    }

    pub fn bits(self) -> Expr {
        match self {
            Expr::AsF32(inner) => *inner,
            other => Expr::AsU32(Box::new(other)),
        }
    }

    pub fn unary(op: UnOp, a: Expr) -> Expr {
        Expr::Unary(op, Box::new(a))
    }

    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Expr {
        Expr::Binary(op, Box::new(a), Box::new(b))
    }

    /// Scalar type this expression evaluates to
    pub fn ty(&self) -> Ty {
        match self {
            Expr::AsF32(_)
            | Expr::Fma(..)
            | Expr::UnpackHalf(..)
            | Expr::Attribute { .. }
            | Expr::ConstF32(_)
            | Expr::Interpolant { .. }
            | Expr::Sampled { .. } => Ty::F32,
            Expr::AsI32(_) => Ty::I32,
            Expr::Unary(op, _) => match op {
                UnOp::Not | UnOp::F32ToU32 | UnOp::F32ToHalf => Ty::U32,
                UnOp::F32ToI32 => Ty::I32,
                _ => Ty::F32,
            },
            Expr::Binary(op, _, _) => match op {
                BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FMin | BinOp::FMax => Ty::F32,
                _ => Ty::U32,
            },
            _ => Ty::U32,
        }
    }
}

/// Statement in program order
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Bind a u32 value under a fresh name
    Let(u32, Expr),
    SetSgpr(u8, Expr),
    SetVgpr(u8, Expr),
    /// `temp = sample(texture, sampler, coord[, lod])`
    Sample {
        temp: u32,
        texture: u32,
        sampler: u32,
        coord: [Expr; 2],
        lod: Option<Expr>,
    },
    /// Write four f32 components to an output
    Export {
        target: ExportTarget,
        values: Box<[Expr; 4]>,
    },
}

/// Translated program body with its interface
#[derive(Debug, Clone)]
pub struct Program {
    pub stage: ShaderStage,
    pub stmts: Vec<Stmt>,
    /// Storage buffer slots used
    pub buffers: u32,
    pub textures: u32,
    pub samplers: u32,
    /// Scalar-load slots used
    pub resolved: u32,
    /// Vertex attribute locations declared
    pub attributes: BTreeSet<u32>,
    /// Interpolant locations declared
    pub interpolants: BTreeSet<u8>,
    pub temps: u32,
}

impl Program {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            stmts: Vec::new(),
            buffers: 0,
            textures: 0,
            samplers: 0,
            resolved: 0,
            attributes: BTreeSet::new(),
            interpolants: BTreeSet::new(),
            temps: 0,
        }
    }

    /// Export targets in first-write order, deduplicated
    pub fn exports(&self) -> Vec<ExportTarget> {
        let mut seen = Vec::new();
        for stmt in &self.stmts {
            if let Stmt::Export { target, .. } = stmt {
                if !seen.contains(target) {
                    seen.push(*target);
                }
            }
        }
        seen
    }

    /// Check the export set against the stage interface
    pub fn validate(&self) -> Result<(), ShaderError> {
        for target in self.exports() {
            let in_range = match target {
                ExportTarget::Color(n) => n < MAX_COLOR_EXPORTS,
                ExportTarget::Param(n) => n < MAX_PARAMS,
                ExportTarget::Position => true,
            };
            if !in_range || target.stage() != self.stage {
                return Err(ShaderError::Limit(format!(
                    "{:?} export in {:?} shader",
                    target, self.stage
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_target_mapping() {
        assert_eq!(ExportTarget::from_hw(0), Some(ExportTarget::Color(0)));
        assert_eq!(ExportTarget::from_hw(7), Some(ExportTarget::Color(7)));
        assert_eq!(ExportTarget::from_hw(8), Some(ExportTarget::Color(8)));
        assert_eq!(ExportTarget::from_hw(12), Some(ExportTarget::Position));
        assert_eq!(ExportTarget::from_hw(32), Some(ExportTarget::Param(0)));
        assert_eq!(ExportTarget::from_hw(63), Some(ExportTarget::Param(31)));
        for bad in [9, 10, 11, 13, 31] {
            assert_eq!(ExportTarget::from_hw(bad), None);
        }
    }

    #[test]
    fn test_bitcast_folding() {
        let e = Expr::Vgpr(3).f32().bits();
        assert_eq!(e, Expr::Vgpr(3));
        assert_eq!(Expr::Vgpr(1).f32().ty(), Ty::F32);
        assert_eq!(Expr::binary(BinOp::IAdd, Expr::Vgpr(1), Expr::Const(2)).ty(), Ty::U32);
    }

    #[test]
    fn test_validate_rejects_cross_stage_export() {
        let mut program = Program::new(ShaderStage::Pixel);
        program.stmts.push(Stmt::Export {
            target: ExportTarget::Position,
            values: Box::new([Expr::ConstF32(0.0), Expr::ConstF32(0.0), Expr::ConstF32(0.0), Expr::ConstF32(1.0)]),
        });
        assert!(program.validate().is_err());
        program.stage = ShaderStage::Vertex;
        assert!(program.validate().is_ok());
    }
}
