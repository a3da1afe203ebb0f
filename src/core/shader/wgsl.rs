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

//! WGSL emission
//!
//! Turns a translated [`Program`] into a WGSL module. The guest register file
//! is modeled as two function-scope arrays (`s` and `v`) of raw bits; every
//! statement writes one register or one output, so the module reads in the
//! same order as the disassembly.
//!
//! Bind group layout per stage (vertex = 0, pixel = 1):
//!
//! | Binding | Resource                      |
//! |---------|-------------------------------|
//! | 0..7    | `buf{n}`: storage `array<u32>`|
//! | 8..15   | `tex{n}`: `texture_2d<f32>`   |
//! | 16..23  | `samp{n}`: `sampler`          |
//! | 24      | `consts`: `StageConstants`    |

use std::fmt::Write;

use super::ir::{BinOp, ExportTarget, Expr, Program, Stmt, Ty, UnOp};
use super::{CONSTANTS_BINDING, SAMPLER_BINDING_BASE, TEXTURE_BINDING_BASE};
use crate::core::gpu::registers::{ShaderStage, USER_DATA_COUNT};

/// Entry point of translated vertex shaders
pub const VS_ENTRY: &str = "vs_main";

/// Entry point of translated pixel shaders
pub const PS_ENTRY: &str = "ps_main";

/// Callable body of a vertex shader, shared with the patch entry point
pub const VS_BODY: &str = "guest_vs";

/// Bind group index of a stage's resources
pub fn bind_group(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Pixel => 1,
    }
}

/// Bind group index of the patch vertex-pulling buffers
pub const PATCH_BIND_GROUP: u32 = 2;

/// Size of the push-constant block in bytes
pub const PUSH_CONSTANT_SIZE: u32 = 128;

/// Size of `StageConstants` in bytes
pub const STAGE_CONSTANTS_SIZE: u64 = 16 * (4 + 16 + 2);

const SGPR_COUNT: usize = 104;
const VGPR_COUNT: usize = 256;
const COMPONENTS: [char; 4] = ['x', 'y', 'z', 'w'];

const PRELUDE: &str = "\
struct StageConstants {
    user_data: array<vec4<u32>, 4>,
    resolved: array<vec4<u32>, 16>,
    buffer_base: array<vec4<u32>, 2>,
}

struct PushConstants {
    vs_strides: array<vec4<u32>, 2>,
    ps_strides: array<vec4<u32>, 2>,
    patch_strides: array<vec4<u32>, 2>,
    patch_offsets: array<vec4<u32>, 2>,
}

var<push_constant> pc: PushConstants;
";

/// Emit a complete WGSL module
pub fn emit(program: &Program) -> String {
    let mut e = Emitter {
        out: String::new(),
        stage: program.stage,
    };
    e.module(program);
    e.out
}

struct Emitter {
    out: String,
    stage: ShaderStage,
}

impl Emitter {
    fn module(&mut self, p: &Program) {
        let group = bind_group(self.stage);
        let exports = p.exports();

        self.out.push_str(PRELUDE);
        let _ = writeln!(
            self.out,
            "@group({}) @binding({}) var<uniform> consts: StageConstants;",
            group, CONSTANTS_BINDING
        );
        for n in 0..p.buffers {
            let _ = writeln!(
                self.out,
                "@group({}) @binding({}) var<storage, read> buf{}: array<u32>;",
                group, n, n
            );
        }
        for n in 0..p.textures {
            let _ = writeln!(
                self.out,
                "@group({}) @binding({}) var tex{}: texture_2d<f32>;",
                group,
                TEXTURE_BINDING_BASE + n,
                n
            );
        }
        for n in 0..p.samplers {
            let _ = writeln!(
                self.out,
                "@group({}) @binding({}) var samp{}: sampler;",
                group,
                SAMPLER_BINDING_BASE + n,
                n
            );
        }
        self.out.push('\n');

        match self.stage {
            ShaderStage::Vertex => self.vertex(p, &exports),
            ShaderStage::Pixel => self.pixel(p, &exports),
        }
    }

    fn vertex(&mut self, p: &Program, exports: &[ExportTarget]) {
        self.out.push_str("struct VsInput {\n");
        self.out.push_str("    @builtin(vertex_index) vertex_index: u32,\n");
        self.out.push_str("    @builtin(instance_index) instance_index: u32,\n");
        for loc in &p.attributes {
            let _ = writeln!(self.out, "    @location({}) attr{}: vec4<f32>,", loc, loc);
        }
        self.out.push_str("}\n\n");

        self.out.push_str("struct VsOutput {\n");
        self.out.push_str("    @builtin(position) position: vec4<f32>,\n");
        for target in exports {
            if let ExportTarget::Param(n) = target {
                let _ = writeln!(self.out, "    @location({}) param{}: vec4<f32>,", n, n);
            }
        }
        self.out.push_str("}\n\n");

        let _ = writeln!(self.out, "fn {}(vin: VsInput) -> VsOutput {{", VS_BODY);
        self.registers();
        self.out.push_str("    var out: VsOutput;\n");
        self.user_data();
        self.body(p);
        self.out.push_str("    return out;\n}\n\n");

        let _ = writeln!(
            self.out,
            "@vertex\nfn {}(vin: VsInput) -> VsOutput {{\n    return {}(vin);\n}}",
            VS_ENTRY, VS_BODY
        );
    }

    fn pixel(&mut self, p: &Program, exports: &[ExportTarget]) {
        self.out.push_str("struct PsInput {\n");
        self.out.push_str("    @builtin(position) frag_coord: vec4<f32>,\n");
        for loc in &p.interpolants {
            let _ = writeln!(self.out, "    @location({}) attr{}: vec4<f32>,", loc, loc);
        }
        self.out.push_str("}\n\n");

        let has_outputs = !exports.is_empty();
        if has_outputs {
            self.out.push_str("struct PsOutput {\n");
            let mut targets = exports.to_vec();
            targets.sort();
            for target in targets {
                match target {
                    ExportTarget::Color(n) => {
                        let _ = writeln!(self.out, "    @location({}) col{}: vec4<f32>,", n, n);
                    }
                    _ => {}
                }
            }
            self.out.push_str("}\n\n");
            let _ = writeln!(self.out, "@fragment\nfn {}(pin: PsInput) -> PsOutput {{", PS_ENTRY);
        } else {
            let _ = writeln!(self.out, "@fragment\nfn {}(pin: PsInput) {{", PS_ENTRY);
        }
        self.registers();
        if has_outputs {
            self.out.push_str("    var out: PsOutput;\n");
        }
        self.user_data();
        self.body(p);
        if has_outputs {
            self.out.push_str("    return out;\n");
        }
        self.out.push_str("}\n");
    }

    fn registers(&mut self) {
        let _ = writeln!(self.out, "    var s: array<u32, {}>;", SGPR_COUNT);
        let _ = writeln!(self.out, "    var v: array<u32, {}>;", VGPR_COUNT);
    }

    fn user_data(&mut self) {
        for n in 0..USER_DATA_COUNT {
            let _ = writeln!(
                self.out,
                "    s[{}] = consts.user_data[{}].{};",
                n,
                n / 4,
                COMPONENTS[n % 4]
            );
        }
    }

    fn body(&mut self, p: &Program) {
        for stmt in &p.stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let line = match stmt {
            Stmt::Let(n, e) => format!("let l{} = {};", n, self.typed(e, Ty::U32)),
            Stmt::SetSgpr(n, e) => format!("s[{}] = {};", n, self.typed(e, Ty::U32)),
            Stmt::SetVgpr(n, e) => format!("v[{}] = {};", n, self.typed(e, Ty::U32)),
            Stmt::Sample {
                temp,
                texture,
                sampler,
                coord,
                lod,
            } => {
                let uv = format!(
                    "vec2<f32>({}, {})",
                    self.typed(&coord[0], Ty::F32),
                    self.typed(&coord[1], Ty::F32)
                );
                match (lod, self.stage) {
                    (Some(lod), _) => format!(
                        "let t{} = textureSampleLevel(tex{}, samp{}, {}, {});",
                        temp,
                        texture,
                        sampler,
                        uv,
                        self.typed(lod, Ty::F32)
                    ),
                    (None, ShaderStage::Vertex) => format!(
                        "let t{} = textureSampleLevel(tex{}, samp{}, {}, 0.0);",
                        temp, texture, sampler, uv
                    ),
                    (None, ShaderStage::Pixel) => format!(
                        "let t{} = textureSample(tex{}, samp{}, {});",
                        temp, texture, sampler, uv
                    ),
                }
            }
            Stmt::Export { target, values } => {
                let [x, y, z, w] = values.as_ref();
                let vec = format!(
                    "vec4<f32>({}, {}, {}, {})",
                    self.typed(x, Ty::F32),
                    self.typed(y, Ty::F32),
                    self.typed(z, Ty::F32),
                    self.typed(w, Ty::F32)
                );
                match target {
                    ExportTarget::Position => format!("out.position = {};", vec),
                    ExportTarget::Param(n) => format!("out.param{} = {};", n, vec),
                    ExportTarget::Color(n) => format!("out.col{} = {};", n, vec),
                }
            }
        };
        let _ = writeln!(self.out, "    {}", line);
    }

    /// Emit `e` converted to `want` by bit reinterpretation
    fn typed(&self, e: &Expr, want: Ty) -> String {
        let text = self.expr(e);
        match (e.ty(), want) {
            (have, want) if have == want => text,
            (_, Ty::U32) => format!("bitcast<u32>({})", text),
            (_, Ty::F32) => format!("bitcast<f32>({})", text),
            (_, Ty::I32) => format!("bitcast<i32>({})", text),
        }
    }

    fn expr(&self, e: &Expr) -> String {
        match e {
            Expr::Sgpr(n) => format!("s[{}]", n),
            Expr::Vgpr(n) => format!("v[{}]", n),
            Expr::Const(c) => format!("{}u", c),
            Expr::ConstF32(f) => float_literal(*f),
            Expr::AsF32(inner) => self.typed(inner, Ty::F32),
            Expr::AsU32(inner) => self.typed(inner, Ty::U32),
            Expr::AsI32(inner) => self.typed(inner, Ty::I32),
            Expr::Unary(op, a) => self.unary(*op, a),
            Expr::Binary(op, a, b) => self.binary(*op, a, b),
            Expr::Fma(a, b, c) => format!(
                "fma({}, {}, {})",
                self.typed(a, Ty::F32),
                self.typed(b, Ty::F32),
                self.typed(c, Ty::F32)
            ),
            Expr::PackHalf(a, b) => format!(
                "pack2x16float(vec2<f32>({}, {}))",
                self.typed(a, Ty::F32),
                self.typed(b, Ty::F32)
            ),
            Expr::UnpackHalf(a, c) => format!(
                "unpack2x16float({}).{}",
                self.typed(a, Ty::U32),
                COMPONENTS[(*c & 1) as usize]
            ),
            Expr::UserData(n) => format!(
                "consts.user_data[{}].{}",
                n / 4,
                COMPONENTS[(*n % 4) as usize]
            ),
            Expr::Resolved(n) => format!(
                "consts.resolved[{}].{}",
                n / 4,
                COMPONENTS[(*n % 4) as usize]
            ),
            Expr::BufferLoad { slot, index } => {
                format!("buf{}[{}]", slot, self.typed(index, Ty::U32))
            }
            Expr::BufferBase(slot) => format!(
                "consts.buffer_base[{}].{}",
                slot / 4,
                COMPONENTS[(*slot % 4) as usize]
            ),
            Expr::BufferStride(slot) => format!(
                "pc.{}_strides[{}].{}",
                match self.stage {
                    ShaderStage::Vertex => "vs",
                    ShaderStage::Pixel => "ps",
                },
                slot / 4,
                COMPONENTS[(*slot % 4) as usize]
            ),
            Expr::Attribute {
                location,
                component,
            } => format!("vin.attr{}.{}", location, COMPONENTS[(*component & 3) as usize]),
            Expr::VertexIndex => "vin.vertex_index".into(),
            Expr::InstanceIndex => "vin.instance_index".into(),
            Expr::Interpolant {
                location,
                component,
            } => format!("pin.attr{}.{}", location, COMPONENTS[(*component & 3) as usize]),
            Expr::Sampled { temp, component } => {
                format!("t{}.{}", temp, COMPONENTS[(*component & 3) as usize])
            }
            Expr::Local(n) => format!("l{}", n),
        }
    }

    fn unary(&self, op: UnOp, a: &Expr) -> String {
        let f = |a: &Expr| self.typed(a, Ty::F32);
        match op {
            UnOp::Neg => format!("(-({}))", f(a)),
            UnOp::Abs => format!("abs({})", f(a)),
            UnOp::Saturate => format!("saturate({})", f(a)),
            UnOp::Fract => format!("fract({})", f(a)),
            UnOp::Trunc => format!("trunc({})", f(a)),
            UnOp::Ceil => format!("ceil({})", f(a)),
            UnOp::Floor => format!("floor({})", f(a)),
            UnOp::Round => format!("round({})", f(a)),
            UnOp::Exp2 => format!("exp2({})", f(a)),
            UnOp::Log2 => format!("log2({})", f(a)),
            UnOp::Rcp => format!("(1.0 / {})", f(a)),
            UnOp::Rsq => format!("inverseSqrt({})", f(a)),
            UnOp::Sqrt => format!("sqrt({})", f(a)),
            UnOp::SinRev => format!("sin({} * 6.2831855)", f(a)),
            UnOp::CosRev => format!("cos({} * 6.2831855)", f(a)),
            UnOp::Not => format!("(~{})", self.typed(a, Ty::U32)),
            UnOp::F32ToU32 => format!("u32({})", f(a)),
            UnOp::F32ToI32 => format!("i32({})", f(a)),
            UnOp::U32ToF32 => format!("f32({})", self.typed(a, Ty::U32)),
            UnOp::I32ToF32 => format!("f32({})", self.typed(a, Ty::I32)),
            UnOp::F32ToHalf => format!("(pack2x16float(vec2<f32>({}, 0.0)) & 0xFFFFu)", f(a)),
        }
    }

    fn binary(&self, op: BinOp, a: &Expr, b: &Expr) -> String {
        let f = |e: &Expr| self.typed(e, Ty::F32);
        match op {
            BinOp::FAdd => format!("({} + {})", f(a), f(b)),
            BinOp::FSub => format!("({} - {})", f(a), f(b)),
            BinOp::FMul => format!("({} * {})", f(a), f(b)),
            BinOp::FMin => format!("min({}, {})", f(a), f(b)),
            BinOp::FMax => format!("max({}, {})", f(a), f(b)),
            _ => {
                let (ua, ub) = (self.typed(a, Ty::U32), self.typed(b, Ty::U32));
                match op {
                    BinOp::IAdd => format!("({} + {})", ua, ub),
                    BinOp::IMul => format!("({} * {})", ua, ub),
                    BinOp::And => format!("({} & {})", ua, ub),
                    BinOp::Or => format!("({} | {})", ua, ub),
                    BinOp::Xor => format!("({} ^ {})", ua, ub),
                    BinOp::Shl => format!("({} << ({} & 31u))", ua, ub),
                    _ => format!("({} >> ({} & 31u))", ua, ub),
                }
            }
        }
    }
}

/// WGSL literal for an f32, falling back to a bit cast for non-finite values
fn float_literal(f: f32) -> String {
    if f.is_finite() {
        format!("{:?}f", f)
    } else {
        format!("bitcast<f32>({}u)", f.to_bits())
    }
}
