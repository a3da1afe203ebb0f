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

//! Rect and quad list expansion
//!
//! wgpu has no tessellation stage, so rect and quad lists are expanded by a
//! generated vertex entry point that pulls attributes from storage buffers.
//! Each patch becomes two triangles over the corner grid `y * 2 + x`:
//!
//! ```text
//! 0 ---- 1
//! |    / |
//! |  /   |
//! 2 ---- 3
//! ```
//!
//! Rect lists supply corners 0, 1 and 2; corner 3 is extrapolated as
//! `v1 + v2 - v0` for every output. Quad lists supply all four corners in
//! winding order, which the grid visits as `[0, 1, 3, 2]`.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::core::error::{GpuError, Result};
use crate::core::shader::wgsl::{PATCH_BIND_GROUP, VS_BODY};
use crate::core::shader::ShaderData;

/// Entry point of the expanded vertex stage
pub const PATCH_ENTRY: &str = "main_patch";

/// Corner visited by each of the six host vertices of a patch
pub const TRIANGLE_CORNERS: [u32; 6] = [0, 1, 2, 2, 1, 3];

/// Quad vertex feeding each grid corner
pub const QUAD_ORDER: [u32; 4] = [0, 1, 3, 2];

/// Guest primitive expanded into triangle pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatchKind {
    Rect,
    Quad,
}

impl PatchKind {
    pub fn vertices_per_patch(self) -> u32 {
        match self {
            PatchKind::Rect => 3,
            PatchKind::Quad => 4,
        }
    }

    /// Host vertices drawn for `count` guest vertices
    pub fn host_vertex_count(self, count: u32) -> u32 {
        (count / self.vertices_per_patch()).saturating_mul(TRIANGLE_CORNERS.len() as u32)
    }

    /// Guest vertex of the patch feeding `corner`; `None` when extrapolated
    pub fn corner_source(self, corner: u32) -> Option<u32> {
        match self {
            PatchKind::Rect if corner < 3 => Some(corner),
            PatchKind::Rect => None,
            PatchKind::Quad => QUAD_ORDER.get(corner as usize).copied(),
        }
    }
}

/// Vertex attribute fetched by the patch entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchAttribute {
    pub location: u32,
    pub format: wgpu::VertexFormat,
}

/// WGSL that unpacks one attribute starting at word `w` of `buf`
fn fetch_expr(buf: &str, format: wgpu::VertexFormat) -> Result<String> {
    use wgpu::VertexFormat as F;
    let word = |i: u32| format!("{}[w + {}u]", buf, i);
    let float = |i: u32| format!("bitcast<f32>({})", word(i));
    let text = match format {
        F::Float32 | F::Uint32 | F::Sint32 => format!("vec4<f32>({}, 0.0, 0.0, 1.0)", float(0)),
        F::Float32x2 | F::Uint32x2 | F::Sint32x2 => {
            format!("vec4<f32>({}, {}, 0.0, 1.0)", float(0), float(1))
        }
        F::Float32x3 | F::Uint32x3 | F::Sint32x3 => {
            format!("vec4<f32>({}, {}, {}, 1.0)", float(0), float(1), float(2))
        }
        F::Float32x4 | F::Uint32x4 | F::Sint32x4 => format!(
            "vec4<f32>({}, {}, {}, {})",
            float(0),
            float(1),
            float(2),
            float(3)
        ),
        F::Unorm8x4 | F::Uint8x4 => format!("unpack4x8unorm({})", word(0)),
        F::Snorm8x4 => format!("unpack4x8snorm({})", word(0)),
        F::Float16x2 => format!("vec4<f32>(unpack2x16float({}), 0.0, 1.0)", word(0)),
        F::Float16x4 => format!(
            "vec4<f32>(unpack2x16float({}), unpack2x16float({}))",
            word(0),
            word(1)
        ),
        F::Unorm16x2 => format!("vec4<f32>(unpack2x16unorm({}), 0.0, 1.0)", word(0)),
        F::Unorm16x4 => format!(
            "vec4<f32>(unpack2x16unorm({}), unpack2x16unorm({}))",
            word(0),
            word(1)
        ),
        F::Snorm16x2 => format!("vec4<f32>(unpack2x16snorm({}), 0.0, 1.0)", word(0)),
        F::Snorm16x4 => format!(
            "vec4<f32>(unpack2x16snorm({}), unpack2x16snorm({}))",
            word(0),
            word(1)
        ),
        other => {
            return Err(GpuError::Unimplemented(format!(
                "patch attribute format {:?}",
                other
            )))
        }
    };
    Ok(text)
}

/// Vertex module source with the patch entry point appended
///
/// `vs` must be a translated vertex shader; its `guest_vs` body runs once
/// per supplied corner.
///
/// # Errors
///
/// [`GpuError::Unimplemented`] for attribute formats that can't be pulled.
pub fn patch_source(kind: PatchKind, vs: &ShaderData, attributes: &[PatchAttribute]) -> Result<String> {
    const XYZW: [char; 4] = ['x', 'y', 'z', 'w'];
    let mut out = vs.wgsl.clone();
    out.push('\n');

    for attr in attributes {
        let n = attr.location;
        let buf = format!("pbuf{}", n);
        let _ = writeln!(
            out,
            "@group({}) @binding({}) var<storage, read> {}: array<u32>;",
            PATCH_BIND_GROUP, n, buf
        );
        let _ = writeln!(out, "\nfn patch_attr{}(vertex: u32) -> vec4<f32> {{", n);
        let _ = writeln!(
            out,
            "    let w = (vertex * pc.patch_strides[{q}].{c} + pc.patch_offsets[{q}].{c}) / 4u;",
            q = n / 4,
            c = XYZW[(n % 4) as usize]
        );
        let _ = writeln!(out, "    return {};\n}}\n", fetch_expr(&buf, attr.format)?);
    }

    let per_patch = kind.vertices_per_patch();
    out.push_str("fn patch_vertex(vertex: u32, instance: u32) -> VsOutput {\n");
    out.push_str("    var vin: VsInput;\n");
    out.push_str("    vin.vertex_index = vertex;\n");
    out.push_str("    vin.instance_index = instance;\n");
    for attr in attributes {
        let _ = writeln!(out, "    vin.attr{n} = patch_attr{n}(vertex);", n = attr.location);
    }
    let _ = writeln!(out, "    return {}(vin);\n}}\n", VS_BODY);

    let _ = writeln!(
        out,
        "@vertex\nfn {}(@builtin(vertex_index) vertex_index: u32, @builtin(instance_index) instance_index: u32) -> VsOutput {{",
        PATCH_ENTRY
    );
    let corners = TRIANGLE_CORNERS
        .iter()
        .map(|c| format!("{}u", c))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "    var corners = array<u32, 6>({});", corners);
    let _ = writeln!(out, "    let first = (vertex_index / 6u) * {}u;", per_patch);
    out.push_str("    let corner = corners[vertex_index % 6u];\n");

    match kind {
        PatchKind::Quad => {
            let order = QUAD_ORDER
                .iter()
                .map(|c| format!("{}u", c))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "    var order = array<u32, 4>({});", order);
            out.push_str("    return patch_vertex(first + order[corner], instance_index);\n");
        }
        PatchKind::Rect => {
            out.push_str("    if corner < 3u {\n");
            out.push_str("        return patch_vertex(first + corner, instance_index);\n");
            out.push_str("    }\n");
            for i in 0..3 {
                let _ = writeln!(
                    out,
                    "    let v{i} = patch_vertex(first + {i}u, instance_index);",
                    i = i
                );
            }
            out.push_str("    var out: VsOutput;\n");
            out.push_str("    out.position = v1.position + v2.position - v0.position;\n");
            for n in vs.param_exports() {
                let _ = writeln!(
                    out,
                    "    out.param{n} = v1.param{n} + v2.param{n} - v0.param{n};",
                    n = n
                );
            }
            out.push_str("    return out;\n");
        }
    }
    out.push_str("}\n");
    Ok(out)
}
