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

//! Texture detiling
//!
//! Guest surfaces are stored in GPU tiling layouts. Converting them to the
//! row-major layout the host expects is delegated to a [`Detiler`]; the
//! texture cache only needs the linear bytes of a known size.

use std::sync::atomic::{AtomicBool, Ordering};

use super::error::{GpuError, Result};

/// Tile mode index of the linear-aligned layout
pub const TILE_MODE_LINEAR_ALIGNED: u32 = 8;

/// Surface description handed to a detiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetileParams {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row pitch in pixels
    pub pitch: u32,
    pub tile_mode: u32,
    /// Bytes per element (pixel, or 4×4 block when `block_compressed`)
    pub element_bytes: u32,
    pub block_compressed: bool,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub fragments: u32,
}

impl DetileParams {
    /// Elements per row and rows in the linear output
    pub fn linear_extent(&self) -> (u32, u32) {
        if self.block_compressed {
            (self.width.div_ceil(4), self.height.div_ceil(4))
        } else {
            (self.width, self.height)
        }
    }

    /// Row pitch in elements of the input
    pub fn input_pitch(&self) -> u32 {
        let pitch = self.pitch.max(self.width);
        if self.block_compressed {
            pitch.div_ceil(4)
        } else {
            pitch
        }
    }

    /// Byte size of the tiled input for mip 0 of one layer
    pub fn input_size(&self) -> usize {
        let (_, rows) = self.linear_extent();
        self.input_pitch() as usize * rows as usize * self.element_bytes as usize
    }

    /// Byte size of the linear output
    pub fn output_size(&self) -> usize {
        let (cols, rows) = self.linear_extent();
        cols as usize * rows as usize * self.element_bytes as usize
    }
}

/// Converts tiled surface bytes into linear rows
pub trait Detiler: Send + Sync {
    fn detile(&self, tiled: &[u8], params: &DetileParams) -> Result<Vec<u8>>;
}

/// Detiler that understands only pitch-linear surfaces
///
/// Tiled inputs are repacked as if they were linear, which keeps the content
/// recognizable but scrambled; a warning is logged the first time this
/// happens.
#[derive(Debug, Default)]
pub struct LinearDetiler {
    warned: AtomicBool,
}

impl LinearDetiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Detiler for LinearDetiler {
    fn detile(&self, tiled: &[u8], params: &DetileParams) -> Result<Vec<u8>> {
        if tiled.len() < params.input_size() {
            return Err(GpuError::Resource(format!(
                "detile input is {} bytes, expected {}",
                tiled.len(),
                params.input_size()
            )));
        }
        if params.tile_mode != TILE_MODE_LINEAR_ALIGNED && !self.warned.swap(true, Ordering::Relaxed) {
            log::warn!(
                "Tile mode {} is not supported, treating surface as linear",
                params.tile_mode
            );
        }

        let (cols, rows) = params.linear_extent();
        let row_out = cols as usize * params.element_bytes as usize;
        let row_in = params.input_pitch() as usize * params.element_bytes as usize;
        if row_in == row_out {
            return Ok(tiled[..params.output_size()].to_vec());
        }

        let mut out = Vec::with_capacity(params.output_size());
        for row in 0..rows as usize {
            out.extend_from_slice(&tiled[row * row_in..row * row_in + row_out]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(width: u32, height: u32, pitch: u32) -> DetileParams {
        DetileParams {
            width,
            height,
            pitch,
            tile_mode: TILE_MODE_LINEAR_ALIGNED,
            element_bytes: 4,
            block_compressed: false,
            mip_levels: 1,
            array_layers: 1,
            fragments: 1,
        }
    }

    #[test]
    fn test_linear_detile_strips_pitch_padding() {
        let p = params(2, 2, 4);
        let tiled: Vec<u8> = (0..32).collect();
        let out = LinearDetiler::new().detile(&tiled, &p).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..8], &tiled[..8]);
        assert_eq!(&out[8..], &tiled[16..24]);
    }

    #[test]
    fn test_block_compressed_extent() {
        let p = DetileParams {
            block_compressed: true,
            element_bytes: 8,
            ..params(10, 6, 10)
        };
        assert_eq!(p.linear_extent(), (3, 2));
        assert_eq!(p.output_size(), 48);
    }

    #[test]
    fn test_short_input_is_rejected() {
        assert!(LinearDetiler::new().detile(&[0; 8], &params(4, 4, 4)).is_err());
    }
}
