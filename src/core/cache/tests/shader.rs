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

use std::cell::Cell;

use crate::core::cache::shader_cache::dump_path;
use crate::core::cache::ShaderCache;
use crate::core::error::GpuError;
use crate::core::gpu::registers::ShaderStage;
use crate::core::memory::FlatMemory;
use crate::core::shader::{ShaderBinary, ShaderHeader};
use crate::core::test_support::{MEM_BASE, MEM_SIZE};

const S_ENDPGM: u32 = 0xBF81_0000;

/// `exp mrt{target} v0, v1, v2, v3 done`
fn export(target: u32) -> [u32; 2] {
    [0xF800_0000 | 1 << 11 | target << 4 | 0xF, 0x0302_0100]
}

fn binary(hash: u64, code: Vec<u32>) -> ShaderBinary {
    ShaderBinary {
        address: MEM_BASE,
        header: ShaderHeader {
            version: 1,
            length: code.len() as u32 * 4,
            hash,
            crc: 0,
        },
        code,
    }
}

fn pixel_shader(hash: u64) -> ShaderBinary {
    let [a, b] = export(0);
    binary(hash, vec![a, b, S_ENDPGM])
}

#[test]
fn test_compiles_once_per_hash() {
    let mut cache: ShaderCache<String> = ShaderCache::new(None);
    let shader = pixel_shader(0xABCD);
    let compiles = Cell::new(0);

    for _ in 0..3 {
        let cached = cache
            .get_or_compile(&shader, ShaderStage::Pixel, &[], |data| {
                compiles.set(compiles.get() + 1);
                Ok(data.wgsl.clone())
            })
            .unwrap();
        assert_eq!(cached.data.hash, 0xABCD);
        assert!(cached.module.contains("ps_main"));
    }

    assert_eq!(compiles.get(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().hits, 2);
    assert!(cache.get(0xABCD).is_some());
}

#[test]
fn test_key_falls_back_to_code_hash() {
    let a = pixel_shader(0);
    let b = binary(0, vec![S_ENDPGM]);
    assert_ne!(ShaderCache::<()>::shader_key(&a), 0);
    assert_ne!(
        ShaderCache::<()>::shader_key(&a),
        ShaderCache::<()>::shader_key(&b)
    );
    assert_eq!(ShaderCache::<()>::shader_key(&pixel_shader(7)), 7);
}

#[test]
fn test_compile_error_is_not_cached() {
    let mut cache: ShaderCache<()> = ShaderCache::new(None);
    let shader = pixel_shader(1);

    let err = cache
        .get_or_compile(&shader, ShaderStage::Pixel, &[], |_| {
            Err(GpuError::Resource("device lost".into()))
        })
        .unwrap_err();
    assert!(matches!(err, GpuError::Resource(_)));
    assert!(cache.is_empty());

    cache
        .get_or_compile(&shader, ShaderStage::Pixel, &[], |_| Ok(()))
        .unwrap();
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_dump_directory_receives_wgsl() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache: ShaderCache<()> = ShaderCache::new(Some(dir.path().to_path_buf()));

    cache
        .get_or_compile(&pixel_shader(0x42), ShaderStage::Pixel, &[], |_| Ok(()))
        .unwrap();
    let path = dump_path(dir.path(), 0x42, ShaderStage::Pixel, "wgsl");
    let source = std::fs::read_to_string(path).unwrap();
    assert!(source.contains("@fragment"));
}

#[test]
fn test_failed_translation_dumps_partial_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache: ShaderCache<()> = ShaderCache::new(Some(dir.path().to_path_buf()));
    // Target 9 is the null export, which has no host counterpart
    let [a, b] = export(9);
    let shader = binary(0x99, vec![a, b, S_ENDPGM]);

    let err = cache
        .get_or_compile(&shader, ShaderStage::Pixel, &[], |_| Ok(()))
        .unwrap_err();
    assert!(matches!(err, GpuError::Shader(_)));
    assert!(dump_path(dir.path(), 0x99, ShaderStage::Pixel, "partial.wgsl").exists());
    assert!(cache.is_empty());
}

#[test]
fn test_fetch_bindings_cached_by_content() {
    let memory = FlatMemory::new(MEM_BASE, MEM_SIZE);
    let addr = MEM_BASE + 0x400;
    memory
        .write_dwords(
            addr,
            &[0xC082_0304, 0xEBF3_2000, 0x8001_0400, 0xBF8C_0000, 0xBE80_2000],
        )
        .unwrap();

    let mut cache: ShaderCache<()> = ShaderCache::new(None);
    let first = cache.fetch_bindings(&memory, addr).unwrap();
    let second = cache.fetch_bindings(&memory, addr).unwrap();
    assert_eq!(first.len(), 1);
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(first[0].dest_vgpr, 4);
    assert_eq!(first[0].n_elements, 4);
}
