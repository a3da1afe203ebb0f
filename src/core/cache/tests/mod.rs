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

//! Cache tests

mod shader;

use std::sync::{Mutex, PoisonError};

use crate::core::cache::{BufferAllocator, ImageLayout, TextureAllocator, TextureDesc};
use crate::core::error::{GpuError, Result};

/// Host buffer double holding a copy of what was uploaded
#[derive(Debug)]
pub(super) struct MockBuffer {
    pub data: Mutex<Vec<u8>>,
}

impl MockBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Debug, Default)]
pub(super) struct MockBufferAllocator {
    pub created: usize,
    pub uploads: usize,
}

impl BufferAllocator for MockBufferAllocator {
    type Buffer = MockBuffer;

    fn create_buffer(&mut self, size: u64) -> Result<MockBuffer> {
        self.created += 1;
        Ok(MockBuffer {
            data: Mutex::new(vec![0; size as usize]),
        })
    }

    fn write_buffer(&mut self, buffer: &MockBuffer, offset: u64, data: &[u8]) -> Result<()> {
        self.uploads += 1;
        let mut contents = buffer.data.lock().unwrap_or_else(PoisonError::into_inner);
        let start = offset as usize;
        if start + data.len() > contents.len() {
            return Err(GpuError::Resource("upload past end of buffer".into()));
        }
        contents[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[derive(Debug)]
pub(super) struct MockTexture {
    pub desc: TextureDesc,
}

#[derive(Debug, Default)]
pub(super) struct MockTextureAllocator {
    pub created: usize,
    pub uploaded_bytes: Vec<usize>,
    pub transitions: Vec<(ImageLayout, ImageLayout)>,
}

impl TextureAllocator for MockTextureAllocator {
    type Texture = MockTexture;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<MockTexture> {
        self.created += 1;
        Ok(MockTexture { desc: desc.clone() })
    }

    fn write_texture(&mut self, _texture: &MockTexture, _desc: &TextureDesc, data: &[u8]) -> Result<()> {
        self.uploaded_bytes.push(data.len());
        Ok(())
    }

    fn transition(&mut self, _texture: &MockTexture, from: ImageLayout, to: ImageLayout) -> Result<()> {
        self.transitions.push((from, to));
        Ok(())
    }
}
