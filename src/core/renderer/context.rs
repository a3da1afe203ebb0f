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

//! wgpu device context
//!
//! The renderer draws off-screen: guest display buffers are render targets
//! like any other, and an embedding frontend presents the flipped one.

use crate::core::error::{GpuError, Result};
use crate::core::shader::wgsl::PUSH_CONSTANT_SIZE;

/// Features the renderer can't run without
const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::PUSH_CONSTANTS;

/// Features used when the adapter has them
const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::TEXTURE_COMPRESSION_BC
    .union(wgpu::Features::FLOAT32_FILTERABLE);

/// wgpu device and queue
pub struct RenderContext {
    /// wgpu device for creating GPU resources
    pub device: wgpu::Device,
    /// Command queue for submitting GPU commands
    pub queue: wgpu::Queue,
    /// Features enabled on `device`
    pub features: wgpu::Features,
    pub adapter_info: wgpu::AdapterInfo,
}

impl RenderContext {
    /// Create a context without a surface
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Resource`] if:
    /// - No suitable GPU adapter is found
    /// - The adapter lacks push constants
    /// - Device creation fails
    ///
    /// # Example
    ///
    /// ```no_run
    /// use liverpool::core::renderer::RenderContext;
    ///
    /// let context = pollster::block_on(RenderContext::headless()).unwrap();
    /// println!("{}", context.adapter_info.name);
    /// ```
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| GpuError::Resource(format!("Failed to find suitable GPU adapter: {}", e)))?;

        let available = adapter.features();
        if !available.contains(REQUIRED_FEATURES) {
            return Err(GpuError::Resource(format!(
                "Adapter {} lacks required features {:?}",
                adapter.get_info().name,
                REQUIRED_FEATURES - available
            )));
        }
        let features = REQUIRED_FEATURES | (available & OPTIONAL_FEATURES);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Liverpool Device"),
                required_features: features,
                required_limits: wgpu::Limits {
                    max_push_constant_size: PUSH_CONSTANT_SIZE,
                    ..adapter.limits()
                },
                memory_hints: Default::default(),
                experimental_features: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| GpuError::Resource(format!("Failed to create device: {}", e)))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Initialized wgpu context on {} ({:?}), features: {:?}",
            adapter_info.name,
            adapter_info.backend,
            features
        );

        Ok(Self {
            device,
            queue,
            features,
            adapter_info,
        })
    }

    /// Blocking wrapper around [`RenderContext::headless`]
    pub fn headless_blocking() -> Result<Self> {
        pollster::block_on(Self::headless())
    }

    /// Whether block-compressed textures can be sampled directly
    pub fn supports_bc(&self) -> bool {
        self.features.contains(wgpu::Features::TEXTURE_COMPRESSION_BC)
    }
}
