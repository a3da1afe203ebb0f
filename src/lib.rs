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

//! liverpool: GNM graphics front-end emulation core
//!
//! This crate reproduces the console's AMD-GCN based graphics front-end on a
//! host GPU through wgpu.
//!
//! # Architecture
//!
//! The core is organized into the following modules:
//!
//! - [`core::pm4`]: PM4 command-stream interpreter and the constant engine
//! - [`core::shader`]: GCN decoder, fetch-shader parser and GCN → WGSL translator
//! - [`core::cache`]: Shader, pipeline, buffer and texture caches
//! - [`core::renderer`]: Renderer interface, pipeline construction and the wgpu backend
//! - [`core::queue`]: Submission queue and the GPU consumer thread
//! - [`core::memory`]: Guest memory access and write-dirty tracking
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use liverpool::core::config::GpuConfig;
//! use liverpool::core::memory::HostMemory;
//! use liverpool::core::queue::GpuThread;
//! use liverpool::core::renderer::NullRenderer;
//!
//! let memory = Arc::new(unsafe { HostMemory::new() });
//! let gpu = GpuThread::spawn(GpuConfig::default(), memory, NullRenderer::default())?;
//! // gpu.queue().submit_graphics(dcb_addr, dcb_size, 0, 0);
//! # Ok::<(), liverpool::core::error::GpuError>(())
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`core::error::Result<T>`] which is an alias for
//! `Result<T, GpuError>`.

pub mod core;

// Re-export commonly used types
pub use core::error::{GpuError, Result};
