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

//! Core emulation components
//!
//! Everything that runs on or feeds the emulated graphics front-end lives here:
//! guest memory access, the register file, the PM4 interpreters, the shader
//! translator, host resource caches and the renderer backend.

pub mod cache;
pub mod capture;
pub mod config;
pub mod detile;
pub mod error;
pub mod gpu;
pub mod memory;
pub mod pm4;
pub mod queue;
pub mod renderer;
pub mod shader;

// Re-export commonly used types
pub use error::{GpuError, Result};
pub use gpu::GpuContext;
