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

//! Submission queue and the GPU consumer thread
//!
//! Producers (HLE driver calls on any thread) push [`Command`]s onto a single
//! FIFO. One thread named `gpu` pops them in order and runs each to
//! completion before taking the next, so submission order is execution order
//! and a flip always observes the register effects of every submission
//! queued before it.
//!
//! - [`CommandQueue`]: the shared FIFO
//! - [`GpuThread`]: the consumer, owning the context, processor and renderer
//! - [`VideoOut`]: display buffers and their flip labels
//! - [`FrameTimer`]: flip pacing

pub mod frame_timer;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde::Serialize;

use crate::core::config::GpuConfig;
use crate::core::error::{GpuError, Result};
use crate::core::gpu::events::EventKind;
use crate::core::gpu::GpuContext;
use crate::core::memory::GuestMemory;
use crate::core::pm4::{CommandProcessor, ConstantEngineHost, ProcessStats};
use crate::core::renderer::{DisplayBuffer, Renderer};

pub use frame_timer::FrameTimer;

/// Label value written while a buffer is on screen
pub const LABEL_DISPLAYED: u32 = 1;

/// Label value of a buffer that is free for rendering
pub const LABEL_RELEASED: u32 = 0;

/// Work item for the GPU thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run a draw command buffer and an optional constant command buffer
    ///
    /// Sizes are in bytes; a zero `ccb` or `ccb_size` means no CE pass.
    SubmitGraphics {
        dcb: u64,
        dcb_size: u32,
        ccb: u64,
        ccb_size: u32,
    },
    /// Present a registered display buffer
    Flip {
        handle: u32,
        buffer_index: u32,
        flip_arg: u64,
    },
    /// Stop the consumer after everything queued before it
    Shutdown,
}

/// FIFO between producers and the GPU thread
#[derive(Default)]
pub struct CommandQueue {
    commands: Mutex<VecDeque<Command>>,
    available: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Command>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a command and wake the consumer
    pub fn push(&self, command: Command) {
        self.lock().push_back(command);
        self.available.notify_one();
    }

    /// Queue a graphics submission
    ///
    /// # Arguments
    ///
    /// * `dcb` - Guest address of the draw command buffer
    /// * `dcb_size` - Draw command buffer size in bytes
    /// * `ccb` - Guest address of the constant command buffer, or 0
    /// * `ccb_size` - Constant command buffer size in bytes
    pub fn submit_graphics(&self, dcb: u64, dcb_size: u32, ccb: u64, ccb_size: u32) {
        self.push(Command::SubmitGraphics {
            dcb,
            dcb_size,
            ccb,
            ccb_size,
        });
    }

    /// Queue a flip of `buffer_index` on video-out `handle`
    pub fn submit_flip(&self, handle: u32, buffer_index: u32, flip_arg: u64) {
        self.push(Command::Flip {
            handle,
            buffer_index,
            flip_arg,
        });
    }

    /// Ask the consumer to exit once the queue drains up to this point
    pub fn shutdown(&self) {
        self.push(Command::Shutdown);
    }

    /// Block until a command is available and take it
    pub fn pop(&self) -> Command {
        let mut commands = self.lock();
        loop {
            if let Some(command) = commands.pop_front() {
                return command;
            }
            commands = self
                .available
                .wait(commands)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take a command without blocking
    pub fn try_pop(&self) -> Option<Command> {
        self.lock().pop_front()
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct DisplaySlot {
    buffer: DisplayBuffer,
    /// Guest address of the flip label, 0 for none
    label: u64,
}

/// Display buffers registered per video-out handle
///
/// Each buffer may carry a guest label. A flip writes [`LABEL_DISPLAYED`] to
/// the label of the buffer going on screen and, once presented, writes
/// [`LABEL_RELEASED`] to the label of the buffer it replaced.
#[derive(Default)]
pub struct VideoOut {
    slots: Mutex<HashMap<(u32, u32), DisplaySlot>>,
    /// Buffer index currently on screen, per handle
    current: Mutex<HashMap<u32, u32>>,
}

impl VideoOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `buffer` as `index` of `handle`
    ///
    /// Re-registering an index replaces the previous buffer.
    pub fn register_buffer(&self, handle: u32, index: u32, buffer: DisplayBuffer, label: u64) {
        log::info!(
            "VideoOut {}: buffer {} at 0x{:X} ({}x{}, label 0x{:X})",
            handle,
            index,
            buffer.address,
            buffer.width,
            buffer.height,
            label
        );
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((handle, index), DisplaySlot { buffer, label });
    }

    /// Registered buffer `index` of `handle`
    pub fn buffer(&self, handle: u32, index: u32) -> Option<DisplayBuffer> {
        self.slot(handle, index).map(|s| s.buffer)
    }

    /// Buffer index on screen for `handle`
    pub fn current(&self, handle: u32) -> Option<u32> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .copied()
    }

    fn slot(&self, handle: u32, index: u32) -> Option<DisplaySlot> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(handle, index))
            .copied()
    }

    /// Present `index` of `handle` through `renderer`
    ///
    /// Sets the buffer's label, presents it, fires the flip event sources
    /// with `flip_arg` and releases the label of the previously displayed
    /// buffer.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Resource`] for an unregistered buffer, or any error
    /// from the label writes or the renderer.
    pub fn flip(
        &self,
        ctx: &GpuContext,
        renderer: &mut dyn Renderer,
        handle: u32,
        index: u32,
        flip_arg: u64,
    ) -> Result<()> {
        let slot = self.slot(handle, index).ok_or_else(|| {
            GpuError::Resource(format!(
                "flip of unregistered display buffer {} on handle {}",
                index, handle
            ))
        })?;

        if slot.label != 0 {
            ctx.memory().write_u32(slot.label, LABEL_DISPLAYED)?;
        }
        renderer.flip(ctx, &slot.buffer)?;
        let notified = ctx.events().trigger(EventKind::Flip, flip_arg);
        log::trace!(
            "Flip handle {} buffer {} (arg 0x{:X}, {} sources)",
            handle,
            index,
            flip_arg,
            notified
        );

        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, index);
        if let Some(previous) = previous.filter(|&p| p != index) {
            if let Some(prev) = self.slot(handle, previous).filter(|s| s.label != 0) {
                ctx.memory().write_u32(prev.label, LABEL_RELEASED)?;
            }
        }
        Ok(())
    }
}

/// Counters reported by the GPU thread on exit
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GpuStats {
    /// Graphics submissions executed
    pub submits: u64,
    /// Submissions halted by an error
    pub failed_submits: u64,
    /// Flips presented
    pub flips: u64,
    /// Flips that failed
    pub failed_flips: u64,
    /// Packet totals across all submissions
    pub packets: ProcessStats,
}

/// GPU consumer thread
///
/// The context lives behind a mutex so other threads can inspect it; the GPU
/// thread holds the lock for the duration of each command and is the only
/// writer.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use liverpool::core::config::GpuConfig;
/// use liverpool::core::memory::FlatMemory;
/// use liverpool::core::queue::GpuThread;
/// use liverpool::core::renderer::NullRenderer;
///
/// let memory = Arc::new(FlatMemory::new(0x10_0000, 0x10_0000));
/// let gpu = GpuThread::spawn(GpuConfig::default(), memory, NullRenderer::default())?;
/// gpu.queue().submit_graphics(0x10_0000, 16, 0, 0);
/// let stats = gpu.join()?;
/// # Ok::<(), liverpool::core::error::GpuError>(())
/// ```
pub struct GpuThread {
    queue: Arc<CommandQueue>,
    video_out: Arc<VideoOut>,
    context: Arc<Mutex<GpuContext>>,
    handle: Option<JoinHandle<Result<GpuStats>>>,
}

impl GpuThread {
    /// Spawn the consumer thread
    ///
    /// The renderer is initialised on the new thread before the first
    /// command is taken; an init failure ends the thread and is reported by
    /// [`GpuThread::join`].
    pub fn spawn<R>(config: GpuConfig, memory: Arc<dyn GuestMemory>, renderer: R) -> Result<Self>
    where
        R: Renderer + 'static,
    {
        config.validate()?;
        let queue = Arc::new(CommandQueue::new());
        let video_out = Arc::new(VideoOut::new());
        let context = Arc::new(Mutex::new(GpuContext::new(config, memory)));

        let worker = Worker {
            queue: Arc::clone(&queue),
            video_out: Arc::clone(&video_out),
            context: Arc::clone(&context),
        };
        let handle = thread::Builder::new()
            .name("gpu".to_string())
            .spawn(move || worker.run(renderer))?;

        Ok(Self {
            queue,
            video_out,
            context,
            handle: Some(handle),
        })
    }

    /// Producer side of the queue
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Display buffer registry
    pub fn video_out(&self) -> &Arc<VideoOut> {
        &self.video_out
    }

    /// Shared GPU context
    pub fn context(&self) -> &Arc<Mutex<GpuContext>> {
        &self.context
    }

    /// Queue a shutdown behind pending work and wait for the thread to exit
    pub fn join(mut self) -> Result<GpuStats> {
        self.stop()
    }

    fn stop(&mut self) -> Result<GpuStats> {
        let Some(handle) = self.handle.take() else {
            return Ok(GpuStats::default());
        };
        self.queue.shutdown();
        handle
            .join()
            .map_err(|_| GpuError::Resource("GPU thread panicked".to_string()))?
    }
}

impl Drop for GpuThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("GPU thread exited with error: {}", e);
        }
    }
}

struct Worker {
    queue: Arc<CommandQueue>,
    video_out: Arc<VideoOut>,
    context: Arc<Mutex<GpuContext>>,
}

impl Worker {
    fn lock_context(&self) -> MutexGuard<'_, GpuContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run<R: Renderer>(self, mut renderer: R) -> Result<GpuStats> {
        let (mut ce, mut timer, pace) = {
            let ctx = self.lock_context();
            renderer.init(&ctx)?;
            let config = ctx.config();
            (
                ConstantEngineHost::new(ctx.memory_arc(), Arc::clone(ctx.sync())),
                FrameTimer::new(config.flip_rate_hz),
                config.pace_flips,
            )
        };
        let mut processor = CommandProcessor::new();
        let mut stats = GpuStats::default();
        log::info!("GPU thread started");

        loop {
            match self.queue.pop() {
                Command::Shutdown => break,
                Command::SubmitGraphics {
                    dcb,
                    dcb_size,
                    ccb,
                    ccb_size,
                } => {
                    let mut ctx = self.lock_context();
                    let result = Self::submit(
                        &mut ctx,
                        &mut renderer,
                        &mut processor,
                        &mut ce,
                        (dcb, dcb_size),
                        (ccb, ccb_size),
                    );
                    stats.submits += 1;
                    match result {
                        Ok(s) => log::debug!(
                            "Submit 0x{:X}: {} packets, {} draws, {} skipped",
                            dcb,
                            s.packets,
                            s.draws,
                            s.skipped
                        ),
                        Err(e) => {
                            stats.failed_submits += 1;
                            log::error!("Submit 0x{:X} halted: {}", dcb, e);
                        }
                    }
                }
                Command::Flip {
                    handle,
                    buffer_index,
                    flip_arg,
                } => {
                    {
                        let ctx = self.lock_context();
                        match self.video_out.flip(
                            &ctx,
                            &mut renderer,
                            handle,
                            buffer_index,
                            flip_arg,
                        ) {
                            Ok(()) => stats.flips += 1,
                            Err(e) => {
                                stats.failed_flips += 1;
                                log::error!("Flip failed: {}", e);
                            }
                        }
                    }
                    if pace {
                        timer.pace();
                    } else {
                        timer.tick();
                    }
                    renderer.begin_frame();
                }
            }
        }

        ce.join()?;
        stats.packets = processor.stats();
        log::info!(
            "GPU thread stopped: {} submits, {} flips ({:.1} fps)",
            stats.submits,
            stats.flips,
            timer.fps()
        );
        Ok(stats)
    }

    fn submit(
        ctx: &mut GpuContext,
        renderer: &mut dyn Renderer,
        processor: &mut CommandProcessor,
        ce: &mut ConstantEngineHost,
        (dcb, dcb_size): (u64, u32),
        (ccb, ccb_size): (u64, u32),
    ) -> Result<ProcessStats> {
        let dcb = ctx.memory().read_dwords(dcb, dcb_size as usize / 4)?;
        let ccb = if ccb != 0 && ccb_size != 0 {
            Some(ctx.memory().read_dwords(ccb, ccb_size as usize / 4)?)
        } else {
            None
        };
        processor.submit(ctx, renderer, ce, &dcb, ccb)
    }
}
