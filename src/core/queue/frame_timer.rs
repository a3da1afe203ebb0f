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

//! Flip pacing
//!
//! Holds the presentation cadence of the GPU thread. After each flip the
//! thread sleeps until one frame period has passed since the previous flip,
//! so guests that flip faster than the display refresh are throttled the
//! way the real video-out would throttle them.

use std::thread;
use std::time::{Duration, Instant};

/// Flip cadence tracker
///
/// # Example
///
/// ```
/// use liverpool::core::queue::FrameTimer;
///
/// let mut timer = FrameTimer::new(60);
/// timer.tick();
/// assert_eq!(timer.frame_count(), 1);
/// ```
pub struct FrameTimer {
    /// Target time between flips
    target_frame_time: Duration,
    /// Time of the last flip
    last_frame: Instant,
    frame_count: u64,
    fps: f32,
    frame_time_ms: f32,
    /// Start of the current FPS measurement window
    fps_start: Instant,
    fps_frame_count: u64,
}

impl FrameTimer {
    /// Create a timer for `target_fps` flips per second
    ///
    /// # Panics
    ///
    /// Panics if `target_fps` is 0. [`GpuConfig::validate`] rejects that
    /// value before a GPU thread is spawned.
    ///
    /// [`GpuConfig::validate`]: crate::core::config::GpuConfig::validate
    pub fn new(target_fps: u32) -> Self {
        assert!(target_fps > 0, "target_fps must be greater than 0");
        let target_frame_time = Duration::from_nanos(1_000_000_000 / target_fps as u64);
        let now = Instant::now();

        Self {
            target_frame_time,
            last_frame: now,
            frame_count: 0,
            fps: 0.0,
            frame_time_ms: 0.0,
            fps_start: now,
            fps_frame_count: 0,
        }
    }

    /// Record a flip
    ///
    /// FPS is recomputed roughly once per second.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_frame);

        self.frame_time_ms = elapsed.as_secs_f32() * 1000.0;
        self.frame_count += 1;
        self.fps_frame_count += 1;

        let fps_elapsed = now.duration_since(self.fps_start);
        if fps_elapsed >= Duration::from_secs(1) {
            self.fps = self.fps_frame_count as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = 0;
            self.fps_start = now;
        }

        self.last_frame = now;
    }

    /// Sleep until the next flip is due, then record it
    ///
    /// Returns the time spent sleeping.
    pub fn pace(&mut self) -> Duration {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
        self.tick();
        remaining
    }

    /// Time left until the next flip is due
    #[inline(always)]
    pub fn remaining(&self) -> Duration {
        self.next_frame_instant()
            .saturating_duration_since(Instant::now())
    }

    /// Whether a full frame period has passed since the last flip
    #[inline(always)]
    pub fn should_run_frame(&self) -> bool {
        Instant::now().duration_since(self.last_frame) >= self.target_frame_time
    }

    /// Instant the next flip is due
    #[inline(always)]
    pub fn next_frame_instant(&self) -> Instant {
        self.last_frame + self.target_frame_time
    }

    /// Target time between flips
    pub fn target_frame_time(&self) -> Duration {
        self.target_frame_time
    }

    /// Measured flips per second
    #[inline(always)]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Time between the last two flips in milliseconds
    #[inline(always)]
    pub fn frame_time_ms(&self) -> f32 {
        self.frame_time_ms
    }

    /// Total flips recorded
    #[inline(always)]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(60)
    }
}
