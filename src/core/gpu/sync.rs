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

//! Constant-engine / draw-engine counter handshake
//!
//! The constant engine (CE) preloads constant RAM ahead of the draw engine
//! (DE). Each side increments its own counter; each side can wait on the other:
//!
//! - `WAIT_ON_DE_COUNTER_DIFF(d)` (CE) blocks while `de - ce >= d`
//! - `WAIT_ON_CE_COUNTER` (DE) blocks while `ce <= de`
//!
//! Waiters sleep on a condition variable and re-check their predicate on every
//! counter change. There is no timeout; a guest that never increments the
//! counter it waits on hangs the waiting engine. An engine that fails calls
//! [`EngineSync::abort`], which releases the other side's wait with
//! [`GpuError::EngineAborted`] until the next [`EngineSync::reset`].

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::core::error::{GpuError, Result};

/// Counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub ce: u64,
    pub de: u64,
}

impl Counters {
    /// `WAIT_ON_DE_COUNTER_DIFF(diff)` blocks in this state
    pub fn de_diff_blocks(&self, diff: u32) -> bool {
        self.de as i128 - self.ce as i128 >= diff as i128
    }

    /// `WAIT_ON_CE_COUNTER` blocks in this state
    pub fn ce_wait_blocks(&self) -> bool {
        self.ce <= self.de
    }
}

#[derive(Default)]
struct State {
    counters: Counters,
    waiters: u32,
    aborted: bool,
}

/// Shared CE/DE counters
#[derive(Default)]
pub struct EngineSync {
    state: Mutex<State>,
    changed: Condvar,
}

impl EngineSync {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current counter values
    pub fn snapshot(&self) -> Counters {
        self.lock().counters
    }

    /// Number of engines currently blocked in a wait
    pub fn waiters(&self) -> u32 {
        self.lock().waiters
    }

    /// Overwrite both counters and wake waiters
    pub fn set(&self, counters: Counters) {
        self.lock().counters = counters;
        self.changed.notify_all();
    }

    /// Zero both counters and clear an abort (start of a submission)
    pub fn reset(&self) {
        let mut state = self.lock();
        state.counters = Counters::default();
        state.aborted = false;
        drop(state);
        self.changed.notify_all();
    }

    /// Fail every current and future wait until the next reset
    pub fn abort(&self) {
        self.lock().aborted = true;
        self.changed.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    pub fn increment_ce(&self) {
        self.lock().counters.ce += 1;
        self.changed.notify_all();
    }

    pub fn increment_de(&self) {
        self.lock().counters.de += 1;
        self.changed.notify_all();
    }

    fn wait_while<F>(&self, wait: &'static str, blocks: F) -> Result<()>
    where
        F: Fn(&Counters) -> bool,
    {
        let mut state = self.lock();
        if !blocks(&state.counters) {
            return Ok(());
        }
        state.waiters += 1;
        while blocks(&state.counters) && !state.aborted {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.waiters -= 1;
        if blocks(&state.counters) {
            return Err(GpuError::EngineAborted { wait });
        }
        Ok(())
    }

    /// Block while `de - ce >= diff`
    ///
    /// # Errors
    ///
    /// [`GpuError::EngineAborted`] if the draw engine aborts first.
    pub fn wait_de_counter_diff(&self, diff: u32) -> Result<()> {
        self.wait_while("WAIT_ON_DE_COUNTER_DIFF", |c| c.de_diff_blocks(diff))
    }

    /// Block while `ce <= de`
    ///
    /// # Errors
    ///
    /// [`GpuError::EngineAborted`] if the constant engine aborts first.
    pub fn wait_ce_counter(&self) -> Result<()> {
        self.wait_while("WAIT_ON_CE_COUNTER", Counters::ce_wait_blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn wait_for_waiters(sync: &EngineSync, n: u32) {
        while sync.waiters() != n {
            thread::yield_now();
        }
    }

    #[test]
    fn test_de_diff_predicate() {
        let c = Counters { ce: 0, de: 0 };
        assert!(!c.de_diff_blocks(1));
        assert!(c.de_diff_blocks(0));

        let c = Counters { ce: 0, de: 2 };
        assert!(c.de_diff_blocks(2));
        assert!(!c.de_diff_blocks(3));

        // CE ahead of DE never blocks a positive diff
        let c = Counters { ce: 5, de: 1 };
        assert!(!c.de_diff_blocks(1));
    }

    #[test]
    fn test_ce_wait_predicate() {
        assert!(Counters { ce: 0, de: 0 }.ce_wait_blocks());
        assert!(Counters { ce: 1, de: 2 }.ce_wait_blocks());
        assert!(!Counters { ce: 3, de: 2 }.ce_wait_blocks());
    }

    #[test]
    fn test_de_diff_wait_returns_immediately_when_satisfied() {
        let sync = EngineSync::new();
        sync.wait_de_counter_diff(1).unwrap();
        assert_eq!(sync.waiters(), 0);
    }

    #[test]
    fn test_de_diff_wait_unblocks_on_ce_increment() {
        let sync = Arc::new(EngineSync::new());
        sync.set(Counters { ce: 0, de: 1 });

        let waiter = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || sync.wait_de_counter_diff(1))
        };

        wait_for_waiters(&sync, 1);
        sync.increment_ce();
        waiter.join().unwrap().unwrap();
        assert_eq!(sync.waiters(), 0);
        assert_eq!(sync.snapshot(), Counters { ce: 1, de: 1 });
    }

    #[test]
    fn test_ce_wait_unblocks_when_ce_passes_de() {
        let sync = Arc::new(EngineSync::new());

        let waiter = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || sync.wait_ce_counter())
        };

        wait_for_waiters(&sync, 1);
        sync.increment_de();
        sync.increment_ce();
        // ce == de still blocks
        assert_eq!(sync.waiters(), 1);
        sync.increment_ce();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_abort_releases_blocked_ce_wait() {
        let sync = Arc::new(EngineSync::new());

        let waiter = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || sync.wait_ce_counter())
        };

        wait_for_waiters(&sync, 1);
        sync.abort();
        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, GpuError::EngineAborted { wait: "WAIT_ON_CE_COUNTER" }));
        assert_eq!(sync.waiters(), 0);
    }

    #[test]
    fn test_abort_persists_until_reset() {
        let sync = EngineSync::new();
        sync.set(Counters { ce: 0, de: 1 });
        sync.abort();
        assert!(sync.wait_de_counter_diff(1).is_err());
        // A satisfied wait still succeeds
        assert!(sync.wait_de_counter_diff(2).is_ok());

        sync.reset();
        assert!(!sync.is_aborted());
        sync.increment_ce();
        assert!(sync.wait_ce_counter().is_ok());
    }
}
