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

//! Guest event sources
//!
//! The HLE layer registers callbacks that stand in for guest event queues.
//! `EVENT_WRITE_EOP` with an interrupt selector triggers end-of-pipe sources;
//! a completed flip triggers flip sources.

use std::sync::{Arc, Mutex, PoisonError};

/// Kind of guest-visible event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// End-of-pipe fence reached
    EndOfPipe,
    /// A flip completed
    Flip,
}

/// Event callback; receives the event payload (fence value or flip argument)
pub type EventCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Registered event sources
#[derive(Default)]
pub struct EventSources {
    sources: Mutex<Vec<(EventKind, EventCallback)>>,
}

impl EventSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `kind`
    pub fn register(&self, kind: EventKind, callback: EventCallback) {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, callback));
    }

    /// Invoke every callback registered for `kind`, returning how many ran
    pub fn trigger(&self, kind: EventKind, data: u64) -> usize {
        // Callbacks may register further sources
        let matching: Vec<EventCallback> = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in &matching {
            callback(data);
        }
        log::trace!("Triggered {} {:?} source(s)", matching.len(), kind);
        matching.len()
    }
}
