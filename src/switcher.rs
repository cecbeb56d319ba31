// SPDX-License-Identifier: GPL-3.0-only

//! Program/preview switcher
//!
//! Holds the on-air source index (0 = golfer camera, 1 = simulator) and
//! notifies on change. Redundant sets emit nothing. No throttling here; the
//! auto-cut controller owns its own cooldowns.

use crate::events::EventHub;
use std::sync::Mutex;
use tracing::info;

/// Program source change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSourceChanged {
    pub old: usize,
    pub new: usize,
}

/// Two-input program switcher
pub struct Switcher {
    program: Mutex<usize>,
    program_source_changed: EventHub<ProgramSourceChanged>,
}

impl Default for Switcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Switcher {
    pub fn new() -> Self {
        Self {
            program: Mutex::new(0),
            program_source_changed: EventHub::new(),
        }
    }

    pub fn program_source_index(&self) -> usize {
        *self.program.lock().unwrap()
    }

    /// Cut to `index`; observers run synchronously on the calling thread,
    /// outside the switcher lock
    pub fn set_program_source_index(&self, index: usize) {
        debug_assert!(index <= 1, "program source index is 0 or 1");
        let change = {
            let mut program = self.program.lock().unwrap();
            if *program == index {
                None
            } else {
                let old = *program;
                *program = index;
                Some(ProgramSourceChanged { old, new: index })
            }
        };
        if let Some(change) = change {
            info!(old = change.old, new = change.new, "Program source changed");
            self.program_source_changed.emit(&change);
        }
    }

    pub fn program_source_changed(&self) -> &EventHub<ProgramSourceChanged> {
        &self.program_source_changed
    }
}
