// src/engine/mod.rs

//! Long-running shell around the mail queue.
//!
//! The queue and the watcher are synchronous and never block; [`Runtime`]
//! polls them from a tokio loop, reacts to Ctrl-C, and drains the worker
//! pool on exit.

use std::time::Duration;

use crate::mail::EntryOutcome;

pub mod runtime;

pub use runtime::Runtime;

/// Options for the runtime loop.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Exit as soon as the queue is empty (used for `--once`).
    pub exit_when_idle: bool,
    /// Time between two queue passes.
    pub poll_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            exit_when_idle: false,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Counts of finished entries over one runtime session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub retried: usize,
    pub broken: usize,
}

impl RunSummary {
    pub fn count(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Succeeded => self.succeeded += 1,
            EntryOutcome::Failed => self.failed += 1,
            EntryOutcome::Retrying { .. } => self.retried += 1,
            EntryOutcome::Broken => self.broken += 1,
        }
    }

    /// Entries that left the queue for good.
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.broken
    }
}
