//! Audio playhead shared between the audio callback and the tick loop.
//!
//! The callback adds the samples it delivered; the engine resets the
//! accumulators on seek and rebases them on speed changes. Both sides copy a
//! `PlayheadSnapshot` under one short critical section.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Consistent copy of the playhead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayheadSnapshot {
    /// Seek epoch the accumulators belong to
    pub epoch: u64,
    /// Sample frames delivered to the device since the last reset
    pub samples_total: u64,
    /// When the callback last delivered samples (or the reset time)
    pub last_consumed: Instant,
}

#[derive(Debug)]
pub struct Playhead {
    state: Mutex<PlayheadSnapshot>,
}

impl Playhead {
    pub fn new(now: Instant) -> Self {
        Self {
            state: Mutex::new(PlayheadSnapshot {
                epoch: 0,
                samples_total: 0,
                last_consumed: now,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlayheadSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PlayheadSnapshot {
        *self.lock()
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Start a new epoch with zeroed accumulators
    pub fn reset(&self, epoch: u64, now: Instant) {
        *self.lock() = PlayheadSnapshot {
            epoch,
            samples_total: 0,
            last_consumed: now,
        };
    }

    /// Zero the accumulators but stay in the current epoch, so carryover
    /// audio is still played
    pub fn rebase(&self, now: Instant) {
        let mut state = self.lock();
        state.samples_total = 0;
        state.last_consumed = now;
    }

    /// Account for delivered samples. Ignored when a seek moved the playhead
    /// to another epoch while the callback was copying.
    pub fn commit(&self, epoch: u64, samples: u64, now: Instant) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            return false;
        }
        state.samples_total += samples;
        state.last_consumed = now;
        true
    }
}
