//! Polled repeating timers for the cooperative tick loop.

use std::time::{Duration, Instant};

/// Repeating timer evaluated by the tick loop.
///
/// A running timer fires at most once per `poll`; if the loop falls behind,
/// missed periods are skipped rather than replayed.
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Timer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// Start (or restart) the timer; first fire is one interval after `now`
    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true if the timer is due at `now`, and schedules the next period
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}
