//! Real-speed estimator: frames actually presented per second.

use std::time::Instant;
use crate::core::time::elapsed_seconds;

#[derive(Debug, Clone)]
pub struct RealSpeedEstimator {
    frames: u64,
    since: Instant,
}

impl RealSpeedEstimator {
    pub fn new(now: Instant) -> Self {
        Self { frames: 0, since: now }
    }

    /// Count frames consumed by the tick loop
    pub fn add_frames(&mut self, count: u64) {
        self.frames += count;
    }

    /// Start a new measurement window
    pub fn restart(&mut self, now: Instant) {
        self.frames = 0;
        self.since = now;
    }

    /// Frames per second over the window ending at `now`, then start a new
    /// window. Zero when no time has passed.
    pub fn sample(&mut self, now: Instant) -> f64 {
        let seconds = elapsed_seconds(self.since, now);
        let speed = if seconds > 0.0 {
            self.frames as f64 / seconds
        } else {
            0.0
        };
        self.restart(now);
        speed
    }
}
