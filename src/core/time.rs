//! Time representation for frame-accurate playback.
//! Rates are rationals (frames per second); instants come from an injectable time source.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Rational number used for frame rates and time bases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

/// Playback speed in frames per second
pub type Speed = Rational;

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Convert to a floating point value (0.0 for a zero denominator)
    #[inline]
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Swap numerator and denominator (frames per second -> seconds per frame)
    #[inline]
    pub fn swap(self) -> Self {
        Self::new(self.den, self.num)
    }

    pub fn is_valid(self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Build a rate from a floating point value, recognizing NTSC-style x/1001 rates
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Self::new(0, 1);
        }
        let rounded = value.round();
        if (value - rounded).abs() < 1e-6 {
            return Self::new(rounded as i32, 1);
        }
        let ntsc = (value * 1001.0 / 1000.0).round();
        if (value - ntsc * 1000.0 / 1001.0).abs() < 1e-3 {
            return Self::new((ntsc * 1000.0) as i32, 1001);
        }
        Self::new((value * 1000.0).round() as i32, 1000)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(24, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{:.3}", self.to_f64())
        }
    }
}

/// Rescale `value` from time base `from` to time base `to`, rounding to nearest.
///
/// `rescale(samples, 1/sample_rate, speed.swap())` converts a sample count into frames.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    // Use i128 to avoid overflow
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let half = den / 2;
    let result = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    result as i64
}

/// Seconds elapsed between two instants, zero if `now` precedes `since`
#[inline]
pub fn elapsed_seconds(since: Instant, now: Instant) -> f64 {
    now.saturating_duration_since(since).as_secs_f64()
}

/// Source of "now" for every clock computation in the engine
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Shared time source handle
pub type SharedTime = Arc<dyn TimeSource>;

/// Monotonic wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
