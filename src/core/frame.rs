//! Frame numbers, closed frame ranges and playable sequences.

use std::fmt;

/// Signed frame index into a playable sequence
pub type FrameNumber = i64;

/// Sentinel for "no frame"
pub const INVALID: FrameNumber = FrameNumber::MIN;

/// Closed interval `[min, max]` of frame numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: FrameNumber,
    pub max: FrameNumber,
}

impl Range {
    /// Create a range, ordering the bounds
    pub fn new(a: FrameNumber, b: FrameNumber) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn single(frame: FrameNumber) -> Self {
        Self { min: frame, max: frame }
    }

    /// Number of frames in the range
    pub fn len(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    pub fn contains(&self, frame: FrameNumber) -> bool {
        frame >= self.min && frame <= self.max
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Fold frame numbers into sorted, merged contiguous ranges
pub fn to_ranges<I>(frames: I) -> Vec<Range>
where
    I: IntoIterator<Item = FrameNumber>,
{
    let mut sorted: Vec<FrameNumber> = frames.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out: Vec<Range> = Vec::new();
    for frame in sorted {
        match out.last_mut() {
            Some(last) if last.max + 1 == frame => last.max = frame,
            _ => out.push(Range::single(frame)),
        }
    }
    out
}

/// Ordered, finite set of frame numbers opened from a source.
///
/// Playback addresses frames by index `0..size()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    pub ranges: Vec<Range>,
}

impl Sequence {
    pub fn new(ranges: Vec<Range>) -> Self {
        Self { ranges }
    }

    /// Sequence of `size` frames numbered from zero
    pub fn with_size(size: usize) -> Self {
        if size == 0 {
            return Self::default();
        }
        Self::new(vec![Range::new(0, size as FrameNumber - 1)])
    }

    /// Playable frame count
    pub fn size(&self) -> usize {
        self.ranges.iter().map(Range::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
