//! Byte-bounded frame cache for instant seeking.
//! Keeps decoded frames around the playhead; evicts from whichever end of
//! the cached span lies farthest from it.

use std::collections::BTreeMap;
use crate::core::frame::{to_ranges, FrameNumber, Range};
use crate::decode::decoder::ImageHandle;

/// Decoded frames keyed by frame number
#[derive(Debug, Clone)]
pub struct FrameCache {
    frames: BTreeMap<FrameNumber, ImageHandle>,
    byte_count: usize,
    max_bytes: usize,
    enabled: bool,
}

impl FrameCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            byte_count: 0,
            max_bytes,
            enabled: true,
        }
    }

    pub fn get(&self, frame: FrameNumber) -> Option<&ImageHandle> {
        self.frames.get(&frame)
    }

    /// Insert a frame, then evict until the cache fits its byte budget
    pub fn insert(&mut self, frame: FrameNumber, image: ImageHandle, playhead: FrameNumber) {
        if !self.enabled {
            return;
        }
        self.byte_count += image.byte_count();
        if let Some(old) = self.frames.insert(frame, image) {
            self.byte_count -= old.byte_count();
        }
        self.evict(playhead);
    }

    fn evict(&mut self, playhead: FrameNumber) {
        while self.byte_count > self.max_bytes {
            let first = self.frames.keys().next().copied();
            let last = self.frames.keys().next_back().copied();
            let victim = match (first, last) {
                (Some(first), Some(last)) => {
                    if (playhead - first).abs() >= (last - playhead).abs() {
                        first
                    } else {
                        last
                    }
                }
                _ => break,
            };
            if let Some(image) = self.frames.remove(&victim) {
                self.byte_count -= image.byte_count();
            }
        }
    }

    /// Cached frames folded into contiguous ranges
    pub fn cached_ranges(&self) -> Vec<Range> {
        to_ranges(self.frames.keys().copied())
    }

    pub fn set_max_bytes(&mut self, max_bytes: usize, playhead: FrameNumber) {
        self.max_bytes = max_bytes;
        self.evict(playhead);
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Disabling the cache drops everything it holds
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.clear();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.byte_count = 0;
    }

    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
