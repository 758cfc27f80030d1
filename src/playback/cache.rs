//! Cache surface: republishes the decoder's cached frame ranges.

use crate::core::frame::Range;
use crate::core::observable::ListSubject;
use crate::decode::decoder::Decoder;

#[derive(Debug, Default)]
pub struct CacheSurface {
    cached: ListSubject<Range>,
}

impl CacheSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the decoder's ranges; observers fire only when they changed
    pub fn poll(&mut self, decoder: &dyn Decoder) -> bool {
        self.cached.set_if_changed(decoder.cached_frames())
    }

    pub fn clear(&mut self) -> bool {
        self.cached.set_if_changed(Vec::new())
    }

    pub fn ranges(&self) -> &[Range] {
        self.cached.get()
    }

    pub fn observe_ranges(&mut self) -> &mut ListSubject<Range> {
        &mut self.cached
    }
}
