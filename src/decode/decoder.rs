//! Decoder boundary of the playback engine.
//!
//! Decoders run ahead of real time on their own threads and push into the
//! shared queue pair. The engine only asks them to seek, tunes their
//! threading and cache, and reads back their cached frame ranges.
//! Video decode output is RGBA8, audio output is interleaved PCM.

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::audio::buffer::AudioBuffer;
use crate::core::frame::{FrameNumber, Range};
use crate::decode::queue::SharedQueues;
use crate::decode::stream_info::MediaInfo;

/// Error type for decoding operations
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("FFmpeg error: {0}")]
    FFmpeg(String),
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("No video stream found")]
    NoVideoStream,
    #[error("Invalid layer: {0}")]
    InvalidLayer(usize),
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("Invalid pattern source: {0}")]
    InvalidPattern(String),
    #[error("Thread error: {0}")]
    Thread(String),
}

/// Direction the consumer will read frames in; decoders prefetch that way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

/// Decoded RGBA8 image
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    pub fn byte_count(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Shared handle to a decoded image. Two handles are equal only when they
/// point at the same decoded image.
#[derive(Debug, Clone)]
pub struct ImageHandle(Arc<Image>);

impl ImageHandle {
    pub fn new(image: Image) -> Self {
        Self(Arc::new(image))
    }
}

impl From<Arc<Image>> for ImageHandle {
    fn from(image: Arc<Image>) -> Self {
        Self(image)
    }
}

impl PartialEq for ImageHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for ImageHandle {
    type Target = Image;

    fn deref(&self) -> &Image {
        &self.0
    }
}

/// Decoded video frame, tagged with the seek epoch that requested it
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub frame: FrameNumber,
    pub image: ImageHandle,
    pub epoch: u64,
}

/// Decoded audio block, tagged with the seek epoch that requested it
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub audio: AudioBuffer,
    pub epoch: u64,
}

/// Options applied when opening a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// Video stream to decode
    pub layer: usize,
    pub video_queue_size: usize,
    pub audio_queue_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            layer: 0,
            video_queue_size: 30,
            audio_queue_size: 30,
        }
    }
}

/// An opened source producing into a pair of bounded queues
pub trait Decoder: Send {
    fn info(&self) -> &MediaInfo;

    /// Queue pair this decoder produces into
    fn queues(&self) -> SharedQueues;

    /// Restart decoding at `frame`, reading in `direction`. Frames produced
    /// afterwards carry `epoch`.
    fn seek(&mut self, frame: FrameNumber, direction: Direction, epoch: u64);

    /// Currently cached frame ranges
    fn cached_frames(&self) -> Vec<Range>;

    fn has_cache(&self) -> bool;

    fn set_thread_count(&mut self, count: usize);

    fn set_cache_enabled(&mut self, enabled: bool);

    fn set_cache_max(&mut self, bytes: usize);
}

/// Opens sources into decoders
pub trait MediaOpener: Send {
    fn open(&self, source: &Path, options: &ReadOptions) -> Result<Box<dyn Decoder>, DecodeError>;
}

/// Opener for the built-in decoders: `pattern:` sources always, media files
/// when built with the `ffmpeg` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceOpener;

impl MediaOpener for SourceOpener {
    fn open(&self, source: &Path, options: &ReadOptions) -> Result<Box<dyn Decoder>, DecodeError> {
        if let Some(spec) = source.to_str().and_then(|s| s.strip_prefix(crate::decode::pattern::PATTERN_PREFIX)) {
            let decoder = crate::decode::pattern::PatternDecoder::open(spec, options)?;
            return Ok(Box::new(decoder));
        }

        if !source.exists() {
            return Err(DecodeError::FileNotFound(source.to_path_buf()));
        }

        #[cfg(feature = "ffmpeg")]
        {
            let decoder = crate::media::ffmpeg::FfmpegDecoder::open(source, options)?;
            Ok(Box::new(decoder))
        }

        #[cfg(not(feature = "ffmpeg"))]
        {
            Err(DecodeError::UnsupportedSource(format!(
                "{} (built without the ffmpeg feature)",
                source.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_handle_identity() {
        let a = ImageHandle::new(Image::new(1, 1, vec![0; 4]));
        let b = ImageHandle::new(Image::new(1, 1, vec![0; 4]));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.width, 1);
    }

    #[test]
    fn test_open_missing_file() {
        let result = SourceOpener.open(Path::new("/nonexistent/clip.mov"), &ReadOptions::default());
        assert!(matches!(result, Err(DecodeError::FileNotFound(_))));
    }

    #[test]
    fn test_open_pattern() {
        let decoder = SourceOpener
            .open(Path::new("pattern:48@24"), &ReadOptions::default())
            .unwrap();
        assert_eq!(decoder.info().video[0].sequence.size(), 48);
    }
}
