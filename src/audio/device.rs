//! Audio output device boundary.
//!
//! The device pulls PCM from a callback on its own real-time thread. Stream
//! errors raised on that thread are only counted there; the engine reads
//! and logs them from the tick loop.

use crate::audio::bridge::CallbackStatus;
use crate::audio::buffer::SampleFormat;

/// Error type for audio output operations
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("No audio output device available")]
    NoDevice,
    #[error("Stream is not open")]
    NotOpen,
    #[error("Unsupported stream configuration: {0}")]
    InvalidConfig(String),
    #[error("Audio backend error: {0}")]
    Backend(String),
    #[cfg(feature = "cpal")]
    #[error("cpal build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[cfg(feature = "cpal")]
    #[error("cpal play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[cfg(feature = "cpal")]
    #[error("cpal pause stream error: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),
}

/// Parameters of an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub channel_count: u16,
    pub format: SampleFormat,
    pub sample_rate: u32,
    /// Sample frames per callback
    pub buffer_frame_count: u32,
}

/// Callback invoked by the device with the interleaved output bytes to fill
pub type AudioCallback = Box<dyn FnMut(&mut [u8]) -> CallbackStatus + Send + 'static>;

/// An audio output device with at most one open stream
pub trait AudioDevice {
    fn open_stream(&mut self, params: StreamParams, callback: AudioCallback) -> Result<(), AudioError>;

    fn start_stream(&mut self) -> Result<(), AudioError>;

    /// Stop immediately, discarding pending output
    fn abort_stream(&mut self) -> Result<(), AudioError>;

    /// Rewind the stream's time base (seconds)
    fn set_stream_time(&mut self, seconds: f64) -> Result<(), AudioError>;

    /// Stream time in seconds: the time base plus the duration delivered since
    fn stream_time(&self) -> f64;

    fn close_stream(&mut self);

    fn is_open(&self) -> bool;

    fn is_running(&self) -> bool;

    /// Errors reported by the stream thread since the last call
    fn take_error_count(&self) -> u32;
}
