//! cpal-backed audio output.
//!
//! Opens the default output device. The stream callback hands the raw
//! sample buffer to the installed `AudioCallback` as bytes and advances the
//! stream time by the duration delivered.
//!
//! Thread safety:
//! - The data callback runs on cpal's real-time thread: no locks, no
//!   allocations, no logging there.
//! - Stream errors only bump an atomic counter, read back through
//!   `take_error_count()` from the control thread.
//! - Control methods (`open_stream`, `start_stream`, ...) are called from the
//!   engine's thread. `cpal::Stream` is not `Send`, so neither is this type.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, SizedSample, Stream, StreamConfig};
use crate::audio::buffer::SampleFormat;
use crate::audio::device::{AudioCallback, AudioDevice, AudioError, StreamParams};

pub struct CpalOutput {
    device: Device,
    stream: Option<Stream>,
    running: bool,
    /// Stream time in seconds, stored as f64 bits
    stream_time: Arc<AtomicU64>,
    errors: Arc<AtomicU32>,
}

impl CpalOutput {
    /// Use the host's default output device
    ///
    /// # Errors
    ///
    /// Returns `AudioError::NoDevice` if the host has no output device.
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        Ok(Self {
            device,
            stream: None,
            running: false,
            stream_time: Arc::new(AtomicU64::new(0f64.to_bits())),
            errors: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "unknown".to_string())
    }

    fn build<T>(&self, config: &StreamConfig, mut callback: AudioCallback) -> Result<Stream, AudioError>
    where
        T: SizedSample + bytemuck::Pod,
    {
        let channels = config.channels.max(1) as usize;
        let sample_rate = config.sample_rate.0 as f64;
        let stream_time = Arc::clone(&self.stream_time);
        let errors = Arc::clone(&self.errors);

        let stream = self.device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let _ = callback(bytemuck::cast_slice_mut(data));

                let frames = (data.len() / channels) as f64;
                let now = f64::from_bits(stream_time.load(Ordering::Relaxed));
                stream_time.store((now + frames / sample_rate).to_bits(), Ordering::Relaxed);
            },
            move |_err| {
                errors.fetch_add(1, Ordering::Relaxed);
            },
            None,
        )?;
        Ok(stream)
    }
}

impl AudioDevice for CpalOutput {
    fn open_stream(&mut self, params: StreamParams, callback: AudioCallback) -> Result<(), AudioError> {
        self.close_stream();
        if params.channel_count == 0 || params.sample_rate == 0 {
            return Err(AudioError::InvalidConfig(format!("{:?}", params)));
        }

        let config = StreamConfig {
            channels: params.channel_count,
            sample_rate: SampleRate(params.sample_rate),
            buffer_size: BufferSize::Fixed(params.buffer_frame_count),
        };
        let stream = match params.format {
            SampleFormat::I16 => self.build::<i16>(&config, callback)?,
            SampleFormat::I32 => self.build::<i32>(&config, callback)?,
            SampleFormat::F32 => self.build::<f32>(&config, callback)?,
        };
        // Some backends start streams on creation
        stream.pause()?;
        self.stream = Some(stream);
        self.running = false;
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), AudioError> {
        let stream = self.stream.as_ref().ok_or(AudioError::NotOpen)?;
        stream.play()?;
        self.running = true;
        Ok(())
    }

    /// cpal has no abort; pausing stops the callbacks
    fn abort_stream(&mut self) -> Result<(), AudioError> {
        let stream = self.stream.as_ref().ok_or(AudioError::NotOpen)?;
        stream.pause()?;
        self.running = false;
        Ok(())
    }

    fn set_stream_time(&mut self, seconds: f64) -> Result<(), AudioError> {
        if self.stream.is_none() {
            return Err(AudioError::NotOpen);
        }
        self.stream_time.store(seconds.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn stream_time(&self) -> f64 {
        f64::from_bits(self.stream_time.load(Ordering::Relaxed))
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
        self.running = false;
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn take_error_count(&self) -> u32 {
        self.errors.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::bridge::CallbackStatus;

    #[test]
    fn test_open_default_device() {
        // No device is expected on CI machines
        let Ok(mut output) = CpalOutput::new() else {
            return;
        };
        assert!(!output.is_open());
        assert!(matches!(output.start_stream(), Err(AudioError::NotOpen)));

        let params = StreamParams {
            channel_count: 2,
            format: SampleFormat::F32,
            sample_rate: 48_000,
            buffer_frame_count: 256,
        };
        if output
            .open_stream(params, Box::new(|out: &mut [u8]| {
                out.fill(0);
                CallbackStatus::Continue
            }))
            .is_ok()
        {
            assert!(output.is_open());
            output.set_stream_time(0.0).unwrap();
            assert_eq!(output.stream_time(), 0.0);
            output.close_stream();
            assert!(!output.is_open());
        }
    }
}
