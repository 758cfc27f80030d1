//! Test doubles: a manual time source, a decoder whose queues tests fill by
//! hand, and an audio device whose callback tests pull synchronously.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use crate::audio::bridge::CallbackStatus;
use crate::audio::buffer::{AudioBuffer, AudioInfo};
use crate::audio::device::{AudioCallback, AudioDevice, AudioError, StreamParams};
use crate::core::frame::{FrameNumber, Range, Sequence};
use crate::core::time::{Speed, TimeSource};
use crate::decode::decoder::{
    AudioFrame, DecodeError, Decoder, Direction, Image, ImageHandle, MediaOpener, ReadOptions, VideoFrame,
};
use crate::decode::queue::{lock_queues, shared_queues, SharedQueues};
use crate::decode::stream_info::{AudioStreamInfo, MediaInfo, StreamInfo, VideoStreamInfo};

/// Time that only moves when told to
#[derive(Debug)]
pub struct ManualTime {
    now: Mutex<Instant>,
}

impl ManualTime {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Instant::now()),
        })
    }

    pub fn get(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    pub fn set(&self, now: Instant) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Instant {
        self.get()
    }
}

#[derive(Default)]
struct ScriptState {
    seeks: Vec<(FrameNumber, Direction, u64)>,
    opens: Vec<ReadOptions>,
    cached: Vec<Range>,
    thread_count: Option<usize>,
    cache_enabled: Option<bool>,
    cache_max: Option<usize>,
    queues: Option<SharedQueues>,
    fail_open: bool,
}

/// Shared record of what the engine asked of its decoders
#[derive(Clone, Default)]
pub struct Script(Arc<Mutex<ScriptState>>);

impl Script {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.0.lock().unwrap()
    }

    pub fn seeks(&self) -> Vec<(FrameNumber, Direction, u64)> {
        self.lock().seeks.clone()
    }

    pub fn opens(&self) -> Vec<ReadOptions> {
        self.lock().opens.clone()
    }

    pub fn set_cached(&self, ranges: Vec<Range>) {
        self.lock().cached = ranges;
    }

    pub fn thread_count(&self) -> Option<usize> {
        self.lock().thread_count
    }

    pub fn cache_enabled(&self) -> Option<bool> {
        self.lock().cache_enabled
    }

    pub fn cache_max(&self) -> Option<usize> {
        self.lock().cache_max
    }

    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    fn queues(&self) -> SharedQueues {
        self.lock().queues.clone().expect("no decoder opened")
    }

    /// Push a video frame as the decoder would; returns its image
    pub fn push_video(&self, frame: FrameNumber, epoch: u64) -> ImageHandle {
        let image = ImageHandle::new(Image::new(1, 1, vec![frame as u8; 4]));
        let video = VideoFrame {
            frame,
            image: image.clone(),
            epoch,
        };
        lock_queues(&self.queues()).video.push(video).unwrap();
        image
    }

    /// Push a mono 48 kHz block
    pub fn push_audio(&self, samples: &[i16], epoch: u64) {
        let audio = AudioBuffer::from_i16(1, 48_000, samples);
        lock_queues(&self.queues()).audio.push(AudioFrame { audio, epoch }).unwrap();
    }

    pub fn video_count(&self) -> usize {
        lock_queues(&self.queues()).video.count()
    }
}

/// Decoder that produces nothing on its own
pub struct ScriptedDecoder {
    info: MediaInfo,
    queues: SharedQueues,
    script: Script,
}

impl ScriptedDecoder {
    pub fn new(size: usize) -> Self {
        let script = Script::default();
        Self::with_script(size, 1, None, &ReadOptions::default(), script)
    }

    fn with_script(
        size: usize,
        layers: usize,
        audio: Option<AudioInfo>,
        options: &ReadOptions,
        script: Script,
    ) -> Self {
        let stream = |index: usize| StreamInfo {
            index,
            name: format!("stream {}", index),
            codec_name: "scripted".to_string(),
            duration: Duration::from_secs_f64(size as f64 / 24.0),
        };
        let video = (0..layers)
            .map(|index| VideoStreamInfo {
                stream_info: stream(index),
                width: 1,
                height: 1,
                speed: Speed::new(24, 1),
                sequence: Sequence::with_size(size),
            })
            .collect();
        let audio = audio
            .into_iter()
            .map(|info| AudioStreamInfo {
                stream_info: stream(layers),
                info,
            })
            .collect();
        let queues = shared_queues(options.video_queue_size, options.audio_queue_size);
        script.lock().queues = Some(Arc::clone(&queues));
        Self {
            info: MediaInfo { video, audio },
            queues,
            script,
        }
    }

    pub fn seeks(&self) -> Vec<(FrameNumber, Direction, u64)> {
        self.script.seeks()
    }

    pub fn set_cached(&self, ranges: Vec<Range>) {
        self.script.set_cached(ranges);
    }
}

impl Decoder for ScriptedDecoder {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn queues(&self) -> SharedQueues {
        Arc::clone(&self.queues)
    }

    fn seek(&mut self, frame: FrameNumber, direction: Direction, epoch: u64) {
        self.script.lock().seeks.push((frame, direction, epoch));
    }

    fn cached_frames(&self) -> Vec<Range> {
        self.script.lock().cached.clone()
    }

    fn has_cache(&self) -> bool {
        true
    }

    fn set_thread_count(&mut self, count: usize) {
        self.script.lock().thread_count = Some(count);
    }

    fn set_cache_enabled(&mut self, enabled: bool) {
        self.script.lock().cache_enabled = Some(enabled);
    }

    fn set_cache_max(&mut self, bytes: usize) {
        self.script.lock().cache_max = Some(bytes);
    }
}

/// Opens `ScriptedDecoder`s sharing one `Script`
pub struct ScriptedOpener {
    size: usize,
    layers: usize,
    audio: Option<AudioInfo>,
    script: Script,
}

impl ScriptedOpener {
    pub fn new(size: usize, audio: Option<AudioInfo>) -> Self {
        Self {
            size,
            layers: 1,
            audio,
            script: Script::default(),
        }
    }

    pub fn with_layers(mut self, layers: usize) -> Self {
        self.layers = layers;
        self
    }

    pub fn script(&self) -> Script {
        self.script.clone()
    }
}

impl MediaOpener for ScriptedOpener {
    fn open(&self, source: &Path, options: &ReadOptions) -> Result<Box<dyn Decoder>, DecodeError> {
        {
            let mut state = self.script.lock();
            state.opens.push(options.clone());
            if state.fail_open {
                return Err(DecodeError::FileNotFound(source.to_path_buf()));
            }
        }
        if options.layer >= self.layers {
            return Err(DecodeError::InvalidLayer(options.layer));
        }
        Ok(Box::new(ScriptedDecoder::with_script(
            self.size,
            self.layers,
            self.audio,
            options,
            self.script.clone(),
        )))
    }
}

#[derive(Default)]
struct LoopbackState {
    params: Option<StreamParams>,
    callback: Option<AudioCallback>,
    running: bool,
    stream_time: f64,
    errors: u32,
    fail_open: bool,
    fail_start: bool,
}

/// Audio device driven by the test instead of a hardware clock
#[derive(Clone, Default)]
pub struct LoopbackDevice(Arc<Mutex<LoopbackState>>);

impl LoopbackDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.0.lock().unwrap()
    }

    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    pub fn report_error(&self) {
        self.lock().errors += 1;
    }

    /// Run the stream callback for `bytes` output bytes
    pub fn pull(&self, bytes: usize) -> Vec<u8> {
        let mut state = self.lock();
        let mut out = vec![0xAB; bytes];
        let frame_bytes = state
            .params
            .map(|p| p.channel_count as usize * p.format.byte_count())
            .unwrap_or(1);
        let rate = state.params.map(|p| p.sample_rate).unwrap_or(1) as f64;
        let delivered = match state.callback.as_mut() {
            Some(callback) => callback(&mut out) == CallbackStatus::Continue,
            None => false,
        };
        if delivered {
            state.stream_time += (bytes / frame_bytes) as f64 / rate;
        }
        out
    }
}

impl AudioDevice for LoopbackDevice {
    fn open_stream(&mut self, params: StreamParams, callback: AudioCallback) -> Result<(), AudioError> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(AudioError::Backend("open refused".to_string()));
        }
        state.params = Some(params);
        state.callback = Some(callback);
        state.running = false;
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), AudioError> {
        let mut state = self.lock();
        if state.callback.is_none() {
            return Err(AudioError::NotOpen);
        }
        if state.fail_start {
            return Err(AudioError::Backend("start refused".to_string()));
        }
        state.running = true;
        Ok(())
    }

    fn abort_stream(&mut self) -> Result<(), AudioError> {
        self.lock().running = false;
        Ok(())
    }

    fn set_stream_time(&mut self, seconds: f64) -> Result<(), AudioError> {
        self.lock().stream_time = seconds;
        Ok(())
    }

    fn stream_time(&self) -> f64 {
        self.lock().stream_time
    }

    fn close_stream(&mut self) {
        let mut state = self.lock();
        state.callback = None;
        state.params = None;
        state.running = false;
    }

    fn is_open(&self) -> bool {
        self.lock().callback.is_some()
    }

    fn is_running(&self) -> bool {
        self.lock().running
    }

    fn take_error_count(&self) -> u32 {
        std::mem::take(&mut self.lock().errors)
    }
}
