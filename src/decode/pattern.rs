//! Synthetic test-pattern source.
//!
//! `pattern:FRAMES[@FPS][:noaudio][:layers=N]` opens a sequence of numbered
//! RGBA frames with an optional stereo sine tone, produced by a worker
//! thread in the requested direction. Useful for exercising playback
//! without media files.

use std::f32::consts::TAU;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use crate::audio::buffer::{AudioBuffer, AudioInfo, SampleFormat};
use crate::core::frame::{FrameNumber, Range, Sequence};
use crate::core::time::{rescale, Rational, Speed};
use crate::decode::decoder::{
    AudioFrame, DecodeError, Decoder, Direction, Image, ImageHandle, ReadOptions, VideoFrame,
};
use crate::decode::frame_cache::FrameCache;
use crate::decode::queue::{lock_queues, shared_queues, SharedQueues};
use crate::decode::stream_info::{AudioStreamInfo, MediaInfo, StreamInfo, VideoStreamInfo};

pub const PATTERN_PREFIX: &str = "pattern:";

const WIDTH: u32 = 64;
const HEIGHT: u32 = 36;
const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u16 = 2;
const TONE_HZ: f32 = 440.0;
const IDLE_WAIT: Duration = Duration::from_millis(2);
const DEFAULT_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// Parsed `pattern:` source description
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSpec {
    pub frames: usize,
    pub speed: Speed,
    pub audio: bool,
    pub layers: usize,
}

impl PatternSpec {
    /// Parse the part after the `pattern:` prefix
    pub fn parse(spec: &str) -> Result<Self, DecodeError> {
        let invalid = || DecodeError::InvalidPattern(spec.to_string());
        let mut parts = spec.split(':');
        let head = parts.next().ok_or_else(invalid)?;
        let (frames, speed) = match head.split_once('@') {
            Some((frames, fps)) => {
                let fps: f64 = fps.parse().map_err(|_| invalid())?;
                (frames, Rational::from_f64(fps))
            }
            None => (head, Speed::default()),
        };
        let frames: usize = frames.parse().map_err(|_| invalid())?;
        if frames == 0 || !speed.is_valid() {
            return Err(invalid());
        }

        let mut out = Self {
            frames,
            speed,
            audio: true,
            layers: 1,
        };
        for flag in parts {
            match flag.split_once('=') {
                None if flag == "noaudio" => out.audio = false,
                Some(("layers", n)) => {
                    out.layers = n.parse().map_err(|_| invalid())?;
                    if out.layers == 0 {
                        return Err(invalid());
                    }
                }
                _ => return Err(invalid()),
            }
        }
        Ok(out)
    }
}

enum Request {
    Seek {
        frame: FrameNumber,
        direction: Direction,
        epoch: u64,
    },
    ThreadCount(usize),
    Shutdown,
}

/// Decoder generating the test pattern on a worker thread
pub struct PatternDecoder {
    info: MediaInfo,
    queues: SharedQueues,
    cache: Arc<Mutex<FrameCache>>,
    requests: Sender<Request>,
    worker: Option<JoinHandle<()>>,
}

impl PatternDecoder {
    pub fn open(spec: &str, options: &ReadOptions) -> Result<Self, DecodeError> {
        let spec = PatternSpec::parse(spec)?;
        if options.layer >= spec.layers {
            return Err(DecodeError::InvalidLayer(options.layer));
        }

        let sequence = Sequence::with_size(spec.frames);
        let duration = Duration::from_secs_f64(spec.frames as f64 / spec.speed.to_f64());
        let video = (0..spec.layers)
            .map(|index| VideoStreamInfo {
                stream_info: StreamInfo {
                    index,
                    name: format!("pattern {}", index),
                    codec_name: "rgba".to_string(),
                    duration,
                },
                width: WIDTH,
                height: HEIGHT,
                speed: spec.speed,
                sequence: sequence.clone(),
            })
            .collect();
        let audio_info = spec
            .audio
            .then(|| AudioInfo::new(CHANNELS, SampleFormat::F32, SAMPLE_RATE));
        let audio = audio_info
            .iter()
            .map(|info| AudioStreamInfo {
                stream_info: StreamInfo {
                    index: spec.layers,
                    name: "tone".to_string(),
                    codec_name: "pcm_f32".to_string(),
                    duration,
                },
                info: *info,
            })
            .collect();

        let queues = shared_queues(options.video_queue_size, options.audio_queue_size);
        let cache = Arc::new(Mutex::new(FrameCache::new(DEFAULT_CACHE_BYTES)));
        let (requests, rx) = channel::unbounded();

        let worker = Worker {
            rx,
            queues: Arc::clone(&queues),
            cache: Arc::clone(&cache),
            size: spec.frames as FrameNumber,
            speed: spec.speed,
            layer: options.layer,
            audio: audio_info,
            cursor: None,
            direction: Direction::Forward,
            epoch: 0,
        };
        let handle = thread::Builder::new()
            .name("seqplay-pattern".to_string())
            .spawn(move || worker.run())
            .map_err(|e| DecodeError::Thread(e.to_string()))?;

        debug!(target: "seqplay::decode", "pattern source: {} frames at {} fps", spec.frames, spec.speed);

        Ok(Self {
            info: MediaInfo { video, audio },
            queues,
            cache,
            requests,
            worker: Some(handle),
        })
    }

    fn send(&self, request: Request) {
        if self.requests.send(request).is_err() {
            warn!(target: "seqplay::decode", "pattern worker is gone");
        }
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, FrameCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Decoder for PatternDecoder {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn queues(&self) -> SharedQueues {
        Arc::clone(&self.queues)
    }

    fn seek(&mut self, frame: FrameNumber, direction: Direction, epoch: u64) {
        self.send(Request::Seek {
            frame,
            direction,
            epoch,
        });
    }

    fn cached_frames(&self) -> Vec<Range> {
        self.cache().cached_ranges()
    }

    fn has_cache(&self) -> bool {
        true
    }

    fn set_thread_count(&mut self, count: usize) {
        self.send(Request::ThreadCount(count));
    }

    fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache().set_enabled(enabled);
    }

    fn set_cache_max(&mut self, bytes: usize) {
        self.cache().set_max_bytes(bytes, 0);
    }
}

impl Drop for PatternDecoder {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

struct Worker {
    rx: Receiver<Request>,
    queues: SharedQueues,
    cache: Arc<Mutex<FrameCache>>,
    size: FrameNumber,
    speed: Speed,
    layer: usize,
    audio: Option<AudioInfo>,
    cursor: Option<FrameNumber>,
    direction: Direction,
    epoch: u64,
}

impl Worker {
    fn run(mut self) {
        loop {
            // Drain pending requests; the latest seek wins
            loop {
                match self.rx.try_recv() {
                    Ok(request) => {
                        if !self.handle(request) {
                            return;
                        }
                    }
                    Err(channel::TryRecvError::Empty) => break,
                    Err(channel::TryRecvError::Disconnected) => return,
                }
            }

            if !self.produce() {
                match self.rx.recv_timeout(IDLE_WAIT) {
                    Ok(request) => {
                        if !self.handle(request) {
                            return;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        }
    }

    /// Returns false on shutdown
    fn handle(&mut self, request: Request) -> bool {
        match request {
            Request::Seek {
                frame,
                direction,
                epoch,
            } => {
                lock_queues(&self.queues).clear();
                self.cursor = Some(frame.clamp(0, self.size - 1));
                self.direction = direction;
                self.epoch = epoch;
            }
            Request::ThreadCount(count) => {
                debug!(target: "seqplay::decode", "pattern worker ignores thread count {}", count);
            }
            Request::Shutdown => return false,
        }
        true
    }

    /// Produce the frame under the cursor. Returns false when there was
    /// nothing to do (end reached or queues full).
    fn produce(&mut self) -> bool {
        let frame = match self.cursor {
            Some(frame) if frame >= 0 && frame < self.size => frame,
            _ => return false,
        };
        let with_audio = self.audio.is_some() && self.direction == Direction::Forward;
        {
            let queues = lock_queues(&self.queues);
            if queues.video.is_full() || (with_audio && queues.audio.is_full()) {
                return false;
            }
        }

        let image = self.image(frame);
        let audio = if with_audio { self.tone(frame) } else { None };
        {
            let mut queues = lock_queues(&self.queues);
            let video = VideoFrame {
                frame,
                image,
                epoch: self.epoch,
            };
            if queues.video.push(video).is_err() {
                return false;
            }
            if let Some(audio) = audio {
                let _ = queues.audio.push(AudioFrame {
                    audio,
                    epoch: self.epoch,
                });
            }
        }

        self.cursor = Some(match self.direction {
            Direction::Forward => frame + 1,
            Direction::Reverse => frame - 1,
        });
        true
    }

    fn image(&self, frame: FrameNumber) -> ImageHandle {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(image) = cache.get(frame) {
            return image.clone();
        }
        let image = ImageHandle::new(render_pattern(frame, self.size, self.layer));
        cache.insert(frame, image.clone(), frame);
        image
    }

    fn tone(&self, frame: FrameNumber) -> Option<AudioBuffer> {
        let info = self.audio?;
        let to_samples = |f: FrameNumber| rescale(f, self.speed.swap(), Rational::new(1, info.sample_rate as i32));
        let first = to_samples(frame);
        let count = (to_samples(frame + 1) - first).max(0) as usize;
        let mut samples = Vec::with_capacity(count * info.channel_count as usize);
        for i in 0..count {
            let t = (first + i as i64) as f32 / info.sample_rate as f32;
            let value = (TAU * TONE_HZ * t).sin() * 0.25;
            for _ in 0..info.channel_count {
                samples.push(value);
            }
        }
        Some(AudioBuffer::from_f32(info.channel_count, info.sample_rate, &samples))
    }
}

/// Horizontal gradient whose brightness tracks the frame's position in the sequence
fn render_pattern(frame: FrameNumber, size: FrameNumber, layer: usize) -> Image {
    let level = if size > 1 { (frame * 255 / (size - 1)) as u8 } else { 255 };
    let mut data = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
    for _y in 0..HEIGHT {
        for x in 0..WIDTH {
            let ramp = (x * 255 / (WIDTH - 1)) as u8;
            let pixel = match layer % 3 {
                0 => [level, ramp, 255 - level, 255],
                1 => [ramp, level, 255 - level, 255],
                _ => [255 - level, ramp, level, 255],
            };
            data.extend_from_slice(&pixel);
        }
    }
    Image::new(WIDTH, HEIGHT, data)
}
