//! Media file decoding using FFmpeg.
//!
//! Everything FFmpeg owns (demuxer, codec contexts, scaler, resampler) lives
//! on one worker thread. The worker reports the probed stream layout back to
//! `open`, then decodes ahead of the consumer into the shared queue pair,
//! restarting on every seek. Video is converted to RGBA8 and audio to packed
//! f32. Reverse playback decodes short windows ending at the cursor and
//! queues each window back to front.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use ffmpeg_next as ffmpeg;
use ffmpeg::codec;
use ffmpeg::format::context::Input;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::{resampling, scaling};
use log::{debug, error, warn};
use crate::audio::buffer::{AudioBuffer, AudioInfo, SampleFormat};
use crate::core::frame::{FrameNumber, Range, Sequence};
use crate::core::time::{rescale, Rational, Speed};
use crate::decode::decoder::{
    AudioFrame, DecodeError, Decoder, Direction, Image, ImageHandle, ReadOptions, VideoFrame,
};
use crate::decode::frame_cache::FrameCache;
use crate::decode::queue::{lock_queues, shared_queues, SharedQueues};
use crate::decode::stream_info::{AudioStreamInfo, MediaInfo, StreamInfo, VideoStreamInfo};

/// Frames decoded per reverse window
const REVERSE_WINDOW: FrameNumber = 12;
const IDLE_WAIT: Duration = Duration::from_millis(2);
const DEFAULT_CACHE_BYTES: usize = 256 * 1024 * 1024;
const MICROSECONDS: Rational = Rational::new(1, 1_000_000);

fn ffmpeg_error(e: ffmpeg::Error) -> DecodeError {
    DecodeError::FFmpeg(e.to_string())
}

fn to_rational(r: ffmpeg::Rational) -> Rational {
    Rational::new(r.numerator(), r.denominator())
}

/// Timing of the decoded video stream, used to map timestamps to playback
/// indexes and back
#[derive(Debug, Clone, Copy, PartialEq)]
struct VideoTiming {
    time_base: Rational,
    speed: Speed,
    start_pts: i64,
}

impl VideoTiming {
    fn frame_of(&self, pts: i64) -> FrameNumber {
        rescale(pts - self.start_pts, self.time_base, self.speed.swap())
    }

    /// Seconds from the stream start to the beginning of `frame`
    fn seconds_of(&self, frame: FrameNumber) -> f64 {
        frame as f64 / self.speed.to_f64()
    }

    /// Presentation time of the first frame, in seconds
    fn start_seconds(&self) -> f64 {
        self.start_pts as f64 * self.time_base.to_f64()
    }

    /// Demuxer seek target in microseconds
    fn seek_target(&self, frame: FrameNumber) -> i64 {
        let start = rescale(self.start_pts, self.time_base, MICROSECONDS);
        start + rescale(frame, self.speed.swap(), MICROSECONDS)
    }
}

/// Leading audio to cut after a seek. Armed with the seek point and
/// disarmed by the first block that reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct AudioTrim {
    target_seconds: Option<f64>,
}

impl AudioTrim {
    fn arm(&mut self, seconds: f64) {
        self.target_seconds = Some(seconds);
    }

    /// Samples to skip at the head of a block of `samples` samples starting
    /// at `block_seconds`. A block that is skipped entirely leaves the trim
    /// armed for the next one.
    fn skip(&mut self, block_seconds: Option<f64>, samples: usize, sample_rate: u32) -> usize {
        let Some(target) = self.target_seconds else {
            return 0;
        };
        let Some(block) = block_seconds else {
            self.target_seconds = None;
            return 0;
        };
        let skip = if block < target {
            ((target - block) * sample_rate as f64).round() as usize
        } else {
            0
        };
        if skip < samples {
            self.target_seconds = None;
        }
        skip.min(samples)
    }
}

/// Frame count from the container, or from duration and rate when the
/// container does not record it
fn frame_count(frames: i64, duration_seconds: f64, speed: Speed) -> usize {
    if frames > 0 {
        frames as usize
    } else {
        (duration_seconds * speed.to_f64()).round().max(0.0) as usize
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

/// Decoder for media files
pub struct FfmpegDecoder {
    path: PathBuf,
    info: MediaInfo,
    queues: SharedQueues,
    cache: Arc<Mutex<FrameCache>>,
    requests: Sender<Request>,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegDecoder {
    pub fn open(source: &Path, options: &ReadOptions) -> Result<Self, DecodeError> {
        ffmpeg::init().map_err(ffmpeg_error)?;

        let queues = shared_queues(options.video_queue_size, options.audio_queue_size);
        let cache = Arc::new(Mutex::new(FrameCache::new(DEFAULT_CACHE_BYTES)));
        let (requests, rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded(1);

        let path = source.to_path_buf();
        let layer = options.layer;
        let pending_max = options.video_queue_size;
        let worker_queues = Arc::clone(&queues);
        let worker_cache = Arc::clone(&cache);
        let handle = thread::Builder::new()
            .name("seqplay-ffmpeg".to_string())
            .spawn(move || {
                let worker = match Worker::open(&path, layer, rx, worker_queues, worker_cache, pending_max) {
                    Ok((worker, info)) => {
                        if ready_tx.send(Ok(info)).is_err() {
                            return;
                        }
                        worker
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                worker.run();
            })
            .map_err(|e| DecodeError::Thread(e.to_string()))?;

        let info = match ready_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(DecodeError::Thread("decoder thread exited during open".to_string())),
        };
        let info = match info {
            Ok(info) => info,
            Err(e) => {
                let _ = handle.join();
                return Err(e);
            }
        };

        debug!(target: "seqplay::decode", "opened {}: {} video, {} audio stream(s)",
            source.display(), info.video.len(), info.audio.len());

        Ok(Self {
            path: source.to_path_buf(),
            info,
            queues,
            cache,
            requests,
            worker: Some(handle),
        })
    }

    fn send(&self, request: Request) {
        if self.requests.send(request).is_err() {
            warn!(target: "seqplay::decode", "decoder thread for {} is gone", self.path.display());
        }
    }

    fn cache(&self) -> MutexGuard<'_, FrameCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Decoder for FfmpegDecoder {
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

    /// Takes effect at the next seek
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

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

struct AudioPath {
    index: usize,
    decoder: ffmpeg::decoder::Audio,
    resampler: resampling::Context,
    info: AudioInfo,
    time_base: Rational,
}

struct Worker {
    rx: Receiver<Request>,
    queues: SharedQueues,
    cache: Arc<Mutex<FrameCache>>,
    input: Input,
    video_index: usize,
    video: ffmpeg::decoder::Video,
    scaler: scaling::Context,
    timing: VideoTiming,
    size: FrameNumber,
    audio: Option<AudioPath>,
    threads: usize,
    rebuild: bool,
    pending_max: usize,
    pending_video: VecDeque<VideoFrame>,
    pending_audio: VecDeque<AudioFrame>,
    // Forward: next frame wanted; reverse: last frame of the next window
    cursor: Option<FrameNumber>,
    trim: AudioTrim,
    direction: Direction,
    epoch: u64,
    eof: bool,
}

fn open_video(input: &Input, index: usize, threads: usize) -> Result<ffmpeg::decoder::Video, ffmpeg::Error> {
    let stream = input.stream(index).ok_or(ffmpeg::Error::StreamNotFound)?;
    let mut context = codec::context::Context::from_parameters(stream.parameters())?;
    if threads > 0 {
        context.set_threading(codec::threading::Config::count(threads));
    }
    context.decoder().video()
}

fn open_audio(input: &Input) -> Result<Option<AudioPath>, ffmpeg::Error> {
    let stream = match input.streams().best(MediaType::Audio) {
        Some(stream) => stream,
        None => return Ok(None),
    };
    let index = stream.index();
    let time_base = to_rational(stream.time_base());
    let context = codec::context::Context::from_parameters(stream.parameters())?;
    let decoder = context.decoder().audio()?;
    let resampler = decoder.resampler(Sample::F32(SampleType::Packed), decoder.channel_layout(), decoder.rate())?;
    let info = AudioInfo::new(decoder.channels() as u16, SampleFormat::F32, decoder.rate());
    Ok(Some(AudioPath {
        index,
        decoder,
        resampler,
        info,
        time_base,
    }))
}

impl Worker {
    fn open(
        path: &Path,
        layer: usize,
        rx: Receiver<Request>,
        queues: SharedQueues,
        cache: Arc<Mutex<FrameCache>>,
        pending_max: usize,
    ) -> Result<(Self, MediaInfo), DecodeError> {
        let input = ffmpeg::format::input(&path).map_err(ffmpeg_error)?;
        let container_seconds = input.duration() as f64 / 1_000_000.0;

        let mut video_info = Vec::new();
        let mut video_streams = Vec::new();
        for stream in input.streams() {
            if stream.parameters().medium() != MediaType::Video {
                continue;
            }
            let context = codec::context::Context::from_parameters(stream.parameters()).map_err(ffmpeg_error)?;
            let decoder = match context.decoder().video() {
                Ok(decoder) => decoder,
                Err(e) => {
                    warn!(target: "seqplay::decode", "skipping video stream {}: {}", stream.index(), e);
                    continue;
                }
            };
            let time_base = to_rational(stream.time_base());
            let mut speed = to_rational(stream.avg_frame_rate());
            if !speed.is_valid() {
                speed = to_rational(stream.rate());
            }
            if !speed.is_valid() {
                speed = Speed::default();
            }
            let seconds = if stream.duration() > 0 {
                stream.duration() as f64 * time_base.to_f64()
            } else {
                container_seconds
            };
            // i64::MIN marks a missing timestamp
            let start_pts = match stream.start_time() {
                i64::MIN => 0,
                pts => pts,
            };
            let size = frame_count(stream.frames(), seconds, speed);
            video_info.push(VideoStreamInfo {
                stream_info: StreamInfo {
                    index: stream.index(),
                    name: stream.metadata().get("title").unwrap_or("").to_string(),
                    codec_name: stream.parameters().id().name().to_string(),
                    duration: Duration::from_secs_f64(seconds.max(0.0)),
                },
                width: decoder.width(),
                height: decoder.height(),
                speed,
                sequence: Sequence::with_size(size),
            });
            video_streams.push((
                stream.index(),
                VideoTiming {
                    time_base,
                    speed,
                    start_pts,
                },
            ));
        }

        let (video_index, timing) = *video_streams
            .get(layer)
            .ok_or_else(|| if video_streams.is_empty() { DecodeError::NoVideoStream } else { DecodeError::InvalidLayer(layer) })?;
        let size = video_info[layer].sequence.size() as FrameNumber;

        let video = open_video(&input, video_index, 0).map_err(ffmpeg_error)?;
        let scaler = scaling::Context::get(
            video.format(),
            video.width(),
            video.height(),
            Pixel::RGBA,
            video.width(),
            video.height(),
            scaling::Flags::BILINEAR,
        )
        .map_err(ffmpeg_error)?;

        let audio = match open_audio(&input) {
            Ok(audio) => audio,
            Err(e) => {
                warn!(target: "seqplay::decode", "audio disabled for {}: {}", path.display(), e);
                None
            }
        };
        let audio_info = audio
            .iter()
            .map(|audio| AudioStreamInfo {
                stream_info: StreamInfo {
                    index: audio.index,
                    name: String::new(),
                    codec_name: audio.decoder.id().name().to_string(),
                    duration: Duration::from_secs_f64(container_seconds.max(0.0)),
                },
                info: audio.info,
            })
            .collect();

        let info = MediaInfo {
            video: video_info,
            audio: audio_info,
        };
        let worker = Self {
            rx,
            queues,
            cache,
            input,
            video_index,
            video,
            scaler,
            timing,
            size,
            audio,
            threads: 0,
            rebuild: false,
            pending_max: pending_max.max(1),
            pending_video: VecDeque::new(),
            pending_audio: VecDeque::new(),
            cursor: None,
            trim: AudioTrim::default(),
            direction: Direction::Forward,
            epoch: 0,
            eof: false,
        };
        Ok((worker, info))
    }

    fn run(mut self) {
        loop {
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

            if !self.step() {
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
                if self.rebuild {
                    self.rebuild = false;
                    match open_video(&self.input, self.video_index, self.threads) {
                        Ok(video) => self.video = video,
                        Err(e) => warn!(target: "seqplay::decode", "keeping decoder threads: {}", e),
                    }
                }
                lock_queues(&self.queues).clear();
                self.pending_video.clear();
                self.pending_audio.clear();
                self.direction = direction;
                self.epoch = epoch;
                self.eof = false;
                let frame = frame.clamp(0, (self.size - 1).max(0));
                self.cursor = Some(frame);
                self.trim = AudioTrim::default();
                if direction == Direction::Forward {
                    self.trim.arm(self.timing.seconds_of(frame));
                }
                if direction == Direction::Forward {
                    self.seek_input(frame);
                }
            }
            Request::ThreadCount(count) => {
                if count != self.threads {
                    self.threads = count;
                    self.rebuild = true;
                }
            }
            Request::Shutdown => return false,
        }
        true
    }

    fn audio_active(&self) -> bool {
        self.audio.is_some() && self.direction == Direction::Forward
    }

    fn seek_input(&mut self, frame: FrameNumber) {
        let target = self.timing.seek_target(frame);
        if let Err(e) = self.input.seek(target, ..=target) {
            warn!(target: "seqplay::decode", "seek to frame {} failed: {}", frame, e);
        }
        self.video.flush();
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.flush();
        }
    }

    /// Do one unit of work. Returns false when idle.
    fn step(&mut self) -> bool {
        if self.cursor.is_none() {
            return false;
        }
        let mut progressed = self.flush();
        match self.direction {
            Direction::Forward => {
                let want_more = !self.eof
                    && self.pending_video.len() < self.pending_max
                    && (self.pending_video.is_empty() || (self.audio_active() && self.pending_audio.is_empty()));
                if want_more {
                    self.read_forward();
                    progressed = true;
                }
            }
            Direction::Reverse => {
                if self.pending_video.is_empty() && self.decode_window() {
                    progressed = true;
                }
            }
        }
        progressed
    }

    /// Move pending frames into the queues while they have room
    fn flush(&mut self) -> bool {
        let mut moved = false;
        let mut queues = lock_queues(&self.queues);
        while !queues.video.is_full() {
            match self.pending_video.pop_front() {
                Some(frame) => {
                    let _ = queues.video.push(frame);
                    moved = true;
                }
                None => break,
            }
        }
        while !queues.audio.is_full() {
            match self.pending_audio.pop_front() {
                Some(audio) => {
                    let _ = queues.audio.push(audio);
                    moved = true;
                }
                None => break,
            }
        }
        moved
    }

    fn read_forward(&mut self) {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                self.drain_at_eof();
                return;
            }
            Err(e) => {
                error!(target: "seqplay::decode", "read failed: {}", e);
                self.eof = true;
                return;
            }
        }

        if packet.stream() == self.video_index {
            if self.video.send_packet(&packet).is_ok() {
                self.receive_video_forward();
            }
        } else if self.audio_active() && self.audio.as_ref().map(|a| a.index) == Some(packet.stream()) {
            if let Some(audio) = self.audio.as_mut() {
                if audio.decoder.send_packet(&packet).is_err() {
                    return;
                }
            }
            self.receive_audio();
        }
    }

    fn drain_at_eof(&mut self) {
        self.eof = true;
        let _ = self.video.send_eof();
        self.receive_video_forward();
        if self.audio_active() {
            if let Some(audio) = self.audio.as_mut() {
                let _ = audio.decoder.send_eof();
            }
            self.receive_audio();
        }
    }

    fn receive_video_forward(&mut self) {
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.video.receive_frame(&mut decoded).is_ok() {
            let frame = match decoded.timestamp() {
                Some(pts) => self.timing.frame_of(pts),
                None => continue,
            };
            let wanted = self.cursor.unwrap_or(0);
            if frame < wanted || frame >= self.size {
                continue;
            }
            if let Some(image) = self.image(frame, &decoded) {
                self.pending_video.push_back(VideoFrame {
                    frame,
                    image,
                    epoch: self.epoch,
                });
            }
            self.cursor = Some(frame + 1);
        }
    }

    fn receive_audio(&mut self) {
        let start_seconds = self.timing.start_seconds();
        let audio = match self.audio.as_mut() {
            Some(audio) => audio,
            None => return,
        };
        let frame_bytes = audio.info.frame_byte_count();
        let mut decoded = ffmpeg::frame::Audio::empty();
        let mut converted = ffmpeg::frame::Audio::empty();
        while audio.decoder.receive_frame(&mut decoded).is_ok() {
            if let Err(e) = audio.resampler.run(&decoded, &mut converted) {
                warn!(target: "seqplay::decode", "resample failed: {}", e);
                continue;
            }
            let samples = converted.samples();
            let block_seconds = decoded
                .timestamp()
                .map(|pts| pts as f64 * audio.time_base.to_f64() - start_seconds);
            let skip = self.trim.skip(block_seconds, samples, audio.info.sample_rate);
            if skip >= samples {
                continue;
            }
            let data = converted.data(0);
            let end = (samples * frame_bytes).min(data.len());
            let begin = (skip * frame_bytes).min(end);
            let buffer = AudioBuffer::from_bytes(audio.info, data[begin..end].to_vec());
            self.pending_audio.push_back(AudioFrame {
                audio: buffer,
                epoch: self.epoch,
            });
        }
    }

    /// Decode the reverse window ending at the cursor and queue it back to
    /// front. Returns false when there is nothing left to decode.
    fn decode_window(&mut self) -> bool {
        let last = match self.cursor {
            Some(last) if last >= 0 => last,
            _ => return false,
        };
        let first = (last - REVERSE_WINDOW + 1).max(0);
        self.seek_input(first);

        let mut window: Vec<VideoFrame> = Vec::new();
        let mut done = false;
        let mut decoded = ffmpeg::frame::Video::empty();
        while !done {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.video_index || self.video.send_packet(&packet).is_err() {
                        continue;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    let _ = self.video.send_eof();
                    done = true;
                }
                Err(e) => {
                    error!(target: "seqplay::decode", "read failed: {}", e);
                    break;
                }
            }
            while self.video.receive_frame(&mut decoded).is_ok() {
                let frame = match decoded.timestamp() {
                    Some(pts) => self.timing.frame_of(pts),
                    None => continue,
                };
                if frame > last {
                    done = true;
                    continue;
                }
                if frame < first {
                    continue;
                }
                if let Some(image) = self.image(frame, &decoded) {
                    window.push(VideoFrame {
                        frame,
                        image,
                        epoch: self.epoch,
                    });
                }
            }
        }

        window.sort_by_key(|f| std::cmp::Reverse(f.frame));
        window.dedup_by_key(|f| f.frame);
        self.pending_video.extend(window);
        self.cursor = Some(first - 1);
        true
    }

    /// RGBA image for `frame`, from the cache or converted from `decoded`
    fn image(&mut self, frame: FrameNumber, decoded: &ffmpeg::frame::Video) -> Option<ImageHandle> {
        if let Some(image) = self.cache.lock().unwrap_or_else(PoisonError::into_inner).get(frame) {
            return Some(image.clone());
        }

        let mut rgba = ffmpeg::frame::Video::empty();
        if let Err(e) = self.scaler.run(decoded, &mut rgba) {
            warn!(target: "seqplay::decode", "frame {}: conversion failed: {}", frame, e);
            return None;
        }
        let width = rgba.width();
        let height = rgba.height();
        let row = width as usize * 4;
        let stride = rgba.stride(0);
        let src = rgba.data(0);
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            data.extend_from_slice(&src[y * stride..y * stride + row]);
        }

        let image = ImageHandle::new(Image::new(width, height, data));
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(frame, image.clone(), frame);
        Some(image)
    }
}
