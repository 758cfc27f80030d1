//! Main playback engine coordinating decoder, audio output and presentation.
//!
//! The engine is driven by `tick()`, called periodically from one thread
//! (the cooperative tick loop). Each tick drains queued commands, then polls
//! the engine's timers:
//! - queue update: drops video frames already passed and publishes the
//!   frame at the head of the queue as the current image
//! - playback tick (while playing): advances the current frame from the
//!   playback clock and applies the boundary policy
//! - real speed (while playing), cached frames and diagnostics
//!
//! Other threads control the engine through `command_sender()`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, info, warn};
use crate::audio::bridge::{AudioBridge, VolumeControl};
use crate::audio::buffer::{AudioBuffer, AudioInfo};
use crate::audio::device::{AudioDevice, AudioError, StreamParams};
use crate::audio::playhead::Playhead;
use crate::config::EngineConfig;
use crate::core::frame::{FrameNumber, Range, Sequence, INVALID};
use crate::core::observable::{ListSubject, ValueSubject};
use crate::core::time::{SharedTime, Speed};
use crate::core::timer::Timer;
use crate::decode::decoder::{DecodeError, Decoder, Direction, ImageHandle, MediaOpener, ReadOptions};
use crate::decode::queue::{lock_queues, SharedQueues};
use crate::decode::stream_info::MediaInfo;
use crate::playback::cache::CacheSurface;
use crate::playback::clock::{AudioTimeBase, ClockSnapshot};
use crate::playback::seek::SeekController;
use crate::playback::speed::RealSpeedEstimator;
use crate::playback::state::{PlaybackMode, PlaybackState};

/// Command sent to the playback engine from another thread
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    SetPlayback(PlaybackState),
    SetCurrentFrame(FrameNumber),
    SetSpeed(Speed),
    SetVolume(f32),
    SetMute(bool),
    SetPlaybackMode(PlaybackMode),
    Reload,
}

/// Error type for the playback engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("No source opened")]
    NoSource,
}

/// Published engine state. Attach observers through
/// `PlaybackEngine::observables_mut()`; the engine owns the values.
#[derive(Debug)]
pub struct Observables {
    pub info: ValueSubject<MediaInfo>,
    pub layer: ValueSubject<usize>,
    pub current_image: ValueSubject<Option<ImageHandle>>,
    pub speed: ValueSubject<Speed>,
    pub default_speed: ValueSubject<Speed>,
    pub real_speed: ValueSubject<f64>,
    pub sequence: ValueSubject<Sequence>,
    pub current_frame: ValueSubject<FrameNumber>,
    pub playback: ValueSubject<PlaybackState>,
    pub playback_mode: ValueSubject<PlaybackMode>,
    pub in_out_points_enabled: ValueSubject<bool>,
    pub in_point: ValueSubject<FrameNumber>,
    pub out_point: ValueSubject<FrameNumber>,
    pub volume: ValueSubject<f32>,
    pub mute: ValueSubject<bool>,
    pub thread_count: ValueSubject<usize>,
    pub video_queue_max: ValueSubject<usize>,
    pub video_queue_count: ValueSubject<usize>,
    pub audio_queue_max: ValueSubject<usize>,
    pub audio_queue_count: ValueSubject<usize>,
    /// Set (always) after every open attempt
    pub reload: ValueSubject<bool>,
}

impl Observables {
    fn new(config: &EngineConfig) -> Self {
        Self {
            info: ValueSubject::default(),
            layer: ValueSubject::new(0),
            current_image: ValueSubject::new(None),
            speed: ValueSubject::default(),
            default_speed: ValueSubject::default(),
            real_speed: ValueSubject::new(0.0),
            sequence: ValueSubject::default(),
            current_frame: ValueSubject::new(0),
            playback: ValueSubject::new(PlaybackState::Stop),
            playback_mode: ValueSubject::new(config.playback_mode),
            in_out_points_enabled: ValueSubject::new(false),
            in_point: ValueSubject::new(INVALID),
            out_point: ValueSubject::new(INVALID),
            volume: ValueSubject::new(config.volume.clamp(0.0, 1.0)),
            mute: ValueSubject::new(config.mute),
            thread_count: ValueSubject::new(config.thread_count),
            video_queue_max: ValueSubject::new(0),
            video_queue_count: ValueSubject::new(0),
            audio_queue_max: ValueSubject::new(0),
            audio_queue_count: ValueSubject::new(0),
            reload: ValueSubject::new(false),
        }
    }
}

struct Timers {
    playback: Timer,
    queue: Timer,
    real_speed: Timer,
    cache: Timer,
    diagnostics: Timer,
}

/// Main playback engine
pub struct PlaybackEngine {
    config: EngineConfig,
    opener: Box<dyn MediaOpener>,
    device: Option<Box<dyn AudioDevice>>,
    time: SharedTime,
    source: Option<PathBuf>,
    decoder: Option<Box<dyn Decoder>>,
    queues: Option<SharedQueues>,
    audio_info: Option<AudioInfo>,
    /// An audio stream is open for the current source
    audio_open: bool,
    /// Blocks the audio callback is done with, freed on the tick thread
    retired_audio: Option<Receiver<AudioBuffer>>,
    playhead: Arc<Playhead>,
    volume_control: Arc<VolumeControl>,
    seek: SeekController,
    io_direction: Direction,
    real_speed: RealSpeedEstimator,
    cache: CacheSurface,
    timers: Timers,
    state: Observables,
    command_tx: Sender<PlaybackCommand>,
    command_rx: Receiver<PlaybackCommand>,
}

impl PlaybackEngine {
    /// Create an engine. Without a device, playback runs on wall-clock time.
    pub fn new(
        config: EngineConfig,
        opener: Box<dyn MediaOpener>,
        device: Option<Box<dyn AudioDevice>>,
        time: SharedTime,
    ) -> Self {
        let now = time.now();
        let playhead = Arc::new(Playhead::new(now));
        let (command_tx, command_rx) = channel::unbounded();
        let mut timers = Timers {
            playback: Timer::new(config.timers.playback()),
            queue: Timer::new(config.timers.queue()),
            real_speed: Timer::new(config.timers.real_speed()),
            cache: Timer::new(config.timers.cache()),
            diagnostics: Timer::new(config.timers.diagnostics()),
        };
        timers.queue.start(now);
        let state = Observables::new(&config);
        let volume_control = Arc::new(VolumeControl::new(if config.mute { 0.0 } else { config.volume }));

        Self {
            opener,
            device,
            source: None,
            decoder: None,
            queues: None,
            audio_info: None,
            audio_open: false,
            retired_audio: None,
            seek: SeekController::new(Arc::clone(&playhead), now),
            playhead,
            volume_control,
            io_direction: Direction::Forward,
            real_speed: RealSpeedEstimator::new(now),
            cache: CacheSurface::new(),
            timers,
            state,
            command_tx,
            command_rx,
            time,
            config,
        }
    }

    pub fn observables(&self) -> &Observables {
        &self.state
    }

    pub fn observables_mut(&mut self) -> &mut Observables {
        &mut self.state
    }

    /// Cached frame ranges, as last polled from the decoder
    pub fn cached_frames(&self) -> &[Range] {
        self.cache.ranges()
    }

    pub fn observe_cached_frames(&mut self) -> &mut ListSubject<Range> {
        self.cache.observe_ranges()
    }

    pub fn command_sender(&self) -> Sender<PlaybackCommand> {
        self.command_tx.clone()
    }

    pub fn current_frame(&self) -> FrameNumber {
        *self.state.current_frame.get()
    }

    pub fn playback(&self) -> PlaybackState {
        *self.state.playback.get()
    }

    pub fn current_image(&self) -> Option<&ImageHandle> {
        self.state.current_image.get().as_ref()
    }

    /// Epoch of the most recent seek; decoders tag frames with it
    pub fn seek_epoch(&self) -> u64 {
        self.seek.epoch()
    }

    /// Whether the audio clock is driving forward playback
    pub fn has_audio(&self) -> bool {
        self.audio_open && self.audio_info.is_some_and(|info| info.is_valid())
    }

    // ---- Open / reload / layers ----

    /// Open a source. On failure the error is logged and returned; the
    /// previously opened source (if any) stays in place.
    pub fn open(&mut self, source: &Path) -> Result<(), EngineError> {
        self.source = Some(source.to_path_buf());
        self.open_source()
    }

    pub fn reload(&mut self) -> Result<(), EngineError> {
        self.open_source()
    }

    fn open_source(&mut self) -> Result<(), EngineError> {
        let source = self.source.clone().ok_or(EngineError::NoSource)?;
        self.set_playback(PlaybackState::Stop);

        let options = ReadOptions {
            layer: *self.state.layer.get(),
            video_queue_size: self.config.video_queue_size,
            audio_queue_size: self.config.audio_queue_size,
        };
        let result = match self.opener.open(&source, &options) {
            Ok(decoder) => {
                self.install(&source, decoder);
                Ok(())
            }
            Err(e) => {
                error!(target: "seqplay::engine", "cannot open '{}': {}", source.display(), e);
                Err(EngineError::from(e))
            }
        };

        let frame = self.current_frame();
        self.seek_to(frame);
        self.state.reload.set_always(true);
        result
    }

    fn install(&mut self, source: &Path, mut decoder: Box<dyn Decoder>) {
        decoder.set_thread_count(*self.state.thread_count.get());
        decoder.set_cache_enabled(self.config.cache_enabled);
        decoder.set_cache_max(self.config.cache_max_bytes);

        let info = decoder.info().clone();
        let layer = *self.state.layer.get();
        let (speed, sequence) = info
            .video
            .get(layer)
            .or_else(|| info.first_video())
            .map(|video| (video.speed, video.sequence.clone()))
            .unwrap_or_default();
        self.audio_info = info.first_audio().map(|audio| audio.info);
        info!(target: "seqplay::engine", "{} sequence: {}", source.display(), sequence.size());

        // Drop the old decoder (and its stream callback) before switching queues
        self.close_stream();
        self.decoder = Some(decoder);
        self.queues = self.decoder.as_ref().map(|d| d.queues());

        self.state.info.set_if_changed(info);
        self.state.speed.set_if_changed(speed);
        self.state.default_speed.set_if_changed(speed);
        self.state.sequence.set_if_changed(sequence);

        self.open_stream();

        let now = self.time.now();
        self.timers.cache.start(now);
        self.timers.diagnostics.start(now);
    }

    fn open_stream(&mut self) {
        let (Some(info), Some(queues)) = (self.audio_info, self.queues.clone()) else {
            return;
        };
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let params = StreamParams {
            channel_count: info.channel_count,
            format: info.format,
            sample_rate: info.sample_rate,
            buffer_frame_count: self.config.buffer_frame_count,
        };
        let mut bridge = AudioBridge::new(
            info,
            queues,
            Arc::clone(&self.playhead),
            Arc::clone(&self.volume_control),
            Arc::clone(&self.time),
        );
        let retired = bridge.retired();
        match device.open_stream(params, Box::new(move |out: &mut [u8]| bridge.fill(out))) {
            Ok(()) => {
                debug!(target: "seqplay::audio", "audio stream open: {:?}", params);
                self.audio_open = true;
                self.retired_audio = Some(retired);
            }
            Err(e) => self.audio_failed("cannot open audio stream", e),
        }
    }

    fn close_stream(&mut self) {
        if let Some(device) = self.device.as_mut() {
            device.close_stream();
        }
        self.audio_open = false;
        self.retired_audio = None;
    }

    /// Device failures leave audio off for the rest of the session
    fn audio_failed(&mut self, context: &str, err: AudioError) {
        error!(target: "seqplay::audio", "{}: {}", context, err);
        self.close_stream();
        self.device = None;
        warn!(target: "seqplay::audio", "audio disabled, playback follows the wall clock");
    }

    /// Stop playback, close the audio stream and release the decoder
    pub fn close(&mut self) {
        self.set_playback(PlaybackState::Stop);
        self.close_stream();
        self.decoder = None;
        self.queues = None;
        self.audio_info = None;
        self.cache.clear();
        self.timers.cache.stop();
        self.timers.diagnostics.stop();
    }

    pub fn set_layer(&mut self, layer: usize) {
        if self.state.layer.set_if_changed(layer) && self.source.is_some() {
            // Failures are logged by open_source
            let _ = self.open_source();
        }
    }

    pub fn next_layer(&mut self) {
        let count = self.state.info.get().video.len();
        let mut layer = *self.state.layer.get() + 1;
        if layer >= count {
            layer = 0;
        }
        self.set_layer(layer);
    }

    pub fn prev_layer(&mut self) {
        let count = self.state.info.get().video.len();
        let layer = match *self.state.layer.get() {
            0 => count.saturating_sub(1),
            n => n - 1,
        };
        self.set_layer(layer);
    }

    // ---- Speed ----

    pub fn set_speed(&mut self, speed: Speed) {
        if self.state.speed.set_if_changed(speed) {
            let now = self.time.now();
            self.seek.rebase(self.current_frame(), now);
            self.real_speed.restart(now);
            debug!(target: "seqplay::engine", "speed {}", speed);
        }
    }

    pub fn reset_speed(&mut self) {
        let speed = *self.state.default_speed.get();
        self.set_speed(speed);
    }

    // ---- Navigation ----

    /// First and last frame playback is confined to
    pub fn active_range(&self) -> (FrameNumber, FrameNumber) {
        let mut start = 0;
        let mut end = self.state.sequence.get().size() as FrameNumber - 1;
        if *self.state.in_out_points_enabled.get() {
            let in_point = *self.state.in_point.get();
            let out_point = *self.state.out_point.get();
            if in_point != INVALID {
                start = in_point;
            }
            if out_point != INVALID {
                end = out_point;
            }
        }
        (start, end)
    }

    /// Move to `value`, wrapping past either end of the active range, and
    /// stop. Nothing happens if the wrapped frame is already current.
    pub fn set_current_frame(&mut self, value: FrameNumber) {
        let (start, end) = self.active_range();
        let mut frame = value;
        if frame > end {
            frame = start;
        }
        if frame < start {
            frame = end;
        }
        if self.state.current_frame.set_if_changed(frame) {
            self.set_playback(PlaybackState::Stop);
            self.seek_to(frame);
        }
    }

    pub fn start(&mut self) {
        let (start, _) = self.active_range();
        self.set_current_frame(start);
    }

    pub fn end(&mut self) {
        let (_, end) = self.active_range();
        self.set_current_frame(end);
    }

    pub fn next_frame(&mut self, count: usize) {
        self.set_current_frame(self.current_frame() + count as FrameNumber);
    }

    pub fn prev_frame(&mut self, count: usize) {
        self.set_current_frame(self.current_frame() - count as FrameNumber);
    }

    /// Jump to the in point (the first frame when unset)
    pub fn in_point(&mut self) {
        let frame = match *self.state.in_point.get() {
            INVALID => 0,
            frame => frame,
        };
        self.set_current_frame(frame);
    }

    /// Jump to the out point (the last frame when unset)
    pub fn out_point(&mut self) {
        let frame = match *self.state.out_point.get() {
            INVALID => self.state.sequence.get().size() as FrameNumber - 1,
            frame => frame,
        };
        self.set_current_frame(frame);
    }

    // ---- Playback state machine ----

    pub fn set_playback(&mut self, playback: PlaybackState) {
        if playback.is_playing() && self.state.sequence.get().size() == 0 {
            warn!(target: "seqplay::engine", "nothing to play");
            return;
        }
        if self.state.playback.set_if_changed(playback) {
            debug!(target: "seqplay::engine", "playback {:?}", playback);
            self.playback_update();
        }
    }

    pub fn set_playback_mode(&mut self, mode: PlaybackMode) {
        self.state.playback_mode.set_if_changed(mode);
    }

    fn playback_update(&mut self) {
        let now = self.time.now();
        let frame = self.current_frame();
        match self.playback().direction() {
            None => {
                self.timers.playback.stop();
                self.timers.real_speed.stop();
                // Aborts and rewinds the audio stream too
                self.seek_to(frame);
            }
            Some(direction) => {
                self.io_direction = direction;
                self.seek_to(frame);
                if self.has_audio() {
                    if let Some(device) = self.device.as_mut() {
                        if let Err(e) = device.start_stream() {
                            self.audio_failed("cannot start audio stream", e);
                        }
                    }
                }
                self.timers.playback.start(now);
                self.timers.real_speed.start(now);
            }
        }
    }

    fn seek_to(&mut self, frame: FrameNumber) {
        let now = self.time.now();
        let result = self.seek.seek(
            frame,
            self.io_direction,
            now,
            self.decoder.as_deref_mut(),
            self.device.as_deref_mut(),
        );
        self.real_speed.restart(now);
        if let Err(e) = result {
            self.audio_failed("cannot stop audio stream", e);
        }
    }

    fn clock_snapshot(&self) -> ClockSnapshot {
        let position = self.seek.position();
        let audio = match self.audio_info {
            Some(info) if self.has_audio() => Some(AudioTimeBase {
                sample_rate: info.sample_rate,
                playhead: self.playhead.snapshot(),
            }),
            _ => None,
        };
        ClockSnapshot {
            playback: self.playback(),
            speed: *self.state.speed.get(),
            frame_offset: position.frame_offset,
            start_time: position.start_time,
            audio,
        }
    }

    fn playback_tick(&mut self, now: Instant) {
        let playback = self.playback();
        if !playback.is_playing() {
            return;
        }
        let mut frame = self.clock_snapshot().frame_at(now);

        let (start, end) = self.active_range();
        let crossed = match playback {
            PlaybackState::Forward => frame >= end,
            PlaybackState::Reverse => frame <= start,
            PlaybackState::Stop => false,
        };
        if crossed {
            let reached = if playback == PlaybackState::Forward { end } else { start };
            let mode = *self.state.playback_mode.get();
            debug!(target: "seqplay::engine", "boundary {} reached ({})", reached, mode);
            match mode {
                PlaybackMode::Once => {
                    frame = reached;
                    self.set_playback(PlaybackState::Stop);
                    self.set_current_frame(frame);
                }
                PlaybackMode::Loop => {
                    frame = if playback == PlaybackState::Forward { start } else { end };
                    self.set_playback(PlaybackState::Stop);
                    self.set_current_frame(frame);
                    self.set_playback(playback);
                }
                PlaybackMode::PingPong => {
                    frame = reached;
                    self.set_playback(PlaybackState::Stop);
                    self.set_current_frame(frame);
                    self.set_playback(playback.flipped());
                }
            }
        }
        self.state.current_frame.set_if_changed(frame);
    }

    /// Drop video frames that are stale or already passed, then publish the
    /// frame at the head of the queue
    fn queue_update(&mut self) {
        let Some(queues) = self.queues.as_ref() else {
            return;
        };
        let epoch = self.seek.epoch();
        let current = self.current_frame();
        let forward = match self.playback() {
            PlaybackState::Forward => true,
            PlaybackState::Reverse => false,
            PlaybackState::Stop => self.io_direction == Direction::Forward,
        };

        let mut consumed = 0;
        let image = {
            let mut queues = lock_queues(queues);
            while let Some(front) = queues.video.peek() {
                let stale = front.epoch != epoch;
                let passed = if forward { front.frame < current } else { front.frame > current };
                if !stale && !passed {
                    break;
                }
                queues.video.pop();
                if !stale {
                    consumed += 1;
                }
            }
            queues.video.peek().map(|frame| frame.image.clone())
        };

        self.real_speed.add_frames(consumed);
        if let Some(image) = image {
            self.state.current_image.set_if_changed(Some(image));
        }
    }

    fn update_diagnostics(&mut self) {
        let Some(queues) = self.queues.as_ref() else {
            return;
        };
        let (video_max, video_count, audio_max, audio_count) = {
            let queues = lock_queues(queues);
            (
                queues.video.max(),
                queues.video.count(),
                queues.audio.max(),
                queues.audio.count(),
            )
        };
        self.state.video_queue_max.set_always(video_max);
        self.state.video_queue_count.set_always(video_count);
        self.state.audio_queue_max.set_always(audio_max);
        self.state.audio_queue_count.set_always(audio_count);
    }

    /// Run one iteration of the tick loop
    pub fn tick(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            self.process_command(command);
        }

        if let Some(retired) = self.retired_audio.as_ref() {
            retired.try_iter().for_each(drop);
        }

        if let Some(device) = self.device.as_ref() {
            let errors = device.take_error_count();
            if errors > 0 {
                warn!(target: "seqplay::audio", "{} audio stream error(s)", errors);
            }
        }

        let now = self.time.now();
        if self.timers.playback.poll(now) {
            self.playback_tick(now);
        }
        if self.timers.queue.poll(now) {
            self.queue_update();
        }
        if self.timers.real_speed.poll(now) {
            let speed = self.real_speed.sample(now);
            self.state.real_speed.set_if_changed(speed);
            debug!(target: "seqplay::engine", "real speed: {:.2}", speed);
        }
        if self.timers.cache.poll(now) {
            if let Some(decoder) = self.decoder.as_deref() {
                self.cache.poll(decoder);
            }
        }
        if self.timers.diagnostics.poll(now) {
            self.update_diagnostics();
        }
    }

    pub fn process_command(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::SetPlayback(playback) => self.set_playback(playback),
            PlaybackCommand::SetCurrentFrame(frame) => self.set_current_frame(frame),
            PlaybackCommand::SetSpeed(speed) => self.set_speed(speed),
            PlaybackCommand::SetVolume(volume) => self.set_volume(volume),
            PlaybackCommand::SetMute(mute) => self.set_mute(mute),
            PlaybackCommand::SetPlaybackMode(mode) => self.set_playback_mode(mode),
            PlaybackCommand::Reload => {
                // Failures are logged by open_source
                let _ = self.reload();
            }
        }
    }

    // ---- In/out points ----

    pub fn set_in_out_points_enabled(&mut self, enabled: bool) {
        self.state.in_out_points_enabled.set_if_changed(enabled);
    }

    pub fn set_in_point(&mut self, frame: FrameNumber) {
        self.state.in_point.set_if_changed(frame);
    }

    pub fn set_out_point(&mut self, frame: FrameNumber) {
        self.state.out_point.set_if_changed(frame);
    }

    pub fn reset_in_point(&mut self) {
        self.state.in_point.set_if_changed(0);
    }

    pub fn reset_out_point(&mut self) {
        let last = (self.state.sequence.get().size() as FrameNumber - 1).max(0);
        self.state.out_point.set_if_changed(last);
    }

    // ---- Volume ----

    pub fn set_volume(&mut self, volume: f32) {
        if self.state.volume.set_if_changed(volume.clamp(0.0, 1.0)) {
            self.volume_update();
        }
    }

    pub fn set_mute(&mut self, mute: bool) {
        if self.state.mute.set_if_changed(mute) {
            self.volume_update();
        }
    }

    fn volume_update(&mut self) {
        let gain = if *self.state.mute.get() { 0.0 } else { *self.state.volume.get() };
        self.volume_control.set(gain);
    }

    // ---- Decoder settings ----

    pub fn set_thread_count(&mut self, count: usize) {
        if self.state.thread_count.set_if_changed(count) {
            if let Some(decoder) = self.decoder.as_mut() {
                decoder.set_thread_count(count);
            }
        }
    }

    pub fn has_cache(&self) -> bool {
        self.decoder.as_ref().is_some_and(|d| d.has_cache())
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.config.cache_enabled = enabled;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.set_cache_enabled(enabled);
        }
    }

    pub fn set_cache_max(&mut self, bytes: usize) {
        self.config.cache_max_bytes = bytes;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.set_cache_max(bytes);
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use crate::audio::buffer::SampleFormat;
    use crate::testing::{LoopbackDevice, ManualTime, Script, ScriptedOpener};

    const AUDIO: AudioInfo = AudioInfo {
        channel_count: 1,
        format: SampleFormat::I16,
        sample_rate: 48_000,
    };

    struct Fixture {
        engine: PlaybackEngine,
        script: Script,
        time: Arc<ManualTime>,
        t0: Instant,
    }

    fn fixture(size: usize, audio: Option<AudioInfo>, device: Option<LoopbackDevice>) -> Fixture {
        let time = ManualTime::shared();
        let opener = ScriptedOpener::new(size, audio);
        let script = opener.script();
        let device = device.map(|d| Box::new(d) as Box<dyn AudioDevice>);
        let mut engine = PlaybackEngine::new(EngineConfig::default(), Box::new(opener), device, time.clone());
        engine.open(Path::new("clip")).unwrap();
        let t0 = time.get();
        Fixture {
            engine,
            script,
            time,
            t0,
        }
    }

    impl Fixture {
        fn tick_at(&mut self, after: Duration) {
            self.time.set(self.t0 + after);
            self.engine.tick();
        }
    }

    #[test]
    fn test_open_publishes_media() {
        let f = fixture(10, None, None);
        let state = f.engine.observables();
        assert_eq!(state.sequence.get().size(), 10);
        assert_eq!(*state.speed.get(), Speed::new(24, 1));
        assert_eq!(*state.default_speed.get(), Speed::new(24, 1));
        assert!(*state.reload.get());
        assert_eq!(f.script.thread_count(), Some(4));
        // Seeked to the current frame on open
        assert_eq!(f.script.seeks().last().map(|s| s.0), Some(0));
    }

    #[test]
    fn test_open_failure_is_recovered() {
        let time = ManualTime::shared();
        let opener = ScriptedOpener::new(10, None);
        opener.script().fail_open(true);
        let mut engine = PlaybackEngine::new(EngineConfig::default(), Box::new(opener), None, time);
        assert!(engine.open(Path::new("missing")).is_err());
        assert_eq!(engine.playback(), PlaybackState::Stop);
        assert_eq!(engine.current_frame(), 0);
        assert_eq!(engine.observables().sequence.get().size(), 0);
        engine.set_playback(PlaybackState::Forward);
        assert_eq!(engine.playback(), PlaybackState::Stop);
    }

    #[test]
    fn test_set_current_frame_wraps() {
        let mut f = fixture(10, None, None);
        f.engine.set_current_frame(10);
        assert_eq!(f.engine.current_frame(), 0);
        f.engine.set_current_frame(-1);
        assert_eq!(f.engine.current_frame(), 9);
        f.engine.set_current_frame(4);
        assert_eq!(f.engine.current_frame(), 4);

        f.engine.set_in_out_points_enabled(true);
        f.engine.set_in_point(2);
        f.engine.set_out_point(6);
        f.engine.set_current_frame(7);
        assert_eq!(f.engine.current_frame(), 2);
        f.engine.set_current_frame(1);
        assert_eq!(f.engine.current_frame(), 6);
    }

    #[test]
    fn test_set_current_frame_stops_and_seeks() {
        let mut f = fixture(10, None, None);
        f.engine.set_playback(PlaybackState::Forward);
        let seeks = f.script.seeks().len();
        f.engine.set_current_frame(5);
        assert_eq!(f.engine.playback(), PlaybackState::Stop);
        assert!(f.script.seeks().len() > seeks);
        assert_eq!(f.script.seeks().last().map(|s| s.0), Some(5));

        // Same frame again: nothing happens
        let seeks = f.script.seeks().len();
        f.engine.set_current_frame(5);
        assert_eq!(f.script.seeks().len(), seeks);
    }

    #[test]
    fn test_loop_wraps_to_start() {
        let mut f = fixture(10, None, None);
        f.engine.set_playback_mode(PlaybackMode::Loop);
        f.engine.set_playback(PlaybackState::Forward);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 0);
        assert_eq!(f.engine.playback(), PlaybackState::Forward);
    }

    #[test]
    fn test_loop_reverse_wraps_to_end() {
        let mut f = fixture(10, None, None);
        f.engine.set_playback_mode(PlaybackMode::Loop);
        f.engine.set_current_frame(3);
        f.engine.set_playback(PlaybackState::Reverse);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 9);
        assert_eq!(f.engine.playback(), PlaybackState::Reverse);
        assert_eq!(f.script.seeks().last().map(|s| (s.0, s.1)), Some((9, Direction::Reverse)));
    }

    #[test]
    fn test_pingpong_flips_direction() {
        let mut f = fixture(10, None, None);
        f.engine.set_playback_mode(PlaybackMode::PingPong);
        f.engine.set_playback(PlaybackState::Forward);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 9);
        assert_eq!(f.engine.playback(), PlaybackState::Reverse);

        // And back again from the start
        f.tick_at(Duration::from_millis(1000));
        assert_eq!(f.engine.current_frame(), 0);
        assert_eq!(f.engine.playback(), PlaybackState::Forward);
    }

    #[test]
    fn test_once_stops_at_end() {
        let mut f = fixture(10, None, None);
        f.engine.set_playback_mode(PlaybackMode::Once);
        f.engine.set_playback(PlaybackState::Forward);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 9);
        assert_eq!(f.engine.playback(), PlaybackState::Stop);
    }

    #[test]
    fn test_once_reverse_stops_at_start() {
        let mut f = fixture(10, None, None);
        f.engine.set_playback_mode(PlaybackMode::Once);
        f.engine.set_current_frame(3);
        f.engine.set_playback(PlaybackState::Reverse);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 0);
        assert_eq!(f.engine.playback(), PlaybackState::Stop);
    }

    #[test]
    fn test_once_stops_at_in_out_points() {
        let mut f = fixture(100, None, None);
        f.engine.set_in_out_points_enabled(true);
        f.engine.set_in_point(10);
        f.engine.set_out_point(20);
        f.engine.set_playback_mode(PlaybackMode::Once);
        f.engine.set_current_frame(15);
        f.engine.set_playback(PlaybackState::Forward);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 20);
        assert_eq!(f.engine.playback(), PlaybackState::Stop);

        f.t0 = f.time.get();
        f.engine.set_current_frame(15);
        f.engine.set_playback(PlaybackState::Reverse);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 10);
        assert_eq!(f.engine.playback(), PlaybackState::Stop);
    }

    #[test]
    fn test_pingpong_flips_at_in_out_points() {
        let mut f = fixture(100, None, None);
        f.engine.set_in_out_points_enabled(true);
        f.engine.set_in_point(10);
        f.engine.set_out_point(20);
        f.engine.set_playback_mode(PlaybackMode::PingPong);
        f.engine.in_point();
        f.engine.set_playback(PlaybackState::Forward);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 20);
        assert_eq!(f.engine.playback(), PlaybackState::Reverse);
        assert_eq!(f.script.seeks().last().map(|s| (s.0, s.1)), Some((20, Direction::Reverse)));

        f.tick_at(Duration::from_millis(1000));
        assert_eq!(f.engine.current_frame(), 10);
        assert_eq!(f.engine.playback(), PlaybackState::Forward);
    }

    #[test]
    fn test_advances_within_range() {
        let mut f = fixture(100, None, None);
        f.engine.set_playback(PlaybackState::Forward);
        f.tick_at(Duration::from_millis(250));
        assert_eq!(f.engine.current_frame(), 6);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 12);
    }

    #[test]
    fn test_in_out_points_bound_playback() {
        let mut f = fixture(100, None, None);
        f.engine.set_in_out_points_enabled(true);
        f.engine.set_in_point(10);
        f.engine.set_out_point(20);
        f.engine.set_playback_mode(PlaybackMode::Loop);
        f.engine.in_point();
        assert_eq!(f.engine.current_frame(), 10);
        f.engine.set_playback(PlaybackState::Forward);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 10);

        f.engine.reset_out_point();
        assert_eq!(*f.engine.observables().out_point.get(), 99);
        f.engine.reset_in_point();
        assert_eq!(*f.engine.observables().in_point.get(), 0);
    }

    #[test]
    fn test_frame_drop_under_lag() {
        let mut f = fixture(10, None, None);
        f.engine.set_current_frame(3);
        f.engine.set_playback(PlaybackState::Forward);
        let epoch = f.engine.seek_epoch();
        for frame in [3, 4, 5] {
            f.script.push_video(frame, epoch);
        }
        // 0.13s at 24 fps: three frames past the offset
        f.tick_at(Duration::from_millis(130));
        assert_eq!(f.engine.current_frame(), 6);
        assert!(f.engine.current_image().is_none());
        assert_eq!(f.script.video_count(), 0);

        let image = f.script.push_video(6, epoch);
        f.tick_at(Duration::from_millis(145));
        assert_eq!(f.engine.current_image(), Some(&image));
    }

    #[test]
    fn test_stale_epoch_frames_never_shown() {
        let mut f = fixture(10, None, None);
        let old = f.engine.seek_epoch();
        f.engine.set_current_frame(5);
        f.script.push_video(5, old);
        let fresh = f.script.push_video(5, f.engine.seek_epoch());
        f.tick_at(Duration::from_millis(20));
        assert_eq!(f.engine.current_image(), Some(&fresh));
    }

    #[test]
    fn test_reverse_drops_frames_ahead() {
        let mut f = fixture(100, None, None);
        f.engine.set_current_frame(50);
        f.engine.set_playback(PlaybackState::Reverse);
        let epoch = f.engine.seek_epoch();
        for frame in [50, 49, 48, 47] {
            f.script.push_video(frame, epoch);
        }
        let image = f.script.push_video(46, epoch);
        // 0.17s at 24 fps: four frames back
        f.tick_at(Duration::from_millis(170));
        assert_eq!(f.engine.current_frame(), 46);
        assert_eq!(f.engine.current_image(), Some(&image));
    }

    #[test]
    fn test_audio_clock_drives_forward_playback() {
        let device = LoopbackDevice::new();
        let mut f = fixture(1000, Some(AUDIO), Some(device.clone()));
        assert!(f.engine.has_audio());
        f.engine.set_playback(PlaybackState::Forward);
        assert!(device.is_running());

        let epoch = f.engine.seek_epoch();
        f.script.push_audio(&vec![100i16; 6_000], epoch);
        f.time.set(f.t0 + Duration::from_millis(500));
        // The device consumed only an eighth of a second of audio
        let out = device.pull(6_000 * 2);
        assert!(out.iter().any(|b| *b != 0));
        f.engine.tick();
        assert_eq!(f.engine.current_frame(), 3);
    }

    #[test]
    fn test_reverse_ignores_audio_clock() {
        let device = LoopbackDevice::new();
        let mut f = fixture(1000, Some(AUDIO), Some(device));
        f.engine.set_current_frame(500);
        f.engine.set_playback(PlaybackState::Reverse);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 488);
    }

    #[test]
    fn test_device_start_failure_falls_back_to_wall_clock() {
        let device = LoopbackDevice::new();
        device.fail_start(true);
        let mut f = fixture(100, Some(AUDIO), Some(device.clone()));
        f.engine.set_playback(PlaybackState::Forward);
        assert!(!f.engine.has_audio());
        assert!(!device.is_open());
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 12);
    }

    #[test]
    fn test_device_open_failure_falls_back_to_wall_clock() {
        let device = LoopbackDevice::new();
        device.fail_open(true);
        let mut f = fixture(100, Some(AUDIO), Some(device));
        assert!(!f.engine.has_audio());
        f.engine.set_playback(PlaybackState::Forward);
        f.tick_at(Duration::from_millis(250));
        assert_eq!(f.engine.current_frame(), 6);
    }

    #[test]
    fn test_stop_aborts_audio() {
        let device = LoopbackDevice::new();
        let mut f = fixture(100, Some(AUDIO), Some(device.clone()));
        f.engine.set_playback(PlaybackState::Forward);
        assert!(device.is_running());
        f.engine.set_playback(PlaybackState::Stop);
        assert!(!device.is_running());
        assert_eq!(device.stream_time(), 0.0);
    }

    #[test]
    fn test_set_speed_rebases_clock() {
        let mut f = fixture(1000, None, None);
        f.engine.set_playback(PlaybackState::Forward);
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.current_frame(), 12);

        f.engine.set_speed(Speed::new(48, 1));
        f.tick_at(Duration::from_millis(1000));
        assert_eq!(f.engine.current_frame(), 36);

        f.engine.reset_speed();
        assert_eq!(*f.engine.observables().speed.get(), Speed::new(24, 1));
    }

    #[test]
    fn test_real_speed_published() {
        let mut f = fixture(1000, None, None);
        f.engine.set_playback(PlaybackState::Forward);
        let epoch = f.engine.seek_epoch();
        for frame in 0..30 {
            f.script.push_video(frame, epoch);
        }
        f.tick_at(Duration::from_millis(500));
        f.tick_at(Duration::from_millis(1000));
        // 24 frames consumed over the first second
        assert_eq!(*f.engine.observables().real_speed.get(), 24.0);
    }

    #[test]
    fn test_navigation() {
        let mut f = fixture(10, None, None);
        f.engine.end();
        assert_eq!(f.engine.current_frame(), 9);
        f.engine.next_frame(1);
        assert_eq!(f.engine.current_frame(), 0);
        f.engine.prev_frame(1);
        assert_eq!(f.engine.current_frame(), 9);
        f.engine.prev_frame(3);
        assert_eq!(f.engine.current_frame(), 6);
        f.engine.start();
        assert_eq!(f.engine.current_frame(), 0);
        f.engine.out_point();
        assert_eq!(f.engine.current_frame(), 9);
    }

    #[test]
    fn test_volume_and_mute() {
        let mut f = fixture(10, None, None);
        f.engine.set_volume(1.5);
        assert_eq!(*f.engine.observables().volume.get(), 1.0);
        f.engine.set_volume(0.25);
        assert_eq!(f.engine.volume_control.gain(), 0.25);
        f.engine.set_mute(true);
        assert_eq!(f.engine.volume_control.gain(), 0.0);
        f.engine.set_mute(false);
        assert_eq!(f.engine.volume_control.gain(), 0.25);
    }

    #[test]
    fn test_layers_cycle_and_reopen() {
        let time = ManualTime::shared();
        let opener = ScriptedOpener::new(10, None).with_layers(3);
        let script = opener.script();
        let mut engine = PlaybackEngine::new(EngineConfig::default(), Box::new(opener), None, time);
        engine.open(Path::new("clip")).unwrap();
        engine.next_layer();
        engine.next_layer();
        engine.next_layer();
        assert_eq!(*engine.observables().layer.get(), 0);
        engine.prev_layer();
        assert_eq!(*engine.observables().layer.get(), 2);
        let layers: Vec<usize> = script.opens().iter().map(|o| o.layer).collect();
        assert_eq!(layers, vec![0, 1, 2, 0, 2]);
    }

    #[test]
    fn test_decoder_settings_passthrough() {
        let mut f = fixture(10, None, None);
        f.engine.set_thread_count(8);
        f.engine.set_cache_enabled(false);
        f.engine.set_cache_max(1024);
        assert_eq!(f.script.thread_count(), Some(8));
        assert_eq!(f.script.cache_enabled(), Some(false));
        assert_eq!(f.script.cache_max(), Some(1024));
        assert!(f.engine.has_cache());
    }

    #[test]
    fn test_cache_and_diagnostics_timers() {
        let mut f = fixture(10, None, None);
        let ranges = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ranges);
        f.engine.observe_cached_frames().observe(move |r: &Vec<Range>| {
            sink.lock().unwrap().push(r.clone());
        });
        f.script.set_cached(vec![Range::new(0, 4)]);
        f.script.push_video(0, f.engine.seek_epoch());

        f.tick_at(Duration::from_millis(400));
        assert!(f.engine.cached_frames().is_empty());
        f.tick_at(Duration::from_millis(500));
        assert_eq!(f.engine.cached_frames(), &[Range::new(0, 4)]);
        assert_eq!(ranges.lock().unwrap().len(), 2);
        assert_eq!(*f.engine.observables().video_queue_max.get(), 30);
        assert_eq!(*f.engine.observables().video_queue_count.get(), 1);
    }

    #[test]
    fn test_commands_drained_on_tick() {
        let mut f = fixture(10, None, None);
        let tx = f.engine.command_sender();
        std::thread::spawn(move || {
            tx.send(PlaybackCommand::SetPlaybackMode(PlaybackMode::Once)).unwrap();
            tx.send(PlaybackCommand::SetCurrentFrame(4)).unwrap();
            tx.send(PlaybackCommand::SetMute(true)).unwrap();
        })
        .join()
        .unwrap();
        f.tick_at(Duration::from_millis(1));
        assert_eq!(f.engine.current_frame(), 4);
        assert_eq!(*f.engine.observables().playback_mode.get(), PlaybackMode::Once);
        assert!(*f.engine.observables().mute.get());

        f.engine.command_sender().send(PlaybackCommand::Reload).unwrap();
        f.tick_at(Duration::from_millis(2));
        assert_eq!(f.script.opens().len(), 2);
    }

    #[test]
    fn test_device_errors_drained_on_tick() {
        let device = LoopbackDevice::new();
        let mut f = fixture(10, Some(AUDIO), Some(device.clone()));
        device.report_error();
        device.report_error();
        f.tick_at(Duration::from_millis(1));
        assert_eq!(device.take_error_count(), 0);
        // Stream errors alone do not disable audio
        assert!(f.engine.has_audio());
    }

    #[test]
    fn test_close_releases_decoder() {
        let device = LoopbackDevice::new();
        let mut f = fixture(10, Some(AUDIO), Some(device.clone()));
        f.engine.set_playback(PlaybackState::Forward);
        f.engine.close();
        assert_eq!(f.engine.playback(), PlaybackState::Stop);
        assert!(!device.is_open());
        assert!(!f.engine.has_cache());
    }
}
