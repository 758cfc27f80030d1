//! Headless command-line player.
//!
//! Opens a source, starts playback and drives the engine's tick loop for a
//! fixed wall time, logging what it presents.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use clap::Parser;
use log::{debug, error, info, warn};
use seqplay::audio::AudioDevice;
use seqplay::core::{Rational, INVALID};
use seqplay::{EngineConfig, FrameNumber, PlaybackEngine, PlaybackMode, PlaybackState, SourceOpener, WallClock};

const TICK_INTERVAL: Duration = Duration::from_millis(2);

/// Frame-accurate sequence player
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Media file, or a test pattern such as `pattern:240@24`
    #[arg(value_name = "SOURCE", default_value = "pattern:240@24")]
    source: PathBuf,

    /// TOML engine configuration; command-line options override it
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Playback speed in frames per second (default: the media's rate)
    #[arg(short = 's', long = "speed", value_name = "FPS")]
    speed: Option<f64>,

    /// once, loop or pingpong
    #[arg(short = 'm', long = "mode", value_name = "MODE")]
    mode: Option<PlaybackMode>,

    /// Play backwards
    #[arg(short = 'r', long = "reverse")]
    reverse: bool,

    /// In point (enables in/out points)
    #[arg(long = "in", value_name = "N")]
    in_point: Option<FrameNumber>,

    /// Out point (enables in/out points)
    #[arg(long = "out", value_name = "N")]
    out_point: Option<FrameNumber>,

    /// How long to play, in seconds
    #[arg(short = 't', long = "seconds", value_name = "S", default_value_t = 10.0)]
    seconds: f64,

    /// Volume between 0 and 1
    #[arg(long = "volume", value_name = "V")]
    volume: Option<f32>,

    #[arg(long = "mute")]
    mute: bool,

    /// Run on wall-clock time without opening an audio device
    #[arg(long = "no-audio")]
    no_audio: bool,

    /// Decoder threads
    #[arg(long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Log filter, e.g. `debug` or `seqplay::engine=trace` (default: info, or RUST_LOG)
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration
    fn merge(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(mode) = self.mode {
            config.playback_mode = mode;
        }
        if let Some(volume) = self.volume {
            config.volume = volume.clamp(0.0, 1.0);
        }
        if self.mute {
            config.mute = true;
        }
        if let Some(threads) = self.threads {
            config.thread_count = threads;
        }
        config
    }
}

fn init_logging(args: &Args) {
    let mut builder = match &args.log_level {
        Some(filter) => {
            let mut builder = env_logger::Builder::new();
            builder.parse_filters(filter);
            builder
        }
        None => env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")),
    };
    builder.format_timestamp_millis().init();
}

#[cfg(feature = "cpal")]
fn audio_device() -> Option<Box<dyn AudioDevice>> {
    match seqplay::audio::CpalOutput::new() {
        Ok(output) => {
            info!("Audio output: {}", output.device_name());
            Some(Box::new(output))
        }
        Err(e) => {
            warn!("No audio output, playing on wall-clock time: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "cpal"))]
fn audio_device() -> Option<Box<dyn AudioDevice>> {
    warn!("Built without the cpal feature, playing on wall-clock time");
    None
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);
    debug!("Command-line args: {:?}", args);

    let config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };
    let config = args.merge(config);

    let device = if args.no_audio { None } else { audio_device() };
    let mut engine = PlaybackEngine::new(config, Box::new(SourceOpener), device, Arc::new(WallClock));

    {
        let state = engine.observables_mut();
        state.current_frame.observe(|frame: &FrameNumber| {
            debug!("frame {}", frame);
        });
        state.real_speed.observe(|fps: &f64| {
            if *fps > 0.0 {
                info!("real speed {:.2} fps", fps);
            }
        });
        state.playback.observe(|playback: &PlaybackState| {
            debug!("playback {:?}", playback);
        });
    }

    if let Err(e) = engine.open(&args.source) {
        error!("Cannot open {}: {}", args.source.display(), e);
        return ExitCode::FAILURE;
    }
    info!(
        "Playing {} ({}, audio: {})",
        args.source.display(),
        engine.observables().playback_mode.get(),
        if engine.has_audio() { "on" } else { "off" }
    );

    if let Some(fps) = args.speed {
        let speed = Rational::from_f64(fps);
        if speed.is_valid() {
            engine.set_speed(speed);
        } else {
            warn!("Ignoring invalid speed {}", fps);
        }
    }
    if args.in_point.is_some() || args.out_point.is_some() {
        engine.set_in_point(args.in_point.unwrap_or(INVALID));
        engine.set_out_point(args.out_point.unwrap_or(INVALID));
        engine.set_in_out_points_enabled(true);
        if args.reverse {
            engine.out_point();
        } else {
            engine.in_point();
        }
    }

    engine.set_playback(if args.reverse {
        PlaybackState::Reverse
    } else {
        PlaybackState::Forward
    });

    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds.max(0.0));
    while Instant::now() < deadline {
        engine.tick();
        if !engine.playback().is_playing() {
            info!("Playback stopped at frame {}", engine.current_frame());
            break;
        }
        thread::sleep(TICK_INTERVAL);
    }

    engine.close();
    ExitCode::SUCCESS
}
