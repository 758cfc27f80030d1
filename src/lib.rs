//! seqplay - frame-accurate playback of decoded image/audio sequences.
//!
//! A [`PlaybackEngine`] pulls decoded frames from a [`Decoder`] through a
//! bounded queue pair, drives presentation from the audio device clock when
//! audio is playing (wall-clock time otherwise), and publishes its state
//! through observable values. The engine is driven by calling
//! [`PlaybackEngine::tick`] from one thread.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use seqplay::{EngineConfig, PlaybackEngine, PlaybackState, SourceOpener, WallClock};
//!
//! let mut engine = PlaybackEngine::new(
//!     EngineConfig::default(),
//!     Box::new(SourceOpener),
//!     None,
//!     Arc::new(WallClock),
//! );
//! engine.open(Path::new("pattern:240@24")).unwrap();
//! engine.set_playback(PlaybackState::Forward);
//! loop {
//!     engine.tick();
//!     std::thread::sleep(std::time::Duration::from_millis(5));
//! }
//! ```

pub mod audio;
pub mod config;
pub mod core;
pub mod decode;
#[cfg(feature = "ffmpeg")]
pub mod media;
pub mod playback;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::config::{ConfigError, EngineConfig, TimerConfig};
pub use crate::core::{FrameNumber, Range, Sequence, Speed, TimeSource, WallClock};
pub use crate::decode::{Decoder, DecodeError, MediaOpener, ReadOptions, SourceOpener};
pub use crate::playback::{EngineError, PlaybackCommand, PlaybackEngine, PlaybackMode, PlaybackState};
