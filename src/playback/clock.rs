//! Playback clock: which frame should be on screen right now.
//!
//! While playing forward with an open audio stream the audio playhead is the
//! master: samples delivered to the device are converted to frames, plus the
//! wall time since the device last consumed. Every other case runs on wall
//! time elapsed since the last seek, scaled by the speed.

use std::time::Instant;
use crate::audio::playhead::PlayheadSnapshot;
use crate::core::frame::FrameNumber;
use crate::core::time::{elapsed_seconds, rescale, Rational, Speed};
use crate::playback::state::PlaybackState;

/// Audio side of the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTimeBase {
    pub sample_rate: u32,
    pub playhead: PlayheadSnapshot,
}

/// Everything the clock reads, copied at the start of a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSnapshot {
    pub playback: PlaybackState,
    pub speed: Speed,
    /// Frame at the last seek or speed change
    pub frame_offset: FrameNumber,
    /// Wall-clock anchor of `frame_offset`
    pub start_time: Instant,
    /// Present when an audio stream is open and running
    pub audio: Option<AudioTimeBase>,
}

impl ClockSnapshot {
    /// Candidate frame at `now`
    pub fn frame_at(&self, now: Instant) -> FrameNumber {
        let fps = self.speed.to_f64();
        match (self.playback, self.audio) {
            (PlaybackState::Forward, Some(audio)) if audio.sample_rate > 0 => {
                let played = rescale(
                    audio.playhead.samples_total as i64,
                    Rational::new(1, audio.sample_rate as i32),
                    self.speed.swap(),
                );
                let since = elapsed_seconds(audio.playhead.last_consumed, now);
                self.frame_offset + played + (since * fps) as i64
            }
            (PlaybackState::Forward, _) => {
                self.frame_offset + (elapsed_seconds(self.start_time, now) * fps) as i64
            }
            (PlaybackState::Reverse, _) => {
                self.frame_offset - (elapsed_seconds(self.start_time, now) * fps) as i64
            }
            (PlaybackState::Stop, _) => self.frame_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(playback: PlaybackState, t0: Instant) -> ClockSnapshot {
        ClockSnapshot {
            playback,
            speed: Speed::new(24, 1),
            frame_offset: 100,
            start_time: t0,
            audio: None,
        }
    }

    #[test]
    fn test_wall_clock_forward_and_reverse() {
        let t0 = Instant::now();
        let half = t0 + Duration::from_millis(500);
        assert_eq!(snapshot(PlaybackState::Forward, t0).frame_at(half), 112);
        assert_eq!(snapshot(PlaybackState::Reverse, t0).frame_at(half), 88);
        assert_eq!(snapshot(PlaybackState::Stop, t0).frame_at(half), 100);
    }

    #[test]
    fn test_truncates_partial_frames() {
        let t0 = Instant::now();
        // 0.06s at 24 fps is 1.44 frames
        let now = t0 + Duration::from_millis(60);
        assert_eq!(snapshot(PlaybackState::Forward, t0).frame_at(now), 101);
        assert_eq!(snapshot(PlaybackState::Reverse, t0).frame_at(now), 99);
    }

    #[test]
    fn test_audio_master() {
        let t0 = Instant::now();
        let last = t0 + Duration::from_millis(500);
        let mut clock = snapshot(PlaybackState::Forward, t0);
        clock.audio = Some(AudioTimeBase {
            sample_rate: 48_000,
            playhead: PlayheadSnapshot {
                epoch: 1,
                samples_total: 24_000,
                last_consumed: last,
            },
        });
        // Half a second of audio played, plus 0.1s since the last callback
        assert_eq!(clock.frame_at(last + Duration::from_millis(100)), 114);
        // Only the time since the last callback counts, not the time since the seek
        assert_eq!(clock.frame_at(last), 112);
    }

    #[test]
    fn test_reverse_ignores_audio() {
        let t0 = Instant::now();
        let mut clock = snapshot(PlaybackState::Reverse, t0);
        clock.audio = Some(AudioTimeBase {
            sample_rate: 48_000,
            playhead: PlayheadSnapshot {
                epoch: 1,
                samples_total: 480_000,
                last_consumed: t0,
            },
        });
        assert_eq!(clock.frame_at(t0 + Duration::from_secs(1)), 76);
    }
}
