//! Seek controller and the position state it owns.

use std::sync::Arc;
use std::time::Instant;
use log::debug;
use crate::audio::device::{AudioDevice, AudioError};
use crate::audio::playhead::Playhead;
use crate::core::frame::FrameNumber;
use crate::decode::decoder::{Decoder, Direction};

/// Clock anchors and the current seek epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub frame_offset: FrameNumber,
    pub start_time: Instant,
    pub epoch: u64,
}

#[derive(Debug)]
pub struct SeekController {
    position: Position,
    playhead: Arc<Playhead>,
}

impl SeekController {
    pub fn new(playhead: Arc<Playhead>, now: Instant) -> Self {
        let epoch = playhead.epoch();
        Self {
            position: Position {
                frame_offset: 0,
                start_time: now,
                epoch,
            },
            playhead,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn epoch(&self) -> u64 {
        self.position.epoch
    }

    /// Restart everything at `frame`.
    ///
    /// A new epoch is started first: the audio bridge drops its carryover and
    /// both consumers skip frames produced for earlier requests. Then the
    /// decoder is redirected, the clock anchors move to `frame`, and an open
    /// audio stream is aborted and rewound. Only the device step can fail;
    /// everything else has been applied by then.
    pub fn seek(
        &mut self,
        frame: FrameNumber,
        direction: Direction,
        now: Instant,
        decoder: Option<&mut (dyn Decoder + '_)>,
        device: Option<&mut (dyn AudioDevice + '_)>,
    ) -> Result<(), AudioError> {
        let epoch = self.position.epoch + 1;
        self.playhead.reset(epoch, now);
        self.position = Position {
            frame_offset: frame,
            start_time: now,
            epoch,
        };
        debug!(target: "seqplay::engine", "seek to {} ({:?}, epoch {})", frame, direction, epoch);

        if let Some(decoder) = decoder {
            decoder.seek(frame, direction, epoch);
        }

        if let Some(device) = device {
            if device.is_open() {
                if device.is_running() {
                    device.abort_stream()?;
                }
                device.set_stream_time(0.0)?;
            }
        }
        Ok(())
    }

    /// Move the clock anchors without seeking: used when the speed changes
    /// mid-playback. Carryover audio stays valid.
    pub fn rebase(&mut self, frame: FrameNumber, now: Instant) {
        self.position.frame_offset = frame;
        self.position.start_time = now;
        self.playhead.rebase(now);
    }
}
