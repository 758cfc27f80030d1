//! Real-time audio bridge: drains the audio queue into device buffers.
//!
//! `fill` runs on the device's callback thread. It holds the queue mutex
//! only while moving blocks into a pre-reserved staging list, copies
//! outside the lock, and never allocates, logs, or panics. Whatever part of
//! the output it cannot fill is silence. Used and stale blocks are handed
//! back through a bounded channel so their memory is freed by the tick loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use crossbeam::channel::{self, Receiver, Sender};
use crate::audio::buffer::{apply_gain, AudioBuffer, AudioInfo};
use crate::audio::playhead::Playhead;
use crate::core::time::SharedTime;
use crate::decode::decoder::AudioFrame;
use crate::decode::queue::{lock_queues, SharedQueues};

/// Value returned to the device driver after each callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Continue,
}

/// Output gain shared with the callback thread (f32 bits in an atomic)
#[derive(Debug)]
pub struct VolumeControl(AtomicU32);

impl VolumeControl {
    pub fn new(gain: f32) -> Self {
        Self(AtomicU32::new(gain.to_bits()))
    }

    pub fn set(&self, gain: f32) {
        self.0.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Unconsumed tail of the last block
#[derive(Debug)]
struct Carryover {
    audio: AudioBuffer,
    offset: usize,
}

impl Carryover {
    fn remaining(&self) -> &[u8] {
        &self.audio.as_bytes()[self.offset..]
    }
}

pub struct AudioBridge {
    queues: SharedQueues,
    playhead: Arc<Playhead>,
    volume: Arc<VolumeControl>,
    time: SharedTime,
    info: AudioInfo,
    carryover: Option<Carryover>,
    epoch: u64,
    staging: Vec<AudioFrame>,
    retired: Sender<AudioBuffer>,
    retired_rx: Receiver<AudioBuffer>,
}

impl AudioBridge {
    pub fn new(
        info: AudioInfo,
        queues: SharedQueues,
        playhead: Arc<Playhead>,
        volume: Arc<VolumeControl>,
        time: SharedTime,
    ) -> Self {
        let capacity = lock_queues(&queues).audio.max();
        let epoch = playhead.epoch();
        // Room for a full queue plus the carryover
        let (retired, retired_rx) = channel::bounded(capacity + 2);
        Self {
            queues,
            playhead,
            volume,
            time,
            info,
            carryover: None,
            epoch,
            staging: Vec::with_capacity(capacity),
            retired,
            retired_rx,
        }
    }

    /// Blocks the callback is done with. Drain it off the audio thread.
    pub fn retired(&self) -> Receiver<AudioBuffer> {
        self.retired_rx.clone()
    }

    fn retire(&self, audio: AudioBuffer) {
        // Freed here only when the consumer has fallen behind
        let _ = self.retired.try_send(audio);
    }

    /// Fill `out` with interleaved PCM in the stream format
    pub fn fill(&mut self, out: &mut [u8]) -> CallbackStatus {
        let frame_bytes = self.info.frame_byte_count();
        if frame_bytes == 0 {
            out.fill(0);
            return CallbackStatus::Continue;
        }
        // Whole sample frames only
        let usable = out.len() / frame_bytes * frame_bytes;

        let epoch = self.playhead.epoch();
        if epoch != self.epoch {
            if let Some(carry) = self.carryover.take() {
                self.retire(carry.audio);
            }
            self.epoch = epoch;
        }

        let mut written = 0;
        if let Some(carry) = self.carryover.as_mut() {
            let n = copy_into(carry.remaining(), &mut out[..usable]);
            carry.offset += n;
            written += n;
            if carry.offset >= carry.audio.as_bytes().len() {
                if let Some(carry) = self.carryover.take() {
                    self.retire(carry.audio);
                }
            }
        }

        if written < usable {
            self.stage(epoch, usable - written);
            let mut staging = std::mem::take(&mut self.staging);
            for frame in staging.drain(..) {
                if frame.epoch != epoch {
                    self.retire(frame.audio);
                    continue;
                }
                let bytes = frame.audio.as_bytes();
                let len = bytes.len();
                let n = copy_into(bytes, &mut out[written..usable]);
                written += n;
                if n < len {
                    self.carryover = Some(Carryover {
                        audio: frame.audio,
                        offset: n,
                    });
                } else {
                    self.retire(frame.audio);
                }
            }
            self.staging = staging;
        }

        apply_gain(&mut out[..written], self.info.format, self.volume.gain());
        out[written..].fill(0);

        if written > 0 {
            let samples = (written / frame_bytes) as u64;
            self.playhead.commit(epoch, samples, self.time.now());
        }
        CallbackStatus::Continue
    }

    /// Move enough current-epoch blocks to cover `needed` bytes out of the
    /// queue. Blocks from older epochs are staged too and retired after the
    /// lock is released. A block from a newer epoch stays queued for the
    /// callback that observes that epoch.
    fn stage(&mut self, epoch: u64, needed: usize) {
        let mut staged = 0;
        let mut queues = lock_queues(&self.queues);
        while staged < needed && self.staging.len() < self.staging.capacity() {
            match queues.audio.peek() {
                Some(frame) if frame.epoch > epoch => break,
                Some(_) => {}
                None => break,
            }
            if let Some(frame) = queues.audio.pop() {
                if frame.epoch == epoch {
                    staged += frame.audio.as_bytes().len();
                }
                self.staging.push(frame);
            }
        }
    }

    /// Bytes held back from the previous callback
    pub fn carryover_bytes(&self) -> usize {
        self.carryover.as_ref().map_or(0, |c| c.remaining().len())
    }
}

fn copy_into(src: &[u8], dst: &mut [u8]) -> usize {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}
