//! Bounded frame queues shared between the decoder and the playback consumers.
//!
//! The video and audio queues live behind a single mutex (`SharedQueues`):
//! the decoder pushes into both, the tick loop drains video and the audio
//! bridge drains audio. `FrameQueue` itself is not synchronized.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use crate::decode::decoder::{AudioFrame, VideoFrame};

/// Push against a full queue. The rejected item is handed back.
pub struct QueueFull<T> {
    pub item: T,
    pub max: usize,
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFull").field("max", &self.max).finish()
    }
}

impl<T> fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full ({} items)", self.max)
    }
}

impl<T> std::error::Error for QueueFull<T> {}

/// FIFO with a fixed capacity
#[derive(Debug, Clone)]
pub struct FrameQueue<T> {
    max: usize,
    items: VecDeque<T>,
}

impl<T> FrameQueue<T> {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            items: VecDeque::with_capacity(max),
        }
    }

    /// Capacity
    pub fn max(&self) -> usize {
        self.max
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max
    }

    /// Append an item. Fails fast when the queue is at capacity; the decoder
    /// is responsible for never exceeding it.
    pub fn push(&mut self, item: T) -> Result<(), QueueFull<T>> {
        if self.is_full() {
            return Err(QueueFull { item, max: self.max });
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove and return the oldest item
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Oldest item, without removing it
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// The video and audio queues of one opened source
#[derive(Debug)]
pub struct MediaQueues {
    pub video: FrameQueue<VideoFrame>,
    pub audio: FrameQueue<AudioFrame>,
}

impl MediaQueues {
    pub fn new(video_max: usize, audio_max: usize) -> Self {
        Self {
            video: FrameQueue::new(video_max),
            audio: FrameQueue::new(audio_max),
        }
    }

    pub fn clear(&mut self) {
        self.video.clear();
        self.audio.clear();
    }
}

/// Queue pair guarded by the one shared mutex
pub type SharedQueues = Arc<Mutex<MediaQueues>>;

pub fn shared_queues(video_max: usize, audio_max: usize) -> SharedQueues {
    Arc::new(Mutex::new(MediaQueues::new(video_max, audio_max)))
}

/// Lock the queue pair. A panicked holder does not leave the queues in a
/// torn state, so poisoning is ignored.
pub fn lock_queues(queues: &SharedQueues) -> MutexGuard<'_, MediaQueues> {
    queues.lock().unwrap_or_else(PoisonError::into_inner)
}
