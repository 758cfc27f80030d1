//! Stream metadata reported by a decoder when a source is opened.

use std::time::Duration;
use crate::audio::buffer::AudioInfo;
use crate::core::frame::Sequence;
use crate::core::time::Speed;

/// Information shared by video and audio streams
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamInfo {
    pub index: usize,
    pub name: String,
    pub codec_name: String,
    pub duration: Duration,
}

/// Video stream (one "layer" of the source)
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    pub stream_info: StreamInfo,
    pub width: u32,
    pub height: u32,
    pub speed: Speed,
    pub sequence: Sequence,
}

/// Audio stream
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamInfo {
    pub stream_info: StreamInfo,
    pub info: AudioInfo,
}

/// Everything known about an opened source
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaInfo {
    pub video: Vec<VideoStreamInfo>,
    pub audio: Vec<AudioStreamInfo>,
}

impl MediaInfo {
    pub fn first_video(&self) -> Option<&VideoStreamInfo> {
        self.video.first()
    }

    /// First audio stream with a usable descriptor
    pub fn first_audio(&self) -> Option<&AudioStreamInfo> {
        self.audio.iter().find(|a| a.info.is_valid())
    }
}
