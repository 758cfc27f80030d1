pub mod decoder;
pub mod frame_cache;
pub mod pattern;
pub mod queue;
pub mod stream_info;

pub use decoder::{
    AudioFrame, Decoder, DecodeError, Direction, Image, ImageHandle, MediaOpener, ReadOptions,
    SourceOpener, VideoFrame,
};
pub use frame_cache::FrameCache;
pub use pattern::PatternDecoder;
pub use queue::{FrameQueue, MediaQueues, QueueFull, SharedQueues};
pub use stream_info::{AudioStreamInfo, MediaInfo, StreamInfo, VideoStreamInfo};
