//! Media file decoding.

pub mod ffmpeg;

pub use ffmpeg::FfmpegDecoder;
