pub mod bridge;
pub mod buffer;
pub mod device;
#[cfg(feature = "cpal")]
pub mod output;
pub mod playhead;

pub use bridge::{AudioBridge, CallbackStatus, VolumeControl};
pub use buffer::{AudioBuffer, AudioInfo, SampleFormat};
pub use device::{AudioCallback, AudioDevice, AudioError, StreamParams};
#[cfg(feature = "cpal")]
pub use output::CpalOutput;
pub use playhead::{Playhead, PlayheadSnapshot};
