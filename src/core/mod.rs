//! Core types for the playback engine.
//!
//! Frame numbering, rational rates and time sources, observable values and
//! the polled timers that drive the tick loop.

pub mod frame;
pub mod observable;
pub mod time;
pub mod timer;

pub use frame::{FrameNumber, Range, Sequence, INVALID};
pub use observable::{ListSubject, ObserverId, ValueSubject};
pub use time::{Rational, SharedTime, Speed, TimeSource, WallClock};
pub use timer::Timer;
