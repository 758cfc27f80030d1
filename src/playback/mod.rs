pub mod cache;
pub mod clock;
pub mod engine;
pub mod seek;
pub mod speed;
pub mod state;

pub use cache::CacheSurface;
pub use clock::{AudioTimeBase, ClockSnapshot};
pub use engine::{EngineError, Observables, PlaybackCommand, PlaybackEngine};
pub use seek::{Position, SeekController};
pub use speed::RealSpeedEstimator;
pub use state::{PlaybackMode, PlaybackState};
