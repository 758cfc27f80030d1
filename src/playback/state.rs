//! Playback state and boundary policy.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::decode::decoder::Direction;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    #[default]
    Stop,
    Forward,
    Reverse,
}

impl PlaybackState {
    pub fn is_playing(self) -> bool {
        self != PlaybackState::Stop
    }

    /// Read direction while playing
    pub fn direction(self) -> Option<Direction> {
        match self {
            PlaybackState::Stop => None,
            PlaybackState::Forward => Some(Direction::Forward),
            PlaybackState::Reverse => Some(Direction::Reverse),
        }
    }

    /// Forward and Reverse swapped; Stop stays Stop
    pub fn flipped(self) -> Self {
        match self {
            PlaybackState::Stop => PlaybackState::Stop,
            PlaybackState::Forward => PlaybackState::Reverse,
            PlaybackState::Reverse => PlaybackState::Forward,
        }
    }
}

impl From<Direction> for PlaybackState {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Forward => PlaybackState::Forward,
            Direction::Reverse => PlaybackState::Reverse,
        }
    }
}

/// What happens when playback reaches the start or end of the active range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    Once,
    #[default]
    Loop,
    #[serde(rename = "pingpong")]
    PingPong,
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackMode::Once => "once",
            PlaybackMode::Loop => "loop",
            PlaybackMode::PingPong => "pingpong",
        };
        f.write_str(name)
    }
}

impl FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "once" => Ok(PlaybackMode::Once),
            "loop" => Ok(PlaybackMode::Loop),
            "pingpong" | "ping-pong" => Ok(PlaybackMode::PingPong),
            other => Err(format!("unknown playback mode: {}", other)),
        }
    }
}
