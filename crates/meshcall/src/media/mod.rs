//! Local capture and inbound remote media

pub mod local;
pub mod remote;

pub use local::{LocalMediaSource, LocalStream, LocalTrack, MediaDevices, SyntheticDevices};
pub use remote::{RemoteStream, RemoteStreamMap, RemoteStreamRegistry, RemoteTrack};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// What to capture when acquiring local media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    /// Request a microphone track
    pub audio: bool,

    /// Request a camera track
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl MediaConstraints {
    /// Kinds requested, audio first
    pub fn kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio {
            kinds.push(TrackKind::Audio);
        }
        if self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }
}
