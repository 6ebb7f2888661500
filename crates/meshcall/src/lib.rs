//! Full-mesh video conferencing client
//!
//! Every participant holds one WebRTC peer connection to every other
//! participant. A relay server only forwards signaling messages (roster
//! updates, session descriptions, ICE candidates); media flows directly
//! between peers.
//!
//! # Features
//!
//! - **Relay signaling**: JSON envelopes over a single WebSocket
//! - **Per-peer state machine**: offer/answer, glare resolution, candidate
//!   queueing, isolated teardown
//! - **Media lifecycle**: single-flight capture, mid-call track addition with
//!   renegotiation, remote stream map keyed by participant
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  SessionHandle (cloneable, any task)                 │
//! │  ↓ commands                                          │
//! │  Session loop (single task)                          │
//! │  ├─ SignalingChannel (WebSocket to relay)            │
//! │  ├─ MembershipTracker (roster → join/leave)          │
//! │  ├─ PeerConnectionManager                            │
//! │  │   └─ PeerConnectionRecord per remote participant  │
//! │  │       └─ PeerBackend (webrtc-rs)                  │
//! │  ├─ LocalMediaSource (camera/microphone)             │
//! │  └─ RemoteStreamRegistry (participant → stream)      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use meshcall::SessionConfig;
//!
//! let config = SessionConfig {
//!     relay_url: "ws://localhost:8080/ws".to_string(),
//!     max_peers: 6,
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use meshcall::{Session, SessionConfig, SyntheticDevices, WebRtcConnector};
//! use std::sync::Arc;
//!
//! # async fn example() -> meshcall::Result<()> {
//! let config = SessionConfig::new("ws://localhost:8080/ws").with_participant_id("alice");
//! let connector = Arc::new(WebRtcConnector::from_config(&config));
//!
//! let session = Session::join(config, Arc::new(SyntheticDevices), connector).await?;
//! let mut events = session.subscribe();
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//!
//! session.leave().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod membership;
pub mod participant;
pub mod peer;
pub mod session;
pub mod signaling;

// Re-exports for public API
pub use config::{SessionConfig, TurnServerConfig};
pub use error::{Error, MediaAccessError, Result};
pub use media::{
    LocalMediaSource, LocalStream, LocalTrack, MediaConstraints, MediaDevices, RemoteStream,
    RemoteStreamMap, RemoteTrack, SyntheticDevices, TrackKind,
};
pub use participant::ParticipantId;
pub use peer::{
    PeerBackend, PeerConnectionManager, PeerConnector, PeerInfo, PeerOptions, PeerState,
    WebRtcConnector,
};
pub use session::{Session, SessionEvent, SessionHandle, SessionState};
pub use signaling::{SignalingChannel, SignalingEnvelope};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
