//! Peer connection management
//!
//! One record per remote participant, its negotiation state machine, and the
//! WebRTC backend behind it.

pub mod backend;
pub mod connection;
pub mod manager;
pub mod record;

pub use backend::{
    ConnectivityState, Generation, PeerBackend, PeerConnector, PeerEvent, PeerEventKind,
    PeerEventSink,
};
pub use connection::{WebRtcConnector, WebRtcPeer};
pub use manager::{PeerConnectionManager, PeerInfo, PeerOptions};
pub use record::{PeerConnectionRecord, PeerState, PendingCandidates};
