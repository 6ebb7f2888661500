//! Media-negotiation capability seam
//!
//! The manager never talks to a WebRTC stack directly. It asks a
//! [`PeerConnector`] for one [`PeerBackend`] per remote participant and
//! receives the backend's callbacks as [`PeerEvent`]s on a channel, tagged with
//! the [`Generation`] of the record they belong to.

use crate::media::{LocalTrack, RemoteTrack};
use crate::participant::ParticipantId;
use crate::signaling::protocol::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connectivity-check state reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Identity of one incarnation of a peer connection record
///
/// A record created again for the same participant gets a new generation, so
/// callbacks from the old backend are recognised and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// What happened
#[derive(Debug, Clone)]
pub enum PeerEventKind {
    /// Local ICE candidate ready to send to the remote
    CandidateGathered(IceCandidate),

    /// Remote media track arrived
    TrackReceived(RemoteTrack),

    /// Connectivity check changed state
    Connectivity(ConnectivityState),

    /// Negotiation timer fired; carries the attempt it was armed for
    NegotiationTimeout(u64),
}

/// Backend callback, routed through the session's event queue
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub remote_id: ParticipantId,
    pub generation: Generation,
    pub kind: PeerEventKind,
}

/// Handle a backend uses to report callbacks
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    remote_id: ParticipantId,
    generation: Generation,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(
        remote_id: ParticipantId,
        generation: Generation,
        tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            remote_id,
            generation,
            tx,
        }
    }

    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Post an event; returns `false` once the manager is gone
    pub fn emit(&self, kind: PeerEventKind) -> bool {
        self.tx
            .send(PeerEvent {
                remote_id: self.remote_id.clone(),
                generation: self.generation,
                kind,
            })
            .is_ok()
    }

    pub fn candidate(&self, candidate: IceCandidate) -> bool {
        self.emit(PeerEventKind::CandidateGathered(candidate))
    }

    pub fn track(&self, track: RemoteTrack) -> bool {
        self.emit(PeerEventKind::TrackReceived(track))
    }

    pub fn connectivity(&self, state: ConnectivityState) -> bool {
        self.emit(PeerEventKind::Connectivity(state))
    }
}

/// Creates one backend per remote participant
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Build a fresh connection toward `remote_id`; callbacks go to `sink`
    async fn create(
        &self,
        remote_id: &ParticipantId,
        sink: PeerEventSink,
    ) -> Result<Box<dyn PeerBackend>>;
}

/// One underlying peer connection
///
/// Session descriptions are opaque: the backend produces and consumes them,
/// the manager only routes them.
#[async_trait]
pub trait PeerBackend: Send + Sync {
    /// Start sending `track`; the track object is shared, never copied
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Discard the outstanding local offer
    async fn rollback(&self) -> Result<()>;

    /// Release every resource; must tolerate repeated calls
    async fn close(&self) -> Result<()>;
}
