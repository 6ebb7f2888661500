//! Error types for the conferencing client

use crate::media::TrackKind;
use crate::participant::ParticipantId;
use crate::peer::PeerState;

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a conferencing session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local capture could not be acquired; the session does not proceed
    #[error("Media access error: {0}")]
    MediaAccess(#[from] MediaAccessError),

    /// Signaling channel connect or send failure
    #[error("Signaling channel error: {0}")]
    SignalingChannel(String),

    /// Malformed or mismatched session description for one peer
    #[error("Negotiation with {participant} failed: {reason}")]
    Negotiation {
        /// Remote participant whose connection was torn down
        participant: ParticipantId,
        /// Human-readable cause
        reason: String,
    },

    /// Terminal connectivity-check failure for one peer
    #[error("Connectivity to {0} failed")]
    ConnectivityFailure(ParticipantId),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling frame that could not be decoded or routed
    #[error("Invalid signaling message: {0}")]
    InvalidMessage(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(ParticipantId),

    /// Mesh is already at its configured size
    #[error("Maximum peer limit reached ({0})")]
    PeerLimit(usize),

    /// State machine asked to take an edge it does not have
    #[error("Invalid state transition for {participant}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Remote participant of the record
        participant: ParticipantId,
        /// State the record was in
        from: PeerState,
        /// Requested state
        to: PeerState,
    },

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Build a negotiation error for `participant`
    pub fn negotiation(participant: &ParticipantId, reason: impl std::fmt::Display) -> Self {
        Error::Negotiation {
            participant: participant.clone(),
            reason: reason.to_string(),
        }
    }

    /// Failures that only affect a single remote participant
    pub fn is_peer_scoped(&self) -> bool {
        matches!(
            self,
            Error::Negotiation { .. }
                | Error::ConnectivityFailure(_)
                | Error::PeerNotFound(_)
                | Error::InvalidTransition { .. }
        )
    }

    /// Failures that end the whole session
    pub fn is_session_scoped(&self) -> bool {
        matches!(self, Error::MediaAccess(_) | Error::SignalingChannel(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Remote participant a peer-scoped error refers to
    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            Error::Negotiation { participant, .. } => Some(participant),
            Error::InvalidTransition { participant, .. } => Some(participant),
            Error::ConnectivityFailure(participant) | Error::PeerNotFound(participant) => {
                Some(participant)
            }
            _ => None,
        }
    }
}

/// Local capture failures
///
/// `Clone` because a single in-flight capture request hands its outcome to
/// every caller that collapsed onto it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaAccessError {
    /// The user or platform refused access
    #[error("permission denied")]
    PermissionDenied,

    /// No capture device of the requested kind exists
    #[error("no {0} device available")]
    NoDevice(TrackKind),

    /// The device exists but another process holds it
    #[error("device busy")]
    DeviceBusy,

    /// Capture was released while the request was still in flight
    #[error("capture released before the request completed")]
    Released,

    /// Device-specific failure
    #[error("device error: {0}")]
    Device(String),
}
