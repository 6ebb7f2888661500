//! Relay wire protocol
//!
//! JSON text frames shaped as
//!
//! ```text
//! { type: "register" | "new-user" | "user-left" | "videochat",
//!   clients?: { [participantId]: boolean },
//!   data?: { offer?, answer?, iceCandidate? },
//!   to?: participantId, from?: participantId }
//! ```
//!
//! [`WireEnvelope`] mirrors the frame one-to-one; [`SignalingEnvelope`] is the
//! typed view the rest of the crate works with.

use crate::participant::ParticipantId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Envelope `type` discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    /// Roster snapshot sent to a newcomer
    Register,
    /// Incremental roster add
    NewUser,
    /// Incremental roster remove
    UserLeft,
    /// Offer/answer/candidate relayed between two participants
    Videochat,
    /// Anything else the relay multiplexes on the same socket (e.g. chat)
    #[serde(other)]
    Unsupported,
}

/// Session description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description, passed through verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,

    /// Opaque SDP blob
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap an SDP offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Wrap an SDP answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate init dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the m-line the candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Relay roster: participant id to liveness (`true` = present)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(pub BTreeMap<ParticipantId, bool>);

impl Roster {
    /// Roster listing `ids` with the given liveness
    pub fn with(ids: impl IntoIterator<Item = ParticipantId>, present: bool) -> Self {
        Self(ids.into_iter().map(|id| (id, present)).collect())
    }

    /// Ids flagged present
    pub fn present(&self) -> impl Iterator<Item = &ParticipantId> {
        self.0.iter().filter(|(_, live)| **live).map(|(id, _)| id)
    }

    /// Ids flagged absent
    pub fn absent(&self) -> impl Iterator<Item = &ParticipantId> {
        self.0.iter().filter(|(_, live)| !**live).map(|(id, _)| id)
    }

    /// Whether `id` is listed and present
    pub fn is_present(&self, id: &ParticipantId) -> bool {
        self.0.get(id).copied().unwrap_or(false)
    }
}

/// `data` member of a `videochat` frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,

    #[serde(
        rename = "iceCandidate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ice_candidate: Option<IceCandidate>,

    /// Relays that wrap the original message keep the sender in here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ParticipantId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ParticipantId>,
}

/// Frame exactly as it travels over the socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Roster>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NegotiationData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ParticipantId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ParticipantId>,
}

/// Typed envelope payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    RosterSnapshot(Roster),
    RosterAdd(Roster),
    RosterRemove(Roster),
}

impl Payload {
    /// Wire discriminator for this payload
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Payload::Offer(_) | Payload::Answer(_) | Payload::IceCandidate(_) => {
                EnvelopeKind::Videochat
            }
            Payload::RosterSnapshot(_) => EnvelopeKind::Register,
            Payload::RosterAdd(_) => EnvelopeKind::NewUser,
            Payload::RosterRemove(_) => EnvelopeKind::UserLeft,
        }
    }

    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            Payload::Offer(_) => "offer",
            Payload::Answer(_) => "answer",
            Payload::IceCandidate(_) => "ice-candidate",
            Payload::RosterSnapshot(_) => "roster-snapshot",
            Payload::RosterAdd(_) => "roster-add",
            Payload::RosterRemove(_) => "roster-remove",
        }
    }
}

/// Typed signaling envelope `{type, from, to, payload}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingEnvelope {
    pub from: Option<ParticipantId>,
    pub to: Option<ParticipantId>,
    pub payload: Payload,
}

impl SignalingEnvelope {
    /// Offer addressed from `from` to `to`
    pub fn offer(from: &ParticipantId, to: &ParticipantId, sdp: SessionDescription) -> Self {
        Self::directed(from, to, Payload::Offer(sdp))
    }

    /// Answer addressed from `from` to `to`
    pub fn answer(from: &ParticipantId, to: &ParticipantId, sdp: SessionDescription) -> Self {
        Self::directed(from, to, Payload::Answer(sdp))
    }

    /// ICE candidate addressed from `from` to `to`
    pub fn ice_candidate(from: &ParticipantId, to: &ParticipantId, candidate: IceCandidate) -> Self {
        Self::directed(from, to, Payload::IceCandidate(candidate))
    }

    /// Relay-originated roster message
    pub fn roster(payload: Payload) -> Self {
        Self {
            from: None,
            to: None,
            payload,
        }
    }

    fn directed(from: &ParticipantId, to: &ParticipantId, payload: Payload) -> Self {
        Self {
            from: Some(from.clone()),
            to: Some(to.clone()),
            payload,
        }
    }

    /// Wire discriminator
    pub fn kind(&self) -> EnvelopeKind {
        self.payload.kind()
    }

    /// Convert envelope to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&WireEnvelope::from(self.clone()))?)
    }

    /// Parse envelope from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_str(json)?;
        Self::try_from(wire)
    }
}

impl From<SignalingEnvelope> for WireEnvelope {
    fn from(envelope: SignalingEnvelope) -> Self {
        let kind = envelope.kind();
        let mut wire = WireEnvelope {
            kind,
            clients: None,
            data: None,
            to: envelope.to,
            from: envelope.from,
        };

        match envelope.payload {
            Payload::Offer(sdp) => {
                wire.data = Some(NegotiationData {
                    offer: Some(sdp),
                    ..Default::default()
                })
            }
            Payload::Answer(sdp) => {
                wire.data = Some(NegotiationData {
                    answer: Some(sdp),
                    ..Default::default()
                })
            }
            Payload::IceCandidate(candidate) => {
                wire.data = Some(NegotiationData {
                    ice_candidate: Some(candidate),
                    ..Default::default()
                })
            }
            Payload::RosterSnapshot(roster)
            | Payload::RosterAdd(roster)
            | Payload::RosterRemove(roster) => wire.clients = Some(roster),
        }

        wire
    }
}

impl TryFrom<WireEnvelope> for SignalingEnvelope {
    type Error = Error;

    fn try_from(wire: WireEnvelope) -> Result<Self> {
        let roster = || wire.clients.clone().unwrap_or_default();

        let payload = match wire.kind {
            EnvelopeKind::Register => Payload::RosterSnapshot(roster()),
            EnvelopeKind::NewUser => Payload::RosterAdd(roster()),
            EnvelopeKind::UserLeft => Payload::RosterRemove(roster()),
            EnvelopeKind::Videochat => {
                let data = wire.data.ok_or_else(|| {
                    Error::InvalidMessage("videochat frame without data".to_string())
                })?;

                let from = wire.from.or(data.from);
                let to = wire.to.or(data.to);

                let payload = if let Some(offer) = data.offer {
                    Payload::Offer(offer)
                } else if let Some(answer) = data.answer {
                    Payload::Answer(answer)
                } else if let Some(candidate) = data.ice_candidate {
                    Payload::IceCandidate(candidate)
                } else {
                    return Err(Error::InvalidMessage(
                        "videochat frame carries no offer, answer or candidate".to_string(),
                    ));
                };

                return Ok(Self { from, to, payload });
            }
            EnvelopeKind::Unsupported => {
                return Err(Error::InvalidMessage(
                    "unsupported envelope type".to_string(),
                ))
            }
        };

        Ok(Self {
            from: wire.from,
            to: wire.to,
            payload,
        })
    }
}
