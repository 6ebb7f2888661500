//! Per-remote-participant connection record and its state machine

use super::backend::{ConnectivityState, Generation, PeerBackend};
use crate::media::RemoteStream;
use crate::participant::ParticipantId;
use crate::signaling::protocol::{IceCandidate, SessionDescription};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::time::Instant;
use tokio::task::AbortHandle;
use tracing::debug;

/// Connection state of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerState {
    /// Record exists, nothing negotiated yet
    Idle,
    /// Local offer generated and set as local description
    OfferCreated,
    /// Local offer handed to the signaling channel
    OfferSent,
    /// Remote description applied, waiting for connectivity
    Negotiating,
    Connected,
    /// Transient connectivity loss; may recover
    Disconnected,
    /// Connectivity checks failed (terminal)
    Failed,
    /// Explicit teardown (terminal)
    Closed,
}

impl PeerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerState::Failed | PeerState::Closed)
    }

    /// A local offer is outstanding
    pub fn has_local_offer(self) -> bool {
        matches!(self, PeerState::OfferCreated | PeerState::OfferSent)
    }

    /// An offer/answer exchange has started but not settled
    pub fn is_negotiating(self) -> bool {
        matches!(
            self,
            PeerState::OfferCreated | PeerState::OfferSent | PeerState::Negotiating
        )
    }

    /// Edges of the state machine
    pub fn can_transition_to(self, next: PeerState) -> bool {
        use PeerState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Closed) | (_, Disconnected) => true,
            (Idle, OfferCreated) | (Idle, Negotiating) => true,
            (OfferCreated, OfferSent) => true,
            (OfferSent, Negotiating) => true,
            (Negotiating, Connected) | (Disconnected, Connected) => true,
            // Renegotiation from an established connection
            (Connected, OfferCreated) | (Connected, Negotiating) => true,
            (Disconnected, Negotiating) | (Disconnected, OfferCreated) => true,
            // Glare rollback
            (OfferCreated, Idle) | (OfferSent, Idle) => true,
            (OfferCreated, Connected) | (OfferSent, Connected) => true,
            (Idle, Failed) => false,
            (_, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeerState::Idle => "idle",
            PeerState::OfferCreated => "offer-created",
            PeerState::OfferSent => "offer-sent",
            PeerState::Negotiating => "negotiating",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Bounded FIFO of remote candidates waiting for the remote description
#[derive(Debug)]
pub struct PendingCandidates {
    queue: VecDeque<IceCandidate>,
    cap: usize,
}

impl PendingCandidates {
    pub fn new(cap: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// Append; returns the oldest candidate if it had to make room
    pub fn push(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        let dropped = if self.queue.len() >= self.cap {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(candidate);
        dropped
    }

    /// Take everything in arrival order
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    /// Move `other`'s candidates behind ours, keeping the cap
    pub fn append(&mut self, other: &mut PendingCandidates) -> usize {
        let mut dropped = 0;
        for candidate in other.drain() {
            if self.push(candidate).is_some() {
                dropped += 1;
            }
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// Everything the manager knows about one remote participant
pub struct PeerConnectionRecord {
    pub(crate) remote_id: ParticipantId,
    pub(crate) state: PeerState,
    pub(crate) generation: Generation,
    pub(crate) backend: Box<dyn PeerBackend>,

    pub(crate) local_description_set: bool,
    pub(crate) remote_description_set: bool,
    pub(crate) pending_candidates: PendingCandidates,

    /// Ids of local tracks already handed to the backend
    pub(crate) attached: HashSet<String>,

    /// Latest connectivity report, independent of the negotiation state
    pub(crate) connectivity: ConnectivityState,

    /// A local track was added mid-negotiation; re-offer once connected
    pub(crate) renegotiation_needed: bool,

    /// Outstanding local offer (kept for resending after a send failure)
    pub(crate) local_offer: Option<SessionDescription>,

    /// State to return to if the outstanding offer is rolled back
    pub(crate) rollback_to: Option<PeerState>,

    /// Last remote offer applied, for duplicate detection
    pub(crate) last_remote_offer: Option<String>,

    /// Inbound tracks assembled into one stream
    pub(crate) inbound: Option<RemoteStream>,

    /// We sent the first offer on this record
    pub(crate) initiator: bool,

    pub(crate) created_at: Instant,
    pub(crate) connected_at: Option<Instant>,

    /// Bumped each time a negotiation timer is armed
    pub(crate) negotiation_attempt: u64,
    pub(crate) timer: Option<AbortHandle>,
}

impl PeerConnectionRecord {
    pub fn new(
        remote_id: ParticipantId,
        generation: Generation,
        backend: Box<dyn PeerBackend>,
        candidate_cap: usize,
    ) -> Self {
        Self {
            remote_id,
            state: PeerState::Idle,
            generation,
            backend,
            local_description_set: false,
            remote_description_set: false,
            pending_candidates: PendingCandidates::new(candidate_cap),
            attached: HashSet::new(),
            connectivity: ConnectivityState::New,
            renegotiation_needed: false,
            local_offer: None,
            rollback_to: None,
            last_remote_offer: None,
            inbound: None,
            initiator: false,
            created_at: Instant::now(),
            connected_at: None,
            negotiation_attempt: 0,
            timer: None,
        }
    }

    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Move to `next`
    ///
    /// Returns the previous state when the state changed, `None` for a
    /// same-state request.
    pub fn transition(&mut self, next: PeerState) -> Result<Option<PeerState>> {
        let from = self.state;
        if from == next {
            return Ok(None);
        }

        if !from.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                participant: self.remote_id.clone(),
                from,
                to: next,
            });
        }

        debug!(peer_id = %self.remote_id, %from, to = %next, "Peer state transition");
        self.state = next;

        if next == PeerState::Connected && self.connected_at.is_none() {
            self.connected_at = Some(Instant::now());
        }
        if next.is_terminal() {
            self.cancel_timer();
        }

        Ok(Some(from))
    }

    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for PeerConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionRecord")
            .field("remote_id", &self.remote_id)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("local_description_set", &self.local_description_set)
            .field("remote_description_set", &self.remote_description_set)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("connectivity", &self.connectivity)
            .finish_non_exhaustive()
    }
}

impl Drop for PeerConnectionRecord {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
