//! Membership tracking
//!
//! Turns relay roster messages into discovery/departure events and decides
//! which side of each pair initiates negotiation.
//!
//! A newcomer learns about everyone already present from its `register`
//! snapshot and waits to be called. Members already present learn about the
//! newcomer through `new-user` and send the offer. Both sides can still end
//! up offering when two participants join at nearly the same time; that race
//! is settled by [`local_offer_wins`].

use crate::participant::ParticipantId;
use crate::signaling::protocol::{Payload, Roster};
use std::collections::BTreeSet;
use tracing::debug;

/// Who sends the first offer toward a newly discovered participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We were already present; we initiate
    Offerer,
    /// We are the newcomer; the remote initiates
    Answerer,
}

/// Membership change derived from a roster message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Discovered {
        participant: ParticipantId,
        role: Role,
    },
    Departed {
        participant: ParticipantId,
    },
}

/// Glare rule: when both sides have an offer outstanding, the offer from the
/// lexicographically smaller id survives.
pub fn local_offer_wins(local: &ParticipantId, remote: &ParticipantId) -> bool {
    local < remote
}

/// Live set of remote participants
#[derive(Debug)]
pub struct MembershipTracker {
    local_id: ParticipantId,
    members: BTreeSet<ParticipantId>,
}

impl MembershipTracker {
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            members: BTreeSet::new(),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Apply a roster payload; non-roster payloads yield nothing
    ///
    /// Repeated messages are idempotent: a participant is discovered once and
    /// departs once.
    pub fn apply(&mut self, payload: &Payload) -> Vec<MembershipEvent> {
        match payload {
            Payload::RosterSnapshot(roster) => self.apply_snapshot(roster),
            Payload::RosterAdd(roster) => self.apply_delta(roster, Role::Offerer),
            // Entries still flagged present did not leave
            Payload::RosterRemove(roster) => roster
                .absent()
                .filter_map(|id| self.depart(id))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn apply_snapshot(&mut self, roster: &Roster) -> Vec<MembershipEvent> {
        // Anyone we knew who is no longer listed as present has left
        let stale: Vec<_> = self
            .members
            .iter()
            .filter(|id| !roster.is_present(id))
            .cloned()
            .collect();

        let mut events: Vec<_> = stale.iter().filter_map(|id| self.depart(id)).collect();
        events.extend(
            roster
                .present()
                .filter_map(|id| self.discover(id, Role::Answerer)),
        );
        events
    }

    fn apply_delta(&mut self, roster: &Roster, role: Role) -> Vec<MembershipEvent> {
        let mut events = Vec::new();
        for (id, present) in &roster.0 {
            let event = if *present {
                self.discover(id, role)
            } else {
                self.depart(id)
            };
            events.extend(event);
        }
        events
    }

    fn discover(&mut self, id: &ParticipantId, role: Role) -> Option<MembershipEvent> {
        if *id == self.local_id || !self.members.insert(id.clone()) {
            return None;
        }
        debug!(peer_id = %id, ?role, "Participant discovered");
        Some(MembershipEvent::Discovered {
            participant: id.clone(),
            role,
        })
    }

    fn depart(&mut self, id: &ParticipantId) -> Option<MembershipEvent> {
        if !self.members.remove(id) {
            return None;
        }
        debug!(peer_id = %id, "Participant departed");
        Some(MembershipEvent::Departed {
            participant: id.clone(),
        })
    }

    /// Drop a participant without emitting an event (terminal connectivity
    /// failure). A later roster add discovers it again.
    pub fn forget(&mut self, id: &ParticipantId) -> bool {
        self.members.remove(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.members.contains(id)
    }

    pub fn members(&self) -> Vec<ParticipantId> {
        self.members.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
