//! Peer connection management
//!
//! [`PeerConnectionManager`] owns one [`PeerConnectionRecord`] per remote
//! participant and drives it through offer/answer, candidate exchange and
//! teardown. It is not shared: the session loop holds it by value and feeds it
//! signaling envelopes, roster decisions and backend events one at a time, so
//! every step for a given peer completes before the next one starts.

use super::backend::{
    ConnectivityState, Generation, PeerConnector, PeerEvent, PeerEventKind, PeerEventSink,
};
use super::record::{PeerConnectionRecord, PeerState, PendingCandidates};
use crate::media::{LocalTrack, RemoteStream, RemoteStreamRegistry, RemoteTrack};
use crate::membership::local_offer_wins;
use crate::participant::ParticipantId;
use crate::session::SessionEvent;
use crate::signaling::channel::SignalingSender;
use crate::signaling::protocol::{IceCandidate, Payload, SessionDescription, SignalingEnvelope};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Tunables for the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerOptions {
    /// Maximum number of simultaneous records
    pub max_peers: usize,

    /// Cap of each pending-candidate queue; oldest dropped beyond it
    pub candidate_queue_cap: usize,

    /// Keep candidates that arrive before any record exists for their sender
    pub buffer_orphan_candidates: bool,

    /// Tear down records still negotiating after this long
    pub negotiation_timeout: Option<Duration>,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            max_peers: 10,
            candidate_queue_cap: 100,
            buffer_orphan_candidates: false,
            negotiation_timeout: None,
        }
    }
}

/// Information about one peer
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    /// Remote participant
    pub participant_id: ParticipantId,

    /// Connection state
    pub state: PeerState,

    /// We sent the first offer
    pub initiator: bool,

    /// Time since the connection first reached `Connected`
    pub connected_for: Option<Duration>,

    /// Remote candidates waiting for the remote description
    pub pending_candidates: usize,
}

/// Manages the full mesh of peer connections
pub struct PeerConnectionManager {
    local_id: ParticipantId,
    connector: Arc<dyn PeerConnector>,
    signaling: SignalingSender,
    registry: Arc<RemoteStreamRegistry>,
    observer: broadcast::Sender<SessionEvent>,
    options: PeerOptions,

    /// Tracks every new record starts with
    local_tracks: Vec<Arc<LocalTrack>>,

    records: HashMap<ParticipantId, PeerConnectionRecord>,

    /// Candidates received before their sender's record existed
    orphans: HashMap<ParticipantId, PendingCandidates>,

    next_generation: u64,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerConnectionManager {
    /// Create a manager
    ///
    /// Returns the receiver on which backend callbacks arrive; the caller
    /// feeds them back through [`handle_peer_event`](Self::handle_peer_event).
    pub fn new(
        local_id: ParticipantId,
        connector: Arc<dyn PeerConnector>,
        signaling: SignalingSender,
        registry: Arc<RemoteStreamRegistry>,
        observer: broadcast::Sender<SessionEvent>,
        options: PeerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let manager = Self {
            local_id,
            connector,
            signaling,
            registry,
            observer,
            options,
            local_tracks: Vec::new(),
            records: HashMap::new(),
            orphans: HashMap::new(),
            next_generation: 0,
            events_tx,
        };

        (manager, events_rx)
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Tracks attached to every record created from now on
    pub fn set_local_tracks(&mut self, tracks: Vec<Arc<LocalTrack>>) {
        self.local_tracks = tracks;
    }

    pub fn local_tracks(&self) -> &[Arc<LocalTrack>] {
        &self.local_tracks
    }

    /// Get or create the record for `remote`
    ///
    /// Idempotent: a second call returns the existing record's generation.
    /// A new record starts `Idle` with every current local track attached.
    pub async fn ensure_record(&mut self, remote: &ParticipantId) -> Result<Generation> {
        if *remote == self.local_id {
            return Err(Error::InvalidMessage(
                "cannot open a peer connection to ourselves".to_string(),
            ));
        }

        if let Some(record) = self.records.get(remote) {
            return Ok(record.generation);
        }

        if self.records.len() >= self.options.max_peers {
            return Err(Error::PeerLimit(self.options.max_peers));
        }

        self.next_generation += 1;
        let generation = Generation::new(self.next_generation);
        let sink = PeerEventSink::new(remote.clone(), generation, self.events_tx.clone());

        let backend = self
            .connector
            .create(remote, sink)
            .await
            .map_err(|e| Error::negotiation(remote, e))?;

        let mut record = PeerConnectionRecord::new(
            remote.clone(),
            generation,
            backend,
            self.options.candidate_queue_cap,
        );

        if let Err(e) = attach_tracks(&mut record, &self.local_tracks).await {
            let _ = record.backend.close().await;
            return Err(e);
        }

        if let Some(mut orphans) = self.orphans.remove(remote) {
            debug!(
                peer_id = %remote,
                count = orphans.len(),
                "Moving buffered candidates into new record"
            );
            record.pending_candidates.append(&mut orphans);
        }

        info!(peer_id = %remote, %generation, "Peer connection record created");
        self.records.insert(remote.clone(), record);

        Ok(generation)
    }

    /// Send an offer toward `remote`
    ///
    /// Creates the record if needed. An offer still waiting to go out after a
    /// send failure is resent; a record already negotiating is left alone.
    /// This is also the explicit caller-driven retry.
    pub async fn initiate(&mut self, remote: &ParticipantId) -> Result<()> {
        self.ensure_record(remote).await?;

        let state = self.state_of(remote).unwrap_or(PeerState::Closed);
        match state {
            PeerState::Idle | PeerState::Connected | PeerState::Disconnected => {
                let result = self.send_offer(remote).await;
                self.guard(remote, result).await
            }
            PeerState::OfferCreated => self.transmit_offer(remote),
            _ => {
                debug!(peer_id = %remote, %state, "Offer not needed");
                Ok(())
            }
        }
    }

    /// Route one signaling envelope
    ///
    /// Roster payloads are not handled here.
    pub async fn handle_signal(&mut self, envelope: SignalingEnvelope) -> Result<()> {
        if let Some(to) = &envelope.to {
            if *to != self.local_id {
                debug!(to = %to, "Ignoring envelope addressed to someone else");
                return Ok(());
            }
        }

        let from = match (&envelope.payload, envelope.from) {
            (Payload::Offer(_) | Payload::Answer(_) | Payload::IceCandidate(_), None) => {
                return Err(Error::InvalidMessage(format!(
                    "{} envelope without sender",
                    envelope.payload.label()
                )));
            }
            (_, Some(from)) if from == self.local_id => {
                debug!("Ignoring envelope echoed back to us");
                return Ok(());
            }
            (_, from) => from,
        };

        match (envelope.payload, from) {
            (Payload::Offer(offer), Some(from)) => self.handle_offer(&from, offer).await,
            (Payload::Answer(answer), Some(from)) => self.handle_answer(&from, answer).await,
            (Payload::IceCandidate(candidate), Some(from)) => {
                self.handle_remote_candidate(&from, candidate).await
            }
            _ => Ok(()),
        }
    }

    /// Remote offer arrived
    pub async fn handle_offer(
        &mut self,
        remote: &ParticipantId,
        offer: SessionDescription,
    ) -> Result<()> {
        self.ensure_record(remote).await?;
        let result = self.answer_offer(remote, offer).await;
        self.guard(remote, result).await
    }

    async fn answer_offer(&mut self, remote: &ParticipantId, offer: SessionDescription) -> Result<()> {
        let record = record_in(&mut self.records, remote)?;

        if record.last_remote_offer.as_deref() == Some(offer.sdp.as_str())
            && !record.state.has_local_offer()
            && record.state != PeerState::Idle
        {
            debug!(peer_id = %remote, "Duplicate offer ignored");
            return Ok(());
        }

        if record.state.has_local_offer() {
            if local_offer_wins(&self.local_id, remote) {
                debug!(peer_id = %remote, "Glare: keeping our offer, ignoring theirs");
                return Ok(());
            }

            debug!(peer_id = %remote, "Glare: rolling back our offer to answer theirs");
            record
                .backend
                .rollback()
                .await
                .map_err(|e| Error::negotiation(remote, e))?;

            let back = record.rollback_to.take().unwrap_or(PeerState::Idle);
            if let Some(from) = record.transition(back)? {
                notify(&self.observer, remote, from, back);
            }
            record.local_offer = None;
            record.local_description_set = back != PeerState::Idle;
            // The discarded offer may have carried new tracks
            if back != PeerState::Idle {
                record.renegotiation_needed = true;
            }
        }

        if let Some(from) = record.transition(PeerState::Negotiating)? {
            notify(&self.observer, remote, from, PeerState::Negotiating);
        }
        record.last_remote_offer = Some(offer.sdp.clone());

        record
            .backend
            .set_remote_description(&offer)
            .await
            .map_err(|e| Error::negotiation(remote, e))?;
        record.remote_description_set = true;
        flush_candidates(record).await;

        let answer = record
            .backend
            .create_answer()
            .await
            .map_err(|e| Error::negotiation(remote, e))?;
        record
            .backend
            .set_local_description(&answer)
            .await
            .map_err(|e| Error::negotiation(remote, e))?;
        record.local_description_set = true;

        arm_timer(record, &self.options, &self.events_tx);

        let sent = self
            .signaling
            .send(SignalingEnvelope::answer(&self.local_id, remote, answer));
        if let Err(e) = &sent {
            warn!(peer_id = %remote, "Failed to send answer: {}", e);
        }

        self.settle(remote).await?;
        sent
    }

    /// Remote answer arrived
    pub async fn handle_answer(
        &mut self,
        remote: &ParticipantId,
        answer: SessionDescription,
    ) -> Result<()> {
        let Some(record) = self.records.get_mut(remote) else {
            debug!(peer_id = %remote, "Answer for unknown peer ignored");
            return Ok(());
        };

        if record.state != PeerState::OfferSent {
            debug!(peer_id = %remote, state = %record.state, "Unexpected answer ignored");
            return Ok(());
        }

        let result = self.apply_answer(remote, answer).await;
        self.guard(remote, result).await
    }

    async fn apply_answer(&mut self, remote: &ParticipantId, answer: SessionDescription) -> Result<()> {
        let record = record_in(&mut self.records, remote)?;

        if let Some(from) = record.transition(PeerState::Negotiating)? {
            notify(&self.observer, remote, from, PeerState::Negotiating);
        }

        record
            .backend
            .set_remote_description(&answer)
            .await
            .map_err(|e| Error::negotiation(remote, e))?;
        record.remote_description_set = true;
        record.local_offer = None;
        record.rollback_to = None;
        flush_candidates(record).await;

        self.settle(remote).await
    }

    /// Remote ICE candidate arrived
    ///
    /// Applied at once when the record has its remote description, queued
    /// otherwise. Candidates for an unknown sender are dropped unless orphan
    /// buffering is enabled.
    pub async fn handle_remote_candidate(
        &mut self,
        remote: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<()> {
        let Some(record) = self.records.get_mut(remote) else {
            if self.options.buffer_orphan_candidates {
                let cap = self.options.candidate_queue_cap;
                let queue = self
                    .orphans
                    .entry(remote.clone())
                    .or_insert_with(|| PendingCandidates::new(cap));
                if queue.push(candidate).is_some() {
                    warn!(peer_id = %remote, "Orphan candidate queue full, dropped oldest");
                }
            } else {
                debug!(peer_id = %remote, "Dropping candidate for unknown peer");
            }
            return Ok(());
        };

        if record.remote_description_set {
            if let Err(e) = record.backend.add_ice_candidate(&candidate).await {
                warn!(peer_id = %remote, "Failed to add ICE candidate: {}", e);
            }
        } else if record.pending_candidates.push(candidate).is_some() {
            warn!(peer_id = %remote, "Pending candidate queue full, dropped oldest");
        } else {
            debug!(
                peer_id = %remote,
                queued = record.pending_candidates.len(),
                "Queued candidate until remote description is set"
            );
        }

        Ok(())
    }

    /// Apply one backend callback
    ///
    /// Events from a record that was closed or replaced are discarded.
    /// Terminal connectivity failure tears the record down and returns
    /// [`Error::ConnectivityFailure`].
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        let PeerEvent {
            remote_id: remote,
            generation,
            kind,
        } = event;

        let Some(record) = self.records.get_mut(&remote) else {
            debug!(peer_id = %remote, %generation, "Discarding event for closed peer");
            return Ok(());
        };
        if record.generation != generation {
            debug!(
                peer_id = %remote,
                %generation,
                current = %record.generation,
                "Discarding stale event"
            );
            return Ok(());
        }

        match kind {
            PeerEventKind::CandidateGathered(candidate) => {
                let envelope = SignalingEnvelope::ice_candidate(&self.local_id, &remote, candidate);
                if let Err(e) = self.signaling.send(envelope) {
                    debug!(peer_id = %remote, "Dropping outbound candidate: {}", e);
                }
                Ok(())
            }
            PeerEventKind::TrackReceived(track) => {
                self.attach_remote_track(&remote, track);
                Ok(())
            }
            PeerEventKind::Connectivity(state) => self.on_connectivity(&remote, state).await,
            PeerEventKind::NegotiationTimeout(attempt) => {
                if record.negotiation_attempt != attempt || !record.state.is_negotiating() {
                    return Ok(());
                }
                warn!(peer_id = %remote, state = %record.state, "Negotiation timed out");
                self.teardown(&remote, PeerState::Closed).await;
                Err(Error::negotiation(&remote, "negotiation timed out"))
            }
        }
    }

    async fn on_connectivity(
        &mut self,
        remote: &ParticipantId,
        connectivity: ConnectivityState,
    ) -> Result<()> {
        let record = record_in(&mut self.records, remote)?;
        record.connectivity = connectivity;
        debug!(peer_id = %remote, ?connectivity, state = %record.state, "Connectivity changed");

        match connectivity {
            ConnectivityState::Failed => {
                warn!(peer_id = %remote, state = %record.state, "Connectivity failed, tearing down");
                self.teardown(remote, PeerState::Failed).await;
                Err(Error::ConnectivityFailure(remote.clone()))
            }
            ConnectivityState::Closed => {
                warn!(peer_id = %remote, "Backend closed unexpectedly, tearing down");
                self.teardown(remote, PeerState::Closed).await;
                Err(Error::ConnectivityFailure(remote.clone()))
            }
            ConnectivityState::Disconnected => {
                // An outstanding offer keeps its state; settle() picks the
                // connectivity up once the answer lands
                if matches!(record.state, PeerState::Negotiating | PeerState::Connected) {
                    if let Some(from) = record.transition(PeerState::Disconnected)? {
                        notify(&self.observer, remote, from, PeerState::Disconnected);
                    }
                }
                Ok(())
            }
            ConnectivityState::Connected => self.settle(remote).await,
            ConnectivityState::New | ConnectivityState::Checking => Ok(()),
        }
    }

    /// Reconcile negotiation state with the latest connectivity report and
    /// start a pending renegotiation once connected
    async fn settle(&mut self, remote: &ParticipantId) -> Result<()> {
        let record = record_in(&mut self.records, remote)?;

        let target = match (record.state, record.connectivity) {
            (PeerState::Negotiating | PeerState::Disconnected, ConnectivityState::Connected) => {
                Some(PeerState::Connected)
            }
            (PeerState::Negotiating, ConnectivityState::Disconnected) => {
                Some(PeerState::Disconnected)
            }
            _ => None,
        };

        if let Some(target) = target {
            if let Some(from) = record.transition(target)? {
                notify(&self.observer, remote, from, target);
            }
            if target == PeerState::Connected {
                record.cancel_timer();
                info!(peer_id = %remote, "Peer connected");
            }
        }

        if record.state == PeerState::Connected && record.renegotiation_needed {
            record.renegotiation_needed = false;
            debug!(peer_id = %remote, "Starting deferred renegotiation");
            let result = self.send_offer(remote).await;
            return self.guard(remote, result).await;
        }

        Ok(())
    }

    /// Attach a new local track everywhere and renegotiate
    ///
    /// Connected records re-offer at once; records mid-negotiation re-offer
    /// once they connect. Returns the peer-scoped failures; failed records
    /// are already torn down.
    pub async fn add_local_track(&mut self, track: Arc<LocalTrack>) -> Vec<Error> {
        if self.local_tracks.iter().any(|t| t.id() == track.id()) {
            return Vec::new();
        }
        info!(track_id = %track.id(), kind = %track.kind(), "Adding local track to mesh");
        self.local_tracks.push(track);

        let mut remotes: Vec<_> = self.records.keys().cloned().collect();
        remotes.sort();

        let mut failures = Vec::new();
        for remote in remotes {
            let result = self.renegotiate(&remote).await;
            if let Err(e) = self.guard(&remote, result).await {
                failures.push(e);
            }
        }
        failures
    }

    async fn renegotiate(&mut self, remote: &ParticipantId) -> Result<()> {
        let record = record_in(&mut self.records, remote)?;
        attach_tracks(record, &self.local_tracks).await?;

        let state = record.state;
        match state {
            PeerState::Connected => self.send_offer(remote).await,
            // The first offer has not gone out yet and will carry the track
            PeerState::Idle => Ok(()),
            _ => {
                record.renegotiation_needed = true;
                Ok(())
            }
        }
    }

    /// Create, apply and send a local offer
    async fn send_offer(&mut self, remote: &ParticipantId) -> Result<()> {
        let record = record_in(&mut self.records, remote)?;
        let previous = record.state;

        attach_tracks(record, &self.local_tracks).await?;

        let offer = record
            .backend
            .create_offer()
            .await
            .map_err(|e| Error::negotiation(remote, e))?;

        if let Some(from) = record.transition(PeerState::OfferCreated)? {
            notify(&self.observer, remote, from, PeerState::OfferCreated);
        }
        record.rollback_to = Some(previous);
        if previous == PeerState::Idle {
            record.initiator = true;
        }

        record
            .backend
            .set_local_description(&offer)
            .await
            .map_err(|e| Error::negotiation(remote, e))?;
        record.local_description_set = true;
        record.local_offer = Some(offer);

        arm_timer(record, &self.options, &self.events_tx);

        self.transmit_offer(remote)
    }

    /// Hand the stored local offer to the channel
    ///
    /// On failure the record stays in `OfferCreated` so a later
    /// [`initiate`](Self::initiate) can resend it.
    fn transmit_offer(&mut self, remote: &ParticipantId) -> Result<()> {
        let record = record_in(&mut self.records, remote)?;
        let Some(offer) = record.local_offer.clone() else {
            return Err(Error::negotiation(remote, "no local offer to send"));
        };

        match self
            .signaling
            .send(SignalingEnvelope::offer(&self.local_id, remote, offer))
        {
            Ok(()) => {
                if let Some(from) = record.transition(PeerState::OfferSent)? {
                    notify(&self.observer, remote, from, PeerState::OfferSent);
                }
                debug!(peer_id = %remote, "Offer sent");
                Ok(())
            }
            Err(e) => {
                warn!(peer_id = %remote, "Failed to send offer: {}", e);
                Err(e)
            }
        }
    }

    fn attach_remote_track(&mut self, remote: &ParticipantId, track: RemoteTrack) {
        let Some(record) = self.records.get_mut(remote) else {
            return;
        };

        debug!(
            peer_id = %remote,
            track_id = %track.id,
            kind = %track.kind,
            "Remote track received"
        );

        let changed = match &mut record.inbound {
            Some(stream) => stream.merge(track),
            None => {
                record.inbound = Some(RemoteStream::from_track(track));
                true
            }
        };

        if changed {
            if let Some(stream) = &record.inbound {
                self.registry.add(remote, stream.clone());
            }
        }
    }

    /// Close the record for `remote`
    ///
    /// Idempotent; also discards orphan candidates buffered for it. Returns
    /// whether a record was closed.
    pub async fn close_peer(&mut self, remote: &ParticipantId) -> bool {
        self.orphans.remove(remote);
        self.teardown(remote, PeerState::Closed).await
    }

    /// Close every record
    pub async fn close_all(&mut self) {
        let mut remotes: Vec<_> = self.records.keys().cloned().collect();
        remotes.sort();
        for remote in remotes {
            self.teardown(&remote, PeerState::Closed).await;
        }
        self.orphans.clear();
    }

    /// Tear a record down on peer-scoped negotiation failure
    async fn guard(&mut self, remote: &ParticipantId, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            if matches!(e, Error::Negotiation { .. } | Error::InvalidTransition { .. }) {
                warn!(peer_id = %remote, "Negotiation failed: {}", e);
                self.teardown(remote, PeerState::Closed).await;
            }
        }
        result
    }

    /// Remove the record, move it to `terminal`, release its resources
    async fn teardown(&mut self, remote: &ParticipantId, terminal: PeerState) -> bool {
        let Some(mut record) = self.records.remove(remote) else {
            return false;
        };

        record.cancel_timer();
        record.pending_candidates.clear();

        match record.transition(terminal) {
            Ok(Some(from)) => notify(&self.observer, remote, from, terminal),
            Ok(None) => {}
            Err(e) => debug!(peer_id = %remote, "{}", e),
        }

        if let Err(e) = record.backend.close().await {
            warn!(peer_id = %remote, "Error closing peer connection: {}", e);
        }
        self.registry.remove(remote);

        info!(peer_id = %remote, state = %terminal, "Peer connection torn down");
        true
    }

    pub fn state_of(&self, remote: &ParticipantId) -> Option<PeerState> {
        self.records.get(remote).map(|r| r.state)
    }

    pub fn generation_of(&self, remote: &ParticipantId) -> Option<Generation> {
        self.records.get(remote).map(|r| r.generation)
    }

    pub fn pending_candidates(&self, remote: &ParticipantId) -> usize {
        self.records
            .get(remote)
            .map(|r| r.pending_candidates.len())
            .unwrap_or(0)
    }

    pub fn orphan_candidates(&self, remote: &ParticipantId) -> usize {
        self.orphans.get(remote).map(|q| q.len()).unwrap_or(0)
    }

    pub fn contains(&self, remote: &ParticipantId) -> bool {
        self.records.contains_key(remote)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record, ordered by participant id
    pub fn list_peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<_> = self
            .records
            .values()
            .map(|record| PeerInfo {
                participant_id: record.remote_id.clone(),
                state: record.state,
                initiator: record.initiator,
                connected_for: record.connected_at.map(|t| t.elapsed()),
                pending_candidates: record.pending_candidates.len(),
            })
            .collect();
        peers.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        peers
    }
}

fn record_in<'a>(
    records: &'a mut HashMap<ParticipantId, PeerConnectionRecord>,
    remote: &ParticipantId,
) -> Result<&'a mut PeerConnectionRecord> {
    records
        .get_mut(remote)
        .ok_or_else(|| Error::PeerNotFound(remote.clone()))
}

/// Hand every not-yet-attached local track to the backend
async fn attach_tracks(record: &mut PeerConnectionRecord, tracks: &[Arc<LocalTrack>]) -> Result<()> {
    for track in tracks {
        if record.attached.contains(track.id()) {
            continue;
        }
        record
            .backend
            .add_track(Arc::clone(track))
            .await
            .map_err(|e| Error::negotiation(&record.remote_id, e))?;
        record.attached.insert(track.id().to_string());
        debug!(peer_id = %record.remote_id, track_id = %track.id(), "Local track attached");
    }
    Ok(())
}

/// Apply queued remote candidates in arrival order
async fn flush_candidates(record: &mut PeerConnectionRecord) {
    let queued = record.pending_candidates.drain();
    if queued.is_empty() {
        return;
    }

    debug!(peer_id = %record.remote_id, count = queued.len(), "Flushing queued candidates");
    for candidate in queued {
        if let Err(e) = record.backend.add_ice_candidate(&candidate).await {
            warn!(peer_id = %record.remote_id, "Failed to add queued ICE candidate: {}", e);
        }
    }
}

/// (Re)arm the negotiation timer if one is configured
fn arm_timer(
    record: &mut PeerConnectionRecord,
    options: &PeerOptions,
    events: &mpsc::UnboundedSender<PeerEvent>,
) {
    let Some(timeout) = options.negotiation_timeout else {
        return;
    };

    record.cancel_timer();
    record.negotiation_attempt += 1;

    let event = PeerEvent {
        remote_id: record.remote_id.clone(),
        generation: record.generation,
        kind: PeerEventKind::NegotiationTimeout(record.negotiation_attempt),
    };
    let events = events.clone();

    let task = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let _ = events.send(event);
    });
    record.timer = Some(task.abort_handle());
}

fn notify(
    observer: &broadcast::Sender<SessionEvent>,
    remote: &ParticipantId,
    from: PeerState,
    to: PeerState,
) {
    let _ = observer.send(SessionEvent::PeerStateChanged {
        participant: remote.clone(),
        from,
        to,
    });
}
