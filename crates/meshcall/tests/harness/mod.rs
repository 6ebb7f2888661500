//! Mesh test harness
//!
//! Provides infrastructure for integration testing without a network:
//! - Scriptable peer backends that record every call ([`FakeConnector`])
//! - Detached signaling channels; the test plays the relay
//! - A [`ManagerHarness`] that drives one manager step by step
//! - Helpers to wire two managers to each other
//!
//! Basic usage pattern:
//!
//! 1. Create a `ManagerHarness` for the local participant
//! 2. Feed it envelopes (`deliver`) or backend callbacks (`pump`)
//! 3. Inspect what it sent (`sent`) and what the backend saw (`connector`)

#![allow(dead_code)]

pub mod devices;
pub mod fake_peer;

pub use devices::{DenyingDevices, RecordingDevices};
pub use fake_peer::{Call, FailAt, FakeConnector, FakePeer};

use meshcall::media::{LocalStream, MediaConstraints, RemoteStreamRegistry};
use meshcall::peer::{PeerConnectionManager, PeerEvent, PeerOptions, PeerState};
use meshcall::signaling::{
    IceCandidate, Payload, RelayEnd, Roster, SessionDescription, SignalingChannel,
    SignalingEnvelope,
};
use meshcall::{ParticipantId, Result, SessionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub fn id(s: &str) -> ParticipantId {
    ParticipantId::from(s)
}

/// Initialize logging once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds; panics after two seconds
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Next session event matching `pred`, skipping others
pub async fn next_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// Next envelope the local side sent, within two seconds
pub async fn recv_sent(relay: &mut RelayEnd) -> Option<SignalingEnvelope> {
    tokio::time::timeout(Duration::from_secs(2), relay.recv())
        .await
        .expect("timed out waiting for outbound envelope")
}

/// One manager with a detached channel and fake backends
pub struct ManagerHarness {
    pub local: ParticipantId,
    pub manager: PeerConnectionManager,
    pub connector: Arc<FakeConnector>,
    pub registry: Arc<RemoteStreamRegistry>,
    pub relay: RelayEnd,
    pub observer: broadcast::Receiver<SessionEvent>,
    pub stream: LocalStream,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    channel: SignalingChannel,
}

impl ManagerHarness {
    pub fn new(local: &str) -> Self {
        Self::with_options(local, PeerOptions::default())
    }

    pub fn with_options(local: &str, options: PeerOptions) -> Self {
        let local = id(local);
        let connector = FakeConnector::new(&local);
        let registry = Arc::new(RemoteStreamRegistry::new());
        let (observer_tx, observer) = broadcast::channel(256);
        let (channel, relay) = SignalingChannel::detached(local.clone());

        let (mut manager, events) = PeerConnectionManager::new(
            local.clone(),
            connector.clone(),
            channel.sender(),
            Arc::clone(&registry),
            observer_tx,
            options,
        );

        let stream = LocalStream::capture(&MediaConstraints::default());
        manager.set_local_tracks(stream.tracks().to_vec());

        Self {
            local,
            manager,
            connector,
            registry,
            relay,
            observer,
            stream,
            events,
            channel,
        }
    }

    /// Route one envelope through the manager
    pub async fn deliver(&mut self, envelope: SignalingEnvelope) -> Result<()> {
        self.manager.handle_signal(envelope).await
    }

    pub async fn offer_from(&mut self, remote: &str, sdp: &str) -> Result<()> {
        let envelope =
            SignalingEnvelope::offer(&id(remote), &self.local, SessionDescription::offer(sdp));
        self.deliver(envelope).await
    }

    pub async fn answer_from(&mut self, remote: &str, sdp: &str) -> Result<()> {
        let envelope =
            SignalingEnvelope::answer(&id(remote), &self.local, SessionDescription::answer(sdp));
        self.deliver(envelope).await
    }

    pub async fn candidate_from(&mut self, remote: &str, candidate: &str) -> Result<()> {
        let envelope =
            SignalingEnvelope::ice_candidate(&id(remote), &self.local, IceCandidate::new(candidate));
        self.deliver(envelope).await
    }

    /// Apply every backend callback queued so far
    pub async fn pump(&mut self) -> Vec<Result<()>> {
        let mut results = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            results.push(self.manager.handle_peer_event(event).await);
        }
        results
    }

    /// Wait for the next backend callback (timers) and apply it
    pub async fn pump_next(&mut self, within: Duration) -> Option<Result<()>> {
        let event = tokio::time::timeout(within, self.events.recv())
            .await
            .ok()??;
        Some(self.manager.handle_peer_event(event).await)
    }

    /// Envelopes sent to the relay since the last call
    pub fn sent(&mut self) -> Vec<SignalingEnvelope> {
        let mut sent = Vec::new();
        while let Some(envelope) = self.relay.try_recv() {
            sent.push(envelope);
        }
        sent
    }

    /// Session events observed since the last call
    pub fn observed(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.observer.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn state(&self, remote: &str) -> Option<PeerState> {
        self.manager.state_of(&id(remote))
    }

    pub fn peer(&self, remote: &str) -> Arc<FakePeer> {
        self.connector
            .peer(remote)
            .unwrap_or_else(|| panic!("no backend created toward {}", remote))
    }

    /// Drop the channel from the relay side
    pub fn disconnect_relay(&self) {
        self.relay.disconnect("relay went away");
    }

    pub fn channel_open(&self) -> bool {
        self.channel.is_open()
    }
}

/// Deliver every directed envelope in `from`'s outbox to `to`
///
/// Returns the number of envelopes forwarded.
pub async fn forward(from: &mut ManagerHarness, to: &mut ManagerHarness) -> usize {
    let mut forwarded = 0;
    for envelope in from.sent() {
        if envelope.to.as_ref() == Some(&to.local) {
            to.deliver(envelope)
                .await
                .unwrap_or_else(|e| panic!("delivery failed: {}", e));
            forwarded += 1;
        }
    }
    forwarded
}

/// Only the session descriptions from an outbox
pub fn descriptions(envelopes: &[SignalingEnvelope]) -> Vec<&Payload> {
    envelopes
        .iter()
        .map(|e| &e.payload)
        .filter(|p| matches!(p, Payload::Offer(_) | Payload::Answer(_)))
        .collect()
}

pub fn snapshot(ids: &[&str]) -> SignalingEnvelope {
    SignalingEnvelope::roster(Payload::RosterSnapshot(Roster::with(
        ids.iter().map(|s| id(s)),
        true,
    )))
}

pub fn joined(who: &str) -> SignalingEnvelope {
    SignalingEnvelope::roster(Payload::RosterAdd(Roster::with([id(who)], true)))
}

pub fn left(who: &str) -> SignalingEnvelope {
    SignalingEnvelope::roster(Payload::RosterRemove(Roster::with([id(who)], false)))
}
