//! Scriptable peer backend
//!
//! Records every call the manager makes and lets a test inject callbacks
//! (candidates, tracks, connectivity) through the backend's event sink.

use async_trait::async_trait;
use meshcall::media::{LocalTrack, RemoteTrack};
use meshcall::peer::{ConnectivityState, Generation, PeerBackend, PeerConnector, PeerEventSink};
use meshcall::signaling::{IceCandidate, SdpKind, SessionDescription};
use meshcall::{Error, ParticipantId, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One backend call, in the order the manager made it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddTrack(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind, String),
    AddCandidate(String),
    Rollback,
    Close,
}

/// Step at which a backend should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailAt {
    Create,
    AddTrack,
    CreateOffer,
    CreateAnswer,
    SetRemote,
}

type Failures = Arc<Mutex<HashMap<ParticipantId, FailAt>>>;

/// State of one fake backend, shared between the manager's box and the test
#[derive(Debug)]
pub struct FakePeer {
    local_id: ParticipantId,
    remote_id: ParticipantId,
    sink: PeerEventSink,
    calls: Mutex<Vec<Call>>,
    failures: Failures,
    offers: AtomicU64,
}

impl FakePeer {
    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub fn generation(&self) -> Generation {
        self.sink.generation()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Candidates applied, in order
    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::AddCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.count(&Call::Close) > 0
    }

    /// Report a connectivity change as the backend would
    pub fn connectivity(&self, state: ConnectivityState) {
        self.sink.connectivity(state);
    }

    /// Report a locally gathered candidate
    pub fn gather(&self, candidate: &str) {
        self.sink.candidate(IceCandidate::new(candidate));
    }

    /// Report an inbound remote track
    pub fn receive_track(&self, track: RemoteTrack) {
        self.sink.track(track);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check(&self, step: FailAt) -> Result<()> {
        if self.failures.lock().get(&self.remote_id) == Some(&step) {
            return Err(Error::WebRtc(format!("injected {:?} failure", step)));
        }
        Ok(())
    }
}

/// Box handed to the manager
struct FakeBackend(Arc<FakePeer>);

#[async_trait]
impl PeerBackend for FakeBackend {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.0.check(FailAt::AddTrack)?;
        self.0.record(Call::AddTrack(track.id().to_string()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.0.check(FailAt::CreateOffer)?;
        self.0.record(Call::CreateOffer);
        let n = self.0.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!(
            "offer {} -> {} #{}",
            self.0.local_id, self.0.remote_id, n
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.0.check(FailAt::CreateAnswer)?;
        self.0.record(Call::CreateAnswer);
        Ok(SessionDescription::answer(format!(
            "answer {} -> {}",
            self.0.local_id, self.0.remote_id
        )))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()> {
        self.0.record(Call::SetLocal(description.kind));
        Ok(())
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        self.0.check(FailAt::SetRemote)?;
        self.0
            .record(Call::SetRemote(description.kind, description.sdp.clone()));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.0.record(Call::AddCandidate(candidate.candidate.clone()));
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.0.record(Call::Rollback);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.0.record(Call::Close);
        Ok(())
    }
}

/// Connector producing [`FakePeer`]s
#[derive(Debug)]
pub struct FakeConnector {
    local_id: ParticipantId,
    created: Mutex<Vec<Arc<FakePeer>>>,
    failures: Failures,
}

impl FakeConnector {
    pub fn new(local_id: &ParticipantId) -> Arc<Self> {
        Arc::new(Self {
            local_id: local_id.clone(),
            created: Mutex::new(Vec::new()),
            failures: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Make backends toward `remote` fail at `step` from now on
    pub fn fail(&self, remote: &str, step: FailAt) {
        self.failures.lock().insert(ParticipantId::from(remote), step);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Latest backend created toward `remote`
    pub fn peer(&self, remote: &str) -> Option<Arc<FakePeer>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|p| p.remote_id.as_str() == remote)
            .cloned()
    }

    /// Every backend ever created toward `remote`, oldest first
    pub fn incarnations(&self, remote: &str) -> Vec<Arc<FakePeer>> {
        self.created
            .lock()
            .iter()
            .filter(|p| p.remote_id.as_str() == remote)
            .cloned()
            .collect()
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn create(
        &self,
        remote_id: &ParticipantId,
        sink: PeerEventSink,
    ) -> Result<Box<dyn PeerBackend>> {
        if self.failures.lock().get(remote_id) == Some(&FailAt::Create) {
            return Err(Error::WebRtc("injected create failure".to_string()));
        }

        let peer = Arc::new(FakePeer {
            local_id: self.local_id.clone(),
            remote_id: remote_id.clone(),
            sink,
            calls: Mutex::new(Vec::new()),
            failures: Arc::clone(&self.failures),
            offers: AtomicU64::new(0),
        });
        self.created.lock().push(Arc::clone(&peer));
        Ok(Box::new(FakeBackend(peer)))
    }
}
