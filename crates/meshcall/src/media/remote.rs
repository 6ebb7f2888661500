//! Inbound media from remote participants

use super::TrackKind;
use crate::participant::ParticipantId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use webrtc::track::track_remote::TrackRemote;

/// One inbound track
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,

    /// Underlying RTP receiver; `None` for backends that do not expose one
    pub receiver: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            stream_id: stream_id.into(),
            receiver: None,
        }
    }

    pub fn with_receiver(mut self, receiver: Arc<TrackRemote>) -> Self {
        self.receiver = Some(receiver);
        self
    }
}

impl PartialEq for RemoteTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.kind == other.kind && self.stream_id == other.stream_id
    }
}

impl Eq for RemoteTrack {}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .field("has_receiver", &self.receiver.is_some())
            .finish()
    }
}

/// Everything one remote participant sends, audio and video together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    id: String,
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    /// Stream seeded with its first track; the stream takes the track's stream id
    pub fn from_track(track: RemoteTrack) -> Self {
        Self {
            id: track.stream_id.clone(),
            tracks: vec![track],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    /// Merge a track into this stream; `false` if it was already present
    pub fn merge(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }
}

/// Remote participant id to inbound stream
pub type RemoteStreamMap = BTreeMap<ParticipantId, RemoteStream>;

/// Registry of inbound streams
///
/// Readers get immutable snapshots (`Arc<RemoteStreamMap>`); every mutation
/// publishes a new snapshot, so iteration never races with removal.
#[derive(Debug)]
pub struct RemoteStreamRegistry {
    tx: watch::Sender<Arc<RemoteStreamMap>>,
}

impl Default for RemoteStreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStreamRegistry {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(Arc::new(RemoteStreamMap::new())),
        }
    }

    /// Map `participant` to `stream`
    ///
    /// No-op if the same stream is already mapped; replaces a different one.
    /// Returns whether the snapshot changed.
    pub fn add(&self, participant: &ParticipantId, stream: RemoteStream) -> bool {
        self.tx.send_if_modified(|map| {
            if map.get(participant) == Some(&stream) {
                return false;
            }
            debug!(
                peer_id = %participant,
                stream_id = %stream.id(),
                tracks = stream.tracks().len(),
                "Remote stream mapped"
            );
            Arc::make_mut(map).insert(participant.clone(), stream);
            true
        })
    }

    /// Drop the mapping for `participant`; safe if absent
    pub fn remove(&self, participant: &ParticipantId) -> bool {
        self.tx.send_if_modified(|map| {
            if !map.contains_key(participant) {
                return false;
            }
            debug!(peer_id = %participant, "Remote stream removed");
            Arc::make_mut(map).remove(participant);
            true
        })
    }

    /// Drop every mapping
    pub fn clear(&self) {
        self.tx.send_if_modified(|map| {
            if map.is_empty() {
                return false;
            }
            *map = Arc::new(RemoteStreamMap::new());
            true
        });
    }

    /// Immutable snapshot of the current mapping
    pub fn snapshot(&self) -> Arc<RemoteStreamMap> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn get(&self, participant: &ParticipantId) -> Option<RemoteStream> {
        self.tx.borrow().get(participant).cloned()
    }

    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.tx.borrow().contains_key(participant)
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Receiver notified on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<Arc<RemoteStreamMap>> {
        self.tx.subscribe()
    }
}
