//! Local capture
//!
//! [`LocalMediaSource`] owns the one capture stream of a session. Every peer
//! connection attaches the same [`LocalTrack`] objects; nothing is captured
//! per peer.

use super::{MediaConstraints, TrackKind};
use crate::error::MediaAccessError;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// One captured track, shared by every peer connection
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    stream_id: String,
    rtp: Arc<TrackLocalStaticSample>,
    live: AtomicBool,
}

impl LocalTrack {
    /// Create a sample track of `kind` belonging to `stream_id`
    ///
    /// Audio uses Opus at 48 kHz stereo, video VP8 at 90 kHz.
    pub fn new(kind: TrackKind, stream_id: impl Into<String>) -> Arc<Self> {
        let stream_id = stream_id.into();
        let id = format!("{}-{}", kind, uuid::Uuid::new_v4());

        let codec = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        };

        let rtp = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.clone(),
        ));

        Arc::new(Self {
            id,
            kind,
            stream_id,
            rtp,
            live: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// RTP sample track handed to every peer connection
    pub fn rtp(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtp)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Stop capture on this track
    ///
    /// Returns `true` only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        let stopped = self.live.swap(false, Ordering::AcqRel);
        if stopped {
            debug!(track_id = %self.id, kind = %self.kind, "Local track stopped");
        }
        stopped
    }

    /// Write one encoded media sample to every bound peer connection
    ///
    /// Samples written after [`LocalTrack::stop`] are discarded.
    pub async fn write_sample(&self, sample: &Sample) -> crate::Result<()> {
        if !self.is_live() {
            return Ok(());
        }
        self.rtp
            .write_sample(sample)
            .await
            .map_err(|e| crate::Error::WebRtc(format!("Failed to write sample: {}", e)))
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .field("live", &self.is_live())
            .finish()
    }
}

/// The local capture stream: one id, its tracks
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Capture a fresh stream with one track per requested kind
    pub fn capture(constraints: &MediaConstraints) -> Self {
        let id = format!("stream-{}", uuid::Uuid::new_v4());
        let tracks = constraints
            .kinds()
            .into_iter()
            .map(|kind| LocalTrack::new(kind, id.clone()))
            .collect();
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    /// First track of `kind`, if any
    pub fn track(&self, kind: TrackKind) -> Option<&Arc<LocalTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Capture device access
///
/// Stands in for the platform's camera/microphone permission prompt.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Capture a stream satisfying `constraints`
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalStream, MediaAccessError>;
}

/// Devices that always grant access and produce empty sample tracks
///
/// The embedding application feeds encoded samples through
/// [`LocalTrack::write_sample`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticDevices;

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalStream, MediaAccessError> {
        if constraints.kinds().is_empty() {
            return Err(MediaAccessError::Device(
                "at least one of audio or video must be requested".to_string(),
            ));
        }
        Ok(LocalStream::capture(constraints))
    }
}

type CaptureRequest = Shared<BoxFuture<'static, Result<LocalStream, MediaAccessError>>>;

enum Capture {
    Idle,
    /// In-flight device request and its sequence number
    Pending(u64, CaptureRequest),
    Ready(LocalStream),
}

struct CaptureState {
    /// Bumped on every release so in-flight requests can tell they were cancelled
    epoch: u64,
    /// Sequence number of the last device request
    requests: u64,
    capture: Capture,
}

/// Acquires and holds local capture
pub struct LocalMediaSource {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    state: Mutex<CaptureState>,
}

impl LocalMediaSource {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: MediaConstraints) -> Self {
        Self {
            devices,
            constraints,
            state: Mutex::new(CaptureState {
                epoch: 0,
                requests: 0,
                capture: Capture::Idle,
            }),
        }
    }

    pub fn constraints(&self) -> MediaConstraints {
        self.constraints
    }

    /// Acquire camera and microphone
    ///
    /// Concurrent callers share a single device request. A failed request
    /// leaves the source idle so a later call can retry; a request that
    /// completes after [`release`](Self::release) yields
    /// [`MediaAccessError::Released`] and its tracks are stopped.
    pub async fn acquire(&self) -> Result<LocalStream, MediaAccessError> {
        let (epoch, seq, request) = {
            let mut state = self.state.lock();
            let epoch = state.epoch;
            match &state.capture {
                Capture::Ready(stream) => return Ok(stream.clone()),
                Capture::Pending(seq, request) => (epoch, *seq, request.clone()),
                Capture::Idle => {
                    info!(
                        audio = self.constraints.audio,
                        video = self.constraints.video,
                        "Requesting local media"
                    );
                    let devices = Arc::clone(&self.devices);
                    let constraints = self.constraints;
                    let request = async move { devices.get_user_media(&constraints).await }
                        .boxed()
                        .shared();
                    state.requests += 1;
                    let seq = state.requests;
                    state.capture = Capture::Pending(seq, request.clone());
                    (epoch, seq, request)
                }
            }
        };

        let outcome = request.await;

        let mut state = self.state.lock();
        if state.epoch != epoch {
            if let Ok(stream) = &outcome {
                stream.stop_all();
            }
            debug!("Local media released while the request was in flight");
            return Err(MediaAccessError::Released);
        }

        // Another waiter on the same request already stored it
        if let Capture::Ready(stream) = &state.capture {
            return Ok(stream.clone());
        }

        match outcome {
            Ok(stream) => {
                info!(
                    stream_id = %stream.id(),
                    tracks = stream.tracks().len(),
                    "Local media acquired"
                );
                state.capture = Capture::Ready(stream.clone());
                Ok(stream)
            }
            Err(e) => {
                // A newer request may already be in flight
                if matches!(state.capture, Capture::Pending(current, _) if current == seq) {
                    state.capture = Capture::Idle;
                }
                Err(e)
            }
        }
    }

    /// Stop every local track
    ///
    /// Idempotent; also cancels an in-flight request. Returns `true` if a
    /// held stream or pending request was released.
    pub fn release(&self) -> bool {
        let mut state = self.state.lock();
        state.epoch += 1;
        match std::mem::replace(&mut state.capture, Capture::Idle) {
            Capture::Ready(stream) => {
                stream.stop_all();
                info!(stream_id = %stream.id(), "Local media released");
                true
            }
            Capture::Pending(..) => true,
            Capture::Idle => false,
        }
    }

    /// Add a track to the held stream (e.g. a second camera mid-call)
    ///
    /// Returns `Ok(false)` if the track is already part of the stream.
    pub fn add_track(&self, track: Arc<LocalTrack>) -> Result<bool, MediaAccessError> {
        let mut state = self.state.lock();
        let Capture::Ready(stream) = &mut state.capture else {
            return Err(MediaAccessError::Device(
                "local media is not acquired".to_string(),
            ));
        };

        if stream.tracks.iter().any(|t| t.id() == track.id()) {
            return Ok(false);
        }

        debug!(track_id = %track.id(), kind = %track.kind(), "Local track added");
        stream.tracks.push(track);
        Ok(true)
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self.state.lock().capture, Capture::Ready(_))
    }

    /// Snapshot of the held stream
    pub fn stream(&self) -> Option<LocalStream> {
        match &self.state.lock().capture {
            Capture::Ready(stream) => Some(stream.clone()),
            _ => None,
        }
    }

    /// Tracks of the held stream (empty when not acquired)
    pub fn tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.stream()
            .map(|s| s.tracks().to_vec())
            .unwrap_or_default()
    }
}
