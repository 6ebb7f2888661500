//! WebRTC-backed peer connections
//!
//! [`WebRtcConnector`] builds one `webrtc` peer connection per remote
//! participant and maps its callbacks onto [`PeerEventSink`].

use super::backend::{ConnectivityState, PeerBackend, PeerConnector, PeerEventSink};
use crate::config::{SessionConfig, TurnServerConfig};
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::participant::ParticipantId;
use crate::signaling::protocol::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

/// Creates `webrtc` peer connections
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnector {
    /// Connector using the given STUN and TURN servers
    pub fn new(stun_servers: &[String], turn_servers: &[TurnServerConfig]) -> Self {
        let ice_servers = stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        Self { ice_servers }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.stun_servers, &config.turn_servers)
    }

    pub fn ice_servers(&self) -> &[RTCIceServer] {
        &self.ice_servers
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    #[instrument(skip(self, sink), fields(peer_id = %remote_id))]
    async fn create(
        &self,
        remote_id: &ParticipantId,
        sink: PeerEventSink,
    ) -> Result<Box<dyn PeerBackend>> {
        // Default codecs cover Opus and VP8, the formats local tracks use
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(|e| {
                Error::WebRtc(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtc(format!("Failed to create peer connection: {}", e))
        })?);

        let candidate_sink = sink.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidate_sink.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        sink.candidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        });
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let track_sink = sink.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sink = track_sink.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                let remote = RemoteTrack::new(track.id(), kind, track.stream_id())
                    .with_receiver(Arc::clone(&track));
                sink.track(remote);
            })
        }));

        let state_sink = sink;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let sink = state_sink.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => ConnectivityState::New,
                        RTCPeerConnectionState::Connecting => ConnectivityState::Checking,
                        RTCPeerConnectionState::Connected => ConnectivityState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectivityState::Failed,
                        RTCPeerConnectionState::Closed => ConnectivityState::Closed,
                        _ => return,
                    };
                    sink.connectivity(state);
                })
            },
        ));

        info!("Created WebRTC peer connection");

        Ok(Box::new(WebRtcPeer {
            remote_id: remote_id.clone(),
            peer_connection,
            senders: Mutex::new(Vec::new()),
        }))
    }
}

/// One `webrtc` peer connection
pub struct WebRtcPeer {
    remote_id: ParticipantId,
    peer_connection: Arc<RTCPeerConnection>,

    /// RTP senders (retained to prevent track cleanup)
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

impl WebRtcPeer {
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

fn to_rtc(description: &SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = description.sdp.clone();
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpKind::Rollback => return Ok(rollback_description(sdp)),
    };
    parsed.map_err(|e| Error::WebRtc(format!("Failed to parse session description: {}", e)))
}

/// webrtc-rs parses the SDP of every local description, rollbacks included
fn rollback_description(sdp: String) -> RTCSessionDescription {
    let mut description = RTCSessionDescription::default();
    description.sdp_type = RTCSdpType::Rollback;
    description.sdp = sdp;
    description
}

#[async_trait]
impl PeerBackend for WebRtcPeer {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        let sender = self
            .peer_connection
            .add_track(track.rtp() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to add {} track: {}", track.kind(), e)))?;

        // Drain RTCP so interceptors (NACK, reports) keep working
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.senders.lock().push(sender);
        debug!(peer_id = %self.remote_id, track_id = %track.id(), "Track added to peer connection");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn rollback(&self) -> Result<()> {
        let Some(pending) = self.peer_connection.pending_local_description().await else {
            return Err(Error::WebRtc("no local offer to roll back".to_string()));
        };

        self.peer_connection
            .set_local_description(rollback_description(pending.sdp))
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to roll back local offer: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!(peer_id = %self.remote_id, "Closing peer connection");
        self.senders.lock().clear();
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to close connection: {}", e)))
    }
}
