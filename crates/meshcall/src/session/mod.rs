//! Conferencing session
//!
//! A [`Session`] ties the pieces together: local media, the relay channel,
//! membership tracking and the peer connection manager. Everything that
//! mutates session state runs on one task (the session loop); callers talk to
//! it through a cloneable [`SessionHandle`].
//!
//! # Lifecycle
//!
//! 1. Acquire local media. Failure aborts the join.
//! 2. Open the relay channel as `<relay_url>?id=<participant>`. Failure
//!    releases the media and aborts the join.
//! 3. React to roster updates and negotiation messages until the caller
//!    leaves or the channel is lost.
//!
//! Leaving, losing the channel and dropping the last handle all tear down in
//! the same order: stop local tracks, close every peer, clear the remote
//! stream map, close the channel.

mod driver;

use crate::config::SessionConfig;
use crate::media::{
    LocalMediaSource, LocalStream, LocalTrack, MediaDevices, RemoteStreamMap,
    RemoteStreamRegistry,
};
use crate::membership::MembershipTracker;
use crate::participant::ParticipantId;
use crate::peer::{PeerConnectionManager, PeerConnector, PeerInfo, PeerState};
use crate::signaling::SignalingChannel;
use crate::{Error, Result};
use driver::{Command, SessionDriver};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn};

/// Capacity of the session event broadcast
const EVENT_CAPACITY: usize = 256;

/// Observable session event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// Participant appeared in the roster
    PeerJoined { participant: ParticipantId },

    /// Participant left the roster
    PeerLeft { participant: ParticipantId },

    /// A peer connection record changed state
    PeerStateChanged {
        participant: ParticipantId,
        from: PeerState,
        to: PeerState,
    },

    /// Negotiation or connectivity with one participant failed; other peers
    /// are unaffected
    PeerFailed {
        participant: ParticipantId,
        reason: String,
    },

    /// Sending through the relay failed
    SignalingError { reason: String },

    /// The relay channel was lost and the session torn down
    Disconnected { reason: Option<String> },
}

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Active,
    /// Torn down after the relay channel was lost
    Disconnected,
    /// Torn down on request
    Left,
}

/// Session entry points
pub struct Session;

impl Session {
    /// Join a conference
    ///
    /// Acquires local media, connects to the relay and starts the session
    /// loop.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `config` does not validate
    /// - [`Error::MediaAccess`] if capture was refused
    /// - [`Error::SignalingChannel`] if the relay could not be reached; local
    ///   media is released first
    pub async fn join(
        config: SessionConfig,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<SessionHandle> {
        config.validate()?;
        let local_id = config.local_id()?;

        let media = Arc::new(LocalMediaSource::new(devices, config.media));
        media.acquire().await?;

        let channel = match SignalingChannel::connect(&config.relay_url, &local_id).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Relay unreachable, releasing local media: {}", e);
                media.release();
                return Err(e);
            }
        };

        Self::start(config, media, channel, connector).await
    }

    /// Start the session loop over an already open channel
    ///
    /// Acquires local media if `media` does not hold a stream yet. The local
    /// participant id is the channel's.
    pub async fn start(
        config: SessionConfig,
        media: Arc<LocalMediaSource>,
        mut channel: SignalingChannel,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<SessionHandle> {
        let local_id = channel.local_id().clone();

        let stream = match media.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                channel.close();
                return Err(e.into());
            }
        };

        let Some(channel_events) = channel.take_events() else {
            channel.close();
            media.release();
            return Err(Error::SignalingChannel(
                "channel events already taken".to_string(),
            ));
        };

        let registry = Arc::new(RemoteStreamRegistry::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Active);
        let (members_tx, members_rx) = watch::channel(Vec::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let (mut manager, peer_events) = PeerConnectionManager::new(
            local_id.clone(),
            connector,
            channel.sender(),
            Arc::clone(&registry),
            events.clone(),
            config.peer_options(),
        );
        manager.set_local_tracks(stream.tracks().to_vec());

        let driver = SessionDriver {
            tracker: MembershipTracker::new(local_id.clone()),
            manager,
            media: Arc::clone(&media),
            registry: Arc::clone(&registry),
            channel,
            channel_events,
            peer_events,
            commands: command_rx,
            events: events.clone(),
            state: state_tx,
            members: members_tx,
        };
        tokio::spawn(driver.run());

        info!(participant = %local_id, stream_id = %stream.id(), "Session started");

        Ok(SessionHandle {
            local_id,
            commands: command_tx,
            events,
            registry,
            media,
            state: state_rx,
            members: members_rx,
        })
    }
}

/// Handle to a running session
///
/// Cheap to clone. Dropping the last handle leaves the session.
#[derive(Clone)]
pub struct SessionHandle {
    local_id: ParticipantId,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    registry: Arc<RemoteStreamRegistry>,
    media: Arc<LocalMediaSource>,
    state: watch::Receiver<SessionState>,
    members: watch::Receiver<Vec<ParticipantId>>,
}

impl SessionHandle {
    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Receive session events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current remote streams keyed by participant
    pub fn remote_streams(&self) -> Arc<RemoteStreamMap> {
        self.registry.snapshot()
    }

    /// Observe the remote stream map; each change publishes a new snapshot
    pub fn watch_remote_streams(&self) -> watch::Receiver<Arc<RemoteStreamMap>> {
        self.registry.subscribe()
    }

    /// Remote participants currently in the roster, sorted
    pub fn members(&self) -> Vec<ParticipantId> {
        self.members.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// The local capture stream, while the session holds it
    pub fn local_stream(&self) -> Option<LocalStream> {
        self.media.stream()
    }

    /// Snapshot of every peer connection record
    pub async fn peers(&self) -> Result<Vec<PeerInfo>> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Publish another local track to every peer
    ///
    /// Connected peers renegotiate at once, peers mid-negotiation once they
    /// connect.
    pub async fn add_local_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.request(|reply| Command::AddLocalTrack { track, reply })
            .await?
    }

    /// Send (or resend) an offer to `participant`
    pub async fn retry_offer(&self, participant: &ParticipantId) -> Result<()> {
        let participant = participant.clone();
        self.request(|reply| Command::RetryOffer { participant, reply })
            .await?
    }

    /// Leave the conference
    ///
    /// Idempotent; returns once teardown finished.
    pub async fn leave(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Leave { reply }).is_err() {
            return Ok(());
        }
        let _ = done.await;
        Ok(())
    }

    /// Wait until the session is torn down
    pub async fn closed(&self) -> SessionState {
        let mut state = self.state.clone();
        let settled = match state.wait_for(|s| *s != SessionState::Active).await {
            Ok(settled) => *settled,
            Err(_) => *self.state.borrow(),
        };
        settled
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| session_closed())?;
        response.await.map_err(|_| session_closed())
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("local_id", &self.local_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn session_closed() -> Error {
    Error::SignalingChannel("session is closed".to_string())
}
