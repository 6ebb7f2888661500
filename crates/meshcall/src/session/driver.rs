//! The session loop

use super::{SessionEvent, SessionState};
use crate::media::{LocalMediaSource, LocalTrack, RemoteStreamRegistry};
use crate::membership::{MembershipEvent, MembershipTracker, Role};
use crate::participant::ParticipantId;
use crate::peer::{PeerConnectionManager, PeerEvent, PeerInfo};
use crate::signaling::{ChannelEvent, Payload, SignalingChannel, SignalingEnvelope};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Request from a [`SessionHandle`](super::SessionHandle)
pub(super) enum Command {
    AddLocalTrack {
        track: Arc<LocalTrack>,
        reply: oneshot::Sender<Result<()>>,
    },
    RetryOffer {
        participant: ParticipantId,
        reply: oneshot::Sender<Result<()>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Owns all mutable session state; runs on a single task
pub(super) struct SessionDriver {
    pub(super) tracker: MembershipTracker,
    pub(super) manager: PeerConnectionManager,
    pub(super) media: Arc<LocalMediaSource>,
    pub(super) registry: Arc<RemoteStreamRegistry>,
    pub(super) channel: SignalingChannel,
    pub(super) channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub(super) peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    pub(super) commands: mpsc::UnboundedReceiver<Command>,
    pub(super) events: broadcast::Sender<SessionEvent>,
    pub(super) state: watch::Sender<SessionState>,
    pub(super) members: watch::Sender<Vec<ParticipantId>>,
}

impl SessionDriver {
    pub(super) async fn run(mut self) {
        debug!(participant = %self.tracker.local_id(), "Session loop started");

        loop {
            tokio::select! {
                // Caller requests first so leave() is not starved by traffic
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Leave { reply }) => {
                        self.shutdown(SessionState::Left, None).await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Every session handle dropped, leaving");
                        self.shutdown(SessionState::Left, None).await;
                        break;
                    }
                },

                Some(event) = self.channel_events.recv() => match event {
                    ChannelEvent::Envelope(envelope) => self.handle_envelope(envelope).await,
                    ChannelEvent::Closed(reason) => {
                        warn!(reason = ?reason, "Relay channel lost");
                        self.shutdown(SessionState::Disconnected, reason).await;
                        break;
                    }
                },

                Some(event) = self.peer_events.recv() => {
                    let result = self.manager.handle_peer_event(event).await;
                    self.report(result);
                }
            }
        }

        debug!(participant = %self.tracker.local_id(), "Session loop ended");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddLocalTrack { track, reply } => {
                let result = self.add_local_track(track).await;
                let _ = reply.send(result);
            }
            Command::RetryOffer { participant, reply } => {
                let result = self.manager.initiate(&participant).await;
                if let Err(e) = &result {
                    self.observe(e);
                }
                let _ = reply.send(result);
            }
            Command::Peers { reply } => {
                let _ = reply.send(self.manager.list_peers());
            }
            // Handled by the loop
            Command::Leave { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn add_local_track(&mut self, track: Arc<LocalTrack>) -> Result<()> {
        if !self.media.add_track(Arc::clone(&track))? {
            return Ok(());
        }
        for failure in self.manager.add_local_track(track).await {
            self.observe(&failure);
        }
        Ok(())
    }

    async fn handle_envelope(&mut self, envelope: SignalingEnvelope) {
        match &envelope.payload {
            Payload::RosterSnapshot(_) | Payload::RosterAdd(_) | Payload::RosterRemove(_) => {
                let changes = self.tracker.apply(&envelope.payload);
                for change in changes {
                    self.apply_membership(change).await;
                }
                self.publish_members();
            }
            _ => {
                let result = self.manager.handle_signal(envelope).await;
                self.report(result);
            }
        }
    }

    async fn apply_membership(&mut self, change: MembershipEvent) {
        match change {
            MembershipEvent::Discovered { participant, role } => {
                info!(peer_id = %participant, ?role, "Participant joined");
                self.emit(SessionEvent::PeerJoined {
                    participant: participant.clone(),
                });
                // The newcomer waits for the offer
                if role == Role::Offerer {
                    let result = self.manager.initiate(&participant).await;
                    self.report(result);
                }
            }
            MembershipEvent::Departed { participant } => {
                info!(peer_id = %participant, "Participant left");
                self.manager.close_peer(&participant).await;
                self.emit(SessionEvent::PeerLeft { participant });
            }
        }
    }

    /// Surface a failed step; the session keeps running
    fn report(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.observe(&e);
        }
    }

    fn observe(&mut self, e: &Error) {
        if e.is_peer_scoped() {
            let Some(participant) = e.participant().cloned() else {
                warn!("Peer error: {}", e);
                return;
            };
            warn!(peer_id = %participant, "Peer failed: {}", e);
            // A later roster add may bring it back
            if self.tracker.forget(&participant) {
                self.publish_members();
            }
            self.emit(SessionEvent::PeerFailed {
                participant,
                reason: e.to_string(),
            });
        } else if e.is_session_scoped() {
            warn!("Signaling error: {}", e);
            self.emit(SessionEvent::SignalingError {
                reason: e.to_string(),
            });
        } else {
            match e {
                Error::InvalidMessage(_) | Error::PeerLimit(_) => warn!("{}", e),
                _ => error!("Unexpected session error: {}", e),
            }
        }
    }

    /// Stop local tracks, close every peer, clear remote streams, close the
    /// channel; in that order
    async fn shutdown(&mut self, state: SessionState, reason: Option<String>) {
        info!(participant = %self.tracker.local_id(), ?state, "Tearing down session");

        self.media.release();
        self.manager.close_all().await;
        self.registry.clear();
        self.channel.close();

        for participant in self.tracker.members() {
            self.tracker.forget(&participant);
        }
        self.publish_members();

        let _ = self.state.send(state);
        if state == SessionState::Disconnected {
            self.emit(SessionEvent::Disconnected { reason });
        }
    }

    fn publish_members(&self) {
        let members = self.tracker.members();
        self.members.send_if_modified(|current| {
            if *current == members {
                false
            } else {
                *current = members;
                true
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
