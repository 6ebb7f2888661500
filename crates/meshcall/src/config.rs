//! Configuration types for a conferencing session

use crate::media::MediaConstraints;
use crate::participant::ParticipantId;
use crate::peer::PeerOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound on `max_peers`; a full mesh beyond this is not practical
pub const MAX_MESH_SIZE: usize = 32;

/// Main configuration for a [`Session`](crate::session::Session)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Relay URL (ws:// or wss://); `?id=<participant>` is appended on connect
    pub relay_url: String,

    /// Local participant ID (auto-generated if None)
    pub participant_id: Option<String>,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Maximum peers in mesh (default: 10, max: 32)
    pub max_peers: usize,

    /// Local capture request
    pub media: MediaConstraints,

    /// Per-peer cap of remote candidates queued before the remote
    /// description is set (default: 100)
    pub ice_candidate_queue: usize,

    /// Buffer candidates whose sender has no record yet (default: false)
    pub buffer_orphan_candidates: bool,

    /// Tear down peers still negotiating after this many seconds
    /// (default: never)
    pub negotiation_timeout_secs: Option<u64>,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080/ws".to_string(),
            participant_id: None,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            max_peers: 10,
            media: MediaConstraints::default(),
            ice_candidate_queue: 100,
            buffer_orphan_candidates: false,
            negotiation_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    /// Config pointing at `relay_url`, defaults elsewhere
    pub fn new(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            ..Default::default()
        }
    }

    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(toml_str: &str) -> crate::Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| crate::Error::InvalidConfig(format!("Invalid TOML: {}", e)))
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `relay_url` is not a ws:// or wss:// URL
    /// - `participant_id` is set but blank
    /// - `max_peers` is not in range 1-32
    /// - `ice_candidate_queue` is zero
    /// - `negotiation_timeout_secs` is zero
    /// - neither audio nor video is requested
    /// - a STUN/TURN URL has the wrong scheme
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        let url = url::Url::parse(&self.relay_url).map_err(|e| {
            Error::InvalidConfig(format!("relay_url is not a valid URL ({}): {}", e, self.relay_url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if let Some(id) = &self.participant_id {
            if id.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "participant_id must not be blank".to_string(),
                ));
            }
        }

        if self.max_peers == 0 || self.max_peers > MAX_MESH_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-{}, got {}",
                MAX_MESH_SIZE, self.max_peers
            )));
        }

        if self.ice_candidate_queue == 0 {
            return Err(Error::InvalidConfig(
                "ice_candidate_queue must be greater than 0".to_string(),
            ));
        }

        if self.negotiation_timeout_secs == Some(0) {
            return Err(Error::InvalidConfig(
                "negotiation_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        if !self.media.audio && !self.media.video {
            return Err(Error::InvalidConfig(
                "at least one of media.audio or media.video must be enabled".to_string(),
            ));
        }

        for stun in &self.stun_servers {
            if !stun.starts_with("stun:") && !stun.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got {}",
                    stun
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        Ok(())
    }

    /// Configured participant id, or a fresh random one
    pub fn local_id(&self) -> crate::Result<ParticipantId> {
        match &self.participant_id {
            Some(id) => id.parse(),
            None => Ok(ParticipantId::generate()),
        }
    }

    /// Options for the peer connection manager
    pub fn peer_options(&self) -> PeerOptions {
        PeerOptions {
            max_peers: self.max_peers,
            candidate_queue_cap: self.ice_candidate_queue,
            buffer_orphan_candidates: self.buffer_orphan_candidates,
            negotiation_timeout: self.negotiation_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Set TURN servers (builder pattern)
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Set the participant ID (builder pattern)
    pub fn with_participant_id(mut self, participant_id: &str) -> Self {
        self.participant_id = Some(participant_id.to_string());
        self
    }

    /// Set maximum peers (builder pattern)
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Set the negotiation timeout (builder pattern)
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_max_peers_fails() {
        let mut config = SessionConfig::default();
        config.max_peers = 0;
        assert!(config.validate().is_err());

        config.max_peers = 33;
        assert!(config.validate().is_err());

        config.max_peers = 32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_relay_url_fails() {
        let config = SessionConfig::new("http://localhost:8080");
        assert!(config.validate().unwrap_err().is_config_error());

        let config = SessionConfig::new("not a url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_queue_and_timeout_fail() {
        let mut config = SessionConfig::default();
        config.ice_candidate_queue = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.negotiation_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_media_fails() {
        let mut config = SessionConfig::default();
        config.media = MediaConstraints {
            audio: false,
            video: false,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_ice_server_scheme_fails() {
        let config = SessionConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "stun:wrong.example.com".to_string(),
            username: "u".to_string(),
            credential: "p".to_string(),
        }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_with_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            relay_url = "wss://relay.example.com/ws"
            participant_id = "alice"
            max_peers = 4
            negotiation_timeout_secs = 20

            [media]
            video = false
            "#,
        )
        .unwrap();

        assert_eq!(config.relay_url, "wss://relay.example.com/ws");
        assert_eq!(config.max_peers, 4);
        assert!(config.media.audio);
        assert!(!config.media.video);
        assert_eq!(config.ice_candidate_queue, 100);
        assert!(config.validate().is_ok());

        let options = config.peer_options();
        assert_eq!(options.negotiation_timeout, Some(Duration::from_secs(20)));
        assert_eq!(config.local_id().unwrap().as_str(), "alice");
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = SessionConfig::from_toml_str("max_peers = \"many\"").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relay_url = \"ws://127.0.0.1:9000/ws\"").unwrap();
        writeln!(file, "buffer_orphan_candidates = true").unwrap();

        let config = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.relay_url, "ws://127.0.0.1:9000/ws");
        assert!(config.peer_options().buffer_orphan_candidates);
    }

    #[test]
    fn test_local_id_generated_when_absent() {
        let config = SessionConfig::default();
        assert_ne!(config.local_id().unwrap(), config.local_id().unwrap());
    }

    #[test]
    fn test_builder_chain() {
        let config = SessionConfig::new("ws://localhost:8080/ws")
            .with_participant_id("bob")
            .with_max_peers(3)
            .with_negotiation_timeout(Duration::from_secs(15));

        assert_eq!(config.participant_id.as_deref(), Some("bob"));
        assert_eq!(config.max_peers, 3);
        assert_eq!(config.negotiation_timeout_secs, Some(15));
    }
}
