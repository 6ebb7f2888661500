//! Mesh conferencing client entry point
//!
//! Joins a conference through a relay and logs session events until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Join with a random participant id
//! cargo run --bin meshcall -- --relay-url ws://localhost:8080/ws
//!
//! # Fixed id, audio only, settings from a file
//! cargo run --bin meshcall -- --id alice --no-video --config ./meshcall.toml
//!
//! # Configure STUN/TURN servers
//! cargo run --bin meshcall -- \
//!   --stun-servers stun:stun.l.google.com:19302 \
//!   --turn-servers turn:turn.example.com:3478:user:secret
//! ```

use anyhow::Context;
use clap::Parser;
use meshcall::{
    Session, SessionConfig, SessionEvent, SyntheticDevices, TurnServerConfig, WebRtcConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Full-mesh conferencing client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; command-line flags override it
    #[arg(short, long, env = "MESHCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Relay WebSocket URL
    #[arg(long, env = "MESHCALL_RELAY_URL")]
    relay_url: Option<String>,

    /// Participant id (random if omitted)
    #[arg(long, env = "MESHCALL_ID")]
    id: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "MESHCALL_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "MESHCALL_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Maximum concurrent peer connections
    #[arg(long, env = "MESHCALL_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Do not capture audio
    #[arg(long, default_value_t = false)]
    no_audio: bool,

    /// Do not capture video
    #[arg(long, default_value_t = false)]
    no_video: bool,

    /// Close peers still negotiating after this many seconds
    #[arg(long, env = "MESHCALL_NEGOTIATION_TIMEOUT")]
    negotiation_timeout_secs: Option<u64>,

    /// Log as JSON lines
    #[arg(long, default_value_t = false, env = "MESHCALL_LOG_JSON")]
    log_json: bool,
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:host:port:username:password)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    // Credential may contain colons
    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        credential: parts[4..].join(":"),
    })
}

/// Build the session configuration: file (or defaults), then CLI overrides
fn build_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SessionConfig::default(),
    };

    if let Some(relay_url) = &args.relay_url {
        config.relay_url = relay_url.clone();
    }
    if let Some(id) = &args.id {
        config.participant_id = Some(id.clone());
    }
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }
    if let Some(max_peers) = args.max_peers {
        config.max_peers = max_peers;
    }
    if args.no_audio {
        config.media.audio = false;
    }
    if args.no_video {
        config.media.video = false;
    }
    if args.negotiation_timeout_secs.is_some() {
        config.negotiation_timeout_secs = args.negotiation_timeout_secs;
    }

    for turn in &args.turn_servers {
        let turn_config = parse_turn_server(turn).map_err(anyhow::Error::msg)?;
        info!(
            "Adding TURN server: {} (user: {})",
            turn_config.url, turn_config.username
        );
        config.turn_servers.push(turn_config);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(version = meshcall::version(), "meshcall starting");

    let config = build_config(&args)?;
    let connector = Arc::new(WebRtcConnector::from_config(&config));

    let session = Session::join(config, Arc::new(SyntheticDevices), connector)
        .await
        .context("Failed to join conference")?;
    info!(participant = %session.local_id(), "Joined conference");

    let mut events = session.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, leaving");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Disconnected { reason }) => {
                    warn!(reason = ?reason, "Disconnected from relay");
                    break;
                }
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.leave().await?;
    info!("Left conference");
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::PeerJoined { participant } => info!(peer_id = %participant, "Peer joined"),
        SessionEvent::PeerLeft { participant } => info!(peer_id = %participant, "Peer left"),
        SessionEvent::PeerStateChanged {
            participant,
            from,
            to,
        } => info!(peer_id = %participant, %from, %to, "Peer state changed"),
        SessionEvent::PeerFailed {
            participant,
            reason,
        } => warn!(peer_id = %participant, "Peer failed: {}", reason),
        SessionEvent::SignalingError { reason } => warn!("Signaling error: {}", reason),
        SessionEvent::Disconnected { reason } => warn!(reason = ?reason, "Disconnected"),
    }
}

fn init_tracing(json: bool) {
    // RUST_LOG wins; default to info
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
