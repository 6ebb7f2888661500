//! Relay signaling: wire protocol and the WebSocket channel

pub mod channel;
pub mod protocol;

pub use channel::{ChannelEvent, RelayEnd, SignalingChannel, SignalingSender};
pub use protocol::{
    EnvelopeKind, IceCandidate, Payload, Roster, SdpKind, SessionDescription, SignalingEnvelope,
};
