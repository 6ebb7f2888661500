//! Full-duplex signaling channel to the relay
//!
//! One WebSocket per session. Outbound envelopes go through a cloneable
//! [`SignalingSender`]; inbound frames are decoded into [`ChannelEvent`]s and
//! handed to whoever took the event receiver (the session loop). The channel
//! never reconnects: losing it produces exactly one [`ChannelEvent::Closed`].

use super::protocol::SignalingEnvelope;
use crate::participant::ParticipantId;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Event surfaced by the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A decoded envelope from the relay
    Envelope(SignalingEnvelope),

    /// Terminal: the channel is gone. Carries the cause when it was not a
    /// local `close()`.
    Closed(Option<String>),
}

/// Frame queued for the writer
#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close,
}

/// State shared by the channel, its senders and its I/O tasks
#[derive(Debug)]
struct Shared {
    open: AtomicBool,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Shared {
    /// Flip to closed; only the first caller emits the terminal event
    fn mark_closed(&self, reason: Option<String>) -> bool {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.events.send(ChannelEvent::Closed(reason));
            true
        } else {
            false
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn deliver(&self, envelope: SignalingEnvelope) {
        if self.is_open() {
            let _ = self.events.send(ChannelEvent::Envelope(envelope));
        }
    }

    /// Decode one text frame; undecodable and unsupported frames are skipped
    fn deliver_text(&self, text: &str) {
        match SignalingEnvelope::from_json(text) {
            Ok(envelope) => {
                debug!(kind = envelope.payload.label(), "Received signaling envelope");
                self.deliver(envelope);
            }
            Err(Error::InvalidMessage(reason)) => {
                debug!("Skipping signaling frame: {}", reason);
            }
            Err(e) => {
                warn!("Failed to decode signaling frame: {}", e);
            }
        }
    }
}

/// Cloneable outbound half of a [`SignalingChannel`]
#[derive(Debug, Clone)]
pub struct SignalingSender {
    local_id: ParticipantId,
    tx: mpsc::UnboundedSender<Outbound>,
    shared: Arc<Shared>,
}

impl SignalingSender {
    /// Encode and queue an envelope for transmission
    ///
    /// Fails with [`Error::SignalingChannel`] once the channel is closed.
    pub fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        if !self.shared.is_open() {
            return Err(Error::SignalingChannel("channel closed".to_string()));
        }

        let text = envelope.to_json()?;
        debug!(
            kind = envelope.payload.label(),
            to = ?envelope.to.as_ref().map(ParticipantId::as_str),
            "Sending signaling envelope"
        );

        self.tx.send(Outbound::Frame(text)).map_err(|_| {
            self.shared.mark_closed(Some("writer terminated".to_string()));
            Error::SignalingChannel("writer terminated".to_string())
        })
    }

    /// Whether the channel still accepts envelopes
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Identifier this channel was opened with
    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }
}

/// Signaling channel
pub struct SignalingChannel {
    sender: SignalingSender,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
}

impl SignalingChannel {
    /// Open a channel against `<relay_url>?id=<local_id>`
    ///
    /// Spawns a writer and a reader task. Returns once the WebSocket
    /// handshake completed.
    pub async fn connect(relay_url: &str, local_id: &ParticipantId) -> Result<Self> {
        let url = relay_endpoint(relay_url, local_id)?;
        info!("Connecting to relay: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::SignalingChannel(format!("Failed to connect: {}", e)))?;

        info!("Connected to relay as {}", local_id);

        let (write, read) = ws_stream.split();
        let (channel, rx) = Self::with_writer_queue(local_id.clone());

        tokio::spawn(writer_task(write, rx, channel.sender.shared.clone()));
        tokio::spawn(reader_task(read, channel.sender.shared.clone()));

        Ok(channel)
    }

    /// In-memory channel with no network underneath
    ///
    /// The returned [`RelayEnd`] plays the relay: it injects inbound frames
    /// and observes what the local side sends.
    pub fn detached(local_id: ParticipantId) -> (Self, RelayEnd) {
        let (channel, outbound) = Self::with_writer_queue(local_id);
        let relay = RelayEnd {
            outbound,
            shared: channel.sender.shared.clone(),
        };
        (channel, relay)
    }

    fn with_writer_queue(local_id: ParticipantId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            open: AtomicBool::new(true),
            events: events_tx,
        });

        let channel = Self {
            sender: SignalingSender {
                local_id,
                tx,
                shared,
            },
            events: Some(events_rx),
        };
        (channel, rx)
    }

    /// Send one envelope
    pub fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
        self.sender.send(envelope)
    }

    /// Cloneable sender for components that only transmit
    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    /// Take the inbound event stream (only once)
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events.take()
    }

    /// Identifier this channel was opened with
    pub fn local_id(&self) -> &ParticipantId {
        &self.sender.local_id
    }

    /// Whether the channel is still open
    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Close the channel
    ///
    /// Idempotent. The first call emits [`ChannelEvent::Closed`] and asks the
    /// writer to send a close frame.
    pub fn close(&self) {
        if self.sender.shared.mark_closed(None) {
            info!("Closing signaling channel");
            let _ = self.sender.tx.send(Outbound::Close);
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Relay side of a detached channel
pub struct RelayEnd {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
}

impl RelayEnd {
    /// Deliver an envelope to the local side
    pub fn deliver(&self, envelope: SignalingEnvelope) {
        self.shared.deliver(envelope);
    }

    /// Deliver a raw text frame, decoded the same way as network frames
    pub fn deliver_text(&self, text: &str) {
        self.shared.deliver_text(text);
    }

    /// Next envelope the local side sent; `None` once it closed
    pub async fn recv(&mut self) -> Option<SignalingEnvelope> {
        loop {
            match self.outbound.recv().await? {
                Outbound::Frame(text) => {
                    if let Ok(envelope) = SignalingEnvelope::from_json(&text) {
                        return Some(envelope);
                    }
                }
                Outbound::Close => return None,
            }
        }
    }

    /// Non-blocking variant of [`RelayEnd::recv`]
    pub fn try_recv(&mut self) -> Option<SignalingEnvelope> {
        loop {
            match self.outbound.try_recv().ok()? {
                Outbound::Frame(text) => {
                    if let Ok(envelope) = SignalingEnvelope::from_json(&text) {
                        return Some(envelope);
                    }
                }
                Outbound::Close => return None,
            }
        }
    }

    /// Drop the connection from the relay side
    pub fn disconnect(&self, reason: impl Into<String>) {
        self.shared.mark_closed(Some(reason.into()));
    }
}

/// Build `<relay_url>?id=<local_id>`
pub fn relay_endpoint(relay_url: &str, local_id: &ParticipantId) -> Result<url::Url> {
    let mut url = url::Url::parse(relay_url)
        .map_err(|e| Error::InvalidConfig(format!("Invalid relay URL '{}': {}", relay_url, e)))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(Error::InvalidConfig(format!(
            "Relay URL must use ws:// or wss://, got: {}",
            relay_url
        )));
    }

    url.query_pairs_mut().append_pair("id", local_id.as_str());
    Ok(url)
}

/// Writer task: forwards queued frames to the WebSocket
async fn writer_task(
    mut write: futures::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(text) => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    error!("Failed to send WebSocket message: {}", e);
                    shared.mark_closed(Some(e.to_string()));
                    break;
                }
            }
            Outbound::Close => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }

    debug!("Signaling writer task terminated");
}

/// Reader task: decodes frames until the socket ends
async fn reader_task(mut read: futures::stream::SplitStream<WsStream>, shared: Arc<Shared>) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => shared.deliver_text(&text),
            Some(Ok(Message::Close(frame))) => {
                info!("Relay closed the WebSocket connection");
                break Some(
                    frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by relay".to_string()),
                );
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                break Some(e.to_string());
            }
            None => break Some("connection ended".to_string()),
        }

        if !shared.is_open() {
            break None;
        }
    };

    shared.mark_closed(reason);
    debug!("Signaling reader task terminated");
}
