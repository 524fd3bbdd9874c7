//! Duplex transport to the live generation endpoint.
//!
//! The wire protocol is JSON over a persistent WebSocket: the client sends
//! one setup message requesting audio-modality responses, both-direction
//! transcription, a fixed system instruction and a synthetic voice, then
//! streams `realtimeInput` media chunks; the server streams back
//! transcription fragments, inline audio, turn/interruption markers.
//!
//! Inbound messages are resolved into the [`ServerEvent`] union exactly once,
//! at this boundary ([`parse_server_message`]) — nothing downstream inspects
//! raw JSON.
//!
//! Outbound chunks go through an mpsc channel created before the writer
//! starts draining: anything sent while the connection is still resolving is
//! queued in order and flushed once the endpoint acknowledges setup, never
//! dropped and never sent early.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use crate::codec::{self, AudioChunk, PlaybackBuffer, PLAYBACK_RATE};
use crate::config::ApiConfig;
use crate::transcript::Speaker;

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// A typed inbound event from the live endpoint.
///
/// Produced by the transport, consumed exactly once by the session event
/// loop.  Source emission order is preserved; partial-transcript and
/// audio-frame events for the same turn may interleave.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A transcript fragment for one speaker; not yet finalized.
    PartialTranscript { speaker: Speaker, text: String },

    /// One decoded buffer of model audio.
    AudioFrame { buffer: PlaybackBuffer },

    /// The current conversational turn completed; partial transcripts
    /// finalize now.
    TurnComplete,

    /// The model was interrupted; in-progress playback must stop at once.
    Interrupted,

    /// A transport-level error reported by the endpoint or the socket.
    Error { message: String },

    /// The channel closed; no further events will arrive.
    Closed,
}

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Errors from opening or using the duplex channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The WebSocket handshake or setup message failed.
    #[error("failed to open live session: {0}")]
    Connect(String),

    /// The handshake did not resolve within the configured timeout.
    #[error("live session connect timed out")]
    Timeout,

    /// An operation was attempted after the channel closed.
    #[error("live session is closed")]
    SessionClosed,
}

// ---------------------------------------------------------------------------
// OutboundSender
// ---------------------------------------------------------------------------

/// Fire-and-forget handle for outbound audio chunks.
///
/// Wraps the queue drained by the writer task.  The queue is unbounded so
/// chunks produced while the handshake is still resolving are never dropped;
/// growth stays bounded in practice by the capture cadence (a few chunks per
/// second) and the connect timeout.  Sending never blocks the capture path;
/// a closed queue fails with [`TransportError::SessionClosed`].
#[derive(Clone)]
#[derive(Debug)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<AudioChunk>,
}

impl OutboundSender {
    pub fn send(&self, chunk: AudioChunk) -> Result<(), TransportError> {
        self.tx
            .send(chunk)
            .map_err(|_| TransportError::SessionClosed)
    }
}

// ---------------------------------------------------------------------------
// LiveConnection / LiveConnector
// ---------------------------------------------------------------------------

/// An open duplex session: one outbound audio queue, one inbound event
/// stream.
#[derive(Debug)]
pub struct LiveConnection {
    /// Queue of wire-ready audio chunks, flushed in order by the transport.
    pub outbound: OutboundSender,
    /// Typed inbound events, in source emission order.
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Object-safe, thread-safe interface for opening a live session.
///
/// [`GeminiConnector`] is the production implementation; tests substitute a
/// scripted mock so the full session can run without a network.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Establish the duplex channel using the resolved API key.
    async fn connect(&self, api_key: &str) -> Result<LiveConnection, TransportError>;
}

// ---------------------------------------------------------------------------
// Wire message construction
// ---------------------------------------------------------------------------

/// Build the one-time setup message sent immediately after the handshake.
fn setup_message(config: &ApiConfig) -> serde_json::Value {
    serde_json::json!({
        "setup": {
            "model": format!("models/{}", config.model),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": config.system_instruction }]
            },
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    })
}

/// Wrap one outbound audio chunk as a `realtimeInput` message.
fn realtime_input_message(chunk: &AudioChunk) -> serde_json::Value {
    serde_json::json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": chunk.mime_type,
                "data": chunk.data
            }]
        }
    })
}

/// Extract the sample rate from a `audio/pcm;rate=NNNNN` descriptor.
fn mime_rate(mime: &str) -> Option<u32> {
    mime.split(';')
        .find_map(|part| part.trim().strip_prefix("rate="))
        .and_then(|rate| rate.parse().ok())
}

// ---------------------------------------------------------------------------
// Inbound message parsing
// ---------------------------------------------------------------------------

/// Parse one inbound wire message into zero or more [`ServerEvent`]s.
///
/// A single message may carry several fields at once (a transcript fragment
/// *and* an audio part *and* a turn marker); events are emitted in the
/// server's field order: transcripts, turn completion, audio, interruption.
/// Unknown fields are ignored.
pub fn parse_server_message(text: &str) -> Vec<ServerEvent> {
    let msg: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return vec![ServerEvent::Error {
                message: format!("malformed server message: {e}"),
            }]
        }
    };

    if let Some(err) = msg.get("error") {
        let message = err["message"]
            .as_str()
            .unwrap_or("unspecified server error")
            .to_string();
        return vec![ServerEvent::Error { message }];
    }

    let Some(content) = msg.get("serverContent") else {
        // setupComplete and other bookkeeping messages carry no events.
        return Vec::new();
    };

    let mut events = Vec::new();

    if let Some(text) = content["outputTranscription"]["text"].as_str() {
        events.push(ServerEvent::PartialTranscript {
            speaker: Speaker::Model,
            text: text.to_string(),
        });
    }
    if let Some(text) = content["inputTranscription"]["text"].as_str() {
        events.push(ServerEvent::PartialTranscript {
            speaker: Speaker::User,
            text: text.to_string(),
        });
    }

    if content["turnComplete"].as_bool() == Some(true) {
        events.push(ServerEvent::TurnComplete);
    }

    if let Some(parts) = content["modelTurn"]["parts"].as_array() {
        for part in parts {
            let Some(data) = part["inlineData"]["data"].as_str() else {
                continue;
            };
            let rate = part["inlineData"]["mimeType"]
                .as_str()
                .and_then(mime_rate)
                .unwrap_or(PLAYBACK_RATE);

            match codec::decode_frame(data, rate, 1) {
                Ok(buffer) => events.push(ServerEvent::AudioFrame { buffer }),
                Err(e) => events.push(ServerEvent::Error {
                    message: format!("undecodable audio frame: {e}"),
                }),
            }
        }
    }

    if content["interrupted"].as_bool() == Some(true) {
        events.push(ServerEvent::Interrupted);
    }

    events
}

/// True when the message is the endpoint's setup acknowledgement.
fn is_setup_complete(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|v| v.get("setupComplete").is_some())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// GeminiConnector
// ---------------------------------------------------------------------------

/// Production connector speaking the bidirectional generation protocol over
/// `tokio-tungstenite`.
pub struct GeminiConnector {
    config: ApiConfig,
}

impl GeminiConnector {
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    /// Open the WebSocket, send the setup message, and spawn the reader and
    /// writer tasks.
    ///
    /// The handshake is bounded by the configured connect timeout so a
    /// connection that never resolves surfaces [`TransportError::Timeout`]
    /// instead of hanging in `Connecting` forever.
    async fn connect(&self, api_key: &str) -> Result<LiveConnection, TransportError> {
        let url = format!("{}?key={}", self.config.endpoint, api_key);

        let handshake = tokio_tungstenite::connect_async(&url);
        let timeout = std::time::Duration::from_secs(self.config.connect_timeout_secs);
        let (ws, _response) = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        log::info!("transport: WebSocket open, sending setup");

        let (mut sink, stream) = ws.split();
        sink.send(Message::Text(setup_message(&self.config).to_string()))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(64);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<AudioChunk>();

        tokio::spawn(reader_task(stream, event_tx, ready_tx));
        tokio::spawn(writer_task(sink, outbound_rx, ready_rx));

        Ok(LiveConnection {
            outbound: OutboundSender { tx: outbound_tx },
            events: event_rx,
        })
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Drain inbound WebSocket messages into typed events.
///
/// Signals `ready` once the endpoint acknowledges setup so the writer can
/// start flushing queued audio.  Emits [`ServerEvent::Closed`] exactly once
/// when the socket ends cleanly, or [`ServerEvent::Error`] when it fails.
async fn reader_task(
    mut stream: WsStream,
    event_tx: mpsc::Sender<ServerEvent>,
    ready_tx: oneshot::Sender<()>,
) {
    let mut ready_tx = Some(ready_tx);

    while let Some(result) = stream.next().await {
        let text = match result {
            // The endpoint sends JSON in both text and binary frames.
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    log::warn!("transport: non-UTF-8 binary frame ignored");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue, // Ping/Pong handled by tungstenite
            Err(e) => {
                let _ = event_tx
                    .send(ServerEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        if is_setup_complete(&text) {
            log::debug!("transport: setup complete");
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(());
            }
            continue;
        }

        for event in parse_server_message(&text) {
            if event_tx.send(event).await.is_err() {
                // Event loop gone; the session is tearing down.
                return;
            }
        }
    }

    let _ = event_tx.send(ServerEvent::Closed).await;
}

/// Flush queued outbound chunks once setup is acknowledged, in order.
///
/// When the outbound queue closes (session teardown) the socket is closed
/// with a proper Close frame.
async fn writer_task(
    mut sink: WsSink,
    mut outbound_rx: mpsc::UnboundedReceiver<AudioChunk>,
    ready_rx: oneshot::Receiver<()>,
) {
    // Chunks queued before this point are buffered in the channel; they are
    // flushed in order below, never sent before the endpoint is ready.
    if ready_rx.await.is_err() {
        log::debug!("transport: connection ended before setup completed");
        outbound_rx.close();
        return;
    }

    while let Some(chunk) = outbound_rx.recv().await {
        let msg = realtime_input_message(&chunk).to_string();
        if let Err(e) = sink.send(Message::Text(msg)).await {
            log::warn!("transport: send failed, stopping writer: {e}");
            return;
        }
    }

    log::debug!("transport: outbound queue closed, closing socket");
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

// ---------------------------------------------------------------------------
// MockConnector  (test-only)
// ---------------------------------------------------------------------------

/// A scripted connector that never touches the network.
///
/// Delivers one pre-programmed event sequence per `connect` call and records
/// every outbound chunk, so the full session lifecycle — including restarts —
/// can be exercised in tests.
#[cfg(test)]
pub struct MockConnector {
    scripts: std::sync::Mutex<std::collections::VecDeque<Vec<ServerEvent>>>,
    sent: std::sync::Arc<std::sync::Mutex<Vec<AudioChunk>>>,
    fail_connect: bool,
}

#[cfg(test)]
impl MockConnector {
    /// Connector that delivers `script` after a successful connect.
    pub fn with_script(script: Vec<ServerEvent>) -> Self {
        Self::with_scripts(vec![script])
    }

    /// Connector serving one script per successive `connect` call.
    pub fn with_scripts(scripts: Vec<Vec<ServerEvent>>) -> Self {
        Self {
            scripts: std::sync::Mutex::new(scripts.into()),
            sent: Default::default(),
            fail_connect: false,
        }
    }

    /// Connector whose `connect` always fails.
    pub fn failing() -> Self {
        Self {
            scripts: std::sync::Mutex::new(Default::default()),
            sent: Default::default(),
            fail_connect: true,
        }
    }

    /// Chunks recorded by the mock writer so far.
    pub fn sent(&self) -> std::sync::Arc<std::sync::Mutex<Vec<AudioChunk>>> {
        std::sync::Arc::clone(&self.sent)
    }
}

#[cfg(test)]
#[async_trait]
impl LiveConnector for MockConnector {
    async fn connect(&self, _api_key: &str) -> Result<LiveConnection, TransportError> {
        if self.fail_connect {
            return Err(TransportError::Connect("mock refused".into()));
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted connection left");

        let (event_tx, event_rx) = mpsc::channel(64);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<AudioChunk>();

        let sent = std::sync::Arc::clone(&self.sent);
        tokio::spawn(async move {
            while let Some(chunk) = outbound_rx.recv().await {
                sent.lock().unwrap().push(chunk);
            }
        });

        tokio::spawn(async move {
            for event in script {
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(LiveConnection {
            outbound: OutboundSender { tx: outbound_tx },
            events: event_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
