//! Session lifecycle management.
//!
//! [`SessionManager`] orchestrates one live conversation session end to end:
//! it resolves configuration, opens the duplex transport, attaches the
//! microphone and speaker, pumps inbound [`ServerEvent`]s through the
//! transcript aggregator and playback scheduler, and releases everything in
//! a fixed order on every stop path.
//!
//! Two seams keep the manager testable without hardware or network:
//! [`LiveConnector`] (the transport) and [`AudioBackend`] (the devices).
//! Production wires in [`GeminiConnector`](super::transport::GeminiConnector)
//! and [`CpalBackend`]; tests substitute scripted mocks.
//!
//! cpal streams cannot leave the thread that created them, so [`CpalBackend`]
//! runs a dedicated bridge thread that owns both device handles.  The thread
//! also runs the capture pipeline (downmix, resample to 16 kHz, frame,
//! encode) and its exit path enforces the teardown order: capture stream
//! first, then playback force-stopped and the output device released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::{
    downmix_mono, resample, AudioCapture, AudioPlayer, CaptureError, FrameChunker, MixerHandle,
    PlaybackError, RawChunk,
};
use crate::codec::{self, PlaybackBuffer};
use crate::config::{AppConfig, AudioConfig, ConfigError};
use crate::session::state::{ConnectionState, ConnectionTracker};
use crate::session::transport::{LiveConnector, OutboundSender, ServerEvent, TransportError};
use crate::transcript::{TranscriptAggregator, TranscriptEntry};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Errors surfaced by [`SessionManager::start`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session is already connecting or connected.
    #[error("a session is already active")]
    Busy,

    /// Required configuration could not be resolved; nothing was acquired.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The duplex channel could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The microphone could not be acquired.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The output device could not be acquired.
    #[error(transparent)]
    Playback(#[from] PlaybackError),

    /// The audio bridge thread could not be started.
    #[error("internal session failure: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// SessionObserver
// ---------------------------------------------------------------------------

/// Callback surface for session consumers (the CLI frontend, a UI, tests).
///
/// All callbacks are invoked from the session's internal tasks; implementors
/// must be cheap and non-blocking.
pub trait SessionObserver: Send + Sync {
    /// The connection state changed.
    fn on_connection_state_change(&self, state: ConnectionState);

    /// A transcript entry is available.  `is_final` is `false` for live
    /// partial fragments and `true` for entries finalized at a turn boundary.
    fn on_transcript_update(&self, entry: TranscriptEntry, is_final: bool);

    /// A transport or server error occurred.  Always followed by a state
    /// change to `Error`.
    fn on_error(&self, message: &str);
}

// ---------------------------------------------------------------------------
// AudioBackend seam
// ---------------------------------------------------------------------------

/// Factory for the device side of a session.
///
/// `start` acquires the microphone and the output device, begins feeding
/// encoded capture frames into `outbound`, and returns a running
/// [`AudioSession`].  On error nothing stays acquired.
pub trait AudioBackend: Send + Sync {
    fn start(
        &self,
        config: &AudioConfig,
        outbound: OutboundSender,
    ) -> Result<Box<dyn AudioSession>, SessionError>;
}

/// A running pair of audio devices bound to one session.
pub trait AudioSession: Send {
    /// Schedule a decoded model-audio buffer for gapless playback.
    fn schedule(&self, buffer: &PlaybackBuffer);

    /// Force-stop all playback immediately and reset the schedule.
    fn interrupt(&self);

    /// Release both devices: capture stream first, then playback
    /// force-stopped and the output closed.  Idempotent.
    fn stop(&mut self);
}

// ---------------------------------------------------------------------------
// CpalBackend  (production)
// ---------------------------------------------------------------------------

/// Production [`AudioBackend`] over the system default cpal devices.
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn start(
        &self,
        config: &AudioConfig,
        outbound: OutboundSender,
    ) -> Result<Box<dyn AudioSession>, SessionError> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let thread_config = config.clone();
        let join = std::thread::Builder::new()
            .name("audio-bridge".into())
            .spawn(move || bridge_thread(thread_config, outbound, thread_stop, ready_tx))
            .map_err(|e| SessionError::Internal(e.to_string()))?;

        // The thread reports either both devices acquired or the first
        // failure; in the failure case it has already released everything.
        let mixer = ready_rx
            .recv()
            .map_err(|_| SessionError::Internal("audio bridge exited during startup".into()))??;

        Ok(Box::new(CpalSession {
            mixer,
            stop,
            join: Some(join),
        }))
    }
}

/// Owns both cpal device handles for the lifetime of one session and runs
/// the capture pipeline: raw chunks → mono → 16 kHz → fixed frames →
/// base64 PCM16 → outbound queue.
fn bridge_thread(
    config: AudioConfig,
    outbound: OutboundSender,
    stop: Arc<AtomicBool>,
    ready_tx: std::sync::mpsc::Sender<Result<MixerHandle, SessionError>>,
) {
    let (raw_tx, raw_rx) = std::sync::mpsc::channel::<RawChunk>();

    let capture = match AudioCapture::new() {
        Ok(capture) => capture,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };
    let capture_handle = match capture.start(raw_tx) {
        Ok(handle) => handle,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    let player = match AudioPlayer::new() {
        Ok(player) => player,
        Err(e) => {
            // Microphone release happens before the error surfaces.
            drop(capture_handle);
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    if ready_tx.send(Ok(player.handle())).is_err() {
        return;
    }

    log::info!(
        "audio: bridge running (mic {} Hz × {}ch → {} Hz, speaker {} Hz)",
        capture.sample_rate(),
        capture.channels(),
        config.capture_rate,
        player.sample_rate()
    );

    let mut chunker = FrameChunker::new(config.frame_samples);
    'run: while !stop.load(Ordering::Relaxed) {
        match raw_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => {
                let mono = downmix_mono(&chunk.samples, chunk.channels);
                let narrow = resample(&mono, chunk.sample_rate, config.capture_rate);
                for frame in chunker.push(&narrow) {
                    if outbound.send(codec::encode_frame(&frame)).is_err() {
                        log::info!("audio: session closed, stopping capture");
                        break 'run;
                    }
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Fixed release order: microphone first, then playback force-stopped
    // before the output device closes.
    drop(capture_handle);
    player.interrupt();
    drop(player);
    log::info!("audio: bridge stopped, devices released");
}

struct CpalSession {
    mixer: MixerHandle,
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl AudioSession for CpalSession {
    fn schedule(&self, buffer: &PlaybackBuffer) {
        self.mixer.schedule(buffer);
    }

    fn interrupt(&self) {
        self.mixer.interrupt();
    }

    fn stop(&mut self) {
        if let Some(join) = self.join.take() {
            // Silence playback immediately; the bridge notices the flag
            // within its next poll interval and releases the devices.
            self.mixer.interrupt();
            self.stop.store(true, Ordering::Relaxed);
            if join.join().is_err() {
                log::warn!("audio: bridge thread panicked during stop");
            }
        }
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Orchestrates the full lifecycle of a live conversation session.
///
/// `start()` is guarded: only one session may be connecting or connected at
/// a time.  `stop()` is idempotent and releases resources in a fixed order
/// on every path, including server-initiated closes and errors.
pub struct SessionManager {
    config: AppConfig,
    connector: Arc<dyn LiveConnector>,
    backend: Arc<dyn AudioBackend>,
    observer: Arc<dyn SessionObserver>,
    tracker: Arc<Mutex<ConnectionTracker>>,
    active: Arc<Mutex<Option<Box<dyn AudioSession>>>>,
    /// Monotonic session counter.  Each `start()` bumps it; the event loop
    /// carries the value it was spawned with and ignores everything once a
    /// successor session exists, so a late event from an old transport can
    /// never touch the new session's state or devices.
    generation: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new(
        config: AppConfig,
        connector: Arc<dyn LiveConnector>,
        backend: Arc<dyn AudioBackend>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            config,
            connector,
            backend,
            observer,
            tracker: Arc::new(Mutex::new(ConnectionTracker::new())),
            active: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.tracker.lock().unwrap().state()
    }

    /// Start a session: resolve the API key, open the duplex channel, attach
    /// the audio devices, and begin pumping events.
    ///
    /// # Errors
    ///
    /// [`SessionError::Busy`] when a session is already active.  Any later
    /// failure moves the state machine to `Error` and releases whatever was
    /// acquired before returning.
    pub async fn start(&self) -> Result<(), SessionError> {
        // Claim the state machine first so a second concurrent start cannot
        // interleave with resource acquisition.
        let claimed = self.tracker.lock().unwrap().begin_connect();
        let Some(state) = claimed else {
            return Err(SessionError::Busy);
        };
        // This session supersedes any predecessor; a still-draining event
        // loop from an earlier transport stops acting from here on.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.observer.on_connection_state_change(state);
        log::info!("session: starting (generation {generation})");

        let api_key = match self.config.api.resolve_key().await {
            Ok(key) => key,
            Err(e) => return Err(self.fail(e.to_string(), e.into())),
        };

        let connection = match self.connector.connect(&api_key).await {
            Ok(connection) => connection,
            Err(e) => return Err(self.fail(e.to_string(), e.into())),
        };

        if let Some(state) = self.tracker.lock().unwrap().on_connected() {
            self.observer.on_connection_state_change(state);
        }
        log::info!("session: connected");

        // Devices attach only after the channel is open; a device failure
        // drops the connection (transport teardown) before surfacing.
        let audio = match self.backend.start(&self.config.audio, connection.outbound.clone()) {
            Ok(audio) => audio,
            Err(e) => {
                drop(connection);
                return Err(self.fail(e.to_string(), e));
            }
        };
        *self.active.lock().unwrap() = Some(audio);

        tokio::spawn(Self::run_events(
            connection.events,
            Arc::clone(&self.observer),
            Arc::clone(&self.tracker),
            Arc::clone(&self.active),
            generation,
            Arc::clone(&self.generation),
        ));

        Ok(())
    }

    /// Stop the session and release all resources.  Safe to call at any
    /// time, including when no session is active or after a remote close
    /// already tore everything down.
    ///
    /// Moves the state machine to `Disconnected` so the caller is
    /// immediately restartable — there is no waiting on the remote half of
    /// the close handshake.
    pub fn stop(&self) {
        log::info!("session: stop requested");
        teardown(&self.active);
        let change = self.tracker.lock().unwrap().on_transport_close();
        if let Some(state) = change {
            self.observer.on_connection_state_change(state);
        }
    }

    /// Report a start-path failure: notify, move to `Error`, release
    /// anything acquired so far, and hand the error back to the caller.
    fn fail(&self, message: String, error: SessionError) -> SessionError {
        log::error!("session: start failed: {message}");
        self.observer.on_error(&message);
        if let Some(state) = self.tracker.lock().unwrap().on_transport_error() {
            self.observer.on_connection_state_change(state);
        }
        teardown(&self.active);
        error
    }

    /// Single consumer of the inbound event stream.
    ///
    /// Runs until the transport closes its event channel.  Error and close
    /// events trigger full teardown so no path leaks a device handle.  Once
    /// a successor session starts (the shared generation counter moved past
    /// `generation`), remaining events are stale and the loop exits without
    /// touching anything.
    async fn run_events(
        mut events: mpsc::Receiver<ServerEvent>,
        observer: Arc<dyn SessionObserver>,
        tracker: Arc<Mutex<ConnectionTracker>>,
        active: Arc<Mutex<Option<Box<dyn AudioSession>>>>,
        generation: u64,
        current: Arc<AtomicU64>,
    ) {
        let mut aggregator = TranscriptAggregator::new();

        while let Some(event) = events.recv().await {
            if current.load(Ordering::SeqCst) != generation {
                log::debug!("session: dropping event for superseded session {generation}");
                break;
            }
            match event {
                ServerEvent::PartialTranscript { speaker, text } => {
                    let entry = aggregator.push_partial(speaker, &text);
                    observer.on_transcript_update(entry, false);
                }
                ServerEvent::TurnComplete => {
                    for entry in aggregator.finish_turn() {
                        observer.on_transcript_update(entry, true);
                    }
                }
                ServerEvent::AudioFrame { buffer } => {
                    if let Some(session) = active.lock().unwrap().as_ref() {
                        session.schedule(&buffer);
                    }
                }
                ServerEvent::Interrupted => {
                    log::info!("session: model interrupted, flushing playback");
                    if let Some(session) = active.lock().unwrap().as_ref() {
                        session.interrupt();
                    }
                }
                ServerEvent::Error { message } => {
                    log::error!("session: transport error: {message}");
                    observer.on_error(&message);
                    let change = tracker.lock().unwrap().on_transport_error();
                    if let Some(state) = change {
                        observer.on_connection_state_change(state);
                    }
                    teardown(&active);
                }
                ServerEvent::Closed => {
                    log::info!("session: transport closed");
                    let change = tracker.lock().unwrap().on_transport_close();
                    if let Some(state) = change {
                        observer.on_connection_state_change(state);
                    }
                    teardown(&active);
                }
            }
        }
    }
}

/// Release the audio session, if any.  Dropping it closes the outbound
/// queue, which in turn makes the transport send a Close frame.
fn teardown(active: &Mutex<Option<Box<dyn AudioSession>>>) {
    let taken = active.lock().unwrap().take();
    if let Some(mut session) = taken {
        log::info!("session: releasing audio resources");
        session.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
