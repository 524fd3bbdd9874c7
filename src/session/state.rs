//! Connection state machine for the live session.
//!
//! [`ConnectionState`] is the single authoritative value consumers read;
//! only the session manager (through [`ConnectionTracker`]) writes it.
//!
//! The transitions are:
//!
//! ```text
//! Idle ──start──▶ Connecting ──open──▶ Connected
//! Connecting / Connected ──transport error──▶ Error
//! Connecting / Connected ──transport close──▶ Disconnected
//! Disconnected / Error ──explicit new start──▶ Connecting
//! ```
//!
//! There is no silent path back to `Idle`: once a session has run, only an
//! explicit new `start()` moves the machine again.

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Connection lifecycle of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session has been started yet.
    Idle,

    /// `start()` was called; the duplex channel is being established.
    Connecting,

    /// The channel is open; audio and events are flowing.
    Connected,

    /// The remote endpoint closed the channel.
    Disconnected,

    /// A transport-level error ended the session.
    Error,
}

impl ConnectionState {
    /// True while the session holds live resources.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// A short human-readable label for status display.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Error => "Error",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

// ---------------------------------------------------------------------------
// ConnectionTracker
// ---------------------------------------------------------------------------

/// Owns the authoritative [`ConnectionState`] and enforces the transition
/// rules.
///
/// Transition methods return `Some(new_state)` when the state changed so the
/// caller can report it, and `None` for no-ops (e.g. a `Closed` event
/// arriving after the machine already reached `Error`).
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    state: ConnectionState,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True when `start()` is allowed: only from `Idle`, `Disconnected`, or
    /// `Error`.
    pub fn can_start(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Error
        )
    }

    /// Begin connecting.  Returns the new state, or `None` when a session is
    /// already active (the guard against a second concurrent start).
    pub fn begin_connect(&mut self) -> Option<ConnectionState> {
        if !self.can_start() {
            return None;
        }
        self.state = ConnectionState::Connecting;
        Some(self.state)
    }

    /// The duplex channel opened.
    pub fn on_connected(&mut self) -> Option<ConnectionState> {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
            Some(self.state)
        } else {
            None
        }
    }

    /// A transport-level error occurred.  Forces `Error` from any state
    /// except `Error` itself.
    pub fn on_transport_error(&mut self) -> Option<ConnectionState> {
        if self.state == ConnectionState::Error {
            return None;
        }
        self.state = ConnectionState::Error;
        Some(self.state)
    }

    /// The transport closed.  Forces `Disconnected` from the active states;
    /// a close arriving after `Error` (or before any start) is a no-op.
    pub fn on_transport_close(&mut self) -> Option<ConnectionState> {
        if self.state.is_active() {
            self.state = ConnectionState::Disconnected;
            Some(self.state)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
