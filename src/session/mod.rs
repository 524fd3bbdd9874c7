//! Live session — connection state, duplex transport, and lifecycle
//! management.
//!
//! The flow at runtime:
//!
//! ```text
//! SessionManager::start
//!   ├─ resolve API key (config)
//!   ├─ LiveConnector::connect ──▶ reader / writer tasks
//!   ├─ AudioBackend::start    ──▶ audio bridge thread
//!   └─ run_events             ──▶ transcripts, playback, teardown
//! ```

pub mod manager;
pub mod state;
pub mod transport;

pub use manager::{
    AudioBackend, AudioSession, CpalBackend, SessionError, SessionManager, SessionObserver,
};
pub use state::{ConnectionState, ConnectionTracker};
pub use transport::{
    GeminiConnector, LiveConnection, LiveConnector, OutboundSender, ServerEvent, TransportError,
};
