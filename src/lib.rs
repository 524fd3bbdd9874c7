//! voice-live — realtime duplex voice conversation over a live generation
//! endpoint.
//!
//! The crate captures microphone audio, streams it to a bidirectional
//! generation service as 16 kHz PCM16, and plays the model's synthesized
//! speech back gaplessly while surfacing live transcription of both sides
//! of the conversation.
//!
//! # Architecture
//!
//! ```text
//! mic ─▶ audio::capture ─▶ downmix/resample/frame ─▶ codec ─▶ transport ─▶ WS
//! WS ─▶ transport ─▶ ServerEvent ─▶ session::manager ─┬─▶ transcript
//!                                                     └─▶ audio::playback ─▶ speaker
//! ```
//!
//! [`session::SessionManager`] owns the lifecycle; everything else is a
//! building block it composes.

pub mod audio;
pub mod codec;
pub mod config;
pub mod session;
pub mod transcript;

pub use config::AppConfig;
pub use session::{ConnectionState, SessionError, SessionManager, SessionObserver};
pub use transcript::{Speaker, TranscriptEntry};
