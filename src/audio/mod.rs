//! Audio pipeline — microphone capture → resampling → framing, and scheduled
//! playback of inbound model audio.
//!
//! # Capture side
//!
//! ```text
//! Microphone → cpal callback → RawChunk (mpsc) → downmix_mono
//!           → resample (native → 16 kHz) → FrameChunker → codec::encode_frame
//! ```
//!
//! # Playback side
//!
//! ```text
//! codec::decode_frame → resample (24 kHz → device rate) → Mixer (sample-clock
//! scheduler) → cpal output callback
//! ```

pub mod capture;
pub mod frame;
pub mod playback;
pub mod resample;

pub use capture::{AudioCapture, CaptureError, RawChunk, StreamHandle};
pub use frame::{FrameChunker, FRAME_SAMPLES};
pub use playback::{AudioPlayer, Mixer, MixerHandle, PlaybackError};
pub use resample::{downmix_mono, resample};
