//! PCM16 wire codec — `f32` samples ⇄ base64-encoded 16-bit PCM.
//!
//! The live endpoint expects microphone audio as base64 text over the wire:
//! little-endian signed 16-bit samples at 16 kHz mono, paired with a fixed
//! MIME descriptor.  Model audio arrives the same way at 24 kHz.  Both
//! directions are handled by two pure functions:
//!
//! 1. [`encode_frame`] — capture side, `f32` → [`AudioChunk`].
//! 2. [`decode_frame`] — playback side, base64 → [`PlaybackBuffer`].
//!
//! Round-trip property: `decode(encode(x))` reproduces `x` within one
//! quantization step (±1/32768 per sample).

use base64::Engine;

/// Sample rate of outbound microphone audio in Hz.
pub const CAPTURE_RATE: u32 = 16_000;

/// Sample rate of inbound model audio in Hz.
pub const PLAYBACK_RATE: u32 = 24_000;

/// MIME descriptor attached to every outbound chunk.
pub const CAPTURE_MIME: &str = "audio/pcm;rate=16000";

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// One wire-ready unit of outbound audio.
///
/// Created once per capture frame, sent, then discarded — never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Base64-encoded little-endian 16-bit PCM.
    pub data: String,
    /// Fixed format descriptor (`audio/pcm;rate=16000`).
    pub mime_type: &'static str,
}

// ---------------------------------------------------------------------------
// PlaybackBuffer
// ---------------------------------------------------------------------------

/// A decoded inbound audio buffer, mono `f32` at `sample_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz (24 000 for the live endpoint).
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

/// Errors from decoding inbound wire audio.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The base64 payload could not be decoded.
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded byte count is not a whole number of 16-bit frames.
    #[error("PCM payload length {0} is not a multiple of the frame size")]
    Truncated(usize),

    /// Channel count of zero makes the frame layout undefined.
    #[error("audio frame declared zero channels")]
    ZeroChannels,
}

// ---------------------------------------------------------------------------
// encode_frame
// ---------------------------------------------------------------------------

/// Encode one mono 16 kHz capture frame for the wire.
///
/// Each sample is quantized via `round(x * 32768)` and **clamped** to the
/// `i16` range, so full-scale input (`±1.0`) saturates instead of wrapping
/// into an inverted-polarity click.
///
/// # Example
///
/// ```rust
/// use voice_live::codec::{encode_frame, CAPTURE_MIME};
///
/// let chunk = encode_frame(&[0.0, 0.5, -0.5]);
/// assert_eq!(chunk.mime_type, CAPTURE_MIME);
/// assert!(!chunk.data.is_empty());
/// ```
pub fn encode_frame(samples: &[f32]) -> AudioChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &x in samples {
        let q = (f64::from(x) * 32768.0).round();
        let s = q.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        bytes.extend_from_slice(&s.to_le_bytes());
    }

    AudioChunk {
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
        mime_type: CAPTURE_MIME,
    }
}

// ---------------------------------------------------------------------------
// decode_frame
// ---------------------------------------------------------------------------

/// Decode one inbound wire frame into a mono [`PlaybackBuffer`].
///
/// The payload is base64 over interleaved little-endian `i16`.  Multi-channel
/// frames are downmixed by averaging (the live endpoint sends mono, but the
/// frame declares its channel count and we honour it).  Each sample is
/// converted to `f32` via `/32768`.
///
/// # Errors
///
/// - [`CodecError::Base64`] — payload is not valid base64.
/// - [`CodecError::Truncated`] — byte count is not a whole number of
///   `channels × 2`-byte frames.
/// - [`CodecError::ZeroChannels`] — `channels == 0`.
pub fn decode_frame(
    data: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackBuffer, CodecError> {
    if channels == 0 {
        return Err(CodecError::ZeroChannels);
    }

    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;

    let frame_bytes = channels as usize * 2;
    if bytes.len() % frame_bytes != 0 {
        return Err(CodecError::Truncated(bytes.len()));
    }

    let n = channels as f32;
    let samples = bytes
        .chunks_exact(frame_bytes)
        .map(|frame| {
            frame
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                .sum::<f32>()
                / n
        })
        .collect();

    Ok(PlaybackBuffer {
        samples,
        sample_rate,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(samples: &[f32]) -> Vec<f32> {
        let chunk = encode_frame(samples);
        decode_frame(&chunk.data, CAPTURE_RATE, 1).unwrap().samples
    }

    // ---- round trip --------------------------------------------------------

    #[test]
    fn round_trip_within_one_quantization_step() {
        let input: Vec<f32> = (0..1024)
            .map(|i| ((i as f32) * 0.013).sin() * 0.9)
            .collect();
        let out = round_trip(&input);
        assert_eq!(out.len(), input.len());
        for (a, b) in input.iter().zip(out.iter()) {
            assert!(
                (a - b).abs() <= 1.0 / 32768.0,
                "sample drifted more than one step: {a} vs {b}"
            );
        }
    }

    #[test]
    fn round_trip_empty_frame() {
        assert!(round_trip(&[]).is_empty());
    }

    #[test]
    fn round_trip_silence_is_exact() {
        let out = round_trip(&[0.0; 64]);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    // ---- overflow handling -------------------------------------------------

    #[test]
    fn positive_full_scale_clamps_instead_of_wrapping() {
        // round(1.0 * 32768) = 32768 overflows i16 — must saturate to 32767,
        // never wrap to -32768.
        let out = round_trip(&[1.0]);
        assert!((out[0] - (32767.0 / 32768.0)).abs() < 1e-6);
    }

    #[test]
    fn negative_full_scale_is_representable() {
        let out = round_trip(&[-1.0]);
        assert!((out[0] - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_input_saturates() {
        let out = round_trip(&[2.5, -3.0]);
        assert!((out[0] - (32767.0 / 32768.0)).abs() < 1e-6);
        assert!((out[1] - (-1.0)).abs() < 1e-6);
    }

    // ---- wire format -------------------------------------------------------

    #[test]
    fn encode_uses_little_endian() {
        // 0.5 * 32768 = 16384 = 0x4000 → LE bytes [0x00, 0x40]
        let chunk = encode_frame(&[0.5]);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&chunk.data)
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0x40]);
    }

    #[test]
    fn encode_attaches_fixed_descriptor() {
        assert_eq!(encode_frame(&[0.0]).mime_type, "audio/pcm;rate=16000");
    }

    // ---- decode edge cases -------------------------------------------------

    #[test]
    fn decode_stereo_downmixes_to_mono() {
        // L = 0.5 (0x4000), R = -0.5 (0xC000) → average 0.0
        let bytes = [0x00u8, 0x40, 0x00, 0xC0];
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        let buf = decode_frame(&data, PLAYBACK_RATE, 2).unwrap();
        assert_eq!(buf.samples.len(), 1);
        assert!(buf.samples[0].abs() < 1e-6);
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(matches!(
            decode_frame("@@not-base64@@", PLAYBACK_RATE, 1),
            Err(CodecError::Base64(_))
        ));
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        // Three bytes cannot hold a whole i16 frame.
        let data = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(
            decode_frame(&data, PLAYBACK_RATE, 1),
            Err(CodecError::Truncated(3))
        ));
    }

    #[test]
    fn decode_rejects_zero_channels() {
        let data = base64::engine::general_purpose::STANDARD.encode([0u8, 0]);
        assert!(matches!(
            decode_frame(&data, PLAYBACK_RATE, 0),
            Err(CodecError::ZeroChannels)
        ));
    }

    #[test]
    fn playback_buffer_duration() {
        let buf = PlaybackBuffer {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
        };
        assert!((buf.duration_secs() - 1.0).abs() < 1e-9);
    }
}
