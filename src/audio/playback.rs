//! Gapless playback scheduling for inbound model audio.
//!
//! Decoded audio arrives in bursts — several frames back-to-back, then
//! nothing while the model thinks.  [`Mixer`] turns that into gapless,
//! non-overlapping playback against the output device's sample clock:
//!
//! * `position` — samples played so far; this *is* the device clock.
//! * `next_start` — the scheduling cursor: where the next buffer begins.
//!
//! Each scheduled buffer starts at `max(next_start, position)` and advances
//! the cursor by its length, so buffers play back-to-back regardless of
//! arrival timing and are never scheduled into the past.  An interruption
//! force-stops every active source and resets the cursor to zero so the next
//! buffer plays immediately.
//!
//! [`AudioPlayer`] owns the cpal output device and calls [`Mixer::fill`]
//! from the audio callback.  All other mixer mutations happen on the session
//! event loop; the `Mutex` is the single producer/consumer boundary between
//! the two.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::resample;
use crate::codec::PlaybackBuffer;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up the output device.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

/// One scheduled buffer in the active set.
///
/// Exclusively owned by the mixer from schedule time until natural
/// completion or forced stop.
#[derive(Debug)]
struct Source {
    /// Absolute start position on the sample clock.
    start: u64,
    /// Mono samples at the device rate.
    samples: Vec<f32>,
}

impl Source {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Sample-clock playback scheduler.
///
/// Hardware-free: the device callback drives it through [`fill`], tests
/// drive it the same way.  All positions are in mono samples at the output
/// device rate.
///
/// [`fill`]: Mixer::fill
#[derive(Debug)]
pub struct Mixer {
    /// Samples played so far — the device clock.
    position: u64,
    /// Scheduling cursor: where the next buffer will start.  Never moves
    /// backward except the explicit reset in [`interrupt`](Mixer::interrupt).
    next_start: u64,
    /// Active-source set; sources are removed on natural completion in
    /// [`fill`](Mixer::fill) or forcibly in [`interrupt`](Mixer::interrupt).
    sources: Vec<Source>,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            position: 0,
            next_start: 0,
            sources: Vec::new(),
        }
    }

    /// Schedule `samples` for gapless playback.
    ///
    /// Returns the absolute start position assigned to the buffer.
    pub fn schedule(&mut self, samples: Vec<f32>) -> u64 {
        if samples.is_empty() {
            return self.next_start;
        }

        self.next_start = self.next_start.max(self.position);
        let start = self.next_start;
        self.next_start += samples.len() as u64;
        self.sources.push(Source { start, samples });
        start
    }

    /// Force-stop every active source (including ones mid-playback), clear
    /// the set, and reset the cursor so the next buffer plays immediately.
    pub fn interrupt(&mut self) {
        self.sources.clear();
        self.next_start = 0;
    }

    /// Mix scheduled audio into `out`, advancing the clock by `out.len()`.
    ///
    /// Positions with no scheduled source produce silence.  Completed
    /// sources are dropped from the active set.
    pub fn fill(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        for source in &self.sources {
            // Window of `source` that overlaps this output block.
            let block_start = self.position;
            let block_end = self.position + out.len() as u64;
            let lo = source.start.max(block_start);
            let hi = source.end().min(block_end);
            if lo >= hi {
                continue;
            }

            let src_off = (lo - source.start) as usize;
            let dst_off = (lo - block_start) as usize;
            let len = (hi - lo) as usize;
            for i in 0..len {
                out[dst_off + i] += source.samples[src_off + i];
            }
        }

        self.position += out.len() as u64;
        let position = self.position;
        self.sources.retain(|s| s.end() > position);
    }

    /// Current device-clock position in samples.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current scheduling cursor in samples.
    pub fn next_start(&self) -> u64 {
        self.next_start
    }

    /// Number of sources in the active set.
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// MixerHandle
// ---------------------------------------------------------------------------

/// Cloneable, `Send` handle to a player's [`Mixer`].
///
/// cpal streams cannot leave the thread that created them, but scheduling
/// and interruption happen on the session event loop — this handle carries
/// just the shared mixer (and the device rate for resampling) across that
/// boundary.
#[derive(Clone)]
pub struct MixerHandle {
    mixer: Arc<Mutex<Mixer>>,
    /// Native sample rate of the output device (Hz).
    sample_rate: u32,
}

impl MixerHandle {
    /// Schedule a decoded buffer for gapless playback, resampling from its
    /// source rate to the device rate.
    pub fn schedule(&self, buffer: &PlaybackBuffer) {
        let samples = resample(&buffer.samples, buffer.sample_rate, self.sample_rate);
        let start = self.mixer.lock().unwrap().schedule(samples);
        log::debug!(
            "playback: scheduled {} samples at position {start}",
            buffer.samples.len()
        );
    }

    /// Force-stop all playback and reset the scheduling cursor.
    pub fn interrupt(&self) {
        self.mixer.lock().unwrap().interrupt();
        log::debug!("playback: interrupted, active set cleared");
    }

    /// Native sample rate of the output device in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// ---------------------------------------------------------------------------
// AudioPlayer
// ---------------------------------------------------------------------------

/// Output device wrapper that plays whatever the [`Mixer`] has scheduled.
///
/// Owns the cpal output stream; dropping the player stops the stream and
/// releases the device.  Inbound buffers are resampled from their source
/// rate (24 kHz from the live endpoint) to the device rate before
/// scheduling.
pub struct AudioPlayer {
    handle: MixerHandle,
    _stream: cpal::Stream,
}

impl AudioPlayer {
    /// Open the system default output device and start the stream.
    ///
    /// The stream plays silence until something is scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::NoDevice`] when no output device is
    /// available; the builder/play variants if the platform rejects the
    /// stream configuration.  Nothing is left acquired on failure.
    pub fn new() -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(PlaybackError::NoDevice)?;

        let supported = device.default_output_config()?;
        let channels = supported.channels() as usize;
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let mixer = Arc::new(Mutex::new(Mixer::new()));
        let cb_mixer = Arc::clone(&mixer);
        let mut scratch: Vec<f32> = Vec::new();

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                scratch.resize(frames, 0.0);
                cb_mixer.lock().unwrap().fill(&mut scratch);

                // Mono mix written to every output channel.
                for (frame, &s) in data.chunks_exact_mut(channels).zip(scratch.iter()) {
                    frame.fill(s);
                }
            },
            |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
            },
            None,
        )?;

        stream.play()?;

        Ok(Self {
            handle: MixerHandle { mixer, sample_rate },
            _stream: stream,
        })
    }

    /// A `Send` handle to the mixer, usable from any thread.
    pub fn handle(&self) -> MixerHandle {
        self.handle.clone()
    }

    /// Schedule a decoded buffer for gapless playback.
    pub fn schedule(&self, buffer: &PlaybackBuffer) {
        self.handle.schedule(buffer);
    }

    /// Force-stop all playback and reset the scheduling cursor.
    pub fn interrupt(&self) {
        self.handle.interrupt();
    }

    /// Native sample rate of the output device in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.handle.sample_rate
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mixer: &mut Mixer, samples: usize) -> Vec<f32> {
        let mut out = vec![0.0; samples];
        mixer.fill(&mut out);
        out
    }

    // ---- back-to-back scheduling -------------------------------------------

    #[test]
    fn buffers_schedule_back_to_back() {
        let mut mixer = Mixer::new();
        let s1 = mixer.schedule(vec![0.1; 100]);
        let s2 = mixer.schedule(vec![0.2; 50]);
        let s3 = mixer.schedule(vec![0.3; 25]);

        // i-th start = (i-1)-th start + its duration.
        assert_eq!(s1, 0);
        assert_eq!(s2, 100);
        assert_eq!(s3, 150);
        assert_eq!(mixer.next_start(), 175);
    }

    #[test]
    fn never_schedules_into_the_past() {
        let mut mixer = Mixer::new();
        mixer.schedule(vec![0.1; 10]);

        // Clock runs past the end of the first buffer.
        drain(&mut mixer, 100);
        assert_eq!(mixer.position(), 100);

        // A late buffer must start now, not at the stale cursor (10).
        let start = mixer.schedule(vec![0.2; 10]);
        assert_eq!(start, 100);
    }

    #[test]
    fn scheduled_buffers_never_overlap() {
        let mut mixer = Mixer::new();
        // Constant amplitude buffers: any overlap would sum above 0.3.
        for _ in 0..4 {
            mixer.schedule(vec![0.3; 64]);
        }
        let out = drain(&mut mixer, 4 * 64);
        for &s in &out {
            assert!(s <= 0.3 + 1e-6, "overlapping playback detected: {s}");
        }
    }

    #[test]
    fn gap_free_output_across_buffer_boundary() {
        let mut mixer = Mixer::new();
        mixer.schedule(vec![0.5; 32]);
        mixer.schedule(vec![0.5; 32]);

        let out = drain(&mut mixer, 64);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    // ---- fill / completion -------------------------------------------------

    #[test]
    fn fill_produces_silence_when_nothing_scheduled() {
        let mut mixer = Mixer::new();
        let out = drain(&mut mixer, 16);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn completed_sources_leave_the_active_set() {
        let mut mixer = Mixer::new();
        mixer.schedule(vec![0.1; 20]);
        mixer.schedule(vec![0.1; 20]);
        assert_eq!(mixer.active_sources(), 2);

        drain(&mut mixer, 20);
        assert_eq!(mixer.active_sources(), 1);

        drain(&mut mixer, 20);
        assert_eq!(mixer.active_sources(), 0);
    }

    #[test]
    fn partial_fill_keeps_source_active() {
        let mut mixer = Mixer::new();
        mixer.schedule(vec![0.4; 30]);
        drain(&mut mixer, 10);
        assert_eq!(mixer.active_sources(), 1);

        let out = drain(&mut mixer, 20);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
        assert_eq!(mixer.active_sources(), 0);
    }

    #[test]
    fn empty_buffer_is_ignored() {
        let mut mixer = Mixer::new();
        mixer.schedule(Vec::new());
        assert_eq!(mixer.active_sources(), 0);
        assert_eq!(mixer.next_start(), 0);
    }

    // ---- interruption ------------------------------------------------------

    #[test]
    fn interrupt_clears_active_set_and_resets_cursor() {
        let mut mixer = Mixer::new();
        mixer.schedule(vec![0.1; 1000]);
        mixer.schedule(vec![0.1; 1000]);
        drain(&mut mixer, 100); // first source is mid-playback

        mixer.interrupt();
        assert_eq!(mixer.active_sources(), 0);
        assert_eq!(mixer.next_start(), 0);

        // Output is silent immediately after the interrupt.
        let out = drain(&mut mixer, 50);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn buffer_after_interrupt_plays_immediately() {
        let mut mixer = Mixer::new();
        mixer.schedule(vec![0.1; 10_000]);
        drain(&mut mixer, 500);
        mixer.interrupt();

        // max(next_start, position) makes the next buffer start right now.
        let start = mixer.schedule(vec![0.2; 100]);
        assert_eq!(start, mixer.position());

        let out = drain(&mut mixer, 100);
        assert!(out.iter().all(|&s| (s - 0.2).abs() < 1e-6));
    }

    #[test]
    fn cursor_never_moves_backward_without_interrupt() {
        let mut mixer = Mixer::new();
        let mut last = 0;
        for len in [10u64, 200, 3, 77] {
            mixer.schedule(vec![0.0; len as usize]);
            assert!(mixer.next_start() >= last);
            last = mixer.next_start();
            drain(&mut mixer, 50);
        }
    }
}
