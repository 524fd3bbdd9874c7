//! Fixed-size frame chunking for the capture bridge.
//!
//! The wire format sends microphone audio in fixed-size frames (4096 mono
//! samples at 16 kHz, ~256 ms).  Hardware buffers rarely line up with that
//! size, so [`FrameChunker`] accumulates incoming samples and emits complete
//! frames, carrying the remainder into the next push.

/// Samples per outbound frame (mono, 16 kHz).
pub const FRAME_SAMPLES: usize = 4096;

// ---------------------------------------------------------------------------
// FrameChunker
// ---------------------------------------------------------------------------

/// Accumulates mono samples and yields exact fixed-size frames.
///
/// # Example
///
/// ```rust
/// use voice_live::audio::{FrameChunker, FRAME_SAMPLES};
///
/// let mut chunker = FrameChunker::new(FRAME_SAMPLES);
/// let frames = chunker.push(&vec![0.0_f32; FRAME_SAMPLES + 100]);
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].len(), FRAME_SAMPLES);
/// assert_eq!(chunker.pending(), 100);
/// ```
#[derive(Debug)]
pub struct FrameChunker {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    /// Create a chunker emitting frames of `frame_size` samples.
    ///
    /// # Panics
    ///
    /// Panics if `frame_size == 0`.
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "FrameChunker frame_size must be > 0");
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append `samples` and return every complete frame now available.
    ///
    /// Leftover samples stay buffered for the next push.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Number of buffered samples not yet forming a complete frame.
    ///
    /// Outbound audio is fire-and-forget; a sub-frame tail left at session
    /// stop is dropped with the chunker rather than padded and sent.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_push_yields_no_frames() {
        let mut chunker = FrameChunker::new(8);
        assert!(chunker.push(&[0.0; 5]).is_empty());
        assert_eq!(chunker.pending(), 5);
    }

    #[test]
    fn exact_push_yields_one_frame() {
        let mut chunker = FrameChunker::new(8);
        let frames = chunker.push(&[0.5; 8]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], vec![0.5; 8]);
        assert_eq!(chunker.pending(), 0);
    }

    #[test]
    fn remainder_carries_over() {
        let mut chunker = FrameChunker::new(8);
        assert!(chunker.push(&[1.0; 6]).is_empty());

        // 6 buffered + 6 new = 12 → one frame of 8, 4 left over.
        let frames = chunker.push(&[2.0; 6]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..6], &[1.0; 6]);
        assert_eq!(&frames[0][6..], &[2.0; 2]);
        assert_eq!(chunker.pending(), 4);
    }

    #[test]
    fn large_push_yields_multiple_frames() {
        let mut chunker = FrameChunker::new(4);
        let frames = chunker.push(&[0.0; 10]);
        assert_eq!(frames.len(), 2);
        assert_eq!(chunker.pending(), 2);
    }

    #[test]
    fn samples_stay_in_order() {
        let mut chunker = FrameChunker::new(4);
        let input: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let frames = chunker.push(&input);
        assert_eq!(frames[0], vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(frames[1], vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(chunker.pending(), 1);
    }

    #[test]
    #[should_panic]
    fn zero_frame_size_panics() {
        let _ = FrameChunker::new(0);
    }
}
