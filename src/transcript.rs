//! Transcript aggregation — partial fragments in, finalized entries out.
//!
//! The live endpoint streams transcription in small fragments, tagged by
//! direction: what the microphone heard ([`Speaker::User`]) and what the
//! model is saying ([`Speaker::Model`]).  [`TranscriptAggregator`] keeps one
//! accumulator per speaker and finalizes both at each turn boundary.
//!
//! Partial fragments are *also* forwarded unbuffered — the live-caption path
//! must not wait for a turn to complete.

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

/// Who produced a piece of transcript text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    /// Transcription of captured microphone speech.
    User,
    /// Transcription of the model's synthesized speech.
    Model,
}

impl Speaker {
    /// Short label for display ("You" / "Model").
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::User => "You",
            Speaker::Model => "Model",
        }
    }
}

// ---------------------------------------------------------------------------
// TranscriptEntry
// ---------------------------------------------------------------------------

/// One unit of transcript text attributed to a speaker.
///
/// Produced on two paths: unbuffered partials (live captions) and finalized
/// entries at turn completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

// ---------------------------------------------------------------------------
// TranscriptAggregator
// ---------------------------------------------------------------------------

/// Accumulates partial transcript fragments per speaker and finalizes them
/// at turn boundaries.
///
/// The two accumulators are independent; no cross-speaker ordering is
/// implied beyond the order entries are returned from [`finish_turn`].
///
/// [`finish_turn`]: TranscriptAggregator::finish_turn
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    user: String,
    model: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a partial fragment to `speaker`'s accumulator.
    ///
    /// Returns the fragment as a [`TranscriptEntry`] so the caller can
    /// forward it straight to the live-caption listener.  The fragment is
    /// stored verbatim — whitespace matters, because the endpoint splits
    /// words across fragments arbitrarily.
    pub fn push_partial(&mut self, speaker: Speaker, text: &str) -> TranscriptEntry {
        match speaker {
            Speaker::User => self.user.push_str(text),
            Speaker::Model => self.model.push_str(text),
        }
        TranscriptEntry {
            speaker,
            text: text.to_string(),
        }
    }

    /// Finalize the current turn.
    ///
    /// Emits one entry per speaker whose accumulated text is non-empty after
    /// trimming, user first.  Both accumulators are cleared unconditionally,
    /// including one that held only whitespace.
    pub fn finish_turn(&mut self) -> Vec<TranscriptEntry> {
        let mut entries = Vec::with_capacity(2);

        let user = std::mem::take(&mut self.user);
        if !user.trim().is_empty() {
            entries.push(TranscriptEntry {
                speaker: Speaker::User,
                text: user,
            });
        }

        let model = std::mem::take(&mut self.model);
        if !model.trim().is_empty() {
            entries.push(TranscriptEntry {
                speaker: Speaker::Model,
                text: model,
            });
        }

        entries
    }

    /// True when neither speaker has pending partial text.
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partials_concatenate_into_one_final_entry() {
        let mut agg = TranscriptAggregator::new();
        agg.push_partial(Speaker::User, "Hel");
        agg.push_partial(Speaker::User, "lo");

        let entries = agg.finish_turn();
        assert_eq!(
            entries,
            vec![TranscriptEntry {
                speaker: Speaker::User,
                text: "Hello".into()
            }]
        );
    }

    #[test]
    fn push_partial_returns_fragment_for_live_captions() {
        let mut agg = TranscriptAggregator::new();
        let entry = agg.push_partial(Speaker::Model, "Hi ");
        assert_eq!(entry.speaker, Speaker::Model);
        assert_eq!(entry.text, "Hi ");
    }

    #[test]
    fn whitespace_only_accumulator_finalizes_to_nothing() {
        let mut agg = TranscriptAggregator::new();
        agg.push_partial(Speaker::User, "  \n\t ");
        assert!(agg.finish_turn().is_empty());
        // The whitespace was still cleared.
        assert!(agg.is_empty());
    }

    #[test]
    fn both_speakers_finalize_independently() {
        let mut agg = TranscriptAggregator::new();
        agg.push_partial(Speaker::User, "question");
        agg.push_partial(Speaker::Model, "answer");

        let entries = agg.finish_turn();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Speaker::User);
        assert_eq!(entries[0].text, "question");
        assert_eq!(entries[1].speaker, Speaker::Model);
        assert_eq!(entries[1].text, "answer");
    }

    #[test]
    fn finish_turn_clears_both_accumulators() {
        let mut agg = TranscriptAggregator::new();
        agg.push_partial(Speaker::User, "one");
        agg.push_partial(Speaker::Model, "   ");
        agg.finish_turn();

        assert!(agg.is_empty());
        assert!(agg.finish_turn().is_empty());
    }

    #[test]
    fn turn_with_no_partials_emits_nothing() {
        let mut agg = TranscriptAggregator::new();
        assert!(agg.finish_turn().is_empty());
    }

    #[test]
    fn interior_whitespace_is_preserved() {
        // Fragments carry their own spacing; we must not trim the final text,
        // only use the trimmed form for the emptiness check.
        let mut agg = TranscriptAggregator::new();
        agg.push_partial(Speaker::Model, "Hello ");
        agg.push_partial(Speaker::Model, "there");
        let entries = agg.finish_turn();
        assert_eq!(entries[0].text, "Hello there");
    }

    #[test]
    fn speaker_labels() {
        assert_eq!(Speaker::User.label(), "You");
        assert_eq!(Speaker::Model.label(), "Model");
    }
}
