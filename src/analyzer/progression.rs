use serde::{Deserialize, Serialize};

use super::chord_guess::ChordGuess;
use crate::config::ProgressionTuning;
use crate::theory::chords::NO_CHORD;

/// Debounce state: the candidate being voted on and how often it was seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingVote {
    pub chord: Option<String>,
    pub votes: u32,
}

/// A committed chord with its absolute position in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordTimelineEvent {
    pub index: u64,
    pub chord: String,
    pub confidence: f64,
}

/// Highest timeline index a restored snapshot may carry before it is
/// renumbered.
const MAX_TIMELINE_INDEX: u64 = u32::MAX as u64;

/// A window of detected bars and the absolute index of its first bar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectedBars {
    pub first_bar: u64,
    pub bars: Vec<String>,
}

impl DetectedBars {
    /// Absolute index of the newest bar.
    pub fn last_bar(&self) -> Option<u64> {
        let len = self.bars.len() as u64;
        len.checked_sub(1).map(|n| self.first_bar.saturating_add(n))
    }
}

/// Committed form chords plus the debounce state that feeds them.
///
/// `chords` never holds two equal neighbours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progression {
    pub chords: Vec<String>,
    pub timeline: Vec<ChordTimelineEvent>,
    pub pending: PendingVote,
}

impl Progression {
    pub fn last(&self) -> Option<&str> {
        self.chords.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.chords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }

    /// Register one chord guess. Returns the chord when it was appended.
    ///
    /// A guess commits after `votes_to_commit` consecutive sightings at
    /// `min_commit_confidence` or better; the vote count then drops back to 1
    /// so a sustained chord does not re-commit on every call.
    pub fn vote(&mut self, guess: &ChordGuess, tuning: &ProgressionTuning) -> Option<String> {
        let symbol = &guess.form_symbol;
        if self.pending.chord.as_deref() == Some(symbol.as_str()) {
            self.pending.votes += 1;
            log::trace!("Vote {} for {}", self.pending.votes, symbol);
        } else {
            self.pending = PendingVote {
                chord: Some(symbol.clone()),
                votes: 1,
            };
        }

        if self.pending.votes < tuning.votes_to_commit
            || guess.confidence < tuning.min_commit_confidence
        {
            return None;
        }
        self.pending.votes = 1;

        if self.last() == Some(symbol.as_str()) {
            return None;
        }

        self.chords.push(symbol.clone());
        if self.chords.len() > tuning.max_progression {
            let excess = self.chords.len() - tuning.max_progression;
            self.chords.drain(..excess);
        }

        let index = self.timeline.last().map_or(0, |e| e.index.saturating_add(1));
        self.timeline.push(ChordTimelineEvent {
            index,
            chord: symbol.clone(),
            confidence: guess.confidence,
        });
        if self.timeline.len() > tuning.max_timeline {
            let excess = self.timeline.len() - tuning.max_timeline;
            self.timeline.drain(..excess);
        }

        log::debug!("Committed {} at bar {} ({:.2})", symbol, index, guess.confidence);
        Some(symbol.clone())
    }

    /// One bar per committed chord, addressed by timeline index, covering at
    /// most the newest `max_bars` indices. Indices with no event read "N.C.".
    pub fn detected_bars(&self, max_bars: usize) -> DetectedBars {
        let (Some(first), Some(last)) = (self.timeline.first(), self.timeline.last()) else {
            return DetectedBars::default();
        };
        if max_bars == 0 {
            return DetectedBars::default();
        }

        let span = last
            .index
            .saturating_sub(first.index)
            .saturating_add(1)
            .min(max_bars as u64);
        let first_bar = last.index - (span - 1);

        let mut bars = vec![NO_CHORD.to_string(); span as usize];
        for event in &self.timeline {
            let slot = event
                .index
                .checked_sub(first_bar)
                .and_then(|offset| usize::try_from(offset).ok())
                .and_then(|offset| bars.get_mut(offset));
            if let Some(slot) = slot {
                *slot = event.chord.clone();
            }
        }
        DetectedBars { first_bar, bars }
    }

    /// Bring a restored progression back within its caps. Returns true when
    /// the timeline had to be renumbered from 0.
    pub fn repair(&mut self, tuning: &ProgressionTuning) -> bool {
        self.chords.dedup();
        if self.chords.len() > tuning.max_progression {
            let excess = self.chords.len() - tuning.max_progression;
            self.chords.drain(..excess);
        }
        if self.timeline.len() > tuning.max_timeline {
            let excess = self.timeline.len() - tuning.max_timeline;
            self.timeline.drain(..excess);
        }
        for event in &mut self.timeline {
            event.confidence = if event.confidence.is_finite() {
                event.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }

        let contiguous = self
            .timeline
            .windows(2)
            .all(|w| w[0].index.checked_add(1) == Some(w[1].index));
        let in_range = self.timeline.last().is_none_or(|e| e.index <= MAX_TIMELINE_INDEX);
        if contiguous && in_range {
            return false;
        }

        log::warn!("Renumbering {} timeline events", self.timeline.len());
        for (i, event) in self.timeline.iter_mut().enumerate() {
            event.index = i as u64;
        }
        true
    }

    /// The newest `count` chords joined with arrows.
    pub fn preview(&self, count: usize) -> String {
        let start = self.chords.len().saturating_sub(count);
        self.chords[start..].join(" → ")
    }
}

/// What the note stream looked like the last time a vote was cast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteFingerprint {
    pub note_count: usize,
    pub tail: Vec<String>,
}

impl NoteFingerprint {
    pub fn of(notes: &[String], tail_len: usize) -> Self {
        let start = notes.len().saturating_sub(tail_len);
        Self {
            note_count: notes.len(),
            tail: notes[start..].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theory::{Chord, ChordQuality, PitchClass};

    fn event(index: u64, chord: &str) -> ChordTimelineEvent {
        ChordTimelineEvent {
            index,
            chord: chord.to_string(),
            confidence: 0.9,
        }
    }

    fn guess(symbol: &str, confidence: f64) -> ChordGuess {
        let chord = Chord::parse(symbol).unwrap_or(Chord::new(PitchClass::C, ChordQuality::Major));
        ChordGuess {
            symbol: symbol.to_string(),
            form_symbol: symbol.to_string(),
            confidence,
            chord,
        }
    }

    #[test]
    fn test_single_vote_does_not_commit() {
        let mut p = Progression::default();
        assert_eq!(p.vote(&guess("C", 0.9), &ProgressionTuning::default()), None);
        assert!(p.is_empty());
        assert_eq!(p.pending.votes, 1);
    }

    #[test]
    fn test_second_vote_commits() {
        let tuning = ProgressionTuning::default();
        let mut p = Progression::default();
        p.vote(&guess("C", 0.9), &tuning);
        assert_eq!(p.vote(&guess("C", 0.9), &tuning), Some("C".to_string()));
        assert_eq!(p.chords, vec!["C"]);
        assert_eq!(p.pending.votes, 1);
        assert_eq!(p.timeline[0].index, 0);
    }

    #[test]
    fn test_change_resets_votes() {
        let tuning = ProgressionTuning::default();
        let mut p = Progression::default();
        p.vote(&guess("C", 0.9), &tuning);
        p.vote(&guess("G", 0.9), &tuning);
        p.vote(&guess("C", 0.9), &tuning);
        assert!(p.is_empty());
    }

    #[test]
    fn test_low_confidence_never_commits() {
        let tuning = ProgressionTuning::default();
        let mut p = Progression::default();
        for _ in 0..5 {
            p.vote(&guess("Am", 0.3), &tuning);
        }
        assert!(p.is_empty());
        assert_eq!(p.pending.votes, 5);
    }

    #[test]
    fn test_sustain_never_duplicates() {
        let tuning = ProgressionTuning::default();
        let mut p = Progression::default();
        for _ in 0..10 {
            p.vote(&guess("F", 0.9), &tuning);
        }
        assert_eq!(p.chords, vec!["F"]);
        assert_eq!(p.timeline.len(), 1);

        // The same chord commits again once something else came between
        for symbol in ["G", "G", "F", "F"] {
            p.vote(&guess(symbol, 0.9), &tuning);
        }
        assert_eq!(p.chords, vec!["F", "G", "F"]);
        for pair in p.chords.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_caps_keep_latest() {
        let tuning = ProgressionTuning {
            max_progression: 3,
            max_timeline: 4,
            ..ProgressionTuning::default()
        };
        let mut p = Progression::default();
        for symbol in ["C", "Dm", "Em", "F", "G", "Am"] {
            p.vote(&guess(symbol, 0.9), &tuning);
            p.vote(&guess(symbol, 0.9), &tuning);
        }
        assert_eq!(p.chords, vec!["F", "G", "Am"]);
        assert_eq!(p.timeline.len(), 4);
        assert_eq!(p.timeline[0].index, 2);
        assert_eq!(p.timeline[3].index, 5);
    }

    #[test]
    fn test_detected_bars_fill_gaps() {
        let mut p = Progression::default();
        p.timeline = vec![event(1, "C"), event(3, "G7")];
        let detected = p.detected_bars(256);
        assert_eq!(detected.first_bar, 1);
        assert_eq!(detected.bars, vec!["C", "N.C.", "G7"]);
        assert_eq!(detected.last_bar(), Some(3));
        assert!(Progression::default().detected_bars(256).bars.is_empty());
    }

    #[test]
    fn test_detected_bars_bounded_by_window() {
        let mut p = Progression::default();
        p.timeline = vec![event(0, "C"), event(1_000_000_000_000_000, "G")];
        let detected = p.detected_bars(4);
        assert_eq!(detected.bars, vec!["N.C.", "N.C.", "N.C.", "G"]);
        assert_eq!(detected.first_bar, 1_000_000_000_000_000 - 3);

        p.timeline = vec![event(u64::MAX, "C")];
        let detected = p.detected_bars(4);
        assert_eq!(detected.bars, vec!["C"]);
        assert_eq!(detected.last_bar(), Some(u64::MAX));
        assert!(p.detected_bars(0).bars.is_empty());
    }

    #[test]
    fn test_long_session_keeps_bars_bounded() {
        let tuning = ProgressionTuning::default();
        let mut p = Progression::default();
        for i in 0..600 {
            let symbol = if i % 2 == 0 { "C" } else { "G" };
            p.vote(&guess(symbol, 0.9), &tuning);
            p.vote(&guess(symbol, 0.9), &tuning);
        }
        assert_eq!(p.timeline.len(), tuning.max_timeline);
        let detected = p.detected_bars(tuning.max_timeline);
        assert_eq!(detected.bars.len(), tuning.max_timeline);
        assert!(detected.bars.iter().all(|b| b != "N.C."));
        assert_eq!(detected.last_bar(), Some(599));
    }

    #[test]
    fn test_repair_renumbers_untrusted_timeline() {
        let tuning = ProgressionTuning {
            max_timeline: 2,
            ..ProgressionTuning::default()
        };
        let mut p = Progression::default();
        p.timeline = vec![event(5, "C"), event(6, "F"), event(u64::MAX, "G")];
        assert!(p.repair(&tuning));
        let indices: Vec<u64> = p.timeline.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(p.timeline[1].chord, "G");

        // Already contiguous: left alone
        p.timeline = vec![event(7, "C"), event(8, "F")];
        assert!(!p.repair(&tuning));
        assert_eq!(p.timeline[0].index, 7);
    }

    #[test]
    fn test_preview_uses_latest_chords() {
        let p = Progression {
            chords: ["C", "Am", "F", "G"].iter().map(|s| s.to_string()).collect(),
            ..Progression::default()
        };
        assert_eq!(p.preview(3), "Am → F → G");
        assert_eq!(p.preview(8), "C → Am → F → G");
    }

    #[test]
    fn test_fingerprint_tail() {
        let notes: Vec<String> = ["C4", "E4", "G4", "C5"].iter().map(|s| s.to_string()).collect();
        let fp = NoteFingerprint::of(&notes, 2);
        assert_eq!(fp.note_count, 4);
        assert_eq!(fp.tail, vec!["G4", "C5"]);
        assert_eq!(fp, NoteFingerprint::of(&notes, 2));
    }
}
