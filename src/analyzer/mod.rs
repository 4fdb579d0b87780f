pub mod chord_guess;
pub mod progression;
pub mod ranker;
pub mod stability;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::form::patterns::{current_form_label, mine_patterns};
use crate::memory::Memory;
use crate::recommend::{
    build_recommendations, cache_signature, refresh_recommendations, Recommendation,
    RecommendationInput,
};
use crate::theory::notes::pitch_classes;
use crate::theory::{PitchClass, ScaleType};
use chord_guess::infer_chord;
use progression::NoteFingerprint;
use ranker::rank_scales;
use stability::decide_key;

/// Chords shown in `TheoryContext::progression_preview`.
const PREVIEW_CHORDS: usize = 8;

/// One snapshot of the note stream.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    /// Note names, oldest first. Octaves are ignored.
    pub note_history: &'a [String],
    pub bpm: Option<f64>,
    pub now_ms: i64,
}

/// What the engine currently hears.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TheoryContext {
    pub note: Option<String>,
    pub key: PitchClass,
    pub scale: ScaleType,
    pub chord: String,
    pub form_chord: String,
    pub chord_confidence: f64,
    pub key_confidence: f64,
    pub bpm: Option<f64>,
    pub form_section_label: Option<String>,
    pub progression_preview: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub context: TheoryContext,
    pub recommendations: Vec<Recommendation>,
    pub memory: Memory,
}

/// Run the whole pipeline once: rank keys, settle the stable key, guess the
/// chord, vote it into the progression, mine patterns, fold detected bars
/// into the form sheet and refresh suggestions.
///
/// `previous` is never modified; the returned memory replaces it.
pub fn analyze(input: &AnalysisInput, previous: &Memory, config: &EngineConfig) -> AnalysisOutput {
    let mut memory = previous.clone();
    let history = pitch_classes(input.note_history);

    let ranked = rank_scales(&history, &config.ranker);
    memory.stable = decide_key(
        &ranked,
        &previous.stable,
        &previous.key_control,
        input.now_ms,
        input.bpm,
        &config.stability,
    );
    let stable = &memory.stable;

    let guess = infer_chord(&history, stable.key, stable.scale, &config.chords);

    let fingerprint = NoteFingerprint::of(input.note_history, config.progression.tail_fingerprint);
    if fingerprint != previous.last_processed && !input.note_history.is_empty() {
        memory.progression.vote(&guess, &config.progression);
        memory.last_processed = fingerprint;
    }

    memory.form_patterns = mine_patterns(&memory.progression.chords, &config.patterns);
    memory.current_form_label =
        current_form_label(&memory.progression.chords, &memory.form_patterns);

    let detected = memory.progression.detected_bars(config.compression.max_bars);
    memory.form_sheet.absorb_detected(&detected, &config.compression);

    let form_section_label = memory
        .form_sheet
        .current_section()
        .map(|s| s.label.clone())
        .or_else(|| memory.current_form_label.clone());

    let signature = cache_signature(&memory.stable, form_section_label.as_deref());
    memory.recommendation_cache = refresh_recommendations(
        &previous.recommendation_cache,
        signature,
        input.now_ms,
        input.bpm,
        &config.recommendations,
        || {
            build_recommendations(
                &RecommendationInput {
                    stable: &memory.stable,
                    chord: &guess,
                    progression: &memory.progression.chords,
                    patterns: &memory.form_patterns,
                    last_note: history.last().copied(),
                },
                &config.recommendations,
            )
        },
    );

    let context = TheoryContext {
        note: input.note_history.last().cloned(),
        key: memory.stable.key,
        scale: memory.stable.scale,
        chord: guess.symbol.clone(),
        form_chord: guess.form_symbol.clone(),
        chord_confidence: guess.confidence,
        key_confidence: memory.stable.confidence,
        bpm: input.bpm,
        form_section_label,
        progression_preview: memory.progression.preview(PREVIEW_CHORDS),
    };

    AnalysisOutput {
        context,
        recommendations: memory.recommendation_cache.items.clone(),
        memory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theory::Chord;

    const STEP_MS: i64 = 250;

    /// Feeds notes one at a time, as a live input would.
    struct Session {
        notes: Vec<String>,
        memory: Memory,
        now_ms: i64,
        config: EngineConfig,
    }

    impl Session {
        fn new() -> Self {
            Self {
                notes: Vec::new(),
                memory: Memory::default(),
                now_ms: 0,
                config: EngineConfig::default(),
            }
        }

        fn play(&mut self, note: &str) -> AnalysisOutput {
            self.notes.push(note.to_string());
            self.now_ms += STEP_MS;
            let out = analyze(
                &AnalysisInput {
                    note_history: &self.notes,
                    bpm: Some(120.0),
                    now_ms: self.now_ms,
                },
                &self.memory,
                &self.config,
            );
            self.memory = out.memory.clone();
            out
        }

        /// Arpeggiate a chord for `count` notes.
        fn strum(&mut self, symbol: &str, count: usize) {
            let chord = Chord::parse(symbol).unwrap();
            let tones = chord.tones();
            for i in 0..count {
                let note = format!("{}4", tones[i % tones.len()]);
                self.play(&note);
            }
        }
    }

    #[test]
    fn test_empty_history_defaults() {
        let out = analyze(
            &AnalysisInput { note_history: &[], bpm: None, now_ms: 0 },
            &Memory::default(),
            &EngineConfig::default(),
        );
        assert_eq!(out.context.key, PitchClass::C);
        assert_eq!(out.context.scale, ScaleType::Major);
        assert_eq!(out.context.chord, "C");
        assert!(out.memory.progression.is_empty());
        assert!(!out.recommendations.is_empty());
    }

    #[test]
    fn test_wrong_note_does_not_flip_key() {
        let mut session = Session::new();
        for note in ["C4", "D4", "E4", "F4", "G4", "C5"] {
            session.play(note);
        }
        let out = session.play("F#4");
        assert_eq!(out.context.key, PitchClass::C);
        assert_eq!(out.context.scale, ScaleType::Major);
    }

    #[test]
    fn test_c_triad_chord() {
        let mut session = Session::new();
        session.play("C4");
        session.play("E4");
        let out = session.play("G4");
        assert_eq!(out.context.chord, "C");
        assert!(out.context.chord_confidence > 0.5);
    }

    #[test]
    fn test_no_flapping_under_constant_input() {
        let notes: Vec<String> = ["A3", "C4", "E4", "G4", "A4", "D4", "F4", "A4", "E4", "A3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let config = EngineConfig::default();
        let mut memory = Memory::default();
        let mut keys = Vec::new();
        for step in 0..40 {
            let out = analyze(
                &AnalysisInput { note_history: &notes, bpm: Some(100.0), now_ms: step * 500 },
                &memory,
                &config,
            );
            keys.push((out.context.key, out.context.scale));
            memory = out.memory;
        }
        assert!(keys.windows(2).all(|w| w[0] == w[1]), "key changed: {:?}", keys);
    }

    #[test]
    fn test_unchanged_snapshot_does_not_vote() {
        let notes: Vec<String> = ["C4", "E4", "G4"].iter().map(|s| s.to_string()).collect();
        let config = EngineConfig::default();
        let input = AnalysisInput { note_history: &notes, bpm: None, now_ms: 1_000 };
        let first = analyze(&input, &Memory::default(), &config);
        let second = analyze(&input, &first.memory, &config);
        assert_eq!(second.memory.progression, first.memory.progression);
        assert_eq!(first.memory.progression.pending.votes, 1);
    }

    #[test]
    fn test_aaba_doubled_builds_form() {
        let a = ["C", "Am", "F", "G"];
        let b = ["Dm", "G7", "Em", "Am"];
        let song: Vec<&str> = [a, a, b, a].concat();

        let mut session = Session::new();
        for _ in 0..2 {
            for chord in &song {
                session.strum(chord, 12);
            }
        }

        let memory = &session.memory;
        assert!(memory.progression.len() >= 4);
        assert!(!memory.form_patterns.is_empty());
        assert_eq!(memory.form_patterns[0].label, "A");
        assert!(!memory.form_sheet.sections.is_empty());

        let expanded = crate::form::compression::expand(&memory.form_sheet.sections);
        assert_eq!(expanded.bars, memory.form_sheet.expanded_bars);
    }

    #[test]
    fn test_manual_key_overrides_detection() {
        let mut session = Session::new();
        session.memory.key_control = stability::KeyControl {
            mode: stability::KeyMode::Manual,
            manual_key: PitchClass::new(2),
            manual_scale: ScaleType::Dorian,
            follow_key_changes: true,
        };
        let out = session.play("C4");
        assert_eq!(out.context.key, PitchClass::new(2));
        assert_eq!(out.context.scale, ScaleType::Dorian);
        assert_eq!(out.context.key_confidence, 1.0);
    }

    #[test]
    fn test_recommendations_cached_between_calls() {
        let mut session = Session::new();
        session.strum("C", 6);
        let before = session.memory.recommendation_cache.clone();
        // 250 ms later, same key and section: list is reused
        session.play("E4");
        assert_eq!(session.memory.recommendation_cache, before);
    }
}
