use crate::config::ChordTuning;
use crate::theory::chords::diatonic_chords;
use crate::theory::{Chord, ChordQuality, PitchClass, ScaleType};

/// Best-matching chord for the recent note window.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordGuess {
    /// Display symbol including detected tensions, e.g. "G7(b9,13)".
    pub symbol: String,
    /// Canonical token fed to the progression: "G7".
    pub form_symbol: String,
    pub confidence: f64,
    pub chord: Chord,
}

impl ChordGuess {
    fn plain(chord: Chord, confidence: f64) -> Self {
        Self {
            symbol: chord.symbol(),
            form_symbol: chord.form_symbol(),
            confidence,
            chord,
        }
    }
}

/// Match the last `tuning.window` notes against the key's diatonic chords.
///
/// Each candidate scores `hits·0.95 + root·0.6 + (hits ≥ 2)·0.25`, mapped to
/// confidence by `/3.2` and clamped to 0.1-0.98. The first candidate with the
/// highest confidence wins, so ties resolve in scale-degree order.
pub fn infer_chord(
    history: &[PitchClass],
    key: PitchClass,
    scale: ScaleType,
    tuning: &ChordTuning,
) -> ChordGuess {
    let candidates = diatonic_chords(key, scale);
    let fallback = candidates
        .first()
        .copied()
        .unwrap_or(Chord::new(key, ChordQuality::Major));

    let start = history.len().saturating_sub(tuning.window);
    let window = &history[start..];
    if window.is_empty() {
        return ChordGuess::plain(fallback, tuning.min_confidence);
    }

    let mut present = [false; 12];
    for pc in window {
        present[pc.index()] = true;
    }

    let mut best = fallback;
    let mut best_confidence = f64::MIN;
    for candidate in candidates {
        let hits = candidate.tones().iter().filter(|t| present[t.index()]).count();
        let root_present = present[candidate.root.index()];

        let mut score = hits as f64 * tuning.hit_weight;
        if root_present {
            score += tuning.root_bonus;
        }
        if hits >= 2 {
            score += tuning.multi_hit_bonus;
        }
        let confidence =
            (score / tuning.score_scale).clamp(tuning.min_confidence, tuning.max_confidence);

        if confidence > best_confidence {
            best = candidate;
            best_confidence = confidence;
        }
    }

    let (chord, tensions) = extend_chord(best, &present);
    let symbol = if tensions.is_empty() {
        chord.symbol()
    } else {
        format!("{}({})", chord.symbol(), tensions.join(","))
    };

    ChordGuess {
        symbol,
        form_symbol: chord.form_symbol(),
        confidence: best_confidence,
        chord,
    }
}

/// Add a seventh the window supports and list the tensions present.
fn extend_chord(chord: Chord, present: &[bool; 12]) -> (Chord, Vec<&'static str>) {
    let has = |offset: i32| present[chord.root.transpose(offset).index()];
    let triad = chord.quality.triad();

    let quality = if chord.quality.is_seventh() {
        chord.quality
    } else {
        match triad {
            ChordQuality::Major if has(10) => ChordQuality::Dominant7,
            ChordQuality::Major if has(11) => ChordQuality::Major7,
            ChordQuality::Minor if has(10) => ChordQuality::Minor7,
            ChordQuality::Minor if has(11) => ChordQuality::MinorMajor7,
            ChordQuality::Diminished if has(10) => ChordQuality::HalfDiminished7,
            ChordQuality::Diminished if has(9) => ChordQuality::Diminished7,
            _ => chord.quality,
        }
    };
    let extended = Chord::new(chord.root, quality);

    let dominant = quality == ChordQuality::Dominant7;
    let major_family = triad == ChordQuality::Major;
    let minor_family = triad == ChordQuality::Minor;
    let diminished = triad == ChordQuality::Diminished;

    let mut tensions = Vec::new();
    if dominant && has(1) {
        tensions.push("b9");
    }
    if has(2) && quality != ChordQuality::Diminished7 && quality != ChordQuality::Diminished {
        tensions.push("9");
    }
    if dominant && has(3) {
        tensions.push("#9");
    }
    if (minor_family || diminished) && has(5) {
        tensions.push("11");
    }
    if major_family && has(6) {
        tensions.push("#11");
    }
    if dominant && has(8) {
        tensions.push("b13");
    }
    if (major_family || minor_family) && has(9) {
        tensions.push("13");
    }

    (extended, tensions)
}
