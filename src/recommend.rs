use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::analyzer::chord_guess::ChordGuess;
use crate::analyzer::stability::StableContext;
use crate::config::{hold_window_ms, RecommendationTuning};
use crate::form::FormPattern;
use crate::theory::chords::diatonic_triads;
use crate::theory::scales::scale_label;
use crate::theory::{Chord, ChordQuality, PitchClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Note,
    Chord,
    Scale,
    Form,
}

impl RecommendationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Chord => "chord",
            Self::Scale => "scale",
            Self::Form => "form",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub kind: RecommendationKind,
    pub label: String,
    pub reason: String,
    pub confidence: f64,
}

impl Recommendation {
    fn new(
        kind: RecommendationKind,
        label: impl Into<String>,
        reason: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let label = label.into();
        Self {
            id: format!("{}-{}", kind.as_str(), slug(&label)),
            kind,
            label,
            reason: reason.into(),
            confidence,
        }
    }
}

fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut dash = false;
    for c in label.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            dash = false;
        } else if !dash {
            out.push('-');
            dash = true;
        }
    }
    out
}

/// The list last shown, with what it was computed for and when.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationCache {
    pub signature: String,
    pub refreshed_at: i64,
    pub items: Vec<Recommendation>,
}

/// Cache key: stable key, scale and current form label.
pub fn cache_signature(stable: &StableContext, form_label: Option<&str>) -> String {
    format!("{}|{}|{}", stable.key, stable.scale, form_label.unwrap_or("-"))
}

/// Reuse the cached list unless the signature changed, the cache is empty or
/// the tempo-scaled hold window has elapsed since the last refresh.
pub fn refresh_recommendations(
    previous: &RecommendationCache,
    signature: String,
    now_ms: i64,
    bpm: Option<f64>,
    tuning: &RecommendationTuning,
    build: impl FnOnce() -> Vec<Recommendation>,
) -> RecommendationCache {
    let hold_ms = hold_window_ms(bpm, tuning.min_hold_ms, tuning.hold_bars);
    let expired = (now_ms - previous.refreshed_at) as f64 >= hold_ms;

    if previous.signature == signature && !previous.items.is_empty() && !expired {
        log::debug!("Reusing {} cached recommendations", previous.items.len());
        return previous.clone();
    }

    let items = build();
    log::debug!("Refreshed {} recommendations for {}", items.len(), signature);
    RecommendationCache {
        signature,
        refreshed_at: now_ms,
        items,
    }
}

/// Everything the builder looks at.
pub struct RecommendationInput<'a> {
    pub stable: &'a StableContext,
    pub chord: &'a ChordGuess,
    pub progression: &'a [String],
    pub patterns: &'a [FormPattern],
    pub last_note: Option<PitchClass>,
}

/// Ranked scale, note, chord and form suggestions, deduplicated by kind and
/// label and capped at `max_items`.
pub fn build_recommendations(
    input: &RecommendationInput,
    tuning: &RecommendationTuning,
) -> Vec<Recommendation> {
    let mut items = Vec::new();
    scale_suggestions(input, &mut items);
    note_suggestions(input, &mut items);
    chord_suggestions(input, tuning, &mut items);
    if let Some(top) = input.patterns.first() {
        items.push(Recommendation::new(
            RecommendationKind::Form,
            top.signature.clone(),
            format!("Pattern {} has repeated {} times.", top.label, top.occurrences),
            (0.5 + 0.1 * top.occurrences as f64).min(0.95),
        ));
    }

    let mut seen = HashSet::new();
    items.retain(|r| seen.insert((r.kind, r.label.clone())));
    items.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    items.truncate(tuning.max_items);
    items
}

fn scale_suggestions(input: &RecommendationInput, items: &mut Vec<Recommendation>) {
    let stable = input.stable;
    items.push(Recommendation::new(
        RecommendationKind::Scale,
        scale_label(stable.key, stable.scale),
        "Key center of the recent phrase.",
        0.9,
    ));

    let chord = input.chord.chord;
    let root = chord.root;
    let symbol = &input.chord.symbol;
    let options: &[(&str, f64)] = match chord.quality {
        ChordQuality::Dominant7 => &[
            ("mixolydian", 0.82),
            ("altered", 0.7),
            ("half-whole diminished", 0.64),
        ],
        ChordQuality::Minor | ChordQuality::Minor7 | ChordQuality::MinorMajor7 => {
            &[("dorian", 0.8), ("melodic minor", 0.68), ("phrygian", 0.6)]
        }
        ChordQuality::Major | ChordQuality::Major7 | ChordQuality::Augmented => {
            &[("ionian", 0.78), ("lydian", 0.72), ("major pentatonic", 0.66)]
        }
        ChordQuality::Diminished | ChordQuality::HalfDiminished7 | ChordQuality::Diminished7 => {
            &[("locrian", 0.74), ("whole-half diminished", 0.66)]
        }
    };
    for (name, confidence) in options {
        items.push(Recommendation::new(
            RecommendationKind::Scale,
            format!("{root} {name}"),
            format!("Fits the current {symbol} chord."),
            *confidence,
        ));
    }

    if let Some((dominant, target, resolved)) = two_five_approach(input.progression) {
        let reason = if resolved {
            format!("ii-V-I into {target}; altered tension sets up the next turnaround.")
        } else {
            format!("ii-V heading to {target}; altered tension pulls into the resolution.")
        };
        items.push(Recommendation::new(
            RecommendationKind::Scale,
            format!("{dominant} altered"),
            reason,
            0.74,
        ));
    }
}

/// Look for a ii-V at the end of the progression, with or without its I.
/// Returns the dominant root, the expected resolution and whether it arrived.
fn two_five_approach(progression: &[String]) -> Option<(PitchClass, PitchClass, bool)> {
    let is_two =
        |c: &Chord| matches!(c.quality.triad(), ChordQuality::Minor | ChordQuality::Diminished);
    let is_five = |c: &Chord| matches!(c.quality, ChordQuality::Dominant7 | ChordQuality::Major);
    let chords: Vec<Chord> = progression.iter().filter_map(|s| Chord::parse(s)).collect();

    let approaches = |two: &Chord, five: &Chord| {
        is_two(two) && is_five(five) && five.root == two.root.transpose(5)
    };

    if let [.., two, five, one] = chords.as_slice() {
        if approaches(two, five) && one.root == five.root.transpose(5) {
            return Some((five.root, one.root, true));
        }
    }
    if let [.., two, five] = chords.as_slice() {
        if approaches(two, five) {
            return Some((five.root, five.root.transpose(5), false));
        }
    }
    None
}

fn note_suggestions(input: &RecommendationInput, items: &mut Vec<Recommendation>) {
    let stable = input.stable;
    let notes = stable.scale.pitch_classes(stable.key);
    let scale_name = scale_label(stable.key, stable.scale);
    let at = |i: usize| notes[i % notes.len()];

    match input.last_note {
        Some(current) => {
            // Outside the scale: tonic, third and fifth of the scale instead
            let base = notes.iter().position(|&n| n == current);
            let pick =
                |offset: usize, fallback: usize| base.map_or(at(fallback), |b| at(b + offset));
            items.push(Recommendation::new(
                RecommendationKind::Note,
                pick(1, 0).name(),
                format!("Stepwise motion from {current} in {scale_name}."),
                0.92,
            ));
            items.push(Recommendation::new(
                RecommendationKind::Note,
                pick(2, 2).name(),
                format!("Color tone a third above {current}."),
                0.84,
            ));
            items.push(Recommendation::new(
                RecommendationKind::Note,
                pick(4, 4).name(),
                format!("Stable fifth against {current}."),
                0.8,
            ));
        }
        None => {
            items.push(Recommendation::new(
                RecommendationKind::Note,
                at(0).name(),
                format!("Start on the tonic of {scale_name}."),
                0.78,
            ));
            items.push(Recommendation::new(
                RecommendationKind::Note,
                at(4).name(),
                "Dominant for strong tonal gravity.",
                0.7,
            ));
        }
    }
}

fn chord_suggestions(
    input: &RecommendationInput,
    tuning: &RecommendationTuning,
    items: &mut Vec<Recommendation>,
) {
    if let Some(next) = learned_next_chord(input.progression, tuning.max_basis) {
        items.push(Recommendation::new(
            RecommendationKind::Chord,
            next.chord.clone(),
            format!(
                "Followed {} in {} of {} earlier passes.",
                next.basis.join("-"),
                next.count,
                next.total
            ),
            next.confidence,
        ));
    }

    let stable = input.stable;
    let scale_name = scale_label(stable.key, stable.scale);
    let triads = diatonic_triads(stable.key, stable.scale);
    // I, IV, V, vi where the scale has them
    let degrees: Vec<Chord> = if triads.len() >= 6 {
        [0, 3, 4, 5].iter().map(|&i| triads[i]).collect()
    } else {
        triads
    };
    for (i, chord) in degrees.iter().enumerate() {
        items.push(Recommendation::new(
            RecommendationKind::Chord,
            chord.symbol(),
            format!("Functional harmony option {} in {}.", i + 1, scale_name),
            (0.88 - i as f64 * 0.09).max(0.55),
        ));
    }
}

/// What the progression did the other times it reached its current tail.
#[derive(Debug, Clone, PartialEq)]
pub struct NextChordPrediction {
    pub chord: String,
    pub basis: Vec<String>,
    pub count: usize,
    pub total: usize,
    pub confidence: f64,
}

/// Predict the next chord from earlier occurrences of the trailing
/// `max_basis`..1 chords, longest basis with any match first. The majority
/// follower wins; ties go to the one seen first.
pub fn learned_next_chord(progression: &[String], max_basis: usize) -> Option<NextChordPrediction> {
    for basis_len in (1..=max_basis).rev() {
        if progression.len() <= basis_len {
            continue;
        }
        let tail = &progression[progression.len() - basis_len..];

        let mut followers: Vec<(&String, usize)> = Vec::new();
        for start in 0..progression.len() - basis_len {
            if &progression[start..start + basis_len] != tail {
                continue;
            }
            let next = &progression[start + basis_len];
            match followers.iter_mut().find(|(c, _)| *c == next) {
                Some((_, count)) => *count += 1,
                None => followers.push((next, 1)),
            }
        }

        let total: usize = followers.iter().map(|(_, n)| n).sum();
        let mut best: Option<(&String, usize)> = None;
        for &(chord, count) in &followers {
            if best.is_none_or(|(_, n)| count > n) {
                best = Some((chord, count));
            }
        }
        if let Some((chord, count)) = best {
            return Some(NextChordPrediction {
                chord: chord.clone(),
                basis: tail.to_vec(),
                count,
                total,
                confidence: count as f64 / total as f64,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theory::ScaleType;

    fn chords(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn guess(symbol: &str) -> ChordGuess {
        let chord = Chord::parse(symbol).unwrap();
        ChordGuess {
            symbol: symbol.to_string(),
            form_symbol: chord.form_symbol(),
            confidence: 0.9,
            chord,
        }
    }

    fn build(
        stable: &StableContext,
        chord: &str,
        progression: &[String],
        last_note: Option<PitchClass>,
    ) -> Vec<Recommendation> {
        let guess = guess(chord);
        let input = RecommendationInput {
            stable,
            chord: &guess,
            progression,
            patterns: &[],
            last_note,
        };
        build_recommendations(&input, &RecommendationTuning::default())
    }

    fn labels(items: &[Recommendation], kind: RecommendationKind) -> Vec<String> {
        items.iter().filter(|r| r.kind == kind).map(|r| r.label.clone()).collect()
    }

    #[test]
    fn test_dominant_chord_scales() {
        let items = build(&StableContext::default(), "G7", &[], None);
        let scales = labels(&items, RecommendationKind::Scale);
        assert_eq!(scales[0], "C major");
        assert!(scales.contains(&"G mixolydian".to_string()));
        assert!(scales.contains(&"G altered".to_string()));
    }

    #[test]
    fn test_minor_chord_scales() {
        let items = build(&StableContext::default(), "Dm7", &[], None);
        let scales = labels(&items, RecommendationKind::Scale);
        assert!(scales.contains(&"D dorian".to_string()));
        assert!(!scales.iter().any(|s| s.ends_with("mixolydian")));
    }

    #[test]
    fn test_list_is_capped_sorted_and_unique() {
        let progression = chords("C F G C F G");
        let items = build(&StableContext::default(), "C", &progression, Some(PitchClass::C));
        assert!(items.len() <= 12);
        for pair in items.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        let mut keys: Vec<(RecommendationKind, String)> =
            items.iter().map(|r| (r.kind, r.label.clone())).collect();
        let before = keys.len();
        keys.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.as_str().cmp(b.0.as_str())));
        keys.dedup();
        assert_eq!(keys.len(), before);
    }

    #[test]
    fn test_note_suggestions_follow_last_note() {
        let items = build(&StableContext::default(), "C", &[], Some(PitchClass::new(4)));
        let notes = labels(&items, RecommendationKind::Note);
        // E -> F (step), G (third), B (fifth)
        assert_eq!(notes, vec!["F", "G", "B"]);

        // F# is not in C major: tonic, third and fifth of the key
        let items = build(&StableContext::default(), "C", &[], Some(PitchClass::new(6)));
        assert_eq!(labels(&items, RecommendationKind::Note), vec!["C", "E", "G"]);

        let items = build(&StableContext::default(), "C", &[], None);
        assert_eq!(labels(&items, RecommendationKind::Note), vec!["C", "G"]);
    }

    #[test]
    fn test_two_five_suggests_altered_dominant() {
        let items = build(&StableContext::default(), "C", &chords("F Dm G7 C"), None);
        let altered = items.iter().find(|r| r.label == "G altered").unwrap();
        assert!((altered.confidence - 0.74).abs() < 1e-12);

        assert_eq!(
            two_five_approach(&chords("C Dm G7")),
            Some((PitchClass::new(7), PitchClass::C, false))
        );
        assert_eq!(two_five_approach(&chords("C F G")), None);
    }

    #[test]
    fn test_learned_next_chord_prefers_longest_basis() {
        // Tail "F G": followed by C once, by Am once; tail "C F G" only by C
        let p = chords("C F G C Am F G Am C F G");
        let next = learned_next_chord(&p, 3).unwrap();
        assert_eq!(next.chord, "C");
        assert_eq!(next.basis, chords("C F G"));
        assert!((next.confidence - 1.0).abs() < 1e-12);

        let p = chords("C G C G C Am C");
        let next = learned_next_chord(&p, 1).unwrap();
        assert_eq!(next.chord, "G");
        assert_eq!((next.count, next.total), (2, 3));

        assert_eq!(learned_next_chord(&chords("C"), 3), None);
        assert_eq!(learned_next_chord(&chords("C F G"), 3), None);
    }

    #[test]
    fn test_cache_reused_inside_hold_window() {
        let tuning = RecommendationTuning::default();
        let stable = StableContext::default();
        let sig = cache_signature(&stable, Some("A"));
        let empty = RecommendationCache::default();
        let first = refresh_recommendations(&empty, sig.clone(), 1_000, None, &tuning, || {
            vec![Recommendation::new(RecommendationKind::Note, "C", "x", 0.5)]
        });
        assert_eq!(first.refreshed_at, 1_000);

        let second = refresh_recommendations(&first, sig.clone(), 10_000, None, &tuning, || {
            vec![Recommendation::new(RecommendationKind::Note, "D", "y", 0.5)]
        });
        assert_eq!(second, first);

        // Window elapsed
        let third = refresh_recommendations(&first, sig, 17_000, None, &tuning, Vec::new);
        assert_eq!(third.refreshed_at, 17_000);
    }

    #[test]
    fn test_cache_invalidated_by_key_or_section() {
        let tuning = RecommendationTuning::default();
        let stable = StableContext::default();
        let first = refresh_recommendations(
            &RecommendationCache::default(),
            cache_signature(&stable, None),
            0,
            Some(120.0),
            &tuning,
            || vec![Recommendation::new(RecommendationKind::Note, "C", "x", 0.5)],
        );

        let moved = StableContext {
            key: PitchClass::new(7),
            ..stable.clone()
        };
        let moved_sig = cache_signature(&moved, None);
        let changed =
            refresh_recommendations(&first, moved_sig, 100, Some(120.0), &tuning, Vec::new);
        assert_eq!(changed.refreshed_at, 100);

        let section_sig = cache_signature(&stable, Some("B"));
        let section =
            refresh_recommendations(&first, section_sig, 100, Some(120.0), &tuning, Vec::new);
        assert_eq!(section.refreshed_at, 100);
        assert_eq!(cache_signature(&stable, Some("B")), format!("C|{}|B", ScaleType::Major));
    }

    #[test]
    fn test_slug_ids() {
        let r = Recommendation::new(RecommendationKind::Scale, "F# half-whole diminished", "", 0.5);
        assert_eq!(r.id, "scale-f-half-whole-diminished");
    }
}
