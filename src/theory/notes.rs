use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Display spelling for the 12 pitch classes. Mixed sharps and flats, the way
/// lead sheets usually spell them.
pub const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

/// Sharp-only spelling used when naming MIDI notes.
const MIDI_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A note name without octave, stored as semitones above C (0-11).
///
/// Serializes as its spelled name ("Eb") so persisted memory stays readable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PitchClass(u8);

impl PitchClass {
    pub const C: PitchClass = PitchClass(0);

    /// Build from any semitone count; wraps into 0-11.
    pub fn new(semitone: i32) -> Self {
        PitchClass(semitone.rem_euclid(12) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn transpose(self, semitones: i32) -> Self {
        Self::new(self.0 as i32 + semitones)
    }

    /// Semitones upward from `self` to `other` (0-11).
    pub fn interval_to(self, other: PitchClass) -> u8 {
        (other.0 as i32 - self.0 as i32).rem_euclid(12) as u8
    }

    pub fn name(self) -> &'static str {
        PITCH_NAMES[self.index()]
    }

    /// All 12 pitch classes in ascending order from C.
    pub fn all() -> impl Iterator<Item = PitchClass> {
        (0..12).map(PitchClass)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_pitch_class(s).ok_or_else(|| format!("invalid pitch class: {s:?}"))
    }
}

impl TryFrom<String> for PitchClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PitchClass> for String {
    fn from(pc: PitchClass) -> Self {
        pc.name().to_string()
    }
}

/// Parse a note name ("C#4", "eb", "Bb-1", "F♯3") into its pitch class.
///
/// The letter is case-insensitive; any run of `#`/`♯`/`b`/`♭` follows it and
/// an optional (possibly negative) octave number may trail. Anything else is
/// rejected.
pub fn parse_pitch_class(name: &str) -> Option<PitchClass> {
    let mut chars = name.trim().chars().peekable();

    let base = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let mut offset = 0i32;
    while let Some(&c) = chars.peek() {
        match c {
            '#' | '♯' => offset += 1,
            'b' | '♭' => offset -= 1,
            _ => break,
        }
        chars.next();
    }

    // Whatever remains must be an octave number
    let rest: String = chars.collect();
    let octave = rest.strip_prefix('-').unwrap_or(&rest);
    if !octave.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some(PitchClass::new(base + offset))
}

/// Name a MIDI note number with sharp spelling and octave (60 → "C4").
pub fn midi_to_note_name(midi: i32) -> String {
    let pc = midi.rem_euclid(12) as usize;
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", MIDI_NAMES[pc], octave)
}

/// Convert a note history into pitch classes, skipping names that don't parse.
pub fn pitch_classes(notes: &[String]) -> Vec<PitchClass> {
    notes
        .iter()
        .filter_map(|n| {
            let pc = parse_pitch_class(n);
            if pc.is_none() {
                log::trace!("Skipping unparseable note {n:?}");
            }
            pc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_octave() {
        assert_eq!(parse_pitch_class("C"), Some(PitchClass::new(0)));
        assert_eq!(parse_pitch_class("C#4"), Some(PitchClass::new(1)));
        assert_eq!(parse_pitch_class("a3"), Some(PitchClass::new(9)));
        assert_eq!(parse_pitch_class("Bb-1"), Some(PitchClass::new(10)));
        assert_eq!(parse_pitch_class("F♯2"), Some(PitchClass::new(6)));
    }

    #[test]
    fn test_parse_enharmonics_wrap() {
        assert_eq!(parse_pitch_class("Cb"), Some(PitchClass::new(11)));
        assert_eq!(parse_pitch_class("E#"), Some(PitchClass::new(5)));
        assert_eq!(parse_pitch_class("Gbb"), Some(PitchClass::new(5)));
        assert_eq!(parse_pitch_class("Db5"), parse_pitch_class("C#2"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_pitch_class(""), None);
        assert_eq!(parse_pitch_class("H"), None);
        assert_eq!(parse_pitch_class("C#x"), None);
        assert_eq!(parse_pitch_class("Cmaj7"), None);
    }


    #[test]
    fn test_midi_names() {
        assert_eq!(midi_to_note_name(60), "C4");
        assert_eq!(midi_to_note_name(69), "A4");
        assert_eq!(midi_to_note_name(0), "C-1");
        assert_eq!(parse_pitch_class(&midi_to_note_name(61)), Some(PitchClass::new(1)));
    }

    #[test]
    fn test_interval_and_transpose() {
        let c = PitchClass::C;
        let g = PitchClass::new(7);
        assert_eq!(c.interval_to(g), 7);
        assert_eq!(g.interval_to(c), 5);
        assert_eq!(g.transpose(5), c);
        assert_eq!(c.transpose(-1).name(), "B");
    }

    #[test]
    fn test_pitch_class_serde_as_name() {
        let json = serde_json::to_string(&PitchClass::new(3)).unwrap();
        assert_eq!(json, "\"Eb\"");
        let back: PitchClass = serde_json::from_str("\"D#\"").unwrap();
        assert_eq!(back, PitchClass::new(3));
        assert!(serde_json::from_str::<PitchClass>("\"Q\"").is_err());
    }

    #[test]
    fn test_pitch_classes_skips_invalid() {
        let notes: Vec<String> = ["C4", "??", "G4"].iter().map(|s| s.to_string()).collect();
        assert_eq!(pitch_classes(&notes), vec![PitchClass::new(0), PitchClass::new(7)]);
    }
}
