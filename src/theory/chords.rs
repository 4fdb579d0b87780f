use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use super::notes::{parse_pitch_class, PitchClass};
use super::scales::ScaleType;

/// Placeholder written into bars that have no chord.
pub const NO_CHORD: &str = "N.C.";

/// Chord qualities the engine spells. Triads first, then sevenths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Major7,
    Dominant7,
    Minor7,
    MinorMajor7,
    HalfDiminished7,
    Diminished7,
}

const ALL_QUALITIES: [ChordQuality; 10] = [
    ChordQuality::Major,
    ChordQuality::Minor,
    ChordQuality::Diminished,
    ChordQuality::Augmented,
    ChordQuality::Major7,
    ChordQuality::Dominant7,
    ChordQuality::Minor7,
    ChordQuality::MinorMajor7,
    ChordQuality::HalfDiminished7,
    ChordQuality::Diminished7,
];

impl ChordQuality {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Major => "",
            Self::Minor => "m",
            Self::Diminished => "dim",
            Self::Augmented => "aug",
            Self::Major7 => "maj7",
            Self::Dominant7 => "7",
            Self::Minor7 => "m7",
            Self::MinorMajor7 => "mMaj7",
            Self::HalfDiminished7 => "m7b5",
            Self::Diminished7 => "dim7",
        }
    }

    /// Chord tones as semitone offsets from the root.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 4, 7],
            Self::Minor => &[0, 3, 7],
            Self::Diminished => &[0, 3, 6],
            Self::Augmented => &[0, 4, 8],
            Self::Major7 => &[0, 4, 7, 11],
            Self::Dominant7 => &[0, 4, 7, 10],
            Self::Minor7 => &[0, 3, 7, 10],
            Self::MinorMajor7 => &[0, 3, 7, 11],
            Self::HalfDiminished7 => &[0, 3, 6, 10],
            Self::Diminished7 => &[0, 3, 6, 9],
        }
    }

    /// The underlying triad.
    pub fn triad(self) -> ChordQuality {
        match self {
            Self::Major | Self::Major7 | Self::Dominant7 => Self::Major,
            Self::Minor | Self::Minor7 | Self::MinorMajor7 => Self::Minor,
            Self::Diminished | Self::HalfDiminished7 | Self::Diminished7 => Self::Diminished,
            Self::Augmented => Self::Augmented,
        }
    }

    pub fn is_seventh(self) -> bool {
        self.intervals().len() == 4
    }

    /// Suffix of the structural "form" token: extensions collapse onto
    /// `""`, `"m"`, `"7"`, `"m7b5"` or `"dim"`.
    pub fn form_suffix(self) -> &'static str {
        match self {
            Self::Major | Self::Major7 | Self::Augmented => "",
            Self::Minor | Self::Minor7 | Self::MinorMajor7 => "m",
            Self::Dominant7 => "7",
            Self::HalfDiminished7 => "m7b5",
            Self::Diminished | Self::Diminished7 => "dim",
        }
    }

    fn from_suffix(suffix: &str) -> Option<ChordQuality> {
        ALL_QUALITIES.into_iter().find(|q| q.suffix() == suffix)
    }
}

/// Quality of the triad stacked from a third and a fifth (semitones above the root).
pub fn triad_quality(third: u8, fifth: u8) -> Option<ChordQuality> {
    match (third, fifth) {
        (4, 7) => Some(ChordQuality::Major),
        (3, 7) => Some(ChordQuality::Minor),
        (3, 6) => Some(ChordQuality::Diminished),
        (4, 8) => Some(ChordQuality::Augmented),
        _ => None,
    }
}

/// Seventh chord built on a triad plus a seventh (semitones above the root).
pub fn seventh_quality(triad: ChordQuality, seventh: u8) -> Option<ChordQuality> {
    match (triad, seventh) {
        (ChordQuality::Major, 11) => Some(ChordQuality::Major7),
        (ChordQuality::Major, 10) => Some(ChordQuality::Dominant7),
        (ChordQuality::Minor, 10) => Some(ChordQuality::Minor7),
        (ChordQuality::Minor, 11) => Some(ChordQuality::MinorMajor7),
        (ChordQuality::Diminished, 10) => Some(ChordQuality::HalfDiminished7),
        (ChordQuality::Diminished, 9) => Some(ChordQuality::Diminished7),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub root: PitchClass,
    pub quality: ChordQuality,
}

impl Chord {
    pub fn new(root: PitchClass, quality: ChordQuality) -> Self {
        Self { root, quality }
    }

    pub fn symbol(&self) -> String {
        format!("{}{}", self.root, self.quality.suffix())
    }

    /// Canonical token used for progression bookkeeping and bar comparison.
    pub fn form_symbol(&self) -> String {
        format!("{}{}", self.root, self.quality.form_suffix())
    }

    pub fn tones(&self) -> Vec<PitchClass> {
        self.quality
            .intervals()
            .iter()
            .map(|&i| self.root.transpose(i as i32))
            .collect()
    }

    /// Parse a symbol this module spells ("Bbm7b5", "F#", "G7(b9,13)").
    /// Parenthesised tensions are ignored; unknown suffixes yield None.
    pub fn parse(symbol: &str) -> Option<Chord> {
        let caps = symbol_regex().captures(symbol.trim())?;
        let root = parse_pitch_class(&caps[1])?;
        let quality = ChordQuality::from_suffix(&caps[2])?;
        Some(Chord { root, quality })
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.root, self.quality.suffix())
    }
}

fn symbol_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Ga-g][#b]?)([A-Za-z0-9]*)(?:\(.*\))?$").expect("valid chord regex")
    })
}

/// Chord candidates for a key, in scale-degree order.
///
/// Seven-note scales yield each degree's triad followed by its seventh chord.
/// Other scales fall back to I, i, IV, V and V7 on the root.
pub fn diatonic_chords(root: PitchClass, scale: ScaleType) -> Vec<Chord> {
    let notes = scale.pitch_classes(root);
    if notes.len() != 7 {
        return vec![
            Chord::new(root, ChordQuality::Major),
            Chord::new(root, ChordQuality::Minor),
            Chord::new(root.transpose(5), ChordQuality::Major),
            Chord::new(root.transpose(7), ChordQuality::Major),
            Chord::new(root.transpose(7), ChordQuality::Dominant7),
        ];
    }

    let mut chords = Vec::with_capacity(14);
    for degree in 0..7 {
        let degree_root = notes[degree];
        let third = degree_root.interval_to(notes[(degree + 2) % 7]);
        let fifth = degree_root.interval_to(notes[(degree + 4) % 7]);
        let seventh = degree_root.interval_to(notes[(degree + 6) % 7]);

        let Some(triad) = triad_quality(third, fifth) else {
            continue;
        };
        chords.push(Chord::new(degree_root, triad));
        if let Some(q) = seventh_quality(triad, seventh) {
            chords.push(Chord::new(degree_root, q));
        }
    }
    chords
}

/// Triads only, one per degree (I, ii, iii, ...).
pub fn diatonic_triads(root: PitchClass, scale: ScaleType) -> Vec<Chord> {
    diatonic_chords(root, scale)
        .into_iter()
        .filter(|c| !c.quality.is_seventh())
        .collect()
}
