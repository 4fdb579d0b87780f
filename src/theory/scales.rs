use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::notes::PitchClass;

/// A named interval pattern applied to a root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleType {
    #[default]
    Major,
    Minor,
    Dorian,
    Mixolydian,
    Lydian,
    Phrygian,
    // Only reachable through manual override
    HarmonicMinor,
    MajorPentatonic,
    MinorPentatonic,
}

/// Scale types the candidate ranker scores, in tie-break order.
pub const RANKED_SCALES: [ScaleType; 6] = [
    ScaleType::Major,
    ScaleType::Minor,
    ScaleType::Dorian,
    ScaleType::Mixolydian,
    ScaleType::Lydian,
    ScaleType::Phrygian,
];

impl ScaleType {
    /// Semitone offsets from the root, ascending.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 2, 4, 5, 7, 9, 11],
            Self::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Self::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Self::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Self::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            Self::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            Self::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Self::MajorPentatonic => &[0, 2, 4, 7, 9],
            Self::MinorPentatonic => &[0, 3, 5, 7, 10],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Dorian => "dorian",
            Self::Mixolydian => "mixolydian",
            Self::Lydian => "lydian",
            Self::Phrygian => "phrygian",
            Self::HarmonicMinor => "harmonic-minor",
            Self::MajorPentatonic => "major-pentatonic",
            Self::MinorPentatonic => "minor-pentatonic",
        }
    }

    /// Spelled scale notes starting at `root`.
    pub fn pitch_classes(self, root: PitchClass) -> Vec<PitchClass> {
        self.intervals()
            .iter()
            .map(|&i| root.transpose(i as i32))
            .collect()
    }

    /// Membership mask indexed by pitch class.
    pub fn mask(self, root: PitchClass) -> [bool; 12] {
        let mut mask = [false; 12];
        for pc in self.pitch_classes(root) {
            mask[pc.index()] = true;
        }
        mask
    }
}

impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScaleType {
    type Err = String;

    /// Accepts the kebab-case names plus common aliases ("ionian", "aeolian",
    /// "natural minor", "harmonic_minor").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        let scale = match normalized.as_str() {
            "major" | "ionian" => Self::Major,
            "minor" | "aeolian" | "natural-minor" => Self::Minor,
            "dorian" => Self::Dorian,
            "mixolydian" => Self::Mixolydian,
            "lydian" => Self::Lydian,
            "phrygian" => Self::Phrygian,
            "harmonic-minor" => Self::HarmonicMinor,
            "major-pentatonic" | "pentatonic" => Self::MajorPentatonic,
            "minor-pentatonic" => Self::MinorPentatonic,
            _ => return Err(format!("unknown scale type: {s:?}")),
        };
        Ok(scale)
    }
}

/// Human label for a key: "Eb dorian".
pub fn scale_label(root: PitchClass, scale: ScaleType) -> String {
    format!("{root} {scale}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_major_notes() {
        let names: Vec<&str> = ScaleType::Major
            .pitch_classes(PitchClass::C)
            .into_iter()
            .map(|pc| pc.name())
            .collect();
        assert_eq!(names, vec!["C", "D", "E", "F", "G", "A", "B"]);
    }

    #[test]
    fn test_relative_modes_share_pitch_set() {
        let c_major = ScaleType::Major.mask(PitchClass::C);
        assert_eq!(ScaleType::Minor.mask(PitchClass::new(9)), c_major);
        assert_eq!(ScaleType::Dorian.mask(PitchClass::new(2)), c_major);
        assert_eq!(ScaleType::Mixolydian.mask(PitchClass::new(7)), c_major);
        assert_eq!(ScaleType::Lydian.mask(PitchClass::new(5)), c_major);
        assert_eq!(ScaleType::Phrygian.mask(PitchClass::new(4)), c_major);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("Ionian".parse::<ScaleType>(), Ok(ScaleType::Major));
        assert_eq!("natural minor".parse::<ScaleType>(), Ok(ScaleType::Minor));
        assert_eq!("harmonic_minor".parse::<ScaleType>(), Ok(ScaleType::HarmonicMinor));
        assert!("bebop".parse::<ScaleType>().is_err());
    }

    #[test]
    fn test_label() {
        assert_eq!(scale_label(PitchClass::new(3), ScaleType::Dorian), "Eb dorian");
    }
}
