//! Pitch classes, scales and chord spelling shared by every analysis stage.

pub mod chords;
pub mod notes;
pub mod scales;

pub use chords::{Chord, ChordQuality};
pub use notes::PitchClass;
pub use scales::ScaleType;
