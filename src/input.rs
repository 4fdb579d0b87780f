use std::path::Path;

use thiserror::Error;

use crate::theory::notes::{midi_to_note_name, parse_pitch_class};

#[derive(Error, Debug)]
pub enum NoteLogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: not a note: {token:?}")]
    InvalidNote { line: usize, token: String },
}

/// Accept a note name as written ("Eb4", "f#") or a MIDI number (0-127),
/// which is spelled out as a note name.
pub fn normalize_note(token: &str) -> Option<String> {
    let token = token.trim();
    if let Ok(midi) = token.parse::<i32>() {
        return (0..=127).contains(&midi).then(|| midi_to_note_name(midi));
    }
    parse_pitch_class(token).map(|_| token.to_string())
}

/// Parse a note log: tokens separated by whitespace or commas, `#` starting
/// a comment when it opens a token. Line numbers in errors are 1-based.
pub fn parse_note_log(text: &str) -> Result<Vec<String>, NoteLogError> {
    let mut notes = Vec::new();
    for (i, line) in text.lines().enumerate() {
        for token in line.split(|c: char| c.is_whitespace() || c == ',') {
            if token.is_empty() {
                continue;
            }
            if token.starts_with('#') {
                break;
            }
            let note = normalize_note(token).ok_or_else(|| NoteLogError::InvalidNote {
                line: i + 1,
                token: token.to_string(),
            })?;
            notes.push(note);
        }
    }
    Ok(notes)
}

pub fn read_note_log(path: &Path) -> Result<Vec<String>, NoteLogError> {
    let text = std::fs::read_to_string(path)?;
    parse_note_log(&text)
}
