use crate::memory::Memory;

/// Data for saving a session.
pub struct NewSession<'a> {
    pub name: &'a str,
    pub bpm: Option<f64>,
    pub note_history: &'a [String],
    pub memory: &'a Memory,
}

/// A session row read back in full.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
    pub bpm: Option<f64>,
    pub note_history: Vec<String>,
    pub memory: Memory,
}

/// One line of the session list.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub name: String,
    pub updated_at: String,
    pub bpm: Option<f64>,
    pub note_count: i64,
}
