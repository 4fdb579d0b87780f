use chrono::{SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};

use super::models::{NewSession, Session, SessionSummary};
use super::{Database, DbError, Result};
use crate::config::EngineConfig;
use crate::memory::Memory;

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Database {
    /// Insert or update a session by name. Returns the session id.
    pub fn save_session(&self, s: &NewSession) -> Result<i64> {
        let now = timestamp();
        let notes = serde_json::to_string(s.note_history)?;
        let memory = s.memory.to_json()?;

        self.conn.execute(
            "INSERT INTO sessions (name, created_at, updated_at, bpm, note_history, memory)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                updated_at = excluded.updated_at,
                bpm = excluded.bpm,
                note_history = excluded.note_history,
                memory = excluded.memory",
            params![s.name, now, s.bpm, notes, memory],
        )?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM sessions WHERE name = ?1",
            params![s.name],
            |row| row.get(0),
        )?;
        log::info!("Saved session {:?} ({} notes)", s.name, s.note_history.len());
        Ok(id)
    }

    /// Load a session if it exists. Stored memory goes through
    /// `Memory::restore_json`, so older snapshots still load.
    pub fn find_session(&self, name: &str, config: &EngineConfig) -> Result<Option<Session>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, created_at, updated_at, bpm, note_history, memory
                 FROM sessions WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, created_at, updated_at, bpm, notes, memory)) = row else {
            return Ok(None);
        };
        log::info!("Loaded session {:?}", name);
        Ok(Some(Session {
            id,
            name,
            created_at,
            updated_at,
            bpm,
            note_history: serde_json::from_str(&notes)?,
            memory: Memory::restore_json(&memory, config),
        }))
    }

    pub fn load_session(&self, name: &str, config: &EngineConfig) -> Result<Session> {
        self.find_session(name, config)?
            .ok_or_else(|| DbError::SessionNotFound(name.to_string()))
    }

    /// All sessions, most recently updated first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, updated_at, bpm, json_array_length(note_history)
             FROM sessions
             ORDER BY updated_at DESC, id DESC",
        )?;

        let sessions = stmt
            .query_map([], |row| {
                Ok(SessionSummary {
                    name: row.get(0)?,
                    updated_at: row.get(1)?,
                    bpm: row.get(2)?,
                    note_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Delete a session. Returns false when no session had that name.
    pub fn delete_session(&self, name: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM sessions WHERE name = ?1", params![name])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormSheet;
    use crate::theory::{PitchClass, ScaleType};

    fn notes(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_save_and_load() {
        let db = Database::open_in_memory().unwrap();
        let mut memory = Memory::default();
        memory.stable.key = PitchClass::new(9);
        memory.stable.scale = ScaleType::Minor;
        memory.progression.chords = notes("Am Dm E7");
        memory.form_sheet = FormSheet::from_bars(notes("Am Dm E7 Am"), &config().compression);
        let history = notes("A3 C4 E4");

        let id = db
            .save_session(&NewSession {
                name: "blues",
                bpm: Some(92.0),
                note_history: &history,
                memory: &memory,
            })
            .unwrap();

        let session = db.load_session("blues", &config()).unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.bpm, Some(92.0));
        assert_eq!(session.note_history, history);
        assert_eq!(session.memory, memory);
        assert_eq!(session.created_at, session.updated_at);
    }

    #[test]
    fn test_save_upserts_by_name() {
        let db = Database::open_in_memory().unwrap();
        let memory = Memory::default();
        let first = notes("C4");
        let second = notes("C4 E4 G4");

        let id1 = db
            .save_session(&NewSession {
                name: "jam",
                bpm: None,
                note_history: &first,
                memory: &memory,
            })
            .unwrap();
        let id2 = db
            .save_session(&NewSession {
                name: "jam",
                bpm: Some(120.0),
                note_history: &second,
                memory: &memory,
            })
            .unwrap();
        assert_eq!(id1, id2);

        let sessions = db.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].note_count, 3);
        assert_eq!(sessions[0].bpm, Some(120.0));
    }

    #[test]
    fn test_missing_session() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.find_session("nope", &config()).unwrap().is_none());
        assert!(matches!(
            db.load_session("nope", &config()),
            Err(DbError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_memory_loads_defaults() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO sessions (name, created_at, updated_at, note_history, memory)
                 VALUES ('old', '2020-01-01T00:00:00.000Z', '2020-01-01T00:00:00.000Z',
                         '[\"C4\"]', '{\"stable\": 42}')",
                [],
            )
            .unwrap();
        let session = db.load_session("old", &config()).unwrap();
        assert_eq!(session.memory, Memory::default());
        assert_eq!(session.note_history, notes("C4"));
    }

    #[test]
    fn test_list_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let memory = Memory::default();
        for name in ["a", "b"] {
            db.save_session(&NewSession { name, bpm: None, note_history: &[], memory: &memory })
                .unwrap();
        }
        let names: Vec<String> = db.list_sessions().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a".to_string()));

        assert!(db.delete_session("a").unwrap());
        assert!(!db.delete_session("a").unwrap());
        assert_eq!(db.list_sessions().unwrap().len(), 1);
    }
}
