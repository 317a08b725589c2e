//! SegmentStore + NoteStore: the sqlite-backed persistence layer for notes
//! and their transcript segments.
//!
//! A `Connection` behind a `parking_lot::Mutex`, `PRAGMA foreign_keys = ON`
//! set at open, and linear schema migrations run at construction followed
//! by an idempotent `repair()` pass that recreates any table a previous
//! migration failed to leave behind.

pub mod models;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::ids::NoteId;
use crate::language::LanguageLock;

pub use models::{NewSegment, Note, Segment};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("required schema objects missing after migration")]
    DbSchemaMissing,
}

/// A trait object seam so [`crate::coordinator::SessionCoordinator`] depends
/// only on a store handle, never a concrete `Database` type.
pub trait SegmentStore: Send + Sync {
    /// Insert-or-ignore on `(note_id, start_ms, end_ms)`. Returns `true` if
    /// a new row was inserted, `false` if the unique constraint silently
    /// absorbed a duplicate.
    fn insert_final_segment(&self, note_id: NoteId, segment: NewSegment) -> Result<bool, DbError>;

    fn get_segments_for_note(&self, note_id: NoteId) -> Result<Vec<Segment>, DbError>;
}

pub trait NoteStore: Send + Sync {
    fn create_note(&self, note: &Note) -> Result<(), DbError>;
    fn get_note(&self, note_id: NoteId) -> Result<Option<Note>, DbError>;
    fn finalize_note(
        &self,
        note_id: NoteId,
        duration_ms: i64,
        audio_path: &Path,
        language_lock: Option<LanguageLock>,
    ) -> Result<(), DbError>;
    /// Deletes the note; `segments` rows cascade via the foreign key.
    /// Returns the number of note rows removed (0 or 1).
    fn delete_note(&self, note_id: NoteId) -> Result<usize, DbError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DbError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DbError::Sqlite(e.into()))?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::run_migrations(&conn)?;
        schema::repair(&conn)?;
        verify_required_tables(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory database, schema-migrated the same way a file-backed one
    /// is. Used by this crate's own tests and by integration tests in
    /// downstream binaries that want a `NoteStore`/`SegmentStore` without a
    /// temp directory.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::run_migrations(&conn)?;
        schema::repair(&conn)?;
        verify_required_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn verify_required_tables(conn: &Connection) -> Result<(), DbError> {
    for table in ["notes", "segments"] {
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(DbError::DbSchemaMissing);
        }
    }
    Ok(())
}

impl NoteStore for Database {
    fn create_note(&self, note: &Note) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO notes (
                id, created_at_ms, updated_at_ms, title, duration_ms,
                language_lock, audio_path, asr_model, llm_model, insights_status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                note.id.to_string(),
                note.created_at_ms,
                note.updated_at_ms,
                note.title,
                note.duration_ms,
                models::language_lock_to_sql(note.language_lock),
                note.audio_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                note.asr_model,
                note.llm_model,
                note.insights_status,
            ],
        )?;
        Ok(())
    }

    fn get_note(&self, note_id: NoteId) -> Result<Option<Note>, DbError> {
        let conn = self.conn.lock();
        let note = conn
            .query_row(
                "SELECT id, created_at_ms, updated_at_ms, title, duration_ms,
                        language_lock, audio_path, asr_model, llm_model, insights_status
                 FROM notes WHERE id = ?1",
                [note_id.to_string()],
                |row| {
                    Ok(Note {
                        id: note_id,
                        created_at_ms: row.get(1)?,
                        updated_at_ms: row.get(2)?,
                        title: row.get(3)?,
                        duration_ms: row.get(4)?,
                        language_lock: models::language_lock_from_sql(row.get(5)?),
                        audio_path: row.get::<_, Option<String>>(6)?.map(PathBuf::from),
                        asr_model: row.get(7)?,
                        llm_model: row.get(8)?,
                        insights_status: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(note)
    }

    fn finalize_note(
        &self,
        note_id: NoteId,
        duration_ms: i64,
        audio_path: &Path,
        language_lock: Option<LanguageLock>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE notes SET duration_ms = ?1, audio_path = ?2, language_lock = ?3, updated_at_ms = ?4
             WHERE id = ?5",
            params![
                duration_ms,
                audio_path.to_string_lossy().to_string(),
                models::language_lock_to_sql(language_lock),
                Utc::now().timestamp_millis(),
                note_id.to_string(),
            ],
        )?;
        Ok(())
    }

    fn delete_note(&self, note_id: NoteId) -> Result<usize, DbError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM notes WHERE id = ?1", [note_id.to_string()])?;
        Ok(n)
    }
}

impl SegmentStore for Database {
    fn insert_final_segment(&self, note_id: NoteId, segment: NewSegment) -> Result<bool, DbError> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "INSERT OR IGNORE INTO segments (note_id, start_ms, end_ms, text, is_final, lang)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                note_id.to_string(),
                segment.start_ms,
                segment.end_ms,
                segment.text,
                models::lang_to_sql(segment.lang),
            ],
        )?;
        Ok(rows > 0)
    }

    fn get_segments_for_note(&self, note_id: NoteId) -> Result<Vec<Segment>, DbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, note_id, start_ms, end_ms, text, is_final, lang
             FROM segments WHERE note_id = ?1 ORDER BY start_ms ASC",
        )?;
        let segments = stmt
            .query_map([note_id.to_string()], |row| {
                Ok(Segment {
                    id: row.get(0)?,
                    note_id,
                    start_ms: row.get(2)?,
                    end_ms: row.get(3)?,
                    text: row.get(4)?,
                    is_final: row.get::<_, i64>(5)? != 0,
                    lang: models::lang_from_sql(row.get(6)?),
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_note(id: NoteId) -> Note {
        Note {
            id,
            created_at_ms: 1,
            updated_at_ms: 1,
            title: "untitled".to_string(),
            duration_ms: None,
            language_lock: None,
            audio_path: None,
            asr_model: "whisper-base".to_string(),
            llm_model: None,
            insights_status: None,
        }
    }

    #[test]
    fn duplicate_segment_insert_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let note_id = NoteId::new();
        db.create_note(&sample_note(note_id)).unwrap();

        let seg = NewSegment {
            start_ms: 0,
            end_ms: 1000,
            text: "hello".to_string(),
            lang: Some(crate::language::Lang::En),
        };
        assert!(db.insert_final_segment(note_id, seg.clone()).unwrap());
        assert!(!db.insert_final_segment(note_id, seg).unwrap());

        assert_eq!(db.get_segments_for_note(note_id).unwrap().len(), 1);
    }

    #[test]
    fn deleting_note_cascades_to_segments() {
        let db = Database::open_in_memory().unwrap();
        let note_id = NoteId::new();
        db.create_note(&sample_note(note_id)).unwrap();

        for i in 0..7i64 {
            db.insert_final_segment(
                note_id,
                NewSegment {
                    start_ms: i * 1000,
                    end_ms: i * 1000 + 500,
                    text: format!("segment {i}"),
                    lang: Some(crate::language::Lang::En),
                },
            )
            .unwrap();
        }
        assert_eq!(db.get_segments_for_note(note_id).unwrap().len(), 7);

        db.delete_note(note_id).unwrap();
        assert_eq!(db.get_segments_for_note(note_id).unwrap().len(), 0);
    }

    #[test]
    fn fresh_database_reports_schema_version_four() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn.lock();
        let version: i32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }
}
