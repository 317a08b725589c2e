//! Schema migrations and the post-migration repair pass.
//!
//! A `schema_version` bookkeeping table and linear integer-versioned
//! migrations, each wrapping a `CREATE TABLE IF NOT EXISTS`, bring a
//! database from whatever version it's at up to [`SCHEMA_VERSION`]. Only
//! the `notes` and `segments` tables this crate actually needs are created —
//! no search index or summary table.

use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 4;

pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let version = get_schema_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }
    if version < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

/// Re-issue every `CREATE TABLE IF NOT EXISTS`/index for the current schema
/// version. Idempotent by construction; recovers a database whose
/// `schema_version` row claims a version whose tables were never actually
/// created (`DbSchemaMissing`, ).
pub fn repair(conn: &Connection) -> rusqlite::Result<()> {
    create_notes_table(conn)?;
    add_note_columns_if_missing(conn)?;
    create_segments_table(conn)?;
    create_segments_index(conn)?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

fn create_notes_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            title TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    create_notes_table(conn)?;
    set_schema_version(conn, 1)?;
    Ok(())
}

fn add_note_columns_if_missing(conn: &Connection) -> rusqlite::Result<()> {
    let existing: Vec<String> = conn
        .prepare("PRAGMA table_info(notes)")?
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;

    let wanted = [
        ("duration_ms", "INTEGER"),
        ("language_lock", "TEXT"),
        ("audio_path", "TEXT"),
        ("asr_model", "TEXT"),
        ("llm_model", "TEXT"),
        ("insights_status", "TEXT"),
    ];
    for (column, ty) in wanted {
        if !existing.iter().any(|c| c == column) {
            conn.execute(&format!("ALTER TABLE notes ADD COLUMN {column} {ty}"), [])?;
        }
    }
    Ok(())
}

fn migrate_v2(conn: &Connection) -> rusqlite::Result<()> {
    add_note_columns_if_missing(conn)?;
    set_schema_version(conn, 2)?;
    Ok(())
}

fn create_segments_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            note_id TEXT NOT NULL,
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL,
            text TEXT NOT NULL,
            is_final INTEGER NOT NULL,
            lang TEXT,
            FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE,
            UNIQUE(note_id, start_ms, end_ms)
        )",
        [],
    )?;
    Ok(())
}

fn migrate_v3(conn: &Connection) -> rusqlite::Result<()> {
    create_segments_table(conn)?;
    set_schema_version(conn, 3)?;
    Ok(())
}

fn create_segments_index(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_segments_note_start ON segments(note_id, start_ms)",
        [],
    )?;
    Ok(())
}

fn migrate_v4(conn: &Connection) -> rusqlite::Result<()> {
    create_segments_index(conn)?;
    set_schema_version(conn, 4)?;
    Ok(())
}
