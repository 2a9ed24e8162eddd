//! SQLite schema definitions for race metadata
//!
//! Tables:
//! - races: One row per event, keyed by id

use rusqlite::{Connection, Result};

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS races (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            date TEXT NOT NULL,
            country TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        [],
    )?;

    // Covers the listing order
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_races_season_round ON races(season DESC, round ASC)",
        [],
    )?;

    Ok(())
}
