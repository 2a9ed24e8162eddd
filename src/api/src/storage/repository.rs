//! SQLite repository for race metadata

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::schema::create_tables;
use super::RaceStore;
use crate::types::Race;

/// Repository for race metadata
pub struct RaceRepository {
    conn: Mutex<Connection>,
}

impl RaceRepository {
    /// Create a new repository, initializing the database if needed
    pub fn new(db_path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(db_path).context("Failed to open database")?;

        // Create tables if they don't exist
        create_tables(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory repository (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock connection: {}", e))
    }

    /// Insert a race (upsert)
    pub fn insert_race(&self, race: &Race) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO races
            (id, name, season, round, date, country)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                race.id,
                race.name,
                race.season,
                race.round,
                race.date,
                race.country,
            ],
        )?;
        Ok(())
    }

    /// Get race count
    pub fn race_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM races", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl RaceStore for RaceRepository {
    fn list_races(&self) -> Result<Vec<Race>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, season, round, date, country
            FROM races
            ORDER BY season DESC, round ASC
            "#,
        )?;

        let races = stmt
            .query_map([], |row| {
                Ok(Race {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    season: row.get(2)?,
                    round: row.get(3)?,
                    date: row.get(4)?,
                    country: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read race rows")?;

        Ok(races)
    }
}
