//! Durable per-commit flag store backed by SQLite.
//!
//! One table of `(commit_id, flag)` pairs keyed on the pair. Every
//! operation is a single auto-committing statement and every value is
//! bound as a parameter. Flags are advisory annotations, so no
//! transaction ever spans multiple mutations.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;

pub struct FlagStore {
    conn: Mutex<Connection>,
}

impl FlagStore {
    /// Opens (or lazily creates) the store at `db_path`, including the
    /// schema and any missing parent directories.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create flag store directory {parent:?}"))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open flag store at {db_path:?}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS flags (
                commit_id TEXT NOT NULL,
                flag      TEXT NOT NULL,
                PRIMARY KEY (commit_id, flag)
            ) WITHOUT ROWID;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests and throwaway hosts.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS flags (
                commit_id TEXT NOT NULL,
                flag      TEXT NOT NULL,
                PRIMARY KEY (commit_id, flag)
            ) WITHOUT ROWID;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Attaches `flag` to `commit_id`. Re-inserting an existing pair is
    /// a no-op, so replaying a flag batch never aborts.
    pub fn insert(&self, commit_id: &str, flag: &str) -> Result<(), rusqlite::Error> {
        self.conn().execute(
            "INSERT OR IGNORE INTO flags (commit_id, flag) VALUES (?1, ?2)",
            rusqlite::params![commit_id, flag],
        )?;
        Ok(())
    }

    pub fn remove(&self, commit_id: &str, flag: &str) -> Result<(), rusqlite::Error> {
        self.conn().execute(
            "DELETE FROM flags WHERE commit_id = ?1 AND flag = ?2",
            rusqlite::params![commit_id, flag],
        )?;
        Ok(())
    }

    pub fn remove_all(&self, commit_id: &str) -> Result<(), rusqlite::Error> {
        self.conn().execute(
            "DELETE FROM flags WHERE commit_id = ?1",
            rusqlite::params![commit_id],
        )?;
        Ok(())
    }

    pub fn contains(&self, commit_id: &str, flag: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached("SELECT 1 FROM flags WHERE commit_id = ?1 AND flag = ?2")?;
        stmt.exists(rusqlite::params![commit_id, flag])
    }

    pub fn flags_for(&self, commit_id: &str) -> Result<Vec<String>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached("SELECT flag FROM flags WHERE commit_id = ?1 ORDER BY flag")?;
        let rows = stmt.query_map(rusqlite::params![commit_id], |row| row.get(0))?;
        rows.collect()
    }

    /// Drops every flag for every commit. Invoked when the engine is
    /// pointed at a different repository, where old annotations are
    /// meaningless.
    pub fn clear(&self) -> Result<(), rusqlite::Error> {
        self.conn().execute("DELETE FROM flags", [])?;
        Ok(())
    }
}
