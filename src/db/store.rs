//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::parser::is_valid_https_url;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Invalid record: {0}")]
    Invalid(String),
    #[error("Not found")]
    NotFound,
    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Candidates ---

    /// Seed the default candidates if none are stored. Returns how many were added.
    pub fn seed_default_candidates(&self) -> Result<usize, DbError> {
        if !self.get_candidates()?.is_empty() {
            return Ok(0);
        }
        let defaults = default_candidates();
        self.replace_candidates(&defaults)?;
        Ok(defaults.len())
    }

    /// Add a candidate and return its ID. Re-adding an existing address:port
    /// updates its label.
    pub fn add_candidate(&self, candidate: &mut Candidate) -> Result<i64, DbError> {
        validate_candidate(candidate)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO candidates (address, port, label) VALUES (?1, ?2, ?3)
             ON CONFLICT(address, port) DO UPDATE SET label=excluded.label",
            params![candidate.address, candidate.port, candidate.label],
        )?;
        let id = conn.query_row(
            "SELECT id FROM candidates WHERE address = ?1 AND port = ?2",
            params![candidate.address, candidate.port],
            |row| row.get(0),
        )?;
        candidate.id = id;
        Ok(id)
    }

    /// Replace the whole candidate list.
    pub fn replace_candidates(&self, candidates: &[Candidate]) -> Result<(), DbError> {
        for c in candidates {
            validate_candidate(c)?;
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM candidates", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO candidates (address, port, label) VALUES (?1, ?2, ?3)
                 ON CONFLICT(address, port) DO UPDATE SET label=excluded.label",
            )?;
            for c in candidates {
                stmt.execute(params![c.address, c.port, c.label])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Get all candidates in insertion order.
    pub fn get_candidates(&self) -> Result<Vec<Candidate>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, address, port, label FROM candidates ORDER BY id")?;
        let candidates = stmt
            .query_map([], |row| {
                Ok(Candidate {
                    id: row.get(0)?,
                    address: row.get(1)?,
                    port: row.get(2)?,
                    label: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(candidates)
    }

    pub fn delete_candidate(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM candidates WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Comparison services ---

    /// Add a comparison service. The URL must be HTTPS and not already stored.
    pub fn add_service(&self, service: &mut ServiceRecord) -> Result<i64, DbError> {
        if service.name.trim().is_empty() {
            return Err(DbError::Invalid("service name is empty".to_string()));
        }
        if !is_valid_https_url(&service.url) {
            return Err(DbError::Invalid(format!("not an https url: {}", service.url)));
        }

        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM comparison_services WHERE url = ?1",
                params![service.url],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(DbError::Invalid(format!("service already exists: {}", service.url)));
        }

        conn.execute(
            "INSERT INTO comparison_services (name, url, description) VALUES (?1, ?2, ?3)",
            params![service.name, service.url, service.description],
        )?;
        let id = conn.last_insert_rowid();
        service.id = id;
        Ok(id)
    }

    pub fn get_services(&self) -> Result<Vec<ServiceRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, url, description FROM comparison_services ORDER BY id",
        )?;
        let services = stmt
            .query_map([], |row| {
                Ok(ServiceRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                    description: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(services)
    }

    pub fn delete_service(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM comparison_services WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Selections ---

    /// Record the chosen result of a run.
    pub fn record_selection(&self, selection: &mut Selection) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO selections (mode, name, address, port, latency_ms, loss_ratio, selected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                selection.mode.as_str(),
                selection.name,
                selection.address,
                selection.port,
                selection.latency_ms,
                selection.loss_ratio,
                selection.selected_at.format(TIME_FORMAT).to_string(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        selection.id = id;
        Ok(id)
    }

    /// Most recent selection for a mode.
    pub fn latest_selection(&self, mode: SelectionMode) -> Result<Option<Selection>, DbError> {
        let conn = self.conn()?;
        let selection = conn
            .query_row(
                "SELECT id, mode, name, address, port, latency_ms, loss_ratio, selected_at
                 FROM selections WHERE mode = ?1 ORDER BY selected_at DESC, id DESC LIMIT 1",
                params![mode.as_str()],
                selection_from_row,
            )
            .optional()?;
        Ok(selection)
    }
}

fn validate_candidate(candidate: &Candidate) -> Result<(), DbError> {
    candidate
        .to_target()
        .map(|_| ())
        .map_err(|e| DbError::Invalid(e.to_string()))
}

fn selection_from_row(row: &Row<'_>) -> SqlResult<Selection> {
    let mode: String = row.get(1)?;
    let time_str: String = row.get(7)?;
    Ok(Selection {
        id: row.get(0)?,
        mode: mode.parse().unwrap_or(SelectionMode::Speed),
        name: row.get(2)?,
        address: row.get(3)?,
        port: row.get(4)?,
        latency_ms: row.get(5)?,
        loss_ratio: row.get(6)?,
        selected_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
    })
}

/// Parse a timestamp written with [`TIME_FORMAT`].
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
