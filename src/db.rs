//! Database module for the USSD engine
//!
//! Provides persistence for sessions, navigation history and submissions.

mod schema;

pub use schema::*;

use crate::screen::{Position, ScreenId};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Submission {ordinal} not found in session {session_id}")]
    SubmissionNotFound { session_id: i64, ordinal: u32 },
    #[error("Submission {ordinal} in session {session_id} is already finalized")]
    AlreadyFinalized { session_id: i64, ordinal: u32 },
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Session Operations ====================

    /// Fetch the session for a transaction id, creating it on first sight
    pub fn get_or_create_session(&self, new: &NewSession) -> DbResult<Session> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO sessions (transaction_id, msisdn, service_code, completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![new.transaction_id, new.msisdn, new.service_code, now],
        )?;
        query_session(&conn, &new.transaction_id)
    }

    /// Get session by transaction id
    pub fn get_session(&self, transaction_id: &str) -> DbResult<Session> {
        let conn = self.conn();
        query_session(&conn, transaction_id)
    }

    pub fn mark_session_completed(&self, session_id: i64) -> DbResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE sessions SET completed = 1, updated_at = ?2 WHERE id = ?1",
            params![session_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ==================== History Operations ====================

    pub fn append_history(&self, session_id: i64, entry: &HistoryEntry) -> DbResult<()> {
        let conn = self.conn();
        let position = serde_json::to_string(&entry.position)?;
        conn.execute(
            "INSERT INTO history (session_id, position, text, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                position,
                entry.text,
                entry.response,
                entry.created_at.to_rfc3339()
            ],
        )?;
        conn.execute(
            "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
            params![session_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete and return the latest history entry
    pub fn pop_history(&self, session_id: i64) -> DbResult<Option<HistoryEntry>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let latest = tx
            .query_row(
                "SELECT id, position, text, response, created_at FROM history
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                params![session_id],
                |row| Ok((row.get::<_, i64>(0)?, parse_history_row(row, 1)?)),
            )
            .optional()?;
        if let Some((id, _)) = &latest {
            tx.execute("DELETE FROM history WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(latest.map(|(_, entry)| entry))
    }

    pub fn latest_history(&self, session_id: i64) -> DbResult<Option<HistoryEntry>> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                "SELECT position, text, response, created_at FROM history
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                params![session_id],
                |row| parse_history_row(row, 0),
            )
            .optional()?;
        Ok(entry)
    }

    /// Full history, oldest first
    pub fn history(&self, session_id: i64) -> DbResult<Vec<HistoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT position, text, response, created_at FROM history
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| parse_history_row(row, 0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Store the raw input on the latest history entry
    pub fn record_response(&self, session_id: i64, raw: &str) -> DbResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE history SET response = ?2
             WHERE id = (SELECT MAX(id) FROM history WHERE session_id = ?1)",
            params![session_id, raw],
        )?;
        Ok(())
    }

    // ==================== Submission Operations ====================

    pub fn open_submission(&self, session_id: i64, ordinal: u32, form: &str) -> DbResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO submissions (session_id, ordinal, form, has_errors, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![session_id, ordinal, form, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete-then-insert so a field never holds more than one value
    pub fn upsert_value(
        &self,
        session_id: i64,
        ordinal: u32,
        value: &SubmissionValue,
    ) -> DbResult<()> {
        let json = serde_json::to_string(&value.value)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM submission_values
             WHERE session_id = ?1 AND ordinal = ?2 AND field_id = ?3",
            params![session_id, ordinal, value.field.0],
        )?;
        tx.execute(
            "INSERT INTO submission_values (session_id, ordinal, field_id, field_name, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, ordinal, value.field.0, value.name, json],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn finalize_submission(
        &self,
        session_id: i64,
        ordinal: u32,
        outcome: SubmissionOutcome,
    ) -> DbResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE submissions SET outcome = ?3, has_errors = ?4, finalized_at = ?5
             WHERE session_id = ?1 AND ordinal = ?2 AND outcome IS NULL",
            params![
                session_id,
                ordinal,
                outcome.as_str(),
                outcome == SubmissionOutcome::Abandoned,
                Utc::now().to_rfc3339()
            ],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM submissions WHERE session_id = ?1 AND ordinal = ?2)",
            params![session_id, ordinal],
            |row| row.get(0),
        )?;
        if exists {
            Err(DbError::AlreadyFinalized {
                session_id,
                ordinal,
            })
        } else {
            Err(DbError::SubmissionNotFound {
                session_id,
                ordinal,
            })
        }
    }

    /// All submissions of a session with their values, by ordinal
    pub fn submissions(&self, session_id: i64) -> DbResult<Vec<Submission>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ordinal, form, has_errors, outcome FROM submissions
             WHERE session_id = ?1 ORDER BY ordinal ASC",
        )?;
        let mut submissions = stmt
            .query_map(params![session_id], |row| {
                let outcome: Option<String> = row.get(3)?;
                Ok(Submission {
                    ordinal: row.get(0)?,
                    form: row.get(1)?,
                    values: Vec::new(),
                    has_errors: row.get(2)?,
                    outcome: outcome.as_deref().and_then(SubmissionOutcome::parse),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT field_id, field_name, value FROM submission_values
             WHERE session_id = ?1 AND ordinal = ?2 ORDER BY rowid ASC",
        )?;
        for submission in &mut submissions {
            submission.values = stmt
                .query_map(params![session_id, submission.ordinal], |row| {
                    Ok(SubmissionValue {
                        field: ScreenId(row.get(0)?),
                        name: row.get(1)?,
                        value: json_column(row, 2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(submissions)
    }
}

fn query_session(conn: &Connection, transaction_id: &str) -> DbResult<Session> {
    conn.query_row(
        "SELECT id, transaction_id, msisdn, service_code, completed, created_at, updated_at
         FROM sessions WHERE transaction_id = ?1",
        params![transaction_id],
        |row| {
            Ok(Session {
                id: row.get(0)?,
                transaction_id: row.get(1)?,
                msisdn: row.get(2)?,
                service_code: row.get(3)?,
                completed: row.get(4)?,
                created_at: parse_datetime(&row.get::<_, String>(5)?),
                updated_at: parse_datetime(&row.get::<_, String>(6)?),
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::SessionNotFound(transaction_id.to_string()),
        other => DbError::Sqlite(other),
    })
}

/// Parse (position, text, response, created_at) starting at column `start`
fn parse_history_row(row: &Row<'_>, start: usize) -> rusqlite::Result<HistoryEntry> {
    let position: Position = json_column(row, start)?;
    Ok(HistoryEntry {
        position,
        text: row.get(start + 1)?,
        response: row.get(start + 2)?,
        created_at: parse_datetime(&row.get::<_, String>(start + 3)?),
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let json: String = row.get(idx)?;
    serde_json::from_str(&json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
