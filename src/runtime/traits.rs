//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::screen::{Position, ScreenId};
use crate::state_machine::{
    HistoryEntry, NewSession, Session, Submission, SubmissionOutcome, SubmissionValue,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Storage for sessions and their navigation history
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the session for a transaction id, creating it on first sight
    async fn get_or_create(&self, new: &NewSession) -> Result<Session, String>;

    async fn find_session(&self, transaction_id: &str) -> Result<Option<Session>, String>;

    async fn mark_completed(&self, session_id: i64) -> Result<(), String>;

    async fn append_history(&self, session_id: i64, entry: &HistoryEntry) -> Result<(), String>;

    /// Delete and return the latest entry
    async fn pop_history(&self, session_id: i64) -> Result<Option<HistoryEntry>, String>;

    #[allow(dead_code)] // API completeness
    async fn latest_history(&self, session_id: i64) -> Result<Option<HistoryEntry>, String>;

    /// Full history, oldest first
    async fn history(&self, session_id: i64) -> Result<Vec<HistoryEntry>, String>;

    /// Store the raw input on the latest entry
    async fn record_response(&self, session_id: i64, raw: &str) -> Result<(), String>;
}

/// Storage for form submissions
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn open_submission(&self, session_id: i64, ordinal: u32, form: &str)
        -> Result<(), String>;

    /// Insert or overwrite the value for one field
    async fn upsert_value(
        &self,
        session_id: i64,
        ordinal: u32,
        value: &SubmissionValue,
    ) -> Result<(), String>;

    async fn finalize_submission(
        &self,
        session_id: i64,
        ordinal: u32,
        outcome: SubmissionOutcome,
    ) -> Result<(), String>;

    async fn submissions(&self, session_id: i64) -> Result<Vec<Submission>, String>;
}

/// Combined storage trait for convenience
pub trait Storage: SessionStore + SubmissionStore {}
impl<T: SessionStore + SubmissionStore> Storage for T {}

/// What the pre-transition hook wants done with an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    /// Interpret the input against the current screen
    Proceed,
    /// Jump straight to this screen
    Redirect(ScreenId),
}

/// Runs before every transition except a session's first request
#[async_trait]
pub trait PreTransitionHook: Send + Sync {
    async fn before_transition(
        &self,
        current: &Position,
        raw: &str,
        session: &Session,
    ) -> HookDecision;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn get_or_create(&self, new: &NewSession) -> Result<Session, String> {
        (**self).get_or_create(new).await
    }

    async fn find_session(&self, transaction_id: &str) -> Result<Option<Session>, String> {
        (**self).find_session(transaction_id).await
    }

    async fn mark_completed(&self, session_id: i64) -> Result<(), String> {
        (**self).mark_completed(session_id).await
    }

    async fn append_history(&self, session_id: i64, entry: &HistoryEntry) -> Result<(), String> {
        (**self).append_history(session_id, entry).await
    }

    async fn pop_history(&self, session_id: i64) -> Result<Option<HistoryEntry>, String> {
        (**self).pop_history(session_id).await
    }

    async fn latest_history(&self, session_id: i64) -> Result<Option<HistoryEntry>, String> {
        (**self).latest_history(session_id).await
    }

    async fn history(&self, session_id: i64) -> Result<Vec<HistoryEntry>, String> {
        (**self).history(session_id).await
    }

    async fn record_response(&self, session_id: i64, raw: &str) -> Result<(), String> {
        (**self).record_response(session_id, raw).await
    }
}

#[async_trait]
impl<T: SubmissionStore + ?Sized> SubmissionStore for Arc<T> {
    async fn open_submission(
        &self,
        session_id: i64,
        ordinal: u32,
        form: &str,
    ) -> Result<(), String> {
        (**self).open_submission(session_id, ordinal, form).await
    }

    async fn upsert_value(
        &self,
        session_id: i64,
        ordinal: u32,
        value: &SubmissionValue,
    ) -> Result<(), String> {
        (**self).upsert_value(session_id, ordinal, value).await
    }

    async fn finalize_submission(
        &self,
        session_id: i64,
        ordinal: u32,
        outcome: SubmissionOutcome,
    ) -> Result<(), String> {
        (**self)
            .finalize_submission(session_id, ordinal, outcome)
            .await
    }

    async fn submissions(&self, session_id: i64) -> Result<Vec<Submission>, String> {
        (**self).submissions(session_id).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

use crate::db::{Database, DbError};

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for DatabaseStorage {
    async fn get_or_create(&self, new: &NewSession) -> Result<Session, String> {
        self.db.get_or_create_session(new).map_err(|e| e.to_string())
    }

    async fn find_session(&self, transaction_id: &str) -> Result<Option<Session>, String> {
        match self.db.get_session(transaction_id) {
            Ok(session) => Ok(Some(session)),
            Err(DbError::SessionNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn mark_completed(&self, session_id: i64) -> Result<(), String> {
        self.db
            .mark_session_completed(session_id)
            .map_err(|e| e.to_string())
    }

    async fn append_history(&self, session_id: i64, entry: &HistoryEntry) -> Result<(), String> {
        self.db
            .append_history(session_id, entry)
            .map_err(|e| e.to_string())
    }

    async fn pop_history(&self, session_id: i64) -> Result<Option<HistoryEntry>, String> {
        self.db.pop_history(session_id).map_err(|e| e.to_string())
    }

    async fn latest_history(&self, session_id: i64) -> Result<Option<HistoryEntry>, String> {
        self.db.latest_history(session_id).map_err(|e| e.to_string())
    }

    async fn history(&self, session_id: i64) -> Result<Vec<HistoryEntry>, String> {
        self.db.history(session_id).map_err(|e| e.to_string())
    }

    async fn record_response(&self, session_id: i64, raw: &str) -> Result<(), String> {
        self.db
            .record_response(session_id, raw)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SubmissionStore for DatabaseStorage {
    async fn open_submission(
        &self,
        session_id: i64,
        ordinal: u32,
        form: &str,
    ) -> Result<(), String> {
        self.db
            .open_submission(session_id, ordinal, form)
            .map_err(|e| e.to_string())
    }

    async fn upsert_value(
        &self,
        session_id: i64,
        ordinal: u32,
        value: &SubmissionValue,
    ) -> Result<(), String> {
        self.db
            .upsert_value(session_id, ordinal, value)
            .map_err(|e| e.to_string())
    }

    async fn finalize_submission(
        &self,
        session_id: i64,
        ordinal: u32,
        outcome: SubmissionOutcome,
    ) -> Result<(), String> {
        self.db
            .finalize_submission(session_id, ordinal, outcome)
            .map_err(|e| e.to_string())
    }

    async fn submissions(&self, session_id: i64) -> Result<Vec<Submission>, String> {
        self.db.submissions(session_id).map_err(|e| e.to_string())
    }
}

/// Hook that never intervenes
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl PreTransitionHook for NoopHook {
    async fn before_transition(&self, _: &Position, _: &str, _: &Session) -> HookDecision {
        HookDecision::Proceed
    }
}

/// Sends the subscriber to `home` whenever they type `token`, from any screen
#[derive(Debug, Clone)]
pub struct HomeShortcutHook {
    token: String,
    home: ScreenId,
}

impl HomeShortcutHook {
    pub fn new(token: impl Into<String>, home: ScreenId) -> Self {
        Self {
            token: token.into(),
            home,
        }
    }
}

#[async_trait]
impl PreTransitionHook for HomeShortcutHook {
    async fn before_transition(&self, _: &Position, raw: &str, _: &Session) -> HookDecision {
        if raw.trim() == self.token {
            HookDecision::Redirect(self.home)
        } else {
            HookDecision::Proceed
        }
    }
}
