//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use crate::cleaner::TypedFieldCleaner;
use crate::screen::{MenuDocument, Position, ScreenId, ScreenTree};
use crate::state_machine::{
    transition, Event, HistoryEntry, NavContext, NewSession, Reply, Session, SessionState,
    Submission, SubmissionOutcome, SubmissionValue,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// ============================================================================
// Fixtures
// ============================================================================

const SAMPLE_MENU: &str = include_str!("../../menu.json");

/// The bundled farm market menu
pub fn sample_tree() -> ScreenTree {
    MenuDocument::from_json(SAMPLE_MENU)
        .and_then(|doc| doc.into_tree(None))
        .expect("bundled menu is valid")
}

pub fn new_session(transaction_id: &str) -> NewSession {
    NewSession {
        transaction_id: transaction_id.to_string(),
        msisdn: "256700000001".to_string(),
        service_code: "*123#".to_string(),
    }
}

pub fn test_session(transaction_id: &str) -> Session {
    let now = Utc::now();
    Session {
        id: 1,
        transaction_id: transaction_id.to_string(),
        msisdn: "256700000001".to_string(),
        service_code: "*123#".to_string(),
        completed: false,
        created_at: now,
        updated_at: now,
    }
}

/// Feed inputs through the pure transition, collecting every reply
pub fn run_inputs(tree: &ScreenTree, inputs: &[&str]) -> (SessionState, Vec<Reply>) {
    let ctx = NavContext::new(tree, &TypedFieldCleaner);
    let mut state = SessionState::new(test_session("t-1"));
    let mut replies = Vec::new();
    for raw in inputs {
        let result = transition(&ctx, &state, Event::input(*raw, Utc::now()))
            .expect("transition failed");
        state = result.new_state;
        replies.push(result.reply);
    }
    (state, replies)
}

// ============================================================================
// Recording Hook
// ============================================================================

/// Hook that records every input and redirects on one token
pub struct RecordingHook {
    token: String,
    target: ScreenId,
    calls: Mutex<Vec<String>>,
}

impl RecordingHook {
    pub fn redirecting(token: impl Into<String>, target: ScreenId) -> Self {
        Self {
            token: token.into(),
            target,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Inputs seen so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PreTransitionHook for RecordingHook {
    async fn before_transition(&self, _: &Position, raw: &str, _: &Session) -> HookDecision {
        self.calls.lock().unwrap().push(raw.to_string());
        if raw == self.token {
            HookDecision::Redirect(self.target)
        } else {
            HookDecision::Proceed
        }
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

#[derive(Default)]
struct Tables {
    sessions: Vec<Session>,
    history: HashMap<i64, Vec<HistoryEntry>>,
    submissions: HashMap<i64, Vec<Submission>>,
}

/// In-memory storage for testing
#[allow(dead_code)]
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

#[allow(dead_code)]
impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched off again
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err("disk I/O error".to_string())
        } else {
            Ok(())
        }
    }

    fn with_submission<T>(
        &self,
        session_id: i64,
        ordinal: u32,
        f: impl FnOnce(&mut Submission) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut tables = self.tables.lock().unwrap();
        let submission = tables
            .submissions
            .get_mut(&session_id)
            .and_then(|subs| subs.iter_mut().find(|s| s.ordinal == ordinal))
            .ok_or_else(|| format!("Submission not found: {session_id}/{ordinal}"))?;
        f(submission)
    }
}

#[async_trait]
impl SessionStore for InMemoryStorage {
    async fn get_or_create(&self, new: &NewSession) -> Result<Session, String> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .sessions
            .iter()
            .find(|s| s.transaction_id == new.transaction_id)
        {
            return Ok(existing.clone());
        }
        self.check_writable()?;

        let now = Utc::now();
        let session = Session {
            id: i64::try_from(tables.sessions.len()).unwrap() + 1,
            transaction_id: new.transaction_id.clone(),
            msisdn: new.msisdn.clone(),
            service_code: new.service_code.clone(),
            completed: false,
            created_at: now,
            updated_at: now,
        };
        tables.sessions.push(session.clone());
        Ok(session)
    }

    async fn find_session(&self, transaction_id: &str) -> Result<Option<Session>, String> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .sessions
            .iter()
            .find(|s| s.transaction_id == transaction_id)
            .cloned())
    }

    async fn mark_completed(&self, session_id: i64) -> Result<(), String> {
        self.check_writable()?;
        let mut tables = self.tables.lock().unwrap();
        let session = tables
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| format!("Session not found: {session_id}"))?;
        session.completed = true;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn append_history(&self, session_id: i64, entry: &HistoryEntry) -> Result<(), String> {
        self.check_writable()?;
        let mut tables = self.tables.lock().unwrap();
        tables
            .history
            .entry(session_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn pop_history(&self, session_id: i64) -> Result<Option<HistoryEntry>, String> {
        self.check_writable()?;
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .history
            .get_mut(&session_id)
            .and_then(Vec::pop))
    }

    async fn latest_history(&self, session_id: i64) -> Result<Option<HistoryEntry>, String> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .history
            .get(&session_id)
            .and_then(|h| h.last())
            .cloned())
    }

    async fn history(&self, session_id: i64) -> Result<Vec<HistoryEntry>, String> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.history.get(&session_id).cloned().unwrap_or_default())
    }

    async fn record_response(&self, session_id: i64, raw: &str) -> Result<(), String> {
        self.check_writable()?;
        let mut tables = self.tables.lock().unwrap();
        if let Some(latest) = tables
            .history
            .get_mut(&session_id)
            .and_then(|h| h.last_mut())
        {
            latest.response = Some(raw.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for InMemoryStorage {
    async fn open_submission(
        &self,
        session_id: i64,
        ordinal: u32,
        form: &str,
    ) -> Result<(), String> {
        self.check_writable()?;
        let mut tables = self.tables.lock().unwrap();
        tables
            .submissions
            .entry(session_id)
            .or_default()
            .push(Submission::new(ordinal, form));
        Ok(())
    }

    async fn upsert_value(
        &self,
        session_id: i64,
        ordinal: u32,
        value: &SubmissionValue,
    ) -> Result<(), String> {
        self.check_writable()?;
        self.with_submission(session_id, ordinal, |submission| {
            submission.upsert(value.clone());
            Ok(())
        })
    }

    async fn finalize_submission(
        &self,
        session_id: i64,
        ordinal: u32,
        outcome: SubmissionOutcome,
    ) -> Result<(), String> {
        self.check_writable()?;
        self.with_submission(session_id, ordinal, |submission| {
            if !submission.is_open() {
                return Err(format!("Submission already finalized: {ordinal}"));
            }
            submission.outcome = Some(outcome);
            submission.has_errors = outcome == SubmissionOutcome::Abandoned;
            Ok(())
        })
    }

    async fn submissions(&self, session_id: i64) -> Result<Vec<Submission>, String> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .submissions
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}
