//! Session state types

use crate::cleaner::{FieldCleaner, FieldValue};
use crate::screen::{Position, ScreenId, ScreenKind, ScreenTree};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an inbound conversation, as supplied by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub transaction_id: String,
    pub msisdn: String,
    pub service_code: String,
}

/// Persisted session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub transaction_id: String,
    pub msisdn: String,
    pub service_code: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One visited screen: what was shown, and what the subscriber answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub position: Position,
    /// Exactly the text that was sent, error prefix included
    pub text: String,
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// How a submission was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// The last field of the form was answered
    Completed,
    /// The subscriber declined the optional fields at a skip gate
    Stopped,
    /// The session ended with the form still incomplete
    Abandoned,
}

impl SubmissionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionOutcome::Completed => "completed",
            SubmissionOutcome::Stopped => "stopped",
            SubmissionOutcome::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(SubmissionOutcome::Completed),
            "stopped" => Some(SubmissionOutcome::Stopped),
            "abandoned" => Some(SubmissionOutcome::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionValue {
    pub field: ScreenId,
    pub name: String,
    pub value: FieldValue,
}

/// Answers collected for one form within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Index of this submission within its session
    pub ordinal: u32,
    pub form: String,
    /// At most one value per field
    pub values: Vec<SubmissionValue>,
    pub has_errors: bool,
    /// `None` while answers are still being collected
    pub outcome: Option<SubmissionOutcome>,
}

impl Submission {
    pub fn new(ordinal: u32, form: impl Into<String>) -> Self {
        Self {
            ordinal,
            form: form.into(),
            values: Vec::new(),
            has_errors: true,
            outcome: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn value(&self, field: ScreenId) -> Option<&FieldValue> {
        self.values.iter().find(|v| v.field == field).map(|v| &v.value)
    }

    /// Insert or overwrite the value for `value.field`
    pub fn upsert(&mut self, value: SubmissionValue) {
        self.values.retain(|v| v.field != value.field);
        self.values.push(value);
    }

    /// Whether every field of the form has an answer
    pub fn is_exhaustive(&self, tree: &ScreenTree) -> bool {
        tree.form(&self.form).is_some_and(|form| {
            form.fields.iter().all(|id| {
                self.value(*id).is_some()
                    || !matches!(tree.node(*id).map(|n| &n.kind), Some(ScreenKind::Field(_)))
            })
        })
    }
}

/// Everything the transition function needs to know about one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session: Session,
    pub history: Vec<HistoryEntry>,
    pub submissions: Vec<Submission>,
}

impl SessionState {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            history: Vec::new(),
            submissions: Vec::new(),
        }
    }

    /// Current position: the latest history entry's screen
    pub fn current(&self) -> Option<&Position> {
        self.history.last().map(|entry| &entry.position)
    }

    /// The collector still gathering answers for `form`, if any
    pub fn open_submission(&self, form: &str) -> Option<&Submission> {
        self.submissions
            .iter()
            .find(|s| s.form == form && s.is_open())
    }

    pub fn submission_mut(&mut self, ordinal: u32) -> Option<&mut Submission> {
        self.submissions.iter_mut().find(|s| s.ordinal == ordinal)
    }
}

/// Shared, read-only collaborators of a transition
#[derive(Clone, Copy)]
pub struct NavContext<'a> {
    pub tree: &'a ScreenTree,
    pub cleaner: &'a dyn FieldCleaner,
}

impl<'a> NavContext<'a> {
    pub fn new(tree: &'a ScreenTree, cleaner: &'a dyn FieldCleaner) -> Self {
        Self { tree, cleaner }
    }
}
