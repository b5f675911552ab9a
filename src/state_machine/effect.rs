//! Effects produced by state transitions

use super::state::{HistoryEntry, SubmissionOutcome, SubmissionValue};
use serde::Serialize;

/// Effects to be executed after state transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Store the raw input on the latest history entry
    RecordResponse { raw: String },

    /// Persist a newly shown screen
    AppendHistory { entry: HistoryEntry },

    /// Drop the latest history entry
    PopHistory,

    /// Create a collector for `form`
    OpenSubmission { ordinal: u32, form: String },

    /// Insert or overwrite one field value
    UpsertValue { ordinal: u32, value: SubmissionValue },

    FinalizeSubmission {
        ordinal: u32,
        outcome: SubmissionOutcome,
    },

    /// Mark the session as ended
    CompleteSession,

    /// Publish to downstream consumers once everything above is stored
    Notify(Notification),
}

/// Outbox message for consumers outside the request path
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    SubmissionFinalized {
        transaction_id: String,
        msisdn: String,
        form: String,
        ordinal: u32,
        outcome: SubmissionOutcome,
        values: Vec<SubmissionValue>,
    },
    SessionCompleted {
        transaction_id: String,
        msisdn: String,
    },
}

impl Notification {
    pub fn event_type(&self) -> &'static str {
        match self {
            Notification::SubmissionFinalized { .. } => "submission_finalized",
            Notification::SessionCompleted { .. } => "session_completed",
        }
    }

    pub fn transaction_id(&self) -> &str {
        match self {
            Notification::SubmissionFinalized { transaction_id, .. }
            | Notification::SessionCompleted { transaction_id, .. } => transaction_id,
        }
    }
}
