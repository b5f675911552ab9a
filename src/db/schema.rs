//! Database schema

pub use crate::state_machine::state::{
    HistoryEntry, NewSession, Session, Submission, SubmissionOutcome, SubmissionValue,
};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id TEXT NOT NULL UNIQUE,
    msisdn TEXT NOT NULL,
    service_code TEXT NOT NULL,
    completed BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    position TEXT NOT NULL,
    text TEXT NOT NULL,
    response TEXT,
    created_at TEXT NOT NULL,

    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_history_session ON history(session_id, id);

CREATE TABLE IF NOT EXISTS submissions (
    session_id INTEGER NOT NULL,
    ordinal INTEGER NOT NULL,
    form TEXT NOT NULL,
    has_errors BOOLEAN NOT NULL DEFAULT 1,
    outcome TEXT,
    created_at TEXT NOT NULL,
    finalized_at TEXT,

    PRIMARY KEY (session_id, ordinal),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS submission_values (
    session_id INTEGER NOT NULL,
    ordinal INTEGER NOT NULL,
    field_id INTEGER NOT NULL,
    field_name TEXT NOT NULL,
    value TEXT NOT NULL,

    PRIMARY KEY (session_id, ordinal, field_id),
    FOREIGN KEY (session_id, ordinal)
        REFERENCES submissions(session_id, ordinal) ON DELETE CASCADE
);
";
