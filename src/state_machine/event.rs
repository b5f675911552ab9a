//! Events that drive a session

use crate::screen::ScreenId;
use chrono::{DateTime, Utc};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// One raw input from the subscriber (empty on the first request)
    Input { raw: String, at: DateTime<Utc> },

    /// The pre-transition hook asked to jump to `target` instead of
    /// interpreting `raw` against the current screen
    Redirect {
        target: ScreenId,
        raw: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn input(raw: impl Into<String>, at: DateTime<Utc>) -> Self {
        Event::Input {
            raw: raw.into(),
            at,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::Input { at, .. } | Event::Redirect { at, .. } => *at,
        }
    }
}
