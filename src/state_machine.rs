//! Session navigation state machine
//!
//! A pure transition function over an explicit session state: each raw
//! input produces the next state, a reply for the subscriber, and the
//! effects the runtime must persist.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, Notification};
pub use event::Event;
pub use state::{
    HistoryEntry, NavContext, NewSession, Session, SessionState, Submission, SubmissionOutcome,
    SubmissionValue,
};
pub use transition::{transition, Action, Reply, TransitionError};
