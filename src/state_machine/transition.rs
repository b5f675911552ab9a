//! Pure state transition function

use super::effect::{Effect, Notification};
use super::event::Event;
use super::state::{
    HistoryEntry, NavContext, SessionState, Submission, SubmissionOutcome, SubmissionValue,
};
use crate::cleaner::FieldValue;
use crate::screen::{
    Field, InputOutcome, Position, Screen, ScreenId, ScreenTree, INVALID_MENU_OPTION,
    SESSION_ENDED,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Outbound action code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Continue,
    End,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Continue => "continue",
            Action::End => "end",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly what the subscriber gets back for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    pub action: Action,
}

impl Reply {
    pub fn new(text: impl Into<String>, terminal: bool) -> Self {
        Self {
            text: text.into(),
            action: if terminal { Action::End } else { Action::Continue },
        }
    }

    pub fn session_ended() -> Self {
        Self::new(SESSION_ENDED, true)
    }
}

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
    pub reply: Reply,
}

impl TransitionResult {
    /// Outbox entries, in the order they were produced
    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Notify(notification) => Some(notification),
            _ => None,
        })
    }
}

/// Collector invariant violations. These abort the request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Submission {ordinal} for form '{form}' is already finalized")]
    AlreadyFinalized { form: String, ordinal: u32 },
    #[error("No open submission for form '{form}'")]
    MissingCollector { form: String },
    #[error("Unknown submission {ordinal}")]
    UnknownSubmission { ordinal: u32 },
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs. Nothing is
/// persisted here: the caller applies `effects` in order and only then
/// adopts `new_state`.
pub fn transition(
    ctx: &NavContext<'_>,
    state: &SessionState,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    if state.session.completed {
        return Ok(TransitionResult {
            new_state: state.clone(),
            effects: vec![],
            reply: Reply::session_ended(),
        });
    }

    let step = Step {
        ctx: *ctx,
        state: state.clone(),
        effects: Vec::new(),
        at: event.at(),
    };

    // ============================================================
    // First request: show the root, consume nothing
    // ============================================================
    let Some(current) = state.current() else {
        let root = ctx.tree.enter(ctx.tree.root());
        return step.show(root, None);
    };

    match event {
        Event::Input { raw, .. } => step.input(current, &raw),
        Event::Redirect { target, raw, .. } => step.redirect(target, &raw),
    }
}

/// Working copy of one transition
struct Step<'a> {
    ctx: NavContext<'a>,
    state: SessionState,
    effects: Vec<Effect>,
    at: DateTime<Utc>,
}

impl Step<'_> {
    fn input(
        mut self,
        current: &Position,
        raw: &str,
    ) -> Result<TransitionResult, TransitionError> {
        let tree = self.ctx.tree;
        self.record_response(raw);

        let Some(screen) = tree.resolve(current) else {
            tracing::warn!(position = %current, "Stored position no longer resolves");
            return self.show(Position::session_ended(), None);
        };

        match (screen, screen.accept_input(tree, raw, self.ctx.cleaner)) {
            // ============================================================
            // Field answers
            // ============================================================
            (Screen::Field { node, field }, InputOutcome::Answered(value)) => {
                let ordinal = self.collector_for(&field.form);
                self.upsert(ordinal, node.id, field, value);
                let gated = field.skip_gate
                    && tree
                        .form(&field.form)
                        .is_some_and(|form| form.skip_prompt.is_some());
                if gated {
                    self.show(Position::SkipPrompt { field: node.id }, None)
                } else {
                    self.after_field(field, ordinal)
                }
            }
            (Screen::Field { field, .. }, InputOutcome::Stay { error }) => {
                self.collector_for(&field.form);
                self.show(current.clone(), Some(&error))
            }

            // ============================================================
            // Skip gate
            // ============================================================
            (Screen::SkipPrompt { field, .. }, InputOutcome::Continue) => {
                let ordinal = self.existing_collector(&field.form)?;
                self.after_field(field, ordinal)
            }
            (Screen::SkipPrompt { field, .. }, InputOutcome::Stop) => {
                let ordinal = self.existing_collector(&field.form)?;
                self.finalize(ordinal, SubmissionOutcome::Stopped)?;
                self.show(form_response(tree, field), None)
            }

            // ============================================================
            // Navigation
            // ============================================================
            (_, InputOutcome::Stay { error }) => self.show(current.clone(), Some(&error)),
            (_, InputOutcome::Advance(Some(next))) => self.show(next, None),
            (_, InputOutcome::Back) => self.back(screen),
            (
                _,
                InputOutcome::Advance(None)
                | InputOutcome::Answered(_)
                | InputOutcome::Continue
                | InputOutcome::Stop,
            ) => {
                tracing::warn!(position = %current, "Screen has no successor configured");
                self.show(Position::session_ended(), None)
            }
        }
    }

    fn redirect(
        mut self,
        target: ScreenId,
        raw: &str,
    ) -> Result<TransitionResult, TransitionError> {
        self.record_response(raw);
        tracing::debug!(screen = %target, "Redirected by pre-transition hook");
        let position = self.ctx.tree.enter(target);
        self.show(position, None)
    }

    /// Advance past an answered field, finalizing when it was the form's last
    fn after_field(
        mut self,
        field: &Field,
        ordinal: u32,
    ) -> Result<TransitionResult, TransitionError> {
        let tree = self.ctx.tree;
        let following = tree.next_field(field);
        if following.is_none() {
            self.finalize(ordinal, SubmissionOutcome::Completed)?;
        }
        match field.next.or(following) {
            Some(next) => self.show(tree.enter(next), None),
            None => self.show(form_response(tree, field), None),
        }
    }

    fn back(mut self, screen: Screen<'_>) -> Result<TransitionResult, TransitionError> {
        let on_root =
            matches!(screen, Screen::Menu { node, .. } if node.id == self.ctx.tree.root());
        if on_root || self.state.history.len() <= 1 {
            tracing::debug!("Back requested on the root screen");
            let text = screen.render(self.ctx.tree, Some(INVALID_MENU_OPTION));
            return Ok(self.finish(Reply::new(text, false)));
        }

        self.state.history.pop();
        self.effects.push(Effect::PopHistory);

        let previous = self
            .state
            .history
            .last()
            .map(|entry| (entry.position.clone(), entry.text.clone()));
        let Some((position, text)) = previous else {
            let root = self.ctx.tree.enter(self.ctx.tree.root());
            return self.show(root, None);
        };

        // Replay the stored text: it may carry an error line a fresh render would lose
        let terminal = self
            .ctx
            .tree
            .resolve(&position)
            .is_some_and(|screen| screen.is_terminal());
        if terminal {
            self.complete_session()?;
        }
        Ok(self.finish(Reply::new(text, terminal)))
    }

    /// Render `position`, record it in history and end the session if it is terminal
    fn show(
        mut self,
        position: Position,
        error: Option<&str>,
    ) -> Result<TransitionResult, TransitionError> {
        let tree = self.ctx.tree;
        let rendered = tree
            .resolve(&position)
            .map(|screen| (screen.render(tree, error), screen.is_terminal()));
        let (position, text, terminal) = match rendered {
            Some((text, terminal)) => (position, text, terminal),
            None => {
                tracing::warn!(position = %position, "Screen does not resolve, ending session");
                (Position::session_ended(), SESSION_ENDED.to_string(), true)
            }
        };

        self.append(position, text.clone());
        if terminal {
            self.complete_session()?;
        }
        Ok(self.finish(Reply::new(text, terminal)))
    }

    fn finish(self, reply: Reply) -> TransitionResult {
        TransitionResult {
            new_state: self.state,
            effects: self.effects,
            reply,
        }
    }

    // ============================================================
    // History
    // ============================================================

    fn append(&mut self, position: Position, text: String) {
        let entry = HistoryEntry {
            position,
            text,
            response: None,
            created_at: self.at,
        };
        self.state.history.push(entry.clone());
        self.effects.push(Effect::AppendHistory { entry });
    }

    fn record_response(&mut self, raw: &str) {
        if let Some(entry) = self.state.history.last_mut() {
            entry.response = Some(raw.to_string());
            self.effects.push(Effect::RecordResponse {
                raw: raw.to_string(),
            });
        }
    }

    // ============================================================
    // Submissions
    // ============================================================

    /// Ordinal of the open collector for `form`, opening one if needed
    fn collector_for(&mut self, form: &str) -> u32 {
        if let Some(open) = self.state.open_submission(form) {
            return open.ordinal;
        }
        let ordinal = self
            .state
            .submissions
            .iter()
            .map(|s| s.ordinal + 1)
            .max()
            .unwrap_or(0);
        self.state.submissions.push(Submission::new(ordinal, form));
        self.effects.push(Effect::OpenSubmission {
            ordinal,
            form: form.to_string(),
        });
        ordinal
    }

    fn existing_collector(&self, form: &str) -> Result<u32, TransitionError> {
        self.state
            .open_submission(form)
            .map(|s| s.ordinal)
            .ok_or_else(|| {
                tracing::error!(form = %form, "Skip prompt reached without an open submission");
                TransitionError::MissingCollector {
                    form: form.to_string(),
                }
            })
    }

    fn upsert(&mut self, ordinal: u32, id: ScreenId, field: &Field, value: FieldValue) {
        let value = SubmissionValue {
            field: id,
            name: field.rules.name.clone(),
            value,
        };
        if let Some(submission) = self.state.submission_mut(ordinal) {
            submission.upsert(value.clone());
        }
        self.effects.push(Effect::UpsertValue { ordinal, value });
    }

    fn finalize(
        &mut self,
        ordinal: u32,
        outcome: SubmissionOutcome,
    ) -> Result<(), TransitionError> {
        let transaction_id = self.state.session.transaction_id.clone();
        let msisdn = self.state.session.msisdn.clone();

        let submission = self
            .state
            .submission_mut(ordinal)
            .ok_or(TransitionError::UnknownSubmission { ordinal })?;
        if submission.outcome.is_some() {
            tracing::error!(form = %submission.form, ordinal, "Submission finalized twice");
            return Err(TransitionError::AlreadyFinalized {
                form: submission.form.clone(),
                ordinal,
            });
        }
        submission.outcome = Some(outcome);
        submission.has_errors = outcome == SubmissionOutcome::Abandoned;

        let notification = Notification::SubmissionFinalized {
            transaction_id,
            msisdn,
            form: submission.form.clone(),
            ordinal,
            outcome,
            values: submission.values.clone(),
        };
        self.effects
            .push(Effect::FinalizeSubmission { ordinal, outcome });
        self.effects.push(Effect::Notify(notification));
        Ok(())
    }

    /// Close every open collector and mark the session complete
    fn complete_session(&mut self) -> Result<(), TransitionError> {
        let tree = self.ctx.tree;
        let open: Vec<(u32, bool)> = self
            .state
            .submissions
            .iter()
            .filter(|s| s.is_open())
            .map(|s| (s.ordinal, s.is_exhaustive(tree)))
            .collect();
        for (ordinal, exhaustive) in open {
            let outcome = if exhaustive {
                SubmissionOutcome::Completed
            } else {
                SubmissionOutcome::Abandoned
            };
            self.finalize(ordinal, outcome)?;
        }

        self.state.session.completed = true;
        self.effects.push(Effect::CompleteSession);
        self.effects
            .push(Effect::Notify(Notification::SessionCompleted {
                transaction_id: self.state.session.transaction_id.clone(),
                msisdn: self.state.session.msisdn.clone(),
            }));
        Ok(())
    }
}

/// Terminal stub carrying the form's closing text
fn form_response(tree: &ScreenTree, field: &Field) -> Position {
    let text = tree
        .form(&field.form)
        .map_or(SESSION_ENDED, |form| form.response.as_str());
    Position::terminal_stub(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::TypedFieldCleaner;
    use crate::runtime::testing::{run_inputs, sample_tree, test_session};
    use crate::screen::MenuDocument;

    const ROOT_TEXT: &str =
        "Welcome to Farm Market\n1. Fruits\n2. Vegetables\n3. MEAT\n4. Register\n5. About";

    fn step(tree: &ScreenTree, state: &SessionState, raw: &str) -> TransitionResult {
        let ctx = NavContext::new(tree, &TypedFieldCleaner);
        transition(&ctx, state, Event::input(raw, Utc::now())).unwrap()
    }

    #[test]
    fn test_first_request_shows_root() {
        let tree = sample_tree();
        let state = SessionState::new(test_session("t-1"));

        let result = step(&tree, &state, "");

        assert_eq!(result.reply, Reply::new(ROOT_TEXT, false));
        assert_eq!(result.new_state.history.len(), 1);
        assert!(matches!(
            result.effects.as_slice(),
            [Effect::AppendHistory { .. }]
        ));
    }

    #[test]
    fn test_first_request_ignores_input() {
        let tree = sample_tree();
        let state = SessionState::new(test_session("t-1"));

        let result = step(&tree, &state, "3");

        assert_eq!(result.reply.text, ROOT_TEXT);
        assert_eq!(result.new_state.history[0].response, None);
    }

    #[test]
    fn test_vegetables_to_carrots_ends_session() {
        let tree = sample_tree();
        let (state, replies) = run_inputs(&tree, &["", "2", "1", "1"]);

        assert_eq!(replies[0].text, ROOT_TEXT);
        assert_eq!(replies[1], Reply::new("1. Rabbit Food\n#. Back", false));
        assert_eq!(replies[2], Reply::new("1. Carrots\n#. Back", false));
        assert_eq!(replies[3], Reply::session_ended());
        assert!(state.session.completed);
    }

    #[test]
    fn test_input_after_completion_changes_nothing() {
        let tree = sample_tree();
        let (state, _) = run_inputs(&tree, &["", "1"]);
        assert!(state.session.completed);

        let result = step(&tree, &state, "2");

        assert_eq!(result.reply, Reply::session_ended());
        assert!(result.effects.is_empty());
        assert_eq!(result.new_state, state);
    }

    #[test]
    fn test_invalid_choice_stays_with_error_prefix() {
        let tree = sample_tree();
        let (state, replies) = run_inputs(&tree, &["", "3", "apples"]);

        assert_eq!(
            replies[2],
            Reply::new(
                "Invalid Menu Option.\n1. Bacon\n2. Chicken\n3. Turducken\n#. Back",
                false
            )
        );
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history[1].response.as_deref(), Some("apples"));
    }

    #[test]
    fn test_back_replays_stored_text() {
        let tree = sample_tree();
        let (state, replies) = run_inputs(&tree, &["", "3", "9", "2", "#"]);

        // The MEAT entry that is now latest was stored with its error line
        assert_eq!(replies[4].text, replies[2].text);
        assert!(replies[4].text.starts_with(INVALID_MENU_OPTION));
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn test_back_on_root_keeps_history() {
        let tree = sample_tree();
        let (state, replies) = run_inputs(&tree, &["", "#", "#"]);

        let expected = format!("{INVALID_MENU_OPTION}\n{ROOT_TEXT}");
        assert_eq!(replies[1], Reply::new(expected.clone(), false));
        assert_eq!(replies[2], Reply::new(expected, false));
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn test_back_on_root_after_invalid_choice_keeps_prefix() {
        let tree = sample_tree();
        let (state, replies) = run_inputs(&tree, &["", "9", "#", "#"]);

        let expected = format!("{INVALID_MENU_OPTION}\n{ROOT_TEXT}");
        assert_eq!(replies[1].text, expected);
        assert_eq!(replies[2], Reply::new(expected.clone(), false));
        assert_eq!(replies[3], Reply::new(expected, false));
        assert_eq!(state.history.len(), 2);
    }

    #[test]
    fn test_back_on_root_after_redirect_stays_on_root() {
        let tree = sample_tree();
        let (state, _) = run_inputs(&tree, &["", "3"]);
        let ctx = NavContext::new(&tree, &TypedFieldCleaner);
        let home = transition(
            &ctx,
            &state,
            Event::Redirect {
                target: tree.root(),
                raw: "00".to_string(),
                at: Utc::now(),
            },
        )
        .unwrap();

        let result = step(&tree, &home.new_state, "#");

        assert_eq!(
            result.reply.text,
            format!("{INVALID_MENU_OPTION}\n{ROOT_TEXT}")
        );
        assert!(!result.effects.contains(&Effect::PopHistory));
        assert_eq!(result.new_state.history.len(), 3);
    }

    fn two_form_tree() -> ScreenTree {
        MenuDocument::from_json(
            r#"{
                "screens": [
                    {"id": 1, "type": "menu", "title": "Main"},
                    {"id": 2, "parent": 1, "order": 1, "label": "Survey", "type": "menu", "form": "survey"},
                    {"id": 3, "parent": 1, "order": 2, "label": "Order", "type": "menu", "form": "order"},
                    {"id": 4, "parent": 1, "order": 3, "label": "Done", "type": "menu"},
                    {"id": 10, "type": "field", "form": "survey", "name": "fruit",
                     "question": "Favourite fruit?", "position": 1, "next": 1},
                    {"id": 11, "type": "field", "form": "survey", "name": "reason",
                     "question": "Why?", "position": 2},
                    {"id": 20, "type": "field", "form": "order", "name": "item",
                     "question": "What to order?", "position": 1, "next": 1},
                    {"id": 21, "type": "field", "form": "order", "name": "quantity",
                     "kind": "integer", "question": "How many?", "position": 2}
                ],
                "forms": [{"name": "survey"}, {"name": "order"}]
            }"#,
        )
        .unwrap()
        .into_tree(None)
        .unwrap()
    }

    #[test]
    fn test_collectors_per_form_are_independent() {
        let tree = two_form_tree();
        let (state, replies) = run_inputs(&tree, &["", "1", "Mango", "2", "Pizza"]);

        assert_eq!(replies[1].text, "Favourite fruit?");
        assert_eq!(replies[3].text, "What to order?");
        assert_eq!(state.submissions.len(), 2);
        let survey = state.open_submission("survey").unwrap();
        let order = state.open_submission("order").unwrap();
        assert_ne!(survey.ordinal, order.ordinal);
        assert_eq!(
            survey.value(ScreenId(10)),
            Some(&FieldValue::Text("Mango".to_string()))
        );
        assert_eq!(survey.value(ScreenId(20)), None);
        assert_eq!(
            order.value(ScreenId(20)),
            Some(&FieldValue::Text("Pizza".to_string()))
        );
        assert_eq!(order.values.len(), 1);
    }

    #[test]
    fn test_reentering_a_form_reuses_its_open_collector() {
        let tree = two_form_tree();
        let (state, _) = run_inputs(&tree, &["", "1", "Mango", "2", "Pizza", "1", "Guava"]);

        assert_eq!(state.submissions.len(), 2);
        let survey = state.open_submission("survey").unwrap();
        assert_eq!(survey.values.len(), 1);
        assert_eq!(
            survey.value(ScreenId(10)),
            Some(&FieldValue::Text("Guava".to_string()))
        );
        assert_eq!(state.open_submission("order").unwrap().values.len(), 1);
    }

    #[test]
    fn test_session_end_finalizes_every_open_collector() {
        let tree = two_form_tree();
        let (state, _) = run_inputs(&tree, &["", "1", "Mango", "2", "Pizza"]);

        let result = step(&tree, &state, "3");

        assert_eq!(result.reply, Reply::session_ended());
        assert!(result.new_state.session.completed);
        for submission in &result.new_state.submissions {
            assert_eq!(submission.outcome, Some(SubmissionOutcome::Abandoned));
            assert!(submission.has_errors);
        }
        let finalized: Vec<u32> = result
            .effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::FinalizeSubmission { ordinal, .. } => Some(*ordinal),
                _ => None,
            })
            .collect();
        assert_eq!(finalized, vec![0, 1]);
        assert_eq!(result.notifications().count(), 3);
    }

    #[test]
    fn test_question_advances_to_next() {
        let tree = sample_tree();
        let (_, replies) = run_inputs(&tree, &["", "5", "anything"]);

        assert_eq!(replies[1].text, "Fresh produce delivered weekly.\n1. Continue");
        assert_eq!(replies[2].text, ROOT_TEXT);
    }

    #[test]
    fn test_form_completes_and_notifies() {
        let tree = sample_tree();
        let (state, replies) =
            run_inputs(&tree, &["", "4", "Amina", "34", "1", "14/03/1990", "Gulu"]);

        assert_eq!(replies[1].text, "Enter your name");
        assert_eq!(replies[3].text, "Answer the optional questions?\n1. Yes\n2. No");
        assert_eq!(replies[4].text, "Enter your date of birth (DD/MM/YYYY)");
        assert_eq!(replies[6], Reply::new("Thank you for registering.", true));

        let submission = &state.submissions[0];
        assert_eq!(submission.outcome, Some(SubmissionOutcome::Completed));
        assert!(!submission.has_errors);
        assert_eq!(submission.values.len(), 4);
        assert!(state.session.completed);
    }

    #[test]
    fn test_skip_gate_stop_keeps_partial_answers() {
        let tree = sample_tree();
        let (state, replies) = run_inputs(&tree, &["", "4", "Amina", "34", "2"]);

        assert_eq!(replies[4], Reply::new("Thank you for registering.", true));
        let submission = &state.submissions[0];
        assert_eq!(submission.outcome, Some(SubmissionOutcome::Stopped));
        assert_eq!(submission.values.len(), 2);
        assert_eq!(
            submission.value(ScreenId(21)),
            Some(&FieldValue::Integer(34))
        );
    }

    #[test]
    fn test_rejected_answer_reprompts_with_messages() {
        let tree = sample_tree();
        let (state, replies) = run_inputs(&tree, &["", "4", "Amina", "old"]);

        assert_eq!(replies[3].text, "Enter a whole number.\nEnter your age");
        assert_eq!(replies[3].action, Action::Continue);
        // Collector exists but holds only the accepted answer
        assert_eq!(state.submissions.len(), 1);
        assert_eq!(state.submissions[0].values.len(), 1);
    }

    #[test]
    fn test_reanswering_a_field_overwrites() {
        let tree = sample_tree();
        // Back from the skip prompt returns to the age field, answered again
        let (state, replies) = run_inputs(&tree, &["", "4", "Amina", "34", "#", "35"]);

        assert_eq!(replies[4].text, "Enter your age");
        let submission = &state.submissions[0];
        assert_eq!(submission.values.len(), 2);
        assert_eq!(
            submission.value(ScreenId(21)),
            Some(&FieldValue::Integer(35))
        );
    }

    #[test]
    fn test_hash_is_plain_input_on_a_field() {
        let tree = sample_tree();
        let (state, replies) = run_inputs(&tree, &["", "4", "#"]);

        assert!(replies[2].text.starts_with("Ensure this value has at least 2 characters"));
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn test_redirect_jumps_to_target() {
        let tree = sample_tree();
        let (state, _) = run_inputs(&tree, &["", "3"]);
        let ctx = NavContext::new(&tree, &TypedFieldCleaner);

        let result = transition(
            &ctx,
            &state,
            Event::Redirect {
                target: ScreenId(4),
                raw: "00".to_string(),
                at: Utc::now(),
            },
        )
        .unwrap();

        assert_eq!(result.reply.text, "1. Carrots\n#. Back");
        assert_eq!(result.new_state.history[1].response.as_deref(), Some("00"));
    }

    #[test]
    fn test_redirect_to_unknown_screen_ends_gracefully() {
        let tree = sample_tree();
        let (state, _) = run_inputs(&tree, &[""]);
        let ctx = NavContext::new(&tree, &TypedFieldCleaner);

        let result = transition(
            &ctx,
            &state,
            Event::Redirect {
                target: ScreenId(999),
                raw: String::new(),
                at: Utc::now(),
            },
        )
        .unwrap();

        assert_eq!(result.reply, Reply::session_ended());
        assert!(result.new_state.session.completed);
    }

    #[test]
    fn test_unresolvable_position_ends_gracefully() {
        let tree = sample_tree();
        let (mut state, _) = run_inputs(&tree, &[""]);
        state.history[0].position = Position::screen(ScreenId(404));

        let result = step(&tree, &state, "1");

        assert_eq!(result.reply, Reply::session_ended());
    }

    #[test]
    fn test_terminal_screen_abandons_open_submission() {
        let tree = sample_tree();
        let (state, _) = run_inputs(&tree, &["", "4", "Amina"]);
        // Jump out of the form mid-way onto a leaf menu
        let ctx = NavContext::new(&tree, &TypedFieldCleaner);
        let result = transition(
            &ctx,
            &state,
            Event::Redirect {
                target: ScreenId(2),
                raw: String::new(),
                at: Utc::now(),
            },
        )
        .unwrap();

        let submission = &result.new_state.submissions[0];
        assert_eq!(submission.outcome, Some(SubmissionOutcome::Abandoned));
        assert!(submission.has_errors);
        assert_eq!(result.notifications().count(), 2);
    }

    #[test]
    fn test_skip_prompt_without_open_collector_is_fatal() {
        let tree = sample_tree();
        let (mut state, _) = run_inputs(&tree, &["", "4", "Amina", "34"]);
        // A skip prompt whose collector was already closed
        state.submissions[0].outcome = Some(SubmissionOutcome::Completed);

        let ctx = NavContext::new(&tree, &TypedFieldCleaner);
        let err = transition(&ctx, &state, Event::input("2", Utc::now())).unwrap_err();

        assert_eq!(
            err,
            TransitionError::MissingCollector {
                form: "registration".to_string()
            }
        );
    }

    #[test]
    fn test_finalize_twice_errors() {
        let tree = sample_tree();
        let ctx = NavContext::new(&tree, &TypedFieldCleaner);
        let mut state = SessionState::new(test_session("t-1"));
        state.submissions.push(Submission::new(0, "registration"));
        let mut step = Step {
            ctx,
            state,
            effects: Vec::new(),
            at: Utc::now(),
        };

        step.finalize(0, SubmissionOutcome::Completed).unwrap();
        let err = step
            .finalize(0, SubmissionOutcome::Stopped)
            .unwrap_err();

        assert_eq!(
            err,
            TransitionError::AlreadyFinalized {
                form: "registration".to_string(),
                ordinal: 0
            }
        );
    }
}
