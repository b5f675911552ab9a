//! Screen tree
//!
//! Menus, questions and data-collecting fields live in an arena
//! ([`ScreenTree`]) indexed by [`ScreenId`]. A session's position is a
//! [`Position`], which resolves against the tree into a [`Screen`]: the
//! closed set of things that can be rendered and can accept input.

mod document;
mod tree;

pub use document::MenuDocument;
pub use tree::ScreenTree;

use crate::cleaner::{FieldCleaner, FieldRules, FieldValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal input that navigates backwards
pub const BACK_TOKEN: &str = "#";
/// Error line shown above a screen when its input was not understood
pub const INVALID_MENU_OPTION: &str = "Invalid Menu Option.";
/// Text of the generic terminal screen
pub const SESSION_ENDED: &str = "Your session has ended. Thank you.";

const BACK_LINE: &str = "#. Back";
const SKIP_CONTINUE: u16 = 1;
const SKIP_STOP: u16 = 2;

/// Stable identifier of a screen in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenId(pub u32);

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One arena record
#[derive(Debug, Clone)]
pub struct ScreenNode {
    pub id: ScreenId,
    /// Text used when this screen is listed as a menu option
    pub label: String,
    /// Position among its siblings, unique and positive under a parent
    pub order: u16,
    pub parent: Option<ScreenId>,
    pub kind: ScreenKind,
}

#[derive(Debug, Clone)]
pub enum ScreenKind {
    Menu(Menu),
    Question(Question),
    Field(Field),
}

#[derive(Debug, Clone, Default)]
pub struct Menu {
    pub title: Option<String>,
    /// Child ids sorted by their `order`
    pub children: Vec<ScreenId>,
    /// A childless menu bound to a form routes into the form's first field
    pub form: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Question {
    pub text: String,
    pub next: Option<ScreenId>,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub form: String,
    pub rules: FieldRules,
    pub question: String,
    /// Ordering within the owning form
    pub position: u32,
    pub next: Option<ScreenId>,
    /// Ask whether to continue with the optional fields after this one
    pub skip_gate: bool,
}

/// A structured form whose fields are spread over [`Field`] screens
#[derive(Debug, Clone)]
pub struct Form {
    pub name: String,
    /// Field screen ids sorted by position
    pub fields: Vec<ScreenId>,
    pub skip_prompt: Option<String>,
    /// Text shown once the form is finished
    pub response: String,
}

/// Where a session currently is. Persisted with every history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Position {
    Screen { id: ScreenId },
    /// Synthetic "do you want to continue?" prompt after a skip-gate field
    SkipPrompt { field: ScreenId },
    /// Transient screen carrying literal text, never tied to a tree node
    Stub { text: String, terminal: bool },
}

impl Position {
    pub fn screen(id: ScreenId) -> Self {
        Position::Screen { id }
    }

    /// Generic terminal screen used when content is misconfigured
    pub fn session_ended() -> Self {
        Position::Stub {
            text: SESSION_ENDED.to_string(),
            terminal: true,
        }
    }

    pub fn terminal_stub(text: impl Into<String>) -> Self {
        Position::Stub {
            text: text.into(),
            terminal: true,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Screen { id } => write!(f, "screen:{id}"),
            Position::SkipPrompt { field } => write!(f, "skip:{field}"),
            Position::Stub { .. } => write!(f, "stub"),
        }
    }
}

/// A position resolved against the tree
#[derive(Debug, Clone, Copy)]
pub enum Screen<'t> {
    Menu {
        node: &'t ScreenNode,
        menu: &'t Menu,
    },
    Question {
        node: &'t ScreenNode,
        question: &'t Question,
    },
    Field {
        node: &'t ScreenNode,
        field: &'t Field,
    },
    SkipPrompt {
        node: &'t ScreenNode,
        field: &'t Field,
        prompt: &'t str,
    },
    Stub {
        text: &'t str,
        terminal: bool,
    },
}

/// What a screen made of one raw input
#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
    /// Move on; `None` when the screen has no successor configured
    Advance(Option<Position>),
    /// A field answer passed cleaning
    Answered(FieldValue),
    /// Skip prompt: carry on with the optional fields
    Continue,
    /// Skip prompt: stop and submit what has been collected
    Stop,
    /// Input rejected; stay here and show the error
    Stay { error: String },
    Back,
}

impl<'t> Screen<'t> {
    pub fn is_terminal(&self) -> bool {
        match self {
            Screen::Menu { menu, .. } => menu.children.is_empty(),
            Screen::Question { question, .. } => question.next.is_none(),
            Screen::Field { .. } | Screen::SkipPrompt { .. } => false,
            Screen::Stub { terminal, .. } => *terminal,
        }
    }

    /// Text shown to the subscriber, with `error` on its own line above it
    pub fn render(&self, tree: &ScreenTree, error: Option<&str>) -> String {
        let mut lines: Vec<String> = error.map(str::to_string).into_iter().collect();

        match self {
            Screen::Menu { node, menu } => {
                if menu.children.is_empty() {
                    return SESSION_ENDED.to_string();
                }
                lines.extend(menu.title.clone());
                lines.extend(
                    tree.children(menu)
                        .map(|child| format!("{}. {}", child.order, child.label)),
                );
                if node.parent.is_some() {
                    lines.push(BACK_LINE.to_string());
                }
            }
            Screen::Question { question, .. } => lines.push(question.text.clone()),
            Screen::Field { field, .. } => lines.push(field.question.clone()),
            Screen::SkipPrompt { prompt, .. } => {
                lines.push((*prompt).to_string());
                lines.push(format!("{SKIP_CONTINUE}. Yes"));
                lines.push(format!("{SKIP_STOP}. No"));
            }
            Screen::Stub { text, .. } => lines.push((*text).to_string()),
        }

        lines.join("\n")
    }

    /// Interpret one raw input. Never touches session state.
    pub fn accept_input(
        &self,
        tree: &ScreenTree,
        raw: &str,
        cleaner: &dyn FieldCleaner,
    ) -> InputOutcome {
        match self {
            Screen::Menu { menu, .. } => {
                if is_back(raw) {
                    return InputOutcome::Back;
                }
                parse_choice(raw)
                    .and_then(|order| tree.child_by_order(menu, order))
                    .map_or_else(invalid_option, |child| {
                        InputOutcome::Advance(Some(tree.enter(child.id)))
                    })
            }
            Screen::Question { question, .. } => {
                InputOutcome::Advance(question.next.map(|next| tree.enter(next)))
            }
            Screen::Field { field, .. } => match cleaner.clean(raw, &field.rules) {
                Ok(value) => InputOutcome::Answered(value),
                Err(e) => InputOutcome::Stay { error: e.joined() },
            },
            Screen::SkipPrompt { .. } => {
                if is_back(raw) {
                    return InputOutcome::Back;
                }
                match parse_choice(raw) {
                    Some(SKIP_CONTINUE) => InputOutcome::Continue,
                    Some(SKIP_STOP) => InputOutcome::Stop,
                    _ => invalid_option(),
                }
            }
            // A live stub only relays the subscriber back to where they were
            Screen::Stub { .. } => InputOutcome::Back,
        }
    }
}

fn invalid_option() -> InputOutcome {
    InputOutcome::Stay {
        error: INVALID_MENU_OPTION.to_string(),
    }
}

fn is_back(raw: &str) -> bool {
    raw.trim() == BACK_TOKEN
}

/// Strict menu choice: ASCII digits only, no sign, no trailing text
pub fn parse_choice(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
