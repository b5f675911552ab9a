//! Menu content document
//!
//! The screen tree is authored as JSON and validated into a [`ScreenTree`]
//! once at startup.

use super::tree::{ScreenTree, TreeError};
use super::{Field, Form, Menu, Question, ScreenId, ScreenKind, ScreenNode, SESSION_ENDED};
use crate::cleaner::{FieldKind, FieldRules};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct MenuDocument {
    /// Explicit root; otherwise the single menu without a parent
    pub root: Option<ScreenId>,
    pub screens: Vec<ScreenSpec>,
    #[serde(default)]
    pub forms: Vec<FormSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenSpec {
    pub id: ScreenId,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub order: u16,
    pub parent: Option<ScreenId>,
    #[serde(flatten)]
    pub kind: ScreenKindSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScreenKindSpec {
    Menu {
        title: Option<String>,
        form: Option<String>,
    },
    Question {
        text: String,
        next: Option<ScreenId>,
    },
    Field {
        form: String,
        name: String,
        #[serde(default)]
        kind: FieldKind,
        question: String,
        position: u32,
        next: Option<ScreenId>,
        #[serde(default)]
        skip_gate: bool,
        pattern: Option<String>,
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormSpec {
    pub name: String,
    pub skip_prompt: Option<String>,
    /// Closing text shown when the form is submitted
    pub response: Option<String>,
}

impl MenuDocument {
    pub fn from_json(json: &str) -> Result<Self, TreeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TreeError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| TreeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Validate into a tree. `root_override` wins over the document's `root`.
    pub fn into_tree(self, root_override: Option<ScreenId>) -> Result<ScreenTree, TreeError> {
        let root = root_override.or(self.root);

        let nodes = self
            .screens
            .into_iter()
            .map(ScreenSpec::into_node)
            .collect::<Result<Vec<_>, _>>()?;

        let forms = self
            .forms
            .into_iter()
            .map(|spec| Form {
                name: spec.name,
                fields: Vec::new(),
                skip_prompt: spec.skip_prompt,
                response: spec.response.unwrap_or_else(|| SESSION_ENDED.to_string()),
            })
            .collect();

        ScreenTree::build(nodes, forms, root)
    }
}

impl ScreenSpec {
    fn into_node(self) -> Result<ScreenNode, TreeError> {
        let kind = match self.kind {
            ScreenKindSpec::Menu { title, form } => ScreenKind::Menu(Menu {
                title,
                children: Vec::new(),
                form,
            }),
            ScreenKindSpec::Question { text, next } => ScreenKind::Question(Question { text, next }),
            ScreenKindSpec::Field {
                form,
                name,
                kind,
                question,
                position,
                next,
                skip_gate,
                pattern,
                min_length,
                max_length,
            } => {
                let pattern = pattern
                    .map(|p| Regex::new(&p))
                    .transpose()
                    .map_err(|source| TreeError::Pattern {
                        screen: self.id,
                        source,
                    })?;
                ScreenKind::Field(Field {
                    form,
                    rules: FieldRules {
                        name,
                        kind,
                        min_length,
                        max_length,
                        pattern,
                    },
                    question,
                    position,
                    next,
                    skip_gate,
                })
            }
        };

        Ok(ScreenNode {
            id: self.id,
            label: self.label,
            order: self.order,
            parent: self.parent,
            kind,
        })
    }
}
