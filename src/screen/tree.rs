//! Screen arena and startup validation

use super::{Field, Form, Menu, Position, Screen, ScreenId, ScreenKind, ScreenNode};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Failed to read menu document {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid menu document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("No root menu configured")]
    MissingRoot,
    #[error("Multiple root menus: {0:?}")]
    MultipleRoots(Vec<ScreenId>),
    #[error("Root screen {0} is not a menu")]
    RootNotMenu(ScreenId),
    #[error("Duplicate screen id {0}")]
    DuplicateId(ScreenId),
    #[error("Screen {screen} references unknown screen {target}")]
    DanglingReference { screen: ScreenId, target: ScreenId },
    #[error("Screen {screen} has parent {parent}, which is not a menu")]
    ParentNotMenu { screen: ScreenId, parent: ScreenId },
    #[error("Screen {0} is listed under a menu and needs a positive order")]
    ZeroOrder(ScreenId),
    #[error("Screens {first} and {second} share order {order} under menu {parent}")]
    DuplicateOrder {
        parent: ScreenId,
        order: u16,
        first: ScreenId,
        second: ScreenId,
    },
    #[error("Screen {0} is its own ancestor")]
    Cycle(ScreenId),
    #[error("Screen {screen} references unknown form '{form}'")]
    UnknownForm { screen: ScreenId, form: String },
    #[error("Duplicate form '{0}'")]
    DuplicateForm(String),
    #[error("Form '{form}' has more than one field with {what}")]
    DuplicateField { form: String, what: String },
    #[error("Field {screen} has an invalid pattern: {source}")]
    Pattern {
        screen: ScreenId,
        source: regex::Error,
    },
}

/// Immutable arena of screens shared by every session
#[derive(Debug, Clone)]
pub struct ScreenTree {
    nodes: Vec<ScreenNode>,
    index: HashMap<ScreenId, usize>,
    forms: HashMap<String, Form>,
    root: ScreenId,
}

impl ScreenTree {
    /// Build and validate the arena.
    ///
    /// Menu `children` and form `fields` are derived here from the nodes'
    /// `parent` and `form` references; whatever the caller put in them is
    /// replaced. The root is `root` when given, otherwise the single menu
    /// without a parent.
    pub fn build(
        mut nodes: Vec<ScreenNode>,
        forms: Vec<Form>,
        root: Option<ScreenId>,
    ) -> Result<Self, TreeError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id, i).is_some() {
                return Err(TreeError::DuplicateId(node.id));
            }
        }

        let mut form_map = HashMap::with_capacity(forms.len());
        for mut form in forms {
            form.fields.clear();
            if form_map.contains_key(&form.name) {
                return Err(TreeError::DuplicateForm(form.name));
            }
            form_map.insert(form.name.clone(), form);
        }

        validate_references(&nodes, &index, &form_map)?;

        // Children, grouped by parent
        let mut children: HashMap<ScreenId, Vec<(u16, ScreenId)>> = HashMap::new();
        for node in &nodes {
            let Some(parent) = node.parent else { continue };
            if !matches!(nodes[index[&parent]].kind, ScreenKind::Menu(_)) {
                return Err(TreeError::ParentNotMenu {
                    screen: node.id,
                    parent,
                });
            }
            if node.order == 0 {
                return Err(TreeError::ZeroOrder(node.id));
            }
            children.entry(parent).or_default().push((node.order, node.id));
        }
        for (parent, siblings) in &mut children {
            siblings.sort_unstable();
            if let Some(pair) = siblings.windows(2).find(|w| w[0].0 == w[1].0) {
                return Err(TreeError::DuplicateOrder {
                    parent: *parent,
                    order: pair[0].0,
                    first: pair[0].1,
                    second: pair[1].1,
                });
            }
        }
        for node in &mut nodes {
            if let ScreenKind::Menu(menu) = &mut node.kind {
                menu.children = children
                    .remove(&node.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(_, id)| id)
                    .collect();
            }
        }

        detect_cycles(&nodes, &index)?;

        // Form fields, ordered by position
        let mut fields: HashMap<&str, Vec<(u32, ScreenId, &str)>> = HashMap::new();
        for node in &nodes {
            if let ScreenKind::Field(field) = &node.kind {
                fields
                    .entry(field.form.as_str())
                    .or_default()
                    .push((field.position, node.id, field.rules.name.as_str()));
            }
        }
        for (name, mut entries) in fields {
            entries.sort_unstable();
            if entries.windows(2).any(|w| w[0].0 == w[1].0) {
                return Err(TreeError::DuplicateField {
                    form: name.to_string(),
                    what: "the same position".to_string(),
                });
            }
            let mut names = HashSet::new();
            if let Some((_, _, dup)) = entries.iter().find(|(_, _, n)| !names.insert(*n)) {
                return Err(TreeError::DuplicateField {
                    form: name.to_string(),
                    what: format!("the name '{dup}'"),
                });
            }
            if let Some(form) = form_map.get_mut(name) {
                form.fields = entries.into_iter().map(|(_, id, _)| id).collect();
            }
        }

        let root = resolve_root(&nodes, &index, root)?;

        Ok(Self {
            nodes,
            index,
            forms: form_map,
            root,
        })
    }

    pub fn root(&self) -> ScreenId {
        self.root
    }

    pub fn node(&self, id: ScreenId) -> Option<&ScreenNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn form(&self, name: &str) -> Option<&Form> {
        self.forms.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Children of a menu, in display order
    pub fn children<'a>(&'a self, menu: &'a Menu) -> impl Iterator<Item = &'a ScreenNode> + 'a {
        menu.children.iter().filter_map(|id| self.node(*id))
    }

    pub fn child_by_order<'a>(&'a self, menu: &'a Menu, order: u16) -> Option<&'a ScreenNode> {
        self.children(menu).find(|child| child.order == order)
    }

    /// Chain of parent ids from `id` up to (and including) its topmost ancestor
    #[allow(dead_code)] // Used by tests
    pub fn ancestors(&self, id: ScreenId) -> Vec<ScreenId> {
        let mut chain = Vec::new();
        let mut current = self.node(id).and_then(|n| n.parent);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.node(parent).and_then(|n| n.parent);
        }
        chain
    }

    /// Position reached by entering screen `id`.
    ///
    /// A childless menu bound to a form lands on the form's first field.
    pub fn enter(&self, id: ScreenId) -> Position {
        let Some(node) = self.node(id) else {
            tracing::warn!(screen = %id, "Entered unknown screen");
            return Position::session_ended();
        };
        if let ScreenKind::Menu(Menu {
            children,
            form: Some(form),
            ..
        }) = &node.kind
        {
            if children.is_empty() {
                return match self.form(form).and_then(|f| f.fields.first()) {
                    Some(first) => Position::screen(*first),
                    None => {
                        tracing::warn!(screen = %id, form = %form, "Menu bound to a form without fields");
                        Position::session_ended()
                    }
                };
            }
        }
        Position::screen(id)
    }

    /// Field that follows `field` in its form, by position
    pub fn next_field(&self, field: &Field) -> Option<ScreenId> {
        self.form(&field.form)?
            .fields
            .iter()
            .copied()
            .find(|id| match self.node(*id).map(|n| &n.kind) {
                Some(ScreenKind::Field(other)) => other.position > field.position,
                _ => false,
            })
    }

    /// Resolve a stored position; `None` when it names a screen that no longer exists
    pub fn resolve<'a>(&'a self, position: &'a Position) -> Option<Screen<'a>> {
        match position {
            Position::Screen { id } => {
                let node = self.node(*id)?;
                Some(match &node.kind {
                    ScreenKind::Menu(menu) => Screen::Menu { node, menu },
                    ScreenKind::Question(question) => Screen::Question { node, question },
                    ScreenKind::Field(field) => Screen::Field { node, field },
                })
            }
            Position::SkipPrompt { field } => {
                let node = self.node(*field)?;
                let ScreenKind::Field(f) = &node.kind else {
                    return None;
                };
                let prompt = self.form(&f.form)?.skip_prompt.as_deref()?;
                Some(Screen::SkipPrompt {
                    node,
                    field: f,
                    prompt,
                })
            }
            Position::Stub { text, terminal } => Some(Screen::Stub {
                text,
                terminal: *terminal,
            }),
        }
    }
}

fn validate_references(
    nodes: &[ScreenNode],
    index: &HashMap<ScreenId, usize>,
    forms: &HashMap<String, Form>,
) -> Result<(), TreeError> {
    let check = |screen: ScreenId, target: Option<ScreenId>| match target {
        Some(target) if !index.contains_key(&target) => {
            Err(TreeError::DanglingReference { screen, target })
        }
        _ => Ok(()),
    };
    let check_form = |screen: ScreenId, form: &str| {
        if forms.contains_key(form) {
            Ok(())
        } else {
            Err(TreeError::UnknownForm {
                screen,
                form: form.to_string(),
            })
        }
    };

    for node in nodes {
        check(node.id, node.parent)?;
        match &node.kind {
            ScreenKind::Menu(menu) => {
                if let Some(form) = &menu.form {
                    check_form(node.id, form)?;
                }
            }
            ScreenKind::Question(question) => check(node.id, question.next)?,
            ScreenKind::Field(field) => {
                check(node.id, field.next)?;
                check_form(node.id, &field.form)?;
            }
        }
    }
    Ok(())
}

fn detect_cycles(nodes: &[ScreenNode], index: &HashMap<ScreenId, usize>) -> Result<(), TreeError> {
    for node in nodes {
        let mut current = node.parent;
        let mut steps = 0;
        while let Some(parent) = current {
            if parent == node.id || steps > nodes.len() {
                return Err(TreeError::Cycle(node.id));
            }
            current = nodes[index[&parent]].parent;
            steps += 1;
        }
    }
    Ok(())
}

fn resolve_root(
    nodes: &[ScreenNode],
    index: &HashMap<ScreenId, usize>,
    explicit: Option<ScreenId>,
) -> Result<ScreenId, TreeError> {
    let root = if let Some(id) = explicit {
        let Some(&i) = index.get(&id) else {
            return Err(TreeError::MissingRoot);
        };
        if !matches!(nodes[i].kind, ScreenKind::Menu(_)) {
            return Err(TreeError::RootNotMenu(id));
        }
        id
    } else {
        let candidates: Vec<ScreenId> = nodes
            .iter()
            .filter(|n| n.parent.is_none() && matches!(n.kind, ScreenKind::Menu(_)))
            .map(|n| n.id)
            .collect();
        match candidates.as_slice() {
            [] => return Err(TreeError::MissingRoot),
            [only] => *only,
            _ => return Err(TreeError::MultipleRoots(candidates)),
        }
    };
    Ok(root)
}
