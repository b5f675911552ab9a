//! Property-based tests for the state machine
//!
//! These tests verify navigation invariants hold across generated trees
//! and input sequences.

use super::state::*;
use super::transition::*;
use super::*;
use crate::cleaner::TypedFieldCleaner;
use crate::runtime::testing::{sample_tree, test_session};
use crate::screen::{
    Menu, Position, ScreenId, ScreenKind, ScreenNode, ScreenTree, INVALID_MENU_OPTION,
};
use chrono::Utc;
use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::{HashMap, HashSet};

// ============================================================================
// Test Helpers
// ============================================================================

fn feed(tree: &ScreenTree, state: &SessionState, raw: &str) -> TransitionResult {
    let ctx = NavContext::new(tree, &TypedFieldCleaner);
    transition(&ctx, state, Event::input(raw, Utc::now())).expect("transition failed")
}

fn started(tree: &ScreenTree) -> (SessionState, Reply) {
    let result = feed(tree, &SessionState::new(test_session("prop")), "");
    (result.new_state, result.reply)
}

fn menu_node(id: u32, parent: Option<u32>, order: u16) -> ScreenNode {
    ScreenNode {
        id: ScreenId(id),
        label: format!("Screen {id}"),
        order,
        parent: parent.map(ScreenId),
        kind: ScreenKind::Menu(Menu::default()),
    }
}

fn is_leaf(tree: &ScreenTree, id: ScreenId) -> bool {
    matches!(
        tree.node(id).map(|n| &n.kind),
        Some(ScreenKind::Menu(menu)) if menu.children.is_empty()
    )
}

/// Follow `choices` down from the root, returning (screen, order) per step
fn walk(tree: &ScreenTree, choices: &[Index]) -> Vec<(ScreenId, u16)> {
    let mut path = Vec::new();
    let mut current = tree.root();
    for choice in choices {
        let Some(ScreenKind::Menu(menu)) = tree.node(current).map(|n| &n.kind) else {
            break;
        };
        if menu.children.is_empty() {
            break;
        }
        let child = menu.children[choice.index(menu.children.len())];
        let order = tree.node(child).map_or(0, |n| n.order);
        path.push((child, order));
        current = child;
    }
    path
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// Menus only; node `i` hangs under some earlier node so the tree is acyclic
fn arb_tree() -> impl Strategy<Value = ScreenTree> {
    proptest::collection::vec(any::<Index>(), 0..30).prop_map(|parents| {
        let mut next_order: HashMap<u32, u16> = HashMap::new();
        let mut nodes = vec![menu_node(0, None, 0)];
        for (i, parent) in parents.iter().enumerate() {
            let id = u32::try_from(i + 1).unwrap();
            let parent = u32::try_from(parent.index(i + 1)).unwrap();
            let order = next_order.entry(parent).or_insert(0);
            *order += 1;
            nodes.push(menu_node(id, Some(parent), *order));
        }
        ScreenTree::build(nodes, vec![], Some(ScreenId(0))).unwrap()
    })
}

fn arb_input() -> impl Strategy<Value = String> {
    prop_oneof![
        (1u16..7).prop_map(|n| n.to_string()),
        Just("#".to_string()),
        Just(String::new()),
        Just("apples".to_string()),
        Just("Amina".to_string()),
        Just("34".to_string()),
        Just("14/03/1990".to_string()),
    ]
}

fn arb_garbage() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z ]{1,8}",
        Just("0".to_string()),
        (6u16..100).prop_map(|n| n.to_string()),
        "-[1-5]",
        "[1-5][a-z]",
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Navigating D valid choices lands on the node whose ancestor chain is the path
    #[test]
    fn prop_choices_reach_matching_ancestor_chain(
        tree in arb_tree(),
        choices in proptest::collection::vec(any::<Index>(), 0..8),
    ) {
        let path = walk(&tree, &choices);
        let (mut state, mut reply) = started(&tree);

        for (_, order) in &path {
            let result = feed(&tree, &state, &order.to_string());
            state = result.new_state;
            reply = result.reply;
        }

        let reached = path.last().map_or(tree.root(), |(id, _)| *id);
        prop_assert_eq!(state.current(), Some(&Position::screen(reached)));
        prop_assert_eq!(state.history.len(), path.len() + 1);

        if !path.is_empty() {
            let mut expected: Vec<ScreenId> =
                path.iter().rev().skip(1).map(|(id, _)| *id).collect();
            expected.push(tree.root());
            prop_assert_eq!(tree.ancestors(reached), expected);
        }

        // Terminal action mapping
        prop_assert_eq!(reply.action == Action::End, is_leaf(&tree, reached));
        prop_assert_eq!(state.session.completed, is_leaf(&tree, reached));
    }

    // Back from the root never pops past the first entry
    #[test]
    fn prop_back_on_root_is_idempotent(n in 1usize..10) {
        let tree = sample_tree();
        let (mut state, root) = started(&tree);
        let expected = format!("{INVALID_MENU_OPTION}\n{}", root.text);

        for _ in 0..n {
            let result = feed(&tree, &state, "#");
            prop_assert_eq!(&result.reply.text, &expected);
            prop_assert_eq!(result.reply.action, Action::Continue);
            state = result.new_state;
            prop_assert_eq!(state.history.len(), 1);
        }
    }

    // Back then the same choice shows the same text again
    #[test]
    fn prop_back_then_forward_is_symmetric(
        tree in arb_tree(),
        choices in proptest::collection::vec(any::<Index>(), 1..8),
    ) {
        let path: Vec<_> = walk(&tree, &choices)
            .into_iter()
            .take_while(|(id, _)| !is_leaf(&tree, *id))
            .collect();
        prop_assume!(!path.is_empty());

        let (mut state, mut parent_text) = started(&tree);
        let mut shown = parent_text.clone();
        for (_, order) in &path {
            parent_text = shown;
            let result = feed(&tree, &state, &order.to_string());
            state = result.new_state;
            shown = result.reply;
        }
        let (_, last_order) = path[path.len() - 1];

        let back = feed(&tree, &state, "#");
        prop_assert_eq!(&back.reply, &parent_text);

        let forward = feed(&tree, &back.new_state, &last_order.to_string());
        prop_assert_eq!(&forward.reply, &shown);
        prop_assert_eq!(forward.new_state.history.len(), state.history.len());
    }

    // Non-numeric or out-of-range input is never truncated into a choice
    #[test]
    fn prop_garbage_never_advances(raw in arb_garbage()) {
        let tree = sample_tree();
        let (state, root) = started(&tree);

        let result = feed(&tree, &state, &raw);

        prop_assert_eq!(
            result.reply.text,
            format!("{INVALID_MENU_OPTION}\n{}", root.text)
        );
        prop_assert_eq!(result.reply.action, Action::Continue);
        prop_assert_eq!(result.new_state.current(), state.current());
    }

    // Arbitrary sessions keep history and submissions consistent
    #[test]
    fn prop_random_sessions_stay_consistent(
        inputs in proptest::collection::vec(arb_input(), 0..25),
    ) {
        let tree = sample_tree();
        let (mut state, _) = started(&tree);

        for raw in inputs {
            let before = state.clone();
            let result = feed(&tree, &state, &raw);

            if before.session.completed {
                prop_assert!(result.effects.is_empty());
                prop_assert_eq!(&result.new_state, &before);
            }

            let delta = result.new_state.history.len().abs_diff(before.history.len());
            prop_assert!(delta <= 1);
            prop_assert!(!result.new_state.history.is_empty());
            prop_assert_eq!(
                result.reply.action == Action::End,
                result.new_state.session.completed
            );

            // Finalized outcomes never change
            for old in before.submissions.iter().filter(|s| !s.is_open()) {
                let new = result
                    .new_state
                    .submissions
                    .iter()
                    .find(|s| s.ordinal == old.ordinal);
                prop_assert_eq!(new.map(|s| s.outcome), Some(old.outcome));
            }

            let mut open_forms = HashSet::new();
            for submission in &result.new_state.submissions {
                let fields: HashSet<_> = submission.values.iter().map(|v| v.field).collect();
                prop_assert_eq!(fields.len(), submission.values.len());
                if submission.is_open() {
                    prop_assert!(open_forms.insert(submission.form.clone()));
                }
            }
            if result.new_state.session.completed {
                prop_assert!(result.new_state.submissions.iter().all(|s| !s.is_open()));
            }

            state = result.new_state;
        }
    }
}
