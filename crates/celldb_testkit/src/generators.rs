//! Property-based test generators using proptest.
//!
//! Provides strategies for names and for random edit sequences that can
//! be replayed against a live cell.

use crate::fixtures::TestTech;
use celldb_core::id::NodeProtoId;
use celldb_core::{
    ArcSpec, CellId, CoreError, CoreResult, DatabaseThread, GridPoint, NodeRef, NodeSpec,
    OwnerToken, VarKey, VarValue, Variable,
};
use proptest::prelude::*;

/// Strategy for generating valid library names.
pub fn lib_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating cell names in `name;version{view}` text form.
pub fn cell_name_strategy() -> impl Strategy<Value = String> {
    (
        prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_-]{0,11}").expect("Invalid regex"),
        prop::option::of(1u32..20),
        prop::option::of(prop::sample::select(vec!["sch", "ic", "lay", "net.als"])),
    )
        .prop_map(|(name, version, view)| {
            let mut text = name;
            if let Some(v) = version {
                text.push_str(&format!(";{v}"));
            }
            if let Some(view) = view {
                text.push_str(&format!("{{{view}}}"));
            }
            text
        })
}

/// Strategy for generating object names that mix letters and digit runs.
pub fn natural_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,4}[0-9]{0,3}(@[0-9]{1,3})?").expect("Invalid regex")
}

/// One random edit of a live cell.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// Place a pin.
    AddPin {
        /// X coordinate.
        x: i64,
        /// Y coordinate.
        y: i64,
    },
    /// Move the `index`-th node (modulo the node count).
    MoveNode {
        /// Node selector.
        index: usize,
        /// New X coordinate.
        x: i64,
        /// New Y coordinate.
        y: i64,
    },
    /// Kill the `index`-th node (modulo the node count).
    KillNode {
        /// Node selector.
        index: usize,
    },
    /// Wire two nodes (modulo the node count).
    Connect {
        /// Tail selector.
        tail: usize,
        /// Head selector.
        head: usize,
    },
    /// Attach an integer variable to the cell.
    SetVariable {
        /// Variable value.
        value: i32,
    },
}

/// Strategy for a single edit.
pub fn edit_op_strategy() -> impl Strategy<Value = EditOp> {
    let coord = -1000i64..1000;
    prop_oneof![
        3 => (coord.clone(), coord.clone()).prop_map(|(x, y)| EditOp::AddPin { x, y }),
        2 => (any::<usize>(), coord.clone(), coord)
            .prop_map(|(index, x, y)| EditOp::MoveNode { index, x, y }),
        1 => any::<usize>().prop_map(|index| EditOp::KillNode { index }),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(tail, head)| EditOp::Connect { tail, head }),
        1 => any::<i32>().prop_map(|value| EditOp::SetVariable { value }),
    ]
}

/// Strategy for a sequence of edit rounds, each a short list of edits.
pub fn edit_rounds_strategy(rounds: usize) -> impl Strategy<Value = Vec<Vec<EditOp>>> {
    prop::collection::vec(prop::collection::vec(edit_op_strategy(), 1..6), 1..=rounds)
}

/// Applies `op` to `cell`. Edits that select a node in an empty cell are
/// skipped.
pub fn apply_edit(
    db: &mut DatabaseThread,
    token: &OwnerToken,
    tech: &TestTech,
    cell: CellId,
    op: &EditOp,
) -> CoreResult<()> {
    let nodes = db.nodes(cell)?;
    let pick = |i: usize| {
        let node = &nodes[i % nodes.len()];
        NodeRef {
            cell,
            node_id: node.node_id(),
        }
    };
    match *op {
        EditOp::AddPin { x, y } => {
            db.new_node(token, cell, NodeSpec::new(NodeProtoId::Primitive(tech.pin)).at(x, y))?;
        }
        EditOp::MoveNode { index, x, y } if !nodes.is_empty() => {
            db.modify_node(token, pick(index), |n| Ok(n.with_anchor(GridPoint::new(x, y))))?;
        }
        EditOp::KillNode { index } if !nodes.is_empty() => {
            db.kill_node(token, pick(index))?;
        }
        EditOp::Connect { tail, head } if !nodes.is_empty() => {
            let (tail, head) = (pick(tail), pick(head));
            let ends = [tail, head].map(|n| {
                nodes
                    .iter()
                    .find(|m| m.node_id() == n.node_id)
                    .map(|m| m.proto())
            });
            if ends.iter().all(|p| *p == Some(NodeProtoId::Primitive(tech.pin))) {
                db.new_arc(
                    token,
                    cell,
                    ArcSpec::new(tech.wire, (tail.node_id, tech.pin_port), (head.node_id, tech.pin_port)),
                )?;
            }
        }
        EditOp::SetVariable { value } => {
            let key = VarKey::new("ATTR_seed")
                .map_err(|e| CoreError::invariant(e.to_string()))?;
            db.set_cell_variable(token, cell, Variable::new(key, VarValue::Int(value)))?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use celldb_core::CellName;

    proptest! {
        #[test]
        fn generated_cell_names_parse(text in cell_name_strategy()) {
            let name = CellName::parse(&text).unwrap();
            prop_assert_eq!(name.to_string(), text);
        }

        #[test]
        fn generated_lib_names_are_accepted(name in lib_name_strategy()) {
            let ids = celldb_core::IdManager::new();
            prop_assert!(ids.new_lib_id(&name).is_ok());
        }
    }
}
