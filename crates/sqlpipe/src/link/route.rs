//! Deciding which side of a join a reference belongs to.

use crate::errors::{CompileError, Result};
use crate::tree::{NodeId, SqlNode, SqlTree};
use crate::types::{BoxType, FieldType, RowType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

/// Route a demanded reference to one side of a join. The type layer has
/// already established non-ambiguity, so exactly one side matches.
pub(crate) fn route(
    tree: &SqlTree,
    left: &BoxType,
    right: &BoxType,
    reference: NodeId,
) -> Result<Side> {
    match tree.node(reference) {
        SqlNode::HandleBound(bound) => {
            if left.handle_map.contains_key(&bound.handle) {
                Ok(Side::Left)
            } else {
                Ok(Side::Right)
            }
        }
        _ => route_row(tree, Some(&left.row), Some(&right.row), reference),
    }
}

fn route_row(
    tree: &SqlTree,
    left: Option<&RowType>,
    right: Option<&RowType>,
    reference: NodeId,
) -> Result<Side> {
    match tree.node(reference) {
        SqlNode::NameBound(bound) => {
            let left_inner = nested_row(left, &bound.name);
            let right_inner = nested_row(right, &bound.name);
            match (left_inner, right_inner) {
                (Some(_), None) => Ok(Side::Left),
                (None, Some(_)) => Ok(Side::Right),
                (Some(l), Some(r)) => route_row(tree, Some(l), Some(r), bound.over),
                (None, None) => Err(CompileError::internal(format!(
                    "reference through `{}` matches neither join side",
                    bound.name
                ))),
            }
        }
        SqlNode::Get(get) => {
            let on_left = left.is_some_and(|row| row.fields.contains_key(&get.name));
            if on_left {
                Ok(Side::Left)
            } else {
                Ok(Side::Right)
            }
        }
        SqlNode::Agg(_) => {
            let on_left = left.is_some_and(|row| row.group.is_row());
            if on_left {
                Ok(Side::Left)
            } else {
                Ok(Side::Right)
            }
        }
        other => Err(CompileError::internal(format!(
            "cannot route a {} reference",
            other.kind_name()
        ))),
    }
}

fn nested_row<'a>(row: Option<&'a RowType>, name: &str) -> Option<&'a RowType> {
    match row?.fields.get(name) {
        Some(FieldType::Row(inner)) => Some(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableSchema;
    use crate::tree::GetNode;
    use crate::types::{GroupType, HandleType};

    fn table(name: &str, columns: &[&str]) -> BoxType {
        BoxType::of_table(&TableSchema::new(name, columns.iter().copied()))
    }

    #[test]
    fn plain_names_prefer_the_side_that_has_them() {
        let mut tree = SqlTree::new();
        let x = tree.push(SqlNode::Get(GetNode {
            over: None,
            name: "x".to_string(),
        }));
        let y = tree.push(SqlNode::Get(GetNode {
            over: None,
            name: "y".to_string(),
        }));
        let left = table("a", &["k", "x"]);
        let right = table("b", &["k", "y"]);
        assert_eq!(route(&tree, &left, &right, x).unwrap(), Side::Left);
        assert_eq!(route(&tree, &left, &right, y).unwrap(), Side::Right);
    }

    #[test]
    fn qualified_names_route_by_namespace() {
        let mut tree = SqlTree::new();
        let k = tree.push(SqlNode::Get(GetNode {
            over: None,
            name: "k".to_string(),
        }));
        let via_b = tree.push(SqlNode::NameBound(crate::tree::NameBoundNode {
            over: k,
            name: "b".to_string(),
        }));
        let left = table("a", &["k", "x"]);
        let right = table("b", &["k"]);
        assert_eq!(route(&tree, &left, &right, via_b).unwrap(), Side::Right);
    }

    #[test]
    fn handles_route_by_handle_map() {
        let mut tree = SqlTree::new();
        let k = tree.push(SqlNode::Get(GetNode {
            over: None,
            name: "k".to_string(),
        }));
        let bound = tree.push(SqlNode::HandleBound(crate::tree::HandleBoundNode {
            over: k,
            handle: 1,
        }));
        let mut left = table("a", &["k"]);
        left.handle_map
            .insert(1, HandleType::Row(left.row.clone()));
        let right = table("b", &["k"]);
        assert_eq!(route(&tree, &left, &right, bound).unwrap(), Side::Left);
    }

    #[test]
    fn aggregates_route_to_the_grouped_side() {
        let mut tree = SqlTree::new();
        let agg = tree.agg("count", vec![]);
        let mut left = table("a", &["k"]);
        let right = table("b", &["k"]);
        assert_eq!(route(&tree, &left, &right, agg).unwrap(), Side::Right);
        left.row.group = GroupType::Row(Box::new(left.row.clone()));
        assert_eq!(route(&tree, &left, &right, agg).unwrap(), Side::Left);
    }
}
