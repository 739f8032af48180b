//! Checking a reference against a box's type.

use crate::annotate::path_map::render_path;
use crate::annotate::PathMap;
use crate::errors::{CompileError, ErrorKind, Result};
use crate::tree::{NodeId, SqlNode, SqlTree};
use crate::types::{BoxType, FieldType, GroupType, HandleType, RowType};

/// Check that `reference` is meaningful against `typ`, failing with the
/// reference's user path otherwise.
pub(crate) fn validate(
    tree: &SqlTree,
    path_map: &PathMap,
    typ: &BoxType,
    reference: NodeId,
) -> Result<()> {
    match tree.node(reference) {
        SqlNode::HandleBound(bound) => match typ.handle_map.get(&bound.handle) {
            None => Err(err_at(tree, path_map, ErrorKind::UndefinedHandle, reference)),
            Some(HandleType::Ambiguous) => {
                Err(err_at(tree, path_map, ErrorKind::AmbiguousHandle, reference))
            }
            Some(HandleType::Row(row)) => validate_row(tree, path_map, row, bound.over),
        },
        _ => validate_row(tree, path_map, &typ.row, reference),
    }
}

fn validate_row(
    tree: &SqlTree,
    path_map: &PathMap,
    row: &RowType,
    reference: NodeId,
) -> Result<()> {
    match tree.node(reference) {
        SqlNode::NameBound(bound) => match row.fields.get(&bound.name) {
            None | Some(FieldType::Empty) => Err(err_at(
                tree,
                path_map,
                ErrorKind::UndefinedName(bound.name.clone()),
                reference,
            )),
            Some(FieldType::Scalar) => Err(err_at(
                tree,
                path_map,
                ErrorKind::UnexpectedScalarType(bound.name.clone()),
                reference,
            )),
            Some(FieldType::Ambiguous) => Err(err_at(
                tree,
                path_map,
                ErrorKind::AmbiguousName(bound.name.clone()),
                reference,
            )),
            Some(FieldType::Row(inner)) => validate_row(tree, path_map, inner, bound.over),
        },
        SqlNode::Get(get) => match row.fields.get(&get.name) {
            None | Some(FieldType::Empty) => Err(err_at(
                tree,
                path_map,
                ErrorKind::UndefinedName(get.name.clone()),
                reference,
            )),
            Some(FieldType::Row(_)) => Err(err_at(
                tree,
                path_map,
                ErrorKind::UnexpectedRowType(get.name.clone()),
                reference,
            )),
            Some(FieldType::Ambiguous) => Err(err_at(
                tree,
                path_map,
                ErrorKind::AmbiguousName(get.name.clone()),
                reference,
            )),
            Some(FieldType::Scalar) => Ok(()),
        },
        SqlNode::Agg(_) => match &row.group {
            GroupType::Row(_) => Ok(()),
            GroupType::Empty => Err(err_at(
                tree,
                path_map,
                ErrorKind::UnexpectedAggregate,
                reference,
            )),
            GroupType::Ambiguous => Err(err_at(
                tree,
                path_map,
                ErrorKind::AmbiguousAggregate,
                reference,
            )),
        },
        other => Err(CompileError::internal(format!(
            "cannot validate a {} reference",
            other.kind_name()
        ))),
    }
}

pub(crate) fn err_at(
    tree: &SqlTree,
    path_map: &PathMap,
    kind: ErrorKind,
    node: NodeId,
) -> CompileError {
    CompileError::new(kind).with_path(render_path(tree, &path_map.path_of(node)))
}
