//! Second pass: assign a `BoxType` to every box.
//!
//! Boxes are visited in construction order, children before parents, so each
//! resolution step only reads already-typed child boxes. Ambiguity introduced
//! by joins and appends is recorded as a type-level value; nothing fails here
//! unless an internal invariant is broken.

use indexmap::map::Entry;
use tracing::{debug, trace};

use crate::annotate::{HandleTable, PathMap};
use crate::errors::{CompileError, Result};
use crate::tree::{NodeId, SqlNode, SqlTree};
use crate::types::{BoxType, FieldType, GroupType, Handle, HandleType, RowType};

#[derive(Debug)]
pub struct TypeResolver<'a> {
    tree: &'a mut SqlTree,
    path_map: &'a PathMap,
    handles: &'a HandleTable,
}

impl<'a> TypeResolver<'a> {
    pub fn new(tree: &'a mut SqlTree, path_map: &'a PathMap, handles: &'a HandleTable) -> Self {
        TypeResolver {
            tree,
            path_map,
            handles,
        }
    }

    pub fn resolve_boxes(&mut self, boxes: &[NodeId]) -> Result<()> {
        debug!(boxes = boxes.len(), "resolving box types");
        for &bx in boxes {
            let Some(over) = self.tree.box_node(bx)?.over else {
                continue;
            };
            let handle = self.handle_of(over);
            let mut typ = self.resolve(over)?;
            if handle != 0 {
                let row = typ.row.clone();
                match typ.handle_map.entry(handle) {
                    Entry::Occupied(mut entry) => {
                        entry.insert(HandleType::Ambiguous);
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(HandleType::Row(row));
                    }
                }
            }
            trace!(%bx, name = %typ.name, handle, "resolved box");
            let b = self.tree.box_node_mut(bx)?;
            b.handle = handle;
            b.typ = typ;
        }
        Ok(())
    }

    /// Handle of the user node the annotated node came from, `0` if the node
    /// is never outer-referenced.
    fn handle_of(&self, annotated: NodeId) -> Handle {
        self.path_map
            .origin_node(annotated)
            .map(|user| self.handles.get(user))
            .unwrap_or(0)
    }

    fn resolve(&mut self, over: NodeId) -> Result<BoxType> {
        let typ = match self.tree.node(over).clone() {
            SqlNode::From(n) => BoxType::of_table(&n.table),
            SqlNode::As(n) => {
                let t = self.over_type(n.over)?;
                let mut row = RowType::new();
                row.fields.insert(n.name.clone(), FieldType::Row(t.row));
                BoxType {
                    name: n.name,
                    row,
                    handle_map: t.handle_map,
                }
            }
            SqlNode::Select(n) => {
                let t = self.over_type(n.over)?;
                BoxType {
                    name: t.name,
                    row: RowType::scalars(n.label_map.iter().map(|(label, _)| label.clone())),
                    handle_map: Default::default(),
                }
            }
            SqlNode::Define(n) => {
                let mut t = self.over_type(n.over)?;
                for (label, _) in &n.label_map {
                    t.row.fields.insert(label.clone(), FieldType::Scalar);
                }
                t
            }
            SqlNode::Group(n) => {
                let t = self.over_type(n.over)?;
                let mut row =
                    RowType::scalars(n.label_map.iter().map(|(label, _)| label.clone()));
                row.group = GroupType::Row(Box::new(t.row));
                BoxType {
                    name: "group".to_string(),
                    row,
                    handle_map: Default::default(),
                }
            }
            SqlNode::Partition(n) => {
                let t = self.over_type(n.over)?;
                let mut row = t.row.clone();
                row.group = GroupType::Row(Box::new(t.row));
                BoxType {
                    name: "group".to_string(),
                    row,
                    handle_map: t.handle_map,
                }
            }
            SqlNode::Append(n) => {
                let mut t = self.over_type(n.over)?;
                for branch in &n.list {
                    let bt = self.tree.box_node(*branch)?.typ.clone();
                    t = t.intersect(&bt);
                }
                t
            }
            SqlNode::ExtendedJoin(n) => {
                let lt = self.over_type(n.over)?;
                let rt = self.tree.box_node(n.joinee)?.typ.clone();
                let t = lt.union(&rt);
                // Cache the union for the linker's `on` validation.
                if let SqlNode::ExtendedJoin(join) = self.tree.node_mut(over) {
                    join.typ = t.clone();
                }
                t
            }
            SqlNode::ExtendedBind(n) => self.over_type(n.over)?,
            SqlNode::Highlight(n) => self.over_type(n.over)?,
            SqlNode::Limit(n) => self.over_type(n.over)?,
            SqlNode::Order(n) => self.over_type(n.over)?,
            SqlNode::Where(n) => self.over_type(n.over)?,
            other => {
                return Err(CompileError::internal(format!(
                    "cannot resolve a type for {}",
                    other.kind_name()
                )))
            }
        };
        Ok(typ)
    }

    fn over_type(&self, over: Option<NodeId>) -> Result<BoxType> {
        match over {
            Some(bx) => Ok(self.tree.box_node(bx)?.typ.clone()),
            None => Ok(BoxType::empty()),
        }
    }
}
