//! The operator tree.
//!
//! All nodes, user-authored and compiler-introduced alike, live in one arena
//! and are addressed by [`NodeId`]. Identity is id equality: sharing a
//! sub-query between two positions means reusing its id, and identity-keyed
//! maps in the middle end are keyed by id.

mod builder;
mod node;

use std::fmt;
use std::ops::Index;

pub use node::*;

use crate::errors::{CompileError, Result};

/// Identity of a node in a [`SqlTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Arena holding a user tree and, after compilation, its annotated twin.
#[derive(Debug, Default)]
pub struct SqlTree {
    nodes: Vec<SqlNode>,
}

impl SqlTree {
    pub fn new() -> Self {
        SqlTree::default()
    }

    pub fn push(&mut self, node: SqlNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &SqlNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut SqlNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn box_node(&self, id: NodeId) -> Result<&BoxNode> {
        match self.node(id) {
            SqlNode::Box(b) => Ok(b),
            other => Err(CompileError::internal(format!(
                "expected a box at {id}, found {}",
                other.kind_name()
            ))),
        }
    }

    pub(crate) fn box_node_mut(&mut self, id: NodeId) -> Result<&mut BoxNode> {
        match self.node_mut(id) {
            SqlNode::Box(b) => Ok(b),
            other => Err(CompileError::internal(format!(
                "expected a box at {id}, found {}",
                other.kind_name()
            ))),
        }
    }

    /// Short one-line rendering of a node, used in error tracebacks.
    pub fn summary(&self, id: NodeId) -> String {
        match self.node(id) {
            SqlNode::From(n) => format!("From(\"{}\")", n.table.name),
            SqlNode::As(n) => format!("As(\"{}\")", n.name),
            SqlNode::Get(n) => format!("Get(\"{}\")", n.name),
            SqlNode::Fun(n) => format!("Fun(\"{}\")", n.name),
            SqlNode::Agg(n) => format!("Agg(\"{}\")", n.name),
            SqlNode::Variable(n) => format!("Variable(\"{}\")", n.name),
            SqlNode::Select(n) => {
                let labels: Vec<_> = n.label_map.iter().map(|(l, _)| l.as_str()).collect();
                format!("Select({})", labels.join(", "))
            }
            SqlNode::Group(n) => {
                let labels: Vec<_> = n.label_map.iter().map(|(l, _)| l.as_str()).collect();
                format!("Group({})", labels.join(", "))
            }
            SqlNode::Define(n) => {
                let labels: Vec<_> = n.label_map.iter().map(|(l, _)| l.as_str()).collect();
                format!("Define({})", labels.join(", "))
            }
            SqlNode::NameBound(n) => format!("Get(\"{}\")", n.name),
            other => format!("{}(…)", other.kind_name()),
        }
    }
}

impl Index<NodeId> for SqlTree {
    type Output = SqlNode;

    fn index(&self, id: NodeId) -> &SqlNode {
        self.node(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableSchema;

    #[test]
    fn ids_are_stable_across_pushes() {
        let mut tree = SqlTree::new();
        let a = tree.from(TableSchema::new("a", ["x"]));
        let b = tree.get(["x"]);
        assert_ne!(a, b);
        assert_eq!(tree.node(a).kind_name(), "From");
        assert_eq!(tree.node(b).kind_name(), "Get");
    }

    #[test]
    fn summaries_name_the_operator() {
        let mut tree = SqlTree::new();
        let from = tree.from(TableSchema::new("people", ["name"]));
        let name = tree.get(["name"]);
        let select = tree.select(from, [("name", name)]);
        assert_eq!(tree.summary(from), "From(\"people\")");
        assert_eq!(tree.summary(name), "Get(\"name\")");
        assert_eq!(tree.summary(select), "Select(name)");
    }
}
