//! Traceback from annotated nodes to the user's own operator expressions.

use std::collections::HashMap;

use crate::tree::{NodeId, SqlTree};

#[derive(Debug, Clone, Copy)]
struct PathEntry {
    /// The user node at this position.
    node: NodeId,
    /// Index of the enclosing position, if any.
    parent: Option<usize>,
}

/// Tree of user-visible positions plus an identity map from annotated nodes
/// to the position each one originated at.
#[derive(Debug, Default)]
pub struct PathMap {
    entries: Vec<PathEntry>,
    origins: HashMap<NodeId, usize>,
    current: Vec<usize>,
}

impl PathMap {
    pub fn new() -> Self {
        PathMap::default()
    }

    /// Enter a user node: append a position under the current one and make it
    /// current.
    pub fn grow(&mut self, node: NodeId) {
        let parent = self.current.last().copied();
        let idx = self.entries.len();
        self.entries.push(PathEntry { node, parent });
        self.current.push(idx);
    }

    /// Leave the current position.
    pub fn shrink(&mut self) {
        self.current.pop();
    }

    /// Record that the annotated node originated at the current position.
    pub fn mark_origin(&mut self, annotated: NodeId) {
        if let Some(&idx) = self.current.last() {
            self.origins.insert(annotated, idx);
        }
    }

    /// The user node an annotated node was produced from.
    pub fn origin_node(&self, annotated: NodeId) -> Option<NodeId> {
        self.origins
            .get(&annotated)
            .map(|&idx| self.entries[idx].node)
    }

    /// User nodes from the annotated node's origin up to the root, innermost
    /// first.
    pub fn path_of(&self, annotated: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut next = self.origins.get(&annotated).copied();
        while let Some(idx) = next {
            let entry = &self.entries[idx];
            path.push(entry.node);
            next = entry.parent;
        }
        path
    }

    /// User nodes currently entered, innermost first.
    pub fn current_nodes(&self) -> Vec<NodeId> {
        self.current
            .iter()
            .rev()
            .map(|&idx| self.entries[idx].node)
            .collect()
    }
}

/// Render a node path into the strings carried by a `CompileError`.
pub(crate) fn render_path(tree: &SqlTree, nodes: &[NodeId]) -> Vec<String> {
    nodes.iter().map(|&id| tree.summary(id)).collect()
}
