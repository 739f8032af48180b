//! Surface constructors.
//!
//! Every method pushes user nodes into the arena and returns the id of the
//! outermost one. Trees are built bottom-up; reusing an id shares the
//! sub-query by identity.

use std::sync::Arc;

use super::node::*;
use super::{NodeId, SqlTree};
use crate::catalog::TableSchema;

impl SqlTree {
    pub fn from(&mut self, table: TableSchema) -> NodeId {
        self.push(SqlNode::From(FromNode {
            table: Arc::new(table),
        }))
    }

    pub fn where_(&mut self, over: NodeId, condition: NodeId) -> NodeId {
        self.push(SqlNode::Where(WhereNode {
            over: Some(over),
            condition,
        }))
    }

    pub fn select<I, S>(&mut self, over: NodeId, label_map: I) -> NodeId
    where
        I: IntoIterator<Item = (S, NodeId)>,
        S: Into<String>,
    {
        let label_map = label_map
            .into_iter()
            .map(|(label, node)| (label.into(), node))
            .collect();
        self.push(SqlNode::Select(SelectNode {
            over: Some(over),
            label_map,
        }))
    }

    pub fn join(&mut self, over: NodeId, joinee: NodeId, on: NodeId) -> NodeId {
        self.join_kind(over, joinee, on, false, false)
    }

    pub fn left_join(&mut self, over: NodeId, joinee: NodeId, on: NodeId) -> NodeId {
        self.join_kind(over, joinee, on, true, false)
    }

    pub fn right_join(&mut self, over: NodeId, joinee: NodeId, on: NodeId) -> NodeId {
        self.join_kind(over, joinee, on, false, true)
    }

    pub fn full_join(&mut self, over: NodeId, joinee: NodeId, on: NodeId) -> NodeId {
        self.join_kind(over, joinee, on, true, true)
    }

    fn join_kind(
        &mut self,
        over: NodeId,
        joinee: NodeId,
        on: NodeId,
        left: bool,
        right: bool,
    ) -> NodeId {
        self.push(SqlNode::Join(JoinNode {
            over: Some(over),
            joinee,
            on,
            left,
            right,
        }))
    }

    pub fn group<I, S>(&mut self, over: NodeId, label_map: I) -> NodeId
    where
        I: IntoIterator<Item = (S, NodeId)>,
        S: Into<String>,
    {
        let label_map = label_map
            .into_iter()
            .map(|(label, node)| (label.into(), node))
            .collect();
        self.push(SqlNode::Group(GroupNode {
            over: Some(over),
            label_map,
        }))
    }

    pub fn partition(
        &mut self,
        over: NodeId,
        by: Vec<NodeId>,
        order_by: Vec<NodeId>,
    ) -> NodeId {
        self.push(SqlNode::Partition(PartitionNode {
            over: Some(over),
            by,
            order_by,
        }))
    }

    pub fn append(&mut self, over: NodeId, list: Vec<NodeId>) -> NodeId {
        self.push(SqlNode::Append(AppendNode {
            over: Some(over),
            list,
        }))
    }

    /// The `As` operator: wrap the input row into a namespace `name`.
    pub fn alias(&mut self, over: NodeId, name: impl Into<String>) -> NodeId {
        self.push(SqlNode::As(AsNode {
            over: Some(over),
            name: name.into(),
        }))
    }

    pub fn define<I, S>(&mut self, over: NodeId, label_map: I) -> NodeId
    where
        I: IntoIterator<Item = (S, NodeId)>,
        S: Into<String>,
    {
        let label_map = label_map
            .into_iter()
            .map(|(label, node)| (label.into(), node))
            .collect();
        self.push(SqlNode::Define(DefineNode {
            over: Some(over),
            label_map,
        }))
    }

    pub fn order(&mut self, over: NodeId, by: Vec<NodeId>) -> NodeId {
        self.push(SqlNode::Order(OrderNode {
            over: Some(over),
            by,
        }))
    }

    pub fn limit(&mut self, over: NodeId, limit: Option<u64>, offset: Option<u64>) -> NodeId {
        self.push(SqlNode::Limit(LimitNode {
            over: Some(over),
            limit,
            offset,
        }))
    }

    pub fn highlight(&mut self, over: NodeId, color: impl Into<String>) -> NodeId {
        self.push(SqlNode::Highlight(HighlightNode {
            over: Some(over),
            color: color.into(),
        }))
    }

    pub fn bind<I, S>(&mut self, over: NodeId, label_map: I) -> NodeId
    where
        I: IntoIterator<Item = (S, NodeId)>,
        S: Into<String>,
    {
        let label_map = label_map
            .into_iter()
            .map(|(label, node)| (label.into(), node))
            .collect();
        self.push(SqlNode::Bind(BindNode {
            over: Some(over),
            label_map,
        }))
    }

    /// A `Get` chain rooted in the enclosing scope: `get(["a", "b"])` is the
    /// reference `a.b`. The path must be non-empty.
    pub fn get<I, S>(&mut self, path: I) -> NodeId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.get_chain(None, path)
    }

    /// A `Get` chain rooted in another node: either navigation through a
    /// scalar chain, or a reference to a captured tabular node.
    pub fn get_over<I, S>(&mut self, over: NodeId, path: I) -> NodeId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.get_chain(Some(over), path)
    }

    fn get_chain<I, S>(&mut self, base: Option<NodeId>, path: I) -> NodeId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current = base;
        for name in path {
            let id = self.push(SqlNode::Get(GetNode {
                over: current,
                name: name.into(),
            }));
            current = Some(id);
        }
        current.expect("get path must be non-empty")
    }

    pub fn fun(&mut self, name: impl Into<String>, args: Vec<NodeId>) -> NodeId {
        self.push(SqlNode::Fun(FunNode {
            name: name.into(),
            args,
        }))
    }

    pub fn agg(&mut self, name: impl Into<String>, args: Vec<NodeId>) -> NodeId {
        self.agg_over(name, args, None, None)
    }

    pub fn agg_filter(
        &mut self,
        name: impl Into<String>,
        args: Vec<NodeId>,
        filter: NodeId,
    ) -> NodeId {
        self.agg_over(name, args, Some(filter), None)
    }

    pub fn agg_over(
        &mut self,
        name: impl Into<String>,
        args: Vec<NodeId>,
        filter: Option<NodeId>,
        over: Option<NodeId>,
    ) -> NodeId {
        self.push(SqlNode::Agg(AggNode {
            name: name.into(),
            args,
            filter,
            over,
        }))
    }

    pub fn literal(&mut self, value: impl Into<ScalarValue>) -> NodeId {
        self.push(SqlNode::Literal(LiteralNode {
            value: value.into(),
        }))
    }

    pub fn variable(&mut self, name: impl Into<String>) -> NodeId {
        self.push(SqlNode::Variable(VariableNode { name: name.into() }))
    }

    pub fn asc(&mut self, over: NodeId) -> NodeId {
        self.sort(over, false, None)
    }

    pub fn desc(&mut self, over: NodeId) -> NodeId {
        self.sort(over, true, None)
    }

    pub fn sort(&mut self, over: NodeId, descending: bool, nulls: Option<NullsOrder>) -> NodeId {
        self.push(SqlNode::Sort(SortNode {
            over,
            descending,
            nulls,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_builds_a_navigation_chain() {
        let mut tree = SqlTree::new();
        let chain = tree.get(["a", "b"]);
        match tree.node(chain) {
            SqlNode::Get(outer) => {
                assert_eq!(outer.name, "b");
                let inner = outer.over.expect("chain has an inner node");
                match tree.node(inner) {
                    SqlNode::Get(inner) => {
                        assert_eq!(inner.name, "a");
                        assert_eq!(inner.over, None);
                    }
                    other => panic!("expected Get, got {}", other.kind_name()),
                }
            }
            other => panic!("expected Get, got {}", other.kind_name()),
        }
    }

    #[test]
    fn get_over_roots_the_chain_in_a_node() {
        let mut tree = SqlTree::new();
        let from = tree.from(crate::catalog::TableSchema::new("t", ["k"]));
        let chain = tree.get_over(from, ["k"]);
        match tree.node(chain) {
            SqlNode::Get(get) => {
                assert_eq!(get.name, "k");
                assert_eq!(get.over, Some(from));
            }
            other => panic!("expected Get, got {}", other.kind_name()),
        }
    }

    #[test]
    fn label_maps_keep_declared_order() {
        let mut tree = SqlTree::new();
        let from = tree.from(crate::catalog::TableSchema::new("t", ["a", "b"]));
        let a = tree.get(["a"]);
        let b = tree.get(["b"]);
        let select = tree.select(from, [("second", b), ("first", a)]);
        match tree.node(select) {
            SqlNode::Select(n) => {
                let labels: Vec<_> = n.label_map.iter().map(|(l, _)| l.clone()).collect();
                assert_eq!(labels, vec!["second", "first"]);
            }
            other => panic!("expected Select, got {}", other.kind_name()),
        }
    }
}
