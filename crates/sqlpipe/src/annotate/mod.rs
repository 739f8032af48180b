//! First pass: rewrite the user tree into the annotated tree.
//!
//! The annotator walks the user operators, reconstructs each one into a
//! parallel node, and wraps every tabular node in a fresh `Box`. `Get` chains
//! are normalised into `NameBound`/`HandleBound`, `Join` becomes
//! `ExtendedJoin`, and `Bind` becomes `ExtendedBind`. Along the way it keeps
//! the path map current so every later diagnostic can name the user's own
//! expressions.

pub mod handles;
pub mod path_map;

use tracing::debug;

pub use handles::HandleTable;
pub use path_map::PathMap;

use crate::errors::{CompileError, ErrorKind, Result};
use crate::tree::{
    AggNode, AsNode, AppendNode, BoxNode, DefineNode, ExtendedBindNode, ExtendedJoinNode,
    FromNode, FunNode, GetNode, GroupNode, HandleBoundNode, HighlightNode, LimitNode,
    LiteralNode, NameBoundNode, NodeId, OrderNode, PartitionNode, SelectNode, SortNode, SqlNode,
    SqlTree, VariableNode, WhereNode,
};
use crate::types::BoxType;

use self::path_map::render_path;

/// The annotated root plus everything the later passes need: the box list in
/// construction order, the path map, and the handle table.
#[derive(Debug)]
pub struct AnnotatedTree {
    /// Box wrapping the annotated root.
    pub root: NodeId,
    /// Every box, children before parents.
    pub boxes: Vec<NodeId>,
    pub path_map: PathMap,
    pub handles: HandleTable,
}

#[derive(Debug)]
pub struct Annotator<'a> {
    tree: &'a mut SqlTree,
    path_map: PathMap,
    handles: HandleTable,
    boxes: Vec<NodeId>,
}

impl<'a> Annotator<'a> {
    pub fn new(tree: &'a mut SqlTree) -> Self {
        Annotator {
            tree,
            path_map: PathMap::new(),
            handles: HandleTable::new(),
            boxes: Vec::new(),
        }
    }

    pub fn annotate_root(mut self, root: NodeId) -> Result<AnnotatedTree> {
        let root = self.annotate(Some(root))?;
        debug!(boxes = self.boxes.len(), "annotated query tree");
        Ok(AnnotatedTree {
            root,
            boxes: self.boxes,
            path_map: self.path_map,
            handles: self.handles,
        })
    }

    /// Annotate a node in tabular context, returning the box wrapping it.
    /// `None` stands for the implicit empty input and yields an empty box.
    fn annotate(&mut self, node: Option<NodeId>) -> Result<NodeId> {
        let Some(id) = node else {
            return Ok(self.empty_box());
        };
        self.path_map.grow(id);
        let result = self.annotate_tabular(id);
        self.path_map.shrink();
        result
    }

    fn annotate_tabular(&mut self, id: NodeId) -> Result<NodeId> {
        let annotated = match self.tree.node(id).clone() {
            SqlNode::From(n) => self.tree.push(SqlNode::From(FromNode { table: n.table })),
            SqlNode::Select(n) => {
                let over = self.annotate(n.over)?;
                let label_map = self.annotate_label_map(n.label_map)?;
                self.tree.push(SqlNode::Select(SelectNode {
                    over: Some(over),
                    label_map,
                }))
            }
            SqlNode::Where(n) => {
                let over = self.annotate(n.over)?;
                let condition = self.annotate_scalar(n.condition)?;
                self.tree.push(SqlNode::Where(WhereNode {
                    over: Some(over),
                    condition,
                }))
            }
            SqlNode::Join(n) => {
                let over = self.annotate(n.over)?;
                let joinee = self.annotate(Some(n.joinee))?;
                let on = self.annotate_scalar(n.on)?;
                self.tree.push(SqlNode::ExtendedJoin(ExtendedJoinNode {
                    over: Some(over),
                    joinee,
                    on,
                    left: n.left,
                    right: n.right,
                    lateral: Vec::new(),
                    typ: BoxType::empty(),
                }))
            }
            SqlNode::Group(n) => {
                let over = self.annotate(n.over)?;
                let label_map = self.annotate_label_map(n.label_map)?;
                self.tree.push(SqlNode::Group(GroupNode {
                    over: Some(over),
                    label_map,
                }))
            }
            SqlNode::Partition(n) => {
                let over = self.annotate(n.over)?;
                let by = self.annotate_scalars(n.by)?;
                let order_by = self.annotate_scalars(n.order_by)?;
                self.tree.push(SqlNode::Partition(PartitionNode {
                    over: Some(over),
                    by,
                    order_by,
                }))
            }
            SqlNode::Append(n) => {
                let over = self.annotate(n.over)?;
                let list = n
                    .list
                    .into_iter()
                    .map(|branch| self.annotate(Some(branch)))
                    .collect::<Result<Vec<_>>>()?;
                self.tree.push(SqlNode::Append(AppendNode {
                    over: Some(over),
                    list,
                }))
            }
            SqlNode::As(n) => {
                let over = self.annotate(n.over)?;
                self.tree.push(SqlNode::As(AsNode {
                    over: Some(over),
                    name: n.name,
                }))
            }
            SqlNode::Define(n) => {
                let over = self.annotate(n.over)?;
                let label_map = self.annotate_label_map(n.label_map)?;
                self.tree.push(SqlNode::Define(DefineNode {
                    over: Some(over),
                    label_map,
                }))
            }
            SqlNode::Order(n) => {
                let over = self.annotate(n.over)?;
                let by = self.annotate_scalars(n.by)?;
                self.tree.push(SqlNode::Order(OrderNode {
                    over: Some(over),
                    by,
                }))
            }
            SqlNode::Limit(n) => {
                let over = self.annotate(n.over)?;
                self.tree.push(SqlNode::Limit(LimitNode {
                    over: Some(over),
                    limit: n.limit,
                    offset: n.offset,
                }))
            }
            SqlNode::Highlight(n) => {
                let over = self.annotate(n.over)?;
                self.tree.push(SqlNode::Highlight(HighlightNode {
                    over: Some(over),
                    color: n.color,
                }))
            }
            SqlNode::Bind(n) => {
                let over = self.annotate(n.over)?;
                let label_map = self.annotate_label_map(n.label_map)?;
                self.tree.push(SqlNode::ExtendedBind(ExtendedBindNode {
                    over: Some(over),
                    label_map,
                    owned: false,
                }))
            }
            // Scalar operators and middle-end-only nodes cannot appear in
            // tabular position in user input.
            _ => return Err(self.ill_formed()),
        };
        self.path_map.mark_origin(annotated);
        Ok(self.wrap_box(annotated))
    }

    fn annotate_scalar(&mut self, id: NodeId) -> Result<NodeId> {
        // A tabular node in scalar position is a sub-query used as a value;
        // annotate it tabularly, which also wraps it in a box.
        if self.tree.node(id).is_tabular() {
            return self.annotate(Some(id));
        }
        self.path_map.grow(id);
        let result = self.annotate_scalar_inner(id);
        self.path_map.shrink();
        result
    }

    fn annotate_scalar_inner(&mut self, id: NodeId) -> Result<NodeId> {
        match self.tree.node(id).clone() {
            SqlNode::Get(n) => {
                let base = self.tree.push(SqlNode::Get(GetNode {
                    over: None,
                    name: n.name,
                }));
                self.path_map.mark_origin(base);
                self.rebind(n.over, base)
            }
            SqlNode::Agg(n) => {
                let args = self.annotate_scalars(n.args)?;
                let filter = match n.filter {
                    Some(filter) => Some(self.annotate_scalar(filter)?),
                    None => None,
                };
                let agg = self.tree.push(SqlNode::Agg(AggNode {
                    name: n.name,
                    args,
                    filter,
                    over: None,
                }));
                self.path_map.mark_origin(agg);
                self.rebind(n.over, agg)
            }
            SqlNode::Fun(n) => {
                let args = self.annotate_scalars(n.args)?;
                let fun = self.tree.push(SqlNode::Fun(FunNode { name: n.name, args }));
                self.path_map.mark_origin(fun);
                Ok(fun)
            }
            SqlNode::Literal(n) => {
                let lit = self
                    .tree
                    .push(SqlNode::Literal(LiteralNode { value: n.value }));
                self.path_map.mark_origin(lit);
                Ok(lit)
            }
            SqlNode::Variable(n) => {
                let var = self
                    .tree
                    .push(SqlNode::Variable(VariableNode { name: n.name }));
                self.path_map.mark_origin(var);
                Ok(var)
            }
            SqlNode::Sort(n) => {
                let over = self.annotate_scalar(n.over)?;
                let sort = self.tree.push(SqlNode::Sort(SortNode {
                    over,
                    descending: n.descending,
                    nulls: n.nulls,
                }));
                self.path_map.mark_origin(sort);
                Ok(sort)
            }
            _ => Err(self.ill_formed()),
        }
    }

    /// Strip a `Get` chain: inner field navigations become `NameBound`
    /// wrappers, and a terminal tabular node becomes a `HandleBound` wrapper
    /// with a freshly allocated handle. Each wrapper originates at its own
    /// chain position so diagnostics name the exact offending segment.
    fn rebind(&mut self, chain: Option<NodeId>, base: NodeId) -> Result<NodeId> {
        let mut node = chain;
        let mut base = base;
        let mut depth = 0usize;
        let result = loop {
            let Some(id) = node else {
                break Ok(base);
            };
            self.path_map.grow(id);
            depth += 1;
            match self.tree.node(id).clone() {
                SqlNode::Get(n) => {
                    base = self.tree.push(SqlNode::NameBound(NameBoundNode {
                        over: base,
                        name: n.name,
                    }));
                    self.path_map.mark_origin(base);
                    node = n.over;
                }
                other if other.is_tabular() => {
                    let handle = self.handles.make(id);
                    let bound = self.tree.push(SqlNode::HandleBound(HandleBoundNode {
                        over: base,
                        handle,
                    }));
                    self.path_map.mark_origin(bound);
                    break Ok(bound);
                }
                _ => break Err(self.ill_formed()),
            }
        };
        for _ in 0..depth {
            self.path_map.shrink();
        }
        result
    }

    fn annotate_scalars(&mut self, nodes: Vec<NodeId>) -> Result<Vec<NodeId>> {
        nodes
            .into_iter()
            .map(|node| self.annotate_scalar(node))
            .collect()
    }

    fn annotate_label_map(
        &mut self,
        label_map: Vec<(String, NodeId)>,
    ) -> Result<Vec<(String, NodeId)>> {
        label_map
            .into_iter()
            .map(|(label, node)| Ok((label, self.annotate_scalar(node)?)))
            .collect()
    }

    fn wrap_box(&mut self, over: NodeId) -> NodeId {
        let bx = self.tree.push(SqlNode::Box(BoxNode {
            over: Some(over),
            handle: 0,
            typ: BoxType::empty(),
            refs: Vec::new(),
        }));
        self.path_map.mark_origin(bx);
        self.boxes.push(bx);
        bx
    }

    fn empty_box(&mut self) -> NodeId {
        let bx = self.tree.push(SqlNode::Box(BoxNode {
            over: None,
            handle: 0,
            typ: BoxType::empty(),
            refs: Vec::new(),
        }));
        self.path_map.mark_origin(bx);
        self.boxes.push(bx);
        bx
    }

    fn ill_formed(&self) -> CompileError {
        CompileError::new(ErrorKind::IllFormed)
            .with_path(render_path(self.tree, &self.path_map.current_nodes()))
    }
}
