use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::NodeId;
use crate::catalog::TableSchema;
use crate::types::{BoxType, Handle};

/// A constant value embedded in a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int64(value as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// Scan of a base table.
#[derive(Debug, Clone, PartialEq)]
pub struct FromNode {
    pub table: Arc<TableSchema>,
}

/// Projection with explicit output labels.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectNode {
    pub over: Option<NodeId>,
    /// Output label to expression, declared order preserved.
    pub label_map: Vec<(String, NodeId)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereNode {
    pub over: Option<NodeId>,
    pub condition: NodeId,
}

/// Surface join; the annotator rewrites it to `ExtendedJoin`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    pub over: Option<NodeId>,
    pub joinee: NodeId,
    pub on: NodeId,
    pub left: bool,
    pub right: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupNode {
    pub over: Option<NodeId>,
    /// Group-key label to key expression.
    pub label_map: Vec<(String, NodeId)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionNode {
    pub over: Option<NodeId>,
    pub by: Vec<NodeId>,
    pub order_by: Vec<NodeId>,
}

/// Concatenation of homogeneous queries (`UNION ALL`).
#[derive(Debug, Clone, PartialEq)]
pub struct AppendNode {
    pub over: Option<NodeId>,
    pub list: Vec<NodeId>,
}

/// Wraps the input row into a single named namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct AsNode {
    pub over: Option<NodeId>,
    pub name: String,
}

/// Adds or replaces computed columns without cutting the scope.
#[derive(Debug, Clone, PartialEq)]
pub struct DefineNode {
    pub over: Option<NodeId>,
    pub label_map: Vec<(String, NodeId)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderNode {
    pub over: Option<NodeId>,
    pub by: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitNode {
    pub over: Option<NodeId>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Pretty-printing marker; transparent to compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightNode {
    pub over: Option<NodeId>,
    pub color: String,
}

/// Surface variable binding; the annotator rewrites it to `ExtendedBind`.
#[derive(Debug, Clone, PartialEq)]
pub struct BindNode {
    pub over: Option<NodeId>,
    /// Variable name to bound expression.
    pub label_map: Vec<(String, NodeId)>,
}

/// Join annotated with its lateral references and cached row type.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedJoinNode {
    pub over: Option<NodeId>,
    pub joinee: NodeId,
    pub on: NodeId,
    pub left: bool,
    pub right: bool,
    /// References the joinee takes from the left side; non-empty exactly when
    /// the join must be emitted as LATERAL.
    pub lateral: Vec<NodeId>,
    /// Union of both sides' types, cached by the resolver.
    pub typ: BoxType,
}

/// Variable binding annotated with its consumption state.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedBindNode {
    pub over: Option<NodeId>,
    pub label_map: Vec<(String, NodeId)>,
    /// Set when the binding list is consumed inside a valid outer query.
    pub owned: bool,
}

/// Rewrite-only wrapper around every tabular node.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxNode {
    pub over: Option<NodeId>,
    /// Nonzero iff this tabular node is addressed by some outer `Get` chain.
    pub handle: Handle,
    /// Filled by the type resolver.
    pub typ: BoxType,
    /// Scalar references the downstream consumer demands; filled by the
    /// linker.
    pub refs: Vec<NodeId>,
}

/// Column or namespace reference, possibly navigating through `over`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetNode {
    pub over: Option<NodeId>,
    pub name: String,
}

/// Scalar function or operator application.
#[derive(Debug, Clone, PartialEq)]
pub struct FunNode {
    pub name: String,
    pub args: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggNode {
    pub name: String,
    pub args: Vec<NodeId>,
    pub filter: Option<NodeId>,
    /// Navigation chain to the `Group`/`Partition` the aggregate targets.
    pub over: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralNode {
    pub value: ScalarValue,
}

/// Query parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableNode {
    pub name: String,
}

/// Sort direction wrapper used inside `Order.by` and `Partition.order_by`.
#[derive(Debug, Clone, PartialEq)]
pub struct SortNode {
    pub over: NodeId,
    pub descending: bool,
    pub nulls: Option<NullsOrder>,
}

/// Normalised in-scope field navigation: the scalar `over` is looked up
/// inside the row field `name`.
#[derive(Debug, Clone, PartialEq)]
pub struct NameBoundNode {
    pub over: NodeId,
    pub name: String,
}

/// Normalised outer reference: the scalar `over` is looked up inside the
/// tabular node identified by `handle`.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleBoundNode {
    pub over: NodeId,
    pub handle: Handle,
}

/// A single operator in a query tree.
///
/// Tabular variants produce rows; scalar variants produce values. `Box`,
/// `ExtendedJoin`, `ExtendedBind`, `NameBound` and `HandleBound` exist only
/// in the annotated tree and are rejected in user input.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlNode {
    From(FromNode),
    Select(SelectNode),
    Where(WhereNode),
    Join(JoinNode),
    Group(GroupNode),
    Partition(PartitionNode),
    Append(AppendNode),
    As(AsNode),
    Define(DefineNode),
    Order(OrderNode),
    Limit(LimitNode),
    Highlight(HighlightNode),
    Bind(BindNode),
    ExtendedJoin(ExtendedJoinNode),
    ExtendedBind(ExtendedBindNode),
    Box(BoxNode),
    Get(GetNode),
    Fun(FunNode),
    Agg(AggNode),
    Literal(LiteralNode),
    Variable(VariableNode),
    Sort(SortNode),
    NameBound(NameBoundNode),
    HandleBound(HandleBoundNode),
}

impl SqlNode {
    pub fn is_tabular(&self) -> bool {
        matches!(
            self,
            SqlNode::From(_)
                | SqlNode::Select(_)
                | SqlNode::Where(_)
                | SqlNode::Join(_)
                | SqlNode::Group(_)
                | SqlNode::Partition(_)
                | SqlNode::Append(_)
                | SqlNode::As(_)
                | SqlNode::Define(_)
                | SqlNode::Order(_)
                | SqlNode::Limit(_)
                | SqlNode::Highlight(_)
                | SqlNode::Bind(_)
                | SqlNode::ExtendedJoin(_)
                | SqlNode::ExtendedBind(_)
                | SqlNode::Box(_)
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlNode::From(_) => "From",
            SqlNode::Select(_) => "Select",
            SqlNode::Where(_) => "Where",
            SqlNode::Join(_) => "Join",
            SqlNode::Group(_) => "Group",
            SqlNode::Partition(_) => "Partition",
            SqlNode::Append(_) => "Append",
            SqlNode::As(_) => "As",
            SqlNode::Define(_) => "Define",
            SqlNode::Order(_) => "Order",
            SqlNode::Limit(_) => "Limit",
            SqlNode::Highlight(_) => "Highlight",
            SqlNode::Bind(_) => "Bind",
            SqlNode::ExtendedJoin(_) => "ExtendedJoin",
            SqlNode::ExtendedBind(_) => "ExtendedBind",
            SqlNode::Box(_) => "Box",
            SqlNode::Get(_) => "Get",
            SqlNode::Fun(_) => "Fun",
            SqlNode::Agg(_) => "Agg",
            SqlNode::Literal(_) => "Literal",
            SqlNode::Variable(_) => "Variable",
            SqlNode::Sort(_) => "Sort",
            SqlNode::NameBound(_) => "NameBound",
            SqlNode::HandleBound(_) => "HandleBound",
        }
    }
}
