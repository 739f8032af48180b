//! Third pass: propagate demanded references top-down.
//!
//! The root box is seeded with one `Get` per scalar output field; every other
//! box receives exactly the references its consumers demand. References that
//! carry a box's own handle collapse when they reach it, joins route each
//! reference to the side that can produce it, and every gathered reference is
//! validated against the type it must resolve in.

pub(crate) mod route;
pub(crate) mod validate;

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::annotate::{AnnotatedTree, PathMap};
use crate::errors::{CompileError, Result};
use crate::tree::{ExtendedJoinNode, GetNode, NodeId, SqlNode, SqlTree};
use crate::types::{BoxType, FieldType};

use self::route::{route, Side};
use self::validate::validate;

#[derive(Debug)]
pub struct Linker<'a> {
    tree: &'a mut SqlTree,
    path_map: &'a PathMap,
}

impl<'a> Linker<'a> {
    pub fn new(tree: &'a mut SqlTree, path_map: &'a PathMap) -> Self {
        Linker { tree, path_map }
    }

    pub fn link(&mut self, annotated: &AnnotatedTree) -> Result<()> {
        debug!(boxes = annotated.boxes.len(), "linking references");

        let root_type = self.tree.box_node(annotated.root)?.typ.clone();
        let mut seeds = Vec::new();
        for (name, field) in &root_type.row.fields {
            if matches!(field, FieldType::Scalar) {
                seeds.push(self.tree.push(SqlNode::Get(GetNode {
                    over: None,
                    name: name.clone(),
                })));
            }
        }
        self.tree.box_node_mut(annotated.root)?.refs.extend(seeds);

        for &bx in annotated.boxes.iter().rev() {
            let (over, own_handle, old_refs) = {
                let b = self.tree.box_node(bx)?;
                match b.over {
                    Some(over) => (over, b.handle, b.refs.clone()),
                    None => continue,
                }
            };
            // A reference addressed to this box by handle has arrived; strip
            // the wrapper and serve the inner reference.
            let refs: Vec<NodeId> = old_refs
                .into_iter()
                .map(|r| match self.tree.node(r) {
                    SqlNode::HandleBound(bound) if bound.handle == own_handle => bound.over,
                    _ => r,
                })
                .collect();
            trace!(%bx, refs = refs.len(), "linking box");
            self.tree.box_node_mut(bx)?.refs = refs.clone();
            self.link_over(over, refs)?;
        }
        Ok(())
    }

    fn link_over(&mut self, over: NodeId, refs: Vec<NodeId>) -> Result<()> {
        match self.tree.node(over).clone() {
            SqlNode::From(_) => Ok(()),
            SqlNode::Where(n) => {
                let input = child(n.over)?;
                self.push_refs(input, &refs)?;
                self.gather_and_validate(n.condition, input)
            }
            SqlNode::Highlight(n) => {
                let input = child(n.over)?;
                self.push_refs(input, &refs)
            }
            SqlNode::Limit(n) => {
                let input = child(n.over)?;
                self.push_refs(input, &refs)
            }
            SqlNode::Order(n) => {
                let input = child(n.over)?;
                self.push_refs(input, &refs)?;
                for expr in n.by {
                    self.gather_and_validate(expr, input)?;
                }
                Ok(())
            }
            SqlNode::As(n) => {
                let input = child(n.over)?;
                let mut unwrapped = Vec::with_capacity(refs.len());
                for r in refs {
                    match self.tree.node(r) {
                        SqlNode::NameBound(bound) if bound.name == n.name => {
                            unwrapped.push(bound.over);
                        }
                        SqlNode::HandleBound(_) => unwrapped.push(r),
                        other => {
                            return Err(CompileError::internal(format!(
                                "unexpected {} reference at As",
                                other.kind_name()
                            )))
                        }
                    }
                }
                self.push_refs(input, &unwrapped)
            }
            SqlNode::ExtendedBind(n) => {
                let input = child(n.over)?;
                if !n.owned {
                    // A binding outside any enclosing query has nothing to
                    // bind against; its expressions must be closed.
                    let empty = BoxType::empty();
                    for (_, expr) in &n.label_map {
                        let mut free = Vec::new();
                        self.gather(*expr, &mut free)?;
                        for r in free {
                            validate(self.tree, self.path_map, &empty, r)?;
                        }
                    }
                }
                self.push_refs(input, &refs)
            }
            SqlNode::Append(n) => {
                let input = child(n.over)?;
                self.push_refs(input, &refs)?;
                for branch in n.list {
                    self.push_refs(branch, &refs)?;
                }
                Ok(())
            }
            SqlNode::Select(n) => {
                // Select cuts the outer scope; incoming refs are satisfied by
                // the declared projection list.
                let input = child(n.over)?;
                for (_, expr) in n.label_map {
                    self.gather_and_validate(expr, input)?;
                }
                Ok(())
            }
            SqlNode::Define(n) => {
                let input = child(n.over)?;
                let defined: HashMap<String, NodeId> = n.label_map.iter().cloned().collect();
                let mut expanded: HashSet<String> = HashSet::new();
                for r in refs {
                    let name = match self.tree.node(r) {
                        SqlNode::Get(get) if defined.contains_key(&get.name) => {
                            Some(get.name.clone())
                        }
                        _ => None,
                    };
                    match name {
                        Some(name) => {
                            if expanded.insert(name.clone()) {
                                self.gather_and_validate(defined[&name], input)?;
                            }
                        }
                        None => self.push_ref(input, r)?,
                    }
                }
                Ok(())
            }
            SqlNode::Group(n) => {
                let input = child(n.over)?;
                for (_, expr) in &n.label_map {
                    self.gather_and_validate(*expr, input)?;
                }
                for r in refs {
                    match self.tree.node(r).clone() {
                        SqlNode::Agg(agg) => {
                            for arg in agg.args {
                                self.gather_and_validate(arg, input)?;
                            }
                            if let Some(filter) = agg.filter {
                                self.gather_and_validate(filter, input)?;
                            }
                        }
                        other => {
                            // Plain gets of group keys are already covered by
                            // the key expressions gathered above.
                            trace!(
                                kind = other.kind_name(),
                                "dropping non-aggregate reference at Group"
                            );
                        }
                    }
                }
                Ok(())
            }
            SqlNode::Partition(n) => {
                let input = child(n.over)?;
                for r in refs {
                    match self.tree.node(r).clone() {
                        SqlNode::Agg(agg) => {
                            for arg in agg.args {
                                self.gather_and_validate(arg, input)?;
                            }
                            if let Some(filter) = agg.filter {
                                self.gather_and_validate(filter, input)?;
                            }
                        }
                        _ => self.push_ref(input, r)?,
                    }
                }
                for expr in n.by {
                    self.gather_and_validate(expr, input)?;
                }
                for expr in n.order_by {
                    self.gather_and_validate(expr, input)?;
                }
                Ok(())
            }
            SqlNode::ExtendedJoin(n) => self.link_join(over, n, refs),
            other => Err(CompileError::internal(format!(
                "cannot link through {}",
                other.kind_name()
            ))),
        }
    }

    fn link_join(
        &mut self,
        join_id: NodeId,
        join: ExtendedJoinNode,
        refs: Vec<NodeId>,
    ) -> Result<()> {
        let left_box = child(join.over)?;
        let right_box = join.joinee;
        let left_type = self.tree.box_node(left_box)?.typ.clone();
        let right_type = self.tree.box_node(right_box)?.typ.clone();

        // References the joinee takes from the left side; they force LATERAL
        // emission and must resolve in the left schema.
        let mut lateral = Vec::new();
        self.gather(right_box, &mut lateral)?;
        for &r in &lateral {
            validate(self.tree, self.path_map, &left_type, r)?;
        }
        if let SqlNode::ExtendedJoin(node) = self.tree.node_mut(join_id) {
            node.lateral = lateral.clone();
        }
        self.push_refs(left_box, &lateral)?;

        // The join condition resolves in the joined schema.
        let mut pending = Vec::new();
        self.gather(join.on, &mut pending)?;
        for &r in &pending {
            validate(self.tree, self.path_map, &join.typ, r)?;
        }
        pending.extend(refs);

        for r in pending {
            match route(self.tree, &left_type, &right_type, r)? {
                Side::Left => self.push_ref(left_box, r)?,
                Side::Right => self.push_ref(right_box, r)?,
            }
        }
        Ok(())
    }

    /// Collect free scalar references from a subtree. Recursion passes
    /// through wrappers and into bind lists, marking bindings as owned; any
    /// other tabular operator seals the boundary, since its own pass links
    /// everything below it.
    fn gather(&mut self, id: NodeId, out: &mut Vec<NodeId>) -> Result<()> {
        match self.tree.node(id).clone() {
            SqlNode::Get(_)
            | SqlNode::Agg(_)
            | SqlNode::NameBound(_)
            | SqlNode::HandleBound(_) => {
                out.push(id);
                Ok(())
            }
            SqlNode::Fun(n) => {
                for arg in n.args {
                    self.gather(arg, out)?;
                }
                Ok(())
            }
            SqlNode::Sort(n) => self.gather(n.over, out),
            SqlNode::As(n) => self.gather_opt(n.over, out),
            SqlNode::Highlight(n) => self.gather_opt(n.over, out),
            SqlNode::Box(n) => self.gather_opt(n.over, out),
            SqlNode::ExtendedBind(n) => {
                for (_, expr) in &n.label_map {
                    self.gather(*expr, out)?;
                }
                if let SqlNode::ExtendedBind(bind) = self.tree.node_mut(id) {
                    bind.owned = true;
                }
                self.gather_opt(n.over, out)
            }
            _ => Ok(()),
        }
    }

    fn gather_opt(&mut self, id: Option<NodeId>, out: &mut Vec<NodeId>) -> Result<()> {
        match id {
            Some(id) => self.gather(id, out),
            None => Ok(()),
        }
    }

    /// Gather the free references of `expr`, validate them against the child
    /// box's type, and demand them from the child.
    fn gather_and_validate(&mut self, expr: NodeId, child_box: NodeId) -> Result<()> {
        let typ = self.tree.box_node(child_box)?.typ.clone();
        let mut free = Vec::new();
        self.gather(expr, &mut free)?;
        for &r in &free {
            validate(self.tree, self.path_map, &typ, r)?;
        }
        self.tree.box_node_mut(child_box)?.refs.extend(free);
        Ok(())
    }

    fn push_refs(&mut self, child_box: NodeId, refs: &[NodeId]) -> Result<()> {
        self.tree
            .box_node_mut(child_box)?
            .refs
            .extend_from_slice(refs);
        Ok(())
    }

    fn push_ref(&mut self, child_box: NodeId, r: NodeId) -> Result<()> {
        self.tree.box_node_mut(child_box)?.refs.push(r);
        Ok(())
    }
}

fn child(over: Option<NodeId>) -> Result<NodeId> {
    over.ok_or_else(|| CompileError::internal("operator lost its input box"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::Annotator;
    use crate::catalog::TableSchema;
    use crate::errors::ErrorKind;
    use crate::resolve::TypeResolver;

    fn compile(tree: &mut SqlTree, root: NodeId) -> Result<AnnotatedTree> {
        let annotated = Annotator::new(tree).annotate_root(root)?;
        TypeResolver::new(tree, &annotated.path_map, &annotated.handles)
            .resolve_boxes(&annotated.boxes)?;
        Linker::new(tree, &annotated.path_map).link(&annotated)?;
        Ok(annotated)
    }

    fn ref_names(tree: &SqlTree, bx: NodeId) -> Vec<String> {
        tree.box_node(bx)
            .unwrap()
            .refs
            .iter()
            .map(|&r| match tree.node(r) {
                SqlNode::Get(get) => get.name.clone(),
                SqlNode::Agg(agg) => format!("agg:{}", agg.name),
                SqlNode::NameBound(bound) => format!("{}.…", bound.name),
                SqlNode::HandleBound(bound) => format!("#{}", bound.handle),
                other => other.kind_name().to_string(),
            })
            .collect()
    }

    #[test]
    fn select_seeds_its_input_with_demanded_columns() {
        let mut tree = SqlTree::new();
        let from = tree.from(TableSchema::new("people", ["name", "age"]));
        let name = tree.get(["name"]);
        let query = tree.select(from, [("name", name)]);

        let annotated = compile(&mut tree, query).unwrap();
        let [from_box, select_box] = [annotated.boxes[0], annotated.boxes[1]];
        assert_eq!(ref_names(&tree, select_box), vec!["name"]);
        assert_eq!(ref_names(&tree, from_box), vec!["name"]);
    }

    #[test]
    fn where_passes_refs_then_demands_its_condition() {
        let mut tree = SqlTree::new();
        let from = tree.from(TableSchema::new("people", ["name", "age"]));
        let age = tree.get(["age"]);
        let lit = tree.literal(21);
        let cond = tree.fun(">", vec![age, lit]);
        let filtered = tree.where_(from, cond);
        let name = tree.get(["name"]);
        let query = tree.select(filtered, [("name", name)]);

        let annotated = compile(&mut tree, query).unwrap();
        let from_box = annotated.boxes[0];
        assert_eq!(ref_names(&tree, from_box), vec!["name", "age"]);
    }

    #[test]
    fn group_expands_aggregates_into_the_base() {
        let mut tree = SqlTree::new();
        let from = tree.from(TableSchema::new("orders", ["customer_id", "total"]));
        let key = tree.get(["customer_id"]);
        let grouped = tree.group(from, [("customer_id", key)]);
        let key_out = tree.get(["customer_id"]);
        let total = tree.get(["total"]);
        let sum = tree.agg("sum", vec![total]);
        let query = tree.select(grouped, [("customer_id", key_out), ("total", sum)]);

        let annotated = compile(&mut tree, query).unwrap();
        let from_box = annotated.boxes[0];
        assert_eq!(ref_names(&tree, from_box), vec!["customer_id", "total"]);
    }

    #[test]
    fn aggregate_without_group_is_rejected() {
        let mut tree = SqlTree::new();
        let from = tree.from(TableSchema::new("a", ["k"]));
        let count = tree.agg("count", vec![]);
        let query = tree.select(from, [("count", count)]);

        let err = compile(&mut tree, query).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedAggregate);
        assert_eq!(err.path.first().map(String::as_str), Some("Agg(\"count\")"));
    }

    #[test]
    fn unknown_namespace_is_rejected_with_a_path() {
        let mut tree = SqlTree::new();
        let a = tree.from(TableSchema::new("a", ["k"]));
        let aliased_a = tree.alias(a, "x");
        let b = tree.from(TableSchema::new("b", ["k"]));
        let aliased_b = tree.alias(b, "y");
        let xk = tree.get(["x", "k"]);
        let yk = tree.get(["y", "k"]);
        let on = tree.fun("=", vec![xk, yk]);
        let joined = tree.join(aliased_a, aliased_b, on);
        let zk = tree.get(["z", "k"]);
        let query = tree.select(joined, [("k", zk)]);

        let err = compile(&mut tree, query).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedName("z".to_string()));
        assert_eq!(err.path.first().map(String::as_str), Some("Get(\"z\")"));
    }

    #[test]
    fn join_routes_references_to_their_side() {
        let mut tree = SqlTree::new();
        let a = tree.from(TableSchema::new("a", ["k", "x"]));
        let b = tree.from(TableSchema::new("b", ["k"]));
        let ak = tree.get(["a", "k"]);
        let bk = tree.get(["b", "k"]);
        let on = tree.fun("=", vec![ak, bk]);
        let joined = tree.join(a, b, on);
        let ax = tree.get(["a", "x"]);
        let query = tree.select(joined, [("x", ax)]);

        let annotated = compile(&mut tree, query).unwrap();
        let [a_box, b_box] = [annotated.boxes[0], annotated.boxes[1]];
        // The condition's `a.k` and the projection's `a.x` land on the left,
        // `b.k` on the right.
        assert_eq!(ref_names(&tree, a_box), vec!["a.…", "a.…"]);
        assert_eq!(ref_names(&tree, b_box), vec!["b.…"]);
    }

    #[test]
    fn define_expands_each_used_definition_once() {
        let mut tree = SqlTree::new();
        let from = tree.from(TableSchema::new("t", ["a", "b"]));
        let a1 = tree.get(["a"]);
        let b1 = tree.get(["b"]);
        let total = tree.fun("+", vec![a1, b1]);
        let defined = tree.define(from, [("total", total)]);
        let t1 = tree.get(["total"]);
        let t2 = tree.get(["total"]);
        let doubled = tree.fun("+", vec![t1, t2]);
        let query = tree.select(defined, [("doubled", doubled)]);

        let annotated = compile(&mut tree, query).unwrap();
        let from_box = annotated.boxes[0];
        // One expansion of `total`, not two.
        assert_eq!(ref_names(&tree, from_box), vec!["a", "b"]);
    }

    #[test]
    fn append_broadcasts_refs_to_every_branch() {
        let mut tree = SqlTree::new();
        let a = tree.from(TableSchema::new("a", ["k", "x"]));
        let b = tree.from(TableSchema::new("b", ["k", "y"]));
        let appended = tree.append(a, vec![b]);
        let k = tree.get(["k"]);
        let query = tree.select(appended, [("k", k)]);

        let annotated = compile(&mut tree, query).unwrap();
        let [a_box, b_box] = [annotated.boxes[0], annotated.boxes[1]];
        assert_eq!(ref_names(&tree, a_box), vec!["k"]);
        assert_eq!(ref_names(&tree, b_box), vec!["k"]);
    }

    #[test]
    fn unowned_bind_must_be_closed() {
        let mut tree = SqlTree::new();
        let t = tree.from(TableSchema::new("t", ["k"]));
        let escaping = tree.get(["k"]);
        let query = tree.bind(t, [("key", escaping)]);

        let err = compile(&mut tree, query).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedName("k".to_string()));
    }

    #[test]
    fn every_linked_ref_validates_against_its_box() {
        let mut tree = SqlTree::new();
        let from = tree.from(TableSchema::new("people", ["name", "age", "city"]));
        let age = tree.get(["age"]);
        let lit = tree.literal(21);
        let cond = tree.fun(">", vec![age, lit]);
        let filtered = tree.where_(from, cond);
        let city = tree.get(["city"]);
        let grouped = tree.group(filtered, [("city", city)]);
        let city_out = tree.get(["city"]);
        let count = tree.agg("count", vec![]);
        let query = tree.select(grouped, [("city", city_out), ("count", count)]);

        let annotated = compile(&mut tree, query).unwrap();
        for &bx in &annotated.boxes {
            let b = tree.box_node(bx).unwrap();
            for &r in &b.refs {
                validate(&tree, &annotated.path_map, &b.typ, r).unwrap();
            }
        }
    }
}
