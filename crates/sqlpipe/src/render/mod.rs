//! SQL text emission for a linked tree.
//!
//! Emission is compositional: every box renders to a SELECT statement that
//! exports exactly the columns its `refs` demand, and parents embed children
//! as aliased sub-queries. A box sitting directly over a base table is
//! flattened into a plain FROM item. Export columns are deduplicated by
//! reference shape, so the same column demanded through two routes is
//! materialised once.

mod dialect;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

pub use dialect::Dialect;

use crate::annotate::AnnotatedTree;
use crate::catalog::TableSchema;
use crate::errors::{CompileError, Result};
use crate::tree::{NodeId, SqlNode, SqlTree};

use self::dialect::infix_op;

/// Render the linked tree into SQL text using the default dialect.
pub fn write_query(tree: &SqlTree, annotated: &AnnotatedTree) -> Result<String> {
    SqlWriter::new(tree).write(annotated)
}

/// Structural identity of a demanded reference, used to match a parent's
/// lookups with a child's exported columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RefKey {
    Get(String),
    Agg(NodeId),
    Bound(String, Box<RefKey>),
    Handle(usize, Box<RefKey>),
}

impl RefKey {
    fn of(tree: &SqlTree, id: NodeId) -> Result<RefKey> {
        match tree.node(id) {
            SqlNode::Get(get) => Ok(RefKey::Get(get.name.clone())),
            SqlNode::Agg(_) => Ok(RefKey::Agg(id)),
            SqlNode::NameBound(bound) => Ok(RefKey::Bound(
                bound.name.clone(),
                Box::new(RefKey::of(tree, bound.over)?),
            )),
            SqlNode::HandleBound(bound) => Ok(RefKey::Handle(
                bound.handle,
                Box::new(RefKey::of(tree, bound.over)?),
            )),
            other => Err(CompileError::internal(format!(
                "{} is not a reference",
                other.kind_name()
            ))),
        }
    }

    /// Name the exported column takes, before deduplication.
    fn terminal_name(&self, tree: &SqlTree) -> String {
        match self {
            RefKey::Get(name) => name.clone(),
            RefKey::Agg(id) => match tree.node(*id) {
                SqlNode::Agg(agg) => agg.name.clone(),
                _ => "agg".to_string(),
            },
            RefKey::Bound(_, inner) | RefKey::Handle(_, inner) => inner.terminal_name(tree),
        }
    }
}

/// Qualified SQL expressions for every reference the current FROM items can
/// produce.
#[derive(Debug, Clone, Default)]
struct Scope {
    map: HashMap<RefKey, String>,
}

impl Scope {
    fn insert(&mut self, key: RefKey, sql: String) {
        self.map.insert(key, sql);
    }

    fn merged(mut self, other: Scope) -> Scope {
        self.map.extend(other.map);
        self
    }
}

#[derive(Debug)]
struct Output {
    sql: String,
    /// Default alias for the rendered sub-query.
    name: String,
    /// Exported columns in SELECT-list order.
    exports: Vec<(RefKey, String)>,
    /// True for the implicit empty input; the parent omits its FROM clause.
    is_empty: bool,
}

#[derive(Debug)]
pub struct SqlWriter<'a> {
    tree: &'a SqlTree,
    dialect: Dialect,
    used_aliases: HashSet<String>,
    /// Scopes of enclosing queries, for bindings consumed laterally.
    outer_scopes: Vec<Scope>,
    /// Variable substitutions introduced by enclosing bindings.
    vars: Vec<HashMap<String, String>>,
}

impl<'a> SqlWriter<'a> {
    pub fn new(tree: &'a SqlTree) -> Self {
        SqlWriter {
            tree,
            dialect: Dialect::default(),
            used_aliases: HashSet::new(),
            outer_scopes: Vec::new(),
            vars: Vec::new(),
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Render one linked query. The writer tracks aliases for a single query
    /// and should not be reused.
    pub fn write(mut self, annotated: &AnnotatedTree) -> Result<String> {
        let out = self.render_box(annotated.root)?;
        debug!(bytes = out.sql.len(), "rendered query");
        if out.is_empty {
            return Ok("SELECT NULL".to_string());
        }
        Ok(out.sql)
    }

    fn render_box(&mut self, bx: NodeId) -> Result<Output> {
        let (over, refs, name) = {
            let b = self.tree.box_node(bx)?;
            let name = b.typ.name.clone();
            match b.over {
                Some(over) => (over, b.refs.clone(), name),
                None => {
                    return Ok(Output {
                        sql: String::new(),
                        name,
                        exports: Vec::new(),
                        is_empty: true,
                    })
                }
            }
        };

        match self.tree.node(over).clone() {
            SqlNode::From(n) => {
                let table = n.table.clone();
                let alias = self.fresh_alias(&name);
                let exports = self.export_list(&refs)?;
                let mut cols = Vec::new();
                for (key, out_alias) in &exports {
                    let col = key.terminal_name(self.tree);
                    cols.push(format!(
                        "{}.{} AS {}",
                        self.dialect.quote_ident(&alias),
                        self.dialect.quote_ident(&col),
                        self.dialect.quote_ident(out_alias)
                    ));
                }
                let cols = if cols.is_empty() {
                    "NULL".to_string()
                } else {
                    cols.join(", ")
                };
                let sql = format!(
                    "SELECT {} FROM {} AS {}",
                    cols,
                    self.table_sql(&table),
                    self.dialect.quote_ident(&alias)
                );
                Ok(Output {
                    sql,
                    name,
                    exports,
                    is_empty: false,
                })
            }
            SqlNode::Where(n) => {
                let (item, scope) = self.rel_item(input(n.over)?)?;
                let (projs, exports) = self.project(&refs, &scope)?;
                let cond = self.scalar(n.condition, &scope)?;
                Ok(Output {
                    sql: format!("SELECT {}{} WHERE {}", projs, from_clause(&item), cond),
                    name,
                    exports,
                    is_empty: false,
                })
            }
            SqlNode::Select(n) => {
                let (item, scope) = self.rel_item(input(n.over)?)?;
                let mut cols = Vec::new();
                let mut exports = Vec::new();
                for (label, expr) in &n.label_map {
                    let sql = self.scalar(*expr, &scope)?;
                    cols.push(format!("{} AS {}", sql, self.dialect.quote_ident(label)));
                    exports.push((RefKey::Get(label.clone()), label.clone()));
                }
                let cols = if cols.is_empty() {
                    "NULL".to_string()
                } else {
                    cols.join(", ")
                };
                Ok(Output {
                    sql: format!("SELECT {}{}", cols, from_clause(&item)),
                    name,
                    exports,
                    is_empty: false,
                })
            }
            SqlNode::Define(n) => {
                let (item, scope) = self.rel_item(input(n.over)?)?;
                let defined: HashMap<&String, NodeId> =
                    n.label_map.iter().map(|(l, e)| (l, *e)).collect();
                let exports = self.export_list(&refs)?;
                let mut cols = Vec::new();
                for (key, out_alias) in &exports {
                    let sql = match key {
                        RefKey::Get(nm) if defined.contains_key(nm) => {
                            self.scalar(defined[nm], &scope)?
                        }
                        _ => self.scope_sql(&scope, key)?,
                    };
                    cols.push(format!("{} AS {}", sql, self.dialect.quote_ident(out_alias)));
                }
                let cols = if cols.is_empty() {
                    "NULL".to_string()
                } else {
                    cols.join(", ")
                };
                Ok(Output {
                    sql: format!("SELECT {}{}", cols, from_clause(&item)),
                    name,
                    exports,
                    is_empty: false,
                })
            }
            SqlNode::Group(n) => {
                let (item, scope) = self.rel_item(input(n.over)?)?;
                let mut keys = Vec::new();
                for (label, expr) in &n.label_map {
                    keys.push((label.clone(), self.scalar(*expr, &scope)?));
                }
                let exports = self.export_list(&refs)?;
                let mut cols = Vec::new();
                for (key, out_alias) in &exports {
                    let sql = match key {
                        RefKey::Get(nm) => keys
                            .iter()
                            .find(|(label, _)| label == nm)
                            .map(|(_, sql)| sql.clone())
                            .ok_or_else(|| {
                                CompileError::internal(format!("`{nm}` is not a group key"))
                            })?,
                        RefKey::Agg(id) => self.render_agg(*id, &scope, None)?,
                        _ => {
                            return Err(CompileError::internal(
                                "unexpected reference shape at Group",
                            ))
                        }
                    };
                    cols.push(format!("{} AS {}", sql, self.dialect.quote_ident(out_alias)));
                }
                let cols = if cols.is_empty() {
                    "NULL".to_string()
                } else {
                    cols.join(", ")
                };
                let group_by = if keys.is_empty() {
                    String::new()
                } else {
                    let keys: Vec<_> = keys.into_iter().map(|(_, sql)| sql).collect();
                    format!(" GROUP BY {}", keys.join(", "))
                };
                Ok(Output {
                    sql: format!("SELECT {}{}{}", cols, from_clause(&item), group_by),
                    name,
                    exports,
                    is_empty: false,
                })
            }
            SqlNode::Partition(n) => {
                let (item, scope) = self.rel_item(input(n.over)?)?;
                let mut window = Vec::new();
                if !n.by.is_empty() {
                    let by = self.scalars(&n.by, &scope)?;
                    window.push(format!("PARTITION BY {}", by.join(", ")));
                }
                if !n.order_by.is_empty() {
                    let order_by = self.scalars(&n.order_by, &scope)?;
                    window.push(format!("ORDER BY {}", order_by.join(", ")));
                }
                let window = window.join(" ");
                let exports = self.export_list(&refs)?;
                let mut cols = Vec::new();
                for (key, out_alias) in &exports {
                    let sql = match key {
                        RefKey::Agg(id) => self.render_agg(*id, &scope, Some(&window))?,
                        _ => self.scope_sql(&scope, key)?,
                    };
                    cols.push(format!("{} AS {}", sql, self.dialect.quote_ident(out_alias)));
                }
                let cols = if cols.is_empty() {
                    "NULL".to_string()
                } else {
                    cols.join(", ")
                };
                Ok(Output {
                    sql: format!("SELECT {}{}", cols, from_clause(&item)),
                    name,
                    exports,
                    is_empty: false,
                })
            }
            SqlNode::Order(n) => {
                let (item, scope) = self.rel_item(input(n.over)?)?;
                let (projs, exports) = self.project(&refs, &scope)?;
                let by = self.scalars(&n.by, &scope)?;
                let order_by = if by.is_empty() {
                    String::new()
                } else {
                    format!(" ORDER BY {}", by.join(", "))
                };
                Ok(Output {
                    sql: format!("SELECT {}{}{}", projs, from_clause(&item), order_by),
                    name,
                    exports,
                    is_empty: false,
                })
            }
            SqlNode::Limit(n) => {
                let (item, scope) = self.rel_item(input(n.over)?)?;
                let (projs, exports) = self.project(&refs, &scope)?;
                let mut sql = format!("SELECT {}{}", projs, from_clause(&item));
                if let Some(limit) = n.limit {
                    sql.push_str(&format!(" LIMIT {limit}"));
                }
                if let Some(offset) = n.offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
                Ok(Output {
                    sql,
                    name,
                    exports,
                    is_empty: false,
                })
            }
            SqlNode::Append(n) => {
                let mut branches = vec![input(n.over)?];
                branches.extend(n.list.iter().copied());
                let mut parts = Vec::new();
                let mut exports = None;
                for branch in branches {
                    let (item, scope) = self.rel_item(branch)?;
                    let (projs, exp) = self.project(&refs, &scope)?;
                    parts.push(format!("SELECT {}{}", projs, from_clause(&item)));
                    if exports.is_none() {
                        exports = Some(exp);
                    }
                }
                Ok(Output {
                    sql: parts.join(" UNION ALL "),
                    name,
                    exports: exports.unwrap_or_default(),
                    is_empty: false,
                })
            }
            SqlNode::As(n) => {
                let out = self.render_box(input(n.over)?)?;
                let child_map: HashMap<RefKey, String> = out.exports.iter().cloned().collect();
                let mut exports = Vec::new();
                let mut seen = HashSet::new();
                for &r in &refs {
                    let key = RefKey::of(self.tree, r)?;
                    if !seen.insert(key.clone()) {
                        continue;
                    }
                    let col = match &key {
                        RefKey::Bound(nm, inner) if *nm == n.name => {
                            child_map.get(inner.as_ref())
                        }
                        RefKey::Handle(..) => child_map.get(&key),
                        _ => None,
                    }
                    .ok_or_else(|| {
                        CompileError::internal("aliased export not found in the inner query")
                    })?;
                    exports.push((key, col.clone()));
                }
                Ok(Output {
                    sql: out.sql,
                    name,
                    exports,
                    is_empty: out.is_empty,
                })
            }
            SqlNode::Highlight(n) => {
                let out = self.render_box(input(n.over)?)?;
                Ok(Output {
                    sql: out.sql,
                    name,
                    exports: out.exports,
                    is_empty: out.is_empty,
                })
            }
            SqlNode::ExtendedBind(n) => {
                let outer = self.outer_scopes.last().cloned().unwrap_or_default();
                let mut bound = HashMap::new();
                for (var, expr) in &n.label_map {
                    bound.insert(var.clone(), self.scalar(*expr, &outer)?);
                }
                self.vars.push(bound);
                let result = self.render_box(input(n.over)?);
                self.vars.pop();
                let out = result?;
                Ok(Output {
                    sql: out.sql,
                    name,
                    exports: out.exports,
                    is_empty: out.is_empty,
                })
            }
            SqlNode::ExtendedJoin(n) => {
                let (left_item, left_scope) = self.rel_item(input(n.over)?)?;
                let left_item = left_item
                    .ok_or_else(|| CompileError::internal("join requires a left input"))?;
                let lateral = !n.lateral.is_empty();
                if lateral {
                    self.outer_scopes.push(left_scope.clone());
                }
                let right = self.rel_item(n.joinee);
                if lateral {
                    self.outer_scopes.pop();
                }
                let (right_item, right_scope) = right?;
                let right_item = right_item
                    .ok_or_else(|| CompileError::internal("join requires a right input"))?;

                let scope = left_scope.merged(right_scope);
                let (projs, exports) = self.project(&refs, &scope)?;
                let cond = self.scalar(n.on, &scope)?;
                let keyword = match (n.left, n.right) {
                    (false, false) => "JOIN",
                    (true, false) => "LEFT JOIN",
                    (false, true) => "RIGHT JOIN",
                    (true, true) => "FULL JOIN",
                };
                let lateral_kw = if lateral { "LATERAL " } else { "" };
                Ok(Output {
                    sql: format!(
                        "SELECT {projs} FROM {left_item} {keyword} {lateral_kw}{right_item} ON {cond}"
                    ),
                    name,
                    exports,
                    is_empty: false,
                })
            }
            other => Err(CompileError::internal(format!(
                "cannot render {}",
                other.kind_name()
            ))),
        }
    }

    /// Render a child box as a FROM item. Boxes directly over a base table
    /// are flattened; the implicit empty input yields no item at all.
    fn rel_item(&mut self, child_box: NodeId) -> Result<(Option<String>, Scope)> {
        let (over, refs, handle, name) = {
            let b = self.tree.box_node(child_box)?;
            match b.over {
                Some(over) => (over, b.refs.clone(), b.handle, b.typ.name.clone()),
                None => return Ok((None, Scope::default())),
            }
        };

        let base_table = match self.tree.node(over) {
            SqlNode::From(from) => Some(Arc::clone(&from.table)),
            _ => None,
        };
        if let Some(table) = base_table {
            let alias = self.fresh_alias(&name);
            let mut scope = Scope::default();
            for &r in &refs {
                let key = RefKey::of(self.tree, r)?;
                let col = key.terminal_name(self.tree);
                let sql = format!(
                    "{}.{}",
                    self.dialect.quote_ident(&alias),
                    self.dialect.quote_ident(&col)
                );
                if handle != 0 {
                    scope.insert(RefKey::Handle(handle, Box::new(key.clone())), sql.clone());
                }
                scope.insert(key, sql);
            }
            let item = format!(
                "{} AS {}",
                self.table_sql(&table),
                self.dialect.quote_ident(&alias)
            );
            return Ok((Some(item), scope));
        }

        let out = self.render_box(child_box)?;
        if out.is_empty {
            return Ok((None, Scope::default()));
        }
        let alias = self.fresh_alias(&out.name);
        let mut scope = Scope::default();
        for (key, col) in &out.exports {
            let sql = format!(
                "{}.{}",
                self.dialect.quote_ident(&alias),
                self.dialect.quote_ident(col)
            );
            if handle != 0 {
                scope.insert(RefKey::Handle(handle, Box::new(key.clone())), sql.clone());
            }
            scope.insert(key.clone(), sql);
        }
        let item = format!("({}) AS {}", out.sql, self.dialect.quote_ident(&alias));
        Ok((Some(item), scope))
    }

    /// Projection list for a box's demanded refs, resolved in a child scope.
    fn project(
        &mut self,
        refs: &[NodeId],
        scope: &Scope,
    ) -> Result<(String, Vec<(RefKey, String)>)> {
        let exports = self.export_list(refs)?;
        if exports.is_empty() {
            return Ok(("NULL".to_string(), exports));
        }
        let mut cols = Vec::new();
        for (key, out_alias) in &exports {
            let sql = self.scope_sql(scope, key)?;
            cols.push(format!("{} AS {}", sql, self.dialect.quote_ident(out_alias)));
        }
        Ok((cols.join(", "), exports))
    }

    /// Deduplicate refs by shape and assign each a unique export alias.
    fn export_list(&self, refs: &[NodeId]) -> Result<Vec<(RefKey, String)>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut taken = HashSet::new();
        for &r in refs {
            let key = RefKey::of(self.tree, r)?;
            if !seen.insert(key.clone()) {
                continue;
            }
            let base = key.terminal_name(self.tree);
            let mut alias = base.clone();
            let mut n = 1;
            while !taken.insert(alias.clone()) {
                n += 1;
                alias = format!("{base}_{n}");
            }
            out.push((key, alias));
        }
        Ok(out)
    }

    fn scalar(&mut self, id: NodeId, scope: &Scope) -> Result<String> {
        match self.tree.node(id).clone() {
            SqlNode::Get(_) | SqlNode::NameBound(_) | SqlNode::HandleBound(_)
            | SqlNode::Agg(_) => {
                let key = RefKey::of(self.tree, id)?;
                self.scope_sql(scope, &key)
            }
            SqlNode::Fun(n) => self.render_fun(&n.name, &n.args, scope),
            SqlNode::Literal(n) => Ok(self.dialect.quote_literal(&n.value)),
            SqlNode::Variable(n) => {
                for bound in self.vars.iter().rev() {
                    if let Some(sql) = bound.get(&n.name) {
                        return Ok(sql.clone());
                    }
                }
                Ok(format!(":{}", n.name))
            }
            SqlNode::Sort(n) => {
                let expr = self.scalar(n.over, scope)?;
                let dir = if n.descending { " DESC" } else { " ASC" };
                let nulls = match n.nulls {
                    Some(crate::tree::NullsOrder::First) => " NULLS FIRST",
                    Some(crate::tree::NullsOrder::Last) => " NULLS LAST",
                    None => "",
                };
                Ok(format!("{expr}{dir}{nulls}"))
            }
            SqlNode::Box(_) => {
                // A sub-query used as a value; its bindings may reach into
                // the current scope.
                self.outer_scopes.push(scope.clone());
                let result = self.render_box(id);
                self.outer_scopes.pop();
                let out = result?;
                if out.is_empty {
                    return Ok("(SELECT NULL)".to_string());
                }
                Ok(format!("({})", out.sql))
            }
            other => Err(CompileError::internal(format!(
                "cannot render {} as a scalar",
                other.kind_name()
            ))),
        }
    }

    fn scalars(&mut self, ids: &[NodeId], scope: &Scope) -> Result<Vec<String>> {
        ids.iter().map(|&id| self.scalar(id, scope)).collect()
    }

    fn render_fun(&mut self, fun_name: &str, args: &[NodeId], scope: &Scope) -> Result<String> {
        if let Some(op) = infix_op(fun_name) {
            if args.len() >= 2 {
                let rendered = self.scalars(args, scope)?;
                return Ok(format!("({})", rendered.join(&format!(" {op} "))));
            }
        }
        match (fun_name, args.len()) {
            ("not", 1) => {
                let arg = self.scalar(args[0], scope)?;
                Ok(format!("(NOT {arg})"))
            }
            ("exists", 1) => {
                let arg = self.scalar(args[0], scope)?;
                Ok(format!("EXISTS {arg}"))
            }
            ("is_null", 1) => {
                let arg = self.scalar(args[0], scope)?;
                Ok(format!("({arg} IS NULL)"))
            }
            ("is_not_null", 1) => {
                let arg = self.scalar(args[0], scope)?;
                Ok(format!("({arg} IS NOT NULL)"))
            }
            ("in", 2) => {
                let lhs = self.scalar(args[0], scope)?;
                let rhs = self.scalar(args[1], scope)?;
                Ok(format!("({lhs} IN {rhs})"))
            }
            _ => {
                let rendered = self.scalars(args, scope)?;
                Ok(format!("{}({})", fun_name, rendered.join(", ")))
            }
        }
    }

    fn render_agg(&mut self, id: NodeId, scope: &Scope, window: Option<&str>) -> Result<String> {
        let agg = match self.tree.node(id).clone() {
            SqlNode::Agg(agg) => agg,
            other => {
                return Err(CompileError::internal(format!(
                    "expected an aggregate, found {}",
                    other.kind_name()
                )))
            }
        };
        let args = if agg.args.is_empty() {
            "*".to_string()
        } else {
            self.scalars(&agg.args, scope)?.join(", ")
        };
        let mut sql = format!("{}({})", agg.name, args);
        if let Some(filter) = agg.filter {
            let cond = self.scalar(filter, scope)?;
            sql.push_str(&format!(" FILTER (WHERE {cond})"));
        }
        if let Some(window) = window {
            sql.push_str(&format!(" OVER ({window})"));
        }
        Ok(sql)
    }

    fn scope_sql(&self, scope: &Scope, key: &RefKey) -> Result<String> {
        scope.map.get(key).cloned().ok_or_else(|| {
            CompileError::internal("reference does not resolve in the enclosing FROM")
        })
    }

    fn table_sql(&self, table: &TableSchema) -> String {
        match &table.schema {
            Some(schema) => format!(
                "{}.{}",
                self.dialect.quote_ident(schema),
                self.dialect.quote_ident(&table.name)
            ),
            None => self.dialect.quote_ident(&table.name),
        }
    }

    fn fresh_alias(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "_" } else { base };
        let mut alias = base.to_string();
        let mut n = 1;
        while !self.used_aliases.insert(alias.clone()) {
            n += 1;
            alias = format!("{base}_{n}");
        }
        alias
    }
}

fn input(over: Option<NodeId>) -> Result<NodeId> {
    over.ok_or_else(|| CompileError::internal("operator lost its input box"))
}

fn from_clause(item: &Option<String>) -> String {
    match item {
        Some(item) => format!(" FROM {item}"),
        None => String::new(),
    }
}
