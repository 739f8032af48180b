//! Combinator-style SQL query compiler.
//!
//! Queries are built programmatically as trees of relational operators
//! (`From`, `Where`, `Select`, `Join`, `Group`, …) instead of SQL strings.
//! The compiler rewrites the operator tree into a form where every tabular
//! node is boxed with a concrete row type and a validated set of outbound
//! column references, then linearises the result into SQL text.
//!
//! Compilation runs three passes over one arena:
//!
//! 1. **Annotation** rewrites the user tree into a parallel annotated tree,
//!    wrapping every tabular node in a `Box` and normalising `Get` chains.
//! 2. **Type resolution** propagates row schemas bottom-up through every box.
//! 3. **Reference linking** propagates the set of demanded columns top-down,
//!    validating each reference and routing it across joins.
//!
//! ```
//! use sqlpipe::{SqlTree, TableSchema};
//!
//! let mut tree = SqlTree::new();
//! let people = tree.from(TableSchema::new("people", ["name", "age"]));
//! let name = tree.get(["name"]);
//! let query = tree.select(people, [("name", name)]);
//!
//! let sql = sqlpipe::to_sql(&mut tree, query).unwrap();
//! assert_eq!(
//!     sql,
//!     "SELECT \"people\".\"name\" AS \"name\" FROM \"people\" AS \"people\""
//! );
//! ```

pub mod annotate;
pub mod catalog;
pub mod errors;
pub mod link;
pub mod render;
pub mod resolve;
pub mod tree;
pub mod types;

pub use annotate::{AnnotatedTree, Annotator};
pub use catalog::TableSchema;
pub use errors::{CompileError, ErrorKind, Result};
pub use link::Linker;
pub use render::{Dialect, SqlWriter};
pub use resolve::TypeResolver;
pub use tree::{NodeId, ScalarValue, SqlNode, SqlTree};
pub use types::{BoxType, FieldType, GroupType, Handle, HandleType, RowType};

/// Run the middle end: annotate the user tree rooted at `root`, resolve a
/// type for every box, and link demanded references through the tree.
///
/// On success the returned [`AnnotatedTree`] indexes a fully decorated tree
/// inside `tree`, ready for SQL emission.
pub fn compile(tree: &mut SqlTree, root: NodeId) -> Result<AnnotatedTree> {
    let annotated = Annotator::new(tree).annotate_root(root)?;
    TypeResolver::new(tree, &annotated.path_map, &annotated.handles)
        .resolve_boxes(&annotated.boxes)?;
    Linker::new(tree, &annotated.path_map).link(&annotated)?;
    Ok(annotated)
}

/// Compile the query rooted at `root` and render it as SQL text in the
/// default dialect.
pub fn to_sql(tree: &mut SqlTree, root: NodeId) -> Result<String> {
    let annotated = compile(tree, root)?;
    render::write_query(tree, &annotated)
}
