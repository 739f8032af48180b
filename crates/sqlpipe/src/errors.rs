use std::fmt;

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

/// What went wrong while compiling a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// A node was encountered in a context where it cannot appear, e.g. a
    /// scalar expression used as a table.
    #[error("node cannot appear in this context")]
    IllFormed,
    #[error("name `{0}` is not defined")]
    UndefinedName(String),
    #[error("outer reference is not defined")]
    UndefinedHandle,
    #[error("name `{0}` is a column, not a namespace")]
    UnexpectedScalarType(String),
    #[error("name `{0}` is a namespace, not a column")]
    UnexpectedRowType(String),
    #[error("name `{0}` is ambiguous")]
    AmbiguousName(String),
    #[error("outer reference is ambiguous")]
    AmbiguousHandle,
    #[error("aggregate context is ambiguous")]
    AmbiguousAggregate,
    #[error("aggregate used without an enclosing GROUP or PARTITION")]
    UnexpectedAggregate,
    #[error("internal error: {0}")]
    Internal(String),
}

/// A compile-time diagnostic.
///
/// `path` is a traceback of the user's own operator expressions leading to
/// the offending node, innermost first. It is rendered at construction time
/// so the error stays usable after the tree is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub path: Vec<String>,
}

impl CompileError {
    pub fn new(kind: ErrorKind) -> Self {
        CompileError {
            kind,
            path: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::new(ErrorKind::Internal(msg.into()))
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for entry in &self.path {
            write!(f, "\n  in {entry}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path() {
        let err = CompileError::new(ErrorKind::UndefinedName("z".to_string()))
            .with_path(vec!["Get(\"z\")".to_string(), "Select(…)".to_string()]);
        let rendered = err.to_string();
        assert!(rendered.starts_with("name `z` is not defined"));
        assert!(rendered.contains("in Get(\"z\")"));
        assert!(rendered.contains("in Select(…)"));
    }
}
