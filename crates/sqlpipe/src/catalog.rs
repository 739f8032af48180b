use serde::{Deserialize, Serialize};

/// Description of a database table that `From` can scan.
///
/// Only names are tracked; column data types are the database's concern, not
/// the compiler's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Optional schema qualifier, e.g. `public`.
    pub schema: Option<String>,
    pub name: String,
    /// Column names in declared order. The order determines the default
    /// SELECT-list order.
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn new<N, I, C>(name: N, columns: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        TableSchema {
            schema: None,
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_order_preserved() {
        let table = TableSchema::new("people", ["person_id", "name", "age"]);
        assert_eq!(table.columns, vec!["person_id", "name", "age"]);
        assert_eq!(table.schema, None);

        let table = table.with_schema("public");
        assert_eq!(table.schema.as_deref(), Some("public"));
    }
}
