//! Row and box types propagated through the annotated tree.
//!
//! A `BoxType` describes the schema of a tabular expression: its default
//! alias, the visible row, and the map of inner tables reachable by handle.
//! Ambiguity is a type-level value, not an error; a query only fails when a
//! reference actually touches an ambiguous entry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::catalog::TableSchema;

/// Identity of a tabular node for correlated (outer) references.
///
/// `0` means "not outer-referenced".
pub type Handle = usize;

/// The shape of a single named field in a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// A plain column.
    Scalar,
    /// A nested namespace, produced by `As`.
    Row(RowType),
    /// Absent.
    Empty,
    /// Two branches of a join or append expose conflicting meanings for the
    /// name.
    Ambiguous,
}

/// The aggregate-eligible part of a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupType {
    #[default]
    Empty,
    /// The base row of a `Group` or `Partition`; aggregates validate against
    /// it.
    Row(Box<RowType>),
    Ambiguous,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowType {
    /// Visible fields, insertion order preserved. The order determines the
    /// SELECT-list order.
    pub fields: IndexMap<String, FieldType>,
    pub group: GroupType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleType {
    Row(RowType),
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxType {
    /// Default alias for this table.
    pub name: String,
    pub row: RowType,
    /// Every inner tabular node that an outer reference may target, keyed by
    /// handle.
    pub handle_map: IndexMap<Handle, HandleType>,
}

impl FieldType {
    fn union(&self, other: &FieldType) -> FieldType {
        match (self, other) {
            (FieldType::Empty, x) | (x, FieldType::Empty) => x.clone(),
            (FieldType::Row(a), FieldType::Row(b)) => FieldType::Row(a.union(b)),
            // Two scalars under one name collide, as does any kind mismatch.
            _ => FieldType::Ambiguous,
        }
    }

    fn intersect(&self, other: &FieldType) -> FieldType {
        match (self, other) {
            (FieldType::Empty, _) | (_, FieldType::Empty) => FieldType::Empty,
            (FieldType::Scalar, FieldType::Scalar) => FieldType::Scalar,
            (FieldType::Row(a), FieldType::Row(b)) => FieldType::Row(a.intersect(b)),
            _ => FieldType::Ambiguous,
        }
    }
}

impl GroupType {
    fn union(&self, other: &GroupType) -> GroupType {
        match (self, other) {
            (GroupType::Empty, g) | (g, GroupType::Empty) => g.clone(),
            _ => GroupType::Ambiguous,
        }
    }

    fn intersect(&self, other: &GroupType) -> GroupType {
        match (self, other) {
            (GroupType::Empty, _) | (_, GroupType::Empty) => GroupType::Empty,
            (GroupType::Row(a), GroupType::Row(b)) => {
                GroupType::Row(Box::new(a.intersect(b)))
            }
            _ => GroupType::Ambiguous,
        }
    }

    pub fn is_row(&self) -> bool {
        matches!(self, GroupType::Row(_))
    }
}

impl RowType {
    pub fn new() -> Self {
        RowType::default()
    }

    /// A row with one scalar field per name, in order.
    pub fn scalars<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RowType {
            fields: names
                .into_iter()
                .map(|name| (name.into(), FieldType::Scalar))
                .collect(),
            group: GroupType::Empty,
        }
    }

    pub fn union(&self, other: &RowType) -> RowType {
        let mut fields = self.fields.clone();
        for (name, field) in &other.fields {
            match fields.get_mut(name) {
                Some(existing) => {
                    *existing = existing.union(field);
                }
                None => {
                    fields.insert(name.clone(), field.clone());
                }
            }
        }
        RowType {
            fields,
            group: self.group.union(&other.group),
        }
    }

    pub fn intersect(&self, other: &RowType) -> RowType {
        let mut fields = IndexMap::new();
        for (name, field) in &self.fields {
            if let Some(theirs) = other.fields.get(name) {
                fields.insert(name.clone(), field.intersect(theirs));
            }
        }
        RowType {
            fields,
            group: self.group.intersect(&other.group),
        }
    }
}

impl BoxType {
    /// The type of the implicit empty input.
    pub fn empty() -> Self {
        BoxType {
            name: "_".to_string(),
            row: RowType::new(),
            handle_map: IndexMap::new(),
        }
    }

    /// Resolved type of a base table scan.
    ///
    /// Besides one scalar field per declared column, the row carries a
    /// trailing namespace field named after the table itself, so that
    /// qualified references like `Get(:t, :col)` survive an `As`-free join.
    /// A column sharing the table's name wins over the namespace.
    pub fn of_table(table: &TableSchema) -> Self {
        let mut row = RowType::scalars(table.columns.iter().cloned());
        if !row.fields.contains_key(&table.name) {
            row.fields.insert(
                table.name.clone(),
                FieldType::Row(RowType::scalars(table.columns.iter().cloned())),
            );
        }
        BoxType {
            name: table.name.clone(),
            row,
            handle_map: IndexMap::new(),
        }
    }

    /// Merge the schemas of the two sides of a join. Field collisions and
    /// handle collisions become ambiguous.
    pub fn union(&self, other: &BoxType) -> BoxType {
        let mut handle_map = self.handle_map.clone();
        for (handle, entry) in &other.handle_map {
            match handle_map.get_mut(handle) {
                Some(existing) => {
                    *existing = HandleType::Ambiguous;
                }
                None => {
                    handle_map.insert(*handle, entry.clone());
                }
            }
        }
        BoxType {
            name: self.name.clone(),
            row: self.row.union(&other.row),
            handle_map,
        }
    }

    /// Restrict the schema to what all branches of an append share.
    pub fn intersect(&self, other: &BoxType) -> BoxType {
        let mut handle_map = IndexMap::new();
        for (handle, entry) in &self.handle_map {
            if let Some(theirs) = other.handle_map.get(handle) {
                let merged = if entry == theirs {
                    entry.clone()
                } else {
                    HandleType::Ambiguous
                };
                handle_map.insert(*handle, merged);
            }
        }
        BoxType {
            name: self.name.clone(),
            row: self.row.intersect(&other.row),
            handle_map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(names: &[&str]) -> RowType {
        RowType::scalars(names.iter().copied())
    }

    #[test]
    fn union_collides_shared_scalars() {
        let merged = row(&["k", "x"]).union(&row(&["k", "y"]));
        assert_eq!(merged.fields.get("k"), Some(&FieldType::Ambiguous));
        assert_eq!(merged.fields.get("x"), Some(&FieldType::Scalar));
        assert_eq!(merged.fields.get("y"), Some(&FieldType::Scalar));
        // Left fields first, then fresh right fields.
        let names: Vec<_> = merged.fields.keys().cloned().collect();
        assert_eq!(names, vec!["k", "x", "y"]);
    }

    #[test]
    fn union_merges_nested_rows() {
        let mut left = row(&["v"]);
        left.fields
            .insert("t".to_string(), FieldType::Row(row(&["a"])));
        let mut right = RowType::new();
        right
            .fields
            .insert("t".to_string(), FieldType::Row(row(&["b"])));

        let merged = left.union(&right);
        match merged.fields.get("t") {
            Some(FieldType::Row(inner)) => {
                assert!(inner.fields.contains_key("a"));
                assert!(inner.fields.contains_key("b"));
            }
            other => panic!("expected nested row, got {other:?}"),
        }
    }

    #[test]
    fn intersect_keeps_common_fields_only() {
        let merged = row(&["k", "x"]).intersect(&row(&["k", "y"]));
        assert_eq!(merged.fields.get("k"), Some(&FieldType::Scalar));
        assert!(!merged.fields.contains_key("x"));
        assert!(!merged.fields.contains_key("y"));
    }

    #[test]
    fn intersect_recurses_into_nested_rows() {
        let mut left = RowType::new();
        left.fields
            .insert("t".to_string(), FieldType::Row(row(&["a", "b"])));
        let mut right = RowType::new();
        right
            .fields
            .insert("t".to_string(), FieldType::Row(row(&["b", "c"])));

        let merged = left.intersect(&right);
        match merged.fields.get("t") {
            Some(FieldType::Row(inner)) => {
                let names: Vec<_> = inner.fields.keys().cloned().collect();
                assert_eq!(names, vec!["b"]);
            }
            other => panic!("expected nested row, got {other:?}"),
        }
    }

    #[test]
    fn group_union_prefers_the_present_side() {
        let grouped = GroupType::Row(Box::new(row(&["k"])));
        assert_eq!(GroupType::Empty.union(&grouped), grouped);
        assert_eq!(grouped.union(&GroupType::Empty), grouped);
        assert_eq!(grouped.union(&grouped), GroupType::Ambiguous);
    }

    #[test]
    fn table_type_exposes_columns_and_namespace() {
        let t = BoxType::of_table(&TableSchema::new("person", ["person_id", "name"]));
        assert_eq!(t.name, "person");
        let names: Vec<_> = t.row.fields.keys().cloned().collect();
        assert_eq!(names, vec!["person_id", "name", "person"]);
        match t.row.fields.get("person") {
            Some(FieldType::Row(inner)) => {
                assert_eq!(inner.fields.len(), 2);
            }
            other => panic!("expected namespace row, got {other:?}"),
        }
    }

    #[test]
    fn handle_union_marks_overlap_ambiguous() {
        let mut left = BoxType::empty();
        left.handle_map.insert(1, HandleType::Row(row(&["a"])));
        let mut right = BoxType::empty();
        right.handle_map.insert(1, HandleType::Row(row(&["a"])));
        right.handle_map.insert(2, HandleType::Row(row(&["b"])));

        let merged = left.union(&right);
        assert_eq!(merged.handle_map.get(&1), Some(&HandleType::Ambiguous));
        assert_eq!(
            merged.handle_map.get(&2),
            Some(&HandleType::Row(row(&["b"])))
        );
    }
}
