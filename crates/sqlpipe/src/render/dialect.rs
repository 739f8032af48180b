//! Target-dialect quoting and operator tables.

use crate::tree::ScalarValue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    #[default]
    Postgres,
    Sqlite,
    Mysql,
}

impl Dialect {
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
        }
    }

    pub fn quote_literal(&self, value: &ScalarValue) -> String {
        match value {
            ScalarValue::Null => "NULL".to_string(),
            ScalarValue::Boolean(true) => "TRUE".to_string(),
            ScalarValue::Boolean(false) => "FALSE".to_string(),
            ScalarValue::Int64(v) => v.to_string(),
            ScalarValue::Float64(v) => v.to_string(),
            ScalarValue::Utf8(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }
}

/// SQL spelling of a scalar function name used as an infix operator.
pub(crate) fn infix_op(name: &str) -> Option<&'static str> {
    Some(match name {
        "=" => "=",
        "<>" | "!=" => "<>",
        "<" => "<",
        "<=" => "<=",
        ">" => ">",
        ">=" => ">=",
        "+" => "+",
        "-" => "-",
        "*" => "*",
        "/" => "/",
        "%" => "%",
        "and" => "AND",
        "or" => "OR",
        "like" => "LIKE",
        "ilike" => "ILIKE",
        "||" | "concat" => "||",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_escaped() {
        assert_eq!(Dialect::Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Mysql.quote_ident("a`b"), "`a``b`");
    }

    #[test]
    fn literals_are_escaped() {
        assert_eq!(
            Dialect::Postgres.quote_literal(&ScalarValue::Utf8("it's".to_string())),
            "'it''s'"
        );
        assert_eq!(Dialect::Postgres.quote_literal(&ScalarValue::Null), "NULL");
        assert_eq!(
            Dialect::Postgres.quote_literal(&ScalarValue::Boolean(true)),
            "TRUE"
        );
        assert_eq!(
            Dialect::Postgres.quote_literal(&ScalarValue::Int64(-3)),
            "-3"
        );
    }

    #[test]
    fn operator_table_covers_comparisons() {
        assert_eq!(infix_op("="), Some("="));
        assert_eq!(infix_op("!="), Some("<>"));
        assert_eq!(infix_op("and"), Some("AND"));
        assert_eq!(infix_op("nope"), None);
    }
}
