use sea_query::{BinOper, Expr, SimpleExpr};

use crate::select::table_column;
use crate::value::Value;

/// A possibly table-qualified column reference.
///
/// `"posts.user_id"` parses as table `posts`, column `user_id`; an unqualified
/// name is resolved against the statement's table (or alias) when rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Col {
    /// Table or alias qualifier.
    pub table: Option<String>,
    /// Column name.
    pub name: String,
}

impl Col {
    /// Parses `column` or `table.column`.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        match reference.split_once('.') {
            Some((table, name)) if !table.is_empty() && !name.is_empty() => Self {
                table: Some(table.to_owned()),
                name: name.to_owned(),
            },
            _ => Self {
                table: None,
                name: reference.to_owned(),
            },
        }
    }

    /// Qualifies `column` with `table`.
    #[must_use]
    pub fn of(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    fn expr(&self, default_table: &str) -> Expr {
        Expr::col(table_column(self.table.as_deref().unwrap_or(default_table), &self.name))
    }
}

impl From<&str> for Col {
    fn from(reference: &str) -> Self {
        Self::parse(reference)
    }
}

impl From<String> for Col {
    fn from(reference: String) -> Self {
        Self::parse(&reference)
    }
}

/// Comparison operator of a [`Filter::Cmp`] predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
}

impl Operator {
    /// Parses an operator token such as `>=`, `!=` or `like`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let op = match token.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" => Self::Eq,
            "!=" | "<>" | "ne" | "neq" => Self::Ne,
            ">" | "gt" => Self::Gt,
            ">=" | "gte" | "egt" => Self::Gte,
            "<" | "lt" => Self::Lt,
            "<=" | "lte" | "elt" => Self::Lte,
            "like" => Self::Like,
            "not like" => Self::NotLike,
            _ => return None,
        };
        Some(op)
    }

    fn apply(self, left: Expr, right: SimpleExpr) -> SimpleExpr {
        match self {
            Self::Eq => left.eq(right),
            Self::Ne => left.ne(right),
            Self::Gt => left.gt(right),
            Self::Gte => left.gte(right),
            Self::Lt => left.lt(right),
            Self::Lte => left.lte(right),
            Self::Like => left.binary(BinOper::Like, right),
            Self::NotLike => left.binary(BinOper::NotLike, right),
        }
    }
}

/// Database predicates, independent of the statement builder.
///
/// Values are ORM [`Value`]s, so callers pass plain Rust types (`i64`,
/// `&str`, `NaiveDateTime`) which convert via `From`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// column <op> value
    Cmp(Col, Operator, Value),
    /// column IN (values)
    In(Col, Vec<Value>),
    /// column NOT IN (values)
    NotIn(Col, Vec<Value>),
    /// column IS NULL
    IsNull(Col),
    /// column IS NOT NULL
    IsNotNull(Col),
    /// column BETWEEN low AND high
    Between(Col, Value, Value),
    /// column NOT BETWEEN low AND high
    NotBetween(Col, Value, Value),
    /// Column-to-column comparison.
    Columns(Col, Operator, Col),
    /// SQL fragment passed through verbatim.
    Raw(String),
    /// Logical AND of multiple filters
    And(Vec<Self>),
    /// Logical OR of multiple filters
    Or(Vec<Self>),
    /// Logical NOT of a filter
    Not(Box<Self>),
}

impl Filter {
    /// Renders the predicate, resolving unqualified columns against
    /// `default_table`.
    #[must_use]
    pub fn into_expr(self, default_table: &str) -> SimpleExpr {
        match self {
            Self::Cmp(col, op, Value::Null) if op == Operator::Eq => {
                col.expr(default_table).is_null()
            }
            Self::Cmp(col, op, Value::Null) if op == Operator::Ne => {
                col.expr(default_table).is_not_null()
            }
            Self::Cmp(col, op, val) => op.apply(col.expr(default_table), bind(val)),
            Self::In(col, vals) => col.expr(default_table).is_in(vals.into_iter().map(bind)),
            Self::NotIn(col, vals) => {
                col.expr(default_table).is_not_in(vals.into_iter().map(bind))
            }
            Self::IsNull(col) => col.expr(default_table).is_null(),
            Self::IsNotNull(col) => col.expr(default_table).is_not_null(),
            Self::Between(col, low, high) => {
                col.expr(default_table).between(bind(low), bind(high))
            }
            Self::NotBetween(col, low, high) => {
                col.expr(default_table).not_between(bind(low), bind(high))
            }
            Self::Columns(left, op, right) => {
                op.apply(left.expr(default_table), right.expr(default_table).into())
            }
            Self::Raw(sql) => SimpleExpr::Custom(sql),
            Self::And(filters) => {
                let mut exprs = filters.into_iter().map(|f| f.into_expr(default_table));
                exprs.next().map_or_else(
                    || Expr::value(true), // no filters, so all conditions satisfied, hence `true`
                    |first| exprs.fold(first, SimpleExpr::and),
                )
            }
            Self::Or(filters) => {
                let mut exprs = filters.into_iter().map(|f| f.into_expr(default_table));
                exprs.next().map_or_else(
                    || Expr::value(false), // no filters, so 0 conditions satisfied, hence `false`
                    |first| exprs.fold(first, SimpleExpr::or),
                )
            }
            Self::Not(filter) => Expr::expr(filter.into_expr(default_table)).not(),
        }
    }

    /// Creates an equality filter (column = value). A null value renders as
    /// `IS NULL`.
    #[must_use]
    pub fn eq(col: impl Into<Col>, val: impl Into<Value>) -> Self {
        Self::Cmp(col.into(), Operator::Eq, val.into())
    }

    /// Creates an inequality filter (column <> value).
    #[must_use]
    pub fn ne(col: impl Into<Col>, val: impl Into<Value>) -> Self {
        Self::Cmp(col.into(), Operator::Ne, val.into())
    }

    /// Creates a greater-than filter (column > value).
    #[must_use]
    pub fn gt(col: impl Into<Col>, val: impl Into<Value>) -> Self {
        Self::Cmp(col.into(), Operator::Gt, val.into())
    }

    /// Creates a greater-than-or-equal filter (column >= value).
    #[must_use]
    pub fn gte(col: impl Into<Col>, val: impl Into<Value>) -> Self {
        Self::Cmp(col.into(), Operator::Gte, val.into())
    }

    /// Creates a less-than filter (column < value).
    #[must_use]
    pub fn lt(col: impl Into<Col>, val: impl Into<Value>) -> Self {
        Self::Cmp(col.into(), Operator::Lt, val.into())
    }

    /// Creates a less-than-or-equal filter (column <= value).
    #[must_use]
    pub fn lte(col: impl Into<Col>, val: impl Into<Value>) -> Self {
        Self::Cmp(col.into(), Operator::Lte, val.into())
    }

    /// Creates an IN filter (column IN (values)).
    #[must_use]
    pub fn r#in(col: impl Into<Col>, vals: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::In(col.into(), vals.into_iter().map(Into::into).collect())
    }

    /// Creates a NOT IN filter (column NOT IN (values)).
    #[must_use]
    pub fn not_in(col: impl Into<Col>, vals: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::NotIn(col.into(), vals.into_iter().map(Into::into).collect())
    }

    /// Creates an IS NULL filter.
    #[must_use]
    pub fn is_null(col: impl Into<Col>) -> Self {
        Self::IsNull(col.into())
    }

    /// Creates an IS NOT NULL filter.
    #[must_use]
    pub fn is_not_null(col: impl Into<Col>) -> Self {
        Self::IsNotNull(col.into())
    }

    /// Creates a LIKE filter with pattern matching.
    #[must_use]
    pub fn like(col: impl Into<Col>, pattern: impl Into<String>) -> Self {
        Self::Cmp(col.into(), Operator::Like, Value::Text(pattern.into()))
    }

    /// Creates a NOT LIKE filter with pattern matching.
    #[must_use]
    pub fn not_like(col: impl Into<Col>, pattern: impl Into<String>) -> Self {
        Self::Cmp(col.into(), Operator::NotLike, Value::Text(pattern.into()))
    }

    /// Creates a BETWEEN filter (column BETWEEN low AND high).
    #[must_use]
    pub fn between(col: impl Into<Col>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Between(col.into(), low.into(), high.into())
    }

    /// Creates a NOT BETWEEN filter.
    #[must_use]
    pub fn not_between(
        col: impl Into<Col>, low: impl Into<Value>, high: impl Into<Value>,
    ) -> Self {
        Self::NotBetween(col.into(), low.into(), high.into())
    }

    /// Compares two columns for equality, typically `parent.id = child.parent_id`.
    #[must_use]
    pub fn col_eq(left: impl Into<Col>, right: impl Into<Col>) -> Self {
        Self::Columns(left.into(), Operator::Eq, right.into())
    }

    /// Passes `sql` through as a literal condition.
    #[must_use]
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    /// All of `filters`.
    #[must_use]
    pub const fn and(filters: Vec<Self>) -> Self {
        Self::And(filters)
    }

    /// Any of `filters`.
    #[must_use]
    pub const fn or(filters: Vec<Self>) -> Self {
        Self::Or(filters)
    }

    /// Negates `filter`.
    #[must_use]
    pub fn not(filter: Self) -> Self {
        Self::Not(Box::new(filter))
    }
}

fn bind(value: Value) -> SimpleExpr {
    SimpleExpr::Value(value.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qualified_columns() {
        assert_eq!(Col::parse("posts.user_id"), Col::of("posts", "user_id"));
        assert_eq!(Col::parse("name").table, None);
        assert_eq!(Col::parse(".name").table, None);
    }

    #[test]
    fn parses_operators() {
        assert_eq!(Operator::parse(">="), Some(Operator::Gte));
        assert_eq!(Operator::parse("<>"), Some(Operator::Ne));
        assert_eq!(Operator::parse("LIKE"), Some(Operator::Like));
        assert_eq!(Operator::parse("~"), None);
    }
}
