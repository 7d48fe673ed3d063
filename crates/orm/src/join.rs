use sea_query::{JoinType, SimpleExpr};

use crate::filter::Filter;

/// A SQL join, independent of the statement builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    table: String,
    alias: Option<String>,
    on: Filter,
    kind: JoinKind,
}

/// Join types supported by the ORM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    #[default]
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `FULL OUTER JOIN`
    Full,
}

impl Join {
    /// Creates a join of the given kind.
    #[must_use]
    pub fn new(kind: JoinKind, table: impl Into<String>, on: Filter) -> Self {
        Self {
            table: table.into(),
            alias: None,
            on,
            kind,
        }
    }

    /// Creates an INNER JOIN.
    #[must_use]
    pub fn inner(table: impl Into<String>, on: Filter) -> Self {
        Self::new(JoinKind::Inner, table, on)
    }

    /// Creates a LEFT JOIN.
    #[must_use]
    pub fn left(table: impl Into<String>, on: Filter) -> Self {
        Self::new(JoinKind::Left, table, on)
    }

    /// Creates a RIGHT JOIN.
    #[must_use]
    pub fn right(table: impl Into<String>, on: Filter) -> Self {
        Self::new(JoinKind::Right, table, on)
    }

    /// Creates a FULL OUTER JOIN.
    #[must_use]
    pub fn full(table: impl Into<String>, on: Filter) -> Self {
        Self::new(JoinKind::Full, table, on)
    }

    /// Sets an alias for the joined table.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The joined table's alias, or its name.
    #[must_use]
    pub fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Join kind.
    #[must_use]
    pub const fn kind(&self) -> JoinKind {
        self.kind
    }

    /// Renders the join; unqualified columns in the `ON` clause resolve
    /// against `default_table`.
    pub(crate) fn into_join_spec(self, default_table: &str) -> JoinSpec {
        JoinSpec {
            table: self.table,
            alias: self.alias,
            on: self.on.into_expr(default_table),
            kind: self.kind.into_join_type(),
        }
    }
}

impl JoinKind {
    const fn into_join_type(self) -> JoinType {
        match self {
            Self::Inner => JoinType::InnerJoin,
            Self::Left => JoinType::LeftJoin,
            Self::Right => JoinType::RightJoin,
            Self::Full => JoinType::FullOuterJoin,
        }
    }
}

/// Rendered join, kept internal to the statement builders.
#[derive(Debug, Clone)]
pub(crate) struct JoinSpec {
    pub table: String,
    pub alias: Option<String>,
    pub on: SimpleExpr,
    pub kind: JoinType,
}
