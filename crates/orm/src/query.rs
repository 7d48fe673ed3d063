use std::fmt;

use sea_query::backend::{
    EscapeBuilder, OperLeftAssocDecider, PrecedenceDecider, QuotedBuilder, TableRefBuilder,
};
use sea_query::prepare::SqlWriter;
use sea_query::{BinOper, Oper, Quote, SimpleExpr, SubQueryStatement, Value};

use crate::types::DataType;

/// What a compiled statement does, which decides how the executor runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Returns rows.
    Select,
    /// Inserts rows and may report a generated key.
    Insert,
    /// Updates rows.
    Update,
    /// Deletes rows.
    Delete,
    /// Caller-written SQL, run as a query.
    Raw,
}

impl Kind {
    /// Returns `true` when the statement is run for its rows.
    #[must_use]
    pub const fn returns_rows(self) -> bool {
        matches!(self, Self::Select | Self::Raw)
    }
}

/// A compiled, parameterized statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// SQL text with numbered placeholders.
    pub sql: String,
    /// Bind parameters, in placeholder order.
    pub params: Vec<DataType>,
    /// Statement kind.
    pub kind: Kind,
    /// Whether the select carries the total-count window column.
    pub total_count: bool,
}

impl Query {
    /// Wraps caller-written SQL.
    #[must_use]
    pub fn raw(sql: impl Into<String>, params: Vec<DataType>) -> Self {
        Self {
            sql: sql.into(),
            params,
            kind: Kind::Raw,
            total_count: false,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Renders ``SeaQuery`` statements with double-quoted identifiers and
/// numbered `$n` placeholders.
pub struct QueryBuilder {
    pub quote: Quote,
    pub placeholder: &'static str, // "?" or "$"
    pub numbered: bool,            // false for "?", true for "$1, $2, ..."
}

impl Default for QueryBuilder {
    // should work for `Postgres` and `Sqlite`
    fn default() -> Self {
        Self {
            quote: Quote::new(b'"'),
            placeholder: "$",
            numbered: true,
        }
    }
}

impl QuotedBuilder for QueryBuilder {
    fn quote(&self) -> Quote {
        self.quote
    }
}

impl EscapeBuilder for QueryBuilder {}

impl TableRefBuilder for QueryBuilder {}

impl OperLeftAssocDecider for QueryBuilder {
    fn well_known_left_associative(&self, op: &BinOper) -> bool {
        matches!(
            op,
            BinOper::And | BinOper::Or | BinOper::Add | BinOper::Sub | BinOper::Mul | BinOper::Mod
        )
    }
}

impl PrecedenceDecider for QueryBuilder {
    fn inner_expr_well_known_greater_precedence(
        &self, _inner: &SimpleExpr, _outer_oper: &Oper,
    ) -> bool {
        // always parenthesize
        false
    }
}

impl sea_query::backend::QueryBuilder for QueryBuilder {
    fn prepare_query_statement(&self, query: &SubQueryStatement, sql: &mut dyn SqlWriter) {
        match query {
            SubQueryStatement::SelectStatement(s) => self.prepare_select_statement(s, sql),
            SubQueryStatement::InsertStatement(s) => self.prepare_insert_statement(s, sql),
            SubQueryStatement::UpdateStatement(s) => self.prepare_update_statement(s, sql),
            SubQueryStatement::DeleteStatement(s) => self.prepare_delete_statement(s, sql),
            SubQueryStatement::WithStatement(s) => self.prepare_with_query(s, sql),
        }
    }

    fn prepare_value(&self, value: &Value, sql: &mut dyn SqlWriter) {
        sql.push_param(value.clone(), self);
    }

    fn placeholder(&self) -> (&str, bool) {
        (self.placeholder, self.numbered)
    }
}
