use anyhow::Result;
use sea_query::{Alias, Expr, SimpleExpr};

use crate::filter::Filter;
use crate::query::{Kind, Query, QueryBuilder};
use crate::value::{Value, values_to_datatypes};

/// Builder for constructing UPDATE queries.
///
/// An [`Value::Increment`] value renders as `column = column + n`.
#[derive(Debug, Clone)]
pub struct Update {
    table: String,
    set_clauses: Vec<(String, Value)>,
    filters: Vec<Filter>,
}

impl Update {
    /// Creates a new UPDATE query builder.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set_clauses: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Sets a column to a new value.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_clauses.push((column.into(), value.into()));
        self
    }

    /// Adds a WHERE clause filter.
    #[must_use]
    pub fn r#where(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Build the UPDATE query.
    ///
    /// # Errors
    ///
    /// Returns an error if query values cannot be converted to bind parameters.
    pub fn build(self) -> Result<Query> {
        let mut statement = sea_query::Query::update();
        statement.table(Alias::new(&self.table));

        for (column, value) in self.set_clauses {
            let expr = match value {
                Value::Increment(step) => Expr::col(Alias::new(&column)).add(step),
                value => SimpleExpr::Value(value.into()),
            };
            statement.value(Alias::new(column), expr);
        }

        for filter in self.filters {
            statement.and_where(filter.into_expr(&self.table));
        }

        let (sql, values) = statement.build(QueryBuilder::default());
        let params = values_to_datatypes(values)?;

        tracing::debug!(
            table = %self.table,
            sql = %sql,
            param_count = params.len(),
            "Update generated SQL"
        );

        Ok(Query {
            sql,
            params,
            kind: Kind::Update,
            total_count: false,
        })
    }
}
